//! Document reader (§3): turns SCXML markup into a [`Document`] tree.
//!
//! A single forward pass over a `quick_xml::Reader` pull-parser, a
//! stack of open element ids standing in for the nesting `fsm.rs` used
//! to track with its own hand-rolled state machine, and a post-pass
//! that assigns every state-like node its dotted display path. Elements
//! outside the supported set are skipped (with a warning) rather than
//! failing the whole document — only structural problems within
//! elements this crate does handle are reported as [`LoadError`].

use std::collections::HashMap;
use std::io::BufRead;

use log::warn;
use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::reader::Reader;

use crate::error::LoadError;
use crate::node::{ClearKind, DataModelKind, Document, Node, NodeId, NodeKind, parse_transition_type};

pub fn parse_str(xml: &str) -> Result<Document, LoadError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    parse_with(reader)
}

pub fn parse_reader<R: BufRead>(source: R) -> Result<Document, LoadError> {
    let mut reader = Reader::from_reader(source);
    reader.config_mut().trim_text(true);
    parse_with(reader)
}

struct OpenFrame {
    id: NodeId,
    skip_depth: u32,
}

fn parse_with<R: BufRead>(mut reader: Reader<R>) -> Result<Document, LoadError> {
    let mut doc = Document::default();
    let mut stack: Vec<OpenFrame> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| LoadError::Xml(e.to_string()))? {
            XmlEvent::Eof => break,
            XmlEvent::Start(start) => {
                let decoder = reader.decoder();
                handle_start(&mut doc, &mut stack, &start, false, decoder)?;
            }
            XmlEvent::Empty(start) => {
                let decoder = reader.decoder();
                handle_start(&mut doc, &mut stack, &start, true, decoder)?;
            }
            XmlEvent::Text(text) => {
                if let Some(frame) = stack.last() {
                    if frame.skip_depth == 0 {
                        let decoded = text.unescape().unwrap_or_default().to_string();
                        doc.nodes[frame.id as usize].content.push_str(&decoded);
                    }
                }
            }
            XmlEvent::End(_) => {
                if let Some(frame) = stack.last_mut() {
                    if frame.skip_depth > 0 {
                        frame.skip_depth -= 1;
                        continue;
                    }
                }
                stack.pop();
            }
            _ => {}
        }
        buf.clear();
    }

    if doc.nodes.is_empty() {
        return Err(LoadError::Xml("empty document".to_string()));
    }

    assign_paths(&mut doc);
    Ok(doc)
}

fn handle_start(
    doc: &mut Document,
    stack: &mut Vec<OpenFrame>,
    start: &BytesStart,
    self_closing: bool,
    decoder: quick_xml::encoding::Decoder,
) -> Result<(), LoadError> {
    if let Some(top) = stack.last_mut() {
        if top.skip_depth > 0 {
            if !self_closing {
                top.skip_depth += 1;
            }
            return Ok(());
        }
    }

    let local_name = String::from_utf8_lossy(start.local_name().as_ref()).to_string();
    let attrs = decode_attributes(start, decoder)?;

    let kind = match local_name.as_str() {
        "scxml" => {
            let initial = attrs.get("initial").cloned();
            let datamodel = attrs
                .get("datamodel")
                .map(|v| DataModelKind::parse(v))
                .unwrap_or(DataModelKind::Null);
            doc.datamodel = datamodel;
            doc.version = attrs.get("version").cloned().unwrap_or_else(|| "1.0".to_string());
            Some(NodeKind::Root { initial, datamodel })
        }
        "state" => Some(NodeKind::State {
            id: require(&attrs, "state", "id")?,
            initial: attrs.get("initial").cloned(),
        }),
        "parallel" => Some(NodeKind::Parallel {
            id: require(&attrs, "parallel", "id")?,
        }),
        "final" => Some(NodeKind::Final {
            id: require(&attrs, "final", "id")?,
        }),
        "initial" => Some(NodeKind::Initial { target: String::new() }),
        "transition" => Some(NodeKind::Transition {
            event: attrs.get("event").cloned().unwrap_or_default(),
            target: attrs
                .get("target")
                .map(|v| v.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            cond: attrs.get("cond").cloned(),
            transition_type: attrs
                .get("type")
                .map(|v| parse_transition_type(v))
                .unwrap_or(crate::node::TransitionType::External),
        }),
        "datamodel" => Some(NodeKind::DataModelDecl),
        "data" => Some(NodeKind::Data {
            id: require(&attrs, "data", "id")?,
            expr: attrs.get("expr").cloned(),
            src: attrs.get("src").cloned(),
            value_type: "data".to_string(),
        }),
        "onentry" => Some(NodeKind::OnEntry),
        "onexit" => Some(NodeKind::OnExit),
        "assign" => Some(NodeKind::Assign {
            location: require(&attrs, "assign", "location")?,
            expr: attrs.get("expr").cloned(),
            clear: attrs.get("clear").map(|v| match v.as_str() {
                "null" => ClearKind::Null,
                "undefined" => ClearKind::Undefined,
                _ => ClearKind::Delete,
            }),
        }),
        "raise" => Some(NodeKind::Raise {
            event: attrs.get("event").cloned(),
            event_expr: attrs.get("eventexpr").cloned(),
        }),
        "if" => Some(NodeKind::If {
            cond: require(&attrs, "if", "cond")?,
        }),
        "elseif" => Some(NodeKind::ElseIf {
            cond: require(&attrs, "elseif", "cond")?,
        }),
        "else" => Some(NodeKind::Else),
        "log" => Some(NodeKind::Log {
            expr: attrs.get("expr").cloned(),
            label: attrs.get("label").cloned(),
        }),
        "send" => Some(NodeKind::Send {
            event: attrs.get("event").cloned(),
            event_expr: attrs.get("eventexpr").cloned(),
            target: attrs.get("target").cloned(),
            target_expr: attrs.get("targetexpr").cloned(),
            type_value: attrs.get("type").cloned(),
            type_expr: attrs.get("typeexpr").cloned(),
            delay: attrs.get("delay").cloned(),
            delay_expr: attrs.get("delayexpr").cloned(),
            id: attrs.get("id").cloned(),
            id_location: attrs.get("idlocation").cloned(),
            namelist: attrs.get("namelist").cloned(),
        }),
        "param" => Some(NodeKind::Param {
            name: require(&attrs, "param", "name")?,
            expr: attrs.get("expr").cloned(),
            location: attrs.get("location").cloned(),
        }),
        other => {
            warn!("skipping unsupported element <{}>", other);
            None
        }
    };

    let kind = match kind {
        Some(k) => k,
        None => {
            if !self_closing {
                if let Some(top) = stack.last_mut() {
                    top.skip_depth += 1;
                } else {
                    stack.push(OpenFrame { id: 0, skip_depth: 1 });
                }
            }
            return Ok(());
        }
    };

    let parent = stack.last().map(|f| f.id);
    let id = doc.nodes.len() as NodeId;
    doc.nodes.push(Node {
        id,
        kind,
        content: String::new(),
        children: Vec::new(),
        parent,
    });
    if let Some(p) = parent {
        doc.nodes[p as usize].children.push(id);
    } else {
        doc.root = id;
    }

    if let NodeKind::State { id: local, .. } | NodeKind::Parallel { id: local } | NodeKind::Final { id: local } =
        &doc.nodes[id as usize].kind
    {
        doc.index_id(local.clone(), id);
    }

    if !self_closing {
        stack.push(OpenFrame { id, skip_depth: 0 });
    }

    Ok(())
}

/// `<initial>` never has its own `target` attribute — it always wraps a
/// `<transition target="...">`. After the tree is built, copy that
/// transition's first target up into the `Initial` node.
fn resolve_initial_targets(doc: &mut Document) {
    for i in 0..doc.nodes.len() {
        if !matches!(doc.nodes[i].kind, NodeKind::Initial { .. }) {
            continue;
        }
        let mut target = String::new();
        for &child in doc.nodes[i].children.clone().iter() {
            if let NodeKind::Transition { target: t, .. } = &doc.nodes[child as usize].kind {
                if let Some(first) = t.first() {
                    target = first.clone();
                }
            }
        }
        if let NodeKind::Initial { target: slot } = &mut doc.nodes[i].kind {
            *slot = target;
        }
    }
}

fn decode_attributes(
    start: &BytesStart,
    decoder: quick_xml::encoding::Decoder,
) -> Result<HashMap<String, String>, LoadError> {
    let mut out = HashMap::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| LoadError::Xml(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string();
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(|e| LoadError::Xml(e.to_string()))?
            .to_string();
        out.insert(key, value);
    }
    Ok(out)
}

fn require(attrs: &HashMap<String, String>, element: &str, attribute: &str) -> Result<String, LoadError> {
    attrs.get(attribute).cloned().ok_or_else(|| LoadError::MissingAttribute {
        element: element.to_string(),
        attribute: attribute.to_string(),
    })
}

fn assign_paths(doc: &mut Document) {
    resolve_initial_targets(doc);
    let root = doc.root;
    assign_path_from(doc, root, "");
}

fn assign_path_from(doc: &mut Document, id: NodeId, prefix: &str) {
    let local = doc.kind(id).local_id().map(str::to_string);
    let path = match (&local, prefix.is_empty()) {
        (Some(l), true) => l.clone(),
        (Some(l), false) => format!("{}.{}", prefix, l),
        (None, _) => prefix.to_string(),
    };
    if local.is_some() {
        doc.set_path(id, path.clone());
    }
    let next_prefix = if local.is_some() { path.as_str() } else { prefix };
    for child in doc.children(id).to_vec() {
        assign_path_from(doc, child, next_prefix);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r#"
    <scxml initial="a" version="1.0" datamodel="null">
      <state id="a">
        <transition event="go" target="b"/>
      </state>
      <final id="b"/>
    </scxml>
    "#;

    #[test]
    fn parses_flat_states() {
        let doc = parse_str(SIMPLE).expect("parse");
        let a = doc.node_for_id("a").expect("state a");
        let b = doc.node_for_id("b").expect("state b");
        assert!(doc.is_atomic(a));
        assert!(doc.is_final(b));
        assert_eq!(doc.transitions_of(a).len(), 1);
    }

    #[test]
    fn initial_attribute_resolves() {
        let doc = parse_str(SIMPLE).expect("parse");
        let initial = doc.initial_child(doc.root).expect("initial");
        assert_eq!(doc.node_for_id("a"), Some(initial));
    }

    #[test]
    fn nested_initial_element() {
        let xml = r#"
        <scxml version="1.0">
          <state id="outer">
            <initial>
              <transition target="inner2"/>
            </initial>
            <state id="inner1"/>
            <state id="inner2"/>
          </state>
        </scxml>
        "#;
        let doc = parse_str(xml).expect("parse");
        let outer = doc.node_for_id("outer").expect("outer");
        let inner2 = doc.node_for_id("inner2").expect("inner2");
        assert_eq!(doc.initial_child(outer), Some(inner2));
    }

    #[test]
    fn missing_required_attribute_errors() {
        let xml = r#"<scxml version="1.0"><state/></scxml>"#;
        assert!(parse_str(xml).is_err());
    }
}
