//! The parsed-document node tree (§3 of the design: a recursive,
//! immutable-after-parse structure of tagged node variants).
//!
//! A [`Document`] owns every [`Node`] in a flat `Vec`, addressed by the
//! dense [`NodeId`] assigned during reading. State/Parallel/Final nodes
//! additionally get a canonical dotted path (`game.systems.health`),
//! which is the identity the rest of the crate (history, persistence,
//! the public API) actually uses; the `NodeId` is only an indexing
//! convenience for the document-order algorithms.

use std::collections::HashMap;

pub type NodeId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataModelKind {
    #[default]
    Null,
    Ecmascript,
    Xpath,
}

impl DataModelKind {
    pub fn parse(value: &str) -> DataModelKind {
        match value.to_ascii_lowercase().as_str() {
            "ecmascript" => DataModelKind::Ecmascript,
            "xpath" => DataModelKind::Xpath,
            _ => DataModelKind::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionType {
    Internal,
    External,
}

pub fn parse_transition_type(value: &str) -> TransitionType {
    if value.eq_ignore_ascii_case("internal") {
        TransitionType::Internal
    } else {
        TransitionType::External
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearKind {
    /// `clear="true"` — delete the location.
    Delete,
    /// `clear="null"` — set the location to null.
    Null,
    /// `clear="undefined"` — set the location to undefined (absent value).
    Undefined,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Root {
        initial: Option<String>,
        datamodel: DataModelKind,
    },
    State {
        id: String,
        initial: Option<String>,
    },
    Parallel {
        id: String,
    },
    Final {
        id: String,
    },
    /// The `<initial>` marker child of a compound state; `target` holds the
    /// id named by its (single) child transition.
    Initial {
        target: String,
    },
    Transition {
        event: String,
        target: Vec<String>,
        cond: Option<String>,
        transition_type: TransitionType,
    },
    DataModelDecl,
    Data {
        id: String,
        expr: Option<String>,
        src: Option<String>,
        value_type: String,
    },
    OnEntry,
    OnExit,
    Assign {
        location: String,
        expr: Option<String>,
        clear: Option<ClearKind>,
    },
    Raise {
        event: Option<String>,
        event_expr: Option<String>,
    },
    If {
        cond: String,
    },
    ElseIf {
        cond: String,
    },
    Else,
    Log {
        expr: Option<String>,
        label: Option<String>,
    },
    Send {
        event: Option<String>,
        event_expr: Option<String>,
        target: Option<String>,
        target_expr: Option<String>,
        type_value: Option<String>,
        type_expr: Option<String>,
        delay: Option<String>,
        delay_expr: Option<String>,
        id: Option<String>,
        id_location: Option<String>,
        namelist: Option<String>,
    },
    Param {
        name: String,
        expr: Option<String>,
        location: Option<String>,
    },
}

impl NodeKind {
    /// Whether this node is itself a piece of executable content (runs
    /// during entry/exit/transition as opposed to being pure structure).
    pub fn is_executable(&self) -> bool {
        matches!(
            self,
            NodeKind::Assign { .. }
                | NodeKind::Raise { .. }
                | NodeKind::If { .. }
                | NodeKind::ElseIf { .. }
                | NodeKind::Else
                | NodeKind::Log { .. }
                | NodeKind::Send { .. }
        )
    }

    pub fn is_state_like(&self) -> bool {
        matches!(
            self,
            NodeKind::State { .. } | NodeKind::Parallel { .. } | NodeKind::Final { .. }
        )
    }

    pub fn local_id(&self) -> Option<&str> {
        match self {
            NodeKind::State { id, .. } | NodeKind::Parallel { id } | NodeKind::Final { id } => {
                Some(id.as_str())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub content: String,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
}

impl Node {
    pub fn allow_children(&self) -> bool {
        !matches!(
            self.kind,
            NodeKind::Param { .. } | NodeKind::Data { .. } | NodeKind::Initial { .. }
        )
    }
}

/// A fully parsed SCXML document: every node, plus the flat path index
/// that is the externally visible identity of every state-like node.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub nodes: Vec<Node>,
    pub root: NodeId,
    pub version: String,
    pub datamodel: DataModelKind,
    paths: HashMap<NodeId, String>,
    path_index: HashMap<String, NodeId>,
    /// Every state-like node's raw `id` attribute, document-wide — this
    /// is what `<transition target="...">` actually resolves against,
    /// as distinct from the display `path` above.
    id_index: HashMap<String, NodeId>,
}

impl Document {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.node(id).kind
    }

    pub fn path(&self, id: NodeId) -> &str {
        self.paths.get(&id).map(|s| s.as_str()).unwrap_or("")
    }

    pub fn node_for_path(&self, path: &str) -> Option<NodeId> {
        self.path_index.get(path).copied()
    }

    pub fn set_path(&mut self, id: NodeId, path: String) {
        self.path_index.insert(path.clone(), id);
        self.paths.insert(id, path);
    }

    pub fn node_for_id(&self, id: &str) -> Option<NodeId> {
        self.id_index.get(id).copied()
    }

    pub fn index_id(&mut self, local_id: String, node: NodeId) {
        self.id_index.insert(local_id, node);
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Ancestor chain from `id` up to (excluding) the root, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            if p == self.root {
                break;
            }
            out.push(p);
            cur = self.parent(p);
        }
        out
    }

    /// Whether `id` is `of` itself or a descendant of it.
    pub fn is_descendant_or_self(&self, id: NodeId, of: NodeId) -> bool {
        if id == of || of == self.root {
            return true;
        }
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            if p == of {
                return true;
            }
            cur = self.parent(p);
        }
        false
    }

    /// All state-like descendants of `id` (not including `id` itself),
    /// in document order.
    pub fn state_descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        for &child in self.children(id) {
            if self.kind(child).is_state_like() {
                out.push(child);
                out.extend(self.state_descendants(child));
            }
        }
        out
    }

    pub fn is_atomic(&self, id: NodeId) -> bool {
        match self.kind(id) {
            NodeKind::Final { .. } => true,
            NodeKind::State { .. } => !self
                .children(id)
                .iter()
                .any(|c| self.kind(*c).is_state_like()),
            NodeKind::Parallel { .. } => false,
            _ => false,
        }
    }

    pub fn is_parallel(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Parallel { .. })
    }

    pub fn is_final(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Final { .. })
    }

    /// Direct State/Parallel/Final children, in document order.
    pub fn child_states(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| self.kind(*c).is_state_like())
            .collect()
    }

    /// Outgoing `<transition>` children of a state-like node.
    pub fn transitions_of(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| matches!(self.kind(*c), NodeKind::Transition { .. }))
            .collect()
    }

    pub fn onentry_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| matches!(self.kind(*c), NodeKind::OnEntry))
            .collect()
    }

    pub fn onexit_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|c| matches!(self.kind(*c), NodeKind::OnExit))
            .collect()
    }

    /// Document order over every state-like node, root-first.
    pub fn document_order(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.document_order_from(self.root, &mut out);
        out
    }

    fn document_order_from(&self, id: NodeId, out: &mut Vec<NodeId>) {
        if self.kind(id).is_state_like() {
            out.push(id);
        }
        for &child in self.children(id) {
            self.document_order_from(child, out);
        }
    }

    /// Initial child id (local, unresolved) of a compound/parallel state,
    /// following the priority: `initial` attribute, `<initial>` child,
    /// first State/Parallel/Final child.
    pub fn initial_child(&self, id: NodeId) -> Option<NodeId> {
        let attr_initial = match self.kind(id) {
            NodeKind::State { initial, .. } => initial.clone(),
            NodeKind::Root { initial, .. } => initial.clone(),
            _ => None,
        };
        if let Some(local) = attr_initial {
            let scope = if id == self.root { self.root } else { id };
            if let Some(found) = self.find_local_state(scope, &local) {
                return Some(found);
            }
        }
        for &child in self.children(id) {
            if let NodeKind::Initial { target } = self.kind(child) {
                if let Some(found) = self.find_local_state(id, target) {
                    return Some(found);
                }
            }
        }
        self.child_states(id).into_iter().next()
    }

    fn find_local_state(&self, scope: NodeId, local_id: &str) -> Option<NodeId> {
        self.children(scope)
            .iter()
            .copied()
            .find(|c| self.kind(*c).local_id() == Some(local_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(kind: NodeKind) -> Node {
        Node {
            id: 0,
            kind,
            content: String::new(),
            children: vec![],
            parent: None,
        }
    }

    #[test]
    fn atomic_state_has_no_state_children() {
        let mut doc = Document::default();
        doc.nodes.push(leaf(NodeKind::State {
            id: "a".into(),
            initial: None,
        }));
        assert!(doc.is_atomic(0));
    }
}
