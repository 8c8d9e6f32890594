//! Executable content (§3, §4.4): running the `<onentry>`/`<onexit>`/
//! transition content blocks — `<raise>`, `<if>`/`<elseif>`/`<else>`,
//! `<log>`, `<assign>`, `<send>`, and their `<param>` children.
//!
//! `parse_duration_to_milliseconds` below is the one piece of genuine
//! parsing logic in this module (everything else is a direct walk over
//! the node tree) and is unit-tested accordingly.

use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;

use crate::datamodel::{DataValue, Datamodel};
use crate::event::{Event, EventQueue};
use crate::history::{HistoryKind, HistoryLedger};
use crate::io_processor::IoDispatcher;
use crate::node::{ClearKind, Document, NodeId, NodeKind};

/// Everything a content block needs to run, threaded through by the
/// interpreter for each `<onentry>`/`<onexit>`/transition it executes.
pub struct ExecContext<'a> {
    pub doc: &'a Document,
    pub datamodel: &'a mut dyn Datamodel,
    pub internal: &'a mut EventQueue,
    pub io: &'a mut dyn IoDispatcher,
    pub history: Option<&'a mut HistoryLedger>,
    pub session_id: &'a str,
    pub now_ms: u64,
}

impl<'a> ExecContext<'a> {
    fn log_history(&mut self, error: String) {
        if let Some(h) = self.history.as_deref_mut() {
            h.add_error(self.now_ms, Vec::new(), error);
        }
    }
}

/// Runs every child of `block_id` (an `<onentry>`, `<onexit>`, or
/// `<transition>` node) in document order. A single failing executable
/// raises `error.execution` and continues with its siblings, per the
/// processor model's "best effort" handling of content errors.
pub fn run_block(ctx: &mut ExecContext, block_id: NodeId) {
    let children: Vec<NodeId> = ctx.doc.children(block_id).to_vec();
    run_sequence(ctx, &children);
}

fn run_sequence(ctx: &mut ExecContext, ids: &[NodeId]) {
    for &id in ids {
        if let NodeKind::If { .. } = ctx.doc.kind(id) {
            run_if(ctx, id);
            continue;
        }
        if let Err(e) = execute_one(ctx, id) {
            warn!("executable content failed: {}", e);
            ctx.internal.enqueue(Event::error("execution", ""));
            ctx.log_history(e);
        }
    }
}

/// An `<if>`'s children are a flat list with `<elseif>`/`<else>` as
/// delimiter markers rather than branch containers — the branch bodies
/// are the runs of non-marker children between markers. Only the first
/// matching branch's body runs.
fn run_if(ctx: &mut ExecContext, if_id: NodeId) {
    let if_cond = match ctx.doc.kind(if_id) {
        NodeKind::If { cond } => cond.clone(),
        _ => return,
    };
    let children: Vec<NodeId> = ctx.doc.children(if_id).to_vec();

    let mut segments: Vec<(Option<String>, Vec<NodeId>)> = vec![(Some(if_cond), Vec::new())];
    for child in children {
        match ctx.doc.kind(child) {
            NodeKind::ElseIf { cond } => segments.push((Some(cond.clone()), Vec::new())),
            NodeKind::Else => segments.push((None, Vec::new())),
            _ => segments.last_mut().expect("seeded with if branch").1.push(child),
        }
    }

    for (cond, body) in segments {
        let matched = match &cond {
            Some(c) => eval_cond(ctx, c),
            None => true,
        };
        if matched {
            run_sequence(ctx, &body);
            return;
        }
    }
}

fn eval_cond(ctx: &mut ExecContext, cond: &str) -> bool {
    match ctx.datamodel.eval_condition(cond) {
        Ok(b) => b,
        Err(e) => {
            warn!("condition '{}' failed: {}", cond, e);
            ctx.internal.enqueue(Event::error("execution", ""));
            false
        }
    }
}

fn execute_one(ctx: &mut ExecContext, id: NodeId) -> Result<(), String> {
    match ctx.doc.kind(id).clone() {
        NodeKind::Raise { event, event_expr } => {
            let name = resolve_name(ctx, event.as_deref(), event_expr.as_deref())?;
            ctx.internal.enqueue(Event::internal(name));
            Ok(())
        }
        NodeKind::Log { expr, label } => {
            let rendered = match &expr {
                Some(e) => ctx.datamodel.eval_value(e).map(|v| v.as_string())?,
                None => String::new(),
            };
            match label {
                Some(l) => info!("[{}] {}: {}", ctx.session_id, l, rendered),
                None => info!("[{}] {}", ctx.session_id, rendered),
            }
            Ok(())
        }
        NodeKind::Assign { location, expr, clear } => {
            if let Some(kind) = clear {
                match kind {
                    ClearKind::Delete => ctx.datamodel.delete(&location),
                    ClearKind::Null => ctx.datamodel.set(&location, DataValue::Null),
                    ClearKind::Undefined => ctx.datamodel.delete(&location),
                }
                return Ok(());
            }
            let value = match &expr {
                Some(e) => ctx.datamodel.eval_value(e)?,
                None => DataValue::String(ctx.doc.node(id).content.trim().to_string()),
            };
            ctx.datamodel.set(&location, value);
            Ok(())
        }
        NodeKind::Send {
            event,
            event_expr,
            target,
            target_expr,
            type_value,
            type_expr,
            delay,
            delay_expr,
            id: send_id,
            id_location,
            namelist,
        } => execute_send(
            ctx,
            id,
            event,
            event_expr,
            target,
            target_expr,
            type_value,
            type_expr,
            delay,
            delay_expr,
            send_id,
            id_location,
            namelist,
        ),
        NodeKind::ElseIf { .. } | NodeKind::Else | NodeKind::If { .. } => Ok(()),
        other => Err(format!("not executable content: {:?}", other)),
    }
}

fn resolve_name(
    ctx: &mut ExecContext,
    literal: Option<&str>,
    expr: Option<&str>,
) -> Result<String, String> {
    if let Some(e) = expr {
        return Ok(ctx.datamodel.eval_value(e)?.as_string());
    }
    Ok(literal.unwrap_or_default().to_string())
}

#[allow(clippy::too_many_arguments)]
fn execute_send(
    ctx: &mut ExecContext,
    node_id: NodeId,
    event: Option<String>,
    event_expr: Option<String>,
    target: Option<String>,
    target_expr: Option<String>,
    type_value: Option<String>,
    type_expr: Option<String>,
    delay: Option<String>,
    delay_expr: Option<String>,
    send_id: Option<String>,
    id_location: Option<String>,
    namelist: Option<String>,
) -> Result<(), String> {
    let name = resolve_name(ctx, event.as_deref(), event_expr.as_deref())?;
    let target = match target_expr {
        Some(e) => Some(ctx.datamodel.eval_value(&e)?.as_string()),
        None => target,
    };
    let type_value = match type_expr {
        Some(e) => Some(ctx.datamodel.eval_value(&e)?.as_string()),
        None => type_value,
    };
    let delay_str = match delay_expr {
        Some(e) => Some(ctx.datamodel.eval_value(&e)?.as_string()),
        None => delay,
    };
    let delay_ms = match delay_str {
        Some(s) => {
            let ms = parse_duration_to_milliseconds(&s);
            if ms < 0 {
                return Err(format!("invalid delay '{}'", s));
            }
            ms as u64
        }
        None => 0,
    };

    let sendid = send_id.unwrap_or_else(|| format!("{}.{}", ctx.session_id, node_id));
    if let Some(loc) = id_location {
        ctx.datamodel.set(&loc, DataValue::String(sendid.clone()));
    }

    let mut ev = Event::external(name);
    ev.sendid = Some(sendid);
    ev.origin = target.clone();
    ev.origin_type = type_value.clone();

    for param_id in ctx.doc.children(node_id) {
        if let NodeKind::Param { name, expr, location } = ctx.doc.kind(*param_id) {
            let value = if let Some(e) = expr {
                ctx.datamodel.eval_value(e)?
            } else if let Some(loc) = location {
                ctx.datamodel.get(loc).unwrap_or(DataValue::Null)
            } else {
                DataValue::Null
            };
            ev.data.insert(name.clone(), value);
        }
    }
    if let Some(names) = namelist {
        for n in names.split_whitespace() {
            if let Some(v) = ctx.datamodel.get(n) {
                ev.data.insert(n.to_string(), v);
            }
        }
    }

    let target = target.unwrap_or_else(|| "#_internal".to_string());

    // A same-session, undelayed send is exactly a <raise> with extra
    // data: go straight to the internal queue rather than round-trip
    // through a processor that would just hand it back.
    if delay_ms == 0 && (target == "#_internal" || target == "#_self") {
        ev.kind = crate::event::EventKind::Internal;
        ctx.internal.enqueue(ev);
        return Ok(());
    }

    // Leave `type` unset (rather than defaulting to "scxml") when the
    // document didn't give one, so the registry can route by target
    // scheme (§4.5) instead of always landing on the scxml processor.
    let type_value = type_value.unwrap_or_default();
    ctx.io
        .send(&target, &type_value, ev, delay_ms)
        .map_err(|e| e.to_string())?;
    Ok(())
}

lazy_static! {
    static ref DURATION_RE: Regex =
        Regex::new(r"^(\d*(?:\.\d+)?)(ms|s|m|h|d)$").expect("static regex");
}

/// Parses a CSS-style duration (`"500ms"`, `"2s"`, `"1.5m"`) into
/// milliseconds. Returns `-1` on anything that doesn't match.
pub fn parse_duration_to_milliseconds(value: &str) -> i64 {
    let trimmed = value.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return 0;
    }
    let caps = match DURATION_RE.captures(&trimmed) {
        Some(c) => c,
        None => return -1,
    };
    let amount: f64 = match caps[1].parse() {
        Ok(n) => n,
        Err(_) => return -1,
    };
    let multiplier = match &caps[2] {
        "ms" => 1.0,
        "s" => 1000.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        "d" => 86_400_000.0,
        _ => return -1,
    };
    (amount * multiplier).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_units() {
        assert_eq!(parse_duration_to_milliseconds("500ms"), 500);
        assert_eq!(parse_duration_to_milliseconds("2s"), 2000);
        assert_eq!(parse_duration_to_milliseconds("1.5m"), 90_000);
        assert_eq!(parse_duration_to_milliseconds("1h"), 3_600_000);
    }

    #[test]
    fn duration_rejects_garbage() {
        assert_eq!(parse_duration_to_milliseconds("soon"), -1);
        assert_eq!(parse_duration_to_milliseconds("5x"), -1);
    }

    #[test]
    fn duration_empty_is_zero() {
        assert_eq!(parse_duration_to_milliseconds(""), 0);
    }

    #[test]
    fn history_kind_roundtrip_marker() {
        // sanity: HistoryKind is Copy/PartialEq as executable.rs assumes
        assert_eq!(HistoryKind::Error, HistoryKind::Error);
    }
}
