//! Persistence (§6): a JSON-compatible snapshot of a session, restorable
//! into a fresh [`crate::interpreter::Interpreter`] against the same
//! document. Requires feature `persistence`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::datamodel::DataValue;
use crate::event::Event;
use crate::history::{HistoryEntry, HistoryKind};
use crate::interpreter::Interpreter;

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedSession {
    pub session_id: String,
    pub document_version: String,
    pub configuration: Vec<String>,
    pub datamodel_name: String,
    pub data: HashMap<String, DataValue>,
    pub internal_events: Vec<Event>,
    pub history: Vec<PersistedHistoryEntry>,
    pub history_next_id: u64,
    pub running: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedHistoryEntry {
    pub id: u64,
    pub timestamp: u64,
    pub kind: Option<String>,
    pub state_configuration: Vec<String>,
    pub state_path: Option<String>,
    pub event_name: Option<String>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub parent_id: Option<u64>,
    pub child_ids: Vec<u64>,
}

fn kind_to_str(kind: HistoryKind) -> &'static str {
    match kind {
        HistoryKind::InitialState => "initial_state",
        HistoryKind::StateEntry => "state_entry",
        HistoryKind::StateExit => "state_exit",
        HistoryKind::Transition => "transition",
        HistoryKind::EventProcessed => "event_processed",
        HistoryKind::EventSkipped => "event_skipped",
        HistoryKind::MicrostepStart => "microstep_start",
        HistoryKind::MicrostepEnd => "microstep_end",
        HistoryKind::MacrostepStart => "macrostep_start",
        HistoryKind::MacrostepEnd => "macrostep_end",
        HistoryKind::Error => "error",
    }
}

fn str_to_kind(value: &str) -> HistoryKind {
    match value {
        "initial_state" => HistoryKind::InitialState,
        "state_entry" => HistoryKind::StateEntry,
        "state_exit" => HistoryKind::StateExit,
        "transition" => HistoryKind::Transition,
        "event_processed" => HistoryKind::EventProcessed,
        "event_skipped" => HistoryKind::EventSkipped,
        "microstep_start" => HistoryKind::MicrostepStart,
        "microstep_end" => HistoryKind::MicrostepEnd,
        "macrostep_start" => HistoryKind::MacrostepStart,
        "macrostep_end" => HistoryKind::MacrostepEnd,
        _ => HistoryKind::Error,
    }
}

impl From<&HistoryEntry> for PersistedHistoryEntry {
    fn from(e: &HistoryEntry) -> Self {
        PersistedHistoryEntry {
            id: e.id,
            timestamp: e.timestamp,
            kind: e.kind.map(kind_to_str).map(str::to_string),
            state_configuration: e.state_configuration.clone(),
            state_path: e.state_path.clone(),
            event_name: e.event_name.clone(),
            duration_ms: e.duration_ms,
            error: e.error.clone(),
            parent_id: e.parent_id,
            child_ids: e.child_ids.clone(),
        }
    }
}

impl From<&PersistedHistoryEntry> for HistoryEntry {
    fn from(e: &PersistedHistoryEntry) -> Self {
        HistoryEntry {
            id: e.id,
            timestamp: e.timestamp,
            kind: e.kind.as_deref().map(str_to_kind),
            state_configuration: e.state_configuration.clone(),
            state_path: e.state_path.clone(),
            event_name: e.event_name.clone(),
            duration_ms: e.duration_ms,
            error: e.error.clone(),
            metadata: Vec::new(),
            parent_id: e.parent_id,
            child_ids: e.child_ids.clone(),
        }
    }
}

pub fn snapshot(interpreter: &Interpreter) -> PersistedSession {
    let mut data = HashMap::new();
    for (k, v) in interpreter.datamodel.snapshot() {
        data.insert(k, v);
    }
    PersistedSession {
        session_id: interpreter.session_id.clone(),
        document_version: interpreter.doc.version.clone(),
        configuration: interpreter.configuration_paths(),
        datamodel_name: interpreter.datamodel.name().to_string(),
        data,
        internal_events: interpreter.pending_internal_events(),
        history: interpreter.history.all().iter().map(PersistedHistoryEntry::from).collect(),
        history_next_id: interpreter.history.len() as u64 + interpreter.history.pruned_count + 1,
        running: interpreter.running,
    }
}

/// Restores data and configuration into `interpreter`, which must
/// already have been built against the same document this snapshot was
/// taken from (the document itself is not part of the snapshot).
pub fn restore(interpreter: &mut Interpreter, snapshot: PersistedSession) -> Result<(), String> {
    interpreter.session_id = snapshot.session_id;
    interpreter.running = snapshot.running;
    interpreter.datamodel.restore(snapshot.data);
    interpreter.restore_pending_internal_events(snapshot.internal_events);

    interpreter.configuration.clear();
    for path in &snapshot.configuration {
        match interpreter.doc.node_for_path(path) {
            Some(id) => {
                interpreter.configuration.insert(id);
            }
            None => return Err(format!("persisted state '{}' not found in document", path)),
        }
    }

    let entries: Vec<HistoryEntry> = snapshot.history.iter().map(HistoryEntry::from).collect();
    interpreter.history.import(entries, snapshot.history_next_id);
    Ok(())
}

pub fn to_json_string(session: &PersistedSession) -> Result<String, String> {
    serde_json::to_string_pretty(session).map_err(|e| e.to_string())
}

pub fn from_json_string(text: &str) -> Result<PersistedSession, String> {
    serde_json::from_str(text).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::NullDatamodel;
    use crate::interpreter::Interpreter;
    use crate::io_processor::IoDispatcher;
    use crate::reader;

    struct NoopIo;
    impl IoDispatcher for NoopIo {
        fn send(&mut self, _t: &str, _ty: &str, _e: crate::event::Event, _d: u64) -> Result<(), String> {
            Ok(())
        }
    }

    #[test]
    fn snapshot_round_trip_preserves_configuration() {
        let xml = r#"<scxml initial="a" version="1.0"><state id="a"/></scxml>"#;
        let doc = reader::parse_str(xml).expect("parse");
        let mut it = Interpreter::new(doc, Box::new(NullDatamodel::new()), Box::new(NoopIo), "s1".into(), 10);
        it.start();

        let snap = snapshot(&it);
        let json = to_json_string(&snap).expect("serialize");
        let restored_snap = from_json_string(&json).expect("deserialize");

        let doc2 = reader::parse_str(xml).expect("parse");
        let mut it2 = Interpreter::new(doc2, Box::new(NullDatamodel::new()), Box::new(NoopIo), "ignored".into(), 10);
        restore(&mut it2, restored_snap).expect("restore");
        assert_eq!(it2.session_id, "s1");
        assert_eq!(it2.configuration_paths(), vec!["a".to_string()]);
    }
}
