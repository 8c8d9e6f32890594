//! The History Ledger (§4.6): an append-only ring buffer of typed
//! events with optional causality linking between a macro/microstep
//! context and the entries it produced.
//!
//! This component has no counterpart in the engine this crate was
//! imitating — that engine logs via a method-entry/exit `Tracer`
//! instead — but the shape (an append-only record of what the
//! interpreter did, queryable after the fact) is grounded in the same
//! idea: a structured, inspectable trace of interpreter activity,
//! reworked here into the ledger this design calls for instead of a
//! call-stack trace.

#[cfg(feature = "persistence")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "persistence", derive(Serialize, Deserialize))]
pub enum HistoryKind {
    InitialState,
    StateEntry,
    StateExit,
    Transition,
    EventProcessed,
    EventSkipped,
    MicrostepStart,
    MicrostepEnd,
    MacrostepStart,
    MacrostepEnd,
    Error,
}

#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "persistence", derive(Serialize, Deserialize))]
pub struct HistoryEntry {
    pub id: u64,
    /// Milliseconds since the session's own clock epoch (process-relative,
    /// not wall-clock, so a replayed/persisted session is reproducible).
    pub timestamp: u64,
    pub kind: Option<HistoryKind>,
    pub state_configuration: Vec<String>,
    pub state_path: Option<String>,
    pub event_name: Option<String>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub metadata: Vec<(String, String)>,
    pub parent_id: Option<u64>,
    pub child_ids: Vec<u64>,
}

impl Default for HistoryKind {
    fn default() -> Self {
        HistoryKind::Error
    }
}

pub struct HistoryQuery<'a> {
    pub kind: Option<HistoryKind>,
    pub from_ts: Option<u64>,
    pub to_ts: Option<u64>,
    pub state_path: Option<&'a str>,
    pub event_name_pattern: Option<&'a regex::Regex>,
    pub descending: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl<'a> Default for HistoryQuery<'a> {
    fn default() -> Self {
        HistoryQuery {
            kind: None,
            from_ts: None,
            to_ts: None,
            state_path: None,
            event_name_pattern: None,
            descending: false,
            offset: 0,
            limit: None,
        }
    }
}

/// Append-only ledger with FIFO pruning and causality contexts.
pub struct HistoryLedger {
    entries: Vec<HistoryEntry>,
    max_entries: usize,
    next_id: u64,
    context_stack: Vec<u64>,
    pub pruned_count: u64,
}

impl HistoryLedger {
    pub fn new(max_entries: usize) -> HistoryLedger {
        HistoryLedger {
            entries: Vec::new(),
            max_entries,
            next_id: 1,
            context_stack: Vec::new(),
            pruned_count: 0,
        }
    }

    /// Opens a causality context; entries added until the matching
    /// `end_context` record this context's id as their `parentId` and are
    /// appended to its `childIds`. Returns the new context's entry id.
    pub fn start_context(
        &mut self,
        kind: HistoryKind,
        timestamp: u64,
        configuration: Vec<String>,
    ) -> u64 {
        let id = self.add_entry(kind, timestamp, configuration, None, None, None);
        self.context_stack.push(id);
        id
    }

    pub fn end_context(
        &mut self,
        kind: HistoryKind,
        timestamp: u64,
        configuration: Vec<String>,
        duration_ms: Option<u64>,
    ) {
        self.add_entry(kind, timestamp, configuration, None, None, duration_ms);
        self.context_stack.pop();
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_entry(
        &mut self,
        kind: HistoryKind,
        timestamp: u64,
        configuration: Vec<String>,
        state_path: Option<String>,
        event_name: Option<String>,
        duration_ms: Option<u64>,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let parent_id = self.context_stack.last().copied();
        let entry = HistoryEntry {
            id,
            timestamp,
            kind: Some(kind),
            state_configuration: configuration,
            state_path,
            event_name,
            duration_ms,
            error: None,
            metadata: Vec::new(),
            parent_id,
            child_ids: Vec::new(),
        };
        if let Some(parent_id) = parent_id {
            if let Some(parent) = self.entries.iter_mut().find(|e| e.id == parent_id) {
                parent.child_ids.push(id);
            }
        }
        self.entries.push(entry);
        self.prune();
        id
    }

    pub fn add_error(&mut self, timestamp: u64, configuration: Vec<String>, error: String) -> u64 {
        let id = self.add_entry(HistoryKind::Error, timestamp, configuration, None, None, None);
        if let Some(e) = self.entries.last_mut() {
            e.error = Some(error);
        }
        id
    }

    fn prune(&mut self) {
        if self.max_entries == 0 {
            return;
        }
        while self.entries.len() > self.max_entries {
            self.entries.remove(0);
            self.pruned_count += 1;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.context_stack.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn import(&mut self, entries: Vec<HistoryEntry>, next_id: u64) {
        self.entries = entries;
        self.next_id = next_id;
        self.prune();
    }

    pub fn query(&self, q: &HistoryQuery) -> Vec<&HistoryEntry> {
        let mut out: Vec<&HistoryEntry> = self
            .entries
            .iter()
            .filter(|e| q.kind.is_none_or(|k| e.kind == Some(k)))
            .filter(|e| q.from_ts.is_none_or(|t| e.timestamp >= t))
            .filter(|e| q.to_ts.is_none_or(|t| e.timestamp <= t))
            .filter(|e| {
                q.state_path
                    .is_none_or(|p| e.state_path.as_deref() == Some(p) || e.state_configuration.iter().any(|s| s == p))
            })
            .filter(|e| {
                q.event_name_pattern.is_none_or(|re| {
                    e.event_name
                        .as_deref()
                        .map(|n| re.is_match(n))
                        .unwrap_or(false)
                })
            })
            .collect();

        if q.descending {
            out.reverse();
        }
        let start = q.offset.min(out.len());
        out = out.split_off(start);
        if let Some(limit) = q.limit {
            out.truncate(limit);
        }
        out
    }
}

trait OptionExt<T> {
    fn is_none_or(self, f: impl FnOnce(T) -> bool) -> bool;
}

impl<T: Copy> OptionExt<T> for Option<T> {
    fn is_none_or(self, f: impl FnOnce(T) -> bool) -> bool {
        match self {
            None => true,
            Some(v) => f(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_pruning() {
        let mut ledger = HistoryLedger::new(2);
        ledger.add_entry(HistoryKind::StateEntry, 0, vec![], None, None, None);
        ledger.add_entry(HistoryKind::StateEntry, 1, vec![], None, None, None);
        ledger.add_entry(HistoryKind::StateEntry, 2, vec![], None, None, None);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.pruned_count, 1);
        assert_eq!(ledger.all()[0].timestamp, 1);
    }

    #[test]
    fn causality_linking() {
        let mut ledger = HistoryLedger::new(0);
        let ctx = ledger.start_context(HistoryKind::MacrostepStart, 0, vec![]);
        let child = ledger.add_entry(HistoryKind::StateEntry, 1, vec![], None, None, None);
        ledger.end_context(HistoryKind::MacrostepEnd, 2, vec![], Some(2));
        let parent_entry = ledger.all().iter().find(|e| e.id == ctx).unwrap();
        assert!(parent_entry.child_ids.contains(&child));
    }
}
