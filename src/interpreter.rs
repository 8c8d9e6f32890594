//! The interpreter (§4): the macrostep/microstep loop, one instance per
//! running session. [`Interpreter`] is the single-threaded engine;
//! [`Session`] wraps one in its own OS thread with a channel standing in
//! for its external queue, which is how this crate gets the per-session
//! concurrency model in §5 without an async runtime.

use std::collections::HashSet;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

use crate::datamodel::{DataValue, Datamodel};
use crate::event::{Event, EventQueue};
use crate::executable::{run_block, ExecContext};
use crate::history::{HistoryKind, HistoryLedger};
use crate::io_processor::{IoDispatcher, IoRegistry, ScxmlIoProcessor, SessionRegistry};
use crate::node::{Document, NodeId, NodeKind, TransitionType};

pub type Configuration = HashSet<NodeId>;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The single-threaded SCXML engine: one document, one data model, one
/// configuration. Driving it (`start`, `feed_external`) runs exactly one
/// macrostep to completion and returns.
pub struct Interpreter {
    pub doc: Document,
    pub datamodel: Box<dyn Datamodel>,
    pub configuration: Configuration,
    internal: EventQueue,
    pub history: HistoryLedger,
    io: Box<dyn IoDispatcher>,
    pub session_id: String,
    pub running: bool,
    pub history_enabled: bool,
}

impl Interpreter {
    pub fn new(
        doc: Document,
        datamodel: Box<dyn Datamodel>,
        io: Box<dyn IoDispatcher>,
        session_id: String,
        history_capacity: usize,
    ) -> Interpreter {
        Interpreter {
            doc,
            datamodel,
            configuration: Configuration::new(),
            internal: EventQueue::new(),
            history: HistoryLedger::new(history_capacity),
            io,
            session_id,
            running: true,
            history_enabled: true,
        }
    }

    /// Events still queued internally at a suspension point (§5), for
    /// persistence — the external queue lives on the channel owned by
    /// [`Session`] and isn't this interpreter's to snapshot.
    pub fn pending_internal_events(&self) -> Vec<Event> {
        self.internal.iter().cloned().collect()
    }

    pub fn restore_pending_internal_events(&mut self, events: Vec<Event>) {
        for e in events {
            self.internal.enqueue(e);
        }
    }

    pub fn configuration_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .configuration
            .iter()
            .map(|&id| self.doc.path(id).to_string())
            .collect();
        paths.sort();
        paths
    }

    /// §4.1: enters the document's initial configuration and runs the
    /// resulting macrostep to completion.
    pub fn start(&mut self) {
        let root = self.doc.root;
        let mut to_enter = HashSet::new();
        let mut default_entry = HashSet::new();
        self.add_descendant_states(root, &mut to_enter, &mut default_entry);
        to_enter.remove(&root);
        let mut ordered: Vec<NodeId> = to_enter.into_iter().collect();
        ordered.sort_unstable();
        self.enter_states(&ordered);
        self.record(HistoryKind::InitialState);
        self.run_macrostep();
    }

    pub fn feed_external(&mut self, event: Event) {
        if !self.running {
            return;
        }
        if event.is_abort() {
            self.running = false;
            return;
        }
        self.datamodel.set_event(&event);
        let enabled = self.select_transitions(Some(&event));
        if !enabled.is_empty() {
            self.microstep(&enabled);
        }
        self.run_macrostep();
    }

    fn record(&mut self, kind: HistoryKind) {
        if !self.history_enabled {
            return;
        }
        let config = self.configuration_paths();
        self.history.add_entry(kind, now_ms(), config, None, None, None);
    }

    fn run_macrostep(&mut self) {
        if !self.running {
            return;
        }
        let started_at = now_ms();
        if self.history_enabled {
            let config = self.configuration_paths();
            self.history.start_context(HistoryKind::MacrostepStart, started_at, config);
        }
        loop {
            let enabled = self.select_transitions(None);
            if !enabled.is_empty() {
                self.microstep(&enabled);
                if !self.running {
                    break;
                }
                continue;
            }
            if self.internal.is_empty() {
                break;
            }
            let event = self.internal.dequeue().unwrap();
            if event.is_error() {
                self.datamodel.set("data.error", DataValue::String(event.name.clone()));
            }
            self.datamodel.set_event(&event);
            let enabled = self.select_transitions(Some(&event));
            if enabled.is_empty() {
                self.record(HistoryKind::EventSkipped);
                continue;
            }
            self.record(HistoryKind::EventProcessed);
            self.microstep(&enabled);
            if !self.running {
                break;
            }
        }
        if self.history_enabled {
            let config = self.configuration_paths();
            let duration = now_ms().saturating_sub(started_at);
            self.history.end_context(HistoryKind::MacrostepEnd, now_ms(), config, Some(duration));
        }
    }

    /// `event = None` selects eventless transitions (§4.3).
    fn select_transitions(&mut self, event: Option<&Event>) -> Vec<NodeId> {
        let mut atomic_states: Vec<NodeId> = self
            .configuration
            .iter()
            .copied()
            .filter(|&s| self.doc.is_atomic(s))
            .collect();
        atomic_states.sort_unstable();

        let mut enabled: Vec<NodeId> = Vec::new();
        for state in atomic_states {
            if let Some(t) = self.first_matching_transition(state, event) {
                enabled.push(t);
            }
        }
        self.remove_conflicting_transitions(enabled)
    }

    fn first_matching_transition(&mut self, state: NodeId, event: Option<&Event>) -> Option<NodeId> {
        let mut cur = Some(state);
        while let Some(s) = cur {
            for &t in &self.doc.transitions_of(s) {
                if let NodeKind::Transition { event: descriptor, cond, .. } = self.doc.kind(t) {
                    let event_ok = match event {
                        None => descriptor.is_empty(),
                        Some(e) => !descriptor.is_empty() && Event::matches(descriptor, &e.name),
                    };
                    if !event_ok {
                        continue;
                    }
                    let cond_ok = match cond {
                        None => true,
                        Some(c) => self.datamodel.eval_condition(c).unwrap_or_else(|e| {
                            warn!("guard '{}' failed: {}", c, e);
                            self.internal.enqueue(Event::internal(&format!(
                                "error.execution.{}",
                                e.replace(' ', "_")
                            )));
                            false
                        }),
                    };
                    if cond_ok {
                        return Some(t);
                    }
                }
            }
            if s == self.doc.root {
                break;
            }
            cur = self.doc.parent(s);
        }
        None
    }

    /// §4.3: earliest-in-document-order transition wins when exit sets
    /// overlap; transitions whose exit sets are disjoint never conflict
    /// (this is what lets independent parallel regions both fire).
    fn remove_conflicting_transitions(&self, enabled: Vec<NodeId>) -> Vec<NodeId> {
        let mut filtered: Vec<NodeId> = Vec::new();
        for &t1 in &enabled {
            let exit1 = self.compute_exit_set(&[t1]);
            let mut preempted = false;
            let mut to_remove = Vec::new();
            for &t2 in &filtered {
                let exit2 = self.compute_exit_set(&[t2]);
                if exit1.intersection(&exit2).next().is_some() {
                    let source1 = self.doc.parent(t1).unwrap_or(t1);
                    let source2 = self.doc.parent(t2).unwrap_or(t2);
                    if self.doc.is_descendant_or_self(source1, source2) && source1 != source2 {
                        to_remove.push(t2);
                    } else {
                        preempted = true;
                        break;
                    }
                }
            }
            if !preempted {
                filtered.retain(|t| !to_remove.contains(t));
                filtered.push(t1);
            }
        }
        filtered
    }

    fn microstep(&mut self, transitions: &[NodeId]) {
        let started_at = now_ms();
        if self.history_enabled {
            let config = self.configuration_paths();
            self.history.add_entry(HistoryKind::MicrostepStart, started_at, config, None, None, None);
            for &t in transitions {
                if let NodeKind::Transition { event, .. } = self.doc.kind(t) {
                    let source_path = self.doc.parent(t).map(|s| self.doc.path(s).to_string());
                    let event_name = if event.is_empty() { None } else { Some(event.clone()) };
                    self.history
                        .add_entry(HistoryKind::Transition, started_at, Vec::new(), source_path, event_name, None);
                }
            }
        }

        let exit_set = self.compute_exit_set(transitions);
        let mut exit_order: Vec<NodeId> = exit_set.into_iter().collect();
        exit_order.sort_unstable_by(|a, b| b.cmp(a));
        self.exit_states(&exit_order);

        for &t in transitions {
            if let NodeKind::Transition { .. } = self.doc.kind(t).clone() {
                self.run_content(t);
            }
        }

        let entry = self.compute_entry_set(transitions);
        self.enter_states(&entry);

        if self.history_enabled {
            let config = self.configuration_paths();
            let duration = now_ms().saturating_sub(started_at);
            self.history
                .add_entry(HistoryKind::MicrostepEnd, now_ms(), config, None, None, Some(duration));
        }
    }

    fn target_states(&self, t: NodeId) -> Option<Vec<NodeId>> {
        if let NodeKind::Transition { target, .. } = self.doc.kind(t) {
            let resolved: Vec<NodeId> = target.iter().filter_map(|id| self.doc.node_for_id(id)).collect();
            if resolved.is_empty() {
                None
            } else {
                Some(resolved)
            }
        } else {
            None
        }
    }

    fn transition_domain(&self, t: NodeId) -> Option<NodeId> {
        let targets = self.target_states(t)?;
        let source = self.doc.parent(t)?;
        if let NodeKind::Transition { transition_type: TransitionType::Internal, .. } = self.doc.kind(t) {
            if !self.doc.is_atomic(source)
                && targets.iter().all(|&tgt| self.doc.is_descendant_or_self(tgt, source))
            {
                return Some(source);
            }
        }
        let mut all = vec![source];
        all.extend(targets);
        Some(self.find_lcca(&all))
    }

    fn find_lcca(&self, states: &[NodeId]) -> NodeId {
        let mut chain = self.doc.ancestors(states[0]);
        chain.push(self.doc.root);
        for anc in chain {
            if states[1..].iter().all(|&s| self.doc.is_descendant_or_self(s, anc)) {
                return anc;
            }
        }
        self.doc.root
    }

    fn compute_exit_set(&self, transitions: &[NodeId]) -> HashSet<NodeId> {
        let mut out = HashSet::new();
        for &t in transitions {
            let domain = match self.transition_domain(t) {
                Some(d) => d,
                None => continue,
            };
            for &s in &self.configuration {
                if self.doc.is_descendant_or_self(s, domain) && s != domain {
                    out.insert(s);
                }
            }
        }
        out
    }

    fn exit_states(&mut self, ordered: &[NodeId]) {
        for &s in ordered {
            if !self.configuration.remove(&s) {
                continue;
            }
            for onexit in self.doc.onexit_children(s) {
                self.run_content(onexit);
            }
            self.record(HistoryKind::StateExit);
        }
    }

    /// §4.1 `computeEntrySet`: each transition contributes its own
    /// targets (expanded through default-initial descendants) plus the
    /// ancestors between those targets and the transition's own domain.
    fn compute_entry_set(&self, transitions: &[NodeId]) -> Vec<NodeId> {
        let mut to_enter: HashSet<NodeId> = HashSet::new();
        let mut default_entry: HashSet<NodeId> = HashSet::new();

        for &t in transitions {
            let targets = match self.target_states(t) {
                Some(t) => t,
                None => continue,
            };
            let domain = self.transition_domain(t).unwrap_or(self.doc.root);
            for &target in &targets {
                self.add_descendant_states(target, &mut to_enter, &mut default_entry);
                self.add_ancestor_states(target, domain, &mut to_enter, &mut default_entry);
            }
        }

        let mut ordered: Vec<NodeId> = to_enter.into_iter().collect();
        ordered.sort_unstable();
        ordered
    }

    fn add_descendant_states(
        &self,
        state: NodeId,
        to_enter: &mut HashSet<NodeId>,
        default_entry: &mut HashSet<NodeId>,
    ) {
        to_enter.insert(state);
        if self.doc.is_parallel(state) {
            for child in self.doc.child_states(state) {
                self.add_descendant_states(child, to_enter, default_entry);
            }
        } else if !self.doc.is_atomic(state) {
            default_entry.insert(state);
            if let Some(initial) = self.doc.initial_child(state) {
                self.add_descendant_states(initial, to_enter, default_entry);
            }
        }
    }

    fn add_ancestor_states(
        &self,
        state: NodeId,
        ancestor: NodeId,
        to_enter: &mut HashSet<NodeId>,
        default_entry: &mut HashSet<NodeId>,
    ) {
        let mut chain = self.doc.ancestors(state);
        chain.retain(|&a| a != ancestor && self.doc.is_descendant_or_self(a, ancestor));
        chain.push(ancestor);
        for anc in chain {
            if anc == self.doc.root {
                continue;
            }
            to_enter.insert(anc);
            if self.doc.is_parallel(anc) {
                for child in self.doc.child_states(anc) {
                    if !to_enter.iter().any(|&e| self.doc.is_descendant_or_self(e, child)) {
                        self.add_descendant_states(child, to_enter, default_entry);
                    }
                }
            }
        }
    }

    fn enter_states(&mut self, ordered: &[NodeId]) {
        for &s in ordered {
            if s == self.doc.root || !self.configuration.insert(s) {
                continue;
            }
            for onentry in self.doc.onentry_children(s) {
                self.run_content(onentry);
            }
            self.record(HistoryKind::StateEntry);

            if self.doc.is_final(s) {
                self.handle_final_entry(s);
            }
        }
        self.active_paths_into_datamodel();
    }

    fn handle_final_entry(&mut self, s: NodeId) {
        let parent = match self.doc.parent(s) {
            Some(p) => p,
            None => return,
        };
        if parent == self.doc.root {
            info!("[{}] reached top-level final state, session done", self.session_id);
            self.running = false;
            return;
        }
        let done_name = format!("done.state.{}", self.doc.path(parent));
        self.internal.enqueue(Event::internal(done_name));

        if let Some(grandparent) = self.doc.parent(parent) {
            if self.doc.is_parallel(grandparent) {
                let all_done = self.doc.child_states(grandparent).iter().all(|&region| {
                    self.doc
                        .state_descendants(region)
                        .iter()
                        .chain(std::iter::once(&region))
                        .filter(|&&d| self.doc.is_final(d))
                        .any(|&d| self.configuration.contains(&d))
                });
                if all_done {
                    let name = format!("done.state.{}", self.doc.path(grandparent));
                    self.internal.enqueue(Event::internal(name));
                }
            }
        }
    }

    fn active_paths_into_datamodel(&mut self) {
        let paths = self.configuration_paths();
        self.datamodel.set_active_paths(paths);
    }

    fn run_content(&mut self, block_id: NodeId) {
        let mut ctx = ExecContext {
            doc: &self.doc,
            datamodel: self.datamodel.as_mut(),
            internal: &mut self.internal,
            io: self.io.as_mut(),
            history: if self.history_enabled { Some(&mut self.history) } else { None },
            session_id: &self.session_id,
            now_ms: now_ms(),
        };
        run_block(&mut ctx, block_id);
    }
}

/// A running session: an [`Interpreter`] driven from its own OS thread,
/// fed through a channel that serves as its external event queue.
pub struct Session {
    pub sender: Sender<Event>,
    join: Option<thread::JoinHandle<Interpreter>>,
}

impl Session {
    pub fn spawn(
        mut interpreter: Interpreter,
        registry: SessionRegistry,
        parent_sender: Option<Sender<Event>>,
    ) -> Session {
        let (tx, rx): (Sender<Event>, Receiver<Event>) = mpsc::channel();
        registry.register(interpreter.session_id.clone(), tx.clone());

        let mut io_registry = IoRegistry::new();
        io_registry.register(Box::new(ScxmlIoProcessor {
            own_session: interpreter.session_id.clone(),
            own_sender: tx.clone(),
            parent_sender,
            sessions: registry.clone(),
        }));
        #[cfg(feature = "BasicHttpEventIOProcessor")]
        io_registry.register(Box::new(crate::io_processor::BasicHttpIoProcessor));
        interpreter.io = Box::new(RegistryDispatcher {
            registry: io_registry,
            timer: timer::Timer::new(),
            guards: Vec::new(),
            self_sender: tx.clone(),
        });

        let session_id = interpreter.session_id.clone();
        let registry_for_cleanup = registry;
        let join = thread::Builder::new()
            .name(format!("scxml-session-{}", session_id))
            .spawn(move || {
                interpreter.start();
                while interpreter.running {
                    match rx.recv() {
                        Ok(event) => interpreter.feed_external(event),
                        Err(_) => break,
                    }
                }
                registry_for_cleanup.unregister(&interpreter.session_id);
                debug!("session '{}' terminated", interpreter.session_id);
                interpreter
            })
            .expect("spawn session thread");

        Session { sender: tx, join: Some(join) }
    }

    pub fn send(&self, event: Event) -> Result<(), String> {
        self.sender.send(event).map_err(|e| e.to_string())
    }

    /// Blocks until the session's thread exits (it reached a top-level
    /// final state, an `abort` event, or its channel closed), returning
    /// the interpreter's final state for inspection or persistence.
    pub fn join(mut self) -> Option<Interpreter> {
        self.join.take().and_then(|h| h.join().ok())
    }
}

/// Dispatches immediately for `delay_ms == 0`. A delayed send back to
/// this same session (`#_internal`/`#_self`, the common "set a timeout"
/// idiom) is scheduled against a real [`timer::Timer`], mirroring how
/// the engine this was adapted from scheduled delayed sends against its
/// own event loop rather than blocking the executing thread. Delayed
/// sends to any other target are delivered immediately with a warning —
/// cross-session delayed delivery would need the registry behind a
/// lock shared with the timer thread, which this single-owner registry
/// doesn't provide.
struct RegistryDispatcher {
    registry: IoRegistry,
    timer: timer::Timer,
    guards: Vec<timer::Guard>,
    self_sender: Sender<Event>,
}

impl IoDispatcher for RegistryDispatcher {
    fn send(&mut self, target: &str, type_value: &str, event: Event, delay_ms: u64) -> Result<(), String> {
        if delay_ms == 0 {
            return self.registry.dispatch(target, type_value, event);
        }
        if target == "#_internal" || target == "#_self" {
            let sender = self.self_sender.clone();
            let mut pending = Some(event);
            let guard = self
                .timer
                .schedule_with_delay(chrono::Duration::milliseconds(delay_ms as i64), move || {
                    if let Some(e) = pending.take() {
                        let _ = sender.send(e);
                    }
                });
            self.guards.push(guard);
            return Ok(());
        }
        warn!(
            "delayed send ({}ms) to '{}' delivered immediately: cross-session delayed delivery isn't wired up",
            delay_ms, target
        );
        self.registry.dispatch(target, type_value, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::{DataValue, NullDatamodel};
    use crate::reader;

    struct NoopIo;
    impl IoDispatcher for NoopIo {
        fn send(&mut self, _t: &str, _ty: &str, _e: Event, _d: u64) -> Result<(), String> {
            Ok(())
        }
    }

    fn interp(xml: &str) -> Interpreter {
        let doc = reader::parse_str(xml).expect("parse");
        Interpreter::new(doc, Box::new(NullDatamodel::new()), Box::new(NoopIo), "t".into(), 100)
    }

    #[test]
    fn enters_initial_atomic_state() {
        let mut it = interp(
            r#"<scxml initial="a" version="1.0"><state id="a"/><state id="b"/></scxml>"#,
        );
        it.start();
        assert_eq!(it.configuration_paths(), vec!["a".to_string()]);
    }

    #[test]
    fn transition_moves_to_target() {
        let mut it = interp(
            r#"<scxml initial="a" version="1.0">
                 <state id="a"><transition event="go" target="b"/></state>
                 <state id="b"/>
               </scxml>"#,
        );
        it.start();
        it.feed_external(Event::external("go"));
        assert_eq!(it.configuration_paths(), vec!["b".to_string()]);
    }

    #[test]
    fn reaching_top_level_final_stops_the_session() {
        let mut it = interp(
            r#"<scxml initial="a" version="1.0">
                 <state id="a"><transition event="done" target="f"/></state>
                 <final id="f"/>
               </scxml>"#,
        );
        it.start();
        it.feed_external(Event::external("done"));
        assert!(!it.running);
    }

    #[test]
    fn eventless_transition_fires_without_input() {
        let mut it = interp(
            r#"<scxml initial="a" version="1.0">
                 <state id="a"><transition target="b"/></state>
                 <state id="b"/>
               </scxml>"#,
        );
        it.start();
        assert_eq!(it.configuration_paths(), vec!["b".to_string()]);
    }

    #[test]
    fn assign_runs_on_entry() {
        let mut it = interp(
            r#"<scxml initial="a" version="1.0" datamodel="ecmascript">
                 <state id="a"><onentry><assign location="data.x" expr="1"/></onentry></state>
               </scxml>"#,
        );
        it.datamodel = Box::new(crate::datamodel::DefaultDatamodel::new());
        it.start();
        assert_eq!(it.datamodel.get("data.x"), Some(DataValue::Number(1.0)));
    }
}
