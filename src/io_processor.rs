//! Event I/O Processors (§4.5): the `target`/`type` dispatch table that
//! `<send>` goes through, plus the small set of processors this crate
//! ships — `scxml` (session-to-session, including `#_internal` and
//! `#_parent`) always, and a `basic` HTTP processor behind the
//! `BasicHttpEventIOProcessor` feature.
//!
//! The engine this crate grew out of split this the same way — a
//! registry of named processors plus a per-session handle map — except
//! its processor trait never actually declared a `send` method. Fixed
//! here: `IoProcessor::send` is the one method every processor must
//! implement.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::event::Event;

pub const SCXML_EVENT_PROCESSOR: &str = "http://www.w3.org/TR/scxml/#SCXMLEventProcessor";
pub const BASIC_HTTP_EVENT_PROCESSOR: &str = "http://www.w3.org/TR/scxml/#BasicHTTPEventProcessor";

/// What a `<send>` ultimately calls. The interpreter's per-session
/// object is the normal implementor: it knows its own internal queue,
/// its parent's sender (if invoked), and the registry of sibling
/// sessions and external processors.
pub trait IoDispatcher: Send {
    fn send(&mut self, target: &str, type_value: &str, event: Event, delay_ms: u64) -> Result<(), String>;
}

/// A single named event-I/O processor: resolves `type` to a handler
/// capable of delivering to an arbitrary `target` string.
pub trait IoProcessor: Send {
    fn location(&self) -> &str;
    fn types(&self) -> &[&str];
    fn can_handle(&self, type_value: &str) -> bool {
        self.types().iter().any(|t| *t == type_value)
    }
    /// Used only when `<send>` omits `type` (§4.5): can this processor
    /// handle `target` on its own, e.g. by scheme? Processors that are
    /// only ever selected explicitly by `type` can leave this `false`.
    fn can_handle_target(&self, _target: &str) -> bool {
        false
    }
    fn send(&mut self, target: &str, event: Event) -> Result<(), String>;
}

/// Registers every running session's external-queue sender so the
/// `scxml` processor can resolve `#_scxml_<sessionid>` targets.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<HashMap<String, Sender<Event>>>>,
}

impl SessionRegistry {
    pub fn new() -> SessionRegistry {
        SessionRegistry::default()
    }

    pub fn register(&self, session_id: String, sender: Sender<Event>) {
        self.inner.lock().expect("session registry lock").insert(session_id, sender);
    }

    pub fn unregister(&self, session_id: &str) {
        self.inner.lock().expect("session registry lock").remove(session_id);
    }

    pub fn send_to(&self, session_id: &str, event: Event) -> Result<(), String> {
        let guard = self.inner.lock().expect("session registry lock");
        match guard.get(session_id) {
            Some(sender) => sender.send(event).map_err(|e| e.to_string()),
            None => Err(format!("unknown session '{}'", session_id)),
        }
    }
}

/// The `scxml` processor (§4.5): delivers to `#_internal`, `#_parent`,
/// and `#_scxml_<sessionid>` targets, plus a bare sessionid.
pub struct ScxmlIoProcessor {
    pub own_session: String,
    pub own_sender: Sender<Event>,
    pub parent_sender: Option<Sender<Event>>,
    pub sessions: SessionRegistry,
}

impl IoProcessor for ScxmlIoProcessor {
    fn location(&self) -> &str {
        "scxml-processor"
    }

    fn types(&self) -> &[&str] {
        &[SCXML_EVENT_PROCESSOR, "scxml"]
    }

    fn send(&mut self, target: &str, mut event: Event) -> Result<(), String> {
        event.origin = Some(format!("#_scxml_{}", self.own_session));
        if target == "#_internal" || target == "#_self" || target.is_empty() {
            return self.own_sender.send(event).map_err(|e| e.to_string());
        }
        if target == "#_parent" {
            return match &self.parent_sender {
                Some(s) => s.send(event).map_err(|e| e.to_string()),
                None => Err("no parent session".to_string()),
            };
        }
        if let Some(id) = target.strip_prefix("#_scxml_") {
            return self.sessions.send_to(id, event);
        }
        self.sessions.send_to(target, event)
    }
}

/// A `<send>` to an arbitrary HTTP(S) URL, posting the event's data as a
/// JSON body (feature `BasicHttpEventIOProcessor`).
#[cfg(feature = "BasicHttpEventIOProcessor")]
pub struct BasicHttpIoProcessor;

#[cfg(feature = "BasicHttpEventIOProcessor")]
impl IoProcessor for BasicHttpIoProcessor {
    fn location(&self) -> &str {
        "basichttp-processor"
    }

    fn types(&self) -> &[&str] {
        &[BASIC_HTTP_EVENT_PROCESSOR, "basichttp", "http"]
    }

    fn can_handle_target(&self, target: &str) -> bool {
        target.starts_with("http://") || target.starts_with("https://")
    }

    fn send(&mut self, target: &str, event: Event) -> Result<(), String> {
        let url = url::Url::parse(target).map_err(|e| format!("invalid send target '{}': {}", target, e))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(format!("unsupported scheme '{}' for basic HTTP send", url.scheme()));
        }

        #[cfg(feature = "persistence")]
        let body = crate::datamodel::DataValue::Object(event.data.clone()).to_json().to_string();
        #[cfg(not(feature = "persistence"))]
        let body = format!("{{\"name\":\"{}\"}}", event.name);

        ureq::post(url.as_str())
            .set("Content-Type", "application/json")
            .set("X-SCXML-Event", &event.name)
            .send_string(&body)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// Dispatches `<send>` (§4.5): an explicit `type` picks a processor by
/// type (a miss is an error); an absent `type` picks the first
/// processor whose `can_handle_target` matches, falling back to the
/// first registered processor (the `scxml` processor, by registration
/// order) as the default.
pub struct IoRegistry {
    processors: Vec<Box<dyn IoProcessor>>,
}

impl IoRegistry {
    pub fn new() -> IoRegistry {
        IoRegistry { processors: Vec::new() }
    }

    pub fn register(&mut self, processor: Box<dyn IoProcessor>) {
        self.processors.push(processor);
    }

    pub fn dispatch(&mut self, target: &str, type_value: &str, event: Event) -> Result<(), String> {
        if !type_value.is_empty() {
            for p in self.processors.iter_mut() {
                if p.can_handle(type_value) {
                    return p.send(target, event);
                }
            }
            warn!("no io processor for type '{}'", type_value);
            return Err(format!("unsupported send type '{}'", type_value));
        }
        for p in self.processors.iter_mut() {
            if p.can_handle_target(target) {
                return p.send(target, event);
            }
        }
        match self.processors.first_mut() {
            Some(p) => p.send(target, event),
            None => Err("no io processor registered".to_string()),
        }
    }
}

impl Default for IoRegistry {
    fn default() -> Self {
        IoRegistry::new()
    }
}
