//! End-to-end scenarios driving the interpreter over real documents,
//! the way a user of this crate would: parse, build a data model,
//! start, feed events, inspect the configuration.

use scxml_engine::datamodel::{DataValue, Datamodel, NullDatamodel};
use scxml_engine::event::Event;
use scxml_engine::interpreter::Interpreter;
use scxml_engine::io_processor::IoDispatcher;
use scxml_engine::reader;

struct CapturingIo {
    sent: Vec<(String, String, String)>,
}

impl CapturingIo {
    fn new() -> CapturingIo {
        CapturingIo { sent: Vec::new() }
    }
}

impl IoDispatcher for CapturingIo {
    fn send(&mut self, target: &str, type_value: &str, event: Event, _delay_ms: u64) -> Result<(), String> {
        self.sent.push((target.to_string(), type_value.to_string(), event.name));
        Ok(())
    }
}

fn run(xml: &str, datamodel: Box<dyn Datamodel>) -> Interpreter {
    let doc = reader::parse_str(xml).expect("document parses");
    let mut it = Interpreter::new(doc, datamodel, Box::new(CapturingIo::new()), "scenario".into(), 200);
    it.start();
    it
}

/// S1: a flat two-state machine advances on a plain event.
#[test]
fn flat_transition_on_named_event() {
    let mut it = run(
        r#"<scxml initial="idle" version="1.0">
             <state id="idle"><transition event="start" target="running"/></state>
             <state id="running"/>
           </scxml>"#,
        Box::new(NullDatamodel::new()),
    );
    assert_eq!(it.configuration_paths(), vec!["idle".to_string()]);
    it.feed_external(Event::external("start"));
    assert_eq!(it.configuration_paths(), vec!["running".to_string()]);
}

/// S2: compound states enter their default initial child and a
/// wildcard transition at the parent level catches events the child
/// doesn't handle itself.
#[test]
fn compound_state_default_initial_and_ancestor_wildcard() {
    let mut it = run(
        r#"<scxml initial="top" version="1.0">
             <state id="top" initial="inner_a">
               <state id="inner_a">
                 <transition event="next" target="inner_b"/>
               </state>
               <state id="inner_b"/>
               <transition event="error.*" target="failed"/>
             </state>
             <state id="failed"/>
           </scxml>"#,
        Box::new(NullDatamodel::new()),
    );
    assert_eq!(it.configuration_paths(), vec!["inner_a".to_string(), "top".to_string()]);
    it.feed_external(Event::external("next"));
    assert_eq!(it.configuration_paths(), vec!["inner_b".to_string(), "top".to_string()]);
    it.feed_external(Event::external("error.execution"));
    assert_eq!(it.configuration_paths(), vec!["failed".to_string()]);
}

/// S3: independent parallel regions each react to the same event
/// without one region's transition preempting the other's.
#[test]
fn parallel_regions_react_independently() {
    let mut it = run(
        r#"<scxml initial="both" version="1.0">
             <parallel id="both">
               <state id="left" initial="l1">
                 <state id="l1"><transition event="go" target="l2"/></state>
                 <state id="l2"/>
               </state>
               <state id="right" initial="r1">
                 <state id="r1"><transition event="go" target="r2"/></state>
                 <state id="r2"/>
               </state>
             </parallel>
           </scxml>"#,
        Box::new(NullDatamodel::new()),
    );
    it.feed_external(Event::external("go"));
    let config = it.configuration_paths();
    assert!(config.contains(&"both.left.l2".to_string()));
    assert!(config.contains(&"both.right.r2".to_string()));
}

/// S4: a guarded `<if>`/`<else>` inside `<onentry>` picks a branch based
/// on `data.*`, proving assign + condition evaluation flow together.
#[test]
fn onentry_if_else_branches_on_data() {
    let xml = r#"<scxml initial="check" version="1.0">
             <state id="check">
               <onentry>
                 <assign location="data.count" expr="5"/>
                 <if cond="data.count &gt; 3">
                   <assign location="data.label" expr="'big'"/>
                 <else/>
                   <assign location="data.label" expr="'small'"/>
                 </if>
               </onentry>
             </state>
           </scxml>"#;
    let doc = reader::parse_str(xml).expect("document parses");
    let mut it = Interpreter::new(
        doc,
        Box::new(scxml_engine::datamodel::DefaultDatamodel::new()),
        Box::new(CapturingIo::new()),
        "scenario".into(),
        200,
    );
    it.start();
    assert_eq!(it.datamodel.get("data.label"), Some(DataValue::String("big".to_string())));
}

/// S5: entering a top-level `<final>` stops the session and the done
/// event for the enclosing state still reaches the internal queue.
#[test]
fn top_level_final_ends_the_session() {
    let mut it = run(
        r#"<scxml initial="run" version="1.0">
             <state id="run"><transition event="finish" target="done"/></state>
             <final id="done"/>
           </scxml>"#,
        Box::new(NullDatamodel::new()),
    );
    assert!(it.running);
    it.feed_external(Event::external("finish"));
    assert!(!it.running);
    assert!(it.configuration_paths().contains(&"done".to_string()));
}

/// S6: persisting a session and restoring it into a fresh interpreter
/// against the same document reproduces the active configuration.
#[cfg(feature = "persistence")]
#[test]
fn persist_and_restore_configuration() {
    use scxml_engine::persistence;

    let xml = r#"<scxml initial="a" version="1.0">
                   <state id="a"><transition event="go" target="b"/></state>
                   <state id="b"/>
                 </scxml>"#;
    let mut it = run(xml, Box::new(NullDatamodel::new()));
    it.feed_external(Event::external("go"));
    let snapshot = persistence::snapshot(&it);
    let json = persistence::to_json_string(&snapshot).expect("serialize");

    let doc2 = reader::parse_str(xml).expect("parse");
    let mut it2 = Interpreter::new(
        doc2,
        Box::new(NullDatamodel::new()),
        Box::new(CapturingIo::new()),
        "ignored".into(),
        200,
    );
    let restored = persistence::from_json_string(&json).expect("deserialize");
    persistence::restore(&mut it2, restored).expect("restore");
    assert_eq!(it2.configuration_paths(), vec!["b".to_string()]);
}
