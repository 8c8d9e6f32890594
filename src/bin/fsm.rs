//! Command-line driver.
//! Usage:
//!    fsm scxmlfile [name=value ...] [-history]
//!
//! Loads the document, runs it to stability (the initial macrostep plus
//! one macrostep per given `name=value` external event, fed in order),
//! then prints the final active configuration. With `-history`, also
//! dumps the session's history ledger.

use std::fs;
use std::process;

use scxml_engine::datamodel::{create_datamodel, DataValue};
use scxml_engine::event::Event;
use scxml_engine::interpreter::Interpreter;
use scxml_engine::io_processor::IoDispatcher;
use scxml_engine::reader;
use scxml_engine::{get_arguments, ArgOption};

const HISTORY_OPTION: ArgOption = ArgOption {
    name: "history",
    required: false,
    with_value: false,
};

struct StderrIo;

impl IoDispatcher for StderrIo {
    fn send(&mut self, target: &str, type_value: &str, event: Event, delay_ms: u64) -> Result<(), String> {
        eprintln!(
            "(unrouted send: target='{}' type='{}' event='{}' delay={}ms — no io processor registry wired up for a single-shot CLI run)",
            target, type_value, event.name, delay_ms
        );
        Ok(())
    }
}

fn main() {
    #[cfg(feature = "EnvLog")]
    env_logger::init();

    let (named_opts, final_args) = get_arguments(&[&HISTORY_OPTION]);

    if final_args.is_empty() {
        eprintln!("Usage: fsm <scxml-file> [name=value ...] [-history]");
        process::exit(1);
    }

    let path = &final_args[0];
    let xml = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Cannot read '{}': {}", path, e);
            process::exit(1);
        }
    };

    let doc = match reader::parse_str(&xml) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Failed to load '{}': {}", path, e);
            process::exit(1);
        }
    };

    let datamodel = create_datamodel(doc.datamodel);
    let session_id = format!("cli-{}", process::id());
    let mut interpreter = Interpreter::new(doc, datamodel, Box::new(StderrIo), session_id, 500);

    interpreter.start();

    for arg in &final_args[1..] {
        let event = match arg.split_once('=') {
            Some((name, value)) => {
                let mut e = Event::external(name.to_string());
                e.data.insert("value".to_string(), DataValue::String(value.to_string()));
                e
            }
            None => Event::external(arg.clone()),
        };
        interpreter.feed_external(event);
    }

    println!("Active configuration:");
    for path in interpreter.configuration_paths() {
        println!("  {}", path);
    }
    if !interpreter.running {
        println!("(session reached a top-level final state)");
    }

    if named_opts.contains_key("history") {
        println!("\nHistory:");
        for entry in interpreter.history.all() {
            println!(
                "  [{}] {:?} config={:?} event={:?} error={:?}",
                entry.timestamp, entry.kind, entry.state_configuration, entry.event_name, entry.error
            );
        }
    }
}
