//! An interpreter for the W3C SCXML (State Chart XML) language: a
//! [`reader`] that turns markup into a [`node::Document`], an
//! [`interpreter::Interpreter`] that runs the macrostep/microstep loop
//! over it, and the collaborators it leans on along the way —
//! [`datamodel`], [`executable`] content, [`io_processor`]s, and the
//! [`history`] ledger.

use std::collections::HashMap;
use std::env;

pub mod datamodel;
#[cfg(feature = "ECMAScript")]
pub mod ecma_datamodel;
pub mod error;
pub mod event;
pub mod executable;
pub mod expression;
pub mod history;
pub mod interpreter;
pub mod io_processor;
pub mod node;
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "xml")]
pub mod reader;

/// Descriptor of a program argument option for [`get_arguments`].
pub struct ArgOption {
    pub name: &'static str,
    pub required: bool,
    pub with_value: bool,
}

impl ArgOption {
    /// Creates a new option with the specified name.
    pub fn new(name: &'static str) -> ArgOption {
        ArgOption {
            name,
            required: false,
            with_value: false,
        }
    }

    /// Defines this option as "required".
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Defines that this option needs a value.
    pub fn with_value(mut self) -> Self {
        self.with_value = true;
        self
    }
}

/// Parses program arguments against the given option descriptors,
/// returning the recognized `-option [value]` pairs plus the remaining
/// positional arguments, in order.
///
/// Don't use clap to parse arguments for now to reduce dependencies.
pub fn get_arguments(arguments: &[&ArgOption]) -> (HashMap<&'static str, String>, Vec<String>) {
    let mut final_args = Vec::<String>::new();

    let args: Vec<String> = env::args().collect();
    let mut idx = 1;
    let mut map = HashMap::new();

    while idx < args.len() {
        let arg = &args[idx];
        idx += 1;

        if let Some(sarg) = arg.strip_prefix('-') {
            let opt = arguments
                .iter()
                .find(|o| o.name == sarg)
                .unwrap_or_else(|| panic!("Unknown option '{}'", arg));
            if opt.with_value {
                if idx >= args.len() {
                    panic!("Missing value for argument '{}'", opt.name);
                }
                map.insert(opt.name, args[idx].clone());
                idx += 1;
            } else {
                map.insert(opt.name, String::new());
            }
        } else {
            final_args.push(arg.clone());
        }
    }

    for opt in arguments {
        if opt.required && !map.contains_key(opt.name) {
            panic!("Missing required argument '-{}'", opt.name);
        }
    }

    (map, final_args)
}
