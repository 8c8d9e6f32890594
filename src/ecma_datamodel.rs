//! ECMAScript dialect of the Data Model, backed by the `boa_engine`
//! interpreter (feature `ECMAScript`). Data is kept as a real JS object
//! on the engine's global object so `<assign>`/`<script>`-style
//! expressions see the same values the rest of the system reads through
//! [`crate::datamodel::Datamodel::get`].

use std::collections::HashMap;

use boa_engine::{Context, JsResult, JsValue, Source};
use log::error;

use crate::datamodel::{DataValue, Datamodel};
use crate::event::Event;

const BOOTSTRAP: &str = r#"
globalThis.data = globalThis.data || {};
function __assign(path, value) {
    var parts = path.split('.');
    var obj = globalThis;
    for (var i = 0; i < parts.length - 1; i++) {
        if (typeof obj[parts[i]] !== 'object' || obj[parts[i]] === null) {
            obj[parts[i]] = {};
        }
        obj = obj[parts[i]];
    }
    obj[parts[parts.length - 1]] = value;
}
function __get(path) {
    var parts = path.split('.');
    var obj = globalThis;
    for (var i = 0; i < parts.length; i++) {
        if (obj === undefined || obj === null) return undefined;
        obj = obj[parts[i]];
    }
    return obj;
}
function __delete(path) {
    var parts = path.split('.');
    var obj = globalThis;
    for (var i = 0; i < parts.length - 1; i++) {
        if (obj === undefined || obj === null) return;
        obj = obj[parts[i]];
    }
    if (obj) delete obj[parts[parts.length - 1]];
}
function In(id) {
    return (globalThis.__active || []).indexOf(id) >= 0;
}
"#;

pub struct EcmaDatamodel {
    context: Context,
}

impl EcmaDatamodel {
    pub fn new() -> EcmaDatamodel {
        let mut context = Context::default();
        if let Err(e) = context.eval(Source::from_bytes(BOOTSTRAP)) {
            error!("failed to install ECMAScript bootstrap: {}", e);
        }
        EcmaDatamodel { context }
    }

    fn run(&mut self, script: &str) -> JsResult<JsValue> {
        self.context.eval(Source::from_bytes(script))
    }

    fn js_to_data(&mut self, value: &JsValue) -> DataValue {
        if value.is_null_or_undefined() {
            DataValue::Null
        } else if let Some(b) = value.as_boolean() {
            DataValue::Bool(b)
        } else if let Some(n) = value.as_number() {
            DataValue::Number(n)
        } else if value.is_string() {
            DataValue::String(value.to_string(&mut self.context).map_or_else(
                |_| String::new(),
                |s| s.to_std_string_escaped(),
            ))
        } else {
            // Objects/arrays: best-effort string rendering. Structured
            // round-tripping of nested JS objects is left to callers that
            // only need scalars out of guard/assign expressions.
            value
                .to_string(&mut self.context)
                .map(|s| DataValue::String(s.to_std_string_escaped()))
                .unwrap_or(DataValue::Null)
        }
    }
}

impl Default for EcmaDatamodel {
    fn default() -> Self {
        EcmaDatamodel::new()
    }
}

fn json_literal(value: &DataValue) -> String {
    #[cfg(feature = "persistence")]
    {
        value.to_json().to_string()
    }
    #[cfg(not(feature = "persistence"))]
    {
        value.to_string()
    }
}

impl Datamodel for EcmaDatamodel {
    fn name(&self) -> &str {
        "ecmascript"
    }

    fn set(&mut self, location: &str, value: DataValue) {
        let path = location.strip_prefix("data.").unwrap_or(location);
        let script = format!("__assign('data.{}', {})", path, json_literal(&value));
        if let Err(e) = self.run(&script) {
            error!("assign '{}' failed: {}", location, e);
        }
    }

    fn get(&mut self, location: &str) -> Option<DataValue> {
        let path = location.strip_prefix("data.").unwrap_or(location);
        match self.run(&format!("__get('data.{}')", path)) {
            Ok(v) => Some(self.js_to_data(&v)),
            Err(e) => {
                error!("get '{}' failed: {}", location, e);
                None
            }
        }
    }

    fn delete(&mut self, location: &str) {
        let path = location.strip_prefix("data.").unwrap_or(location);
        let script = format!("__delete('data.{}')", path);
        let _ = self.run(&script);
    }

    fn set_event(&mut self, event: &Event) {
        let mut obj = HashMap::new();
        obj.insert("name".to_string(), DataValue::String(event.name.clone()));
        let script = format!("globalThis._event = {}", json_literal(&DataValue::Object(obj)));
        let _ = self.run(&script);
    }

    fn eval_value(&mut self, expr: &str) -> Result<DataValue, String> {
        match self.run(expr) {
            Ok(v) => Ok(self.js_to_data(&v)),
            Err(e) => Err(e.to_string()),
        }
    }

    fn set_active_paths(&mut self, paths: Vec<String>) {
        let list: Vec<String> = paths.iter().map(|p| format!("\"{}\"", p)).collect();
        let script = format!("globalThis.__active = [{}]", list.join(","));
        let _ = self.run(&script);
    }

    fn snapshot(&self) -> HashMap<String, DataValue> {
        HashMap::new()
    }

    fn restore(&mut self, data: HashMap<String, DataValue>) {
        for (k, v) in data {
            self.set(&format!("data.{}", k), v);
        }
    }
}
