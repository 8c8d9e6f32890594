//! The Data Model collaborator (§3, §4.4): storage for user data plus
//! the system variables, and the seam through which guard conditions
//! and `<assign>`/`<log>`/`<send>` expressions are evaluated.
//!
//! `Datamodel` is the trait the interpreter programs against; two
//! implementations ship in this crate: [`NullDatamodel`] (the W3C Null
//! Data Model: `In()` only, nothing else) and [`DefaultDatamodel`]
//! (backed by [`crate::expression`]). An ECMAScript dialect lives in
//! [`crate::ecma_datamodel`] behind the `ECMAScript` feature.

use std::collections::HashMap;
use std::fmt;

use crate::event::Event;
use crate::expression::{self, ExprContext};

/// Datamodel-agnostic value, used both for user data storage and for
/// expression-evaluation results.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<DataValue>),
    Object(HashMap<String, DataValue>),
}

impl DataValue {
    pub fn truthy(&self) -> bool {
        match self {
            DataValue::Null => false,
            DataValue::Bool(b) => *b,
            DataValue::Number(n) => *n != 0.0,
            DataValue::String(s) => !s.is_empty(),
            DataValue::Array(a) => !a.is_empty(),
            DataValue::Object(_) => true,
        }
    }

    pub fn as_number(&self) -> f64 {
        match self {
            DataValue::Number(n) => *n,
            DataValue::Bool(true) => 1.0,
            DataValue::Bool(false) => 0.0,
            DataValue::String(s) => s.parse().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            DataValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn loosely_equal(&self, other: &DataValue) -> bool {
        match (self, other) {
            (DataValue::Null, DataValue::Null) => true,
            (DataValue::Bool(a), DataValue::Bool(b)) => a == b,
            (DataValue::String(a), DataValue::String(b)) => a == b,
            (DataValue::Array(a), DataValue::Array(b)) => a == b,
            (DataValue::Null, _) | (_, DataValue::Null) => false,
            _ => self.as_number() == other.as_number(),
        }
    }

    pub fn get_field(&self, name: &str) -> DataValue {
        match self {
            DataValue::Object(map) => map.get(name).cloned().unwrap_or(DataValue::Null),
            _ => DataValue::Null,
        }
    }

    /// Writes `value` at `path` (dot-separated), creating intermediate
    /// objects as needed. `self` must be an `Object` (or will become one).
    pub fn set_path(&mut self, path: &[&str], value: DataValue) {
        if path.is_empty() {
            *self = value;
            return;
        }
        if !matches!(self, DataValue::Object(_)) {
            *self = DataValue::Object(HashMap::new());
        }
        if let DataValue::Object(map) = self {
            if path.len() == 1 {
                map.insert(path[0].to_string(), value);
            } else {
                map.entry(path[0].to_string())
                    .or_insert_with(|| DataValue::Object(HashMap::new()))
                    .set_path(&path[1..], value);
            }
        }
    }

    pub fn get_path(&self, path: &[&str]) -> Option<DataValue> {
        if path.is_empty() {
            return Some(self.clone());
        }
        match self {
            DataValue::Object(map) => map.get(path[0])?.get_path(&path[1..]),
            _ => None,
        }
    }

    pub fn delete_path(&mut self, path: &[&str]) {
        if let DataValue::Object(map) = self {
            if path.len() == 1 {
                map.remove(path[0]);
            } else if let Some(child) = map.get_mut(path[0]) {
                child.delete_path(&path[1..]);
            }
        }
    }

    #[cfg(feature = "persistence")]
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            DataValue::Null => Value::Null,
            DataValue::Bool(b) => Value::Bool(*b),
            DataValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            DataValue::String(s) => Value::String(s.clone()),
            DataValue::Array(a) => Value::Array(a.iter().map(DataValue::to_json).collect()),
            DataValue::Object(o) => {
                Value::Object(o.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }

    #[cfg(feature = "persistence")]
    pub fn from_json(value: &serde_json::Value) -> DataValue {
        use serde_json::Value;
        match value {
            Value::Null => DataValue::Null,
            Value::Bool(b) => DataValue::Bool(*b),
            Value::Number(n) => DataValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => DataValue::String(s.clone()),
            Value::Array(a) => DataValue::Array(a.iter().map(DataValue::from_json).collect()),
            Value::Object(o) => DataValue::Object(
                o.iter()
                    .map(|(k, v)| (k.clone(), DataValue::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Null => write!(f, "null"),
            DataValue::Bool(b) => write!(f, "{}", b),
            DataValue::Number(n) => write!(f, "{}", n),
            DataValue::String(s) => write!(f, "{}", s),
            DataValue::Array(a) => {
                write!(f, "[")?;
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            DataValue::Object(_) => write!(f, "[object]"),
        }
    }
}

#[cfg(feature = "persistence")]
impl serde::Serialize for DataValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(feature = "persistence")]
impl<'de> serde::Deserialize<'de> for DataValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = serde_json::Value::deserialize(deserializer)?;
        Ok(DataValue::from_json(&v))
    }
}

/// `data.<location>` lookups/assignments and guard/expression evaluation
/// against the current `InternalState` (§3). Implementations are not
/// required to be pure: `eval_value` may have side effects for dialects
/// with real scripting (ECMAScript), matching the W3C note that
/// conditional expressions "should" (not "must") be side-effect-free.
pub trait Datamodel: Send {
    fn name(&self) -> &str;

    /// `location` is a dotted path, always rooted implicitly at `data.`.
    fn set(&mut self, location: &str, value: DataValue);
    fn get(&mut self, location: &str) -> Option<DataValue>;
    fn delete(&mut self, location: &str);

    fn set_event(&mut self, event: &Event);

    fn eval_value(&mut self, expr: &str) -> Result<DataValue, String>;
    fn eval_condition(&mut self, expr: &str) -> Result<bool, String> {
        self.eval_value(expr).map(|v| v.truthy())
    }

    fn set_active_paths(&mut self, paths: Vec<String>);

    fn snapshot(&self) -> HashMap<String, DataValue>;
    fn restore(&mut self, data: HashMap<String, DataValue>);
}

fn split_location(location: &str) -> Vec<&str> {
    let trimmed = location.strip_prefix("data.").unwrap_or(location);
    trimmed.split('.').filter(|s| !s.is_empty()).collect()
}

/// B.1 The Null Data Model: no storage, `In()` only.
pub struct NullDatamodel {
    active_paths: Vec<String>,
}

impl NullDatamodel {
    pub fn new() -> NullDatamodel {
        NullDatamodel {
            active_paths: Vec::new(),
        }
    }
}

impl Default for NullDatamodel {
    fn default() -> Self {
        NullDatamodel::new()
    }
}

impl Datamodel for NullDatamodel {
    fn name(&self) -> &str {
        "null"
    }

    fn set(&mut self, _location: &str, _value: DataValue) {}

    fn get(&mut self, _location: &str) -> Option<DataValue> {
        None
    }

    fn delete(&mut self, _location: &str) {}

    fn set_event(&mut self, _event: &Event) {}

    fn eval_value(&mut self, expr: &str) -> Result<DataValue, String> {
        let empty = HashMap::new();
        let active = &self.active_paths;
        let ctx = ExprContext {
            data: &empty,
            event: None,
            active_paths: &|p: &str| active.iter().any(|a| a == p),
        };
        expression::eval(expr, &ctx).map_err(|e| e.0)
    }

    fn set_active_paths(&mut self, paths: Vec<String>) {
        self.active_paths = paths;
    }

    fn snapshot(&self) -> HashMap<String, DataValue> {
        HashMap::new()
    }

    fn restore(&mut self, _data: HashMap<String, DataValue>) {}
}

/// The dependency-light default dialect: real `data.*` storage plus the
/// grammar in [`crate::expression`].
pub struct DefaultDatamodel {
    data: HashMap<String, DataValue>,
    event: Option<HashMap<String, DataValue>>,
    active_paths: Vec<String>,
}

impl DefaultDatamodel {
    pub fn new() -> DefaultDatamodel {
        DefaultDatamodel {
            data: HashMap::new(),
            event: None,
            active_paths: Vec::new(),
        }
    }

}

impl Default for DefaultDatamodel {
    fn default() -> Self {
        DefaultDatamodel::new()
    }
}

impl Datamodel for DefaultDatamodel {
    fn name(&self) -> &str {
        "default"
    }

    fn set(&mut self, location: &str, value: DataValue) {
        let segments = split_location(location);
        if segments.is_empty() {
            return;
        }
        let root = self
            .data
            .entry("data".to_string())
            .or_insert_with(|| DataValue::Object(HashMap::new()));
        root.set_path(&segments, value);
    }

    fn get(&mut self, location: &str) -> Option<DataValue> {
        let segments = split_location(location);
        self.data.get("data")?.get_path(&segments)
    }

    fn delete(&mut self, location: &str) {
        let segments = split_location(location);
        if let Some(root) = self.data.get_mut("data") {
            root.delete_path(&segments);
        }
    }

    fn set_event(&mut self, event: &Event) {
        let mut map = HashMap::new();
        map.insert("name".to_string(), DataValue::String(event.name.clone()));
        map.insert(
            "type".to_string(),
            DataValue::String(
                match event.kind {
                    crate::event::EventKind::Internal => "internal",
                    crate::event::EventKind::External => "external",
                    crate::event::EventKind::Platform => "platform",
                }
                .to_string(),
            ),
        );
        if let Some(sendid) = &event.sendid {
            map.insert("sendid".to_string(), DataValue::String(sendid.clone()));
        }
        for (k, v) in &event.data {
            map.insert(format!("data.{}", k), v.clone());
        }
        self.event = Some(map);
    }

    fn eval_value(&mut self, expr: &str) -> Result<DataValue, String> {
        let active = &self.active_paths;
        let ctx = ExprContext {
            data: &self.data,
            event: self.event.as_ref(),
            active_paths: &|p: &str| active.iter().any(|a| a == p),
        };
        expression::eval(expr, &ctx).map_err(|e| e.0)
    }

    fn set_active_paths(&mut self, paths: Vec<String>) {
        self.active_paths = paths;
    }

    fn snapshot(&self) -> HashMap<String, DataValue> {
        self.data.clone()
    }

    fn restore(&mut self, data: HashMap<String, DataValue>) {
        self.data = data;
    }
}

pub fn create_datamodel(kind: crate::node::DataModelKind) -> Box<dyn Datamodel> {
    match kind {
        crate::node::DataModelKind::Null => Box::new(NullDatamodel::new()),
        crate::node::DataModelKind::Ecmascript => {
            #[cfg(feature = "ECMAScript")]
            {
                Box::new(crate::ecma_datamodel::EcmaDatamodel::new())
            }
            #[cfg(not(feature = "ECMAScript"))]
            {
                Box::new(DefaultDatamodel::new())
            }
        }
        crate::node::DataModelKind::Xpath => Box::new(DefaultDatamodel::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_datamodel_dotted_set_get() {
        let mut dm = DefaultDatamodel::new();
        dm.set("data.x.y", DataValue::Number(3.0));
        assert_eq!(dm.get("data.x.y"), Some(DataValue::Number(3.0)));
        assert_eq!(dm.eval_value("data.x.y == 3").unwrap().truthy(), true);
    }

    #[test]
    fn assign_idempotence() {
        let mut dm = DefaultDatamodel::new();
        dm.set("data.x", DataValue::Number(5.0));
        let first = dm.snapshot();
        dm.set("data.x", DataValue::Number(5.0));
        let second = dm.snapshot();
        assert_eq!(first, second);
    }
}
