//! Error types (§7): a document that fails to load never produces a
//! session; a session that hits trouble once running turns it into an
//! `error.*` event instead, per the processor model.

use std::fmt;

#[derive(Debug, Clone)]
pub enum LoadError {
    Xml(String),
    MissingAttribute { element: String, attribute: String },
    UnknownElement(String),
    UnresolvedTarget(String),
    MissingInitial(String),
    Io(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Xml(msg) => write!(f, "malformed document: {}", msg),
            LoadError::MissingAttribute { element, attribute } => {
                write!(f, "<{}> missing required attribute '{}'", element, attribute)
            }
            LoadError::UnknownElement(name) => write!(f, "unknown element '{}'", name),
            LoadError::UnresolvedTarget(id) => write!(f, "transition target '{}' not found", id),
            LoadError::MissingInitial(id) => write!(f, "state '{}' has no resolvable initial child", id),
            LoadError::Io(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::Io(e.to_string())
    }
}
