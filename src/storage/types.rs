//! Core data types shared by every store
//!
//! - `EntityId` / `IdSet`: entity identifiers and ordered id sets
//! - `PropValue`: the explicit string | number | boolean property value
//! - `LogOp` / `LogRecord`: the self-describing record appended to every log

use crate::storage::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Entity identifier. Allocated monotonically, never reused.
pub type EntityId = u64;

/// Ordered set of entity ids
pub type IdSet = BTreeSet<EntityId>;

/// Shared empty set returned by lookups that find nothing
pub static EMPTY_IDS: IdSet = BTreeSet::new();

/// Parse an entity id from user input (query tokens, CLI arguments)
pub fn parse_id(input: &str) -> StoreResult<EntityId> {
    input
        .trim()
        .parse::<EntityId>()
        .map_err(|_| StoreError::InvalidArgument(format!("not a valid entity id: '{}'", input)))
}

/// A property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl PropValue {
    /// The value as text, used for index keys and string operators
    pub fn as_text(&self) -> String {
        match self {
            PropValue::String(s) => s.clone(),
            PropValue::Number(n) => n.to_string(),
            PropValue::Bool(b) => b.to_string(),
        }
    }

    /// Borrow the value if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::String(value.to_string())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::String(value)
    }
}

impl From<f64> for PropValue {
    fn from(value: f64) -> Self {
        PropValue::Number(value)
    }
}

impl From<i64> for PropValue {
    fn from(value: i64) -> Self {
        PropValue::Number(value as f64)
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

/// Operation carried by a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOp {
    Insert,
    Delete,
}

/// One record in a store's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord<P> {
    pub op: LogOp,
    pub payload: P,
}

impl<P> LogRecord<P> {
    pub fn insert(payload: P) -> Self {
        Self {
            op: LogOp::Insert,
            payload,
        }
    }

    pub fn delete(payload: P) -> Self {
        Self {
            op: LogOp::Delete,
            payload,
        }
    }
}

/// Insert/delete counters collected while replaying a log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayCounts {
    pub inserts: u64,
    pub deletes: u64,
}

impl ReplayCounts {
    pub fn count(&mut self, op: LogOp) {
        match op {
            LogOp::Insert => self.inserts += 1,
            LogOp::Delete => self.deletes += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42").unwrap(), 42);
        assert_eq!(parse_id(" 7 ").unwrap(), 7);
        assert!(matches!(
            parse_id("abc"),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(parse_id("-1").is_err());
    }

    #[test]
    fn test_prop_value_text() {
        assert_eq!(PropValue::from("Hello").as_text(), "Hello");
        assert_eq!(PropValue::from(5i64).as_text(), "5");
        assert_eq!(PropValue::from(2.5).as_text(), "2.5");
        assert_eq!(PropValue::from(true).as_text(), "true");
    }

    #[test]
    fn test_prop_value_msgpack_keeps_type() {
        for value in [
            PropValue::from("text"),
            PropValue::from(12.0),
            PropValue::from(false),
        ] {
            let bytes = rmp_serde::to_vec_named(&value).unwrap();
            let back: PropValue = rmp_serde::from_slice(&bytes).unwrap();
            assert_eq!(back, value);
        }
    }
}
