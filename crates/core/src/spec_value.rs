use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// One value inside a free-form spec payload (embroidery positions, thread colours,
/// sizes, evidence references).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SpecValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Opaque reference handed back by the file/evidence store.
    FileRef(String),
    List(Vec<SpecValue>),
}

pub type SpecPayload = BTreeMap<String, SpecValue>;

impl PartialEq for SpecValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b).is_eq(),
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::FileRef(a), Self::FileRef(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SpecValue {}

impl SpecValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SpecValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SpecValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SpecValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

pub const POSITION_KEY: &str = "position";
pub const NOTE_KEY: &str = "note";
pub const OTHER_POSITION: &str = "other";

/// Structural checks applied before any payload is persisted.
pub fn validate_payload(payload: &SpecPayload) -> Result<(), CoreError> {
    if payload.keys().any(|k| k.trim().is_empty()) {
        return Err(CoreError::InvalidSpec("empty key".into()));
    }
    let is_other = payload
        .get(POSITION_KEY)
        .and_then(SpecValue::as_text)
        .is_some_and(|p| p.eq_ignore_ascii_case(OTHER_POSITION));
    if is_other {
        let has_note = payload
            .get(NOTE_KEY)
            .and_then(SpecValue::as_text)
            .is_some_and(|n| !n.trim().is_empty());
        if !has_note {
            return Err(CoreError::InvalidSpec(
                "position \"other\" requires a note".into(),
            ));
        }
    }
    Ok(())
}

/// Overlay `patch` onto `base`. A `Null` in the patch removes the key.
pub fn merge_payload(base: &mut SpecPayload, patch: SpecPayload) {
    for (key, value) in patch {
        if value.is_null() {
            base.remove(&key);
        } else {
            base.insert(key, value);
        }
    }
}

pub fn to_msgpack(payload: &SpecPayload) -> Result<Vec<u8>, CoreError> {
    rmp_serde::to_vec(payload).map_err(|e| CoreError::Serialization(e.to_string()))
}

pub fn from_msgpack(bytes: &[u8]) -> Result<SpecPayload, CoreError> {
    rmp_serde::from_slice(bytes).map_err(|e| CoreError::Serialization(e.to_string()))
}
