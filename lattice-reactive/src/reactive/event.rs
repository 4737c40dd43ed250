//! Change descriptors delivered to listeners.

use serde::Serialize;
use serde_json::Value;

use super::Key;
use crate::graph::NodeId;

/// The closed set of change kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReactiveEventType {
    /// A cell, key or derived value changed.
    ValueSet,
    /// A record key or list index came into existence.
    KeyAdded,
    /// A record key or list index went away.
    KeyRemoved,
    /// The shape version moved. Old and new values carry the length.
    ShapeChanged,
}

/// A change descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReactiveEvent {
    #[serde(rename = "type")]
    pub kind: ReactiveEventType,
    /// The cell, proxy or derived computation that changed.
    #[serde(skip)]
    pub target: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    #[serde(rename = "oldValue", skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(rename = "newValue", skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

impl ReactiveEvent {
    pub fn value_set(target: NodeId, key: Option<Key>, old: Value, new: Value) -> Self {
        Self {
            kind: ReactiveEventType::ValueSet,
            target,
            key,
            old_value: Some(old),
            new_value: Some(new),
        }
    }

    pub fn key_added(target: NodeId, key: Key, new: Value) -> Self {
        Self {
            kind: ReactiveEventType::KeyAdded,
            target,
            key: Some(key),
            old_value: None,
            new_value: Some(new),
        }
    }

    pub fn key_removed(target: NodeId, key: Key, old: Value) -> Self {
        Self {
            kind: ReactiveEventType::KeyRemoved,
            target,
            key: Some(key),
            old_value: Some(old),
            new_value: None,
        }
    }

    pub fn shape_changed(target: NodeId, old_len: usize, new_len: usize) -> Self {
        Self {
            kind: ReactiveEventType::ShapeChanged,
            target,
            key: None,
            old_value: Some(Value::from(old_len)),
            new_value: Some(Value::from(new_len)),
        }
    }
}
