//! Session contract: a key/value store with an authorization lifecycle.
//!
//! Concrete sessions are supplied by transport collaborators. They decide how
//! authorization data is projected into store entries and what "authorized"
//! means; the store handling itself is shared through provided methods.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Backing store shared by all session implementations.
pub type SessionStore = RwLock<HashMap<String, Value>>;

/// Per-connection authorization state and key/value store.
pub trait Session: Send + Sync {
    /// The session's store.
    fn store(&self) -> &SessionStore;

    /// Project authorization data into store entries. Returning an empty list
    /// rejects the data and leaves the session unauthorized.
    fn to_entries(&self, value: &Value) -> Vec<(String, Value)>;

    /// Whether the session currently grants authorized access.
    fn authorized(&self) -> bool {
        false
    }

    /// The session's data as a single value, if any.
    fn value_of(&self) -> Option<Value> {
        let store = self.store().read();
        if store.is_empty() {
            return None;
        }
        Some(Value::Object(
            store.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<Map<_, _>>(),
        ))
    }

    /// Replace the store contents with the projection of `value`.
    fn authorize(&self, value: &Value) {
        let entries = self.to_entries(value);
        let mut store = self.store().write();
        store.clear();
        store.extend(entries);
    }

    fn destroy(&self) {
        self.store().write().clear();
    }

    /// Stored value for `key`, or `default` when absent or falsy.
    fn get(&self, key: &str, default: Option<Value>) -> Option<Value> {
        match self.store().read().get(key) {
            Some(value) if !is_falsy(value) => Some(value.clone()),
            _ => default,
        }
    }

    /// Store `value` under `key`; `null` removes the key.
    fn set(&self, key: &str, value: Value) {
        let mut store = self.store().write();
        if value.is_null() {
            store.remove(key);
        } else {
            store.insert(key.to_string(), value);
        }
    }
}

/// `null`, `false`, `0` and `""` count as absent.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// A session that never accepts authorization data.
///
/// Used when a call arrives without a transport-provided session.
#[derive(Debug, Default)]
pub struct AnonymousSession {
    store: SessionStore,
}

impl AnonymousSession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Session for AnonymousSession {
    fn store(&self) -> &SessionStore {
        &self.store
    }

    fn to_entries(&self, _value: &Value) -> Vec<(String, Value)> {
        Vec::new()
    }
}
