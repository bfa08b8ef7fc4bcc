//! Client sessions restored from bearer tokens.

use apiary_protocol::{Session, SessionStore};
use apiary_protocol::session::is_falsy;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Session of a transport client.
///
/// Accepts authorization data only when it carries a non-empty `token`.
/// An `exp` claim (seconds since the epoch) bounds how long it stays
/// authorized.
#[derive(Debug, Default)]
pub struct ClientSession {
    store: SessionStore,
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session owner's username.
    pub fn id(&self) -> Option<String> {
        self.string("username")
    }

    pub fn token(&self) -> Option<String> {
        self.string("token")
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let exp = self.store.read().get("exp")?.as_i64()?;
        DateTime::from_timestamp(exp, 0)
    }

    fn string(&self, key: &str) -> Option<String> {
        self.store.read().get(key)?.as_str().map(str::to_owned)
    }
}

impl Session for ClientSession {
    fn store(&self) -> &SessionStore {
        &self.store
    }

    fn to_entries(&self, value: &Value) -> Vec<(String, Value)> {
        let Some(object) = value.as_object() else {
            return Vec::new();
        };
        match object.get("token") {
            Some(token) if !is_falsy(token) => object
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    fn authorized(&self) -> bool {
        if self.token().is_none() {
            return false;
        }
        match self.expires_at() {
            Some(expires_at) => expires_at > Utc::now(),
            None => true,
        }
    }
}
