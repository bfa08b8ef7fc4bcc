//! Bearer token authentication.

use std::future::Future;

use apiary_protocol::{ApplicationError, BoxError, Session};
use chrono::{Duration, Utc};
use rand::RngCore;
use serde_json::{Value, json};
use tracing::debug;

use crate::session::ClientSession;

/// Turns a bearer token into session authorization data.
pub trait Authenticator: Send + Sync + 'static {
    fn authenticate(&self, token: &str) -> impl Future<Output = Result<Value, BoxError>> + Send;
}

/// Authorize `session` from `token`. Rejected tokens leave it unauthorized.
pub async fn restore_session<A: Authenticator>(authenticator: &A, session: &ClientSession, token: &str) {
    match authenticator.authenticate(token).await {
        Ok(data) => {
            session.authorize(&data);
            debug!(user = ?session.id(), authorized = session.authorized(), "Session restored");
        }
        Err(e) => debug!(error = %e, "Session not restored"),
    }
}

/// Extract the token from an `Authorization` header value, with or without
/// the `Bearer` scheme.
pub fn bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let token = match header.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ => header,
    };
    (!token.is_empty()).then_some(token)
}

/// Accepts one shared secret and issues sessions for a fixed user.
#[derive(Debug, Clone)]
pub struct SharedTokenAuthenticator {
    secret: String,
    username: String,
    ttl: Option<Duration>,
}

impl SharedTokenAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            username: "operator".into(),
            ttl: None,
        }
    }

    /// Random 32-byte hex secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self::new(hex::encode(bytes))
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Sessions expire `ttl` after being restored.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    fn verify(&self, token: &str) -> bool {
        // Length is not secret; compare the rest without early exit.
        token.len() == self.secret.len()
            && token
                .bytes()
                .zip(self.secret.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

impl Authenticator for SharedTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Value, BoxError> {
        if !self.verify(token) {
            return Err(ApplicationError::unauthorized().into());
        }
        let mut data = json!({
            "token": token,
            "username": self.username,
        });
        if let Some(ttl) = self.ttl {
            data["exp"] = json!((Utc::now() + ttl).timestamp());
        }
        Ok(data)
    }
}
