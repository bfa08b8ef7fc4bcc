//! Lifecycle errors raised by the application core itself.

use apiary_protocol::BoxError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Registration attempted after `start_api` froze the registries.
    #[error("registries are frozen; register services before start_api")]
    Frozen,

    #[error("application is shutting down")]
    ShuttingDown,

    #[error("factory for '{name}' failed: {source}")]
    Factory {
        name: String,
        #[source]
        source: BoxError,
    },
}
