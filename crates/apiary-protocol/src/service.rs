//! Service contract: a long-lived unit with an identifier and an async shutdown.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::BoxError;

/// Trait implemented by every service and server unit owned by an application.
pub trait Service: Send + Sync + 'static {
    /// Stable identifier of this unit.
    fn id(&self) -> &str;

    /// Release resources. Units without anything to release keep the default.
    fn shutdown(&self) -> impl Future<Output = Result<(), BoxError>> + Send {
        async { Ok(()) }
    }
}

/// Object-safe wrapper for the Service trait.
pub trait DynService: Send + Sync {
    fn id_dyn(&self) -> &str;
    fn shutdown_dyn(&self) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + '_>>;
    fn as_any(&self) -> &dyn Any;
}

impl<T: Service> DynService for T {
    fn id_dyn(&self) -> &str {
        self.id()
    }

    fn shutdown_dyn(&self) -> Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + '_>> {
        Box::pin(self.shutdown())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shared handle to a registered unit.
pub type SharedService = Arc<dyn DynService>;
