//! Per-call context handed to access checks, validators and handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use apiary_protocol::{Session, SharedService};
use tracing::Span;

use crate::config::Config;

/// Registered services by name.
pub type ServiceMap = BTreeMap<String, SharedService>;

/// Read-only view of the application for one call.
#[derive(Clone)]
pub struct Context {
    services: Arc<ServiceMap>,
    config: Arc<Config>,
    logger: Span,
    session: Arc<dyn Session>,
}

impl Context {
    pub(crate) fn new(
        services: Arc<ServiceMap>,
        config: Arc<Config>,
        logger: Span,
        session: Arc<dyn Session>,
    ) -> Self {
        Self {
            services,
            config,
            logger,
            session,
        }
    }

    pub fn services(&self) -> &ServiceMap {
        &self.services
    }

    pub fn get(&self, name: &str) -> Option<&SharedService> {
        self.services.get(name)
    }

    /// Registered service `name`, downcast to its concrete type.
    pub fn service<T: 'static>(&self, name: &str) -> Option<&T> {
        self.services.get(name)?.as_any().downcast_ref::<T>()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The application's logging span.
    pub fn logger(&self) -> &Span {
        &self.logger
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .field("authorized", &self.session.authorized())
            .finish()
    }
}
