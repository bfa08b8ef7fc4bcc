//! The application: owns services and server units, dispatches API calls.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use apiary_protocol::{
    ApplicationError, BoxError, CallResult, DEFAULT_VALIDATION_ERRORS, RpcInput, Service,
    Session, SharedService, catch_error, json_rpc,
};
use apiary_transport::RpcHandler;
use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{Span, debug, error, info, info_span, warn};

use crate::api::{Access, ApiMethod, ApiTable, Validator};
use crate::config::Config;
use crate::context::{Context, ServiceMap};
use crate::error::AppError;
use crate::policy::{AccessHook, ValidateHook, default_access, default_validate};
use crate::statics::load_static;

type DynFactory =
    Box<dyn FnOnce(Application) -> BoxFuture<'static, Result<SharedService, BoxError>> + Send>;

type ShutdownObserver = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), BoxError>> + Send>;

/// A factory entry for [`Application::init_services`].
pub enum ServiceFactory {
    /// A named service, reachable from call contexts.
    Named(String, DynFactory),
    /// An unnamed server unit, only shut down with the application.
    Server(DynFactory),
    /// Entries initialised concurrently.
    Group(Vec<ServiceFactory>),
}

impl ServiceFactory {
    pub fn named<S, F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        S: Service,
        F: FnOnce(Application) -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, BoxError>> + Send + 'static,
    {
        Self::Named(name.into(), erase(factory))
    }

    pub fn server<S, F, Fut>(factory: F) -> Self
    where
        S: Service,
        F: FnOnce(Application) -> Fut + Send + 'static,
        Fut: Future<Output = Result<S, BoxError>> + Send + 'static,
    {
        Self::Server(erase(factory))
    }

    pub fn group(entries: impl IntoIterator<Item = ServiceFactory>) -> Self {
        Self::Group(entries.into_iter().collect())
    }
}

fn erase<S, F, Fut>(factory: F) -> DynFactory
where
    S: Service,
    F: FnOnce(Application) -> Fut + Send + 'static,
    Fut: Future<Output = Result<S, BoxError>> + Send + 'static,
{
    Box::new(move |app| {
        async move {
            let service = factory(app).await?;
            Ok(Arc::new(service) as SharedService)
        }
        .boxed()
    })
}

struct Inner {
    name: String,
    config: Arc<Config>,
    logger: Span,
    services: RwLock<Arc<ServiceMap>>,
    servers: RwLock<Vec<SharedService>>,
    api: RwLock<Arc<ApiTable>>,
    statics: RwLock<HashMap<String, Bytes>>,
    access_hook: RwLock<Option<AccessHook>>,
    validate_hook: RwLock<Option<ValidateHook>>,
    validation_errors: RwLock<Vec<String>>,
    observers: Mutex<Vec<ShutdownObserver>>,
    frozen: AtomicBool,
    finalization: AtomicBool,
    ready: watch::Sender<bool>,
}

/// Handle to a running application. Clones share the same state.
#[derive(Clone)]
pub struct Application {
    inner: Arc<Inner>,
}

impl Application {
    pub fn new(config: Config, name: impl Into<String>) -> Self {
        let name = name.into();
        let logger = info_span!("app", name = %name);
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                name,
                config: Arc::new(config),
                logger,
                services: RwLock::new(Arc::new(ServiceMap::new())),
                servers: RwLock::new(Vec::new()),
                api: RwLock::new(Arc::new(ApiTable::new())),
                statics: RwLock::new(HashMap::new()),
                access_hook: RwLock::new(None),
                validate_hook: RwLock::new(None),
                validation_errors: RwLock::new(
                    DEFAULT_VALIDATION_ERRORS.iter().map(|s| s.to_string()).collect(),
                ),
                observers: Mutex::new(Vec::new()),
                frozen: AtomicBool::new(false),
                finalization: AtomicBool::new(false),
                ready,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn logger(&self) -> &Span {
        &self.inner.logger
    }

    pub fn is_production(&self) -> bool {
        self.inner.config.is_production()
    }

    /// Whether shutdown has begun.
    pub fn finalization(&self) -> bool {
        self.inner.finalization.load(Ordering::SeqCst)
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::SeqCst)
    }

    // ── Registration ───────────────────────────────────────────────────

    /// Build a service with `factory` and register it under `name`.
    pub async fn init_service<S, F, Fut>(
        &self,
        name: impl Into<String>,
        factory: F,
    ) -> Result<Arc<S>, AppError>
    where
        S: Service,
        F: FnOnce(Application) -> Fut,
        Fut: Future<Output = Result<S, BoxError>>,
    {
        let name = name.into();
        self.ensure_open()?;
        let service = factory(self.clone())
            .await
            .map_err(|source| AppError::Factory {
                name: name.clone(),
                source,
            })?;
        let service = Arc::new(service);
        self.register_service(name, service.clone())?;
        Ok(service)
    }

    /// Build a server unit. Server units are not reachable from contexts;
    /// they are only shut down with the application.
    pub async fn init_server<S, F, Fut>(&self, factory: F) -> Result<Arc<S>, AppError>
    where
        S: Service,
        F: FnOnce(Application) -> Fut,
        Fut: Future<Output = Result<S, BoxError>>,
    {
        self.ensure_open()?;
        let server = factory(self.clone())
            .await
            .map_err(|source| AppError::Factory {
                name: "server".into(),
                source,
            })?;
        let server = Arc::new(server);
        self.register_server(server.clone())?;
        Ok(server)
    }

    /// Initialise factory entries in order; groups run concurrently.
    pub async fn init_services(
        &self,
        factories: impl IntoIterator<Item = ServiceFactory>,
    ) -> Result<(), AppError> {
        for factory in factories {
            self.init_factory(factory).await?;
        }
        Ok(())
    }

    fn init_factory(&self, factory: ServiceFactory) -> BoxFuture<'_, Result<(), AppError>> {
        async move {
            self.ensure_open()?;
            match factory {
                ServiceFactory::Named(name, build) => {
                    let service = build(self.clone()).await.map_err(|source| {
                        AppError::Factory {
                            name: name.clone(),
                            source,
                        }
                    })?;
                    self.register_service(name, service)
                }
                ServiceFactory::Server(build) => {
                    let server = build(self.clone()).await.map_err(|source| {
                        AppError::Factory {
                            name: "server".into(),
                            source,
                        }
                    })?;
                    self.register_server(server)
                }
                ServiceFactory::Group(entries) => {
                    let results =
                        join_all(entries.into_iter().map(|entry| self.init_factory(entry))).await;
                    results.into_iter().collect()
                }
            }
        }
        .boxed()
    }

    fn ensure_open(&self) -> Result<(), AppError> {
        if self.finalization() {
            return Err(AppError::ShuttingDown);
        }
        if self.is_frozen() {
            return Err(AppError::Frozen);
        }
        Ok(())
    }

    fn register_service(&self, name: String, service: SharedService) -> Result<(), AppError> {
        // Factories may finish after start_api froze the registries.
        self.ensure_open()?;
        let mut services = self.inner.services.write();
        if Arc::make_mut(&mut services)
            .insert(name.clone(), service)
            .is_some()
        {
            warn!(parent: &self.inner.logger, service = %name, "Service replaced");
        }
        info!(parent: &self.inner.logger, service = %name, "Service registered");
        Ok(())
    }

    fn register_server(&self, server: SharedService) -> Result<(), AppError> {
        self.ensure_open()?;
        info!(parent: &self.inner.logger, server = server.id_dyn(), "Server registered");
        self.inner.servers.write().push(server);
        Ok(())
    }

    pub fn get_service(&self, name: &str) -> Option<SharedService> {
        self.inner.services.read().get(name).cloned()
    }

    /// Registered services by name.
    pub fn services(&self) -> Arc<ServiceMap> {
        self.inner.services.read().clone()
    }

    pub fn servers(&self) -> Vec<SharedService> {
        self.inner.servers.read().clone()
    }

    // ── Hooks ──────────────────────────────────────────────────────────

    /// Replace (or with `None`, restore) the access policy.
    pub fn set_access_method(&self, hook: Option<AccessHook>) {
        *self.inner.access_hook.write() = hook;
    }

    /// Replace (or with `None`, restore) the validation policy.
    pub fn set_validate_method(&self, hook: Option<ValidateHook>) {
        *self.inner.validate_hook.write() = hook;
    }

    /// Error names mapped to invalid-params by the catch-all converter.
    pub fn set_validation_errors<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.inner.validation_errors.write() = names.into_iter().map(Into::into).collect();
    }

    /// Register an observer run at the start of shutdown.
    pub fn on_shutdown<F, Fut>(&self, observer: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.inner
            .observers
            .lock()
            .push(Box::new(move || observer().boxed()));
    }

    // ── Startup ────────────────────────────────────────────────────────

    /// Freeze the registries, install the method table and optional
    /// static files, then signal readiness.
    pub async fn start_api(&self, table: ApiTable, static_dir: Option<&Path>) -> Result<(), AppError> {
        self.ensure_open()?;
        self.inner.frozen.store(true, Ordering::SeqCst);

        debug!(parent: &self.inner.logger, methods = ?table.names(), "Loading API");
        *self.inner.api.write() = Arc::new(table);

        if let Some(dir) = static_dir {
            let files = load_static(dir).await;
            *self.inner.statics.write() = files;
        }

        info!(parent: &self.inner.logger, "{} API started", self.inner.name);
        self.inner.ready.send_replace(true);
        Ok(())
    }

    /// Resolves once `start_api` has completed.
    pub async fn ready(&self) {
        let mut ready = self.inner.ready.subscribe();
        let _ = ready.wait_for(|ready| *ready).await;
    }

    pub fn get_api_method(&self, name: &str) -> Option<Arc<ApiMethod>> {
        self.inner.api.read().get(name)
    }

    pub fn api(&self) -> Arc<ApiTable> {
        self.inner.api.read().clone()
    }

    pub fn get_static_file(&self, name: &str) -> Option<Bytes> {
        self.inner.statics.read().get(name).cloned()
    }

    // ── Dispatch ───────────────────────────────────────────────────────

    /// Frozen per-call view of the application.
    pub fn context(&self, session: Arc<dyn Session>) -> Context {
        Context::new(
            self.services(),
            self.inner.config.clone(),
            self.inner.logger.clone(),
            session,
        )
    }

    /// Resolve and run `method`. Every failure leaving this function is one
    /// of the application error kinds.
    pub async fn call_api(&self, method: &str, params: Value, session: Arc<dyn Session>) -> CallResult {
        debug!(parent: &self.inner.logger, method, "API call");
        let api_method = self
            .get_api_method(method)
            .ok_or_else(ApplicationError::method_not_found)?;

        let context = self.context(session);
        let validation_errors = self.inner.validation_errors.read().clone();

        let allowed = self
            .check_access(context.clone(), api_method.access.clone())
            .await
            .map_err(|e| catch_error(e, &validation_errors))?;
        if !allowed {
            return Err(ApplicationError::forbidden());
        }

        let params = self
            .run_validation(context.clone(), api_method.validate.clone(), params)
            .await
            .map_err(|e| catch_error(e, &validation_errors))?;

        (api_method.call)(context, params)
            .await
            .map_err(|e| catch_error(e, &validation_errors))
    }

    async fn check_access(&self, context: Context, access: Access) -> Result<bool, BoxError> {
        let hook = self.inner.access_hook.read().clone();
        match hook {
            Some(hook) => hook(context, access).await,
            None => default_access(context, access).await,
        }
    }

    async fn run_validation(
        &self,
        context: Context,
        validator: Option<Validator>,
        params: Value,
    ) -> Result<Value, BoxError> {
        let hook = self.inner.validate_hook.read().clone();
        match hook {
            Some(hook) => hook(context, validator, params).await,
            None => default_validate(context, validator, params).await,
        }
    }

    /// Handle a JSON-RPC request (text or parsed) and return the response text.
    pub async fn call_rpc_api(&self, request: impl Into<RpcInput>, session: Arc<dyn Session>) -> String {
        let app = self.clone();
        json_rpc(request, move |method: String, params: Value| {
            let app = app.clone();
            let session = session.clone();
            async move {
                let result = app.call_api(&method, params, session).await;
                if let Err(e) = &result {
                    error!(parent: &app.inner.logger, method = %method, error = %e, "API call failed");
                }
                result
            }
        })
        .await
    }

    // ── Shutdown ───────────────────────────────────────────────────────

    /// Stop everything the application owns. Only the first call does any
    /// work; failures are logged and never stop the sequence.
    pub async fn shutdown(&self) {
        if self.inner.finalization.swap(true, Ordering::SeqCst) {
            return;
        }
        let logger = &self.inner.logger;
        info!(parent: logger, "Shutdown {}", self.inner.name);

        let observers = std::mem::take(&mut *self.inner.observers.lock());
        for result in join_all(observers.into_iter().map(|observer| observer())).await {
            if let Err(e) = result {
                warn!(parent: logger, error = %e, "Shutdown observer failed");
            }
        }

        let servers = self.servers();
        stop_units(logger, "server", servers.iter().map(|s| (s.id_dyn().to_string(), s))).await;

        let services = self.services();
        stop_units(logger, "service", services.iter().map(|(name, s)| (name.clone(), s))).await;

        *self.inner.services.write() = Arc::new(ServiceMap::new());
        self.inner.servers.write().clear();
        *self.inner.api.write() = Arc::new(ApiTable::new());
        self.inner.statics.write().clear();

        info!(parent: logger, "{} stopped", self.inner.name);
    }
}

async fn stop_units<'a>(
    logger: &Span,
    kind: &str,
    units: impl Iterator<Item = (String, &'a SharedService)>,
) {
    let stops = units.map(|(name, unit)| async move { (name, unit.shutdown_dyn().await) });
    for (name, result) in join_all(stops).await {
        match result {
            Ok(()) => debug!(parent: logger, kind, name = %name, "Stopped"),
            Err(e) => error!(parent: logger, kind, name = %name, error = %e, "Shutdown failed"),
        }
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.inner.name)
            .field("frozen", &self.is_frozen())
            .field("finalization", &self.finalization())
            .finish()
    }
}

impl RpcHandler for Application {
    async fn call_rpc(&self, request: String, session: Arc<dyn Session>) -> String {
        self.call_rpc_api(request, session).await
    }
}
