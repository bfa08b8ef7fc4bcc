//! API method table.
//!
//! Methods are keyed by their dotted, lowercased name. Lookups lowercase the
//! requested name, so `Users.GetProfile` and `users.getprofile` resolve to
//! the same entry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Component, Path};
use std::sync::Arc;

use apiary_protocol::BoxError;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, warn};

use crate::context::Context;

/// Handler result after erasing the concrete reply type.
pub type MethodFuture = BoxFuture<'static, Result<Option<Value>, BoxError>>;

pub type Handler = Arc<dyn Fn(Context, Value) -> MethodFuture + Send + Sync>;

/// Per-method access predicate.
pub type AccessFn = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<bool, BoxError>> + Send + Sync>;

/// Per-method parameter validator. Its output replaces the parameters.
pub type Validator =
    Arc<dyn Fn(Value, Context) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Conversion of handler return values into an optional RPC result.
///
/// `()` and `None` mean "no result" and surface to callers as an internal error.
pub trait IntoReply {
    fn into_reply(self) -> Option<Value>;
}

impl IntoReply for Value {
    fn into_reply(self) -> Option<Value> {
        Some(self)
    }
}

impl IntoReply for Option<Value> {
    fn into_reply(self) -> Option<Value> {
        self
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Option<Value> {
        None
    }
}

/// Access declaration of a method.
#[derive(Clone, Default)]
pub enum Access {
    /// Requires an authorized session.
    #[default]
    Authorized,
    /// Callable without authorization.
    Public,
    /// Decided by a predicate over the call context.
    Check(AccessFn),
}

impl Access {
    pub fn check<F, Fut>(predicate: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
    {
        Self::Check(Arc::new(move |context| predicate(context).boxed()))
    }
}

impl From<bool> for Access {
    fn from(public: bool) -> Self {
        if public { Self::Public } else { Self::Authorized }
    }
}

impl fmt::Debug for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authorized => f.write_str("Authorized"),
            Self::Public => f.write_str("Public"),
            Self::Check(_) => f.write_str("Check(..)"),
        }
    }
}

/// A callable API method with its access and validation declarations.
#[derive(Clone)]
pub struct ApiMethod {
    name: String,
    pub(crate) call: Handler,
    pub(crate) access: Access,
    pub(crate) validate: Option<Validator>,
}

impl ApiMethod {
    pub fn new<F, Fut, R>(call: F) -> Self
    where
        F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
        R: IntoReply + 'static,
    {
        let call: Handler = Arc::new(move |context, params| {
            let fut = call(context, params);
            async move { fut.await.map(IntoReply::into_reply) }.boxed()
        });
        Self {
            name: String::new(),
            call,
            access: Access::default(),
            validate: None,
        }
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn public(self) -> Self {
        self.access(Access::Public)
    }

    pub fn validate<F, Fut>(mut self, validator: F) -> Self
    where
        F: Fn(Value, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.validate = Some(Arc::new(move |params, context| {
            validator(params, context).boxed()
        }));
        self
    }

    /// Registered (lowercased) name; empty until inserted into a table.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access_rule(&self) -> &Access {
        &self.access
    }

    pub fn validator(&self) -> Option<&Validator> {
        self.validate.as_ref()
    }
}

impl fmt::Debug for ApiMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiMethod")
            .field("name", &self.name)
            .field("access", &self.access)
            .field("validate", &self.validate.is_some())
            .finish()
    }
}

/// Method table loaded by `start_api`.
#[derive(Clone, Default, Debug)]
pub struct ApiTable {
    methods: HashMap<String, Arc<ApiMethod>>,
}

impl ApiTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `method` under `name`. A later registration with the same
    /// lowercased name replaces the earlier one.
    pub fn insert(&mut self, name: &str, mut method: ApiMethod) -> &mut Self {
        let key = name.to_lowercase();
        method.name = key.clone();
        if self.methods.insert(key.clone(), Arc::new(method)).is_some() {
            warn!(method = %key, "API method registered twice, keeping the last one");
        }
        self
    }

    /// Builder form of [`ApiTable::insert`].
    pub fn with(mut self, name: &str, method: ApiMethod) -> Self {
        self.insert(name, method);
        self
    }

    /// Register `method` under the name derived from its module path, e.g.
    /// `users/getProfile.rs` becomes `users.getprofile`.
    ///
    /// Test modules and non-Rust files are skipped; returns whether the
    /// method was registered.
    pub fn mount(&mut self, rel_path: impl AsRef<Path>, method: ApiMethod) -> bool {
        let rel_path = rel_path.as_ref();
        if !is_method_module(rel_path) {
            debug!(path = %rel_path.display(), "Skipping non-method module");
            return false;
        }
        let name = method_name(rel_path);
        if name.is_empty() {
            return false;
        }
        self.insert(&name, method);
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<ApiMethod>> {
        self.methods.get(&name.to_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(&name.to_lowercase())
    }

    /// Sorted method names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Dotted method name for a module path relative to the API root.
pub fn method_name(rel_path: &Path) -> String {
    let stemmed = rel_path.with_extension("");
    stemmed
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(".")
        .to_lowercase()
}

/// Rust sources (or bare module paths) that are not test modules.
pub fn is_method_module(rel_path: &Path) -> bool {
    match rel_path.extension().and_then(|ext| ext.to_str()) {
        None | Some("rs") => {}
        Some(_) => return false,
    }
    let Some(stem) = rel_path.file_stem().and_then(|stem| stem.to_str()) else {
        return false;
    };
    if stem == "tests"
        || stem.ends_with("_test")
        || stem.ends_with("_tests")
        || stem.ends_with(".test")
    {
        return false;
    }
    !rel_path
        .components()
        .any(|component| matches!(component, Component::Normal(part) if part == "tests"))
}
