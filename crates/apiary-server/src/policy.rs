//! Access and validation hooks.
//!
//! The application runs one access check and one validation step per call.
//! Both can be replaced wholesale; the defaults below apply otherwise.

use std::future::Future;
use std::sync::Arc;

use apiary_protocol::BoxError;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::api::{Access, Validator};
use crate::context::Context;

/// Application-wide access hook, replacing [`default_access`].
pub type AccessHook =
    Arc<dyn Fn(Context, Access) -> BoxFuture<'static, Result<bool, BoxError>> + Send + Sync>;

/// Application-wide validation hook, replacing [`default_validate`].
pub type ValidateHook = Arc<
    dyn Fn(Context, Option<Validator>, Value) -> BoxFuture<'static, Result<Value, BoxError>>
        + Send
        + Sync,
>;

pub fn access_hook<F, Fut>(hook: F) -> AccessHook
where
    F: Fn(Context, Access) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, BoxError>> + Send + 'static,
{
    Arc::new(move |context, access| hook(context, access).boxed())
}

pub fn validate_hook<F, Fut>(hook: F) -> ValidateHook
where
    F: Fn(Context, Option<Validator>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    Arc::new(move |context, validator, params| hook(context, validator, params).boxed())
}

/// Private methods need an authorized session and public ones pass. A
/// predicate decides on its own, whatever the session.
pub async fn default_access(context: Context, access: Access) -> Result<bool, BoxError> {
    match access {
        Access::Authorized => Ok(context.session().authorized()),
        Access::Public => Ok(true),
        Access::Check(predicate) => predicate(context).await,
    }
}

/// Run the method's validator, or pass the parameters through unchanged.
pub async fn default_validate(
    context: Context,
    validator: Option<Validator>,
    params: Value,
) -> Result<Value, BoxError> {
    match validator {
        Some(validator) => validator(params, context).await,
        None => Ok(params),
    }
}
