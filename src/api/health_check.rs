use apiary_protocol::BoxError;
use apiary_server::ApiMethod;
use serde_json::Value;

/// Reports the package identity. Callable without a session.
pub fn method() -> ApiMethod {
    ApiMethod::new(|context, _params| async move {
        let about = serde_json::to_value(&context.config().about)?;
        Ok::<Value, BoxError>(about)
    })
    .public()
}
