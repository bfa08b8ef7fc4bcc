use apiary_protocol::BoxError;
use apiary_server::ApiMethod;
use serde_json::Value;

/// Data of the calling session, minus the token.
pub fn info() -> ApiMethod {
    ApiMethod::new(|context, _params| async move {
        let mut data = context.session().value_of().unwrap_or(Value::Null);
        if let Some(fields) = data.as_object_mut() {
            fields.remove("token");
        }
        Ok::<Value, BoxError>(data)
    })
}
