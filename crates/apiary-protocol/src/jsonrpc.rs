//! JSON-RPC 2.0 request/response formatting and dispatch.
//!
//! The layer is state-free: it validates envelopes, hands `(method, params)`
//! to a caller function and formats whatever comes back. It never fails;
//! malformed input turns into an error envelope.

use std::future::Future;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use crate::error::{ApplicationError, ErrorCode};

pub const JSON_RPC_VERSION: &str = "2.0";

/// Standard error codes.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32700;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// JSON-RPC 2.0 request ID. Defaults to `null` when omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    #[default]
    Null,
    Number(Number),
    String(String),
    /// Any other JSON value, echoed back verbatim.
    Other(Value),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id.into())
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

/// JSON-RPC 2.0 request envelope, after validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default)]
    pub id: RequestId,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSuccessResponse {
    pub jsonrpc: String,
    pub result: Value,
    pub id: RequestId,
}

/// JSON-RPC 2.0 error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorResponse {
    pub jsonrpc: String,
    pub error: RpcError,
    pub id: RequestId,
}

/// JSON-RPC 2.0 response (success or error).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
    Success(RpcSuccessResponse),
    Error(RpcErrorResponse),
}

/// Response to a single request or to a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcReply {
    Single(RpcResponse),
    Batch(Vec<RpcResponse>),
}

/// Input accepted by [`json_rpc`]: raw text or an already-parsed value.
#[derive(Debug, Clone)]
pub enum RpcInput {
    Text(String),
    Value(Value),
}

impl From<String> for RpcInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RpcInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Value> for RpcInput {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// What a caller resolves to. `Ok(None)` is a call that produced no result.
pub type CallResult = Result<Option<Value>, ApplicationError>;

// ─────────────────────────────────────────────────────────────────────────────
// Error constructors
// ─────────────────────────────────────────────────────────────────────────────

impl RpcError {
    pub fn new(code: impl Into<ErrorCode>, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data,
        }
    }
}

/// -32700: invalid JSON was received.
pub fn parse_error() -> RpcError {
    RpcError::new(PARSE_ERROR, "Parse error", None)
}

/// The JSON sent is not a valid request object. Shares the parse-error code.
pub fn invalid_request(message: Option<&str>, data: Option<Value>) -> RpcError {
    RpcError::new(INVALID_REQUEST, message.unwrap_or("Invalid Request"), data)
}

pub fn method_not_found(data: Option<Value>) -> RpcError {
    RpcError::new(METHOD_NOT_FOUND, "Method not found", data)
}

pub fn invalid_params(message: Option<&str>, data: Option<Value>) -> RpcError {
    RpcError::new(INVALID_PARAMS, message.unwrap_or("Invalid params"), data)
}

pub fn internal_error(data: Option<Value>) -> RpcError {
    RpcError::new(INTERNAL_ERROR, "Internal error", data)
}

/// Map an implementation-defined code into the reserved -32000..=-32099 band.
pub fn server_error_code(code: i64) -> i64 {
    -(32000 + code.unsigned_abs().min(99) as i64)
}

pub fn server_error(code: i64, message: Option<&str>, data: Option<Value>) -> RpcError {
    RpcError::new(server_error_code(code), message.unwrap_or("Server error"), data)
}

/// The error's own code is sent as is; a missing, zero or empty code falls
/// back to the kind name.
impl From<ApplicationError> for RpcError {
    fn from(error: ApplicationError) -> Self {
        let code = match error.code() {
            Some(ErrorCode::Number(0)) | None => ErrorCode::Name(error.name().to_string()),
            Some(ErrorCode::Name(name)) if name.is_empty() => {
                ErrorCode::Name(error.name().to_string())
            }
            Some(code) => code.clone(),
        };
        Self {
            code,
            message: error.message().to_string(),
            data: error.data().cloned(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response formatting
// ─────────────────────────────────────────────────────────────────────────────

impl RpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self::Success(RpcSuccessResponse {
            jsonrpc: JSON_RPC_VERSION.into(),
            result,
            id,
        })
    }

    pub fn error(id: RequestId, error: RpcError) -> Self {
        Self::Error(RpcErrorResponse {
            jsonrpc: JSON_RPC_VERSION.into(),
            error,
            id,
        })
    }

    /// Format a caller outcome. A call without a result is an internal error.
    pub fn from_outcome(id: RequestId, outcome: CallResult) -> Self {
        match outcome {
            Ok(Some(result)) => Self::success(id, result),
            Ok(None) => Self::error(id, internal_error(None)),
            Err(error) => Self::error(id, error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn id(&self) -> &RequestId {
        match self {
            Self::Success(r) => &r.id,
            Self::Error(r) => &r.id,
        }
    }
}

impl RpcRequest {
    /// Validate a raw envelope. `None` means it is not a valid request.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut envelope) = value else {
            return None;
        };
        if envelope.get("jsonrpc").and_then(Value::as_str) != Some(JSON_RPC_VERSION) {
            return None;
        }
        let method = match envelope.remove("method") {
            Some(Value::String(m)) if !m.is_empty() => m,
            _ => return None,
        };
        let params = envelope.remove("params").unwrap_or(Value::Null);
        if !matches!(params, Value::Null | Value::Object(_) | Value::Array(_)) {
            return None;
        }
        let id = match envelope.remove("id") {
            None => RequestId::Null,
            Some(id) => serde_json::from_value(id).unwrap_or_default(),
        };
        Some(Self {
            jsonrpc: JSON_RPC_VERSION.into(),
            method,
            params,
            id,
        })
    }
}

/// Process one envelope against `caller`.
pub async fn response<F, Fut>(request: Value, caller: &F) -> RpcResponse
where
    F: Fn(String, Value) -> Fut,
    Fut: Future<Output = CallResult>,
{
    let Some(request) = RpcRequest::from_value(request) else {
        return RpcResponse::error(RequestId::Null, invalid_request(None, None));
    };
    let outcome = caller(request.method, request.params).await;
    RpcResponse::from_outcome(request.id, outcome)
}

/// Process a parsed single request or batch. Batch members run concurrently;
/// the output keeps input order.
pub async fn parsed_json_rpc<F, Fut>(value: Value, caller: &F) -> RpcReply
where
    F: Fn(String, Value) -> Fut,
    Fut: Future<Output = CallResult>,
{
    match value {
        Value::Array(requests) => {
            RpcReply::Batch(join_all(requests.into_iter().map(|r| response(r, caller))).await)
        }
        single => RpcReply::Single(response(single, caller).await),
    }
}

/// Top-level entry point: always returns a JSON-encoded response.
pub async fn json_rpc<F, Fut>(input: impl Into<RpcInput>, caller: F) -> String
where
    F: Fn(String, Value) -> Fut,
    Fut: Future<Output = CallResult>,
{
    let value = match input.into() {
        RpcInput::Value(value) => Ok(value),
        RpcInput::Text(text) => serde_json::from_str::<Value>(&text),
    };
    let reply = match value {
        Ok(value) => parsed_json_rpc(value, &caller).await,
        Err(_) => RpcReply::Single(RpcResponse::error(RequestId::Null, parse_error())),
    };
    serde_json::to_string(&reply).unwrap_or_else(|_| {
        r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"},"id":null}"#.into()
    })
}
