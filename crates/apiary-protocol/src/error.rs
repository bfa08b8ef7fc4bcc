//! Application error taxonomy and the catch-all converter.
//!
//! Every rejection that leaves the application core is an [`ApplicationError`]
//! of one of the closed [`ErrorKind`]s. Foreign failures (anything a method,
//! validator or access check returns) are normalized by [`catch_error`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Boxed error returned by factories, handlers and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure names converted to `InvalidParams` when no allow-list is configured.
pub const DEFAULT_VALIDATION_ERRORS: &[&str] = &["ValidationError"];

/// Error code carried by an application error: numeric or symbolic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorCode {
    Number(i64),
    Name(String),
}

impl ErrorCode {
    /// Coerce a JSON value into a numeric code, if it has a numeric reading.
    ///
    /// Mirrors loose numeric coercion: `12`, `"12"` and `"  12 "` all yield 12;
    /// empty strings, non-integral numbers and other shapes yield `None`.
    pub fn numeric(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .map(Self::Number),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed
                    .parse::<i64>()
                    .ok()
                    .or_else(|| {
                        trimmed
                            .parse::<f64>()
                            .ok()
                            .filter(|f| f.is_finite() && f.fract() == 0.0)
                            .map(|f| f as i64)
                    })
                    .map(Self::Number)
            }
            Value::Bool(true) => Some(Self::Number(1)),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Name(_) => None,
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        Self::Number(code)
    }
}

impl From<&str> for ErrorCode {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Name(s) => f.write_str(s),
        }
    }
}

/// Closed set of application error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Application,
    InvalidParams,
    MethodNotFound,
    Forbidden,
    Unauthorized,
    ServerError,
}

impl ErrorKind {
    /// Kind name as it appears in serialized records (`error` field).
    pub fn name(&self) -> &'static str {
        match self {
            Self::Application => "ApplicationError",
            Self::InvalidParams => "InvalidParamsError",
            Self::MethodNotFound => "MethodNotFoundError",
            Self::Forbidden => "ForbiddenRequestError",
            Self::Unauthorized => "UnAuthorizedRequestError",
            Self::ServerError => "ServerError",
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            Self::Application => "Application error",
            Self::InvalidParams => "Invalid method arguments.",
            Self::MethodNotFound => "The method does not exist.",
            Self::Forbidden => "Forbidden request",
            Self::Unauthorized => "Unauthorized request",
            Self::ServerError => "Server Error",
        }
    }
}

/// A typed application error. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}: {message}", .kind.name())]
pub struct ApplicationError {
    kind: ErrorKind,
    message: String,
    data: Option<Value>,
    code: Option<ErrorCode>,
}

impl ApplicationError {
    /// Build an error of `kind`; an empty message falls back to the kind's default.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            message: if message.is_empty() {
                kind.default_message().to_string()
            } else {
                message
            },
            data: None,
            code: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_code(mut self, code: impl Into<ErrorCode>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Application, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    pub fn method_not_found() -> Self {
        Self::new(ErrorKind::MethodNotFound, "")
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorKind::Forbidden, "")
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "")
    }

    pub fn server_error(message: impl Into<String>, code: Option<ErrorCode>) -> Self {
        let mut error = Self::new(ErrorKind::ServerError, message);
        error.code = code;
        error
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn code(&self) -> Option<&ErrorCode> {
        self.code.as_ref()
    }

    /// Transport-neutral record: `{ error, message }` plus every present, non-null field.
    pub fn to_json(&self) -> Value {
        let mut record = Map::new();
        record.insert("error".into(), Value::String(self.name().into()));
        record.insert("message".into(), Value::String(self.message.clone()));
        if let Some(data) = self.data.as_ref().filter(|v| !v.is_null()) {
            record.insert("data".into(), data.clone());
        }
        if let Some(code) = &self.code {
            record.insert("code".into(), serde_json::to_value(code).unwrap_or(Value::Null));
        }
        Value::Object(record)
    }
}

impl Serialize for ApplicationError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Representation of a foreign (non-application) failure.
///
/// Handlers return one of these when they want a named failure, e.g. a
/// `ValidationError` that the converter should map to `InvalidParams`.
#[derive(Debug, Clone, Default, PartialEq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct Failure {
    pub name: String,
    pub message: String,
    pub code: Option<Value>,
    pub details: Option<Value>,
    pub errors: Option<Value>,
    pub data: Option<Value>,
    pub fields: Map<String, Value>,
}

impl Failure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<Value>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_errors(mut self, errors: Value) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Describe an arbitrary error. I/O errors keep their OS error code.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        if let Some(failure) = error.downcast_ref::<Failure>() {
            return failure.clone();
        }
        if let Some(io) = error.downcast_ref::<std::io::Error>() {
            let mut failure = Self::new("IoError", io.to_string())
                .with_field("kind", Value::String(format!("{:?}", io.kind())));
            failure.code = io.raw_os_error().map(Value::from);
            return failure;
        }
        Self::new("Error", error.to_string())
    }

    /// First present structured detail: `details`, then `errors`, then `data`.
    pub fn detail(&self) -> Option<Value> {
        [&self.details, &self.errors, &self.data]
            .into_iter()
            .flatten()
            .find(|v| !v.is_null())
            .cloned()
    }

    /// `{ error: name, message }` plus every present, non-null own field.
    pub fn to_json(&self) -> Value {
        let mut record = Map::new();
        record.insert("error".into(), Value::String(self.name.clone()));
        record.insert("message".into(), Value::String(self.message.clone()));
        let named = [
            ("code", &self.code),
            ("details", &self.details),
            ("errors", &self.errors),
            ("data", &self.data),
        ];
        for (key, value) in named {
            if let Some(v) = value.as_ref().filter(|v| !v.is_null()) {
                record.insert(key.into(), v.clone());
            }
        }
        for (key, value) in &self.fields {
            if !value.is_null() && key != "stack" {
                record.insert(key.clone(), value.clone());
            }
        }
        Value::Object(record)
    }
}

/// Split a boxed error into a typed application error or a foreign failure.
fn classify(error: BoxError) -> Result<ApplicationError, Failure> {
    match error.downcast::<ApplicationError>() {
        Ok(typed) => Ok(*typed),
        Err(error) => match error.downcast::<Failure>() {
            Ok(failure) => Err(*failure),
            Err(error) => Err(Failure::from_error(&*error)),
        },
    }
}

/// Serialize any error to its transport-neutral record.
pub fn error_to_json(error: &(dyn std::error::Error + 'static)) -> Value {
    match error.downcast_ref::<ApplicationError>() {
        Some(typed) => typed.to_json(),
        None => Failure::from_error(error).to_json(),
    }
}

/// Wrap any error as the base kind, preferring the error's own `data`.
pub fn reject_application_error(error: BoxError, data: Option<Value>) -> ApplicationError {
    let (message, own_data) = match classify(error) {
        Ok(typed) => (typed.message().to_string(), typed.data().cloned()),
        Err(failure) => {
            let own = failure.data.clone().filter(|v| !v.is_null());
            (failure.message, own)
        }
    };
    let mut wrapped = ApplicationError::application(message);
    wrapped.data = own_data.or(data);
    wrapped
}

/// Convert a validation failure into `InvalidParams`, carrying its detail.
pub fn reject_validation_error(failure: Failure) -> ApplicationError {
    let mut error = ApplicationError::invalid_params(failure.message.clone());
    error.data = failure.detail();
    error
}

/// Convert a foreign failure into `ServerError`, preserving its record and code.
pub fn reject_server_error(failure: Failure) -> ApplicationError {
    let code = failure.code.as_ref().and_then(ErrorCode::numeric);
    ApplicationError::server_error("", code).with_data(failure.to_json())
}

/// Catch-all converter applied to every failure leaving the core.
pub fn catch_error<S: AsRef<str>>(error: BoxError, validation_errors: &[S]) -> ApplicationError {
    match classify(error) {
        Ok(typed) => typed,
        Err(failure) if validation_errors.iter().any(|n| n.as_ref() == failure.name) => {
            reject_validation_error(failure)
        }
        Err(failure) => reject_server_error(failure),
    }
}
