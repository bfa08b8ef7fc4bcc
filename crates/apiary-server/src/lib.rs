//! Apiary application core.
//!
//! Owns services and server units, the API method table and static files,
//! and dispatches calls through the access and validation hooks.

pub mod api;
pub mod application;
pub mod config;
pub mod context;
pub mod error;
pub mod policy;
pub mod statics;

pub use api::{Access, ApiMethod, ApiTable, IntoReply, Validator, method_name};
pub use application::{Application, ServiceFactory};
pub use config::{About, Config, Environment, LoggerConfig, ServerConfig};
pub use context::{Context, ServiceMap};
pub use error::AppError;
pub use policy::{AccessHook, ValidateHook, access_hook, validate_hook};
