//! Apiary protocol contracts.
//!
//! The error taxonomy, the JSON-RPC 2.0 layer, and the session and service
//! traits shared by the application core and its transport collaborators.

pub mod error;
pub mod jsonrpc;
pub mod service;
pub mod session;

pub use error::{
    ApplicationError, BoxError, DEFAULT_VALIDATION_ERRORS, ErrorCode, ErrorKind, Failure,
    catch_error, error_to_json,
};
pub use jsonrpc::{
    CallResult, RequestId, RpcError, RpcInput, RpcReply, RpcRequest, RpcResponse, json_rpc,
};
pub use service::{DynService, Service, SharedService};
pub use session::{AnonymousSession, Session, SessionStore};
