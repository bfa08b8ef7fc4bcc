//! Apiary transport layer.
//!
//! Serves JSON-RPC over HTTP (`POST /rpc`) and WebSocket (`GET /ws`),
//! restoring client sessions from bearer tokens. The transport is decoupled
//! from the application through the `RpcHandler` trait.

pub mod auth;
pub mod connections;
pub mod handler;
pub mod server;
pub mod session;

pub use auth::{Authenticator, SharedTokenAuthenticator, bearer_token, restore_session};
pub use connections::ConnectionRegistry;
pub use handler::RpcHandler;
pub use server::{TransportConfig, WebServer, router};
pub use session::ClientSession;
