use std::future::Future;
use std::sync::Arc;

use apiary_protocol::Session;

/// Implemented by the application core. The transport calls this for every
/// JSON-RPC request body or WebSocket text frame it receives.
pub trait RpcHandler: Clone + Send + Sync + 'static {
    /// Handle a raw request and return the serialized JSON-RPC response.
    fn call_rpc(
        &self,
        request: String,
        session: Arc<dyn Session>,
    ) -> impl Future<Output = String> + Send;
}
