//! HTTP and WebSocket server using Axum.
//!
//! `POST /rpc` takes one JSON-RPC request (or batch) per HTTP request with
//! the session restored from the `Authorization` header. `GET /ws` keeps a
//! session per connection, restored once from the `authToken` query
//! parameter, and answers every text frame with a reply frame.

use std::net::SocketAddr;
use std::sync::Arc;

use apiary_protocol::{BoxError, Service, Session};
use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{Authenticator, bearer_token, restore_session};
use crate::connections::ConnectionRegistry;
use crate::handler::RpcHandler;
use crate::session::ClientSession;

/// Web server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Hostname to bind to
    pub hostname: String,
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Text served at `GET /`
    pub banner: String,
    pub enable_cors: bool,
    /// Let several processes bind the same port (`SO_REUSEPORT`).
    pub reuse_port: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".into(),
            port: 8000,
            banner: "Apiary".into(),
            enable_cors: true,
            reuse_port: false,
        }
    }
}

struct WebState<H, A> {
    config: TransportConfig,
    handler: H,
    authenticator: A,
    connections: Arc<ConnectionRegistry>,
    stop: Arc<watch::Sender<bool>>,
}

impl<H: RpcHandler, A: Authenticator> WebState<H, A> {
    fn new(config: TransportConfig, handler: H, authenticator: A) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            config,
            handler,
            authenticator,
            connections: Arc::new(ConnectionRegistry::new()),
            stop: Arc::new(stop),
        }
    }
}

/// Build the transport routes without binding a listener.
pub fn router<H: RpcHandler, A: Authenticator>(
    config: TransportConfig,
    handler: H,
    authenticator: A,
) -> Router {
    build_router(Arc::new(WebState::new(config, handler, authenticator)))
}

fn build_router<H: RpcHandler, A: Authenticator>(state: Arc<WebState<H, A>>) -> Router {
    let enable_cors = state.config.enable_cors;
    let app = Router::new()
        .route("/", get(root_handler::<H, A>))
        .route("/rpc", post(rpc_handler::<H, A>).get(bad_request))
        .route("/ws", get(ws_upgrade_handler::<H, A>))
        .fallback(fallback_handler)
        .with_state(state);
    if enable_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// A running web server. Registered with the application as a server unit.
pub struct WebServer {
    local_addr: SocketAddr,
    connections: Arc<ConnectionRegistry>,
    stop: Arc<watch::Sender<bool>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WebServer {
    pub const ID: &'static str = "web-server";

    /// Bind `config.hostname:config.port` and start serving.
    pub async fn start<H: RpcHandler, A: Authenticator>(
        config: TransportConfig,
        handler: H,
        authenticator: A,
    ) -> Result<Self, BoxError> {
        let listener = bind_listener(&config).await?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(WebState::new(config, handler, authenticator));
        let connections = state.connections.clone();
        let stop = state.stop.clone();
        let mut stopping = stop.subscribe();
        let app = build_router(state);

        info!("Listening on http://{local_addr}");

        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stopping.changed().await;
                })
                .await;
            if let Err(e) = result {
                error!("Web server error: {e}");
            }
        });

        Ok(Self {
            local_addr,
            connections,
            stop,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Stop accepting requests, close open WebSockets and wait for the
    /// listener task to finish.
    pub async fn stop(&self) {
        self.stop.send_replace(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.connections.clear();
        info!("Web server stopped");
    }
}

impl Service for WebServer {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn shutdown(&self) -> Result<(), BoxError> {
        self.stop().await;
        Ok(())
    }
}

async fn bind_listener(config: &TransportConfig) -> Result<TcpListener, BoxError> {
    let addr = tokio::net::lookup_host((config.hostname.as_str(), config.port))
        .await?
        .next()
        .ok_or_else(|| format!("cannot resolve {}", config.hostname))?;
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    if config.reuse_port {
        socket.set_reuseport(true)?;
    }
    socket.bind(addr)?;
    Ok(socket.listen(1024)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn root_handler<H: RpcHandler, A: Authenticator>(
    State(state): State<Arc<WebState<H, A>>>,
) -> String {
    state.config.banner.clone()
}

async fn rpc_handler<H: RpcHandler, A: Authenticator>(
    State(state): State<Arc<WebState<H, A>>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let session = Arc::new(ClientSession::new());
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token);
    if let Some(token) = token {
        restore_session(&state.authenticator, &session, token).await;
    }

    let reply = state.handler.call_rpc(body, session).await;
    ([(header::CONTENT_TYPE, "application/json")], reply).into_response()
}

async fn bad_request() -> Response {
    (StatusCode::BAD_REQUEST, "Bad request").into_response()
}

async fn fallback_handler(method: Method) -> Response {
    if method == Method::GET {
        bad_request().await
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(rename = "authToken")]
    auth_token: Option<String>,
}

async fn ws_upgrade_handler<H: RpcHandler, A: Authenticator>(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<WebState<H, A>>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, query.auth_token))
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_ws_connection<H: RpcHandler, A: Authenticator>(
    socket: WebSocket,
    state: Arc<WebState<H, A>>,
    token: Option<String>,
) {
    let connection_id = Uuid::new_v4();
    let session = Arc::new(ClientSession::new());
    if let Some(token) = token.as_deref() {
        restore_session(&state.authenticator, &session, token).await;
    }

    let mut stopping = state.stop.subscribe();
    if *stopping.borrow() {
        return;
    }

    // Replies and notifications share one outbound queue.
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    if session.authorized() {
        if let Some(session_id) = session.id() {
            state
                .connections
                .register(connection_id, session_id, outbound.clone());
        }
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    info!(%connection_id, authorized = session.authorized(), "Client connected");

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let handler = state.handler.clone();
                        let session: Arc<dyn Session> = session.clone();
                        let outbound = outbound.clone();
                        let request = text.as_str().to_owned();
                        tokio::spawn(async move {
                            let reply = handler.call_rpc(request, session).await;
                            let _ = outbound.send(reply);
                        });
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%connection_id, "Client closed connection");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(%connection_id, "WebSocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }

            Some(frame) = outbound_rx.recv() => {
                if let Err(e) = ws_tx.send(Message::Text(frame.into())).await {
                    error!(%connection_id, "Failed to send frame: {e}");
                    break;
                }
            }

            _ = stopping.changed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.connections.remove(&connection_id);
    info!(%connection_id, "Client disconnected");
}
