//! Startup and stop handling of a single application process.

use std::sync::Arc;

use apiary_cluster::{ControlMessage, stdin_control, stop_signals};
use apiary_server::{About, AppError, Application};
use apiary_transport::{SharedTokenAuthenticator, TransportConfig, WebServer};
use tracing::info;

use crate::api;
use crate::cli::ServeArgs;

/// An application with its web server bound and its API started.
pub struct Running {
    pub app: Application,
    pub server: Arc<WebServer>,
}

pub async fn start(
    args: &ServeArgs,
    authenticator: SharedTokenAuthenticator,
) -> Result<Running, AppError> {
    let app = Application::new(args.config(), args.app_name());
    let transport = TransportConfig {
        hostname: app.config().server.host.clone(),
        port: app.config().server.port,
        banner: banner(&app.config().about),
        enable_cors: true,
        reuse_port: args.is_worker(),
    };

    let server = app
        .init_server(move |app: Application| WebServer::start(transport, app, authenticator))
        .await?;
    app.start_api(api::table(), args.static_dir.as_deref()).await?;

    Ok(Running { app, server })
}

/// Text served at the web root.
pub fn banner(about: &About) -> String {
    format!("{} ({})", about.description, about.version)
}

/// Resolves on SIGINT, SIGTERM or a `shutdown` control line on stdin.
///
/// A worker also stops when its stdin closes, since that means the
/// supervisor is gone.
pub async fn wait_for_stop(worker: bool) {
    let mut signals = stop_signals();
    let mut control = stdin_control();

    let supervisor = async {
        match control.recv().await {
            Some(ControlMessage::Shutdown) => info!("Shutdown requested by supervisor"),
            None if worker => info!("Control channel closed"),
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        reason = signals.recv() => info!(?reason, "Stop requested"),
        _ = supervisor => {}
    }
}
