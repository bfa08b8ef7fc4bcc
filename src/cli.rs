//! Command line and environment options.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use apiary_server::config::{DEFAULT_HOST, DEFAULT_PORT, resolve_domain};
use apiary_server::{About, Config, Environment};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "apiary", version, about = "Apiary RPC application server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a single application process
    Serve(ServeArgs),
    /// Run and supervise several application processes
    Cluster(ClusterArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Hostname to bind to
    #[arg(long, env = "APIARY_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Runtime environment: development or production
    #[arg(long = "env", env = "APIARY_ENV", default_value = "production")]
    pub environment: Environment,

    /// Directory served as static files
    #[arg(long, env = "APIARY_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Shared bearer token (random if not provided)
    #[arg(long, env = "APIARY_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Worker id, set by the cluster supervisor
    #[arg(long, env = "APIARY_WORKER_ID", hide = true)]
    pub worker_id: Option<u32>,

    /// Enable verbose logging
    #[arg(long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl ServeArgs {
    pub fn config(&self) -> Config {
        let about = About {
            name: env!("CARGO_PKG_NAME").into(),
            description: env!("CARGO_PKG_DESCRIPTION").into(),
            version: env!("CARGO_PKG_VERSION").into(),
        };
        Config::new(about, self.environment)
            .with_server(self.host.clone(), self.port.unwrap_or(DEFAULT_PORT))
            .with_domain(resolve_domain(self.port))
    }

    pub fn app_name(&self) -> String {
        match self.worker_id {
            Some(id) => format!("Application #{id}"),
            None => "Application".into(),
        }
    }

    pub fn is_worker(&self) -> bool {
        self.worker_id.is_some()
    }

    /// Arguments for a `serve` worker started by the supervisor. The token
    /// and the worker id travel through the environment instead.
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = vec![
            "serve".to_string(),
            "--host".into(),
            self.host.clone(),
            "--env".into(),
            self.environment.as_str().into(),
        ];
        if let Some(port) = self.port {
            args.extend(["--port".into(), port.to_string()]);
        }
        if let Some(dir) = &self.static_dir {
            args.extend(["--static-dir".into(), dir.display().to_string()]);
        }
        if self.verbose {
            args.push("--verbose".into());
        }
        if self.json_logs {
            args.push("--json-logs".into());
        }
        args
    }
}

#[derive(Args, Debug)]
pub struct ClusterArgs {
    /// Number of worker processes (defaults to the CPU count)
    #[arg(long, env = "APIARY_THREADS")]
    pub threads: Option<usize>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

impl ClusterArgs {
    pub fn thread_count(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }
}
