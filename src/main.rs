//! Apiary: JSON-RPC application server
//!
//! Usage:
//!   apiary serve                              # Single process on port 8000
//!   apiary serve --port 9000 --env development
//!   apiary serve --static-dir ./public        # Also load static files
//!   apiary cluster --threads 4                # Supervise four workers

use anyhow::Context as _;
use apiary::cli::{Cli, ClusterArgs, Command, ServeArgs};
use apiary::launch;
use apiary_cluster::{ProcessLauncher, Supervisor, stop_signals};
use apiary_server::LoggerConfig;
use apiary_transport::SharedTokenAuthenticator;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            init_logging(&args);
            serve(args).await
        }
        Command::Cluster(args) => {
            init_logging(&args.serve);
            let code = cluster(args).await?;
            std::process::exit(code);
        }
    }
}

fn init_logging(args: &ServeArgs) {
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        EnvFilter::new(LoggerConfig::for_environment(args.environment).filter_directive())
    };

    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let token_was_explicit = args.auth_token.is_some();
    let authenticator = match &args.auth_token {
        Some(token) => SharedTokenAuthenticator::new(token.clone()),
        None => SharedTokenAuthenticator::generate(),
    };
    let token = authenticator.secret().to_string();

    let launch::Running { app, server } = launch::start(&args, authenticator)
        .await
        .context("failed to start application")?;

    if !args.is_worker() {
        let config = app.config();
        println!();
        println!("  {}", launch::banner(&config.about));
        println!();
        println!("  Listening:  http://{}", server.local_addr());
        println!("  Domain:     {}", config.domain);
        println!("  Env:        {}", config.environment.as_str());
        if token_was_explicit {
            println!("  Token:      (from --auth-token)");
        } else {
            println!("  Token:      {token}");
        }
        println!();
    }

    launch::wait_for_stop(args.is_worker()).await;

    info!("Shutting down {}", app.name());
    app.shutdown().await;
    Ok(())
}

async fn cluster(args: ClusterArgs) -> anyhow::Result<i32> {
    // Workers must agree on the token, so it is fixed here.
    let token = match &args.serve.auth_token {
        Some(token) => token.clone(),
        None => SharedTokenAuthenticator::generate().secret().to_string(),
    };
    if args.serve.auth_token.is_none() {
        println!("  Token:      {token}");
    }

    let exe = std::env::current_exe().context("cannot locate the apiary executable")?;
    let launcher = ProcessLauncher::new(exe)
        .args(args.serve.worker_args())
        .env("APIARY_AUTH_TOKEN", token);

    let threads = args.thread_count();
    info!(threads, "Starting cluster");
    let code = Supervisor::new(launcher, threads)
        .run(stop_signals())
        .await
        .context("supervisor failed")?;
    Ok(code)
}
