//! Shop console CLI
//!
//! Thin driver over `shop-client`:
//! 1. Loads config and the persisted session
//! 2. Builds the request pipeline over a `reqwest` transport
//! 3. Runs one command and prints the payload to stdout
//!
//! Logs go to stderr as JSON. Failures print the normalized error's user
//! message and exit non-zero, with 2 reserved for authentication failures.

mod cli;
mod config;
mod metrics;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use common::Secret;
use shop_client::{ApiError, AuthClient, ErrorKind, HttpTransport, Pipeline};
use shop_session::SessionStore;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Command, USAGE};
use crate::config::Config;

const PASSWORD_ENV: &str = "SHOP_PASSWORD";

#[tokio::main]
async fn main() -> ExitCode {
    // JSON logs on stderr, LOG_LEVEL / RUST_LOG filter
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "shopctl failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let invocation = match cli::parse(&args) {
        Ok(invocation) => invocation,
        Err(message) => {
            eprintln!("{message}\n\n{USAGE}");
            return Ok(ExitCode::FAILURE);
        }
    };

    // Install before the pipeline emits anything
    let prometheus = if invocation.metrics {
        Some(metrics::install_recorder()?)
    } else {
        None
    };

    let config_path = Config::resolve_path(invocation.config.as_deref());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        base_url = %config.api.base_url,
        timeout_secs = config.api.timeout_secs,
        session_path = %config.session.path.display(),
        "configuration loaded"
    );

    let session = SessionStore::load(config.session.path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load session from {}",
                config.session.path.display()
            )
        })?;

    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let transport = Arc::new(HttpTransport::new(client, config.api.base_url.clone()));
    let pipeline = Arc::new(Pipeline::with_timeout(
        transport,
        Arc::new(session),
        config.timeout(),
    ));
    let auth = AuthClient::new(pipeline.clone());

    let outcome = match invocation.command {
        Command::Login { email } => {
            let password = std::env::var(PASSWORD_ENV)
                .map_err(|_| common::Error::MissingEnv(PASSWORD_ENV))?;
            auth.login(&email, Secret::new(password))
                .await
                .map(|identity| format!("logged in as {} (id {})", identity.email, identity.id))
        }
        Command::Logout => auth.logout().await.map(|()| "logged out".to_string()),
        Command::Status => Ok(if auth.is_authenticated().await {
            "authenticated".to_string()
        } else {
            "anonymous".to_string()
        }),
        Command::Get { path } => pipeline.get(&path).await.map(|r| r.text()),
        Command::Delete { path } => pipeline.delete(&path).await.map(|r| r.text()),
        Command::Post { path, body } => pipeline.post(&path, &body).await.map(|r| r.text()),
        Command::Put { path, body } => pipeline.put(&path, &body).await.map(|r| r.text()),
    };

    let code = match outcome {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            ExitCode::from(exit_status(&e))
        }
    };

    if let Some(handle) = prometheus {
        eprint!("{}", handle.render());
    }
    Ok(code)
}

/// Process exit status for a failed command.
fn exit_status(err: &ApiError) -> u8 {
    match err.kind() {
        ErrorKind::Auth => 2,
        ErrorKind::Network | ErrorKind::Api | ErrorKind::Validation => 1,
    }
}
