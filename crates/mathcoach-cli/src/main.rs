//! MathCoach CLI
//!
//! Main entry point for serving the MathCoach web app.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mathcoach_server::{
    build_generator, build_store, create_router, AppState, Config, SessionStore, StoreBackend,
    TextGenerator,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// MathCoach - AI math word problems for Primary 5 students
///
/// Serves a single-page app that generates a word problem, grades the
/// student's answer and returns encouraging feedback.
#[derive(Parser, Debug)]
#[command(name = "mathcoach")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: mathcoach.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Address to listen on (overrides server.host)
    #[arg(long, value_name = "HOST")]
    host: Option<String>,

    /// Port for the HTTP server (overrides server.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Keep sessions in memory instead of the configured store
    #[arg(long)]
    memory_store: bool,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("MathCoach starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration, wires the services and serves until Ctrl+C.
async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    config.apply_env();
    apply_overrides(&mut config, &args);

    // Re-validate after overrides
    config.validate()?;

    if let Some(message) = unused_supabase_warning(&config, &args) {
        tracing::warn!("{message}");
    }

    let generator: Arc<dyn TextGenerator> = build_generator(&config.generator)?;
    let store: Arc<dyn SessionStore> = build_store(
        &config.store,
        Duration::from_secs(u64::from(config.generator.timeout_seconds)),
    )?;

    print_config(&config, generator.as_ref(), store.as_ref());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| {
            anyhow::anyhow!(
                "Invalid listen address '{}:{}': {e}\n\nSuggestion: Use an IP address such as 127.0.0.1 for --host",
                config.server.host,
                config.server.port
            )
        })?;

    let router = create_router(AppState::new(config, generator, store));

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("MathCoach running on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))?;

    println!("Server stopped");
    Ok(())
}

/// Applies command-line overrides on top of the loaded configuration.
fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(ref host) = args.host {
        config.server.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if args.memory_store {
        config.store.backend = StoreBackend::Memory;
    }
}

/// Reports Supabase credentials that the memory backend will ignore.
///
/// Stays quiet when `--memory-store` asked for memory explicitly.
fn unused_supabase_warning(config: &Config, args: &Args) -> Option<String> {
    let store = &config.store;
    if args.memory_store
        || store.backend != StoreBackend::Memory
        || store.url.is_none()
        || store.anon_key.is_none()
    {
        return None;
    }
    Some(
        "Supabase credentials are set but store.backend is 'memory'; sessions will not be persisted. \
         Set store.backend to 'supabase' in mathcoach.json to use them"
            .to_string(),
    )
}

/// Resolves when the process receives Ctrl+C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Prints the effective configuration. Secrets are shown only as set/missing.
fn print_config(config: &Config, generator: &dyn TextGenerator, store: &dyn SessionStore) {
    let presence = |value: &Option<String>| if value.is_some() { "set" } else { "missing" };

    println!("Configuration loaded:");
    println!("  Listen address: {}:{}", config.server.host, config.server.port);
    println!(
        "  Generator: {} (model {})",
        generator.name(),
        config.generator.resolved_model()
    );
    println!("  API key: {}", presence(&config.generator.api_key));
    println!("  Timeout: {}s", config.generator.timeout_seconds);
    println!("  Store: {}", store.backend());
    if config.store.backend == StoreBackend::Supabase {
        println!(
            "  Tables: {} / {}",
            config.store.sessions_table, config.store.submissions_table
        );
    }
    println!("  Status per error kind: {}", config.api.status_per_kind);
}
