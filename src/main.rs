//! kiro-proxy -- reverse proxy exposing the Anthropic Messages API over a
//! pool of Kiro (Amazon Q) credentials.
//!
//! Entry point. Wires together:
//!   - Configuration loading (TOML + `KIRO_PROXY_*` env overrides)
//!   - The Store Client, Credential Pool, Token Store, Selector
//!   - The Refresh Coordinator's background worker task
//!   - The axum HTTP server with graceful shutdown on SIGTERM / SIGINT

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use kiro_gateway::convert::ModelResolver;
use kiro_gateway::transport::http::KiroHttpClient;
use kiro_proxy::config::RuntimeConfig;
use kiro_proxy::pool::CredentialPool;
use kiro_proxy::refresh::{self, RefreshCoordinator};
use kiro_proxy::selector::Selector;
#[cfg(not(feature = "redis-store"))]
use kiro_proxy::store::memory::MemoryStore;
use kiro_proxy::store::Store;
use kiro_proxy::tokenstore::TokenStore;
use kiro_proxy::AppState;

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

struct CliArgs {
    config_path: PathBuf,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from("kiro-proxy.toml");

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = PathBuf::from(path);
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("kiro-proxy {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    CliArgs { config_path }
}

fn print_usage() {
    println!(
        "\
kiro-proxy {version} -- Anthropic Messages API shim over a Kiro credential pool

USAGE:
    kiro-proxy [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: kiro-proxy.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    KIRO_PROXY_CONFIG      Alternative to --config flag
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = parse_args();
    let config_path = std::env::var("KIRO_PROXY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    let config = match RuntimeConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: failed to load configuration: {e}");
            return ExitCode::from(1);
        }
    };

    init_tracing(&config);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "starting kiro-proxy"
    );

    if config.auth.rotate_identity_on_401 {
        tracing::error!(
            "auth.rotate_identity_on_401 is not supported by this build \
             (the upstream's identity-rotation contract is unverified)"
        );
        return ExitCode::from(1);
    }

    let store: Arc<dyn Store> = match build_store(&config).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "fatal: store unreachable at startup");
            return ExitCode::from(1);
        }
    };

    let model_resolver = match ModelResolver::new() {
        Ok(r) => Arc::new(r),
        Err(e) => {
            tracing::error!(error = %e, "fatal: model resolver construction failed");
            return ExitCode::from(1);
        }
    };

    let (refresh_tx, refresh_rx) = refresh::channel(256);
    let pool = Arc::new(CredentialPool::new(store.clone(), refresh_tx.clone()));
    let tokens = Arc::new(TokenStore::new(store));
    let selector = Arc::new(Selector::new(pool.clone(), config.limits.health_cooldown_secs));
    let coordinator = RefreshCoordinator::new(pool.clone(), tokens.clone());

    tokio::spawn(coordinator.clone().run(refresh_rx));

    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
        tokens,
        selector,
        refresh: coordinator,
        refresh_tx,
        http: Arc::new(KiroHttpClient::new()),
        model_resolver,
    };

    let app = build_app(state);

    let listen_addr = config.listen_addr();
    let listener = match TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(addr = %listen_addr, error = %e, "fatal: failed to bind listener");
            return ExitCode::from(2);
        }
    };
    tracing::info!(addr = %listen_addr, "listening");

    println!();
    println!("  kiro-proxy v{} is running", env!("CARGO_PKG_VERSION"));
    println!("  Messages:  http://{listen_addr}/v1/messages");
    println!("  Health:    http://{listen_addr}/health");
    println!();

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server error");
        return ExitCode::from(1);
    }

    tracing::info!("shutting down gracefully");
    ExitCode::from(0)
}

#[cfg(feature = "redis-store")]
async fn build_store(config: &RuntimeConfig) -> anyhow::Result<Arc<dyn Store>> {
    let store = kiro_proxy::store::redis_backend::RedisStore::connect(&config.store.url, &config.store.key_prefix)
        .await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis-store"))]
async fn build_store(_config: &RuntimeConfig) -> anyhow::Result<Arc<dyn Store>> {
    Ok(Arc::new(MemoryStore::new()))
}

// ---------------------------------------------------------------------------
// Router assembly
// ---------------------------------------------------------------------------

fn build_app(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config);
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();
    let trace = TraceLayer::new_for_http();

    kiro_proxy::api::build_api_router(state.clone())
        .layer(propagate_id)
        .layer(request_id)
        .layer(trace)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(config: &RuntimeConfig) -> CorsLayer {
    if config.server.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .server
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

fn init_tracing(config: &RuntimeConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("kiro_proxy={level},tower_http={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("received SIGTERM");
        }
    }
}
