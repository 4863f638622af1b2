//! SIWE auth server binary.
//!
//! Environment:
//! - `SIWE_AUTH_BIND`: listen address (default `0.0.0.0:8080`)
//! - `SIWE_AUTH_STORAGE`: `memory` (default), `sqlite:<path>` or `redis://…`
//! - `SIWE_AUTH_RPC_<chain id>`: JSON-RPC URL for contract wallet checks on that chain
//! - `SIWE_AUTH_SWEEP_INTERVAL`: seconds between expired-nonce sweeps (default 60)
//! - plus the `AuthConfig` variables (`SIWE_AUTH_NONCE_TTL`, `SIWE_AUTH_DOMAIN`, …)

use siwe_nonce_auth::http::router;
use siwe_nonce_auth::nonce::{AuthConfig, ConfigPreset, NonceStore};
use siwe_nonce_auth::siwe::{AuthProtocol, ChainRegistry, HttpChainClient, SignatureVerifier};
use siwe_nonce_auth::storage::{MemoryStorage, NonceStorage};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Base mainnet, used when no chain is configured.
const DEFAULT_CHAIN_ID: u64 = 8453;
const DEFAULT_RPC_URL: &str = "https://mainnet.base.org";
const RPC_VAR_PREFIX: &str = "SIWE_AUTH_RPC_";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting SIWE auth server");

    let mut config = AuthConfig::from(ConfigPreset::FromEnv);
    let chains = chain_registry_from_env()?;
    if config.allowed_chain_ids.is_empty() {
        config.allowed_chain_ids = chains.chain_ids();
    }
    for warning in config.validate() {
        warn!("{}", warning);
    }
    info!("{}", config.summary());

    let nonces = Arc::new(
        NonceStore::builder(storage_from_env()?)
            .with_config(&config)
            .build_and_init()
            .await?,
    );
    let sweep_interval = std::env::var("SIWE_AUTH_SWEEP_INTERVAL")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(60);
    let sweeper = nonces.spawn_sweeper(Duration::from_secs(sweep_interval));

    let verifier =
        SignatureVerifier::new(chains).with_timeout(config.verification_timeout);
    let protocol = Arc::new(AuthProtocol::new(nonces, verifier, config));

    let bind_address =
        std::env::var("SIWE_AUTH_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    info!(address = %bind_address, "Listening");

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    axum::serve(listener, router(protocol))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("SIWE auth server shut down gracefully");
    Ok(())
}

fn storage_from_env() -> Result<Arc<dyn NonceStorage>, Box<dyn std::error::Error>> {
    let spec = std::env::var("SIWE_AUTH_STORAGE").unwrap_or_else(|_| "memory".to_string());
    storage_from_spec(spec.trim())
}

fn storage_from_spec(spec: &str) -> Result<Arc<dyn NonceStorage>, Box<dyn std::error::Error>> {
    if spec == "memory" {
        warn!(
            "Using in-memory nonce storage; nonces are lost on restart and not shared between instances"
        );
        return Ok(Arc::new(MemoryStorage::new()));
    }

    #[cfg(feature = "sqlite-storage")]
    if let Some(path) = spec.strip_prefix("sqlite:") {
        info!(path, "Using SQLite nonce storage");
        return Ok(Arc::new(siwe_nonce_auth::storage::SqliteStorage::new(path)?));
    }

    #[cfg(feature = "redis-storage")]
    if spec.starts_with("redis://") || spec.starts_with("rediss://") {
        info!("Using Redis nonce storage");
        return Ok(Arc::new(siwe_nonce_auth::storage::RedisStorage::new(
            spec,
            "siwe_nonce",
        )?));
    }

    Err(format!("unsupported SIWE_AUTH_STORAGE value {spec:?} (is the backend feature enabled?)").into())
}

fn chain_registry_from_env() -> Result<ChainRegistry, Box<dyn std::error::Error>> {
    let mut registry = ChainRegistry::new();

    for (name, url) in std::env::vars() {
        let Some(suffix) = name.strip_prefix(RPC_VAR_PREFIX) else {
            continue;
        };
        let chain_id: u64 = suffix
            .parse()
            .map_err(|_| format!("{name}: {suffix:?} is not a chain id"))?;
        info!(chain_id, rpc = %url, "Chain client configured");
        registry.insert(chain_id, Arc::new(HttpChainClient::new(&url)?));
    }

    if registry.is_empty() {
        info!(chain_id = DEFAULT_CHAIN_ID, rpc = DEFAULT_RPC_URL, "Using default chain client");
        registry.insert(DEFAULT_CHAIN_ID, Arc::new(HttpChainClient::new(DEFAULT_RPC_URL)?));
    }

    Ok(registry)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
