mod api;
mod cli;
mod error;
mod runtime;
mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use sha2::{Digest, Sha256};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use ag_domain::config::{Config, ConfigSeverity, CorsConfig, StoreKind};
use ag_providers::registry::ProviderRegistry;
use ag_store::Store;

use crate::cli::Cli;
use crate::runtime::cancel::CancelMap;
use crate::runtime::stream_bus::StreamBus;
use crate::runtime::tool_registry::ToolRegistry;
use crate::state::{build_model_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();
    let (config, config_path) = crate::cli::load_config(cli.config)?;
    tracing::info!(path = %config_path, "config loaded");
    run_server(Arc::new(config)).await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ag_gateway=debug")))
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("assistants-gateway starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    // ── LLM providers ────────────────────────────────────────────────
    let llm = Arc::new(ProviderRegistry::from_config(&config.llm).await.context("initializing LLM providers")?);
    if llm.is_empty() {
        tracing::warn!("no LLM providers initialized — /v1/models will be empty and runs will fail at the model-call step");
    } else {
        tracing::info!(providers = llm.len(), "LLM provider registry ready");
    }
    for err in llm.init_errors() {
        tracing::warn!(provider = %err.provider_id, error = %err.error, "provider failed to initialize");
    }

    // ── Store ────────────────────────────────────────────────────────
    let store: Arc<dyn Store> = match config.store.kind {
        StoreKind::Memory => Arc::new(ag_store::MemoryStore::new()),
        StoreKind::Redis => {
            let url = config.store.url.as_deref().context("store.kind = redis requires store.url")?;
            Arc::new(ag_store::RedisStore::new(url).context("connecting to redis store")?)
        }
        StoreKind::Sql => {
            let url = config.store.url.as_deref().context("store.kind = sql requires store.url")?;
            Arc::new(ag_store::SqlStore::connect(url).await.context("connecting to sql store")?)
        }
    };
    tracing::info!(kind = ?config.store.kind, "store ready");

    // ── Model router ─────────────────────────────────────────────────
    let model_router = Arc::new(build_model_router(&config.llm));
    tracing::info!(routes = model_router.len(), "model router built");

    // ── Runtime registries ───────────────────────────────────────────
    let cancel_map = Arc::new(CancelMap::new());
    let stream_bus = Arc::new(StreamBus::new());
    let tool_registry = Arc::new(ToolRegistry::new());

    // ── API token ────────────────────────────────────────────────────
    let api_token_hash = std::env::var(&config.auth.token_env)
        .ok()
        .filter(|v| !v.is_empty())
        .map(|token| Sha256::digest(token.as_bytes()).to_vec());
    if api_token_hash.is_none() {
        tracing::warn!(env = %config.auth.token_env, "no API token configured — gateway is running unauthenticated");
    }

    let state = AppState {
        config: config.clone(),
        store,
        llm,
        model_router,
        cancel_map,
        stream_bus,
        tool_registry,
        api_token_hash,
    };

    // ── CORS + concurrency limit ─────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors);
    let max_concurrent = config.server.max_concurrent_requests;
    tracing::info!(max_concurrent, "concurrency limit set");

    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_concurrent))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;

    tracing::info!(addr = %addr, "assistants-gateway listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

/// Build a [`CorsLayer`] from the configured allowed origins.
///
/// Origins may contain a trailing `*` wildcard for the port segment (e.g.
/// `http://localhost:*`). These are expanded into a predicate that matches
/// any port on that host. A literal `"*"` allows all origins (not
/// recommended for production).
fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            let prefix = origin.trim_end_matches('*').to_owned();
            wildcard_prefixes.push(prefix);
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}
