use actix_web::{middleware, web, App, HttpServer};
use anyhow::{bail, Context, Result};
use recommendation_engine::cache::MetricsCache;
use recommendation_engine::db::{InMemoryStore, PgStore, SharedStore};
use recommendation_engine::{handlers, AppState, Config};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// `--mode serve|profile-batch|vector-batch [--force]|baseline`
#[derive(Debug, PartialEq)]
enum Mode {
    Serve,
    ProfileBatch,
    VectorBatch { force: bool },
    Baseline,
}

fn parse_mode() -> Result<Mode> {
    let mut mode = "serve".to_string();
    let mut force = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--mode" => {
                mode = args.next().context("--mode requires a value")?;
            }
            "--force" => force = true,
            other => bail!("unknown argument: {}", other),
        }
    }

    Ok(match mode.as_str() {
        "serve" => Mode::Serve,
        "profile-batch" => Mode::ProfileBatch,
        "vector-batch" => Mode::VectorBatch { force },
        "baseline" => Mode::Baseline,
        other => bail!("unknown mode: {}", other),
    })
}

fn init_tracing(log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,actix_web=info,recommendation_engine=debug".into());

    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn open_store(config: &Config) -> Result<SharedStore> {
    match &config.database.url {
        Some(url) => {
            let store = PgStore::connect(url, config.database.max_connections)
                .await
                .context("Failed to create database pool")?;
            info!("Running database migrations...");
            store
                .run_migrations()
                .await
                .context("Failed to run migrations")?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE__URL not set, using the in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

async fn open_cache(config: &Config) -> Option<MetricsCache> {
    let url = config.redis.url.as_ref()?;
    match MetricsCache::connect(url, config.redis.report_ttl_seconds).await {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!(error = %e, "Redis unavailable, metrics reports will not be cached");
            None
        }
    }
}

/// Offline jobs stop at their next checkpoint on Ctrl-C.
fn cancel_on_interrupt(cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping job at the next boundary");
            cancel.store(true, Ordering::SeqCst);
        }
    });
}

#[actix_web::main]
async fn main() -> Result<()> {
    let mode = parse_mode()?;
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config.service.log_format);

    info!(service = %config.service.service_name, mode = ?mode, "Starting");

    let store = open_store(&config).await?;
    let cache = match mode {
        Mode::Serve => open_cache(&config).await,
        _ => None,
    };
    let state = AppState::build(store, config.engine.clone(), cache)
        .context("Failed to build engine state")?;

    match mode {
        Mode::ProfileBatch => {
            cancel_on_interrupt(state.profile_job.cancel_handle());
            let stats = state.profile_job.update_all_profiles().await?;
            info!(stats = %serde_json::to_string(&stats)?, "Profile batch finished");
            Ok(())
        }
        Mode::VectorBatch { force } => {
            cancel_on_interrupt(state.vector_job.cancel_handle());
            let summary = state.vector_job.run(force).await?;
            info!(
                extracted = summary.extracted,
                skipped = summary.skipped,
                failed = summary.failed,
                cancelled = summary.cancelled,
                "Vector batch finished"
            );
            Ok(())
        }
        Mode::Baseline => {
            state.baseline_job.refresh().await?;
            Ok(())
        }
        Mode::Serve => {
            let bind = (config.service.http_host.clone(), config.service.http_port);
            info!("Starting HTTP server on {}:{}", bind.0, bind.1);

            let data = web::Data::new(state);
            HttpServer::new(move || {
                App::new()
                    .app_data(data.clone())
                    .wrap(middleware::Logger::default())
                    .configure(handlers::configure)
            })
            .bind(bind)
            .context("Failed to bind HTTP server")?
            .run()
            .await
            .context("HTTP server error")
        }
    }
}
