#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{
    audit::{AuditLog, DiscardAuditSink, JsonlAuditSink},
    config::{Config, RelayDriver},
    counter::LeadCounter,
    db::LeadsDb,
    directory::ContractorDirectory,
    dispatch::{DeliveryPolicy, NotificationDispatcher},
    matcher::RecipientMatcher,
    persistence::{JsonlFallbackStore, PersistenceRouter, store},
    pipeline::{LeadPipeline, LeadPipelineParts, shutdown_and_drain},
    relay::{LogRelay, MessageRelay, TelegramRelay},
    server::{AppState, build_router},
    shutdown::Shutdown,
    validation::Validator,
};

pub mod audit;
pub mod config;
pub mod counter;
pub mod db;
pub mod directory;
pub mod dispatch;
pub mod lifecycle;
pub mod matcher;
pub mod persistence;
pub mod pipeline;
pub mod relay;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod types;
pub mod validation;

/// Application state plus the background pieces `serve` has to wind down.
pub struct IntakeService {
    pub state: AppState,
    pub audit_sink: Option<JsonlAuditSink>,
    pub directory_refresh: Option<JoinHandle<()>>,
}

pub async fn build_intake_state(config: Config) -> Result<IntakeService> {
    let shutdown = Shutdown::new();

    let primary = match config.db_url.as_deref() {
        Some(url) => {
            let db = LeadsDb::connect(url).await?;
            db.ensure_schema().await?;
            store::postgres(Arc::new(db))
        }
        None => {
            warn!("DB_URL not set, primary lead store is in-memory");
            store::memory()
        }
    };
    let persistence = PersistenceRouter::new(
        primary,
        Arc::new(JsonlFallbackStore::new(config.fallback_store_path.clone())),
        config.primary_write_timeout,
    );

    let audit_sink = config
        .audit_log_path
        .clone()
        .map(|path| JsonlAuditSink::spawn(path).0);
    let audit = match audit_sink.clone() {
        Some(sink) => AuditLog::new(Arc::new(sink)),
        None => AuditLog::new(Arc::new(DiscardAuditSink)),
    };

    let directory = ContractorDirectory::default();
    let directory_refresh = match config.directory_path.clone() {
        Some(path) => {
            match directory.refresh_from_file(&path).await {
                Ok(count) => info!(
                    contractors = count,
                    path = %path.display(),
                    "contractor directory loaded"
                ),
                Err(error) => warn!(reason = %error, "contractor directory not loaded"),
            }
            Some(directory.spawn_file_refresh(
                path,
                config.directory_refresh_interval,
                shutdown.clone(),
            ))
        }
        None => None,
    };

    let relay: Arc<dyn MessageRelay> = match config.relay_driver {
        RelayDriver::Log => Arc::new(LogRelay),
        RelayDriver::Telegram => Arc::new(TelegramRelay::new(
            &config.telegram_api_base_url,
            config.telegram_bot_token.clone(),
            config.relay_timeout,
        )?),
    };
    let relay_driver = relay.driver_name();

    let dispatcher = NotificationDispatcher::new(
        relay,
        audit.clone(),
        DeliveryPolicy {
            max_attempts: config.delivery_max_attempts,
            base_backoff: config.delivery_base_backoff,
            attempt_timeout: config.relay_timeout,
            max_notification_chars: config.max_notification_chars,
        },
        shutdown.clone(),
    );
    let pipeline = LeadPipeline::new(LeadPipelineParts {
        validator: Validator::new(config.max_message_chars),
        persistence,
        directory,
        matcher: RecipientMatcher::new(config.operations_address.clone()),
        dispatcher,
        audit,
        counter: Arc::new(LeadCounter::default()),
    });

    Ok(IntakeService {
        state: AppState::new(config, pipeline, shutdown, relay_driver),
        audit_sink,
        directory_refresh,
    })
}

pub async fn build_app(config: Config) -> Result<axum::Router> {
    Ok(build_router(build_intake_state(config).await?.state))
}

pub async fn serve(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        service = %config.service_name,
        bind_addr = %config.bind_addr,
        relay_driver = ?config.relay_driver,
        "lead intake service listening"
    );
    let service = build_intake_state(config).await?;
    let shutdown = service.state.shutdown().clone();
    let pipeline = service.state.pipeline().clone();

    let signal = shutdown.clone();
    axum::serve(listener, build_router(service.state))
        .with_graceful_shutdown(async move {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(reason = %error, "failed to listen for shutdown signal");
            }
            info!("shutdown requested, draining lead intake");
            signal.trigger();
        })
        .await?;

    shutdown_and_drain(&pipeline, &shutdown).await;
    if let Some(sink) = service.audit_sink {
        sink.flush().await;
    }
    if let Some(handle) = service.directory_refresh {
        let _ = handle.await;
    }
    info!("lead intake service stopped");
    Ok(())
}
