/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::api::{router, ApiState};
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::hub::{start_hub_worker, HttpHub, Subscriptions};

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .try_init()
        .ok();
}

/// Serves the engine until `shutdown` resolves, then stops the workers.
pub async fn run(cfg: EngineConfig, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let db_path = cfg.db_path()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut engine = Engine::open_at(&db_path, &cfg.public_base_url, cfg.stream)?;
    let subscriptions = Subscriptions::open(&db_path)?;
    if cfg.hub.enabled {
        let (hub_tx, hub_rx) = mpsc::unbounded_channel();
        engine = engine.with_hub(hub_tx);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()
            .context("build http client")?;
        let hub = HttpHub::new(subscriptions.clone(), http, cfg.hub.publish_attempts);
        start_hub_worker(Arc::new(hub), hub_rx, shutdown_rx.clone());
    }
    let engine = Arc::new(engine);
    engine
        .queue()
        .start_worker(shutdown_rx.clone(), engine.store().clone(), cfg.queue);

    let state = ApiState {
        engine: engine.clone(),
        subscriptions,
        internal_token: cfg.internal_token.clone(),
        max_body_bytes: cfg.max_body_bytes,
    };
    let app = router(state);

    let addr: SocketAddr = cfg.bind.parse().context("parse bind")?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("bind")?;
    info!("fanout server http://{addr} (public base {})", engine.ids().base());

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .context("serve")?;

    let _ = shutdown_tx.send(true);
    info!("fanout server stopped");
    Ok(())
}
