/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use async_trait::async_trait;
use fanout_protocol::{Activity, HubRequest};
use rusqlite::params;
use sha2::Digest as _;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::http_retry::send_with_retry;
use crate::ids::{now_ms, Ids};
use crate::stream_store::open_conn;

/// A distributed activity and the stream URLs (topics) it was added to.
#[derive(Clone, Debug)]
pub struct HubEvent {
    pub topics: Vec<String>,
    pub activity: Activity,
}

/// Outbound side of the push hub.
#[async_trait]
pub trait PushHub: Send + Sync {
    /// Pushes the event to subscribers. Returns how many callbacks accepted it.
    async fn publish(&self, event: &HubEvent) -> Result<usize>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HubMode {
    Subscribe,
    Unsubscribe,
}

#[derive(Clone)]
pub struct Subscriptions {
    path: PathBuf,
}

impl Subscriptions {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = open_conn(&path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS hub_subscriptions (
              subscription_id TEXT PRIMARY KEY,
              topic TEXT NOT NULL,
              callback TEXT NOT NULL,
              created_at_ms INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_hub_topic ON hub_subscriptions(topic);
            "#,
        )
        .context("init hub tables")?;
        Ok(Self { path })
    }

    pub fn subscribe(&self, topic: &str, callback: &str) -> Result<bool> {
        let conn = open_conn(&self.path)?;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO hub_subscriptions(subscription_id, topic, callback, created_at_ms) VALUES (?1, ?2, ?3, ?4)",
            params![subscription_id(topic, callback), topic, callback, now_ms()],
        )?;
        Ok(changed > 0)
    }

    pub fn unsubscribe(&self, topic: &str, callback: &str) -> Result<bool> {
        let conn = open_conn(&self.path)?;
        let changed = conn.execute(
            "DELETE FROM hub_subscriptions WHERE subscription_id = ?1",
            params![subscription_id(topic, callback)],
        )?;
        Ok(changed > 0)
    }

    pub fn callbacks_for(&self, topic: &str) -> Result<Vec<String>> {
        let conn = open_conn(&self.path)?;
        let mut stmt =
            conn.prepare("SELECT callback FROM hub_subscriptions WHERE topic = ?1 ORDER BY created_at_ms ASC")?;
        let rows = stmt.query_map(params![topic], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Applies a `hub.mode` control request. Publishing is outbound only.
    pub fn handle_control(&self, ids: &Ids, req: &HubRequest) -> EngineResult<HubMode> {
        let mode = match req.mode.trim().to_ascii_lowercase().as_str() {
            "subscribe" => HubMode::Subscribe,
            "unsubscribe" => HubMode::Unsubscribe,
            "publish" => return Err(EngineError::validation("hub does not accept publish requests")),
            other => return Err(EngineError::validation(format!("unsupported hub.mode: {other}"))),
        };
        let topic = req.topic.trim();
        let callback = req.callback.trim();
        if !topic.starts_with(&format!("{}/api/", ids.base())) {
            return Err(EngineError::validation("hub.topic is not a stream of this server"));
        }
        if !(callback.starts_with("https://") || callback.starts_with("http://")) {
            return Err(EngineError::validation("hub.callback must be an http(s) URL"));
        }
        match mode {
            HubMode::Subscribe => {
                if self.subscribe(topic, callback)? {
                    info!("hub subscribe topic={topic} callback={callback}");
                }
            }
            HubMode::Unsubscribe => {
                if self.unsubscribe(topic, callback)? {
                    info!("hub unsubscribe topic={topic} callback={callback}");
                }
            }
        }
        Ok(mode)
    }
}

fn subscription_id(topic: &str, callback: &str) -> String {
    let mut h = sha2::Sha256::new();
    h.update(topic.as_bytes());
    h.update(b"\n");
    h.update(callback.as_bytes());
    hex::encode(h.finalize())
}

/// Posts activities to subscriber callbacks over HTTP.
pub struct HttpHub {
    subs: Subscriptions,
    http: reqwest::Client,
    attempts: u32,
}

impl HttpHub {
    pub fn new(subs: Subscriptions, http: reqwest::Client, attempts: u32) -> Self {
        Self { subs, http, attempts }
    }
}

#[async_trait]
impl PushHub for HttpHub {
    async fn publish(&self, event: &HubEvent) -> Result<usize> {
        let subs = self.subs.clone();
        let topics = event.topics.clone();
        // callback -> first topic it subscribed to
        let targets = tokio::task::spawn_blocking(move || -> Result<BTreeMap<String, String>> {
            let mut out = BTreeMap::new();
            for topic in topics {
                for cb in subs.callbacks_for(&topic)? {
                    out.entry(cb).or_insert_with(|| topic.clone());
                }
            }
            Ok(out)
        })
        .await??;
        if targets.is_empty() {
            return Ok(0);
        }

        let body = serde_json::to_vec(&event.activity)?;
        let mut delivered = 0;
        for (callback, topic) in targets {
            let res = send_with_retry(
                || {
                    self.http
                        .post(&callback)
                        .header("Content-Type", "application/json")
                        .header("Link", format!("<{topic}>; rel=\"self\""))
                        .body(body.clone())
                },
                self.attempts,
            )
            .await;
            match res {
                Ok(resp) if resp.status().is_success() => delivered += 1,
                Ok(resp) => warn!("hub callback {callback} answered {}", resp.status()),
                Err(e) => warn!("hub callback {callback} failed: {e:#}"),
            }
        }
        debug!("hub pushed {} to {delivered} callbacks", event.activity.id);
        Ok(delivered)
    }
}

pub fn start_hub_worker(
    hub: Arc<dyn PushHub>,
    mut rx: mpsc::UnboundedReceiver<HubEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                ev = rx.recv() => {
                    let Some(ev) = ev else { break };
                    if let Err(e) = hub.publish(&ev).await {
                        warn!("hub publish {} failed: {e:#}", ev.activity.id);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("hub worker stopped");
    });
}
