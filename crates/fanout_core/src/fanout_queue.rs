/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use rand::{rngs::OsRng, RngCore};
use rusqlite::params;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::sync::{watch, Notify};
use tracing::{error, info, warn};

use crate::config::QueueSettings;
use crate::ids::{new_hex_id, now_ms};
use crate::stream_store::{open_conn, EntryTags, StreamStore};

/// Inbox appends that failed during fan-out, retried with backoff until
/// they land or run out of attempts.
#[derive(Clone)]
pub struct FanoutQueue {
    db_path: PathBuf,
    notify: Arc<Notify>,
}

#[derive(Debug, Clone)]
struct Job {
    id: String,
    attempt: u32,
    stream: String,
    entry_id: String,
    major: Option<bool>,
    direct: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: u64,
    pub delivered: u64,
    pub dead: u64,
}

impl FanoutQueue {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        init_db(&db_path)?;
        Ok(Self {
            db_path,
            notify: Arc::new(Notify::new()),
        })
    }

    /// Records a failed append of `entry_id` to the log `stream`.
    pub fn enqueue(&self, stream: &str, entry_id: &str, tags: EntryTags, err: &str) -> Result<()> {
        let now = now_ms();
        let conn = open_conn(&self.db_path)?;
        conn.execute(
            r#"
            INSERT INTO fanout_jobs (
              id, created_at_ms, next_attempt_at_ms, attempt, status, stream, entry_id, major, direct, last_error
            ) VALUES (?1, ?2, ?2, 0, 0, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                new_hex_id(),
                now,
                stream,
                entry_id,
                tags.major.map(i64::from),
                tags.direct as i64,
                err
            ],
        )?;
        self.notify.notify_one();
        Ok(())
    }

    pub fn start_worker(&self, shutdown: watch::Receiver<bool>, store: StreamStore, settings: QueueSettings) {
        let queue = self.clone();
        tokio::spawn(async move {
            queue.run_loop(shutdown, store, settings).await;
            info!("fanout worker stopped");
        });
    }

    /// Runs until shutdown. A failed pass is logged and retried after the
    /// poll interval; it never ends the loop.
    async fn run_loop(&self, mut shutdown: watch::Receiver<bool>, store: StreamStore, settings: QueueSettings) {
        info!("fanout queue db: {}", self.db_path.display());
        let tick = Duration::from_secs(settings.poll_secs);
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.process_due(&store, &settings).await {
                Ok(0) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(tick) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("fanout queue pass failed, retrying in {}s: {e:#}", settings.poll_secs);
                    tokio::select! {
                        _ = tokio::time::sleep(tick) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }
        }
    }

    /// Retries every job that is due. Returns how many were attempted.
    pub async fn process_due(&self, store: &StreamStore, settings: &QueueSettings) -> Result<usize> {
        let jobs = self.fetch_due_jobs(40).await?;
        let attempted = jobs.len();
        for job in jobs {
            let res = tokio::task::spawn_blocking({
                let store = store.clone();
                let stream = job.stream.clone();
                let entry_id = job.entry_id.clone();
                let tags = EntryTags {
                    major: job.major,
                    direct: job.direct,
                };
                move || store.append_owner(&stream, &entry_id, tags)
            })
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);

            match res {
                Ok(_) => self.mark_delivered(&job.id).await?,
                Err(e) => {
                    let attempt_no = job.attempt.saturating_add(1);
                    if attempt_no >= settings.max_attempts {
                        error!(
                            "fanout gave up job_id={} stream={} entry={}: {e:#}",
                            job.id, job.stream, job.entry_id
                        );
                        self.mark_dead(&job.id, &format!("{e:#}")).await?;
                        continue;
                    }
                    let delay = next_backoff(attempt_no, settings.base_backoff_secs, settings.max_backoff_secs);
                    self.reschedule(&job.id, attempt_no, delay, &format!("{e:#}")).await?;
                }
            }
        }
        Ok(attempted)
    }

    async fn fetch_due_jobs(&self, limit: u32) -> Result<Vec<Job>> {
        tokio::task::spawn_blocking({
            let db_path = self.db_path.clone();
            move || -> Result<Vec<Job>> {
                let conn = open_conn(&db_path)?;
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, attempt, stream, entry_id, major, direct
                    FROM fanout_jobs
                    WHERE status = 0 AND next_attempt_at_ms <= ?1
                    ORDER BY next_attempt_at_ms ASC
                    LIMIT ?2
                    "#,
                )?;
                let mut rows = stmt.query(params![now_ms(), limit])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let major: Option<i64> = row.get(4)?;
                    let direct: i64 = row.get(5)?;
                    out.push(Job {
                        id: row.get(0)?,
                        attempt: row.get(1)?,
                        stream: row.get(2)?,
                        entry_id: row.get(3)?,
                        major: major.map(|v| v != 0),
                        direct: direct != 0,
                    });
                }
                Ok(out)
            }
        })
        .await?
    }

    async fn mark_delivered(&self, id: &str) -> Result<()> {
        self.update_job(
            "UPDATE fanout_jobs SET status = 1, last_error = NULL WHERE id = ?1",
            id.to_string(),
            None,
        )
        .await
    }

    async fn mark_dead(&self, id: &str, err: &str) -> Result<()> {
        self.update_job(
            "UPDATE fanout_jobs SET status = 2, last_error = ?2 WHERE id = ?1",
            id.to_string(),
            Some(err.to_string()),
        )
        .await
    }

    async fn update_job(&self, sql: &'static str, id: String, err: Option<String>) -> Result<()> {
        tokio::task::spawn_blocking({
            let db_path = self.db_path.clone();
            move || -> Result<()> {
                let conn = open_conn(&db_path)?;
                match err {
                    Some(err) => conn.execute(sql, params![id, err])?,
                    None => conn.execute(sql, params![id])?,
                };
                Ok(())
            }
        })
        .await??;
        Ok(())
    }

    async fn reschedule(&self, id: &str, attempt: u32, delay: Duration, err: &str) -> Result<()> {
        let next = now_ms().saturating_add(delay.as_millis() as i64);
        tokio::task::spawn_blocking({
            let db_path = self.db_path.clone();
            let id = id.to_string();
            let err = err.to_string();
            move || -> Result<()> {
                let conn = open_conn(&db_path)?;
                conn.execute(
                    "UPDATE fanout_jobs SET attempt = ?2, next_attempt_at_ms = ?3, last_error = ?4 WHERE id = ?1",
                    params![id, attempt, next, err],
                )?;
                Ok(())
            }
        })
        .await??;
        Ok(())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        tokio::task::spawn_blocking({
            let db_path = self.db_path.clone();
            move || -> Result<QueueStats> {
                let conn = open_conn(&db_path)?;
                let count = |status: i64| -> Result<u64> {
                    let n: i64 = conn.query_row(
                        "SELECT COUNT(*) FROM fanout_jobs WHERE status = ?1",
                        params![status],
                        |r| r.get(0),
                    )?;
                    Ok(n.max(0) as u64)
                };
                Ok(QueueStats {
                    pending: count(0)?,
                    delivered: count(1)?,
                    dead: count(2)?,
                })
            }
        })
        .await?
    }
}

fn init_db(path: &Path) -> Result<()> {
    let conn = open_conn(path).with_context(|| format!("open queue db: {}", path.display()))?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS fanout_jobs (
          id TEXT PRIMARY KEY,
          created_at_ms INTEGER NOT NULL,
          next_attempt_at_ms INTEGER NOT NULL,
          attempt INTEGER NOT NULL,
          status INTEGER NOT NULL,
          stream TEXT NOT NULL,
          entry_id TEXT NOT NULL,
          major INTEGER NULL,
          direct INTEGER NOT NULL,
          last_error TEXT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fanout_due ON fanout_jobs(status, next_attempt_at_ms);
        "#,
    )?;
    Ok(())
}

pub(crate) fn next_backoff(attempt: u32, base_secs: u64, max_secs: u64) -> Duration {
    let pow = attempt.saturating_sub(1).min(20);
    let secs = base_secs.saturating_mul(1u64 << pow).min(max_secs);
    // jitter 0..1000ms
    let mut b = [0u8; 2];
    OsRng.fill_bytes(&mut b);
    let jitter_ms = u16::from_le_bytes(b) as u64 % 1000;
    Duration::from_secs(secs) + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::next_backoff;
    use std::time::Duration;

    #[test]
    fn backoff_doubles_and_caps() {
        let first = next_backoff(1, 5, 3600);
        assert!(first >= Duration::from_secs(5) && first < Duration::from_secs(6));
        let third = next_backoff(3, 5, 3600);
        assert!(third >= Duration::from_secs(20) && third < Duration::from_secs(21));
        let capped = next_backoff(30, 5, 3600);
        assert!(capped >= Duration::from_secs(3600) && capped < Duration::from_secs(3601));
    }
}
