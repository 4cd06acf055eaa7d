/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use crate::ids::now_ms;

/// Append-only per-owner logs of entry references.
///
/// Every row gets a value from one global autoincrement sequence, so order
/// inside any stream is insertion order. The derived user streams
/// (`feed/major`, `inbox/direct/minor`, ...) are filters over the `major`
/// and `direct` tags of the parent log's rows, which makes an append to the
/// parent and to its variants a single insert.
#[derive(Clone)]
pub struct StreamStore {
    path: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamFilter {
    All,
    Major,
    Minor,
    Direct,
    DirectMajor,
    DirectMinor,
}

impl StreamFilter {
    fn sql(&self) -> &'static str {
        match self {
            Self::All => "",
            Self::Major => " AND major = 1",
            Self::Minor => " AND major = 0",
            Self::Direct => " AND direct = 1",
            Self::DirectMajor => " AND direct = 1 AND major = 1",
            Self::DirectMinor => " AND direct = 1 AND major = 0",
        }
    }

    fn path_suffix(&self) -> &'static str {
        match self {
            Self::All => "",
            Self::Major => "/major",
            Self::Minor => "/minor",
            Self::Direct => "/direct",
            Self::DirectMajor => "/direct/major",
            Self::DirectMinor => "/direct/minor",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamKey {
    Feed { user: String, filter: StreamFilter },
    Inbox { user: String, filter: StreamFilter },
    Followers(String),
    Following(String),
    /// Lists owned by a user.
    Lists(String),
    /// Members of a list, keyed by the list object id.
    Members(String),
    Likes(String),
    Shares(String),
    Replies(String),
}

impl StreamKey {
    pub fn feed(user: &str) -> Self {
        Self::Feed {
            user: user.to_string(),
            filter: StreamFilter::All,
        }
    }

    pub fn inbox(user: &str) -> Self {
        Self::Inbox {
            user: user.to_string(),
            filter: StreamFilter::All,
        }
    }

    /// Parses the part of a user URL after the nickname (`feed/major`,
    /// `inbox/direct`, `followers`, ...).
    pub fn for_user_path(user: &str, rest: &[&str]) -> Option<Self> {
        let user = user.to_string();
        let key = match rest {
            ["feed"] => Self::Feed { user, filter: StreamFilter::All },
            ["feed", "major"] => Self::Feed { user, filter: StreamFilter::Major },
            ["feed", "minor"] => Self::Feed { user, filter: StreamFilter::Minor },
            ["inbox"] => Self::Inbox { user, filter: StreamFilter::All },
            ["inbox", "major"] => Self::Inbox { user, filter: StreamFilter::Major },
            ["inbox", "minor"] => Self::Inbox { user, filter: StreamFilter::Minor },
            ["inbox", "direct"] => Self::Inbox { user, filter: StreamFilter::Direct },
            ["inbox", "direct", "major"] => Self::Inbox { user, filter: StreamFilter::DirectMajor },
            ["inbox", "direct", "minor"] => Self::Inbox { user, filter: StreamFilter::DirectMinor },
            ["followers"] => Self::Followers(user),
            ["following"] => Self::Following(user),
            ["lists"] => Self::Lists(user),
            _ => return None,
        };
        Some(key)
    }

    /// Name of the underlying log.
    pub fn owner(&self) -> String {
        match self {
            Self::Feed { user, .. } => format!("feed:{user}"),
            Self::Inbox { user, .. } => format!("inbox:{user}"),
            Self::Followers(u) => format!("followers:{u}"),
            Self::Following(u) => format!("following:{u}"),
            Self::Lists(u) => format!("lists:{u}"),
            Self::Members(id) => format!("members:{id}"),
            Self::Likes(id) => format!("likes:{id}"),
            Self::Shares(id) => format!("shares:{id}"),
            Self::Replies(id) => format!("replies:{id}"),
        }
    }

    pub fn filter(&self) -> StreamFilter {
        match self {
            Self::Feed { filter, .. } | Self::Inbox { filter, .. } => *filter,
            _ => StreamFilter::All,
        }
    }

    /// Public URL of the stream under `base`.
    pub fn url(&self, base: &str) -> String {
        match self {
            Self::Feed { user, filter } => {
                format!("{base}/api/user/{user}/feed{}", filter.path_suffix())
            }
            Self::Inbox { user, filter } => {
                format!("{base}/api/user/{user}/inbox{}", filter.path_suffix())
            }
            Self::Followers(u) => format!("{base}/api/user/{u}/followers"),
            Self::Following(u) => format!("{base}/api/user/{u}/following"),
            Self::Lists(u) => format!("{base}/api/user/{u}/lists"),
            Self::Members(id) => format!("{id}/members"),
            Self::Likes(id) => format!("{id}/likes"),
            Self::Shares(id) => format!("{id}/shares"),
            Self::Replies(id) => format!("{id}/replies"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntryTags {
    pub major: Option<bool>,
    pub direct: bool,
}

impl EntryTags {
    pub fn untagged() -> Self {
        Self::default()
    }

    pub fn class(major: bool) -> Self {
        Self {
            major: Some(major),
            direct: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamEntry {
    pub seq: i64,
    pub entry_id: String,
}

impl StreamStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = open_conn(&path)?;
        init_schema(&conn)?;
        Ok(Self { path })
    }

    /// Appends to the key's log. Returns `false` when the entry was already there.
    pub fn append(&self, key: &StreamKey, entry_id: &str, tags: EntryTags) -> Result<bool> {
        self.append_owner(&key.owner(), entry_id, tags)
    }

    pub fn append_owner(&self, owner: &str, entry_id: &str, tags: EntryTags) -> Result<bool> {
        let conn = open_conn(&self.path)?;
        insert_entry(&conn, owner, entry_id, tags)
    }

    pub fn remove(&self, key: &StreamKey, entry_id: &str) -> Result<bool> {
        let conn = open_conn(&self.path)?;
        delete_entry(&conn, &key.owner(), entry_id)
    }

    /// Sequence number of `entry_id` in the (possibly filtered) stream.
    pub fn position(&self, key: &StreamKey, entry_id: &str) -> Result<Option<i64>> {
        let conn = open_conn(&self.path)?;
        let sql = format!(
            "SELECT seq FROM stream_entries WHERE stream = ?1 AND entry_id = ?2{}",
            key.filter().sql()
        );
        conn.query_row(&sql, params![key.owner(), entry_id], |r| r.get(0))
            .optional()
            .map_err(Into::into)
    }

    pub fn contains(&self, key: &StreamKey, entry_id: &str) -> Result<bool> {
        Ok(self.position(key, entry_id)?.is_some())
    }

    pub fn count(&self, key: &StreamKey) -> Result<u64> {
        let conn = open_conn(&self.path)?;
        let sql = format!(
            "SELECT COUNT(*) FROM stream_entries WHERE stream = ?1{}",
            key.filter().sql()
        );
        let n: i64 = conn.query_row(&sql, params![key.owner()], |r| r.get(0))?;
        Ok(n.max(0) as u64)
    }

    /// Entries strictly older than `cursor` (all entries when `None`), newest first.
    pub fn before(&self, key: &StreamKey, cursor: Option<i64>, limit: usize) -> Result<Vec<StreamEntry>> {
        let conn = open_conn(&self.path)?;
        let sql = format!(
            "SELECT seq, entry_id FROM stream_entries WHERE stream = ?1 AND seq < ?2{} ORDER BY seq DESC LIMIT ?3",
            key.filter().sql()
        );
        query_entries(&conn, &sql, params![key.owner(), cursor.unwrap_or(i64::MAX), limit as i64])
    }

    /// Entries strictly newer than `cursor`, oldest first.
    pub fn after(&self, key: &StreamKey, cursor: i64, limit: usize) -> Result<Vec<StreamEntry>> {
        let conn = open_conn(&self.path)?;
        let sql = format!(
            "SELECT seq, entry_id FROM stream_entries WHERE stream = ?1 AND seq > ?2{} ORDER BY seq ASC LIMIT ?3",
            key.filter().sql()
        );
        query_entries(&conn, &sql, params![key.owner(), cursor, limit as i64])
    }

    /// Newest-first slice starting `offset` entries from the head.
    pub fn slice(&self, key: &StreamKey, offset: usize, limit: usize) -> Result<Vec<StreamEntry>> {
        let conn = open_conn(&self.path)?;
        let sql = format!(
            "SELECT seq, entry_id FROM stream_entries WHERE stream = ?1{} ORDER BY seq DESC LIMIT ?2 OFFSET ?3",
            key.filter().sql()
        );
        query_entries(&conn, &sql, params![key.owner(), limit as i64, offset as i64])
    }

    pub fn has_before(&self, key: &StreamKey, seq: i64) -> Result<bool> {
        Ok(!self.before(key, Some(seq), 1)?.is_empty())
    }

    pub fn has_after(&self, key: &StreamKey, seq: i64) -> Result<bool> {
        Ok(!self.after(key, seq, 1)?.is_empty())
    }

    /// Every entry id, newest first. Used to expand membership streams.
    pub fn members(&self, key: &StreamKey) -> Result<Vec<String>> {
        Ok(self
            .before(key, None, i64::MAX as usize)?
            .into_iter()
            .map(|e| e.entry_id)
            .collect())
    }
}

pub(crate) fn open_conn(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).with_context(|| format!("open db: {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(10))?;
    Ok(conn)
}

pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS stream_entries (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          stream TEXT NOT NULL,
          entry_id TEXT NOT NULL,
          major INTEGER NULL,
          direct INTEGER NOT NULL DEFAULT 0,
          created_at_ms INTEGER NOT NULL,
          UNIQUE(stream, entry_id)
        );
        CREATE INDEX IF NOT EXISTS idx_stream_seq ON stream_entries(stream, seq);
        "#,
    )?;
    Ok(())
}

pub(crate) fn insert_entry(conn: &Connection, owner: &str, entry_id: &str, tags: EntryTags) -> Result<bool> {
    let major = tags.major.map(i64::from);
    let changed = conn.execute(
        "INSERT OR IGNORE INTO stream_entries(stream, entry_id, major, direct, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![owner, entry_id, major, tags.direct as i64, now_ms()],
    )?;
    Ok(changed > 0)
}

pub(crate) fn delete_entry(conn: &Connection, owner: &str, entry_id: &str) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM stream_entries WHERE stream = ?1 AND entry_id = ?2",
        params![owner, entry_id],
    )?;
    Ok(changed > 0)
}

pub(crate) fn newest_entries(conn: &Connection, owner: &str, limit: usize) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT entry_id FROM stream_entries WHERE stream = ?1 ORDER BY seq DESC LIMIT ?2")?;
    let rows = stmt.query_map(params![owner, limit as i64], |r| r.get::<_, String>(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn query_entries(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<StreamEntry>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(StreamEntry {
            seq: row.get(0)?,
            entry_id: row.get(1)?,
        });
    }
    Ok(out)
}
