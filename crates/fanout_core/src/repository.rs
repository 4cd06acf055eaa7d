/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use fanout_protocol::{Activity, ActivityObject};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::ids::now_ms;
use crate::stream_store::{
    delete_entry, init_schema, insert_entry, newest_entries, open_conn, EntryTags, StreamKey,
};

/// Canonical activity and object documents, registered users and the
/// per-object reaction counters.
#[derive(Clone)]
pub struct Repository {
    path: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Likes,
    Shares,
    Replies,
}

impl AggregateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Likes => "likes",
            Self::Shares => "shares",
            Self::Replies => "replies",
        }
    }

    pub fn stream_key(&self, object_id: &str) -> StreamKey {
        let id = object_id.to_string();
        match self {
            Self::Likes => StreamKey::Likes(id),
            Self::Shares => StreamKey::Shares(id),
            Self::Replies => StreamKey::Replies(id),
        }
    }
}

#[derive(Clone, Debug)]
pub struct StoredActivity {
    pub activity: Activity,
    /// Persons the verb itself addresses (followed user, reacted-to author, ...).
    pub structural: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct StoredObject {
    pub object: ActivityObject,
    pub author: Option<String>,
    /// Activity that created the object; its audience governs who may read it.
    pub created_by: Option<String>,
    pub deleted: bool,
}

pub enum ObjectWrite<'a> {
    Keep,
    Insert(&'a ActivityObject),
    Replace(&'a ActivityObject),
    Tombstone(&'a ActivityObject),
}

/// Graph and roll-up changes an activity causes, committed with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEdit {
    Append { key: StreamKey, entry_id: String },
    Remove { key: StreamKey, entry_id: String },
    /// Adds or withdraws `entry_id` in an object's roll-up stream and
    /// adjusts its counter when the stream changed.
    Reaction {
        object_id: String,
        kind: AggregateKind,
        entry_id: String,
        add: bool,
    },
}

pub struct NewActivity<'a> {
    pub activity: &'a Activity,
    pub structural: &'a [String],
    pub object: ObjectWrite<'a>,
    pub feed: &'a StreamKey,
    pub major: bool,
    pub edits: &'a [StreamEdit],
    pub preview_bound: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregateRow {
    pub total_items: u64,
    pub preview: Vec<String>,
}

impl Repository {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let conn = open_conn(&path)?;
        init_schema(&conn)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
              nickname TEXT PRIMARY KEY,
              person_id TEXT NOT NULL UNIQUE,
              created_at_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS activities (
              activity_id TEXT PRIMARY KEY,
              verb TEXT NOT NULL,
              actor_id TEXT NOT NULL,
              object_id TEXT NULL,
              created_at_ms INTEGER NOT NULL,
              activity_json BLOB NOT NULL,
              structural_json BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_activities_object ON activities(object_id);

            CREATE TABLE IF NOT EXISTS objects (
              object_id TEXT PRIMARY KEY,
              object_type TEXT NOT NULL,
              author_id TEXT NULL,
              created_by TEXT NULL,
              created_at_ms INTEGER NOT NULL,
              updated_at_ms INTEGER NOT NULL,
              deleted INTEGER NOT NULL DEFAULT 0,
              object_json BLOB NOT NULL
            );

            -- Reaction counters live apart from the object document so a
            -- favorite never rewrites the object row.
            CREATE TABLE IF NOT EXISTS aggregates (
              object_id TEXT NOT NULL,
              kind TEXT NOT NULL,
              total_items INTEGER NOT NULL,
              items_json BLOB NOT NULL,
              updated_at_ms INTEGER NOT NULL,
              PRIMARY KEY(object_id, kind)
            );
            "#,
        )?;
        Ok(Self {
            path,
            locks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn health_check(&self) -> Result<()> {
        let conn = open_conn(&self.path)?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    /// Registers a user with its person profile. Returns `false` if the
    /// nickname is taken.
    pub fn insert_user(&self, nickname: &str, profile: &ActivityObject) -> Result<bool> {
        let now = now_ms();
        let mut conn = open_conn(&self.path)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "INSERT OR IGNORE INTO users(nickname, person_id, created_at_ms) VALUES (?1, ?2, ?3)",
            params![nickname, profile.id, now],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        tx.execute(
            r#"
            INSERT INTO objects(object_id, object_type, author_id, created_by, created_at_ms, updated_at_ms, deleted, object_json)
            VALUES (?1, ?2, NULL, NULL, ?3, ?3, 0, ?4)
            "#,
            params![profile.id, profile.object_type, now, serde_json::to_vec(&storable(profile))?],
        )?;
        tx.commit()?;
        Ok(true)
    }

    pub fn user_exists(&self, nickname: &str) -> Result<bool> {
        let conn = open_conn(&self.path)?;
        let found: Option<String> = conn
            .query_row(
                "SELECT nickname FROM users WHERE nickname = ?1",
                params![nickname],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_users(&self) -> Result<Vec<String>> {
        let conn = open_conn(&self.path)?;
        let mut stmt = conn.prepare("SELECT nickname FROM users ORDER BY created_at_ms ASC")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Writes the activity, its object change, the actor's feed entry and
    /// every edit in one transaction. Objects whose counters change are
    /// locked for the duration.
    pub fn persist(&self, rec: &NewActivity<'_>) -> Result<()> {
        let reacted: BTreeSet<&str> = rec
            .edits
            .iter()
            .filter_map(|e| match e {
                StreamEdit::Reaction { object_id, .. } => Some(object_id.as_str()),
                _ => None,
            })
            .collect();
        self.with_object_locks(reacted, || self.persist_locked(rec))
    }

    fn persist_locked(&self, rec: &NewActivity<'_>) -> Result<()> {
        let now = now_ms();
        let activity = rec.activity;
        let actor_id = activity
            .actor
            .as_ref()
            .map(|a| a.id.as_str())
            .context("activity without actor")?;
        let object_id = activity.object.as_ref().map(|o| o.id.as_str());

        let mut conn = open_conn(&self.path)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            r#"
            INSERT INTO activities(activity_id, verb, actor_id, object_id, created_at_ms, activity_json, structural_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                activity.id,
                activity.verb,
                actor_id,
                object_id,
                now,
                serde_json::to_vec(activity)?,
                serde_json::to_vec(rec.structural)?
            ],
        )?;

        match rec.object {
            ObjectWrite::Keep => {}
            ObjectWrite::Insert(obj) => {
                let author = obj.author.as_ref().map(|a| a.id.as_str());
                tx.execute(
                    r#"
                    INSERT INTO objects(object_id, object_type, author_id, created_by, created_at_ms, updated_at_ms, deleted, object_json)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0, ?6)
                    "#,
                    params![obj.id, obj.object_type, author, activity.id, now, serde_json::to_vec(&storable(obj))?],
                )?;
            }
            ObjectWrite::Replace(obj) => {
                tx.execute(
                    "UPDATE objects SET object_json = ?2, updated_at_ms = ?3 WHERE object_id = ?1",
                    params![obj.id, serde_json::to_vec(&storable(obj))?, now],
                )?;
            }
            ObjectWrite::Tombstone(obj) => {
                tx.execute(
                    "UPDATE objects SET object_json = ?2, updated_at_ms = ?3, deleted = 1 WHERE object_id = ?1",
                    params![obj.id, serde_json::to_vec(&storable(obj))?, now],
                )?;
            }
        }

        insert_entry(&tx, &rec.feed.owner(), &activity.id, EntryTags::class(rec.major))?;
        for edit in rec.edits {
            match edit {
                StreamEdit::Append { key, entry_id } => {
                    insert_entry(&tx, &key.owner(), entry_id, EntryTags::untagged())?;
                }
                StreamEdit::Remove { key, entry_id } => {
                    delete_entry(&tx, &key.owner(), entry_id)?;
                }
                StreamEdit::Reaction {
                    object_id,
                    kind,
                    entry_id,
                    add,
                } => {
                    apply_reaction(&tx, object_id, *kind, entry_id, *add, rec.preview_bound)?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_activity(&self, activity_id: &str) -> Result<Option<StoredActivity>> {
        let conn = open_conn(&self.path)?;
        let row: Option<(Vec<u8>, Vec<u8>)> = conn
            .query_row(
                "SELECT activity_json, structural_json FROM activities WHERE activity_id = ?1",
                params![activity_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((activity_json, structural_json)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredActivity {
            activity: serde_json::from_slice(&activity_json).context("decode activity")?,
            structural: serde_json::from_slice(&structural_json).unwrap_or_default(),
        }))
    }

    pub fn get_object(&self, object_id: &str) -> Result<Option<StoredObject>> {
        let conn = open_conn(&self.path)?;
        let row: Option<(Vec<u8>, Option<String>, Option<String>, i64)> = conn
            .query_row(
                "SELECT object_json, author_id, created_by, deleted FROM objects WHERE object_id = ?1",
                params![object_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;
        let Some((json, author, created_by, deleted)) = row else {
            return Ok(None);
        };
        Ok(Some(StoredObject {
            object: serde_json::from_slice(&json).context("decode object")?,
            author,
            created_by,
            deleted: deleted != 0,
        }))
    }

    pub fn aggregate(&self, object_id: &str, kind: AggregateKind) -> Result<AggregateRow> {
        let conn = open_conn(&self.path)?;
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row(
                "SELECT total_items, items_json FROM aggregates WHERE object_id = ?1 AND kind = ?2",
                params![object_id, kind.as_str()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(match row {
            Some((total, json)) => AggregateRow {
                total_items: total.max(0) as u64,
                preview: serde_json::from_slice(&json).unwrap_or_default(),
            },
            None => AggregateRow::default(),
        })
    }

    /// Runs `f` holding the per-object locks of `object_ids`, taken in
    /// order. Entries nobody else holds are dropped from the map afterwards.
    fn with_object_locks<T>(&self, object_ids: BTreeSet<&str>, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let held: Vec<(String, Arc<Mutex<()>>)> = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            object_ids
                .into_iter()
                .map(|id| {
                    let lock = locks
                        .entry(id.to_string())
                        .or_insert_with(|| Arc::new(Mutex::new(())))
                        .clone();
                    (id.to_string(), lock)
                })
                .collect()
        };
        let guards: Vec<_> = held
            .iter()
            .map(|(_, lock)| lock.lock().unwrap_or_else(|e| e.into_inner()))
            .collect();
        let out = f();
        drop(guards);

        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        for (id, lock) in held {
            drop(lock);
            if locks.get(&id).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(&id);
            }
        }
        out
    }
}

fn apply_reaction(
    conn: &Connection,
    object_id: &str,
    kind: AggregateKind,
    entry_id: &str,
    add: bool,
    preview_bound: usize,
) -> Result<()> {
    let owner = kind.stream_key(object_id).owner();
    let changed = if add {
        insert_entry(conn, &owner, entry_id, EntryTags::untagged())?
    } else {
        delete_entry(conn, &owner, entry_id)?
    };
    if changed {
        let delta: i64 = if add { 1 } else { -1 };
        let preview = newest_entries(conn, &owner, preview_bound)?;
        conn.execute(
            r#"
            INSERT INTO aggregates(object_id, kind, total_items, items_json, updated_at_ms)
            VALUES (?1, ?2, MAX(?3, 0), ?4, ?5)
            ON CONFLICT(object_id, kind) DO UPDATE SET
              total_items = MAX(aggregates.total_items + ?3, 0),
              items_json = excluded.items_json,
              updated_at_ms = excluded.updated_at_ms
            "#,
            params![object_id, kind.as_str(), delta, serde_json::to_vec(&preview)?, now_ms()],
        )?;
    }
    Ok(())
}

/// Drops the fields that are computed at read time.
fn storable(obj: &ActivityObject) -> ActivityObject {
    let mut out = obj.clone();
    out.likes = None;
    out.shares = None;
    out.replies = None;
    out.liked = None;
    out.pump_io = None;
    out
}
