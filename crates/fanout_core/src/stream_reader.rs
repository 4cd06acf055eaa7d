/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use fanout_protocol::{Link, Links, StreamItem, StreamPage};
use std::collections::HashMap;
use tracing::warn;

use crate::config::StreamSettings;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::stream_store::{StreamEntry, StreamKey};
use crate::visibility::Viewer;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageParams {
    pub before: Option<String>,
    pub since: Option<String>,
    pub offset: Option<usize>,
    pub count: usize,
}

impl PageParams {
    pub fn first(count: usize) -> Self {
        Self {
            before: None,
            since: None,
            offset: None,
            count,
        }
    }

    pub fn from_query(query: &HashMap<String, String>, settings: &StreamSettings) -> EngineResult<Self> {
        let number = |name: &str| -> EngineResult<Option<usize>> {
            match query.get(name) {
                None => Ok(None),
                Some(v) => v
                    .trim()
                    .parse::<usize>()
                    .map(Some)
                    .map_err(|_| EngineError::validation(format!("{name} must be a non-negative integer"))),
            }
        };
        let cursor = |name: &str| -> EngineResult<Option<String>> {
            match query.get(name).map(|v| v.trim()) {
                None => Ok(None),
                Some("") => Err(EngineError::validation(format!("{name} must name an entry"))),
                Some(v) => Ok(Some(v.to_string())),
            }
        };

        let count = number("count")?.unwrap_or(settings.default_count);
        if count > settings.max_count {
            return Err(EngineError::validation(format!("count may not exceed {}", settings.max_count)));
        }
        let offset = number("offset")?;
        let before = cursor("before")?;
        let since = cursor("since")?;
        if before.is_some() && since.is_some() {
            return Err(EngineError::validation("before and since are exclusive"));
        }
        if offset.is_some() && (before.is_some() || since.is_some()) {
            return Err(EngineError::validation("offset cannot be combined with before or since"));
        }
        Ok(Self {
            before,
            since,
            offset,
            count,
        })
    }

    fn query_string(&self) -> String {
        let mut parts = vec![format!("count={}", self.count)];
        if let Some(v) = &self.before {
            parts.push(format!("before={}", urlencoding::encode(v)));
        }
        if let Some(v) = &self.since {
            parts.push(format!("since={}", urlencoding::encode(v)));
        }
        if let Some(v) = self.offset {
            parts.push(format!("offset={v}"));
        }
        parts.join("&")
    }
}

/// Lowest and highest raw entries a read looked at, visible or not.
#[derive(Default)]
struct Scanned {
    lowest: Option<StreamEntry>,
    highest: Option<StreamEntry>,
}

impl Scanned {
    fn saw(&mut self, e: &StreamEntry) {
        if self.lowest.as_ref().map_or(true, |l| e.seq < l.seq) {
            self.lowest = Some(e.clone());
        }
        if self.highest.as_ref().map_or(true, |h| e.seq > h.seq) {
            self.highest = Some(e.clone());
        }
    }
}

impl Engine {
    /// One page of `key` as `viewer` sees it, newest first.
    pub fn read_stream(
        &self,
        key: &StreamKey,
        params: &PageParams,
        viewer: &Viewer,
    ) -> EngineResult<StreamPage<StreamItem>> {
        self.check_stream_access(key, viewer)?;
        let total = self.store.count(key)?;
        let url = key.url(self.ids.base());
        let batch = params.count.max(20);
        let mut items = Vec::new();
        let mut scanned = Scanned::default();

        if let Some(since) = &params.since {
            let mut cursor = self.cursor_position(key, since)?;
            'scan: while params.count > 0 {
                let entries = self.store.after(key, cursor, batch)?;
                if entries.is_empty() {
                    break;
                }
                for e in entries {
                    cursor = e.seq;
                    scanned.saw(&e);
                    if let Some(item) = self.materialize(key, &e.entry_id, viewer)? {
                        items.push(item);
                        if items.len() == params.count {
                            break 'scan;
                        }
                    }
                }
            }
            items.reverse();
        } else {
            let start = match (&params.before, params.offset) {
                (Some(before), _) => Some(Some(self.cursor_position(key, before)?)),
                (None, Some(offset)) if offset > 0 => {
                    // Inclusive start at the entry `offset` places from the head.
                    self.store
                        .slice(key, offset, 1)?
                        .first()
                        .map(|e| Some(e.seq.saturating_add(1)))
                }
                _ => Some(None),
            };
            if let Some(mut cursor) = start {
                'scan: while params.count > 0 {
                    let entries = self.store.before(key, cursor, batch)?;
                    if entries.is_empty() {
                        break;
                    }
                    for e in entries {
                        cursor = Some(e.seq);
                        scanned.saw(&e);
                        if let Some(item) = self.materialize(key, &e.entry_id, viewer)? {
                            items.push(item);
                            if items.len() == params.count {
                                break 'scan;
                            }
                        }
                    }
                }
            }
        }

        let mut links = Links {
            self_link: Some(Link::new(format!("{url}?{}", params.query_string()))),
            first: Some(Link::new(url.clone())),
            next: None,
            prev: None,
        };
        if let Some(low) = &scanned.lowest {
            if self.store.has_before(key, low.seq)? {
                links.next = Some(Link::new(format!(
                    "{url}?before={}&count={}",
                    urlencoding::encode(&low.entry_id),
                    params.count
                )));
            }
        }
        if let Some(high) = &scanned.highest {
            if self.store.has_after(key, high.seq)? {
                links.prev = Some(Link::new(format!(
                    "{url}?since={}&count={}",
                    urlencoding::encode(&high.entry_id),
                    params.count
                )));
            }
        }

        Ok(StreamPage {
            url,
            total_items: total,
            items,
            links,
        })
    }

    fn cursor_position(&self, key: &StreamKey, entry_id: &str) -> EngineResult<i64> {
        self.store
            .position(key, entry_id)?
            .ok_or_else(|| EngineError::Conflict(format!("{entry_id} is not in this stream")))
    }

    fn check_stream_access(&self, key: &StreamKey, viewer: &Viewer) -> EngineResult<()> {
        match key {
            StreamKey::Inbox { user, .. } => {
                self.require_user(user)?;
                if viewer.nickname() != Some(user.as_str()) {
                    return Err(EngineError::Forbidden);
                }
                Ok(())
            }
            StreamKey::Feed { user, .. }
            | StreamKey::Followers(user)
            | StreamKey::Following(user)
            | StreamKey::Lists(user) => self.require_user(user),
            StreamKey::Members(id) | StreamKey::Likes(id) | StreamKey::Shares(id) | StreamKey::Replies(id) => {
                let stored = self
                    .repo
                    .get_object(id)?
                    .ok_or_else(|| EngineError::NotFound(format!("object {id}")))?;
                if matches!(key, StreamKey::Members(_)) && stored.object.object_type != "collection" {
                    return Err(EngineError::NotFound(format!("list {id}")));
                }
                self.object_access(&stored, viewer)?;
                Ok(())
            }
        }
    }

    /// Resolves one entry through the visibility filter; `None` when the
    /// viewer may not see it.
    fn materialize(&self, key: &StreamKey, entry_id: &str, viewer: &Viewer) -> EngineResult<Option<StreamItem>> {
        let viewed = match key {
            StreamKey::Feed { .. } | StreamKey::Inbox { .. } => {
                let Some(stored) = self.repo.get_activity(entry_id)? else {
                    warn!("stream {} references missing activity {entry_id}", key.owner());
                    return Ok(None);
                };
                self.view_activity(stored, viewer).map(StreamItem::Activity)
            }
            _ => {
                let Some(stored) = self.repo.get_object(entry_id)? else {
                    warn!("stream {} references missing object {entry_id}", key.owner());
                    return Ok(None);
                };
                self.view_object(stored, viewer).map(StreamItem::Object)
            }
        };
        match viewed {
            Ok(item) => Ok(Some(item)),
            Err(EngineError::Forbidden) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
