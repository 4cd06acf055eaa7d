/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use fanout_protocol::{ActivityObject, Link, Links, UserInfo};
use serde_json::json;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{EngineConfig, StreamSettings};
use crate::error::{EngineError, EngineResult};
use crate::fanout_queue::FanoutQueue;
use crate::hub::HubEvent;
use crate::ids::{now_rfc3339, Ids};
use crate::repository::Repository;
use crate::stream_store::StreamStore;

/// Shared state behind every distribution and read operation.
///
/// Operations are blocking (SQLite); async callers run them on
/// `spawn_blocking`.
pub struct Engine {
    pub(crate) settings: StreamSettings,
    pub(crate) ids: Ids,
    pub(crate) store: StreamStore,
    pub(crate) repo: Repository,
    pub(crate) queue: FanoutQueue,
    hub_tx: Option<mpsc::UnboundedSender<HubEvent>>,
}

impl Engine {
    pub fn open(cfg: &EngineConfig) -> Result<Self> {
        let db_path = cfg.db_path()?;
        Self::open_at(&db_path, &cfg.public_base_url, cfg.stream)
    }

    pub fn open_at(db_path: &Path, public_base_url: &str, settings: StreamSettings) -> Result<Self> {
        let store = StreamStore::open(db_path)?;
        let repo = Repository::open(db_path)?;
        let queue = FanoutQueue::open(db_path)?;
        info!("engine db: {}", db_path.display());
        Ok(Self {
            settings,
            ids: Ids::new(public_base_url),
            store,
            repo,
            queue,
            hub_tx: None,
        })
    }

    pub fn with_hub(mut self, tx: mpsc::UnboundedSender<HubEvent>) -> Self {
        self.hub_tx = Some(tx);
        self
    }

    pub fn ids(&self) -> &Ids {
        &self.ids
    }

    pub fn store(&self) -> &StreamStore {
        &self.store
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn queue(&self) -> &FanoutQueue {
        &self.queue
    }

    pub fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub fn register_user(&self, nickname: &str, display_name: Option<&str>) -> EngineResult<UserInfo> {
        let nickname = normalize_nickname(nickname)?;
        let profile = self.person_profile(&nickname, display_name);
        if !self.repo.insert_user(&nickname, &profile)? {
            return Err(EngineError::AlreadyExists(format!("user {nickname}")));
        }
        info!("registered user {nickname}");
        Ok(UserInfo { nickname, profile })
    }

    pub fn get_user(&self, nickname: &str) -> EngineResult<UserInfo> {
        self.require_user(nickname)?;
        let profile = self
            .repo
            .get_object(&self.ids.person_id(nickname))?
            .map(|s| s.object)
            .ok_or_else(|| EngineError::NotFound(format!("profile of {nickname}")))?;
        Ok(UserInfo {
            nickname: nickname.to_string(),
            profile,
        })
    }

    pub fn require_user(&self, nickname: &str) -> EngineResult<()> {
        if self.repo.user_exists(nickname)? {
            Ok(())
        } else {
            Err(EngineError::NotFound(format!("user {nickname}")))
        }
    }

    /// Nickname of a registered local person, if `person_id` is one.
    pub(crate) fn local_user(&self, person_id: &str) -> EngineResult<Option<String>> {
        let Some(nick) = self.ids.local_nickname(person_id) else {
            return Ok(None);
        };
        if self.repo.user_exists(nick)? {
            Ok(Some(nick.to_string()))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn notify_hub(&self, event: HubEvent) {
        let Some(tx) = &self.hub_tx else {
            return;
        };
        if tx.send(event).is_err() {
            debug!("hub worker gone; dropping notification");
        }
    }

    fn person_profile(&self, nickname: &str, display_name: Option<&str>) -> ActivityObject {
        let mut extra = serde_json::Map::new();
        extra.insert("preferredUsername".to_string(), json!(nickname));
        extra.insert("followers".to_string(), json!({ "url": self.ids.followers_url(nickname) }));
        extra.insert("following".to_string(), json!({ "url": self.ids.following_url(nickname) }));
        ActivityObject {
            id: self.ids.person_id(nickname),
            object_type: "person".to_string(),
            display_name: Some(
                display_name
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .unwrap_or(nickname)
                    .to_string(),
            ),
            published: Some(now_rfc3339()),
            links: Some(Links {
                self_link: Some(Link::new(self.ids.profile_url(nickname))),
                ..Default::default()
            }),
            extra,
            ..Default::default()
        }
    }
}

fn normalize_nickname(input: &str) -> EngineResult<String> {
    let nick = input.trim().to_ascii_lowercase();
    let valid = !nick.is_empty()
        && nick.len() <= 64
        && nick.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if valid {
        Ok(nick)
    } else {
        Err(EngineError::validation(format!("invalid nickname: {input}")))
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_nickname;

    #[test]
    fn nicknames_are_case_folded_and_checked() {
        assert_eq!(normalize_nickname(" Alice_01 ").unwrap(), "alice_01");
        assert!(normalize_nickname("").is_err());
        assert!(normalize_nickname("bob smith").is_err());
        assert!(normalize_nickname("eve@host").is_err());
    }
}
