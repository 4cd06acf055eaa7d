/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use rand::{rngs::OsRng, RngCore};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Low bits of an activity key reserved for ids minted within one millisecond.
const SEQ_BITS: u32 = 12;

/// Mints and parses the ids and URLs the server hands out.
#[derive(Clone, Debug)]
pub struct Ids {
    base: String,
    host: String,
    last_key: Arc<AtomicU64>,
}

impl Ids {
    pub fn new(public_base_url: &str) -> Self {
        let base = public_base_url.trim().trim_end_matches('/').to_string();
        let host = base
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&base)
            .split('/')
            .next()
            .unwrap_or("")
            .to_string();
        Self {
            base,
            host,
            last_key: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn person_id(&self, nickname: &str) -> String {
        format!("acct:{nickname}@{}", self.host)
    }

    /// Nickname of a local person id; `None` for remote or malformed ids.
    pub fn local_nickname<'a>(&self, person_id: &'a str) -> Option<&'a str> {
        let rest = person_id.strip_prefix("acct:")?;
        let (nick, host) = rest.rsplit_once('@')?;
        if host.eq_ignore_ascii_case(&self.host) && !nick.is_empty() {
            Some(nick)
        } else {
            None
        }
    }

    pub fn profile_url(&self, nickname: &str) -> String {
        format!("{}/api/user/{nickname}/profile", self.base)
    }

    pub fn followers_url(&self, nickname: &str) -> String {
        format!("{}/api/user/{nickname}/followers", self.base)
    }

    pub fn following_url(&self, nickname: &str) -> String {
        format!("{}/api/user/{nickname}/following", self.base)
    }

    /// Activity ids sort in the order they were minted: a fixed-width hex
    /// key (milliseconds, then a counter) followed by a random tail.
    pub fn new_activity_id(&self) -> String {
        let floor = (now_ms().max(0) as u64) << SEQ_BITS;
        let prev = self
            .last_key
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(floor.max(last + 1)))
            .unwrap_or_else(|last| last);
        let key = floor.max(prev + 1);
        let mut tail = [0u8; 4];
        OsRng.fill_bytes(&mut tail);
        format!("{}/api/activity/{key:016x}{}", self.base, hex::encode(tail))
    }

    pub fn activity_id(&self, hex: &str) -> String {
        format!("{}/api/activity/{hex}", self.base)
    }

    pub fn new_object_id(&self, object_type: &str) -> String {
        format!("{}/api/{object_type}/{}", self.base, new_hex_id())
    }

    pub fn object_id(&self, object_type: &str, hex: &str) -> String {
        format!("{}/api/{object_type}/{hex}", self.base)
    }

    /// Splits a local object or activity id into `(type, hex)`.
    pub fn split_local<'a>(&self, id: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = id.strip_prefix(self.base.as_str())?.strip_prefix("/api/")?;
        let (ty, hex) = rest.split_once('/')?;
        if ty.is_empty() || hex.is_empty() || hex.contains('/') || ty == "user" {
            return None;
        }
        Some((ty, hex))
    }

    /// Nickname named by a `/api/user/{nick}/{suffix}` URL.
    pub fn user_collection<'a>(&self, url: &'a str, suffix: &str) -> Option<&'a str> {
        let rest = url.strip_prefix(self.base.as_str())?.strip_prefix("/api/user/")?;
        let (nick, tail) = rest.split_once('/')?;
        (tail == suffix && !nick.is_empty()).then_some(nick)
    }
}

pub fn new_hex_id() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    hex::encode(b)
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

pub fn ms_to_rfc3339(ms: i64) -> Option<String> {
    let secs = ms.checked_div(1000)?;
    let nanos = (ms.rem_euclid(1000) * 1_000_000) as u32;
    let dt = time::OffsetDateTime::from_unix_timestamp(secs).ok()?
        + time::Duration::nanoseconds(nanos as i64);
    dt.format(&time::format_description::well_known::Rfc3339).ok()
}

pub fn now_rfc3339() -> String {
    ms_to_rfc3339(now_ms()).unwrap_or_default()
}
