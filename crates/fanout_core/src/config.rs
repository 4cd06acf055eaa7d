/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub bind: String,
    pub public_base_url: String,
    pub data_dir: Option<PathBuf>,
    /// Required on administrative calls (user registration). Empty disables the check.
    pub internal_token: String,
    pub max_body_bytes: usize,
    pub http_timeout_secs: u64,
    pub stream: StreamSettings,
    pub queue: QueueSettings,
    pub hub: HubSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            public_base_url: "http://127.0.0.1:8080".to_string(),
            data_dir: None,
            internal_token: String::new(),
            max_body_bytes: 1024 * 1024,
            http_timeout_secs: 15,
            stream: StreamSettings::default(),
            queue: QueueSettings::default(),
            hub: HubSettings::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub default_count: usize,
    pub max_count: usize,
    pub preview_bound: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            default_count: 20,
            max_count: 200,
            preview_bound: 4,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub poll_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_backoff_secs: 5,
            max_backoff_secs: 3600,
            poll_secs: 2,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub enabled: bool,
    pub publish_attempts: u32,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            publish_attempts: 3,
        }
    }
}

impl EngineConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: EngineConfig = serde_json::from_str(text).context("decode EngineConfig")?;
        Ok(cfg.normalized())
    }

    /// Loads `path` if it exists. A missing file is only an error when the
    /// path was asked for explicitly.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        let cfg = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_json(&text)
                .with_context(|| format!("config: {}", path.display()))?,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("read config: {}", path.display()));
            }
        };
        Ok(cfg.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_nonempty("FANOUT_BIND") {
            self.bind = v;
        }
        if let Some(v) = env_nonempty("FANOUT_PUBLIC_BASE_URL") {
            self.public_base_url = v;
        }
        if let Some(v) = env_nonempty("FANOUT_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env_nonempty("FANOUT_INTERNAL_TOKEN") {
            self.internal_token = v;
        }
        self.normalized()
    }

    pub fn normalized(mut self) -> Self {
        self.public_base_url = self.public_base_url.trim().trim_end_matches('/').to_string();
        self.internal_token = self.internal_token.trim().to_string();
        self.max_body_bytes = self.max_body_bytes.clamp(4 * 1024, 64 * 1024 * 1024);
        self.http_timeout_secs = self.http_timeout_secs.clamp(1, 300);
        self.stream.max_count = self.stream.max_count.clamp(1, 1000);
        self.stream.default_count = self.stream.default_count.clamp(1, self.stream.max_count);
        self.stream.preview_bound = self.stream.preview_bound.clamp(1, 50);
        self.queue.max_attempts = self.queue.max_attempts.clamp(1, 100);
        self.queue.base_backoff_secs = self.queue.base_backoff_secs.clamp(1, 3600);
        self.queue.max_backoff_secs = self
            .queue
            .max_backoff_secs
            .max(self.queue.base_backoff_secs);
        self.queue.poll_secs = self.queue.poll_secs.clamp(1, 60);
        self.hub.publish_attempts = self.hub.publish_attempts.clamp(1, 5);
        self
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(p) => Ok(p.clone()),
            None => default_data_dir(),
        }
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        let dir = self.data_dir()?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create data dir: {}", dir.display()))?;
        Ok(dir.join("fanout.db"))
    }
}

pub fn default_data_dir() -> Result<PathBuf> {
    let proj = ProjectDirs::from("org", "fanout", "Fanout")
        .context("unable to determine platform data dir")?;
    Ok(proj.data_local_dir().to_path_buf())
}

fn default_config_path() -> Result<PathBuf> {
    let proj = ProjectDirs::from("org", "fanout", "Fanout")
        .context("unable to determine platform config dir")?;
    Ok(proj.config_dir().join("config.json"))
}

/// Resolves the config file: `--config <path>`, then `FANOUT_CONFIG`, then
/// the platform default. The flag tells whether the path was explicit.
pub fn parse_config_path(args: impl IntoIterator<Item = String>) -> Result<(PathBuf, bool)> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return Ok((PathBuf::from(path), true));
            }
            return Err(anyhow::anyhow!("--config requires a path"));
        }
    }
    if let Some(path) = env_nonempty("FANOUT_CONFIG") {
        return Ok((PathBuf::from(path), true));
    }
    Ok((default_config_path()?, false))
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = EngineConfig::from_json(r#"{"bind":"0.0.0.0:9000","stream":{"max_count":50}}"#)
            .unwrap();
        assert_eq!(cfg.bind, "0.0.0.0:9000");
        assert_eq!(cfg.stream.max_count, 50);
        assert_eq!(cfg.stream.default_count, 20);
        assert_eq!(cfg.queue.max_attempts, 10);
    }

    #[test]
    fn values_are_clamped() {
        let cfg = EngineConfig::from_json(
            r#"{"public_base_url":"https://h.example/","stream":{"default_count":500,"max_count":100}}"#,
        )
        .unwrap();
        assert_eq!(cfg.public_base_url, "https://h.example");
        assert_eq!(cfg.stream.default_count, 100);
    }

    #[test]
    fn config_flag_wins() {
        let args = vec!["--config".to_string(), "/tmp/x.json".to_string()];
        let (path, explicit) = parse_config_path(args).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/x.json"));
        assert!(explicit);
        assert!(parse_config_path(vec!["--config".to_string()]).is_err());
    }
}
