/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Result;
use fanout_core::config::{parse_config_path, EngineConfig};
use fanout_core::runtime;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    runtime::init_tracing();
    let (cfg_path, explicit) = parse_config_path(std::env::args().skip(1))?;
    info!("fanout service starting");
    info!("config: {}", cfg_path.display());
    let cfg = EngineConfig::load(&cfg_path, explicit)?;

    runtime::run(cfg, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
    })
    .await
}
