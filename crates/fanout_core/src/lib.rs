/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod api;
pub mod audience;
pub mod classify;
pub mod config;
pub mod distributor;
pub mod engine;
pub mod error;
pub mod fanout_queue;
pub mod http_retry;
pub mod hub;
pub mod ids;
pub mod repository;
pub mod runtime;
pub mod stream_reader;
pub mod stream_store;
pub mod visibility;

pub use classify::{Class, Endpoint};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use stream_reader::PageParams;
pub use stream_store::{StreamFilter, StreamKey};
pub use visibility::Viewer;

pub use fanout_protocol as protocol;
