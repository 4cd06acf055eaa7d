/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Fan-out retry queue tests.

mod common;

use common::*;
use fanout_core::config::QueueSettings;
use fanout_core::fanout_queue::{FanoutQueue, QueueStats};
use fanout_core::stream_store::EntryTags;
use fanout_core::{StreamFilter, StreamKey};
use std::time::Duration;
use tokio::sync::watch;

#[tokio::test]
async fn test_queued_append_lands_in_inbox() {
    let (_dir, engine) = engine_with(&["alice", "bob"]);
    let posted = post(&engine, "alice", note("late"));
    let inbox = StreamKey::inbox("bob");
    let tags = EntryTags {
        major: Some(true),
        direct: true,
    };
    engine
        .queue()
        .enqueue(&inbox.owner(), &posted.id, tags, "database is locked")
        .unwrap();

    let processed = engine
        .queue()
        .process_due(engine.store(), &QueueSettings::default())
        .await
        .unwrap();
    assert_eq!(processed, 1);
    assert!(engine.store().contains(&inbox, &posted.id).unwrap());
    // tags survive the retry, so the derived views see it too
    assert!(engine
        .store()
        .contains(&StreamKey::Inbox { user: "bob".into(), filter: StreamFilter::DirectMajor }, &posted.id)
        .unwrap());

    let stats = engine.queue().stats().await.unwrap();
    assert_eq!(
        stats,
        QueueStats {
            pending: 0,
            delivered: 1,
            dead: 0
        }
    );

    // nothing left to do
    let again = engine
        .queue()
        .process_due(engine.store(), &QueueSettings::default())
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn test_retrying_an_existing_entry_is_harmless() {
    let (_dir, engine) = engine_with(&["alice", "bob"]);
    follow(&engine, "bob", "alice");
    let posted = post(&engine, "alice", note("twice"));
    let inbox = StreamKey::inbox("bob");
    assert!(engine.store().contains(&inbox, &posted.id).unwrap());

    let tags = EntryTags {
        major: Some(true),
        direct: false,
    };
    engine.queue().enqueue(&inbox.owner(), &posted.id, tags, "timeout").unwrap();
    engine
        .queue()
        .process_due(engine.store(), &QueueSettings::default())
        .await
        .unwrap();

    assert_eq!(engine.store().count(&inbox).unwrap(), 1);
    assert_eq!(engine.queue().stats().await.unwrap().delivered, 1);
}

#[tokio::test]
async fn test_worker_survives_a_failed_pass() {
    let (dir, engine) = engine_with(&["alice", "bob"]);
    let db_path = dir.path().join("fanout.db");
    let posted = post(&engine, "alice", note("eventually"));

    // every pass fails while the job table is missing
    let db = rusqlite::Connection::open(&db_path).unwrap();
    db.execute_batch("DROP TABLE fanout_jobs;").unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let settings = QueueSettings {
        poll_secs: 1,
        ..QueueSettings::default()
    };
    engine
        .queue()
        .start_worker(shutdown_rx, engine.store().clone(), settings);
    tokio::time::sleep(Duration::from_millis(100)).await;

    FanoutQueue::open(&db_path).unwrap();
    let inbox = StreamKey::inbox("bob");
    engine
        .queue()
        .enqueue(&inbox.owner(), &posted.id, EntryTags::class(true), "database is locked")
        .unwrap();

    let mut waited = 0;
    while !engine.store().contains(&inbox, &posted.id).unwrap() && waited < 50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        waited += 1;
    }
    assert!(engine.store().contains(&inbox, &posted.id).unwrap());
    let _ = shutdown_tx.send(true);
}
