/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Roll-up aggregate tests, including concurrent reactions.

mod common;

use common::*;
use fanout_core::repository::AggregateKind;
use fanout_core::{Endpoint, StreamKey};
use fanout_protocol::Verb;
use std::collections::HashSet;

// =============================================================================
// Concurrent favorites
// =============================================================================

#[test]
fn test_concurrent_favorites_count_each_user_once() {
    const K: usize = 8;
    let nicks: Vec<String> = (0..K).map(|i| format!("fan{i}")).collect();
    let mut users: Vec<&str> = nicks.iter().map(String::as_str).collect();
    users.push("alice");
    let (_dir, engine) = engine_with(&users);

    let mut public = note("popular");
    public.to = Some(vec![public_ref()]);
    let object = post(&engine, "alice", public).object.unwrap();

    std::thread::scope(|s| {
        for nick in &nicks {
            let engine = &engine;
            let object = &object;
            s.spawn(move || {
                engine
                    .distribute(nick, Endpoint::General, on_object(Verb::Favorite, object))
                    .unwrap();
            });
        }
    });

    let seen = engine.read_object(&object.id, &user("alice")).unwrap();
    let likes = seen.likes.unwrap();
    assert_eq!(likes.total_items, K as u64);

    let preview: Vec<String> = likes.items.unwrap().into_iter().map(|o| o.id).collect();
    let bound = engine.settings().preview_bound;
    assert_eq!(preview.len(), bound.min(K));
    let unique: HashSet<&String> = preview.iter().collect();
    assert_eq!(unique.len(), preview.len());

    // the preview is the head of the full like stream
    let stream = ids_of(&read(&engine, &StreamKey::Likes(object.id.clone()), &user("alice")));
    assert_eq!(stream.len(), K);
    assert_eq!(preview, stream[..preview.len()].to_vec());
}

#[test]
fn test_concurrent_favorite_and_unfavorite_settle() {
    let (_dir, engine) = engine_with(&["alice", "bob", "carol"]);
    let mut public = note("flip");
    public.to = Some(vec![public_ref()]);
    let object = post(&engine, "alice", public).object.unwrap();

    std::thread::scope(|s| {
        for nick in ["bob", "carol"] {
            let engine = &engine;
            let object = &object;
            s.spawn(move || {
                for round in 0..5 {
                    let verb = if round % 2 == 0 { Verb::Favorite } else { Verb::Unfavorite };
                    engine
                        .distribute(nick, Endpoint::General, on_object(verb, object))
                        .unwrap();
                }
            });
        }
    });

    let row = engine.repository().aggregate(&object.id, AggregateKind::Likes).unwrap();
    assert_eq!(row.total_items, 2);
    // the counter agrees with the roll-up stream it summarizes
    assert_eq!(engine.store().count(&StreamKey::Likes(object.id.clone())).unwrap(), 2);
}

// =============================================================================
// Idempotence
// =============================================================================

#[test]
fn test_repeated_favorite_counts_once() {
    let (_dir, engine) = engine_with(&["alice", "bob"]);
    follow(&engine, "bob", "alice");
    let object = post_note(&engine, "alice", "again");
    for _ in 0..3 {
        post(&engine, "bob", on_object(Verb::Favorite, &object));
    }
    let seen = engine.read_object(&object.id, &user("alice")).unwrap();
    assert_eq!(seen.likes.as_ref().unwrap().total_items, 1);
    assert_eq!(seen.likes.unwrap().items.unwrap().len(), 1);
    // each favorite is still its own activity in bob's feed
    assert_eq!(read(&engine, &StreamKey::feed("bob"), &user("bob")).total_items, 4);
}

#[test]
fn test_preview_is_filtered_by_visibility() {
    let (_dir, engine) = engine_with(&["alice", "bob", "carol"]);
    let mut public = note("thread");
    public.to = Some(vec![public_ref()]);
    let parent = post(&engine, "alice", public).object.unwrap();

    // bob's reply only reaches his followers and the parent's author
    let reply = fanout_protocol::Activity::new(
        Verb::Post,
        fanout_protocol::ActivityObject {
            object_type: "comment".into(),
            content: Some("quiet reply".into()),
            in_reply_to: Some(parent.to_ref()),
            ..Default::default()
        },
    );
    post(&engine, "bob", reply);

    let for_alice = engine.read_object(&parent.id, &user("alice")).unwrap();
    let for_carol = engine.read_object(&parent.id, &user("carol")).unwrap();
    let alice_replies = for_alice.replies.unwrap();
    let carol_replies = for_carol.replies.unwrap();
    assert_eq!(alice_replies.total_items, 1);
    assert_eq!(carol_replies.total_items, 1);
    assert_eq!(alice_replies.items.unwrap().len(), 1);
    assert!(carol_replies.items.unwrap().is_empty());
}
