/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

#![allow(dead_code)]

use fanout_core::config::StreamSettings;
use fanout_core::{Endpoint, Engine, PageParams, StreamKey, Viewer};
use fanout_protocol::{Activity, ActivityObject, ObjectRef, StreamItem, StreamPage, Verb};
use tempfile::TempDir;

pub const BASE: &str = "https://fanout.test";

/// Engine over a fresh database with the given users registered.
pub fn engine_with(users: &[&str]) -> (TempDir, Engine) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open_at(&dir.path().join("fanout.db"), BASE, StreamSettings::default()).unwrap();
    for nick in users {
        engine.register_user(nick, None).unwrap();
    }
    (dir, engine)
}

pub fn user(nick: &str) -> Viewer {
    Viewer::User(nick.to_string())
}

pub fn note(content: &str) -> Activity {
    Activity::new(
        Verb::Post,
        ActivityObject {
            object_type: "note".to_string(),
            content: Some(content.to_string()),
            ..Default::default()
        },
    )
}

pub fn public_ref() -> ObjectRef {
    ObjectRef::new(fanout_protocol::PUBLIC_COLLECTION, "collection")
}

pub fn person_ref(engine: &Engine, nick: &str) -> ObjectRef {
    ObjectRef::new(engine.ids().person_id(nick), "person")
}

pub fn post(engine: &Engine, nick: &str, activity: Activity) -> Activity {
    engine.distribute(nick, Endpoint::General, activity).unwrap()
}

/// Posts a note and returns the created object.
pub fn post_note(engine: &Engine, nick: &str, content: &str) -> ActivityObject {
    post(engine, nick, note(content)).object.unwrap()
}

pub fn on_object(verb: Verb, object: &ActivityObject) -> Activity {
    Activity::new(
        verb,
        ActivityObject {
            id: object.id.clone(),
            object_type: object.object_type.clone(),
            ..Default::default()
        },
    )
}

pub fn follow(engine: &Engine, follower: &str, followed: &str) -> Activity {
    let person = ActivityObject {
        id: engine.ids().person_id(followed),
        object_type: "person".to_string(),
        ..Default::default()
    };
    post(engine, follower, Activity::new(Verb::Follow, person))
}

pub fn read(engine: &Engine, key: &StreamKey, viewer: &Viewer) -> StreamPage<StreamItem> {
    engine.read_stream(key, &PageParams::first(200), viewer).unwrap()
}

pub fn ids_of(page: &StreamPage<StreamItem>) -> Vec<String> {
    page.items.iter().map(|i| i.id().to_string()).collect()
}

pub fn activities(page: &StreamPage<StreamItem>) -> Vec<&Activity> {
    page.items
        .iter()
        .filter_map(|i| match i {
            StreamItem::Activity(a) => Some(a),
            StreamItem::Object(_) => None,
        })
        .collect()
}

pub fn feed(nick: &str, filter: fanout_core::StreamFilter) -> StreamKey {
    StreamKey::Feed {
        user: nick.to_string(),
        filter,
    }
}

pub fn inbox(nick: &str, filter: fanout_core::StreamFilter) -> StreamKey {
    StreamKey::Inbox {
        user: nick.to_string(),
        filter,
    }
}
