/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Documents exchanged between the engine and its clients.
//!
//! Field names follow the activity-streams JSON shape (`objectType`,
//! `displayName`, `totalItems`, ...). Optional audience fields are omitted
//! when absent; an absent `bcc` and an empty `bcc` are different things.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Audience sentinel meaning "everyone".
pub const PUBLIC_COLLECTION: &str = "http://activityschema.org/collection/public";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Post,
    Create,
    Update,
    Delete,
    Follow,
    StopFollowing,
    Favorite,
    Unfavorite,
    Like,
    Unlike,
    Share,
    Unshare,
    Add,
    Remove,
}

impl Verb {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "post" => Some(Self::Post),
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            "follow" => Some(Self::Follow),
            "stop-following" => Some(Self::StopFollowing),
            "favorite" => Some(Self::Favorite),
            "unfavorite" => Some(Self::Unfavorite),
            "like" => Some(Self::Like),
            "unlike" => Some(Self::Unlike),
            "share" => Some(Self::Share),
            "unshare" => Some(Self::Unshare),
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Follow => "follow",
            Self::StopFollowing => "stop-following",
            Self::Favorite => "favorite",
            Self::Unfavorite => "unfavorite",
            Self::Like => "like",
            Self::Unlike => "unlike",
            Self::Share => "share",
            Self::Unshare => "unshare",
            Self::Add => "add",
            Self::Remove => "remove",
        }
    }
}

/// A reference to a person, collection or object by id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: String,
    #[serde(rename = "objectType", default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
}

impl ObjectRef {
    pub fn new(id: impl Into<String>, object_type: &str) -> Self {
        Self {
            id: id.into(),
            object_type: Some(object_type.to_string()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
}

impl Link {
    pub fn new(href: impl Into<String>) -> Self {
        Self { href: href.into() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Links {
    #[serde(rename = "self", default, skip_serializing_if = "Option::is_none")]
    pub self_link: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<Link>,
}

/// Roll-up of reactions on an object: a counter plus a bounded preview.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    #[serde(rename = "totalItems")]
    pub total_items: u64,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ActivityObject>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PumpIo {
    pub shared: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityObject {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub object_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replies: Option<Aggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub likes: Option<Aggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<Aggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liked: Option<bool>,
    #[serde(rename = "pump_io", default, skip_serializing_if = "Option::is_none")]
    pub pump_io: Option<PumpIo>,
    /// Client-provided properties the engine does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActivityObject {
    pub fn to_ref(&self) -> ObjectRef {
        ObjectRef {
            id: self.id.clone(),
            object_type: (!self.object_type.is_empty()).then(|| self.object_type.clone()),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub verb: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ActivityObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Vec<ObjectRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<ObjectRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bto: Option<Vec<ObjectRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<Vec<ObjectRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Links>,
}

impl Activity {
    pub fn new(verb: Verb, object: ActivityObject) -> Self {
        Self {
            verb: verb.as_str().to_string(),
            object: Some(object),
            ..Default::default()
        }
    }

    pub fn has_explicit_audience(&self) -> bool {
        self.to.is_some() || self.cc.is_some() || self.bto.is_some() || self.bcc.is_some()
    }
}

/// One entry of a stream page. Activities always carry a `verb`, which is
/// what tells the two shapes apart on the way in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamItem {
    Activity(Activity),
    Object(ActivityObject),
}

impl StreamItem {
    pub fn id(&self) -> &str {
        match self {
            Self::Activity(a) => &a.id,
            Self::Object(o) => &o.id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamPage<T> {
    pub url: String,
    #[serde(rename = "totalItems")]
    pub total_items: u64,
    pub items: Vec<T>,
    pub links: Links,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegisterUser {
    pub nickname: String,
    #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserInfo {
    pub nickname: String,
    pub profile: ActivityObject,
}

/// Body of a push-hub control request (form or JSON encoded).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HubRequest {
    #[serde(rename = "hub.mode", default)]
    pub mode: String,
    #[serde(rename = "hub.topic", default)]
    pub topic: String,
    #[serde(rename = "hub.callback", default)]
    pub callback: String,
}
