/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use fanout_protocol::{Activity, ActivityObject, Aggregate, PumpIo};
use tracing::warn;

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::repository::{AggregateKind, StoredActivity, StoredObject};
use crate::stream_store::StreamKey;

/// Who is reading. Client-only credentials are as anonymous as no
/// credentials at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Viewer {
    User(String),
    Client(String),
    Anonymous,
}

impl Viewer {
    pub fn nickname(&self) -> Option<&str> {
        match self {
            Self::User(n) => Some(n),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// The viewer is the author: every field, `bto`/`bcc` included.
    Full,
    /// An audience member: confidential recipients removed.
    Redacted,
}

const UNDECORATED: [&str; 2] = ["person", "collection"];

impl Engine {
    fn viewer_person(&self, viewer: &Viewer) -> Option<String> {
        viewer.nickname().map(|n| self.ids.person_id(n))
    }

    pub fn activity_access(&self, stored: &StoredActivity, viewer: &Viewer) -> EngineResult<Access> {
        let person = self.viewer_person(viewer);
        let actor = stored.activity.actor.as_ref().map(|a| a.id.as_str());
        if person.is_some() && person.as_deref() == actor {
            return Ok(Access::Full);
        }
        if self.audience_includes(&stored.activity, &stored.structural, person.as_deref())? {
            Ok(Access::Redacted)
        } else {
            Err(EngineError::Forbidden)
        }
    }

    /// Objects are judged by the audience of the activity that created them.
    pub fn object_access(&self, stored: &StoredObject, viewer: &Viewer) -> EngineResult<Access> {
        if stored.object.object_type == "person" {
            return Ok(Access::Redacted);
        }
        let person = self.viewer_person(viewer);
        if person.is_some() && person == stored.author {
            return Ok(Access::Full);
        }
        let Some(creator) = stored.created_by.as_deref() else {
            return Ok(Access::Redacted);
        };
        let Some(origin) = self.repo.get_activity(creator)? else {
            warn!("object {} names missing creating activity {creator}", stored.object.id);
            return Err(EngineError::Forbidden);
        };
        if self.audience_includes(&origin.activity, &origin.structural, person.as_deref())? {
            Ok(Access::Redacted)
        } else {
            Err(EngineError::Forbidden)
        }
    }

    /// The activity as `viewer` may see it, with its object replaced by the
    /// object's current state.
    pub fn view_activity(&self, stored: StoredActivity, viewer: &Viewer) -> EngineResult<Activity> {
        let access = self.activity_access(&stored, viewer)?;
        let mut activity = stored.activity;
        if access == Access::Redacted {
            activity.bto = None;
            activity.bcc = None;
        }
        if let Some(embedded) = activity.object.take() {
            let current = match self.repo.get_object(&embedded.id)? {
                Some(obj) => match self.view_object(obj, viewer) {
                    Ok(v) => v,
                    Err(EngineError::Forbidden) => ActivityObject {
                        id: embedded.id.clone(),
                        object_type: embedded.object_type.clone(),
                        ..Default::default()
                    },
                    Err(e) => return Err(e),
                },
                None => embedded,
            };
            activity.object = Some(current);
        }
        Ok(activity)
    }

    /// The object as `viewer` may see it, with live roll-ups and the
    /// per-viewer `liked` and `pump_io.shared` flags.
    pub fn view_object(&self, stored: StoredObject, viewer: &Viewer) -> EngineResult<ActivityObject> {
        self.object_access(&stored, viewer)?;
        let mut object = stored.object;
        if object.is_tombstone() || UNDECORATED.contains(&object.object_type.as_str()) {
            return Ok(object);
        }

        object.likes = Some(self.aggregate_view(&object.id, AggregateKind::Likes, viewer)?);
        object.shares = Some(self.aggregate_view(&object.id, AggregateKind::Shares, viewer)?);
        object.replies = Some(self.aggregate_view(&object.id, AggregateKind::Replies, viewer)?);

        if let Some(person) = self.viewer_person(viewer) {
            let liked = self.store.contains(&StreamKey::Likes(object.id.clone()), &person)?;
            let shared = stored.author.as_deref() != Some(person.as_str())
                && self.store.contains(&StreamKey::Shares(object.id.clone()), &person)?;
            object.liked = Some(liked);
            object.pump_io = Some(PumpIo { shared });
        }
        Ok(object)
    }

    fn aggregate_view(&self, object_id: &str, kind: AggregateKind, viewer: &Viewer) -> EngineResult<Aggregate> {
        let row = self.repo.aggregate(object_id, kind)?;
        let mut items = Vec::with_capacity(row.preview.len());
        for entry in &row.preview {
            let Some(stored) = self.repo.get_object(entry)? else {
                continue;
            };
            match self.object_access(&stored, viewer) {
                Ok(_) => items.push(stored.object),
                Err(EngineError::Forbidden) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Aggregate {
            total_items: row.total_items,
            url: kind.stream_key(object_id).url(self.ids.base()),
            items: Some(items),
        })
    }

    pub fn read_activity(&self, activity_id: &str, viewer: &Viewer) -> EngineResult<Activity> {
        let stored = self
            .repo
            .get_activity(activity_id)?
            .ok_or_else(|| EngineError::NotFound(format!("activity {activity_id}")))?;
        self.view_activity(stored, viewer)
    }

    /// Single-object read. Tombstones answer `Gone` here, though streams
    /// still return them.
    pub fn read_object(&self, object_id: &str, viewer: &Viewer) -> EngineResult<ActivityObject> {
        let stored = self
            .repo
            .get_object(object_id)?
            .ok_or_else(|| EngineError::NotFound(format!("object {object_id}")))?;
        if stored.deleted {
            self.object_access(&stored, viewer)?;
            return Err(EngineError::Gone(format!("object {object_id}")));
        }
        self.view_object(stored, viewer)
    }
}
