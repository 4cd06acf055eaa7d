/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use fanout_protocol::{Activity, ActivityObject, Link, Links, ObjectRef, Verb};
use tracing::{debug, error, info, warn};

use crate::audience::names_directly;
use crate::classify::{check_endpoint, parse_verb, Endpoint};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::hub::HubEvent;
use crate::ids::now_rfc3339;
use crate::repository::{AggregateKind, NewActivity, ObjectWrite, StoredActivity, StoredObject, StreamEdit};
use crate::stream_store::{EntryTags, StreamFilter, StreamKey};
use crate::visibility::Viewer;

#[derive(Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Keep,
    Insert,
    Replace,
    Tombstone,
}

/// The object an activity ends up carrying, and what happens to its row.
struct Prepared {
    object: ActivityObject,
    write: WriteKind,
    target: Option<ObjectRef>,
}

impl Prepared {
    fn keep(object: ActivityObject) -> Self {
        Self {
            object,
            write: WriteKind::Keep,
            target: None,
        }
    }
}

impl Engine {
    /// Accepts an activity authored by `caller`, stores it and delivers it
    /// to every affected stream. Returns the activity as its author sees it.
    pub fn distribute(&self, caller: &str, endpoint: Endpoint, mut activity: Activity) -> EngineResult<Activity> {
        let verb = parse_verb(&activity.verb)?;
        let class = check_endpoint(verb, endpoint)?;
        self.require_user(caller)?;
        let actor_id = self.ids.person_id(caller);
        if let Some(actor) = &activity.actor {
            let claimed = actor.id.trim();
            if !claimed.is_empty() && claimed != actor_id {
                return Err(EngineError::Forbidden);
            }
        }
        let submitted = activity
            .object
            .take()
            .ok_or_else(|| EngineError::validation("activity has no object"))?;
        let viewer = Viewer::User(caller.to_string());
        let prepared = self.prepare(verb, caller, &actor_id, submitted, activity.target.take(), &viewer)?;

        let now = now_rfc3339();
        activity.id = self.ids.new_activity_id();
        activity.verb = verb.as_str().to_string();
        activity.actor = Some(ObjectRef::new(actor_id.clone(), "person"));
        activity.target = prepared.target.clone();
        activity.published = Some(now.clone());
        activity.updated = Some(now);
        activity.links = Some(Links {
            self_link: Some(Link::new(activity.id.clone())),
            ..Default::default()
        });
        let audience = self.resolve_audience(&activity, verb, caller, &prepared.object)?;
        audience.apply_to(&mut activity);
        activity.object = Some(prepared.object.clone());

        let feed = StreamKey::feed(caller);
        let object_write = match prepared.write {
            WriteKind::Keep => ObjectWrite::Keep,
            WriteKind::Insert => ObjectWrite::Insert(&prepared.object),
            WriteKind::Replace => ObjectWrite::Replace(&prepared.object),
            WriteKind::Tombstone => ObjectWrite::Tombstone(&prepared.object),
        };
        let edits = self.side_effects(verb, caller, &actor_id, &prepared);
        if let Err(e) = self.repo.persist(&NewActivity {
            activity: &activity,
            structural: &audience.structural,
            object: object_write,
            feed: &feed,
            major: class.is_major(),
            edits: &edits,
            preview_bound: self.settings.preview_bound,
        }) {
            error!("storing {} {} from {caller} failed: {e:#}", activity.verb, activity.id);
            return Err(e.into());
        }
        info!("accepted {} {} from {caller}", activity.verb, activity.id);

        self.fan_out(caller, &actor_id, &activity, &audience.structural, class.is_major());

        let stored = StoredActivity {
            activity,
            structural: audience.structural,
        };
        self.announce(caller, class.is_major(), &stored);
        self.view_activity(stored, &viewer)
    }

    fn prepare(
        &self,
        verb: Verb,
        caller: &str,
        actor_id: &str,
        submitted: ActivityObject,
        target: Option<ObjectRef>,
        viewer: &Viewer,
    ) -> EngineResult<Prepared> {
        match verb {
            Verb::Post | Verb::Create => {
                if submitted.id.trim().is_empty() {
                    self.prepare_new_object(actor_id, submitted, viewer)
                } else {
                    let stored = self.live_object(&submitted.id)?;
                    self.object_access(&stored, viewer)?;
                    Ok(Prepared::keep(stored.object))
                }
            }
            Verb::Update => {
                let stored = self.owned_object(&submitted.id, actor_id)?;
                Ok(Prepared {
                    object: merge_update(stored.object, submitted),
                    write: WriteKind::Replace,
                    target: None,
                })
            }
            Verb::Delete => {
                let stored = self.owned_object(&submitted.id, actor_id)?;
                Ok(Prepared {
                    object: tombstone(stored.object),
                    write: WriteKind::Tombstone,
                    target: None,
                })
            }
            Verb::Follow | Verb::StopFollowing => {
                let followed = self
                    .local_user(submitted.id.trim())?
                    .ok_or_else(|| EngineError::NotFound(format!("person {}", submitted.id)))?;
                if followed == caller {
                    return Err(EngineError::validation("cannot follow yourself"));
                }
                if verb == Verb::StopFollowing
                    && !self.store.contains(&StreamKey::Following(caller.to_string()), &submitted.id)?
                {
                    return Err(EngineError::validation(format!("not following {}", submitted.id)));
                }
                Ok(Prepared::keep(self.get_user(&followed)?.profile))
            }
            Verb::Favorite
            | Verb::Unfavorite
            | Verb::Like
            | Verb::Unlike
            | Verb::Share
            | Verb::Unshare => {
                let stored = self.live_object(&submitted.id)?;
                self.object_access(&stored, viewer)?;
                Ok(Prepared::keep(stored.object))
            }
            Verb::Add | Verb::Remove => {
                let target = target.ok_or_else(|| EngineError::validation("add/remove needs a target list"))?;
                let list = self.live_object(&target.id)?;
                if list.object.object_type != "collection" {
                    return Err(EngineError::validation("target is not a list"));
                }
                if list.author.as_deref() != Some(actor_id) {
                    return Err(EngineError::Forbidden);
                }
                let member = self
                    .repo
                    .get_object(submitted.id.trim())?
                    .ok_or_else(|| EngineError::NotFound(format!("object {}", submitted.id)))?;
                if verb == Verb::Remove
                    && !self.store.contains(&StreamKey::Members(list.object.id.clone()), &member.object.id)?
                {
                    return Err(EngineError::validation(format!("{} is not a member of the list", member.object.id)));
                }
                Ok(Prepared {
                    object: member.object,
                    write: WriteKind::Keep,
                    target: Some(list.object.to_ref()),
                })
            }
        }
    }

    fn prepare_new_object(&self, actor_id: &str, mut object: ActivityObject, viewer: &Viewer) -> EngineResult<Prepared> {
        let ty = object.object_type.trim().to_ascii_lowercase();
        let valid = !ty.is_empty()
            && ty.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
            && !matches!(ty.as_str(), "person" | "activity" | "user");
        if !valid {
            return Err(EngineError::validation(format!("invalid objectType: {}", object.object_type)));
        }
        if let Some(parent) = &object.in_reply_to {
            let stored = self.live_object(&parent.id)?;
            self.object_access(&stored, viewer)?;
            object.in_reply_to = Some(stored.object.to_ref());
        }
        let now = now_rfc3339();
        object.id = self.ids.new_object_id(&ty);
        object.object_type = ty;
        object.author = Some(ObjectRef::new(actor_id, "person"));
        object.published = Some(now.clone());
        object.updated = Some(now);
        object.deleted = None;
        object.likes = None;
        object.shares = None;
        object.replies = None;
        object.liked = None;
        object.pump_io = None;
        object.links = Some(Links {
            self_link: Some(Link::new(object.id.clone())),
            ..Default::default()
        });
        Ok(Prepared {
            object,
            write: WriteKind::Insert,
            target: None,
        })
    }

    /// Existing, non-deleted object.
    fn live_object(&self, id: &str) -> EngineResult<StoredObject> {
        let id = id.trim();
        if id.is_empty() {
            return Err(EngineError::validation("object id required"));
        }
        let stored = self
            .repo
            .get_object(id)?
            .ok_or_else(|| EngineError::NotFound(format!("object {id}")))?;
        if stored.deleted {
            return Err(EngineError::Gone(format!("object {id}")));
        }
        Ok(stored)
    }

    /// Live object that `actor_id` may change: its author, or its own profile.
    fn owned_object(&self, id: &str, actor_id: &str) -> EngineResult<StoredObject> {
        let stored = self.live_object(id)?;
        let owns = stored.author.as_deref() == Some(actor_id) || stored.object.id == actor_id;
        if !owns {
            return Err(EngineError::Forbidden);
        }
        Ok(stored)
    }

    /// Inbox delivery. Failures past this point are queued, never returned.
    fn fan_out(&self, caller: &str, actor_id: &str, activity: &Activity, structural: &[String], major: bool) {
        let targets = match self.expand_audience(activity, structural) {
            Ok(t) => t,
            Err(e) => {
                error!("audience expansion for {} failed: {e}", activity.id);
                return;
            }
        };
        let self_addressed = names_directly(activity, actor_id);
        for target in targets {
            if target.nickname == caller && !self_addressed {
                continue;
            }
            let inbox = StreamKey::inbox(&target.nickname);
            let tags = EntryTags {
                major: Some(major),
                direct: target.direct,
            };
            if let Err(e) = self.store.append(&inbox, &activity.id, tags) {
                warn!("inbox append {} -> {} failed: {e:#}", activity.id, target.nickname);
                if let Err(qe) = self.queue.enqueue(&inbox.owner(), &activity.id, tags, &format!("{e:#}")) {
                    error!("could not queue {} for {}: {qe:#}", activity.id, target.nickname);
                }
            }
        }
    }

    /// Graph, list and roll-up changes the verb causes. They commit with the
    /// activity or not at all.
    fn side_effects(&self, verb: Verb, caller: &str, actor_id: &str, prepared: &Prepared) -> Vec<StreamEdit> {
        let object = &prepared.object;
        let reaction = |kind, entry_id: &str, add| StreamEdit::Reaction {
            object_id: object.id.clone(),
            kind,
            entry_id: entry_id.to_string(),
            add,
        };
        let mut edits = Vec::new();
        match verb {
            Verb::Post | Verb::Create => {
                if prepared.write == WriteKind::Insert && object.object_type == "collection" {
                    edits.push(StreamEdit::Append {
                        key: StreamKey::Lists(caller.to_string()),
                        entry_id: object.id.clone(),
                    });
                }
                if let Some(parent) = &object.in_reply_to {
                    edits.push(StreamEdit::Reaction {
                        object_id: parent.id.clone(),
                        kind: AggregateKind::Replies,
                        entry_id: object.id.clone(),
                        add: true,
                    });
                }
            }
            Verb::Favorite | Verb::Like => edits.push(reaction(AggregateKind::Likes, actor_id, true)),
            Verb::Unfavorite | Verb::Unlike => edits.push(reaction(AggregateKind::Likes, actor_id, false)),
            Verb::Share => edits.push(reaction(AggregateKind::Shares, actor_id, true)),
            Verb::Unshare => edits.push(reaction(AggregateKind::Shares, actor_id, false)),
            Verb::Follow | Verb::StopFollowing => {
                let mut graph = Vec::new();
                if let Some(followed) = self.ids.local_nickname(&object.id) {
                    graph.push((StreamKey::Followers(followed.to_string()), actor_id.to_string()));
                }
                graph.push((StreamKey::Following(caller.to_string()), object.id.clone()));
                for (key, entry_id) in graph {
                    edits.push(if verb == Verb::Follow {
                        StreamEdit::Append { key, entry_id }
                    } else {
                        StreamEdit::Remove { key, entry_id }
                    });
                }
            }
            Verb::Add | Verb::Remove => {
                if let Some(list) = &prepared.target {
                    let key = StreamKey::Members(list.id.clone());
                    let entry_id = object.id.clone();
                    edits.push(if verb == Verb::Add {
                        StreamEdit::Append { key, entry_id }
                    } else {
                        StreamEdit::Remove { key, entry_id }
                    });
                }
            }
            Verb::Update | Verb::Delete => {}
        }
        edits
    }

    /// Hands publicly visible activities to the push hub.
    fn announce(&self, caller: &str, major: bool, stored: &StoredActivity) {
        let public = match self.view_activity(stored.clone(), &Viewer::Anonymous) {
            Ok(a) => a,
            Err(EngineError::Forbidden) => return,
            Err(e) => {
                debug!("not announcing {}: {e}", stored.activity.id);
                return;
            }
        };
        let base = self.ids.base();
        let variant = if major { StreamFilter::Major } else { StreamFilter::Minor };
        let topics = vec![
            StreamKey::feed(caller).url(base),
            StreamKey::Feed {
                user: caller.to_string(),
                filter: variant,
            }
            .url(base),
        ];
        self.notify_hub(HubEvent { topics, activity: public });
    }
}

/// Applies the fields an update carries onto the stored object. `null` in
/// an extra property removes it.
fn merge_update(stored: ActivityObject, patch: ActivityObject) -> ActivityObject {
    let mut out = stored;
    if patch.display_name.is_some() {
        out.display_name = patch.display_name;
    }
    if patch.content.is_some() {
        out.content = patch.content;
    }
    for (k, v) in patch.extra {
        if v.is_null() {
            out.extra.remove(&k);
        } else {
            out.extra.insert(k, v);
        }
    }
    out.updated = Some(now_rfc3339());
    out
}

fn tombstone(stored: ActivityObject) -> ActivityObject {
    let now = now_rfc3339();
    ActivityObject {
        id: stored.id,
        object_type: stored.object_type,
        author: stored.author,
        in_reply_to: stored.in_reply_to,
        published: stored.published,
        updated: Some(now.clone()),
        deleted: Some(now),
        links: stored.links,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_merges_only_provided_fields() {
        let mut stored = ActivityObject {
            id: "o".into(),
            object_type: "note".into(),
            content: Some("old".into()),
            display_name: Some("title".into()),
            ..Default::default()
        };
        stored.extra.insert("mood".into(), json!("calm"));
        stored.extra.insert("tag".into(), json!("x"));
        let mut patch = ActivityObject {
            content: Some("new".into()),
            ..Default::default()
        };
        patch.extra.insert("tag".into(), serde_json::Value::Null);
        let merged = merge_update(stored, patch);
        assert_eq!(merged.content.as_deref(), Some("new"));
        assert_eq!(merged.display_name.as_deref(), Some("title"));
        assert_eq!(merged.extra.get("mood"), Some(&json!("calm")));
        assert!(merged.extra.get("tag").is_none());
        assert!(merged.updated.is_some());
    }

    #[test]
    fn tombstones_keep_identity_only() {
        let stored = ActivityObject {
            id: "o".into(),
            object_type: "note".into(),
            content: Some("secret".into()),
            ..Default::default()
        };
        let t = tombstone(stored);
        assert_eq!(t.id, "o");
        assert!(t.content.is_none());
        assert!(t.is_tombstone());
    }
}
