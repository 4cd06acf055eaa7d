/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use fanout_protocol::{Activity, ActivityObject, ObjectRef, Verb, PUBLIC_COLLECTION};
use std::collections::BTreeMap;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::ids::Ids;
use crate::stream_store::StreamKey;

/// One entry of `to`/`cc`/`bto`/`bcc`, by what it expands to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    Public,
    Followers(String),
    Following(String),
    List(String),
    Person(String),
}

impl Recipient {
    pub fn parse(r: &ObjectRef, ids: &Ids) -> Option<Self> {
        let id = r.id.trim();
        if id == PUBLIC_COLLECTION {
            return Some(Self::Public);
        }
        if let Some(nick) = ids.user_collection(id, "followers") {
            return Some(Self::Followers(nick.to_string()));
        }
        if let Some(nick) = ids.user_collection(id, "following") {
            return Some(Self::Following(nick.to_string()));
        }
        if let Some(("collection", _)) = ids.split_local(id) {
            return Some(Self::List(id.to_string()));
        }
        if id.starts_with("acct:") || r.object_type.as_deref() == Some("person") {
            return Some(Self::Person(id.to_string()));
        }
        None
    }
}

/// Audience fields as they will be stored, plus the persons the verb
/// addresses on its own.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolvedAudience {
    pub to: Option<Vec<ObjectRef>>,
    pub cc: Option<Vec<ObjectRef>>,
    pub bto: Option<Vec<ObjectRef>>,
    pub bcc: Option<Vec<ObjectRef>>,
    pub structural: Vec<String>,
}

impl ResolvedAudience {
    pub fn apply_to(&self, activity: &mut Activity) {
        activity.to = self.to.clone();
        activity.cc = self.cc.clone();
        activity.bto = self.bto.clone();
        activity.bcc = self.bcc.clone();
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub nickname: String,
    /// Named as a person in `to` or `bto`.
    pub direct: bool,
}

/// Audience fields with whether naming a person there counts as direct.
fn addressed(activity: &Activity) -> [(&[ObjectRef], bool); 4] {
    [
        (activity.to.as_deref().unwrap_or_default(), true),
        (activity.cc.as_deref().unwrap_or_default(), false),
        (activity.bto.as_deref().unwrap_or_default(), true),
        (activity.bcc.as_deref().unwrap_or_default(), false),
    ]
}

impl Engine {
    /// Works out the audience of an activity about to be distributed.
    /// `object` is the object as it will be stored.
    pub fn resolve_audience(
        &self,
        activity: &Activity,
        verb: Verb,
        actor: &str,
        object: &ActivityObject,
    ) -> EngineResult<ResolvedAudience> {
        let mut out = ResolvedAudience::default();
        if activity.has_explicit_audience() {
            let actor_id = self.ids.person_id(actor);
            for (refs, _) in addressed(activity) {
                for r in refs {
                    let Some(recipient) = Recipient::parse(r, &self.ids) else {
                        return Err(EngineError::validation(format!("unrecognized recipient: {}", r.id)));
                    };
                    if !self.may_address(&recipient, &actor_id)? {
                        return Err(EngineError::validation(format!(
                            "cannot address a collection owned by someone else: {}",
                            r.id
                        )));
                    }
                }
            }
            out.to = activity.to.clone();
            out.cc = activity.cc.clone();
            out.bto = activity.bto.clone();
            out.bcc = activity.bcc.clone();
        } else {
            match verb {
                Verb::Post | Verb::Create | Verb::Share | Verb::Unshare => {
                    out.cc = Some(vec![ObjectRef::new(self.ids.followers_url(actor), "collection")]);
                }
                Verb::Update | Verb::Delete => {
                    if let Some(origin) = self.creating_activity(&object.id)? {
                        out.to = origin.to;
                        out.cc = origin.cc;
                        out.bto = origin.bto;
                        out.bcc = origin.bcc;
                    }
                }
                _ => {}
            }
        }
        out.structural = self.structural_recipients(verb, object)?;
        Ok(out)
    }

    /// Followers, following and lists only reach anyone when the actor owns
    /// them.
    fn may_address(&self, recipient: &Recipient, actor_id: &str) -> EngineResult<bool> {
        Ok(match recipient {
            Recipient::Public | Recipient::Person(_) => true,
            Recipient::Followers(u) | Recipient::Following(u) => self.ids.person_id(u) == actor_id,
            Recipient::List(id) => self
                .repo
                .get_object(id)?
                .is_some_and(|list| list.author.as_deref() == Some(actor_id)),
        })
    }

    fn creating_activity(&self, object_id: &str) -> EngineResult<Option<Activity>> {
        let Some(stored) = self.repo.get_object(object_id)? else {
            return Ok(None);
        };
        let Some(creator) = stored.created_by else {
            return Ok(None);
        };
        Ok(self.repo.get_activity(&creator)?.map(|s| s.activity))
    }

    fn structural_recipients(&self, verb: Verb, object: &ActivityObject) -> EngineResult<Vec<String>> {
        let out = match verb {
            Verb::Follow | Verb::StopFollowing => vec![object.id.clone()],
            Verb::Favorite
            | Verb::Unfavorite
            | Verb::Like
            | Verb::Unlike
            | Verb::Share
            | Verb::Unshare => self
                .repo
                .get_object(&object.id)?
                .and_then(|s| s.author)
                .into_iter()
                .collect(),
            Verb::Post | Verb::Create => match &object.in_reply_to {
                Some(parent) => self
                    .repo
                    .get_object(&parent.id)?
                    .and_then(|s| s.author)
                    .into_iter()
                    .collect(),
                None => Vec::new(),
            },
            Verb::Update | Verb::Delete | Verb::Add | Verb::Remove => Vec::new(),
        };
        Ok(out)
    }

    /// Local users whose inbox receives the activity. Collections are
    /// expanded against their membership at call time.
    pub fn expand_audience(&self, activity: &Activity, structural: &[String]) -> EngineResult<Vec<DeliveryTarget>> {
        let mut targets: BTreeMap<String, bool> = BTreeMap::new();
        let mut add = |nick: String, direct: bool| {
            let e = targets.entry(nick).or_insert(false);
            *e |= direct;
        };

        let actor_id = activity.actor.as_ref().map(|a| a.id.as_str()).unwrap_or_default();
        for (refs, naming_is_direct) in addressed(activity) {
            for r in refs {
                let Some(recipient) = Recipient::parse(r, &self.ids) else {
                    debug!("skipping unrecognized recipient {}", r.id);
                    continue;
                };
                if !self.may_address(&recipient, actor_id)? {
                    debug!("skipping {} not owned by {actor_id}", r.id);
                    continue;
                }
                match recipient {
                    Recipient::Public => {
                        for nick in self.repo.list_users()? {
                            add(nick, false);
                        }
                    }
                    Recipient::Followers(u) => {
                        for person in self.store.members(&StreamKey::Followers(u))? {
                            if let Some(nick) = self.local_user(&person)? {
                                add(nick, false);
                            }
                        }
                    }
                    Recipient::Following(u) => {
                        for person in self.store.members(&StreamKey::Following(u))? {
                            if let Some(nick) = self.local_user(&person)? {
                                add(nick, false);
                            }
                        }
                    }
                    Recipient::List(id) => {
                        for member in self.store.members(&StreamKey::Members(id))? {
                            if let Some(nick) = self.local_user(&member)? {
                                add(nick, false);
                            }
                        }
                    }
                    Recipient::Person(id) => match self.local_user(&id)? {
                        Some(nick) => add(nick, naming_is_direct),
                        None => debug!("skipping non-local recipient {id}"),
                    },
                }
            }
        }

        for person in structural {
            if let Some(nick) = self.local_user(person)? {
                add(nick, false);
            }
        }

        Ok(targets
            .into_iter()
            .map(|(nickname, direct)| DeliveryTarget { nickname, direct })
            .collect())
    }

    /// Whether `viewer` (a person id, `None` for anonymous) is in the
    /// expanded audience of `activity`.
    pub fn audience_includes(
        &self,
        activity: &Activity,
        structural: &[String],
        viewer: Option<&str>,
    ) -> EngineResult<bool> {
        let actor_id = activity.actor.as_ref().map(|a| a.id.as_str()).unwrap_or_default();
        for (refs, _) in addressed(activity) {
            for r in refs {
                let Some(recipient) = Recipient::parse(r, &self.ids) else {
                    continue;
                };
                if !self.may_address(&recipient, actor_id)? {
                    continue;
                }
                let hit = match (recipient, viewer) {
                    (Recipient::Public, _) => true,
                    (_, None) => false,
                    (Recipient::Followers(u), Some(v)) => self.store.contains(&StreamKey::Followers(u), v)?,
                    (Recipient::Following(u), Some(v)) => self.store.contains(&StreamKey::Following(u), v)?,
                    (Recipient::List(id), Some(v)) => self.store.contains(&StreamKey::Members(id), v)?,
                    (Recipient::Person(id), Some(v)) => id == v,
                };
                if hit {
                    return Ok(true);
                }
            }
        }
        Ok(viewer.is_some_and(|v| structural.iter().any(|p| p == v)))
    }
}

/// Whether `person` is named directly in `to` or `bto`.
pub fn names_directly(activity: &Activity, person: &str) -> bool {
    addressed(activity)
        .iter()
        .filter(|(_, direct)| *direct)
        .any(|(refs, _)| refs.iter().any(|r| r.id == person))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipients_parse_by_shape() {
        let ids = Ids::new("http://h.test");
        let p = |id: &str| Recipient::parse(&ObjectRef { id: id.to_string(), object_type: None }, &ids);
        assert_eq!(p(PUBLIC_COLLECTION), Some(Recipient::Public));
        assert_eq!(p(&ids.followers_url("amy")), Some(Recipient::Followers("amy".into())));
        assert_eq!(p(&ids.following_url("amy")), Some(Recipient::Following("amy".into())));
        let list = ids.object_id("collection", "abc");
        assert_eq!(p(&list), Some(Recipient::List(list.clone())));
        assert_eq!(p("acct:bo@h.test"), Some(Recipient::Person("acct:bo@h.test".into())));
        assert_eq!(p("http://h.test/api/note/1"), None);
    }

    #[test]
    fn direct_naming_ignores_cc_and_bcc() {
        let mut a = Activity::default();
        a.cc = Some(vec![ObjectRef::new("acct:c@h", "person")]);
        a.bto = Some(vec![ObjectRef::new("acct:b@h", "person")]);
        assert!(names_directly(&a, "acct:b@h"));
        assert!(!names_directly(&a, "acct:c@h"));
    }
}
