/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use fanout_protocol::Verb;

use crate::error::{EngineError, EngineResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    Major,
    Minor,
}

impl Class {
    pub fn is_major(&self) -> bool {
        matches!(self, Self::Major)
    }
}

/// Which feed URL an activity was posted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    General,
    MajorOnly,
    MinorOnly,
}

pub fn parse_verb(verb: &str) -> EngineResult<Verb> {
    Verb::parse(verb).ok_or_else(|| EngineError::validation(format!("unknown verb: {}", verb.trim())))
}

pub fn classify(verb: Verb) -> Class {
    match verb {
        Verb::Post | Verb::Create | Verb::Update | Verb::Delete => Class::Major,
        Verb::Follow
        | Verb::StopFollowing
        | Verb::Favorite
        | Verb::Unfavorite
        | Verb::Like
        | Verb::Unlike
        | Verb::Share
        | Verb::Unshare
        | Verb::Add
        | Verb::Remove => Class::Minor,
    }
}

pub fn check_endpoint(verb: Verb, endpoint: Endpoint) -> EngineResult<Class> {
    let class = classify(verb);
    match (endpoint, class) {
        (Endpoint::MajorOnly, Class::Minor) => Err(EngineError::validation(format!(
            "{} is a minor activity; post it to feed or feed/minor",
            verb.as_str()
        ))),
        (Endpoint::MinorOnly, Class::Major) => Err(EngineError::validation(format!(
            "{} is a major activity; post it to feed or feed/major",
            verb.as_str()
        ))),
        _ => Ok(class),
    }
}
