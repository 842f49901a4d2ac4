//! # Capability Model
//!
//! An *ability* is a locally stored grant: "requests from `delegateOrigin`,
//! routed through `identityOrigin`, may have this account sign actions of
//! `mode` on `targetUid`/`targetPath` until `expiration`".
//!
//! ## Matching
//!
//! [`match_ability`] returns the first ability that satisfies every check:
//!
//! | Check         | Passes when                                              |
//! |---------------|----------------------------------------------------------|
//! | origin        | `delegateOrigin == requestOrigin` (always required)      |
//! | target uid    | unset, or equal to the target's account                  |
//! | mode          | `all`, or equal to the requested mode                    |
//! | expiration    | unset, or `now <= expiration` (ms)                       |
//! | target path   | unset; equal; or a prefix of the target when `recursive` |
//!
//! A miss is reported to the requester exactly like "no identity here".
//! Callers must not reveal whether some *other* origin holds an ability.

pub mod store;

use serde::{Deserialize, Serialize};

use crate::identity::principal::Principal;

pub use store::{AbilityStore, KnownOrigins, NewAbility};

/// Which actions an ability covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbilityMode {
    Comment,
    All,
}

impl AbilityMode {
    /// Whether an ability with this mode covers a request for `requested`.
    pub fn covers(self, requested: AbilityMode) -> bool {
        self == AbilityMode::All || self == requested
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ability {
    pub id: String,
    pub account_uid: String,
    pub account_public_key: Principal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_uid: Option<String>,
    pub mode: AbilityMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<u64>,
    #[serde(default)]
    pub recursive: bool,
    pub delegate_origin: String,
    pub identity_origin: String,
}

/// What a signing request wants to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetId {
    /// Account identifier owning the target.
    pub uid: String,
    /// Path segments inside that account.
    pub path: Vec<String>,
}

impl TargetId {
    /// Split a `/a/b` path into segments; empty segments are dropped.
    pub fn new(uid: impl Into<String>, path: &str) -> Self {
        Self {
            uid: uid.into(),
            path: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

impl Ability {
    fn covers_path(&self, target: &TargetId) -> bool {
        match &self.target_path {
            None => true,
            Some(scope) if self.recursive => target.path.starts_with(scope),
            Some(scope) => target.path == *scope,
        }
    }

    /// Every check except the origin.
    fn covers(&self, target: &TargetId, mode: AbilityMode, now_ms: u64) -> bool {
        let uid_ok = self
            .target_uid
            .as_ref()
            .map_or(true, |uid| *uid == target.uid);
        let live = self.expiration.map_or(true, |exp| now_ms <= exp);
        uid_ok && self.mode.covers(mode) && live && self.covers_path(target)
    }
}

/// First ability letting `request_origin` act on `target` in `mode`.
pub fn match_ability<'a>(
    abilities: &'a [Ability],
    target: &TargetId,
    mode: AbilityMode,
    request_origin: &str,
    now_ms: u64,
) -> Option<&'a Ability> {
    abilities
        .iter()
        .filter(|a| a.delegate_origin == request_origin)
        .find(|a| a.covers(target, mode, now_ms))
}
