//! Learned alias mappings from reference text to chat members.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::member::{ChatId, MemberId};

/// How an alias entered the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasSource {
    /// Confirmed by a human, explicitly or by accepting a single
    /// unambiguous candidate.
    Learned,
    /// Installed administratively (e.g. display-name seeding).
    Seeded,
}

impl AliasSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasSource::Learned => "learned",
            AliasSource::Seeded => "seeded",
        }
    }
}

/// A learned mapping from a normalized text fragment to a member, scoped to
/// one chat. At most one entry exists per `(chat_id, alias_text, member_id)`
/// triple; confidence is updated in place, never duplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasEntry {
    pub chat_id: ChatId,
    /// Normalized alias text (see [`crate::resolution::normalize`]).
    pub alias_text: String,
    pub member_id: MemberId,
    pub confidence: f32,
    pub last_used_at: DateTime<Utc>,
    pub source: AliasSource,
}

/// How a write changes an alias's confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfidenceWrite {
    /// Overwrite with an absolute value (clamped to [0, 1]).
    Set(f32),
    /// Move the current confidence toward 1.0 by the given step; a missing
    /// entry starts from 0.0, so its first reinforcement lands at `step`.
    Reinforce(f32),
}

impl ConfidenceWrite {
    /// Compute the new confidence given the stored one (if any).
    pub fn apply(&self, current: Option<f32>) -> f32 {
        match *self {
            ConfidenceWrite::Set(c) => c.clamp(0.0, 1.0),
            ConfidenceWrite::Reinforce(step) => {
                let base = current.unwrap_or(0.0).clamp(0.0, 1.0);
                (base + (1.0 - base) * step.clamp(0.0, 1.0)).clamp(0.0, 1.0)
            }
        }
    }
}

/// One alias write, applied inside the same transaction as the ledger batch
/// (or by the ambiguity-confirmation step, which owns its own write).
#[derive(Debug, Clone, PartialEq)]
pub struct AliasUpsert {
    pub chat_id: ChatId,
    pub alias_text: String,
    pub member_id: MemberId,
    pub source: AliasSource,
    pub write: ConfidenceWrite,
}

impl AliasUpsert {
    /// A human confirmed this mapping: confidence pins to 1.0.
    pub fn confirmed(chat_id: ChatId, alias_text: String, member_id: MemberId) -> Self {
        Self {
            chat_id,
            alias_text,
            member_id,
            source: AliasSource::Learned,
            write: ConfidenceWrite::Set(1.0),
        }
    }

    /// The mapping was used and implicitly accepted: move toward 1.0.
    pub fn reinforced(
        chat_id: ChatId,
        alias_text: String,
        member_id: MemberId,
        step: f32,
    ) -> Self {
        Self {
            chat_id,
            alias_text,
            member_id,
            source: AliasSource::Learned,
            write: ConfidenceWrite::Reinforce(step),
        }
    }

    /// Provisional mapping for a freshly created virtual member. Low
    /// confidence keeps future scoring open to correction.
    pub fn provisional(
        chat_id: ChatId,
        alias_text: String,
        member_id: MemberId,
        confidence: f32,
    ) -> Self {
        Self {
            chat_id,
            alias_text,
            member_id,
            source: AliasSource::Learned,
            write: ConfidenceWrite::Set(confidence),
        }
    }

    /// Administrative seeding.
    pub fn seeded(chat_id: ChatId, alias_text: String, member_id: MemberId, confidence: f32) -> Self {
        Self {
            chat_id,
            alias_text,
            member_id,
            source: AliasSource::Seeded,
            write: ConfidenceWrite::Set(confidence),
        }
    }
}
