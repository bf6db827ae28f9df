//! Ambiguity negotiation: open "which X?" questions and their lifecycle.
//!
//! Per `(chat, reference)` the negotiator runs `NONE → OPEN → {CONFIRMED,
//! EXPIRED}`. Pending state is conversational and turn-scoped, so it lives
//! in memory; losing it degrades to re-asking, which the EXPIRED path
//! already covers. The alias write on confirmation is the one store write
//! this component owns.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::alias::AliasUpsert;
use crate::domain::envelope::MutationIntent;
use crate::domain::member::{ChatId, MemberId};
use crate::error::CoreError;
use crate::store::Store;

use super::normalize::{match_key, normalize_reference};

/// One candidate offered to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCandidate {
    pub member_id: MemberId,
    pub display_name: String,
}

/// A mutation intent parked while one of its references awaits
/// disambiguation. `bindings` carries the references already resolved when
/// the intent was suspended, keyed by normalized reference text.
#[derive(Debug, Clone)]
pub struct SuspendedIntent {
    pub intent: MutationIntent,
    pub bindings: HashMap<String, MemberId>,
}

/// An open "which X?" question.
#[derive(Debug, Clone)]
pub struct PendingAmbiguity {
    pub chat_id: ChatId,
    /// Reference text as the user typed it.
    pub reference_text: String,
    pub reference_norm: String,
    /// Ordered highest-confidence first, as produced by the resolver.
    pub candidates: Vec<PendingCandidate>,
    pub suspended: Vec<SuspendedIntent>,
    pub opened_at: DateTime<Utc>,
    /// Non-addressing turns left before expiry.
    turns_remaining: u32,
}

/// A confirmed ambiguity, carrying everything needed to resume.
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub reference_text: String,
    pub reference_norm: String,
    pub chosen: PendingCandidate,
    pub suspended: Vec<SuspendedIntent>,
}

/// Tracks open ambiguities and matches inbound messages against them.
pub struct AmbiguityNegotiator {
    store: Arc<dyn Store>,
    pending: RwLock<HashMap<(ChatId, String), PendingAmbiguity>>,
    ttl_turns: u32,
}

impl AmbiguityNegotiator {
    pub fn new(store: Arc<dyn Store>, ttl_turns: u32) -> Self {
        Self {
            store,
            pending: RwLock::new(HashMap::new()),
            ttl_turns: ttl_turns.max(1),
        }
    }

    /// Open a pending ambiguity, or extend the existing one for the same
    /// `(chat, reference)` — a duplicate is never created. Returns the
    /// candidate set actually pending (the existing one on reuse).
    pub async fn open(
        &self,
        chat_id: ChatId,
        reference_text: &str,
        candidates: Vec<PendingCandidate>,
        suspended: Vec<SuspendedIntent>,
    ) -> Vec<PendingCandidate> {
        let reference_norm = normalize_reference(reference_text);
        let mut pending = self.pending.write().await;
        match pending.get_mut(&(chat_id, reference_norm.clone())) {
            Some(p) => {
                p.suspended.extend(suspended);
                p.turns_remaining = self.ttl_turns;
                p.candidates.clone()
            }
            None => {
                tracing::info!(
                    chat_id = %chat_id,
                    reference = %reference_norm,
                    candidates = candidates.len(),
                    "ambiguity opened"
                );
                pending.insert(
                    (chat_id, reference_norm.clone()),
                    PendingAmbiguity {
                        chat_id,
                        reference_text: reference_text.to_string(),
                        reference_norm,
                        candidates: candidates.clone(),
                        suspended,
                        opened_at: Utc::now(),
                        turns_remaining: self.ttl_turns,
                    },
                );
                candidates
            }
        }
    }

    /// Evaluate an inbound message as a candidate answer to the chat's open
    /// ambiguities. On a unique match the pending is consumed, the alias is
    /// learned at confidence 1.0, and the suspended intents are returned
    /// for resumption. A non-answer returns `None` and leaves state alone
    /// (turn accounting happens separately in [`Self::tick`]).
    pub async fn answer(
        &self,
        chat_id: ChatId,
        inbound: &str,
    ) -> Result<Option<Confirmation>, CoreError> {
        let inbound_key = match_key(inbound);
        if inbound_key.is_empty() {
            return Ok(None);
        }
        let ordinal = inbound.trim().parse::<usize>().ok();

        let mut pending = self.pending.write().await;

        let mut matches: Vec<(String, PendingCandidate)> = Vec::new();
        for ((chat, reference_norm), p) in pending.iter() {
            if *chat != chat_id {
                continue;
            }
            for (i, candidate) in p.candidates.iter().enumerate() {
                if candidate_matches(candidate, &inbound_key, ordinal, i) {
                    matches.push((reference_norm.clone(), candidate.clone()));
                }
            }
        }

        // Anything but exactly one match across all open pendings is not an
        // answer; the question stays open.
        if matches.len() != 1 {
            return Ok(None);
        }
        let (reference_norm, chosen) = matches.into_iter().next().expect("len checked");
        let p = pending
            .remove(&(chat_id, reference_norm.clone()))
            .expect("matched pending exists");
        drop(pending);

        self.store
            .upsert_alias(&AliasUpsert::confirmed(
                chat_id,
                reference_norm.clone(),
                chosen.member_id,
            ))
            .await?;

        tracing::info!(
            chat_id = %chat_id,
            reference = %reference_norm,
            member_id = %chosen.member_id,
            "ambiguity confirmed, alias learned"
        );

        Ok(Some(Confirmation {
            reference_text: p.reference_text,
            reference_norm,
            chosen,
            suspended: p.suspended,
        }))
    }

    /// Account one completed turn that did not address the chat's open
    /// ambiguities. Pendings opened during that turn (`just_opened`, by
    /// normalized reference) are exempt; the rest lose a turn and expire at
    /// zero, dropping their suspended intents.
    pub async fn tick(&self, chat_id: ChatId, just_opened: &HashSet<String>) {
        let mut pending = self.pending.write().await;
        pending.retain(|(chat, reference_norm), p| {
            if *chat != chat_id || just_opened.contains(reference_norm) {
                return true;
            }
            p.turns_remaining = p.turns_remaining.saturating_sub(1);
            if p.turns_remaining == 0 {
                tracing::info!(
                    chat_id = %chat_id,
                    reference = %reference_norm,
                    dropped_intents = p.suspended.len(),
                    "ambiguity expired"
                );
                false
            } else {
                true
            }
        });
    }

    /// Drop every open ambiguity for the chat (used when a turn ends with
    /// `continuation=stop`).
    pub async fn expire_all(&self, chat_id: ChatId) {
        let mut pending = self.pending.write().await;
        pending.retain(|(chat, _), _| *chat != chat_id);
    }

    pub async fn is_open(&self, chat_id: ChatId, reference: &str) -> bool {
        let pending = self.pending.read().await;
        pending.contains_key(&(chat_id, normalize_reference(reference)))
    }

    pub async fn open_count(&self, chat_id: ChatId) -> usize {
        let pending = self.pending.read().await;
        pending.keys().filter(|(chat, _)| *chat == chat_id).count()
    }
}

/// A candidate is addressed by its display name (insensitively, containment
/// either direction) or by its 1-based position in the offered list.
fn candidate_matches(
    candidate: &PendingCandidate,
    inbound_key: &str,
    ordinal: Option<usize>,
    index: usize,
) -> bool {
    if ordinal == Some(index + 1) {
        return true;
    }
    let name_key = match_key(&candidate.display_name);
    !name_key.is_empty() && (name_key.contains(inbound_key) || inbound_key.contains(&name_key))
}
