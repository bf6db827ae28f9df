//! Per-turn controller.
//!
//! `handle_turn` is the single entry point for a validated envelope:
//! resolve every reference, suspend what is ambiguous, materialize virtual
//! members where the counterparty is unknown, commit the resolved
//! mutations as one batch, then stream the turn's fragments.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;

use crate::config::CoreConfig;
use crate::directory::MemberDirectory;
use crate::domain::envelope::{Continuation, DispatchEnvelope, MessageFragment, MutationIntent};
use crate::domain::ledger::LedgerMutation;
use crate::domain::member::{ChatId, Member, MemberId};
use crate::domain::alias::AliasUpsert;
use crate::error::{CoreError, RejectReason};
use crate::ledger::{ApplyOutcome, LedgerExecutor};
use crate::resolution::normalize::normalize_reference;
use crate::resolution::{
    AmbiguityNegotiator, Confirmation, PendingCandidate, Resolution, Resolver, ResolverConfig,
    SuspendedIntent,
};
use crate::store::Store;
use crate::transport::ChatTransport;

use super::pacing::FragmentPacer;
use super::{dropped_note, resume_ack, virtual_member_note, REJECTED_REPLY};

/// An ambiguity opened during this turn; the caller owes the chat a
/// clarifying question enumerating the candidates.
#[derive(Debug, Clone)]
pub struct ClarificationRequest {
    pub reference_text: String,
    pub candidates: Vec<PendingCandidate>,
}

/// A mutation intent dropped from the turn, with a user-presentable cause.
#[derive(Debug, Clone)]
pub struct DroppedIntent {
    pub reference_text: String,
    pub reason: String,
}

/// What one turn did.
#[derive(Debug)]
pub struct TurnResult {
    /// Mutations committed in this turn's batch.
    pub applied: usize,
    /// Set when the batch was rejected wholesale.
    pub rejected: Option<RejectReason>,
    /// Ambiguities opened (or re-joined) by this turn.
    pub clarifications: Vec<ClarificationRequest>,
    pub dropped: Vec<DroppedIntent>,
    /// Virtual members materialized by this turn.
    pub virtual_members: Vec<Member>,
    pub fragments_sent: usize,
    pub continuation: Continuation,
}

impl TurnResult {
    /// Normalized references of ambiguities this turn opened, for turn
    /// accounting in the negotiator.
    pub fn opened_references(&self) -> HashSet<String> {
        self.clarifications
            .iter()
            .map(|c| normalize_reference(&c.reference_text))
            .collect()
    }
}

enum IntentOutcome {
    Ready {
        mutation: LedgerMutation,
        alias_writes: Vec<AliasUpsert>,
        virtuals: Vec<Member>,
    },
    Suspended(ClarificationRequest),
    Dropped(DroppedIntent),
}

/// Drives one chat turn end to end. Callers must serialize turns per chat
/// (see [`super::ChatRouter`]); the dispatcher itself takes no chat lock.
pub struct TurnDispatcher {
    resolver: Resolver,
    negotiator: Arc<AmbiguityNegotiator>,
    directory: MemberDirectory,
    executor: LedgerExecutor,
    pacer: FragmentPacer,
    reinforcement: f32,
    min_delay_ms: u64,
}

impl TurnDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn ChatTransport>,
        negotiator: Arc<AmbiguityNegotiator>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            resolver: Resolver::new(store.clone(), ResolverConfig::from(config)),
            negotiator,
            directory: MemberDirectory::new(store.clone(), config.provisional_confidence),
            executor: LedgerExecutor::new(store),
            pacer: FragmentPacer::new(transport, config),
            reinforcement: config.confidence_reinforcement,
            min_delay_ms: config.min_fragment_delay_ms,
        }
    }

    pub fn directory(&self) -> &MemberDirectory {
        &self.directory
    }

    /// Process one validated envelope for the chat.
    pub async fn handle_turn(
        &self,
        chat_id: ChatId,
        envelope: DispatchEnvelope,
    ) -> Result<TurnResult, CoreError> {
        let mut ready: Vec<LedgerMutation> = Vec::new();
        let mut alias_writes: Vec<AliasUpsert> = Vec::new();
        let mut clarifications: Vec<ClarificationRequest> = Vec::new();
        let mut dropped: Vec<DroppedIntent> = Vec::new();
        let mut virtual_members: Vec<Member> = Vec::new();

        for intent in &envelope.intents {
            match self
                .resolve_intent(chat_id, intent, HashMap::new())
                .await?
            {
                IntentOutcome::Ready {
                    mutation,
                    alias_writes: writes,
                    virtuals,
                } => {
                    ready.push(mutation);
                    alias_writes.extend(writes);
                    virtual_members.extend(virtuals);
                }
                IntentOutcome::Suspended(request) => clarifications.push(request),
                IntentOutcome::Dropped(drop) => {
                    tracing::warn!(
                        chat_id = %chat_id,
                        reference = %drop.reference_text,
                        reason = %drop.reason,
                        "mutation intent dropped"
                    );
                    dropped.push(drop);
                }
            }
        }

        let outcome = self.executor.apply(chat_id, &ready, &alias_writes).await?;
        let (applied, rejected) = match outcome {
            ApplyOutcome::Applied { mutations } => (mutations, None),
            ApplyOutcome::Rejected(reason) => (0, Some(reason)),
        };

        // On rejection the envelope's own wording no longer holds; send only
        // the generic failure. Otherwise the oracle's fragments go out,
        // followed by notes for members this turn materialized and for
        // mutations it had to drop.
        let fragments: Vec<MessageFragment> = if rejected.is_some() {
            vec![self.fragment(REJECTED_REPLY.to_string())]
        } else {
            let mut out = envelope.fragments.clone();
            out.extend(
                virtual_members
                    .iter()
                    .map(|m| self.fragment(virtual_member_note(&m.display_name))),
            );
            out.extend(
                dropped
                    .iter()
                    .map(|d| self.fragment(dropped_note(&d.reference_text))),
            );
            out
        };
        let fragments_sent = self.pacer.deliver(chat_id, &fragments).await;

        if envelope.continuation == Continuation::Stop {
            self.negotiator.expire_all(chat_id).await;
        }

        tracing::info!(
            chat_id = %chat_id,
            applied,
            suspended = clarifications.len(),
            dropped = dropped.len(),
            fragments_sent,
            "turn completed"
        );

        Ok(TurnResult {
            applied,
            rejected,
            clarifications,
            dropped,
            virtual_members,
            fragments_sent,
            continuation: envelope.continuation,
        })
    }

    /// Resume the suspended intents of a confirmed ambiguity. The confirmed
    /// id is bound directly — the reference is not re-scored, so a
    /// still-ambiguous alias table cannot re-trap an answered question.
    pub async fn resume(
        &self,
        chat_id: ChatId,
        confirmation: Confirmation,
    ) -> Result<TurnResult, CoreError> {
        let mut ready: Vec<LedgerMutation> = Vec::new();
        let mut alias_writes: Vec<AliasUpsert> = Vec::new();
        let mut clarifications: Vec<ClarificationRequest> = Vec::new();
        let mut dropped: Vec<DroppedIntent> = Vec::new();
        let mut virtual_members: Vec<Member> = Vec::new();

        for suspended in confirmation.suspended {
            let mut bindings = suspended.bindings;
            bindings.insert(
                confirmation.reference_norm.clone(),
                confirmation.chosen.member_id,
            );
            match self
                .resolve_intent(chat_id, &suspended.intent, bindings)
                .await?
            {
                IntentOutcome::Ready {
                    mutation,
                    alias_writes: writes,
                    virtuals,
                } => {
                    ready.push(mutation);
                    alias_writes.extend(writes);
                    virtual_members.extend(virtuals);
                }
                IntentOutcome::Suspended(request) => clarifications.push(request),
                IntentOutcome::Dropped(drop) => dropped.push(drop),
            }
        }

        let outcome = self.executor.apply(chat_id, &ready, &alias_writes).await?;
        let (applied, rejected) = match outcome {
            ApplyOutcome::Applied { mutations } => (mutations, None),
            ApplyOutcome::Rejected(reason) => (0, Some(reason)),
        };

        let fragments: Vec<MessageFragment> = if rejected.is_some() {
            vec![self.fragment(REJECTED_REPLY.to_string())]
        } else {
            let mut out = vec![self.fragment(resume_ack(&confirmation.chosen.display_name))];
            out.extend(
                virtual_members
                    .iter()
                    .map(|m| self.fragment(virtual_member_note(&m.display_name))),
            );
            out.extend(
                dropped
                    .iter()
                    .map(|d| self.fragment(dropped_note(&d.reference_text))),
            );
            out
        };
        let fragments_sent = self.pacer.deliver(chat_id, &fragments).await;

        Ok(TurnResult {
            applied,
            rejected,
            clarifications,
            dropped,
            virtual_members,
            fragments_sent,
            continuation: Continuation::Continue,
        })
    }

    fn fragment(&self, text: String) -> MessageFragment {
        MessageFragment {
            text,
            delay_ms: self.min_delay_ms,
        }
    }

    /// Resolve both parties of one intent. `bindings` short-circuits
    /// references already pinned to a member (resume path, or the second
    /// occurrence of a reference within the intent).
    async fn resolve_intent(
        &self,
        chat_id: ChatId,
        intent: &MutationIntent,
        mut bindings: HashMap<String, MemberId>,
    ) -> Result<IntentOutcome, CoreError> {
        let mut alias_writes: Vec<AliasUpsert> = Vec::new();
        let mut virtuals: Vec<Member> = Vec::new();

        for reference in [&intent.creditor_ref, &intent.debtor_ref] {
            let norm = normalize_reference(reference);
            if norm.is_empty() {
                return Ok(IntentOutcome::Dropped(DroppedIntent {
                    reference_text: reference.clone(),
                    reason: "blank reference".into(),
                }));
            }
            if bindings.contains_key(&norm) {
                continue;
            }

            match self.resolver.resolve(chat_id, reference).await? {
                Resolution::Resolved {
                    member_id,
                    confidence,
                    matched_alias,
                } => {
                    tracing::debug!(
                        chat_id = %chat_id,
                        reference = %norm,
                        member_id = %member_id,
                        confidence,
                        alias = %matched_alias,
                        "reference resolved"
                    );
                    // Implicit acceptance: the reference itself becomes (or
                    // strengthens) an alias, committed with the batch.
                    alias_writes.push(AliasUpsert::reinforced(
                        chat_id,
                        norm.clone(),
                        member_id,
                        self.reinforcement,
                    ));
                    bindings.insert(norm, member_id);
                }
                Resolution::Ambiguous(candidates) => {
                    let mut pending_candidates = Vec::with_capacity(candidates.len());
                    for c in &candidates {
                        let display_name = self
                            .directory
                            .get(chat_id, c.member_id)
                            .await?
                            .map(|m| m.display_name)
                            .unwrap_or_else(|| c.matched_alias.clone());
                        pending_candidates.push(PendingCandidate {
                            member_id: c.member_id,
                            display_name,
                        });
                    }
                    let suspended = SuspendedIntent {
                        intent: intent.clone(),
                        bindings,
                    };
                    let offered = self
                        .negotiator
                        .open(chat_id, reference, pending_candidates, vec![suspended])
                        .await;
                    return Ok(IntentOutcome::Suspended(ClarificationRequest {
                        reference_text: reference.clone(),
                        candidates: offered,
                    }));
                }
                Resolution::Unresolved => {
                    // The counterparty of a mutation is required: materialize
                    // a virtual member rather than failing silently.
                    let (member, created) =
                        self.directory.get_or_create_virtual(chat_id, reference).await?;
                    bindings.insert(norm, member.member_id);
                    if created {
                        virtuals.push(member);
                    }
                }
            }
        }

        let creditor = bindings[&normalize_reference(&intent.creditor_ref)];
        let debtor = bindings[&normalize_reference(&intent.debtor_ref)];
        Ok(IntentOutcome::Ready {
            mutation: LedgerMutation {
                chat_id,
                kind: intent.kind,
                creditor,
                debtor,
                amount: intent.amount,
                currency: intent.currency.clone(),
                note: intent.note.clone(),
                occurred_at: Utc::now(),
            },
            alias_writes,
            virtuals,
        })
    }
}
