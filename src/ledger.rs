//! Ledger executor: the single transactional write path for a turn's
//! mutations.

use std::sync::Arc;

use crate::domain::alias::AliasUpsert;
use crate::domain::ledger::LedgerMutation;
use crate::domain::member::ChatId;
use crate::error::{CoreError, RejectReason};
use crate::store::Store;

/// Outcome of applying a batch. Rejection is a value, not an error: the
/// caller is told which invariant failed and the store is untouched.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Applied { mutations: usize },
    Rejected(RejectReason),
}

/// Applies a turn's mutations (plus the turn's alias writes) as one
/// all-or-nothing batch.
pub struct LedgerExecutor {
    store: Arc<dyn Store>,
}

impl LedgerExecutor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Validate every mutation, then commit the whole batch in one store
    /// transaction. The first failed invariant rejects the entire batch
    /// with no partial effect.
    pub async fn apply(
        &self,
        chat_id: ChatId,
        mutations: &[LedgerMutation],
        alias_writes: &[AliasUpsert],
    ) -> Result<ApplyOutcome, CoreError> {
        if mutations.is_empty() && alias_writes.is_empty() {
            return Ok(ApplyOutcome::Applied { mutations: 0 });
        }

        for mutation in mutations {
            if let Err(reason) = mutation.validate() {
                tracing::warn!(chat_id = %chat_id, %reason, "batch rejected");
                return Ok(ApplyOutcome::Rejected(reason));
            }
            for member_id in [mutation.creditor, mutation.debtor] {
                let known = self
                    .store
                    .get_member(chat_id, member_id)
                    .await?
                    .is_some_and(|m| m.is_active());
                if !known {
                    let reason = RejectReason::UnknownMember { chat_id, member_id };
                    tracing::warn!(chat_id = %chat_id, %reason, "batch rejected");
                    return Ok(ApplyOutcome::Rejected(reason));
                }
            }
        }

        self.store
            .apply_batch(chat_id, mutations, alias_writes)
            .await?;

        tracing::info!(
            chat_id = %chat_id,
            mutations = mutations.len(),
            alias_writes = alias_writes.len(),
            "ledger batch applied"
        );
        Ok(ApplyOutcome::Applied {
            mutations: mutations.len(),
        })
    }
}
