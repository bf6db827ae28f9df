//! Ledger mutations and persisted ledger entries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::member::{ChatId, MemberId};
use crate::error::RejectReason;

/// The kind of change a mutation makes to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    /// A new debt: debtor owes creditor.
    Debt,
    /// A payment against outstanding debt between the pair.
    Payment,
    /// Flip the settlement flag on all open entries between the pair.
    Settle,
}

impl MutationKind {
    /// Wire name used in oracle envelopes.
    pub fn as_shape(&self) -> &'static str {
        match self {
            MutationKind::Debt => "debt.create",
            MutationKind::Payment => "payment.record",
            MutationKind::Settle => "debt.settle",
        }
    }

    pub fn from_shape(shape: &str) -> Option<Self> {
        match shape {
            "debt.create" => Some(MutationKind::Debt),
            "payment.record" => Some(MutationKind::Payment),
            "debt.settle" => Some(MutationKind::Settle),
            _ => None,
        }
    }
}

/// One atomic unit of change to the debt ledger. All mutations in one turn
/// commit together or not at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerMutation {
    pub chat_id: ChatId,
    pub kind: MutationKind,
    pub creditor: MemberId,
    pub debtor: MemberId,
    pub amount: Decimal,
    pub currency: String,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerMutation {
    /// Row-level invariants. Member existence is checked against the
    /// directory by the executor, not here.
    pub fn validate(&self) -> Result<(), RejectReason> {
        if self.amount <= Decimal::ZERO {
            return Err(RejectReason::NonPositiveAmount);
        }
        if self.creditor == self.debtor {
            return Err(RejectReason::SelfReference);
        }
        Ok(())
    }
}

/// A persisted ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: Uuid,
    pub chat_id: ChatId,
    pub kind: MutationKind,
    pub creditor: MemberId,
    pub debtor: MemberId,
    pub amount: Decimal,
    pub currency: String,
    pub note: Option<String>,
    pub settled: bool,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Materialize an insertable entry from a validated mutation.
    pub fn from_mutation(mutation: &LedgerMutation) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            chat_id: mutation.chat_id,
            kind: mutation.kind,
            creditor: mutation.creditor,
            debtor: mutation.debtor,
            amount: mutation.amount,
            currency: mutation.currency.clone(),
            note: mutation.note.clone(),
            settled: false,
            occurred_at: mutation.occurred_at,
            recorded_at: Utc::now(),
        }
    }

    /// Whether this entry sits between the given pair, in either direction.
    pub fn between(&self, a: MemberId, b: MemberId) -> bool {
        (self.creditor == a && self.debtor == b) || (self.creditor == b && self.debtor == a)
    }
}
