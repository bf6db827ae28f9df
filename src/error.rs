//! Error taxonomy for the resolution & dispatch core.
//!
//! Everything the persistence layer can throw is converted to [`StoreError`]
//! at the repository boundary and wrapped into [`CoreError`] by the component
//! that owns the transaction. Nothing below the dispatcher is allowed to leak
//! a raw store error into a user-visible reply.

use thiserror::Error;

use crate::domain::member::{ChatId, MemberId};

/// Top-level error type for the core.
///
/// `AmbiguousReference` is intentionally absent: ambiguity is a control-flow
/// branch (`Resolution::Ambiguous`), not a failure.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unresolvable reference: {0}")]
    UnresolvableReference(String),

    #[error("ledger rejected: {0}")]
    LedgerRejected(RejectReason),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("oracle timed out")]
    OracleTimeout,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<RejectReason> for CoreError {
    fn from(reason: RejectReason) -> Self {
        CoreError::LedgerRejected(reason)
    }
}

/// Why a ledger batch was rejected. The whole batch is rolled back; the
/// reason is reported to the caller, never verbatim to the chat.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectReason {
    #[error("unknown member {member_id} in chat {chat_id}")]
    UnknownMember { chat_id: ChatId, member_id: MemberId },

    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("creditor and debtor are the same member")]
    SelfReference,
}

/// Persistence-layer error, produced by both the in-memory and the Postgres
/// backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("backend: {0}")]
    Backend(String),
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".into()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
