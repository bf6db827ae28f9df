//! Domain types: members, aliases, ledger mutations, and the oracle
//! envelope.

pub mod alias;
pub mod envelope;
pub mod ledger;
pub mod member;

pub use alias::{AliasEntry, AliasSource, AliasUpsert, ConfidenceWrite};
pub use envelope::{Continuation, DispatchEnvelope, EnvelopeKind, MessageFragment, MutationIntent};
pub use ledger::{LedgerEntry, LedgerMutation, MutationKind};
pub use member::{ChatId, Member, MemberId};
