//! Repository boundary over the persistence engine.
//!
//! The core treats the database as a transactional store reached only
//! through these traits. `apply_batch` and `merge_members` are the two
//! transactional write paths; everything user-controlled crosses them as
//! bound values, never as query text.

use async_trait::async_trait;

use crate::domain::alias::{AliasEntry, AliasUpsert};
use crate::domain::ledger::{LedgerEntry, LedgerMutation};
use crate::domain::member::{ChatId, Member, MemberId};
use crate::error::StoreError;

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use postgres::PgStore;

/// Per-chat registry of real and virtual members.
#[async_trait]
pub trait MemberRepository: Send + Sync {
    async fn insert_member(&self, member: &Member) -> Result<(), StoreError>;

    async fn get_member(
        &self,
        chat_id: ChatId,
        member_id: MemberId,
    ) -> Result<Option<Member>, StoreError>;

    /// Look up an active (non-tombstoned) member by normalized display name.
    async fn find_by_display_norm(
        &self,
        chat_id: ChatId,
        display_norm: &str,
    ) -> Result<Option<Member>, StoreError>;

    async fn list_members(&self, chat_id: ChatId) -> Result<Vec<Member>, StoreError>;
}

/// Per-chat alias persistence.
#[async_trait]
pub trait AliasRepository: Send + Sync {
    async fn aliases_for_chat(&self, chat_id: ChatId) -> Result<Vec<AliasEntry>, StoreError>;

    /// Insert or update the `(chat_id, alias_text, member_id)` entry.
    /// Confidence is computed from the upsert's write mode; `last_used_at`
    /// is refreshed on every call.
    async fn upsert_alias(&self, upsert: &AliasUpsert) -> Result<(), StoreError>;

    /// Administrative bulk seeding.
    async fn seed_aliases(&self, upserts: &[AliasUpsert]) -> Result<(), StoreError> {
        for upsert in upserts {
            self.upsert_alias(upsert).await?;
        }
        Ok(())
    }
}

/// Transactional ledger writes.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Apply a turn's mutations and alias writes as one transaction:
    /// either every row lands or none do.
    async fn apply_batch(
        &self,
        chat_id: ChatId,
        mutations: &[LedgerMutation],
        alias_writes: &[AliasUpsert],
    ) -> Result<(), StoreError>;

    async fn entries_for_chat(&self, chat_id: ChatId) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Repoint every ledger row and alias row from `source` to `target`
    /// inside one transaction, leaving `source` as a tombstone.
    async fn merge_members(
        &self,
        chat_id: ChatId,
        source: MemberId,
        target: MemberId,
    ) -> Result<(), StoreError>;
}

/// The full store the core components share.
pub trait Store: MemberRepository + AliasRepository + LedgerRepository {}

impl<T> Store for T where T: MemberRepository + AliasRepository + LedgerRepository {}
