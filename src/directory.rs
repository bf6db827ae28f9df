//! Member directory: real sightings, virtual materialization, and the
//! administrative merge.

use std::sync::Arc;

use crate::domain::alias::AliasUpsert;
use crate::domain::member::{ChatId, Member, MemberId};
use crate::error::{CoreError, StoreError};
use crate::resolution::normalize::normalize_reference;
use crate::store::Store;

/// Per-chat registry of real and virtual members.
pub struct MemberDirectory {
    store: Arc<dyn Store>,
    provisional_confidence: f32,
}

impl MemberDirectory {
    pub fn new(store: Arc<dyn Store>, provisional_confidence: f32) -> Self {
        Self {
            store,
            provisional_confidence,
        }
    }

    /// Register a member sighted on the chat platform. Idempotent on
    /// normalized display name; seeds a display-name alias so the member is
    /// reachable by the resolver from the first turn.
    pub async fn register_real(
        &self,
        chat_id: ChatId,
        display_name: &str,
    ) -> Result<Member, CoreError> {
        let norm = normalize_reference(display_name);
        if let Some(existing) = self.store.find_by_display_norm(chat_id, &norm).await? {
            return Ok(existing);
        }
        let member = Member::real(chat_id, display_name);
        self.store.insert_member(&member).await?;
        self.store
            .upsert_alias(&AliasUpsert::seeded(chat_id, norm, member.member_id, 1.0))
            .await?;
        tracing::info!(chat_id = %chat_id, member_id = %member.member_id, "real member registered");
        Ok(member)
    }

    /// Get the member matching `display_name`, or materialize a virtual one.
    ///
    /// Returns `(member, created)`. Creation also writes a provisional alias
    /// at low confidence so future scoring still allows correction.
    pub async fn get_or_create_virtual(
        &self,
        chat_id: ChatId,
        display_name: &str,
    ) -> Result<(Member, bool), CoreError> {
        let norm = normalize_reference(display_name);
        if norm.is_empty() {
            return Err(CoreError::UnresolvableReference(display_name.to_string()));
        }
        if let Some(existing) = self.store.find_by_display_norm(chat_id, &norm).await? {
            return Ok((existing, false));
        }

        let member = Member::virtual_member(chat_id, display_name);
        self.store.insert_member(&member).await?;
        self.store
            .upsert_alias(&AliasUpsert::provisional(
                chat_id,
                norm,
                member.member_id,
                self.provisional_confidence,
            ))
            .await?;
        tracing::info!(
            chat_id = %chat_id,
            member_id = %member.member_id,
            display_name = %member.display_name,
            "virtual member materialized"
        );
        Ok((member, true))
    }

    /// Administrative merge of a virtual member into a real one. All ledger
    /// and alias rows are repointed in one transaction; the virtual row
    /// survives as a tombstone for audit. Authorization is the caller's
    /// problem.
    pub async fn merge(
        &self,
        chat_id: ChatId,
        virtual_id: MemberId,
        real_id: MemberId,
    ) -> Result<(), CoreError> {
        let source = self
            .store
            .get_member(chat_id, virtual_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("member {virtual_id}")))?;
        if !source.is_virtual {
            return Err(CoreError::Store(StoreError::Conflict(format!(
                "member {virtual_id} is not virtual"
            ))));
        }
        let target = self
            .store
            .get_member(chat_id, real_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("member {real_id}")))?;
        if target.is_virtual {
            return Err(CoreError::Store(StoreError::Conflict(format!(
                "merge target {real_id} is itself virtual"
            ))));
        }

        self.store.merge_members(chat_id, virtual_id, real_id).await?;
        tracing::info!(
            chat_id = %chat_id,
            source = %virtual_id,
            target = %real_id,
            "virtual member merged"
        );
        Ok(())
    }

    pub async fn get(
        &self,
        chat_id: ChatId,
        member_id: MemberId,
    ) -> Result<Option<Member>, CoreError> {
        Ok(self.store.get_member(chat_id, member_id).await?)
    }
}
