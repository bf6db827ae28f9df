//! In-memory store backend.
//!
//! The default runtime and test backend. A single `RwLock` over the per-chat
//! state makes batch application trivially atomic: validation happens before
//! the first write, and every write of a batch lands under one guard.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::alias::{AliasEntry, AliasUpsert, ConfidenceWrite};
use crate::domain::ledger::{LedgerEntry, LedgerMutation, MutationKind};
use crate::domain::member::{ChatId, Member, MemberId};
use crate::error::StoreError;

use super::{AliasRepository, LedgerRepository, MemberRepository};

#[derive(Default)]
struct ChatState {
    members: HashMap<MemberId, Member>,
    /// Keyed by `(alias_text, member_id)` — the uniqueness triple with the
    /// chat id factored out.
    aliases: HashMap<(String, MemberId), AliasEntry>,
    entries: Vec<LedgerEntry>,
}

/// Always-available in-memory backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<ChatId, ChatState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn upsert_into(state: &mut ChatState, upsert: &AliasUpsert) {
    let key = (upsert.alias_text.clone(), upsert.member_id);
    match state.aliases.get_mut(&key) {
        Some(entry) => {
            entry.confidence = upsert.write.apply(Some(entry.confidence));
            entry.last_used_at = Utc::now();
            // Reinforcement strengthens whatever is there; only an absolute
            // write re-attributes the entry.
            if matches!(upsert.write, ConfidenceWrite::Set(_)) {
                entry.source = upsert.source;
            }
        }
        None => {
            state.aliases.insert(
                key,
                AliasEntry {
                    chat_id: upsert.chat_id,
                    alias_text: upsert.alias_text.clone(),
                    member_id: upsert.member_id,
                    confidence: upsert.write.apply(None),
                    last_used_at: Utc::now(),
                    source: upsert.source,
                },
            );
        }
    }
}

#[async_trait]
impl MemberRepository for MemoryStore {
    async fn insert_member(&self, member: &Member) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let state = inner.entry(member.chat_id).or_default();
        if state.members.contains_key(&member.member_id) {
            return Err(StoreError::Conflict(format!(
                "member {} already exists in chat {}",
                member.member_id, member.chat_id
            )));
        }
        state.members.insert(member.member_id, member.clone());
        Ok(())
    }

    async fn get_member(
        &self,
        chat_id: ChatId,
        member_id: MemberId,
    ) -> Result<Option<Member>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(&chat_id)
            .and_then(|s| s.members.get(&member_id))
            .cloned())
    }

    async fn find_by_display_norm(
        &self,
        chat_id: ChatId,
        display_norm: &str,
    ) -> Result<Option<Member>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.get(&chat_id).and_then(|s| {
            s.members
                .values()
                .find(|m| m.is_active() && m.display_name_norm == display_norm)
                .cloned()
        }))
    }

    async fn list_members(&self, chat_id: ChatId) -> Result<Vec<Member>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(&chat_id)
            .map(|s| s.members.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl AliasRepository for MemoryStore {
    async fn aliases_for_chat(&self, chat_id: ChatId) -> Result<Vec<AliasEntry>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(&chat_id)
            .map(|s| s.aliases.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert_alias(&self, upsert: &AliasUpsert) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let state = inner.entry(upsert.chat_id).or_default();
        upsert_into(state, upsert);
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn apply_batch(
        &self,
        chat_id: ChatId,
        mutations: &[LedgerMutation],
        alias_writes: &[AliasUpsert],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let state = inner.entry(chat_id).or_default();

        // Validate the whole batch before the first write.
        for m in mutations {
            for id in [m.creditor, m.debtor] {
                match state.members.get(&id) {
                    Some(member) if member.is_active() => {}
                    _ => {
                        return Err(StoreError::NotFound(format!(
                            "member {id} in chat {chat_id}"
                        )))
                    }
                }
            }
        }

        for m in mutations {
            match m.kind {
                MutationKind::Debt | MutationKind::Payment => {
                    state.entries.push(LedgerEntry::from_mutation(m));
                }
                MutationKind::Settle => {
                    for entry in state
                        .entries
                        .iter_mut()
                        .filter(|e| !e.settled && e.between(m.creditor, m.debtor))
                    {
                        entry.settled = true;
                    }
                }
            }
        }

        for upsert in alias_writes {
            upsert_into(state, upsert);
        }

        Ok(())
    }

    async fn entries_for_chat(&self, chat_id: ChatId) -> Result<Vec<LedgerEntry>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(&chat_id)
            .map(|s| s.entries.clone())
            .unwrap_or_default())
    }

    async fn merge_members(
        &self,
        chat_id: ChatId,
        source: MemberId,
        target: MemberId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let state = inner
            .get_mut(&chat_id)
            .ok_or_else(|| StoreError::NotFound(format!("chat {chat_id}")))?;

        match state.members.get(&source) {
            None => return Err(StoreError::NotFound(format!("member {source}"))),
            Some(m) if !m.is_active() => {
                return Err(StoreError::Conflict(format!("member {source} already merged")))
            }
            Some(_) => {}
        }
        if !state.members.get(&target).is_some_and(|m| m.is_active()) {
            return Err(StoreError::NotFound(format!("member {target}")));
        }

        for entry in state.entries.iter_mut() {
            if entry.creditor == source {
                entry.creditor = target;
            }
            if entry.debtor == source {
                entry.debtor = target;
            }
        }

        // Repoint aliases, keeping the higher confidence on collision.
        let moved: Vec<AliasEntry> = state
            .aliases
            .iter()
            .filter(|((_, member), _)| *member == source)
            .map(|(_, entry)| entry.clone())
            .collect();
        for entry in moved {
            state.aliases.remove(&(entry.alias_text.clone(), source));
            let key = (entry.alias_text.clone(), target);
            let confidence = match state.aliases.get(&key) {
                Some(existing) => existing.confidence.max(entry.confidence),
                None => entry.confidence,
            };
            state.aliases.insert(
                key,
                AliasEntry {
                    member_id: target,
                    confidence,
                    ..entry
                },
            );
        }

        let tombstone = state.members.get_mut(&source).expect("checked above");
        tombstone.merged_into = Some(target);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alias::{AliasSource, ConfidenceWrite};
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn debt(chat: ChatId, creditor: MemberId, debtor: MemberId, amount: i64) -> LedgerMutation {
        LedgerMutation {
            chat_id: chat,
            kind: MutationKind::Debt,
            creditor,
            debtor,
            amount: Decimal::from(amount),
            currency: "VND".into(),
            note: None,
            occurred_at: Utc::now(),
        }
    }

    async fn seed_members(store: &MemoryStore, chat: ChatId, names: &[&str]) -> Vec<Member> {
        let mut members = Vec::new();
        for name in names {
            let m = Member::real(chat, name);
            store.insert_member(&m).await.unwrap();
            members.push(m);
        }
        members
    }

    #[tokio::test]
    async fn insert_twice_conflicts() {
        let store = MemoryStore::new();
        let m = Member::real(ChatId(1), "Huy");
        store.insert_member(&m).await.unwrap();
        assert!(matches!(
            store.insert_member(&m).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn alias_upsert_updates_in_place() {
        let store = MemoryStore::new();
        let chat = ChatId(1);
        let member = Uuid::new_v4();

        store
            .upsert_alias(&AliasUpsert::provisional(chat, "huy".into(), member, 0.5))
            .await
            .unwrap();
        store
            .upsert_alias(&AliasUpsert::confirmed(chat, "huy".into(), member))
            .await
            .unwrap();

        let aliases = store.aliases_for_chat(chat).await.unwrap();
        assert_eq!(aliases.len(), 1, "re-confirmation updates, never inserts");
        assert_eq!(aliases[0].confidence, 1.0);
    }

    #[tokio::test]
    async fn apply_batch_rejects_unknown_member_without_partial_writes() {
        let store = MemoryStore::new();
        let chat = ChatId(1);
        let members = seed_members(&store, chat, &["A", "B"]).await;
        let ghost = Uuid::new_v4();

        let batch = [
            debt(chat, members[0].member_id, members[1].member_id, 100),
            debt(chat, members[0].member_id, ghost, 50),
        ];
        assert!(store.apply_batch(chat, &batch, &[]).await.is_err());
        assert!(store.entries_for_chat(chat).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn settle_flips_flags_both_directions() {
        let store = MemoryStore::new();
        let chat = ChatId(1);
        let members = seed_members(&store, chat, &["A", "B", "C"]).await;
        let (a, b, c) = (
            members[0].member_id,
            members[1].member_id,
            members[2].member_id,
        );

        store
            .apply_batch(chat, &[debt(chat, a, b, 100), debt(chat, b, a, 40), debt(chat, a, c, 70)], &[])
            .await
            .unwrap();

        let settle = LedgerMutation {
            kind: MutationKind::Settle,
            ..debt(chat, a, b, 1)
        };
        store.apply_batch(chat, &[settle], &[]).await.unwrap();

        let entries = store.entries_for_chat(chat).await.unwrap();
        assert_eq!(entries.iter().filter(|e| e.settled).count(), 2);
        assert!(!entries.iter().find(|e| e.debtor == c).unwrap().settled);
    }

    #[tokio::test]
    async fn merge_repoints_entries_and_aliases_and_tombstones() {
        let store = MemoryStore::new();
        let chat = ChatId(1);
        let real = Member::real(chat, "Nguyễn Huy");
        let phantom = Member::virtual_member(chat, "Huy");
        store.insert_member(&real).await.unwrap();
        store.insert_member(&phantom).await.unwrap();
        let payer = Member::real(chat, "Thịnh");
        store.insert_member(&payer).await.unwrap();

        store
            .apply_batch(
                chat,
                &[debt(chat, payer.member_id, phantom.member_id, 200_000)],
                &[AliasUpsert::provisional(chat, "huy".into(), phantom.member_id, 0.5)],
            )
            .await
            .unwrap();
        // Same alias text already points at the real member with higher confidence.
        store
            .upsert_alias(&AliasUpsert {
                chat_id: chat,
                alias_text: "huy".into(),
                member_id: real.member_id,
                source: AliasSource::Seeded,
                write: ConfidenceWrite::Set(0.9),
            })
            .await
            .unwrap();

        store
            .merge_members(chat, phantom.member_id, real.member_id)
            .await
            .unwrap();

        let entries = store.entries_for_chat(chat).await.unwrap();
        assert_eq!(entries[0].debtor, real.member_id);

        let aliases = store.aliases_for_chat(chat).await.unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].member_id, real.member_id);
        assert_eq!(aliases[0].confidence, 0.9, "collision keeps higher confidence");

        let tombstone = store.get_member(chat, phantom.member_id).await.unwrap().unwrap();
        assert_eq!(tombstone.merged_into, Some(real.member_id));
        assert!(store
            .find_by_display_norm(chat, "huy")
            .await
            .unwrap()
            .is_none());

        // A second merge of the same tombstone is refused.
        assert!(store
            .merge_members(chat, phantom.member_id, real.member_id)
            .await
            .is_err());
    }
}
