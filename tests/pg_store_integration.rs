//! Postgres backend integration tests.
//!
//! Require a reachable database:
//!   TABKEEPER_TEST_DATABASE_URL=postgresql:///tabkeeper_test \
//!     cargo test --test pg_store_integration --features database

#![cfg(feature = "database")]

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;

use tabkeeper::domain::alias::AliasUpsert;
use tabkeeper::domain::ledger::{LedgerMutation, MutationKind};
use tabkeeper::domain::member::{ChatId, Member, MemberId};
use tabkeeper::store::{AliasRepository, LedgerRepository, MemberRepository, PgStore};

async fn test_store() -> Result<PgStore> {
    let url = std::env::var("TABKEEPER_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .unwrap_or_else(|_| "postgresql:///tabkeeper_test".into());
    let store = PgStore::connect(&url).await?;
    store.migrate().await?;
    Ok(store)
}

/// Chat ids are randomized per test so runs never collide.
fn fresh_chat() -> ChatId {
    ChatId(uuid::Uuid::new_v4().as_u128() as i64)
}

fn debt(chat: ChatId, creditor: MemberId, debtor: MemberId, amount: i64) -> LedgerMutation {
    LedgerMutation {
        chat_id: chat,
        kind: MutationKind::Debt,
        creditor,
        debtor,
        amount: Decimal::from(amount),
        currency: "VND".into(),
        note: Some("tiền bún chả".into()),
        occurred_at: Utc::now(),
    }
}

#[tokio::test]
async fn member_round_trip() -> Result<()> {
    let store = test_store().await?;
    let chat = fresh_chat();

    let member = Member::real(chat, "Ngọc Long");
    store.insert_member(&member).await?;

    let loaded = store.get_member(chat, member.member_id).await?.unwrap();
    assert_eq!(loaded.display_name, "Ngọc Long");
    assert_eq!(loaded.display_name_norm, "ngọc long");
    assert!(!loaded.is_virtual);

    let by_norm = store.find_by_display_norm(chat, "ngọc long").await?.unwrap();
    assert_eq!(by_norm.member_id, member.member_id);
    Ok(())
}

#[tokio::test]
async fn alias_upsert_reinforces_in_place() -> Result<()> {
    let store = test_store().await?;
    let chat = fresh_chat();
    let member = uuid::Uuid::new_v4();

    store
        .upsert_alias(&AliasUpsert::reinforced(chat, "long".into(), member, 0.5))
        .await?;
    store
        .upsert_alias(&AliasUpsert::reinforced(chat, "long".into(), member, 0.5))
        .await?;

    let aliases = store.aliases_for_chat(chat).await?;
    assert_eq!(aliases.len(), 1);
    assert!((aliases[0].confidence - 0.75).abs() < 1e-4);
    Ok(())
}

#[tokio::test]
async fn batch_and_settle_round_trip() -> Result<()> {
    let store = test_store().await?;
    let chat = fresh_chat();

    let a = Member::real(chat, "A");
    let b = Member::real(chat, "B");
    store.insert_member(&a).await?;
    store.insert_member(&b).await?;

    store
        .apply_batch(
            chat,
            &[debt(chat, a.member_id, b.member_id, 100_000)],
            &[AliasUpsert::confirmed(chat, "a".into(), a.member_id)],
        )
        .await?;

    let entries = store.entries_for_chat(chat).await?;
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].settled);
    assert_eq!(entries[0].amount, Decimal::from(100_000));

    let settle = LedgerMutation {
        kind: MutationKind::Settle,
        ..debt(chat, b.member_id, a.member_id, 1)
    };
    store.apply_batch(chat, &[settle], &[]).await?;
    let entries = store.entries_for_chat(chat).await?;
    assert!(entries[0].settled, "settle matches either direction");
    Ok(())
}

#[tokio::test]
async fn merge_repoints_and_tombstones() -> Result<()> {
    let store = test_store().await?;
    let chat = fresh_chat();

    let real = Member::real(chat, "Nguyễn Huy");
    let phantom = Member::virtual_member(chat, "Huy");
    let payer = Member::real(chat, "Thịnh");
    for m in [&real, &phantom, &payer] {
        store.insert_member(m).await?;
    }
    store
        .apply_batch(
            chat,
            &[debt(chat, payer.member_id, phantom.member_id, 200_000)],
            &[AliasUpsert::provisional(chat, "huy".into(), phantom.member_id, 0.5)],
        )
        .await?;

    store
        .merge_members(chat, phantom.member_id, real.member_id)
        .await?;

    let entries = store.entries_for_chat(chat).await?;
    assert_eq!(entries[0].debtor, real.member_id);

    let aliases = store.aliases_for_chat(chat).await?;
    assert!(aliases.iter().all(|a| a.member_id != phantom.member_id));

    let tombstone = store.get_member(chat, phantom.member_id).await?.unwrap();
    assert_eq!(tombstone.merged_into, Some(real.member_id));

    assert!(store
        .merge_members(chat, phantom.member_id, real.member_id)
        .await
        .is_err());
    Ok(())
}
