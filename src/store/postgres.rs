//! Postgres store backend (feature `database`).
//!
//! Every user-controlled value crosses as a bound parameter; batch apply
//! and merge each run inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::alias::{AliasEntry, AliasSource, AliasUpsert, ConfidenceWrite};
use crate::domain::ledger::{LedgerEntry, LedgerMutation, MutationKind};
use crate::domain::member::{ChatId, Member, MemberId};
use crate::error::StoreError;

use super::{AliasRepository, LedgerRepository, MemberRepository};

const SCHEMA: &str = include_str!("../../migrations/0001_init.sql");

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the idempotent schema bootstrap.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

type MemberRow = (
    i64,
    Uuid,
    String,
    String,
    bool,
    Option<Uuid>,
    DateTime<Utc>,
);

fn member_from_row(row: MemberRow) -> Member {
    Member {
        chat_id: ChatId(row.0),
        member_id: row.1,
        display_name: row.2,
        display_name_norm: row.3,
        is_virtual: row.4,
        merged_into: row.5,
        created_at: row.6,
    }
}

fn alias_source_from_str(s: &str) -> AliasSource {
    match s {
        "seeded" => AliasSource::Seeded,
        _ => AliasSource::Learned,
    }
}

fn kind_from_str(s: &str) -> Result<MutationKind, StoreError> {
    match s {
        "debt" => Ok(MutationKind::Debt),
        "payment" => Ok(MutationKind::Payment),
        "settle" => Ok(MutationKind::Settle),
        other => Err(StoreError::Backend(format!("unknown ledger kind `{other}`"))),
    }
}

fn kind_to_str(kind: MutationKind) -> &'static str {
    match kind {
        MutationKind::Debt => "debt",
        MutationKind::Payment => "payment",
        MutationKind::Settle => "settle",
    }
}

async fn upsert_alias_tx(
    tx: &mut Transaction<'_, Postgres>,
    upsert: &AliasUpsert,
) -> Result<(), StoreError> {
    match upsert.write {
        ConfidenceWrite::Set(confidence) => {
            sqlx::query(
                r#"
                INSERT INTO member_aliases
                    (chat_id, alias_text, member_id, confidence, source, last_used_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                ON CONFLICT (chat_id, alias_text, member_id) DO UPDATE
                    SET confidence = EXCLUDED.confidence,
                        source = EXCLUDED.source,
                        last_used_at = NOW()
                "#,
            )
            .bind(upsert.chat_id.0)
            .bind(&upsert.alias_text)
            .bind(upsert.member_id)
            .bind(confidence.clamp(0.0, 1.0))
            .bind(upsert.source.as_str())
            .execute(&mut **tx)
            .await?;
        }
        ConfidenceWrite::Reinforce(step) => {
            let step = step.clamp(0.0, 1.0);
            sqlx::query(
                r#"
                INSERT INTO member_aliases
                    (chat_id, alias_text, member_id, confidence, source, last_used_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                ON CONFLICT (chat_id, alias_text, member_id) DO UPDATE
                    SET confidence = member_aliases.confidence
                        + (1.0 - member_aliases.confidence) * $4,
                        last_used_at = NOW()
                "#,
            )
            .bind(upsert.chat_id.0)
            .bind(&upsert.alias_text)
            .bind(upsert.member_id)
            .bind(step)
            .bind(upsert.source.as_str())
            .execute(&mut **tx)
            .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl MemberRepository for PgStore {
    async fn insert_member(&self, member: &Member) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO chat_members
                (chat_id, member_id, display_name, display_name_norm,
                 is_virtual, merged_into, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (chat_id, member_id) DO NOTHING
            "#,
        )
        .bind(member.chat_id.0)
        .bind(member.member_id)
        .bind(&member.display_name)
        .bind(&member.display_name_norm)
        .bind(member.is_virtual)
        .bind(member.merged_into)
        .bind(member.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "member {} already exists in chat {}",
                member.member_id, member.chat_id
            )));
        }
        Ok(())
    }

    async fn get_member(
        &self,
        chat_id: ChatId,
        member_id: MemberId,
    ) -> Result<Option<Member>, StoreError> {
        let row: Option<MemberRow> = sqlx::query_as(
            r#"
            SELECT chat_id, member_id, display_name, display_name_norm,
                   is_virtual, merged_into, created_at
            FROM chat_members
            WHERE chat_id = $1 AND member_id = $2
            "#,
        )
        .bind(chat_id.0)
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(member_from_row))
    }

    async fn find_by_display_norm(
        &self,
        chat_id: ChatId,
        display_norm: &str,
    ) -> Result<Option<Member>, StoreError> {
        let row: Option<MemberRow> = sqlx::query_as(
            r#"
            SELECT chat_id, member_id, display_name, display_name_norm,
                   is_virtual, merged_into, created_at
            FROM chat_members
            WHERE chat_id = $1 AND display_name_norm = $2 AND merged_into IS NULL
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(chat_id.0)
        .bind(display_norm)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(member_from_row))
    }

    async fn list_members(&self, chat_id: ChatId) -> Result<Vec<Member>, StoreError> {
        let rows: Vec<MemberRow> = sqlx::query_as(
            r#"
            SELECT chat_id, member_id, display_name, display_name_norm,
                   is_virtual, merged_into, created_at
            FROM chat_members
            WHERE chat_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(chat_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(member_from_row).collect())
    }
}

#[async_trait]
impl AliasRepository for PgStore {
    async fn aliases_for_chat(&self, chat_id: ChatId) -> Result<Vec<AliasEntry>, StoreError> {
        let rows: Vec<(i64, String, Uuid, f32, String, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT chat_id, alias_text, member_id, confidence, source, last_used_at
            FROM member_aliases
            WHERE chat_id = $1
            "#,
        )
        .bind(chat_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(chat, alias_text, member_id, confidence, source, last_used_at)| AliasEntry {
                chat_id: ChatId(chat),
                alias_text,
                member_id,
                confidence,
                last_used_at,
                source: alias_source_from_str(&source),
            })
            .collect())
    }

    async fn upsert_alias(&self, upsert: &AliasUpsert) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        upsert_alias_tx(&mut tx, upsert).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for PgStore {
    async fn apply_batch(
        &self,
        chat_id: ChatId,
        mutations: &[LedgerMutation],
        alias_writes: &[AliasUpsert],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        for mutation in mutations {
            match mutation.kind {
                MutationKind::Debt | MutationKind::Payment => {
                    sqlx::query(
                        r#"
                        INSERT INTO ledger_entries
                            (entry_id, chat_id, kind, creditor_id, debtor_id,
                             amount, currency, note, settled, occurred_at, recorded_at)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, $9, NOW())
                        "#,
                    )
                    .bind(Uuid::new_v4())
                    .bind(chat_id.0)
                    .bind(kind_to_str(mutation.kind))
                    .bind(mutation.creditor)
                    .bind(mutation.debtor)
                    .bind(mutation.amount)
                    .bind(&mutation.currency)
                    .bind(&mutation.note)
                    .bind(mutation.occurred_at)
                    .execute(&mut *tx)
                    .await?;
                }
                MutationKind::Settle => {
                    sqlx::query(
                        r#"
                        UPDATE ledger_entries
                        SET settled = TRUE
                        WHERE chat_id = $1 AND settled = FALSE
                          AND ((creditor_id = $2 AND debtor_id = $3)
                            OR (creditor_id = $3 AND debtor_id = $2))
                        "#,
                    )
                    .bind(chat_id.0)
                    .bind(mutation.creditor)
                    .bind(mutation.debtor)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        for upsert in alias_writes {
            upsert_alias_tx(&mut tx, upsert).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn entries_for_chat(&self, chat_id: ChatId) -> Result<Vec<LedgerEntry>, StoreError> {
        type EntryRow = (
            Uuid,
            i64,
            String,
            Uuid,
            Uuid,
            Decimal,
            String,
            Option<String>,
            bool,
            DateTime<Utc>,
            DateTime<Utc>,
        );
        let rows: Vec<EntryRow> = sqlx::query_as(
            r#"
            SELECT entry_id, chat_id, kind, creditor_id, debtor_id,
                   amount, currency, note, settled, occurred_at, recorded_at
            FROM ledger_entries
            WHERE chat_id = $1
            ORDER BY recorded_at
            "#,
        )
        .bind(chat_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(LedgerEntry {
                    entry_id: row.0,
                    chat_id: ChatId(row.1),
                    kind: kind_from_str(&row.2)?,
                    creditor: row.3,
                    debtor: row.4,
                    amount: row.5,
                    currency: row.6,
                    note: row.7,
                    settled: row.8,
                    occurred_at: row.9,
                    recorded_at: row.10,
                })
            })
            .collect()
    }

    async fn merge_members(
        &self,
        chat_id: ChatId,
        source: MemberId,
        target: MemberId,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let merged: Option<(Option<Uuid>,)> =
            sqlx::query_as("SELECT merged_into FROM chat_members WHERE chat_id = $1 AND member_id = $2")
                .bind(chat_id.0)
                .bind(source)
                .fetch_optional(&mut *tx)
                .await?;
        match merged {
            None => return Err(StoreError::NotFound(format!("member {source}"))),
            Some((Some(_),)) => {
                return Err(StoreError::Conflict(format!("member {source} already merged")))
            }
            Some((None,)) => {}
        }

        sqlx::query(
            "UPDATE ledger_entries SET creditor_id = $3 WHERE chat_id = $1 AND creditor_id = $2",
        )
        .bind(chat_id.0)
        .bind(source)
        .bind(target)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE ledger_entries SET debtor_id = $3 WHERE chat_id = $1 AND debtor_id = $2",
        )
        .bind(chat_id.0)
        .bind(source)
        .bind(target)
        .execute(&mut *tx)
        .await?;

        // Move aliases across, keeping the higher confidence on collision.
        sqlx::query(
            r#"
            INSERT INTO member_aliases
                (chat_id, alias_text, member_id, confidence, source, last_used_at)
            SELECT chat_id, alias_text, $3, confidence, source, last_used_at
            FROM member_aliases
            WHERE chat_id = $1 AND member_id = $2
            ON CONFLICT (chat_id, alias_text, member_id) DO UPDATE
                SET confidence = GREATEST(member_aliases.confidence, EXCLUDED.confidence)
            "#,
        )
        .bind(chat_id.0)
        .bind(source)
        .bind(target)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM member_aliases WHERE chat_id = $1 AND member_id = $2")
            .bind(chat_id.0)
            .bind(source)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE chat_members SET merged_into = $3 WHERE chat_id = $1 AND member_id = $2",
        )
        .bind(chat_id.0)
        .bind(source)
        .bind(target)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

// Integration coverage for this backend lives in `tests/pg_store_integration.rs`
// and needs a reachable Postgres (TABKEEPER_TEST_DATABASE_URL).
