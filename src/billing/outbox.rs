//! Two-phase bookkeeping for remote creates.
//!
//! Before a Stripe object is created the intent is committed as a `pending` row with
//! the idempotency key the request will carry. The local foreign id and the
//! `confirmed` mark are written together once Stripe answers. A crash in between
//! leaves a pending row that the next run resolves first.
use anyhow::{bail, Context, Result};
use sqlx::Row;
use tracing::info;

use crate::util::db::Db;
use crate::util::ids::new_object_id;

pub const OUTBOX_TABLE: &str = "Billing_Sync_Outbox";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncKind {
    Product,
    Price,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Product => "product",
            SyncKind::Price => "price",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "product" => Some(SyncKind::Product),
            "price" => Some(SyncKind::Price),
            _ => None,
        }
    }

    /// Metadata key holding the local objectId on the Stripe object.
    pub fn metadata_key(&self) -> &'static str {
        match self {
            SyncKind::Product => "itemId",
            SyncKind::Price => "itemPriceId",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub key: String,
    pub kind: SyncKind,
    pub local_id: String,
}

pub fn new_idempotency_key(kind: SyncKind, local_id: &str) -> String {
    format!("upkeep-{}-{local_id}-{}", kind.as_str(), new_object_id())
}

#[async_trait::async_trait]
pub trait SyncLedger: Send {
    async fn pending(&mut self) -> Result<Vec<OutboxEntry>>;
    /// Reuses the open entry for `(kind, local_id)` so a retried create carries the
    /// same idempotency key.
    async fn stage(&mut self, kind: SyncKind, local_id: &str) -> Result<OutboxEntry>;
    /// Store `remote_id` on the local row and close the entry, atomically.
    async fn confirm(&mut self, entry: &OutboxEntry, remote_id: &str) -> Result<()>;
}

/// Outbox in the `Billing_Sync_Outbox` table (see `sql/billing_sync_outbox.sql`).
pub struct PgSyncLedger {
    db: Db,
}

impl PgSyncLedger {
    pub async fn open(db: &Db) -> Result<Self> {
        if !db.table_visible(&format!("\"{OUTBOX_TABLE}\"")).await? {
            bail!("{OUTBOX_TABLE} is missing; apply sql/billing_sync_outbox.sql with run_sql first");
        }
        Ok(Self { db: db.clone() })
    }
}

fn entry_from_row(r: &sqlx::postgres::PgRow) -> Result<OutboxEntry> {
    let kind: String = r.try_get("kind")?;
    let Some(kind) = SyncKind::parse(&kind) else {
        bail!("unknown outbox kind {kind:?}");
    };
    Ok(OutboxEntry {
        key: r.try_get("idempotencyKey")?,
        kind,
        local_id: r.try_get("localId")?,
    })
}

#[async_trait::async_trait]
impl SyncLedger for PgSyncLedger {
    async fn pending(&mut self) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(
            r#"SELECT "idempotencyKey", "kind", "localId" FROM "Billing_Sync_Outbox"
               WHERE "status" = 'pending' ORDER BY "createdAt" ASC"#,
        )
        .persistent(false)
        .fetch_all(&self.db.pool)
        .await
        .context("load pending outbox entries")?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn stage(&mut self, kind: SyncKind, local_id: &str) -> Result<OutboxEntry> {
        let key = new_idempotency_key(kind, local_id);
        sqlx::query(
            r#"INSERT INTO "Billing_Sync_Outbox" ("idempotencyKey", "kind", "localId")
               VALUES ($1, $2, $3)
               ON CONFLICT DO NOTHING"#,
        )
        .persistent(false)
        .bind(&key)
        .bind(kind.as_str())
        .bind(local_id)
        .execute(&self.db.pool)
        .await
        .context("stage outbox entry")?;
        let row = sqlx::query(
            r#"SELECT "idempotencyKey", "kind", "localId" FROM "Billing_Sync_Outbox"
               WHERE "kind" = $1 AND "localId" = $2 AND "status" = 'pending'"#,
        )
        .persistent(false)
        .bind(kind.as_str())
        .bind(local_id)
        .fetch_one(&self.db.pool)
        .await
        .context("read staged outbox entry")?;
        entry_from_row(&row)
    }

    async fn confirm(&mut self, entry: &OutboxEntry, remote_id: &str) -> Result<()> {
        let update = match entry.kind {
            SyncKind::Product => {
                r#"UPDATE "Items_Catalog" SET "stripeProductId" = $1, "updatedAt" = NOW() WHERE "objectId" = $2"#
            }
            SyncKind::Price => {
                r#"UPDATE "Item_Price" SET "stripePriceId" = $1, "updatedAt" = NOW() WHERE "objectId" = $2"#
            }
        };
        let mut tx = self.db.begin().await?;
        sqlx::query(update)
            .persistent(false)
            .bind(remote_id)
            .bind(&entry.local_id)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("store {} id on {}", entry.kind.as_str(), entry.local_id))?;
        sqlx::query(
            r#"UPDATE "Billing_Sync_Outbox"
               SET "status" = 'confirmed', "remoteId" = $1, "updatedAt" = NOW()
               WHERE "idempotencyKey" = $2"#,
        )
        .persistent(false)
        .bind(remote_id)
        .bind(&entry.key)
        .execute(&mut *tx)
        .await
        .context("confirm outbox entry")?;
        tx.commit().await.context("COMMIT failed")?;
        info!(kind = entry.kind.as_str(), local_id = %entry.local_id, remote_id, "confirmed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique_per_attempt() {
        let a = new_idempotency_key(SyncKind::Price, "P1");
        let b = new_idempotency_key(SyncKind::Price, "P1");
        assert!(a.starts_with("upkeep-price-P1-"));
        assert_ne!(a, b);
    }

    #[test]
    fn kind_round_trips_through_its_column_value() {
        for kind in [SyncKind::Product, SyncKind::Price] {
            assert_eq!(SyncKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SyncKind::parse("invoice"), None);
    }
}
