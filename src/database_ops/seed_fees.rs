//! Default no-show and late-cancellation fees for an org.
use anyhow::{Context, Result};
use sqlx::PgConnection;
use tracing::{info, warn};

use crate::util::db::{finish_tx, Db, PgTx};
use crate::util::ids::insert_with_fresh_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeTemplate {
    pub fee_type: &'static str,
    pub name: &'static str,
    pub calculation: &'static str,
    pub sort_order: i32,
}

const fn fee(
    fee_type: &'static str,
    name: &'static str,
    calculation: &'static str,
    sort_order: i32,
) -> FeeTemplate {
    FeeTemplate {
        fee_type,
        name,
        calculation,
        sort_order,
    }
}

pub const DEFAULT_FEES: [FeeTemplate; 6] = [
    fee("no_show", "No Show - Full Price", "override", 1),
    fee("no_show", "No Show - 50%", "percent_discount", 2),
    fee("no_show", "No Show - $20.00", "dollar_discount", 3),
    fee("no_show", "No Show - $0.00", "no_charge", 4),
    fee("late_cancellation", "Late Cancellation - 50%", "percent_discount", 1),
    fee("late_cancellation", "Late Cancellation - $20.00", "dollar_discount", 2),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeSeedOutcome {
    /// The org already had this many fees; nothing was written.
    AlreadySeeded(i64),
    Created(Vec<(String, &'static str)>),
    WouldCreate(usize),
}

async fn count_fees(conn: &mut PgConnection, org_id: &str) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(r#"SELECT COUNT(*) FROM "Fee" WHERE "orgId" = $1"#)
        .persistent(false)
        .bind(org_id)
        .fetch_one(conn)
        .await
        .context("count existing fees")
}

async fn insert_fee(
    conn: &mut PgConnection,
    org_id: &str,
    template: FeeTemplate,
) -> Result<String> {
    insert_with_fresh_id("Fee", conn, |conn, id| {
        let org_id = org_id.to_owned();
        Box::pin(async move {
            let res = sqlx::query(
                r#"INSERT INTO "Fee"
                   ("objectId", "feeType", "name", "feeCalculationType", "orgId", "sortOrder",
                    "isActive", "createdAt", "updatedAt", "_rperm", "_wperm")
                   VALUES ($1, $2, $3, $4, $5, $6, true, NOW(), NOW(), ARRAY['*'], ARRAY[]::text[])
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(template.fee_type)
            .bind(template.name)
            .bind(template.calculation)
            .bind(&org_id)
            .bind(template.sort_order)
            .execute(conn)
            .await
            .with_context(|| format!("insert Fee {}", template.name))?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await
}

async fn seed_in_tx(tx: &mut PgTx, org_id: &str, dry_run: bool) -> Result<FeeSeedOutcome> {
    let existing = count_fees(&mut **tx, org_id).await?;
    if existing > 0 {
        warn!(org_id, existing, "org already has fees; delete them first to re-seed");
        return Ok(FeeSeedOutcome::AlreadySeeded(existing));
    }
    if dry_run {
        for f in &DEFAULT_FEES {
            println!("  [DRY RUN] would create {} ({}, {})", f.name, f.fee_type, f.calculation);
        }
        return Ok(FeeSeedOutcome::WouldCreate(DEFAULT_FEES.len()));
    }
    let mut created = Vec::with_capacity(DEFAULT_FEES.len());
    for template in DEFAULT_FEES {
        let id = insert_fee(&mut **tx, org_id, template).await?;
        info!(name = template.name, object_id = %id, "created fee");
        created.push((id, template.name));
    }
    Ok(FeeSeedOutcome::Created(created))
}

pub async fn seed_default_fees(db: &Db, org_id: &str, dry_run: bool) -> Result<FeeSeedOutcome> {
    let mut tx = db.begin().await?;
    let outcome = seed_in_tx(&mut tx, org_id, dry_run).await;
    if dry_run {
        tx.rollback().await.context("ROLLBACK failed")?;
        return outcome;
    }
    finish_tx(tx, outcome).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_no_show_and_two_late_cancellation_fees() {
        let count = |t: &str| DEFAULT_FEES.iter().filter(|f| f.fee_type == t).count();
        assert_eq!(count("no_show"), 4);
        assert_eq!(count("late_cancellation"), 2);
    }

    #[test]
    fn sort_order_is_contiguous_per_type() {
        for fee_type in ["no_show", "late_cancellation"] {
            let orders: Vec<i32> = DEFAULT_FEES
                .iter()
                .filter(|f| f.fee_type == fee_type)
                .map(|f| f.sort_order)
                .collect();
            assert_eq!(orders, (1..=orders.len() as i32).collect::<Vec<_>>());
        }
    }
}
