//! Null `_rperm` arrays hide rows from the application's visibility filter; reset
//! them to world-readable.
use anyhow::{Context, Result};
use tracing::info;

use crate::error::UpkeepError;
use crate::report::Verification;
use crate::util::db::{finish_tx, Db, PgTx};

pub const PERMISSION_TABLES: [&str; 3] = ["Items_Catalog", "Discipline_Offering", "Service_Detail"];

/// Restrict to one table by case-insensitive name; unknown names are rejected so the
/// table name can be interpolated into SQL.
pub fn select_tables(only: Option<&str>) -> Result<Vec<&'static str>, UpkeepError> {
    match only {
        None => Ok(PERMISSION_TABLES.to_vec()),
        Some(name) => PERMISSION_TABLES
            .iter()
            .find(|t| t.eq_ignore_ascii_case(name.trim()))
            .map(|t| vec![*t])
            .ok_or_else(|| UpkeepError::not_found("permission table", name)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRepair {
    pub table: &'static str,
    pub null_before: i64,
    pub updated: u64,
    pub remaining: i64,
}

async fn count_null_rperm(tx: &mut PgTx, table: &str) -> Result<i64> {
    let sql = format!(r#"SELECT COUNT(*) FROM "{table}" WHERE "_rperm" IS NULL"#);
    sqlx::query_scalar::<_, i64>(&sql)
        .persistent(false)
        .fetch_one(&mut **tx)
        .await
        .with_context(|| format!("count null _rperm in {table}"))
}

async fn set_default_rperm(tx: &mut PgTx, table: &str) -> Result<u64> {
    let sql = format!(
        r#"UPDATE "{table}" SET "_rperm" = '{{*}}', "updatedAt" = NOW() WHERE "_rperm" IS NULL"#
    );
    let res = sqlx::query(&sql)
        .persistent(false)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("update _rperm in {table}"))?;
    Ok(res.rows_affected())
}

pub async fn repair_permissions(
    db: &Db,
    tables: &[&'static str],
    dry_run: bool,
) -> Result<Vec<TableRepair>> {
    let mut tx = db.begin().await?;
    let outcome = repair_in_tx(&mut tx, tables, dry_run).await;
    if dry_run {
        tx.rollback().await.context("ROLLBACK failed")?;
        return outcome;
    }
    finish_tx(tx, outcome).await
}

async fn repair_in_tx(
    tx: &mut PgTx,
    tables: &[&'static str],
    dry_run: bool,
) -> Result<Vec<TableRepair>> {
    let mut out = Vec::with_capacity(tables.len());
    for &table in tables {
        let null_before = count_null_rperm(tx, table).await?;
        let updated = if dry_run || null_before == 0 {
            0
        } else {
            set_default_rperm(tx, table).await?
        };
        let remaining = count_null_rperm(tx, table).await?;
        info!(table, null_before, updated, remaining, dry_run, "_rperm pass");
        out.push(TableRepair {
            table,
            null_before,
            updated,
            remaining,
        });
    }
    let remaining: i64 = out.iter().map(|r| r.remaining).sum();
    Verification::new(remaining, dry_run).check("rows with null _rperm")?;
    Ok(out)
}
