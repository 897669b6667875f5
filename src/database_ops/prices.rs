//! Currency-unit repair for `Item_Price.price`.
//!
//! Amounts are stored in cents. Rows written in dollars sit in `[T/100, T)` for a
//! threshold `T` (default 1000, i.e. anything under $10.00 is suspicious); they are
//! multiplied by 100 once, which lands them at or above `T`, so the same predicate
//! no longer selects them on the next run. Values under `T/100` cannot be told apart
//! from genuinely tiny cent amounts and are only reported.
//!
//! Ambiguous rows are never rewritten: they show up in the summary and the warn log
//! and need a manual review of the price.
use anyhow::{Context, Result};
use sqlx::Row;
use tracing::{info, warn};

use crate::report::Verification;
use crate::util::db::{finish_tx, Db, PgTx};

pub const DEFAULT_THRESHOLD: i64 = 1000;
const PROGRESS_EVERY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceVerdict {
    Ok,
    Repair(i64),
    Ambiguous,
}

pub fn classify(price: f64, threshold: i64) -> PriceVerdict {
    let t = threshold as f64;
    if price >= t || price <= 0.0 {
        PriceVerdict::Ok
    } else if price >= t / 100.0 {
        PriceVerdict::Repair((price * 100.0).round() as i64)
    } else {
        PriceVerdict::Ambiguous
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceRow {
    pub id: String,
    pub price: f64,
    pub duration_minutes: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceRepairReport {
    pub repaired: usize,
    pub ambiguous: Vec<PriceRow>,
    pub remaining: i64,
    pub lowest: Vec<PriceRow>,
}

fn dollars(cents: f64) -> String {
    format!("${:.2}", cents / 100.0)
}

async fn load_below(tx: &mut PgTx, threshold: i64) -> Result<Vec<PriceRow>> {
    let rows = sqlx::query(
        r#"SELECT "objectId", "price"::float8 AS price, "durationMinutes"::int4 AS duration
           FROM "Item_Price"
           WHERE "price" > 0 AND "price" < $1
           ORDER BY "price" ASC, "objectId" ASC"#,
    )
    .persistent(false)
    .bind(threshold)
    .fetch_all(&mut **tx)
    .await
    .context("load low Item_Price rows")?;
    rows.iter()
        .map(|r| {
            Ok(PriceRow {
                id: r.try_get("objectId")?,
                price: r.try_get("price")?,
                duration_minutes: r.try_get("duration")?,
            })
        })
        .collect()
}

async fn count_repairable(tx: &mut PgTx, threshold: i64) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"SELECT COUNT(*) FROM "Item_Price"
           WHERE "price" >= ($1::float8 / 100) AND "price" < $1"#,
    )
    .persistent(false)
    .bind(threshold)
    .fetch_one(&mut **tx)
    .await
    .context("count repairable Item_Price rows")
}

async fn lowest_prices(tx: &mut PgTx, n: i64) -> Result<Vec<PriceRow>> {
    let rows = sqlx::query(
        r#"SELECT "objectId", "price"::float8 AS price, "durationMinutes"::int4 AS duration
           FROM "Item_Price"
           WHERE "price" IS NOT NULL
           ORDER BY "price" ASC
           LIMIT $1"#,
    )
    .persistent(false)
    .bind(n)
    .fetch_all(&mut **tx)
    .await?;
    rows.iter()
        .map(|r| {
            Ok(PriceRow {
                id: r.try_get("objectId")?,
                price: r.try_get("price")?,
                duration_minutes: r.try_get("duration")?,
            })
        })
        .collect()
}

pub async fn repair_prices(db: &Db, threshold: i64, dry_run: bool) -> Result<PriceRepairReport> {
    let mut tx = db.begin().await?;
    let outcome = repair_in_tx(&mut tx, threshold, dry_run).await;
    if dry_run {
        tx.rollback().await.context("ROLLBACK failed")?;
        return outcome;
    }
    finish_tx(tx, outcome).await
}

async fn repair_in_tx(tx: &mut PgTx, threshold: i64, dry_run: bool) -> Result<PriceRepairReport> {
    let mut report = PriceRepairReport::default();
    let candidates = load_below(tx, threshold).await?;
    let to_fix: Vec<(PriceRow, i64)> = candidates
        .into_iter()
        .filter_map(|row| match classify(row.price, threshold) {
            PriceVerdict::Repair(cents) => Some((row, cents)),
            PriceVerdict::Ambiguous => {
                report.ambiguous.push(row);
                None
            }
            PriceVerdict::Ok => None,
        })
        .collect();
    info!(repair = to_fix.len(), ambiguous = report.ambiguous.len(), "analyzed Item_Price rows");

    for (row, cents) in to_fix.iter().take(10) {
        println!(
            "  - ${:.2} -> {} ({} min)",
            row.price,
            dollars(*cents as f64),
            row.duration_minutes.unwrap_or_default()
        );
    }
    if to_fix.len() > 10 {
        println!("  ... and {} more", to_fix.len() - 10);
    }

    for (row, cents) in &to_fix {
        if !dry_run {
            sqlx::query(r#"UPDATE "Item_Price" SET "price" = $1, "updatedAt" = NOW() WHERE "objectId" = $2"#)
                .persistent(false)
                .bind(*cents)
                .bind(&row.id)
                .execute(&mut **tx)
                .await
                .with_context(|| format!("update Item_Price {}", row.id))?;
        }
        report.repaired += 1;
        if report.repaired % PROGRESS_EVERY == 0 {
            info!(done = report.repaired, total = to_fix.len(), "progress");
        }
    }

    for row in &report.ambiguous {
        warn!(id = %row.id, price = row.price, "price below {} cents is ambiguous; left for review", threshold / 100);
    }

    report.remaining = count_repairable(tx, threshold).await?;
    Verification::new(report.remaining, dry_run).check("Item_Price rows stored in dollars")?;
    report.lowest = lowest_prices(tx, 10).await?;
    println!("\nLowest prices now:");
    for row in &report.lowest {
        println!("  - {} ({} min)", dollars(row.price), row.duration_minutes.unwrap_or_default());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_amounts_are_scaled_to_cents() {
        assert_eq!(classify(85.0, 1000), PriceVerdict::Repair(8500));
        assert_eq!(classify(12.5, 1000), PriceVerdict::Repair(1250));
        assert_eq!(classify(10.0, 1000), PriceVerdict::Repair(1000));
        assert_eq!(classify(999.99, 1000), PriceVerdict::Repair(99999));
    }

    #[test]
    fn repair_is_applied_once() {
        for price in [10.0, 47.5, 120.0, 999.0] {
            let PriceVerdict::Repair(fixed) = classify(price, DEFAULT_THRESHOLD) else {
                panic!("{price} should need repair");
            };
            assert_eq!(classify(fixed as f64, DEFAULT_THRESHOLD), PriceVerdict::Ok);
        }
    }

    #[test]
    fn cent_amounts_and_empty_prices_are_left_alone() {
        assert_eq!(classify(8500.0, 1000), PriceVerdict::Ok);
        assert_eq!(classify(1000.0, 1000), PriceVerdict::Ok);
        assert_eq!(classify(0.0, 1000), PriceVerdict::Ok);
    }

    #[test]
    fn tiny_amounts_are_ambiguous() {
        assert_eq!(classify(9.99, 1000), PriceVerdict::Ambiguous);
        assert_eq!(classify(0.5, 1000), PriceVerdict::Ambiguous);
    }

    #[test]
    fn threshold_moves_the_window() {
        assert_eq!(classify(4.0, 500), PriceVerdict::Ambiguous);
        assert_eq!(classify(5.0, 500), PriceVerdict::Repair(500));
        assert_eq!(classify(600.0, 500), PriceVerdict::Ok);
    }
}
