//! Pull a patient's Stripe invoices into the local `Invoice` table.
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use tracing::{info, warn};

use crate::clients::stripe::{BillingApi, Metadata, StripeInvoice, INVOICE_PAGE_SIZE};
use crate::util::db::Db;
use crate::util::ids::insert_with_fresh_id;

pub const SYNCED_BY: &str = "sync_stripe_invoices";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceStatus {
    NoCharge,
    Paid,
    Rejected,
    Submitted,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::NoCharge => "no_charge",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Rejected => "rejected",
            InvoiceStatus::Submitted => "submitted",
        }
    }
}

/// Stripe metadata values are strings; an empty value, "false" or "0" is off.
pub fn metadata_flag(metadata: &Metadata, key: &str) -> bool {
    metadata
        .get(key)
        .map(|v| v.trim())
        .is_some_and(|v| !v.is_empty() && !v.eq_ignore_ascii_case("false") && v != "0")
}

pub fn map_invoice_status(inv: &StripeInvoice) -> InvoiceStatus {
    let status = inv.status.as_deref();
    if metadata_flag(&inv.metadata, "noCharge") || inv.amount_due == 0 {
        InvoiceStatus::NoCharge
    } else if status == Some("paid") {
        InvoiceStatus::Paid
    } else if metadata_flag(&inv.metadata, "insuranceRejected") {
        InvoiceStatus::Rejected
    } else if metadata_flag(&inv.metadata, "submittedToInsurance") || status == Some("open") {
        InvoiceStatus::Submitted
    } else {
        InvoiceStatus::NoCharge
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceRecord {
    pub patient_id: String,
    pub stripe_invoice_id: String,
    pub status: InvoiceStatus,
    pub total: i64,
    pub amount_paid: i64,
    pub balance: i64,
    pub date_billed: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

fn from_unix(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| Utc.timestamp_opt(t, 0).single())
}

pub fn build_record(patient_id: &str, inv: &StripeInvoice) -> InvoiceRecord {
    InvoiceRecord {
        patient_id: patient_id.to_string(),
        stripe_invoice_id: inv.id.clone(),
        status: map_invoice_status(inv),
        total: inv.amount_due,
        amount_paid: inv.amount_paid,
        balance: inv.amount_remaining,
        // finalized date when there is one, otherwise creation
        date_billed: from_unix(inv.status_transitions.finalized_at)
            .or_else(|| from_unix(inv.created)),
        description: inv
            .lines
            .data
            .first()
            .and_then(|l| l.description.clone())
            .or_else(|| inv.metadata.get("serviceName").cloned()),
    }
}

/// Every invoice of `customer`, 100 per page, stopping at `cap` when given.
pub async fn fetch_all_invoices<B>(
    api: &B,
    customer: &str,
    cap: Option<usize>,
) -> Result<Vec<StripeInvoice>>
where
    B: BillingApi + ?Sized,
{
    let mut out = Vec::new();
    let mut after: Option<String> = None;
    loop {
        let remaining = cap.map(|c| c.saturating_sub(out.len()));
        if remaining == Some(0) {
            break;
        }
        let page_limit =
            remaining.map_or(INVOICE_PAGE_SIZE, |r| r.min(INVOICE_PAGE_SIZE as usize) as u32);
        let page = api.list_invoices(customer, page_limit, after.as_deref()).await?;
        let fetched = page.data.len();
        after = page.data.last().map(|i| i.id.clone());
        out.extend(page.data);
        if !page.has_more || fetched == 0 {
            break;
        }
    }
    if let Some(c) = cap {
        out.truncate(c);
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientRow {
    pub id: String,
    pub name: String,
    pub stripe_customer_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvoiceSyncSummary {
    pub patients: usize,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

pub async fn link_patient_to_customer(
    db: &Db,
    patient_id: &str,
    customer_id: &str,
) -> Result<bool> {
    let res = sqlx::query(r#"UPDATE "Patient" SET "stripeCustomerId" = $1, "updatedAt" = NOW() WHERE "objectId" = $2"#)
        .persistent(false)
        .bind(customer_id)
        .bind(patient_id)
        .execute(&db.pool)
        .await
        .context("link patient to Stripe customer")?;
    if res.rows_affected() == 0 {
        warn!(patient_id, "patient not found while setting stripeCustomerId");
        return Ok(false);
    }
    info!(patient_id, customer_id, "linked patient to Stripe customer");
    Ok(true)
}

pub async fn fetch_patients(db: &Db, patient_id: Option<&str>) -> Result<Vec<PatientRow>> {
    let rows = sqlx::query(
        r#"SELECT "objectId",
                  TRIM(COALESCE("firstName", '') || ' ' || COALESCE("lastName", '')) AS name,
                  "stripeCustomerId"
           FROM "Patient"
           WHERE "stripeCustomerId" IS NOT NULL
             AND ($1::text IS NULL OR "objectId" = $1)
           ORDER BY "objectId""#,
    )
    .persistent(false)
    .bind(patient_id)
    .fetch_all(&db.pool)
    .await
    .context("load patients with a Stripe customer")?;
    rows.iter()
        .map(|r| {
            Ok(PatientRow {
                id: r.try_get("objectId")?,
                name: r.try_get("name")?,
                stripe_customer_id: r.try_get("stripeCustomerId")?,
            })
        })
        .collect()
}

/// Keyed by `stripeInvoiceId`; existing rows get status and amounts refreshed.
pub async fn upsert_invoice(db: &Db, record: &InvoiceRecord) -> Result<Upsert> {
    let existing: Option<String> = sqlx::query_scalar(
        r#"SELECT "objectId" FROM "Invoice" WHERE "stripeInvoiceId" = $1 ORDER BY "createdAt" ASC LIMIT 1"#,
    )
    .persistent(false)
    .bind(&record.stripe_invoice_id)
    .fetch_optional(&db.pool)
    .await?;

    if let Some(object_id) = existing {
        sqlx::query(
            r#"UPDATE "Invoice" SET
                 "updatedAt" = NOW(), "status" = $1, "total" = $2, "amountPaid" = $3,
                 "balance" = $4, "dateBilled" = $5, "updatedBy" = $6
               WHERE "objectId" = $7"#,
        )
        .persistent(false)
        .bind(record.status.as_str())
        .bind(record.total)
        .bind(record.amount_paid)
        .bind(record.balance)
        .bind(record.date_billed)
        .bind(SYNCED_BY)
        .bind(&object_id)
        .execute(&db.pool)
        .await
        .with_context(|| format!("update Invoice {object_id}"))?;
        return Ok(Upsert::Updated);
    }

    let mut conn = db.pool.acquire().await?;
    let record = record.clone();
    insert_with_fresh_id("Invoice", &mut *conn, move |conn, id| {
        let record = record.clone();
        Box::pin(async move {
            let res = sqlx::query(
                r#"INSERT INTO "Invoice" (
                     "objectId", "createdAt", "updatedAt", "_rperm", "_wperm",
                     "patientId", "stripeInvoiceId", "status",
                     "total", "amountPaid", "balance", "dateBilled", "updatedBy")
                   VALUES ($1, NOW(), NOW(), ARRAY['role:Admin','role:Staff'], ARRAY['role:Admin'],
                           $2, $3, $4, $5, $6, $7, $8, $9)
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(&record.patient_id)
            .bind(&record.stripe_invoice_id)
            .bind(record.status.as_str())
            .bind(record.total)
            .bind(record.amount_paid)
            .bind(record.balance)
            .bind(record.date_billed)
            .bind(SYNCED_BY)
            .execute(conn)
            .await
            .with_context(|| format!("insert Invoice for {}", record.stripe_invoice_id))?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await?;
    Ok(Upsert::Inserted)
}

pub struct InvoiceSyncOptions<'a> {
    pub patient_id: Option<&'a str>,
    pub limit: Option<usize>,
    pub dry_run: bool,
}

pub async fn sync_invoices<B>(
    db: &Db,
    api: &B,
    opts: &InvoiceSyncOptions<'_>,
) -> Result<InvoiceSyncSummary>
where
    B: BillingApi + ?Sized,
{
    let mut summary = InvoiceSyncSummary::default();
    let patients = fetch_patients(db, opts.patient_id).await?;
    if patients.is_empty() {
        if let Some(id) = opts.patient_id {
            warn!(patient_id = id, "no patient with that objectId and a stripeCustomerId");
        }
    }
    summary.patients = patients.len();

    for patient in &patients {
        println!("\nPatient {} ({})", patient.id, patient.name);
        let Some(customer) = patient.stripe_customer_id.as_deref().filter(|c| !c.is_empty()) else {
            println!("  no stripeCustomerId, skipping");
            summary.skipped += 1;
            continue;
        };
        let invoices = fetch_all_invoices(api, customer, opts.limit).await?;
        println!("  retrieved {} invoice(s) from Stripe", invoices.len());
        summary.fetched += invoices.len();

        for inv in &invoices {
            let record = build_record(&patient.id, inv);
            if opts.dry_run {
                println!(
                    "  [DRY RUN] would upsert {} [{}] ({})",
                    record.stripe_invoice_id,
                    record.status.as_str(),
                    record.description.as_deref().unwrap_or("Service")
                );
                continue;
            }
            match upsert_invoice(db, &record).await? {
                Upsert::Inserted => summary.inserted += 1,
                Upsert::Updated => summary.updated += 1,
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fakes::FakeBilling;

    fn invoice(id: &str, status: &str, amount_due: i64, meta: &[(&str, &str)]) -> StripeInvoice {
        StripeInvoice {
            id: id.into(),
            customer: Some("cus_1".into()),
            status: Some(status.into()),
            amount_due,
            metadata: meta.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn status_mapping_follows_precedence() {
        assert_eq!(map_invoice_status(&invoice("a", "paid", 0, &[])), InvoiceStatus::NoCharge);
        assert_eq!(
            map_invoice_status(&invoice("b", "paid", 500, &[("noCharge", "true")])),
            InvoiceStatus::NoCharge
        );
        assert_eq!(map_invoice_status(&invoice("c", "paid", 500, &[])), InvoiceStatus::Paid);
        assert_eq!(
            map_invoice_status(&invoice("d", "open", 500, &[("insuranceRejected", "true")])),
            InvoiceStatus::Rejected
        );
        assert_eq!(
            map_invoice_status(&invoice("e", "draft", 500, &[("submittedToInsurance", "yes")])),
            InvoiceStatus::Submitted
        );
        assert_eq!(map_invoice_status(&invoice("f", "open", 500, &[])), InvoiceStatus::Submitted);
        assert_eq!(map_invoice_status(&invoice("g", "void", 500, &[])), InvoiceStatus::NoCharge);
    }

    #[test]
    fn false_metadata_flags_are_off() {
        let inv = invoice("h", "paid", 500, &[("noCharge", "false"), ("insuranceRejected", "")]);
        assert_eq!(map_invoice_status(&inv), InvoiceStatus::Paid);
    }

    #[test]
    fn record_prefers_finalized_date_and_first_line() {
        let mut inv = invoice("in_1", "paid", 8500, &[("serviceName", "Massage")]);
        inv.created = Some(1_700_000_000);
        inv.status_transitions.finalized_at = Some(1_700_003_600);
        inv.amount_paid = 8500;
        let rec = build_record("P1", &inv);
        assert_eq!(rec.date_billed.map(|d| d.timestamp()), Some(1_700_003_600));
        assert_eq!(rec.description.as_deref(), Some("Massage"));
        assert_eq!(rec.total, 8500);
        assert_eq!(rec.balance, 0);

        inv.status_transitions.finalized_at = None;
        assert_eq!(build_record("P1", &inv).date_billed.map(|d| d.timestamp()), Some(1_700_000_000));
    }

    #[tokio::test]
    async fn pages_until_exhausted() {
        let invoices: Vec<_> = (0..250).map(|i| invoice(&format!("in_{i:03}"), "paid", 100, &[])).collect();
        let fake = FakeBilling::with_invoices(invoices);
        let all = fetch_all_invoices(&fake, "cus_1", None).await.unwrap();
        assert_eq!(all.len(), 250);
        assert_eq!(all.last().map(|i| i.id.as_str()), Some("in_249"));
    }

    #[tokio::test]
    async fn cap_limits_fetched_invoices() {
        let invoices: Vec<_> = (0..250).map(|i| invoice(&format!("in_{i:03}"), "paid", 100, &[])).collect();
        let fake = FakeBilling::with_invoices(invoices);
        let some = fetch_all_invoices(&fake, "cus_1", Some(120)).await.unwrap();
        assert_eq!(some.len(), 120);
        assert!(fetch_all_invoices(&fake, "cus_other", None).await.unwrap().is_empty());
    }
}
