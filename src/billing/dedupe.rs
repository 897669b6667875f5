//! One invoice per appointment: keep the earliest, remove the rest from Stripe and
//! from the application store.
use anyhow::Result;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::clients::parse::{pointer, pointer_id, ObjectStore, ParseQuery};
use crate::clients::stripe::BillingApi;

pub const INVOICE_CLASS: &str = "Invoice";
const FETCH_LIMIT: u32 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceDoc {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub appointment_id: Option<String>,
    pub stripe_invoice_id: Option<String>,
    pub total: i64,
    pub status: Option<String>,
}

impl InvoiceDoc {
    pub fn from_parse(v: &Value) -> Option<Self> {
        let id = v.get("objectId")?.as_str()?.to_string();
        let created_at = v
            .get("createdAt")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
            .with_timezone(&Utc);
        Some(Self {
            id,
            created_at,
            appointment_id: pointer_id(v, "appointmentId"),
            stripe_invoice_id: v
                .get("stripeInvoiceId")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            total: v.get("total").and_then(Value::as_f64).map(|t| t.round() as i64).unwrap_or_default(),
            status: v.get("status").and_then(Value::as_str).map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub appointment_id: String,
    pub keep: InvoiceDoc,
    pub remove: Vec<InvoiceDoc>,
}

/// Groups with more than one invoice. The kept invoice is the earliest created;
/// equal timestamps fall back to objectId so input order never matters.
pub fn plan_duplicates(invoices: Vec<InvoiceDoc>) -> Vec<DuplicateGroup> {
    invoices
        .into_iter()
        .filter_map(|inv| inv.appointment_id.clone().map(|a| (a, inv)))
        .into_group_map()
        .into_iter()
        .filter(|(_, group)| group.len() > 1)
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .filter_map(|(appointment_id, group)| {
            let mut ordered = group
                .into_iter()
                .sorted_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            let keep = ordered.next()?;
            Some(DuplicateGroup {
                appointment_id,
                keep,
                remove: ordered.collect(),
            })
        })
        .collect()
}

pub async fn load_invoices<S>(store: &S, appointment_id: Option<&str>) -> Result<Vec<InvoiceDoc>>
where
    S: ObjectStore + ?Sized,
{
    let where_ = match appointment_id {
        Some(id) => json!({ "appointmentId": pointer("Appointment", id) }),
        None => json!({}),
    };
    let query = ParseQuery::new(where_)
        .limit(FETCH_LIMIT)
        .order("createdAt")
        .include("appointmentId")
        .include("patientId");
    let raw = store.find(INVOICE_CLASS, &query).await?;
    let total = raw.len();
    let docs: Vec<InvoiceDoc> = raw.iter().filter_map(InvoiceDoc::from_parse).collect();
    if docs.len() < total {
        warn!(skipped = total - docs.len(), "invoices without objectId/createdAt ignored");
    }
    if total as u32 >= FETCH_LIMIT {
        warn!(limit = FETCH_LIMIT, "invoice fetch hit the limit; re-run after cleanup to catch the rest");
    }
    Ok(docs)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    NoRemote,
    Deleted,
    Voided,
    /// Status that allows neither delete nor void (paid, void, uncollectible).
    Left(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalFailure {
    pub invoice_id: String,
    pub stripe_invoice_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupeReport {
    pub kept: Vec<String>,
    pub removed: Vec<(String, RemoteOutcome)>,
    pub failures: Vec<RemovalFailure>,
    pub would_remove: usize,
}

/// Draft invoices are deleted, open ones voided; anything else is left with a warning.
pub async fn settle_remote<B>(api: &B, stripe_invoice_id: &str) -> Result<RemoteOutcome>
where
    B: BillingApi + ?Sized,
{
    let invoice = api.retrieve_invoice(stripe_invoice_id).await?;
    match invoice.status.as_deref() {
        Some("draft") => {
            api.delete_invoice(stripe_invoice_id).await?;
            Ok(RemoteOutcome::Deleted)
        }
        Some("open") => {
            api.void_invoice(stripe_invoice_id).await?;
            Ok(RemoteOutcome::Voided)
        }
        other => {
            let status = other.unwrap_or("unknown").to_string();
            warn!(stripe_invoice_id, status = %status, "cannot delete or void invoice in this state");
            Ok(RemoteOutcome::Left(status))
        }
    }
}

async fn remove_one<S, B>(store: &S, api: &B, dup: &InvoiceDoc) -> Result<RemoteOutcome>
where
    S: ObjectStore + ?Sized,
    B: BillingApi + ?Sized,
{
    let outcome = match dup.stripe_invoice_id.as_deref() {
        Some(sid) => settle_remote(api, sid).await?,
        None => RemoteOutcome::NoRemote,
    };
    store.destroy(INVOICE_CLASS, &dup.id).await?;
    Ok(outcome)
}

fn describe(inv: &InvoiceDoc) -> String {
    format!(
        "{} (created {}, stripe {}, total ${:.2}, status {})",
        inv.id,
        inv.created_at.to_rfc3339(),
        inv.stripe_invoice_id.as_deref().unwrap_or("-"),
        inv.total as f64 / 100.0,
        inv.status.as_deref().unwrap_or("-")
    )
}

/// Failures are collected per duplicate and never stop the run.
pub async fn remove_duplicates<S, B>(
    store: &S,
    api: &B,
    groups: &[DuplicateGroup],
    dry_run: bool,
) -> DedupeReport
where
    S: ObjectStore + ?Sized,
    B: BillingApi + ?Sized,
{
    let mut report = DedupeReport::default();
    for group in groups {
        println!("\nAppointment {} ({} invoices)", group.appointment_id, group.remove.len() + 1);
        println!("  keep:   {}", describe(&group.keep));
        report.kept.push(group.keep.id.clone());

        for dup in &group.remove {
            println!("  remove: {}", describe(dup));
            if dry_run {
                report.would_remove += 1;
                continue;
            }
            match remove_one(store, api, dup).await {
                Ok(outcome) => {
                    info!(invoice = %dup.id, outcome = ?outcome, "duplicate removed");
                    report.removed.push((dup.id.clone(), outcome));
                }
                Err(e) => {
                    error!(invoice = %dup.id, error = %e, "failed to remove duplicate");
                    report.failures.push(RemovalFailure {
                        invoice_id: dup.id.clone(),
                        stripe_invoice_id: dup.stripe_invoice_id.clone(),
                        error: format!("{e:#}"),
                    });
                }
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fakes::{FakeBilling, FakeObjects};
    use crate::clients::stripe::StripeInvoice;

    fn inv(id: &str, appt: &str, created: &str, stripe: Option<&str>) -> Value {
        let mut v = json!({
            "objectId": id,
            "createdAt": created,
            "appointmentId": pointer("Appointment", appt),
            "total": 8500,
            "status": "submitted",
        });
        if let Some(s) = stripe {
            v["stripeInvoiceId"] = json!(s);
        }
        v
    }

    fn docs(values: &[Value]) -> Vec<InvoiceDoc> {
        values.iter().filter_map(InvoiceDoc::from_parse).collect()
    }

    fn stripe_invoice(id: &str, status: &str) -> StripeInvoice {
        StripeInvoice {
            id: id.into(),
            status: Some(status.into()),
            ..Default::default()
        }
    }

    #[test]
    fn keeps_earliest_regardless_of_order() {
        let values = vec![
            inv("c", "A1", "2024-05-03T10:00:00.000Z", None),
            inv("a", "A1", "2024-05-01T10:00:00.000Z", None),
            inv("b", "A1", "2024-05-02T10:00:00.000Z", None),
            inv("z", "A2", "2024-05-01T10:00:00.000Z", None),
        ];
        let forward = plan_duplicates(docs(&values));
        let mut reversed = values.clone();
        reversed.reverse();
        let backward = plan_duplicates(docs(&reversed));

        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].keep.id, "a");
        assert_eq!(forward[0].remove.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(), ["b", "c"]);
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let values = vec![
            inv("m2", "A1", "2024-05-01T10:00:00Z", None),
            inv("m1", "A1", "2024-05-01T10:00:00Z", None),
        ];
        let groups = plan_duplicates(docs(&values));
        assert_eq!(groups[0].keep.id, "m1");
        assert_eq!(groups[0].remove.len(), 1);
    }

    #[test]
    fn invoices_without_appointment_are_not_grouped() {
        let values = vec![
            json!({ "objectId": "x", "createdAt": "2024-05-01T10:00:00Z" }),
            json!({ "objectId": "y", "createdAt": "2024-05-01T11:00:00Z" }),
        ];
        assert!(plan_duplicates(docs(&values)).is_empty());
    }

    #[tokio::test]
    async fn draft_is_deleted_open_is_voided_paid_is_left() {
        let api = FakeBilling::with_invoices(vec![
            stripe_invoice("in_draft", "draft"),
            stripe_invoice("in_open", "open"),
            stripe_invoice("in_paid", "paid"),
        ]);
        assert_eq!(settle_remote(&api, "in_draft").await.unwrap(), RemoteOutcome::Deleted);
        assert_eq!(settle_remote(&api, "in_open").await.unwrap(), RemoteOutcome::Voided);
        assert_eq!(settle_remote(&api, "in_paid").await.unwrap(), RemoteOutcome::Left("paid".into()));
        let state = api.state.lock().unwrap();
        assert_eq!(state.deleted, ["in_draft"]);
        assert_eq!(state.voided, ["in_open"]);
    }

    #[tokio::test]
    async fn failures_are_collected_and_the_rest_proceed() {
        let store = FakeObjects::default();
        let values = vec![
            inv("k1", "A1", "2024-05-01T10:00:00Z", Some("in_k1")),
            inv("d1", "A1", "2024-05-02T10:00:00Z", Some("in_bad")),
            inv("d2", "A1", "2024-05-03T10:00:00Z", Some("in_d2")),
            inv("k2", "A2", "2024-05-01T10:00:00Z", None),
            inv("d3", "A2", "2024-05-04T10:00:00Z", None),
        ];
        for v in &values {
            store.insert(INVOICE_CLASS, v.clone());
        }
        let api = FakeBilling::with_invoices(vec![stripe_invoice("in_bad", "open"), stripe_invoice("in_d2", "draft")]);
        api.state.lock().unwrap().failing.insert("in_bad".into());

        let groups = plan_duplicates(load_invoices(&store, None).await.unwrap());
        let report = remove_duplicates(&store, &api, &groups, false).await;

        assert_eq!(report.kept, ["k1", "k2"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].invoice_id, "d1");
        assert_eq!(
            report.removed,
            vec![
                ("d2".to_string(), RemoteOutcome::Deleted),
                ("d3".to_string(), RemoteOutcome::NoRemote)
            ]
        );
        // the failed duplicate stays locally for the next run
        assert!(store.get(INVOICE_CLASS, "d1").is_some());
        assert!(store.get(INVOICE_CLASS, "d2").is_none());
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let store = FakeObjects::default();
        store.insert(INVOICE_CLASS, inv("k1", "A1", "2024-05-01T10:00:00Z", Some("in_k1")));
        store.insert(INVOICE_CLASS, inv("d1", "A1", "2024-05-02T10:00:00Z", Some("in_d1")));
        let api = FakeBilling::with_invoices(vec![stripe_invoice("in_d1", "draft")]);
        let groups = plan_duplicates(load_invoices(&store, Some("A1")).await.unwrap());
        let report = remove_duplicates(&store, &api, &groups, true).await;
        assert_eq!(report.would_remove, 1);
        assert!(report.removed.is_empty());
        assert!(store.destroyed.lock().unwrap().is_empty());
        assert!(api.state.lock().unwrap().deleted.is_empty());
    }
}
