//! Backfill `Appointment.itemPriceId` through the Parse object API.
use std::collections::BTreeMap;

use anyhow::Result;
use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::clients::parse::{pointer, pointer_id, ObjectStore, ParseQuery};

pub const DEFAULT_LIMIT: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemGroup {
    pub item_id: String,
    pub item_name: String,
    pub appointment_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    pub groups: Vec<ItemGroup>,
    pub without_offering: Vec<String>,
    pub without_item: Vec<String>,
}

/// Groups appointments by the catalog item behind their service offering. Expects
/// `serviceOfferingId` and `serviceOfferingId.itemId` to be included.
pub fn group_by_item(appointments: &[Value]) -> Grouping {
    let mut out = Grouping::default();
    let mut by_item: BTreeMap<String, ItemGroup> = BTreeMap::new();
    for appt in appointments {
        let Some(id) = appt.get("objectId").and_then(Value::as_str) else {
            continue;
        };
        let Some(offering) = appt.get("serviceOfferingId").filter(|o| o.is_object()) else {
            warn!(appointment = id, "no service offering; skipping");
            out.without_offering.push(id.to_string());
            continue;
        };
        let Some(item_id) = pointer_id(offering, "itemId") else {
            warn!(appointment = id, "service offering has no item; skipping");
            out.without_item.push(id.to_string());
            continue;
        };
        let item_name = offering
            .get("itemId")
            .and_then(|i| i.get("itemName"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        by_item
            .entry(item_id.clone())
            .or_insert_with(|| ItemGroup {
                item_id,
                item_name,
                appointment_ids: Vec::new(),
            })
            .appointment_ids
            .push(id.to_string());
    }
    out.groups = by_item.into_values().collect();
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub found: usize,
    pub updated: usize,
    pub groups_without_price: Vec<String>,
    pub failures: Vec<(String, String)>,
    pub skipped: usize,
}

/// Shortest-duration price of an item.
async fn default_price<S>(store: &S, item_id: &str) -> Result<Option<Value>>
where
    S: ObjectStore + ?Sized,
{
    let query = ParseQuery::new(json!({ "itemId": pointer("Items_Catalog", item_id) }))
        .order("durationMinutes")
        .limit(1);
    Ok(store.find("Item_Price", &query).await?.into_iter().next())
}

pub async fn backfill_item_prices<S>(store: &S, limit: u32, dry_run: bool) -> Result<BackfillReport>
where
    S: ObjectStore + ?Sized,
{
    let query = ParseQuery::new(json!({ "itemPriceId": { "$exists": false } }))
        .limit(limit)
        .include("serviceOfferingId")
        .include("serviceOfferingId.itemId");
    let appointments = store.find("Appointment", &query).await?;
    let mut report = BackfillReport {
        found: appointments.len(),
        ..Default::default()
    };
    info!(count = report.found, "appointments without itemPriceId");

    let grouping = group_by_item(&appointments);
    report.skipped = grouping.without_offering.len() + grouping.without_item.len();

    for group in &grouping.groups {
        println!("\n{} ({} appointments)", group.item_name, group.appointment_ids.len());
        let Some(price) = default_price(store, &group.item_id).await? else {
            warn!(item_id = %group.item_id, "no Item_Price for item; skipping its appointments");
            report.groups_without_price.push(group.item_id.clone());
            report.skipped += group.appointment_ids.len();
            continue;
        };
        let Some(price_id) = price.get("objectId").and_then(Value::as_str) else {
            continue;
        };
        println!(
            "  using price ${:.2} for {} minutes",
            price.get("price").and_then(Value::as_f64).unwrap_or_default() / 100.0,
            price.get("durationMinutes").and_then(Value::as_i64).unwrap_or_default()
        );
        if dry_run {
            println!("  [DRY RUN] would update {} appointments", group.appointment_ids.len());
            report.updated += group.appointment_ids.len();
            continue;
        }

        let fields = json!({ "itemPriceId": pointer("Item_Price", price_id) });
        let results = join_all(
            group
                .appointment_ids
                .iter()
                .map(|id| {
                    let fields = fields.clone();
                    async move { (id, store.update("Appointment", id, fields).await) }
                }),
        )
        .await;
        let mut ok = 0;
        for (id, res) in results {
            match res {
                Ok(()) => ok += 1,
                Err(e) => {
                    error!(appointment = %id, error = %e, "update failed");
                    report.failures.push((id.clone(), format!("{e:#}")));
                }
            }
        }
        println!("  updated {ok}/{}", group.appointment_ids.len());
        report.updated += ok;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fakes::FakeObjects;

    fn item(id: &str, name: &str) -> Value {
        json!({ "__type": "Object", "className": "Items_Catalog", "objectId": id, "itemName": name })
    }

    fn appt(id: &str, offering: Option<Value>) -> Value {
        let mut v = json!({ "objectId": id });
        if let Some(o) = offering {
            v["serviceOfferingId"] = o;
        }
        v
    }

    fn offering(id: &str, item: Option<Value>) -> Value {
        let mut v = json!({ "__type": "Object", "className": "Service_Offering", "objectId": id });
        if let Some(i) = item {
            v["itemId"] = i;
        }
        v
    }

    #[test]
    fn groups_by_item_and_reports_gaps() {
        let appts = vec![
            appt("a1", Some(offering("so1", Some(item("I1", "Massage"))))),
            appt("a2", Some(offering("so2", Some(item("I1", "Massage"))))),
            appt("a3", Some(offering("so3", Some(item("I2", "Assessment"))))),
            appt("a4", None),
            appt("a5", Some(offering("so5", None))),
        ];
        let g = group_by_item(&appts);
        assert_eq!(g.groups.len(), 2);
        assert_eq!(g.groups[0].item_id, "I1");
        assert_eq!(g.groups[0].appointment_ids, ["a1", "a2"]);
        assert_eq!(g.groups[1].item_name, "Assessment");
        assert_eq!(g.without_offering, ["a4"]);
        assert_eq!(g.without_item, ["a5"]);
    }

    fn seeded_store() -> FakeObjects {
        let store = FakeObjects::default();
        for (id, so) in [("a1", "so1"), ("a2", "so1"), ("a3", "so2")] {
            let it = if so == "so1" { item("I1", "Massage") } else { item("I2", "Yoga") };
            store.insert("Appointment", appt(id, Some(offering(so, Some(it)))));
        }
        store.insert(
            "Item_Price",
            json!({ "objectId": "p60", "itemId": pointer("Items_Catalog", "I1"), "durationMinutes": 60, "price": 12000 }),
        );
        store.insert(
            "Item_Price",
            json!({ "objectId": "p30", "itemId": pointer("Items_Catalog", "I1"), "durationMinutes": 30, "price": 7000 }),
        );
        store
    }

    #[tokio::test]
    async fn links_shortest_price_and_skips_items_without_prices() {
        let store = seeded_store();
        let report = backfill_item_prices(&store, DEFAULT_LIMIT, false).await.unwrap();
        assert_eq!(report.found, 3);
        assert_eq!(report.updated, 2);
        assert_eq!(report.groups_without_price, ["I2"]);
        let a1 = store.get("Appointment", "a1").unwrap();
        assert_eq!(pointer_id(&a1, "itemPriceId").as_deref(), Some("p30"));
        assert!(store.get("Appointment", "a3").unwrap().get("itemPriceId").is_none());

        let again = backfill_item_prices(&store, DEFAULT_LIMIT, false).await.unwrap();
        assert_eq!(again.found, 1);
        assert_eq!(again.updated, 0);
    }

    #[tokio::test]
    async fn one_failed_update_is_collected() {
        let mut store = seeded_store();
        store.failing.insert("a2".into());
        let report = backfill_item_prices(&store, DEFAULT_LIMIT, false).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "a2");
    }

    #[tokio::test]
    async fn dry_run_leaves_appointments_untouched() {
        let store = seeded_store();
        let report = backfill_item_prices(&store, DEFAULT_LIMIT, true).await.unwrap();
        assert_eq!(report.updated, 2);
        assert!(store.get("Appointment", "a1").unwrap().get("itemPriceId").is_none());
    }
}
