//! Mirror an org's service catalog (`Items_Catalog` + `Item_Price`) into Stripe
//! products and prices.
use std::collections::{HashMap, HashSet};

use anyhow::{Context, Result};
use sqlx::Row;
use tracing::{error, info, warn};

use super::outbox::{OutboxEntry, PgSyncLedger, SyncKind, SyncLedger};
use crate::clients::stripe::{BillingApi, Metadata, NewPrice, NewProduct};
use crate::util::db::Db;

pub const SYNC_SOURCE: &str = "synced-admin-portal-migration";
pub const DEFAULT_CURRENCY: &str = "usd";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogOffering {
    pub service_offering_id: String,
    pub org_id: String,
    pub ownership_group_id: Option<String>,
    pub location_id: Option<String>,
    pub discipline_offering_id: Option<String>,
    pub item_id: String,
    pub item_name: String,
    pub description: Option<String>,
    pub stripe_product_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogPrice {
    pub id: String,
    pub item_id: String,
    pub amount: i64,
    pub currency: Option<String>,
    pub duration_minutes: i32,
    pub org_id: Option<String>,
    pub ownership_group_id: Option<String>,
    pub location_id: Option<String>,
    pub staff_id: Option<String>,
    pub stripe_price_id: Option<String>,
}

fn meta(pairs: &[(&str, &str)]) -> Metadata {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn product_metadata(o: &CatalogOffering) -> Metadata {
    let mut m = meta(&[
        ("itemId", o.item_id.as_str()),
        ("serviceOfferingId", o.service_offering_id.as_str()),
        ("orgId", o.org_id.as_str()),
        ("source", SYNC_SOURCE),
    ]);
    if let Some(d) = &o.discipline_offering_id {
        m.insert("disciplineOfferingId".into(), d.clone());
    }
    let hierarchy = if let Some(loc) = &o.location_id {
        m.insert("locationId".into(), loc.clone());
        "location"
    } else if let Some(g) = &o.ownership_group_id {
        m.insert("ownershipGroupId".into(), g.clone());
        "ownershipGroup"
    } else {
        "org"
    };
    m.insert("hierarchy".into(), hierarchy.into());
    m
}

/// Most specific scope wins: staff, then location, then ownership group, then org.
pub fn price_metadata(p: &CatalogPrice, o: &CatalogOffering) -> Metadata {
    let duration = p.duration_minutes.to_string();
    let mut m = meta(&[
        ("itemPriceId", p.id.as_str()),
        ("itemId", p.item_id.as_str()),
        ("durationMinutes", duration.as_str()),
        ("orgId", p.org_id.as_deref().unwrap_or(o.org_id.as_str())),
        ("source", SYNC_SOURCE),
    ]);
    let price_type = if let Some(s) = &p.staff_id {
        m.insert("staffId".into(), s.clone());
        "staff"
    } else if let Some(l) = &p.location_id {
        m.insert("locationId".into(), l.clone());
        "location"
    } else if let Some(g) = &p.ownership_group_id {
        m.insert("ownershipGroupId".into(), g.clone());
        "ownershipGroup"
    } else {
        "org"
    };
    m.insert("priceType".into(), price_type.into());
    m
}

#[async_trait::async_trait]
pub trait CatalogSource: Send {
    async fn offerings(&mut self, org_id: &str, limit: Option<i64>) -> Result<Vec<CatalogOffering>>;
    async fn prices(&mut self, item_id: &str) -> Result<Vec<CatalogPrice>>;
}

pub struct PgCatalog {
    db: Db,
}

impl PgCatalog {
    pub fn new(db: &Db) -> Self {
        Self { db: db.clone() }
    }
}

#[async_trait::async_trait]
impl CatalogSource for PgCatalog {
    async fn offerings(
        &mut self,
        org_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<CatalogOffering>> {
        let rows = sqlx::query(
            r#"SELECT so."objectId" AS service_offering_id, so."orgId", so."ownershipGroupId",
                      so."locationId", so."disciplineOfferingId", ic."objectId" AS item_id,
                      ic."itemName", ic."description", ic."stripeProductId"
               FROM "Service_Offering" so
               INNER JOIN "Items_Catalog" ic ON so."itemId" = ic."objectId"
               WHERE so."orgId" = $1
                 AND ic."type" = 'service'
                 AND ic."itemName" NOT LIKE '%Staff Placeholder%'
               ORDER BY so."createdAt" ASC NULLS LAST, so."objectId" ASC
               LIMIT $2"#,
        )
        .persistent(false)
        .bind(org_id)
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await
        .context("load service offerings")?;
        rows.iter()
            .map(|r| {
                Ok(CatalogOffering {
                    service_offering_id: r.try_get("service_offering_id")?,
                    org_id: r.try_get("orgId")?,
                    ownership_group_id: r.try_get("ownershipGroupId")?,
                    location_id: r.try_get("locationId")?,
                    discipline_offering_id: r.try_get("disciplineOfferingId")?,
                    item_id: r.try_get("item_id")?,
                    item_name: r.try_get::<Option<String>, _>("itemName")?.unwrap_or_default(),
                    description: r.try_get("description")?,
                    stripe_product_id: r.try_get("stripeProductId")?,
                })
            })
            .collect()
    }

    async fn prices(&mut self, item_id: &str) -> Result<Vec<CatalogPrice>> {
        let rows = sqlx::query(
            r#"SELECT "objectId", "itemId", ROUND("price")::int8 AS amount, "currency",
                      COALESCE("durationMinutes", 0)::int4 AS duration, "orgId",
                      "ownershipGroupId", "locationId", "staffId", "stripePriceId"
               FROM "Item_Price"
               WHERE "itemId" = $1
               ORDER BY "durationMinutes" ASC NULLS LAST, "objectId" ASC"#,
        )
        .persistent(false)
        .bind(item_id)
        .fetch_all(&self.db.pool)
        .await
        .with_context(|| format!("load prices for {item_id}"))?;
        rows.iter()
            .map(|r| {
                Ok(CatalogPrice {
                    id: r.try_get("objectId")?,
                    item_id: r.try_get("itemId")?,
                    amount: r.try_get::<Option<i64>, _>("amount")?.unwrap_or_default(),
                    currency: r.try_get("currency")?,
                    duration_minutes: r.try_get("duration")?,
                    org_id: r.try_get("orgId")?,
                    ownership_group_id: r.try_get("ownershipGroupId")?,
                    location_id: r.try_get("locationId")?,
                    staff_id: r.try_get("staffId")?,
                    stripe_price_id: r.try_get("stripePriceId")?,
                })
            })
            .collect()
    }
}

/// Catalog reads and outbox bookkeeping against the same database.
pub struct PgCatalogSync {
    catalog: PgCatalog,
    ledger: PgSyncLedger,
}

impl PgCatalogSync {
    pub async fn open(db: &Db) -> Result<Self> {
        Ok(Self {
            catalog: PgCatalog::new(db),
            ledger: PgSyncLedger::open(db).await?,
        })
    }
}

#[async_trait::async_trait]
impl CatalogSource for PgCatalogSync {
    async fn offerings(
        &mut self,
        org_id: &str,
        limit: Option<i64>,
    ) -> Result<Vec<CatalogOffering>> {
        self.catalog.offerings(org_id, limit).await
    }

    async fn prices(&mut self, item_id: &str) -> Result<Vec<CatalogPrice>> {
        self.catalog.prices(item_id).await
    }
}

#[async_trait::async_trait]
impl SyncLedger for PgCatalogSync {
    async fn pending(&mut self) -> Result<Vec<OutboxEntry>> {
        self.ledger.pending().await
    }

    async fn stage(&mut self, kind: SyncKind, local_id: &str) -> Result<OutboxEntry> {
        self.ledger.stage(kind, local_id).await
    }

    async fn confirm(&mut self, entry: &OutboxEntry, remote_id: &str) -> Result<()> {
        self.ledger.confirm(entry, remote_id).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSyncSummary {
    pub recovered: usize,
    pub still_pending: usize,
    pub products_created: usize,
    pub products_updated: usize,
    pub products_skipped: usize,
    pub prices_created: usize,
    pub prices_skipped: usize,
    pub prices_failed: usize,
}

pub struct CatalogSyncOptions<'a> {
    pub org_id: &'a str,
    pub limit: Option<i64>,
    pub dry_run: bool,
}

/// Adopt Stripe objects that were created before a crash but never confirmed locally.
async fn recover_pending<L, B>(
    ledger: &mut L,
    api: &B,
    dry_run: bool,
    summary: &mut CatalogSyncSummary) -> Result<()>
where
    L: SyncLedger + ?Sized,
    B: BillingApi + ?Sized,
{
    let pending = ledger.pending().await?;
    if pending.is_empty() {
        return Ok(());
    }
    info!(count = pending.len(), "resolving pending outbox entries");
    for entry in pending {
        let key = entry.kind.metadata_key();
        let found = match entry.kind {
            SyncKind::Product => api.find_product(key, &entry.local_id).await?.map(|p| p.id),
            SyncKind::Price => api.find_price(key, &entry.local_id).await?.map(|p| p.id),
        };
        match found {
            Some(remote_id) if !dry_run => {
                ledger.confirm(&entry, &remote_id).await?;
                summary.recovered += 1;
            }
            Some(remote_id) => {
                println!("  [DRY RUN] would adopt {remote_id} for {}", entry.local_id);
                summary.recovered += 1;
            }
            None => {
                warn!(local_id = %entry.local_id, kind = entry.kind.as_str(), "no remote object yet; create will be retried with the staged key");
                summary.still_pending += 1;
            }
        }
    }
    Ok(())
}

async fn create_confirmed<L, F, Fut>(
    ledger: &mut L,
    kind: SyncKind,
    local_id: &str,
    create: F,
) -> Result<String>
where
    L: SyncLedger + ?Sized,
    F: FnOnce(OutboxEntry) -> Fut,
    Fut: std::future::Future<Output = Result<(OutboxEntry, String)>>,
{
    let entry = ledger.stage(kind, local_id).await?;
    let (entry, remote_id) = create(entry).await?;
    ledger.confirm(&entry, &remote_id).await?;
    Ok(remote_id)
}

pub async fn sync_catalog<L, B>(
    ledger: &mut L,
    api: &B,
    opts: &CatalogSyncOptions<'_>,
) -> Result<CatalogSyncSummary>
where
    L: CatalogSource + SyncLedger + ?Sized,
    B: BillingApi + ?Sized,
{
    let mut summary = CatalogSyncSummary::default();
    recover_pending(ledger, api, opts.dry_run, &mut summary).await?;

    let offerings = ledger.offerings(opts.org_id, opts.limit).await?;
    info!(count = offerings.len(), org_id = opts.org_id, "service offerings to sync");

    // items are shared by org/group/location offerings; sync each once per run
    let mut products: HashMap<String, String> = HashMap::new();
    let mut priced: HashSet<String> = HashSet::new();

    for offering in &offerings {
        println!("\n{} ({})", offering.item_name, offering.service_offering_id);
        let metadata = product_metadata(offering);

        let product_id = if let Some(id) = products.get(&offering.item_id) {
            id.clone()
        } else if let Some(id) = offering.stripe_product_id.clone().filter(|s| !s.is_empty()) {
            if !opts.dry_run {
                if let Err(e) = api.update_product_metadata(&id, &metadata).await {
                    error!(item_id = %offering.item_id, error = %e, "product update failed");
                    summary.products_skipped += 1;
                    continue;
                }
            }
            println!("  product updated: {id}");
            summary.products_updated += 1;
            id
        } else if opts.dry_run {
            println!("  [DRY RUN] would create product");
            summary.products_created += 1;
            format!("<new product {}>", offering.item_id)
        } else {
            let product = NewProduct {
                name: offering.item_name.clone(),
                description: offering
                    .description
                    .clone()
                    .filter(|d| !d.trim().is_empty())
                    .unwrap_or_else(|| offering.item_name.clone()),
                metadata,
            };
            let created = create_confirmed(ledger, SyncKind::Product, &offering.item_id, |entry| async move {
                let p = api.create_product(&product, &entry.key).await?;
                Ok::<_, anyhow::Error>((entry, p.id))
            })
            .await;
            match created {
                Ok(id) => {
                    println!("  product created: {id}");
                    summary.products_created += 1;
                    id
                }
                Err(e) => {
                    error!(item_id = %offering.item_id, error = %e, "product create failed");
                    summary.products_skipped += 1;
                    continue;
                }
            }
        };
        products.insert(offering.item_id.clone(), product_id.clone());

        if !priced.insert(offering.item_id.clone()) {
            continue;
        }
        let prices = ledger.prices(&offering.item_id).await?;
        info!(item_id = %offering.item_id, variants = prices.len(), "price variants");
        for price in &prices {
            if let Some(existing) = price.stripe_price_id.as_deref().filter(|s| !s.is_empty()) {
                println!("    price already synced: {existing}");
                summary.prices_skipped += 1;
                continue;
            }
            if opts.dry_run {
                println!(
                    "    [DRY RUN] would create price {} min ${:.2}",
                    price.duration_minutes,
                    price.amount as f64 / 100.0
                );
                summary.prices_created += 1;
                continue;
            }
            let new_price = NewPrice {
                product: product_id.clone(),
                unit_amount: price.amount,
                currency: price
                    .currency
                    .clone()
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
                metadata: price_metadata(price, offering),
            };
            let created = create_confirmed(ledger, SyncKind::Price, &price.id, |entry| async move {
                let p = api.create_price(&new_price, &entry.key).await?;
                Ok::<_, anyhow::Error>((entry, p.id))
            })
            .await;
            match created {
                Ok(id) => {
                    println!("    price created: {id} ({} min)", price.duration_minutes);
                    summary.prices_created += 1;
                }
                Err(e) => {
                    error!(item_price_id = %price.id, error = %e, "price create failed");
                    summary.prices_failed += 1;
                }
            }
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::outbox::new_idempotency_key;
    use crate::clients::fakes::FakeBilling;

    #[derive(Default)]
    struct MemCatalog {
        offerings: Vec<CatalogOffering>,
        prices: Vec<CatalogPrice>,
        outbox: Vec<(OutboxEntry, Option<String>)>,
        /// Simulates a crash between the remote create and the local confirm.
        crash_before_confirm: bool,
    }

    impl MemCatalog {
        fn pending_for(&self, kind: SyncKind, local_id: &str) -> Option<&OutboxEntry> {
            self.outbox
                .iter()
                .find(|(e, remote)| e.kind == kind && e.local_id == local_id && remote.is_none())
                .map(|(e, _)| e)
        }
    }

    #[async_trait::async_trait]
    impl CatalogSource for MemCatalog {
        async fn offerings(
            &mut self,
            org_id: &str,
            limit: Option<i64>,
        ) -> Result<Vec<CatalogOffering>> {
            let mut out: Vec<_> = self
                .offerings
                .iter()
                .filter(|o| o.org_id == org_id)
                .cloned()
                .collect();
            if let Some(l) = limit {
                out.truncate(l as usize);
            }
            Ok(out)
        }

        async fn prices(&mut self, item_id: &str) -> Result<Vec<CatalogPrice>> {
            Ok(self.prices.iter().filter(|p| p.item_id == item_id).cloned().collect())
        }
    }

    #[async_trait::async_trait]
    impl SyncLedger for MemCatalog {
        async fn pending(&mut self) -> Result<Vec<OutboxEntry>> {
            Ok(self
                .outbox
                .iter()
                .filter(|(_, r)| r.is_none())
                .map(|(e, _)| e.clone())
                .collect())
        }

        async fn stage(&mut self, kind: SyncKind, local_id: &str) -> Result<OutboxEntry> {
            if let Some(e) = self.pending_for(kind, local_id) {
                return Ok(e.clone());
            }
            let entry = OutboxEntry {
                key: new_idempotency_key(kind, local_id),
                kind,
                local_id: local_id.to_string(),
            };
            self.outbox.push((entry.clone(), None));
            Ok(entry)
        }

        async fn confirm(&mut self, entry: &OutboxEntry, remote_id: &str) -> Result<()> {
            if self.crash_before_confirm {
                anyhow::bail!("connection lost");
            }
            for (e, r) in self.outbox.iter_mut() {
                if e.key == entry.key {
                    *r = Some(remote_id.to_string());
                }
            }
            match entry.kind {
                SyncKind::Product => self
                    .offerings
                    .iter_mut()
                    .filter(|o| o.item_id == entry.local_id)
                    .for_each(|o| o.stripe_product_id = Some(remote_id.to_string())),
                SyncKind::Price => self
                    .prices
                    .iter_mut()
                    .filter(|p| p.id == entry.local_id)
                    .for_each(|p| p.stripe_price_id = Some(remote_id.to_string())),
            }
            Ok(())
        }
    }

    fn offering(id: &str, item: &str, location: Option<&str>) -> CatalogOffering {
        CatalogOffering {
            service_offering_id: id.into(),
            org_id: "org1".into(),
            location_id: location.map(Into::into),
            item_id: item.into(),
            item_name: format!("Service {item}"),
            ..Default::default()
        }
    }

    fn price(id: &str, item: &str, minutes: i32) -> CatalogPrice {
        CatalogPrice {
            id: id.into(),
            item_id: item.into(),
            amount: 8500,
            duration_minutes: minutes,
            ..Default::default()
        }
    }

    fn catalog() -> MemCatalog {
        MemCatalog {
            offerings: vec![offering("so1", "I1", None), offering("so2", "I1", Some("L1"))],
            prices: vec![price("P1", "I1", 30), price("P2", "I1", 60)],
            ..Default::default()
        }
    }

    fn opts(dry_run: bool) -> CatalogSyncOptions<'static> {
        CatalogSyncOptions {
            org_id: "org1",
            limit: None,
            dry_run,
        }
    }

    #[test]
    fn metadata_reflects_most_specific_scope() {
        let o = offering("so2", "I1", Some("L1"));
        assert_eq!(product_metadata(&o)["hierarchy"], "location");
        let mut p = price("P1", "I1", 30);
        p.location_id = Some("L1".into());
        p.staff_id = Some("S1".into());
        let m = price_metadata(&p, &o);
        assert_eq!(m["priceType"], "staff");
        assert_eq!(m["orgId"], "org1");
        assert_eq!(m["durationMinutes"], "30");
        assert!(!m.contains_key("locationId"));
    }

    #[tokio::test]
    async fn shared_item_is_created_once_and_rerun_only_updates() {
        let mut cat = catalog();
        let api = FakeBilling::default();
        let first = sync_catalog(&mut cat, &api, &opts(false)).await.unwrap();
        assert_eq!(first.products_created, 1);
        assert_eq!(first.prices_created, 2);
        assert_eq!(api.state.lock().unwrap().creates, 3);

        let second = sync_catalog(&mut cat, &api, &opts(false)).await.unwrap();
        assert_eq!(second.products_created, 0);
        assert_eq!(second.products_updated, 1);
        assert_eq!(second.prices_skipped, 2);
        assert_eq!(api.state.lock().unwrap().creates, 3);
    }

    #[tokio::test]
    async fn dry_run_creates_nothing_remote_or_local() {
        let mut cat = catalog();
        let api = FakeBilling::default();
        let preview = sync_catalog(&mut cat, &api, &opts(true)).await.unwrap();
        assert_eq!(preview.products_created, 1);
        assert_eq!(preview.prices_created, 2);
        assert_eq!(api.state.lock().unwrap().creates, 0);
        assert!(cat.outbox.is_empty());
    }

    #[tokio::test]
    async fn crash_after_remote_create_is_adopted_next_run() {
        let mut cat = catalog();
        cat.prices.truncate(1);
        cat.crash_before_confirm = true;
        let api = FakeBilling::default();
        let crashed = sync_catalog(&mut cat, &api, &opts(false)).await.unwrap();
        assert_eq!(crashed.products_skipped, 2);
        assert_eq!(api.state.lock().unwrap().creates, 1);
        assert!(cat.offerings[0].stripe_product_id.is_none());

        cat.crash_before_confirm = false;
        let recovered = sync_catalog(&mut cat, &api, &opts(false)).await.unwrap();
        assert_eq!(recovered.recovered, 1);
        assert_eq!(recovered.products_created, 0);
        assert_eq!(recovered.prices_created, 1);
        assert_eq!(cat.offerings[0].stripe_product_id.as_deref(), Some("prod_1"));
        let state = api.state.lock().unwrap();
        assert_eq!(state.products.len(), 1);
        assert_eq!(state.creates, 2);
    }

    #[tokio::test]
    async fn one_failing_price_does_not_stop_the_rest() {
        let mut cat = catalog();
        let api = FakeBilling::default();
        api.state.lock().unwrap().failing_creates.insert("P1".into());
        let summary = sync_catalog(&mut cat, &api, &opts(false)).await.unwrap();
        assert_eq!(summary.prices_failed, 1);
        assert_eq!(summary.prices_created, 1);
        assert_eq!(cat.pending().await.unwrap().len(), 1);
    }
}
