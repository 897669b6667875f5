//! Seed an org with discipline offerings, service templates and tiered prices.
//!
//! Planning is pure (org structure + existing names + rng in, rows to create out);
//! the write phase replays the plan inside one transaction.
use std::collections::HashSet;

use anyhow::{Context, Result};
use rand::Rng;
use sqlx::{PgConnection, Row};
use tracing::info;

use crate::database_ops::link_targets::{insert_preset, DISCIPLINE_PRESETS, PRESET_FALLBACK};
use crate::database_ops::reconcile::{normalize_name, CanonicalSeed};
use crate::error::UpkeepError;
use crate::util::db::{finish_tx, Db, PgTx};
use crate::util::ids::insert_with_fresh_id;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServiceTemplate {
    pub name: &'static str,
    pub duration: i32,
    /// Dollars.
    pub base_price: f64,
}

const fn t(name: &'static str, duration: i32, base_price: f64) -> ServiceTemplate {
    ServiceTemplate { name, duration, base_price }
}

pub const SERVICE_TEMPLATES: &[(&str, &[ServiceTemplate])] = &[
    (
        "initial_assessment",
        &[
            t("Initial Assessment - General", 60, 150.0),
            t("Initial Assessment - Complex Case", 90, 225.0),
            t("Initial Assessment - Pediatric", 75, 180.0),
            t("Initial Assessment - Geriatric", 75, 180.0),
            t("Initial Assessment - Sports Injury", 60, 165.0),
        ],
    ),
    (
        "follow_up",
        &[
            t("Follow-up Treatment - Standard", 45, 110.0),
            t("Follow-up Treatment - Extended", 60, 140.0),
            t("Follow-up Treatment - Short", 30, 85.0),
            t("Progress Re-assessment", 45, 120.0),
        ],
    ),
    (
        "specialized",
        &[
            t("Manual Therapy Session", 60, 140.0),
            t("Dry Needling", 30, 95.0),
            t("Cupping Therapy", 30, 90.0),
            t("Instrument Assisted Soft Tissue Mobilization", 45, 120.0),
            t("Therapeutic Taping", 30, 75.0),
            t("Joint Mobilization", 45, 125.0),
            t("Myofascial Release", 60, 135.0),
            t("Trigger Point Therapy", 45, 115.0),
        ],
    ),
    (
        "exercise",
        &[
            t("Therapeutic Exercise Session", 45, 100.0),
            t("Strength & Conditioning Program", 60, 130.0),
            t("Balance & Coordination Training", 45, 105.0),
            t("Gait Training", 45, 110.0),
            t("Functional Movement Assessment", 60, 145.0),
        ],
    ),
    (
        "aquatic",
        &[
            t("Aquatic Therapy Session", 45, 125.0),
            t("Pool-based Exercise Class", 60, 95.0),
            t("Aquatic Rehabilitation", 60, 140.0),
        ],
    ),
    (
        "group",
        &[
            t("Group Exercise Class", 60, 45.0),
            t("Group Education Session", 90, 55.0),
            t("Wellness Workshop", 120, 65.0),
            t("Injury Prevention Seminar", 90, 60.0),
        ],
    ),
    (
        "consultation",
        &[
            t("Telehealth Consultation", 30, 80.0),
            t("Home Assessment Visit", 90, 195.0),
            t("Workplace Ergonomic Assessment", 120, 250.0),
            t("Pre-surgical Consultation", 45, 135.0),
            t("Post-surgical Follow-up", 45, 125.0),
        ],
    ),
    (
        "wcb",
        &[
            t("WCB Initial Assessment", 60, 155.0),
            t("WCB Follow-up Treatment", 45, 115.0),
            t("WCB Functional Capacity Evaluation", 180, 450.0),
            t("WCB Work Conditioning Program", 120, 280.0),
        ],
    ),
    (
        "mva",
        &[
            t("MVA Initial Assessment", 60, 155.0),
            t("MVA Follow-up Treatment", 45, 115.0),
            t("MVA Documentation & Reporting", 30, 95.0),
        ],
    ),
];

pub const OWNERSHIP_GROUP_SHARE: f64 = 0.5;
pub const LOCATION_SHARE: f64 = 0.3;
pub const OWNERSHIP_GROUP_MULTIPLIER: f64 = 1.05;
pub const URBAN_MULTIPLIER: f64 = 1.15;
pub const SUBURBAN_MULTIPLIER: f64 = 0.95;

/// `Service_Detail.serviceType` for a template category. WCB and MVA split on
/// whether the template is an initial visit.
pub fn service_type(category: &str, template_name: &str) -> &'static str {
    let initial = template_name.to_ascii_lowercase().contains("initial");
    match category {
        "specialized" | "exercise" | "aquatic" | "follow_up" => "follow_up",
        "initial_assessment" => "initial_assessment",
        "consultation" => "initial_consultation",
        "group" => "group_session",
        "wcb" if initial => "wcb_initial",
        "wcb" => "wcb_follow_up",
        "mva" if initial => "mva_initial",
        "mva" => "mva_follow_up",
        _ => "follow_up",
    }
}

/// Durations offered for a template: the base plus a shorter variant for long
/// sessions and a longer one for short sessions; 45 minutes gets 30/45/60.
pub fn varied_durations(base: i32) -> Vec<i32> {
    let mut out = vec![base];
    if base >= 60 {
        out.push(base - 15);
    }
    if base <= 45 {
        out.push(base + 15);
    }
    if base == 45 {
        out.insert(0, 30);
    }
    out
}

/// Price in cents: scaled by duration and level multiplier, jittered by -5%..+10%,
/// rounded to the nearest $5.
pub fn varied_price_cents<R: Rng + ?Sized>(
    template: &ServiceTemplate,
    duration: i32,
    multiplier: f64,
    rng: &mut R,
) -> i64 {
    let scaled = template.base_price * f64::from(duration) / f64::from(template.duration);
    let jitter = rng.gen_range(0.95..1.10);
    let dollars = (scaled * multiplier * jitter / 5.0).round() * 5.0;
    (dollars * 100.0).round() as i64
}

/// `ceil(len * share)`, the leading slice of groups/locations that get their own tier.
pub fn leading_share(len: usize, share: f64) -> usize {
    ((len as f64) * share).ceil() as usize
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationRef {
    pub id: String,
    pub ownership_group_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrgStructure {
    pub org_id: String,
    pub org_name: String,
    pub ownership_groups: Vec<String>,
    pub locations: Vec<LocationRef>,
}

/// What already exists and must not be created twice.
#[derive(Debug, Clone, Default)]
pub struct ExistingNames {
    /// preset name (normalized) -> objectId
    pub presets: Vec<(String, String)>,
    pub disciplines: HashSet<String>,
    pub services: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceScope {
    Org,
    OwnershipGroup(String),
    Location(LocationRef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricePoint {
    pub scope: PriceScope,
    pub duration: i32,
    pub cents: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedService {
    pub template: ServiceTemplate,
    pub service_type: &'static str,
    pub offerings: Vec<PriceScope>,
    pub prices: Vec<PricePoint>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeedPlan {
    pub presets: Vec<CanonicalSeed>,
    pub disciplines: Vec<&'static str>,
    pub services: Vec<PlannedService>,
    pub skipped_disciplines: usize,
    pub skipped_services: usize,
}

impl SeedPlan {
    pub fn price_count(&self) -> usize {
        self.services.iter().map(|s| s.prices.len()).sum()
    }

    pub fn offering_count(&self) -> usize {
        self.services.iter().map(|s| s.offerings.len()).sum()
    }
}

fn plan_prices<R: Rng + ?Sized>(
    template: &ServiceTemplate,
    scope: &PriceScope,
    multiplier: f64,
    rng: &mut R,
) -> Vec<PricePoint> {
    varied_durations(template.duration)
        .into_iter()
        .map(|duration| PricePoint {
            scope: scope.clone(),
            duration,
            cents: varied_price_cents(template, duration, multiplier, rng),
        })
        .collect()
}

pub fn plan_seed<R: Rng + ?Sized>(
    org: &OrgStructure,
    existing: &ExistingNames,
    rng: &mut R,
) -> SeedPlan {
    let mut plan = SeedPlan::default();
    let known_presets: HashSet<&str> = existing.presets.iter().map(|(n, _)| n.as_str()).collect();
    plan.presets = DISCIPLINE_PRESETS
        .iter()
        .filter(|p| !known_presets.contains(normalize_name(p.name).as_str()))
        .copied()
        .collect();

    for preset in DISCIPLINE_PRESETS.iter().filter(|p| p.name != PRESET_FALLBACK) {
        if existing.disciplines.contains(&normalize_name(preset.name)) {
            plan.skipped_disciplines += 1;
        } else {
            plan.disciplines.push(preset.name);
        }
    }

    let group_count = leading_share(org.ownership_groups.len(), OWNERSHIP_GROUP_SHARE);
    let groups = &org.ownership_groups[..group_count];
    let locations = &org.locations[..leading_share(org.locations.len(), LOCATION_SHARE)];

    for (category, templates) in SERVICE_TEMPLATES {
        for template in templates.iter() {
            if existing.services.contains(&normalize_name(template.name)) {
                plan.skipped_services += 1;
                continue;
            }
            let mut offerings = vec![PriceScope::Org];
            let mut prices = plan_prices(template, &PriceScope::Org, 1.0, rng);
            for og in groups {
                let scope = PriceScope::OwnershipGroup(og.clone());
                prices.extend(plan_prices(template, &scope, OWNERSHIP_GROUP_MULTIPLIER, rng));
                offerings.push(scope);
            }
            for loc in locations {
                let multiplier = if rng.gen_bool(0.5) {
                    URBAN_MULTIPLIER
                } else {
                    SUBURBAN_MULTIPLIER
                };
                let scope = PriceScope::Location(loc.clone());
                prices.extend(plan_prices(template, &scope, multiplier, rng));
                offerings.push(scope);
            }
            plan.services.push(PlannedService {
                template: *template,
                service_type: service_type(category, template.name),
                offerings,
                prices,
            });
        }
    }
    plan
}

async fn load_org(conn: &mut PgConnection, org_id: &str) -> Result<OrgStructure> {
    let row = sqlx::query(r#"SELECT "objectId", COALESCE("orgName", '') AS name FROM "Org" WHERE "objectId" = $1"#)
        .persistent(false)
        .bind(org_id)
        .fetch_optional(&mut *conn)
        .await
        .context("load Org")?
        .ok_or_else(|| UpkeepError::not_found("organization", org_id))?;

    let ownership_groups = sqlx::query_scalar::<_, String>(
        r#"SELECT "objectId" FROM "Ownership_Group" WHERE "orgId" = $1 ORDER BY "createdAt" ASC NULLS LAST, "objectId""#,
    )
    .persistent(false)
    .bind(org_id)
    .fetch_all(&mut *conn)
    .await
    .context("load Ownership_Group")?;

    let locations = sqlx::query(
        r#"SELECT l."objectId", l."ownershipGroupId"
           FROM "Location" l
           INNER JOIN "Ownership_Group" og ON l."ownershipGroupId" = og."objectId"
           WHERE og."orgId" = $1
           ORDER BY l."createdAt" ASC NULLS LAST, l."objectId""#,
    )
    .persistent(false)
    .bind(org_id)
    .fetch_all(&mut *conn)
    .await
    .context("load Location")?
    .iter()
    .map(|r| {
        Ok(LocationRef {
            id: r.try_get("objectId")?,
            ownership_group_id: r.try_get("ownershipGroupId")?,
        })
    })
    .collect::<Result<Vec<_>, sqlx::Error>>()?;

    Ok(OrgStructure {
        org_id: row.try_get("objectId")?,
        org_name: row.try_get("name")?,
        ownership_groups,
        locations,
    })
}

async fn load_existing(conn: &mut PgConnection, org_id: &str) -> Result<ExistingNames> {
    let presets = sqlx::query(r#"SELECT "objectId", COALESCE("name", '') AS name FROM "Discipline_Preset""#)
        .persistent(false)
        .fetch_all(&mut *conn)
        .await
        .context("load Discipline_Preset")?
        .iter()
        .map(|r| Ok((normalize_name(&r.try_get::<String, _>("name")?), r.try_get("objectId")?)))
        .collect::<Result<Vec<_>, sqlx::Error>>()?;

    let disciplines = sqlx::query_scalar::<_, String>(
        r#"SELECT COALESCE("customName", '') FROM "Discipline_Offering" WHERE "orgId" = $1"#,
    )
    .persistent(false)
    .bind(org_id)
    .fetch_all(&mut *conn)
    .await
    .context("load Discipline_Offering")?
    .iter()
    .map(|n| normalize_name(n))
    .collect();

    let services = sqlx::query_scalar::<_, String>(
        r#"SELECT DISTINCT COALESCE(i."itemName", '')
           FROM "Service_Offering" s
           JOIN "Items_Catalog" i ON i."objectId" = s."itemId"
           WHERE s."orgId" = $1"#,
    )
    .persistent(false)
    .bind(org_id)
    .fetch_all(&mut *conn)
    .await
    .context("load existing services")?
    .iter()
    .map(|n| normalize_name(n))
    .collect();

    Ok(ExistingNames {
        presets,
        disciplines,
        services,
    })
}

fn scope_columns<'a>(scope: &'a PriceScope) -> (Option<&'a str>, Option<&'a str>) {
    match scope {
        PriceScope::Org => (None, None),
        PriceScope::OwnershipGroup(og) => (Some(og.as_str()), None),
        PriceScope::Location(loc) => (loc.ownership_group_id.as_deref(), Some(loc.id.as_str())),
    }
}

async fn insert_discipline(
    conn: &mut PgConnection,
    preset_id: &str,
    name: &str,
    org_id: &str,
) -> Result<String> {
    insert_with_fresh_id("Discipline_Offering", conn, |conn, id| {
        let (preset_id, name, org_id) = (preset_id.to_owned(), name.to_owned(), org_id.to_owned());
        Box::pin(async move {
            let res = sqlx::query(
                r#"INSERT INTO "Discipline_Offering"
                   ("objectId", "createdAt", "updatedAt", "_rperm", "_wperm", "presetId", "customName", "orgId")
                   VALUES ($1, NOW(), NOW(), ARRAY['*'], ARRAY[]::text[], $2, $3, $4)
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(&preset_id)
            .bind(&name)
            .bind(&org_id)
            .execute(conn)
            .await
            .with_context(|| format!("insert Discipline_Offering {name}"))?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await
}

/// Items_Catalog and Service_Detail point at each other; the item goes in first and
/// gets its detail id once the detail exists.
async fn insert_service(conn: &mut PgConnection, service: &PlannedService) -> Result<String> {
    let name = service.template.name;
    let item_id = insert_with_fresh_id("Items_Catalog", &mut *conn, |conn, id| {
        Box::pin(async move {
            let res = sqlx::query(
                r#"INSERT INTO "Items_Catalog"
                   ("objectId", "createdAt", "updatedAt", "_rperm", "_wperm", "type", "itemName")
                   VALUES ($1, NOW(), NOW(), ARRAY['*'], ARRAY[]::text[], 'service', $2)
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(name)
            .execute(conn)
            .await
            .with_context(|| format!("insert Items_Catalog {name}"))?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await?;

    let (service_type, duration) = (service.service_type, service.template.duration);
    let detail_id = insert_with_fresh_id("Service_Detail", &mut *conn, |conn, id| {
        let item_id = item_id.clone();
        Box::pin(async move {
            let res = sqlx::query(
                r#"INSERT INTO "Service_Detail"
                   ("objectId", "createdAt", "updatedAt", "_rperm", "_wperm",
                    "serviceType", "schedulingDurationMinutes", "itemId")
                   VALUES ($1, NOW(), NOW(), ARRAY['*'], ARRAY[]::text[], $2, $3, $4)
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(service_type)
            .bind(duration)
            .bind(&item_id)
            .execute(conn)
            .await
            .context("insert Service_Detail")?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await?;

    sqlx::query(r#"UPDATE "Items_Catalog" SET "serviceDetailId" = $1 WHERE "objectId" = $2"#)
        .persistent(false)
        .bind(&detail_id)
        .bind(&item_id)
        .execute(&mut *conn)
        .await
        .context("link Items_Catalog to Service_Detail")?;
    Ok(item_id)
}

async fn insert_offering(
    conn: &mut PgConnection,
    item_id: &str,
    org_id: &str,
    scope: &PriceScope,
) -> Result<String> {
    let (og, loc) = scope_columns(scope);
    insert_with_fresh_id("Service_Offering", conn, |conn, id| {
        let (item_id, org_id) = (item_id.to_owned(), org_id.to_owned());
        let (og, loc) = (og.map(str::to_owned), loc.map(str::to_owned));
        Box::pin(async move {
            let res = sqlx::query(
                r#"INSERT INTO "Service_Offering"
                   ("objectId", "createdAt", "updatedAt", "itemId", "orgId", "ownershipGroupId", "locationId")
                   VALUES ($1, NOW(), NOW(), $2, $3, $4, $5)
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(&item_id)
            .bind(&org_id)
            .bind(og)
            .bind(loc)
            .execute(conn)
            .await
            .context("insert Service_Offering")?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await
}

async fn insert_price(
    conn: &mut PgConnection,
    item_id: &str,
    org_id: &str,
    price: &PricePoint,
) -> Result<String> {
    let (og, loc) = scope_columns(&price.scope);
    let (cents, duration) = (price.cents, price.duration);
    insert_with_fresh_id("Item_Price", conn, |conn, id| {
        let (item_id, org_id) = (item_id.to_owned(), org_id.to_owned());
        let (og, loc) = (og.map(str::to_owned), loc.map(str::to_owned));
        Box::pin(async move {
            let res = sqlx::query(
                r#"INSERT INTO "Item_Price"
                   ("objectId", "createdAt", "updatedAt", "itemId", "price", "durationMinutes",
                    "orgId", "ownershipGroupId", "locationId")
                   VALUES ($1, NOW(), NOW(), $2, $3, $4, $5, $6, $7)
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(&item_id)
            .bind(cents as f64)
            .bind(duration)
            .bind(&org_id)
            .bind(og)
            .bind(loc)
            .execute(conn)
            .await
            .context("insert Item_Price")?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await
}

async fn apply_plan(
    conn: &mut PgConnection,
    org: &OrgStructure,
    existing: &ExistingNames,
    plan: &SeedPlan) -> Result<()> {
    let mut preset_ids: Vec<(String, String)> = existing.presets.clone();
    for preset in &plan.presets {
        let id = insert_preset(&mut *conn, preset).await?;
        info!(name = preset.name, object_id = %id, "created Discipline_Preset");
        preset_ids.push((normalize_name(preset.name), id));
    }

    for name in &plan.disciplines {
        let key = normalize_name(name);
        let preset_id = preset_ids
            .iter()
            .find(|(n, _)| *n == key)
            .map(|(_, id)| id.clone())
            .ok_or_else(|| UpkeepError::not_found("discipline preset", *name))?;
        let id = insert_discipline(&mut *conn, &preset_id, name, &org.org_id).await?;
        info!(name, object_id = %id, preset_id = %preset_id, "created Discipline_Offering");
    }

    for service in &plan.services {
        let item_id = insert_service(&mut *conn, service).await?;
        for scope in &service.offerings {
            insert_offering(&mut *conn, &item_id, &org.org_id, scope).await?;
        }
        for price in &service.prices {
            insert_price(&mut *conn, &item_id, &org.org_id, price).await?;
        }
        info!(
            name = service.template.name,
            item_id = %item_id,
            offerings = service.offerings.len(),
            prices = service.prices.len(),
            "created service"
        );
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SeedOutcome {
    pub org: OrgStructure,
    pub plan: SeedPlan,
}

fn print_plan(org: &OrgStructure, plan: &SeedPlan) {
    println!(
        "Organization: {} ({}), {} ownership groups, {} locations",
        org.org_name,
        org.org_id,
        org.ownership_groups.len(),
        org.locations.len()
    );
    for p in &plan.presets {
        println!("  preset      + {}", p.name);
    }
    for d in &plan.disciplines {
        println!("  discipline  + {d}");
    }
    for s in &plan.services {
        println!(
            "  service     + {} ({}min, ${:.0}) {} offerings, {} prices",
            s.template.name,
            s.template.duration,
            s.template.base_price,
            s.offerings.len(),
            s.prices.len()
        );
    }
}

pub async fn seed_catalog(db: &Db, org_id: &str, dry_run: bool) -> Result<SeedOutcome> {
    let mut tx = db.begin().await?;
    let outcome = seed_in_tx(&mut tx, org_id, dry_run).await;
    if dry_run {
        tx.rollback().await.context("ROLLBACK failed")?;
        return outcome;
    }
    finish_tx(tx, outcome).await
}

async fn seed_in_tx(tx: &mut PgTx, org_id: &str, dry_run: bool) -> Result<SeedOutcome> {
    let org = load_org(&mut **tx, org_id).await?;
    let existing = load_existing(&mut **tx, org_id).await?;
    info!(
        org = %org.org_name,
        ownership_groups = org.ownership_groups.len(),
        locations = org.locations.len(),
        "org structure loaded"
    );
    let plan = plan_seed(&org, &existing, &mut rand::thread_rng());
    print_plan(&org, &plan);
    if !dry_run {
        apply_plan(&mut **tx, &org, &existing, &plan).await?;
    }
    Ok(SeedOutcome { org, plan })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn org(groups: usize, locations: usize) -> OrgStructure {
        OrgStructure {
            org_id: "ORG1".into(),
            org_name: "Clinic".into(),
            ownership_groups: (0..groups).map(|i| format!("OG{i}")).collect(),
            locations: (0..locations)
                .map(|i| LocationRef {
                    id: format!("L{i}"),
                    ownership_group_id: Some(format!("OG{}", i % groups.max(1))),
                })
                .collect(),
        }
    }

    #[test]
    fn duration_variants() {
        assert_eq!(varied_durations(45), vec![30, 45, 60]);
        assert_eq!(varied_durations(30), vec![30, 45]);
        assert_eq!(varied_durations(60), vec![60, 45]);
        assert_eq!(varied_durations(120), vec![120, 105]);
    }

    #[test]
    fn prices_are_whole_five_dollar_steps_within_jitter() {
        let mut rng = StdRng::seed_from_u64(11);
        let tmpl = t("Gait Training", 45, 110.0);
        for _ in 0..500 {
            let cents = varied_price_cents(&tmpl, 45, 1.0, &mut rng);
            assert_eq!(cents % 500, 0);
            assert!((10_000..=12_500).contains(&cents), "{cents}");
        }
        let short = varied_price_cents(&tmpl, 30, 1.0, &mut rng);
        assert!(short <= 8_500);
    }

    #[test]
    fn wcb_and_mva_split_on_initial_visits() {
        assert_eq!(service_type("wcb", "WCB Initial Assessment"), "wcb_initial");
        assert_eq!(service_type("wcb", "WCB Follow-up Treatment"), "wcb_follow_up");
        assert_eq!(service_type("mva", "MVA Documentation & Reporting"), "mva_follow_up");
        assert_eq!(service_type("aquatic", "Aquatic Rehabilitation"), "follow_up");
        assert_eq!(service_type("group", "Wellness Workshop"), "group_session");
        assert_eq!(service_type("consultation", "Telehealth Consultation"), "initial_consultation");
    }

    #[test]
    fn tiers_cover_leading_half_of_groups_and_thirty_percent_of_locations() {
        assert_eq!(leading_share(3, OWNERSHIP_GROUP_SHARE), 2);
        assert_eq!(leading_share(0, OWNERSHIP_GROUP_SHARE), 0);
        assert_eq!(leading_share(4, LOCATION_SHARE), 2);

        let mut rng = StdRng::seed_from_u64(3);
        let plan = plan_seed(&org(3, 4), &ExistingNames::default(), &mut rng);
        let gait = plan
            .services
            .iter()
            .find(|s| s.template.name == "Gait Training")
            .unwrap();
        // org + 2 groups + 2 locations, each with 30/45/60
        assert_eq!(gait.offerings.len(), 5);
        assert_eq!(gait.prices.len(), 15);
        assert_eq!(gait.offerings[1], PriceScope::OwnershipGroup("OG0".into()));
        assert!(matches!(&gait.offerings[3], PriceScope::Location(l) if l.id == "L0"));
    }

    #[test]
    fn fresh_org_gets_every_template_and_discipline() {
        let mut rng = StdRng::seed_from_u64(5);
        let plan = plan_seed(&org(0, 0), &ExistingNames::default(), &mut rng);
        let templates: usize = SERVICE_TEMPLATES.iter().map(|(_, t)| t.len()).sum();
        assert_eq!(plan.services.len(), templates);
        assert_eq!(plan.disciplines.len(), DISCIPLINE_PRESETS.len() - 1);
        assert!(!plan.disciplines.contains(&PRESET_FALLBACK));
        assert_eq!(plan.presets.len(), DISCIPLINE_PRESETS.len());
        assert_eq!(plan.offering_count(), templates);
    }

    #[test]
    fn existing_names_are_skipped() {
        let existing = ExistingNames {
            presets: vec![("physical therapy".into(), "P1".into())],
            disciplines: ["physical therapy".to_string()].into_iter().collect(),
            services: ["gait training".to_string(), "dry needling".to_string()].into_iter().collect(),
        };
        let mut rng = StdRng::seed_from_u64(9);
        let plan = plan_seed(&org(1, 1), &existing, &mut rng);
        assert!(plan.presets.iter().all(|p| p.name != "Physical Therapy"));
        assert!(!plan.disciplines.contains(&"Physical Therapy"));
        assert_eq!(plan.skipped_disciplines, 1);
        assert_eq!(plan.skipped_services, 2);
        assert!(plan.services.iter().all(|s| s.template.name != "Gait Training"));
    }
}
