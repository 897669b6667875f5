//! Postgres call sites for the link reconciliation pass.
use anyhow::{anyhow, bail, Context, Result};
use sqlx::{PgConnection, Row};

use crate::database_ops::reconcile::{Canonical, CanonicalSeed, LinkCandidate, LinkStore};
use crate::util::db::{Db, PgTx};
use crate::util::ids::insert_with_fresh_id;

pub const DISCIPLINE_PRESETS: [CanonicalSeed; 11] = [
    CanonicalSeed {
        name: "Physical Therapy",
        icon: "AccessibilityNew",
    },
    CanonicalSeed {
        name: "Occupational Therapy",
        icon: "Work",
    },
    CanonicalSeed {
        name: "Sports Medicine",
        icon: "FitnessCenter",
    },
    CanonicalSeed {
        name: "Orthopedics",
        icon: "Healing",
    },
    CanonicalSeed {
        name: "Neurology",
        icon: "Psychology",
    },
    CanonicalSeed {
        name: "Pediatric Therapy",
        icon: "ChildCare",
    },
    CanonicalSeed {
        name: "Geriatric Care",
        icon: "Elderly",
    },
    CanonicalSeed {
        name: "Aquatic Therapy",
        icon: "Pool",
    },
    CanonicalSeed {
        name: "Manual Therapy",
        icon: "PanTool",
    },
    CanonicalSeed {
        name: "Wellness & Prevention",
        icon: "Favorite",
    },
    CanonicalSeed {
        name: "Other",
        icon: "MoreHoriz",
    },
];

pub const PRESET_FALLBACK: &str = "Other";
pub const SERVICE_DISCIPLINE_FALLBACK: &str = "Physical Therapy";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    /// `Discipline_Offering.presetId` → `Discipline_Preset`, optionally one org.
    DisciplinePresets { org: Option<String> },
    /// `Service_Offering.disciplineOfferingId` → the org's `Discipline_Offering`,
    /// matched on the catalog item's name.
    ServiceDisciplines { org: String, since_hours: Option<i32> },
}

impl LinkTarget {
    pub fn subject(&self) -> &'static str {
        match self {
            LinkTarget::DisciplinePresets { .. } => "Discipline_Offering records without presetId",
            LinkTarget::ServiceDisciplines { .. } => {
                "Service_Offering records without disciplineOfferingId"
            }
        }
    }

    fn canonical_sql(&self) -> &'static str {
        match self {
            LinkTarget::DisciplinePresets { .. } => {
                r#"SELECT "objectId", COALESCE("name", '') AS name
                   FROM "Discipline_Preset"
                   ORDER BY "createdAt" ASC NULLS LAST, "objectId" ASC"#
            }
            LinkTarget::ServiceDisciplines { .. } => {
                r#"SELECT "objectId", COALESCE("customName", '') AS name
                   FROM "Discipline_Offering"
                   WHERE "orgId" = $1
                   ORDER BY "createdAt" ASC NULLS LAST, "objectId" ASC"#
            }
        }
    }

    fn unlinked_sql(&self, count_only: bool) -> String {
        let (select, body) = match self {
            LinkTarget::DisciplinePresets { .. } => (
                r#"d."objectId", d."customName" AS name"#,
                r#"FROM "Discipline_Offering" d
                   WHERE d."presetId" IS NULL
                     AND ($1::text IS NULL OR d."orgId" = $1)"#,
            ),
            LinkTarget::ServiceDisciplines { .. } => (
                r#"s."objectId", i."itemName" AS name"#,
                r#"FROM "Service_Offering" s
                   LEFT JOIN "Items_Catalog" i ON i."objectId" = s."itemId"
                   WHERE s."orgId" = $1
                     AND s."disciplineOfferingId" IS NULL
                     AND ($2::int IS NULL OR s."createdAt" > NOW() - make_interval(hours => $2::int))"#,
            ),
        };
        if count_only {
            format!("SELECT COUNT(*) {body}")
        } else {
            format!(r#"SELECT {select} {body} ORDER BY 1"#)
        }
    }

    fn update_sql(&self) -> &'static str {
        match self {
            LinkTarget::DisciplinePresets { .. } => {
                r#"UPDATE "Discipline_Offering"
                   SET "presetId" = $1, "updatedAt" = NOW()
                   WHERE "objectId" = $2 AND "presetId" IS NULL"#
            }
            LinkTarget::ServiceDisciplines { .. } => {
                r#"UPDATE "Service_Offering"
                   SET "disciplineOfferingId" = $1, "updatedAt" = NOW()
                   WHERE "objectId" = $2 AND "disciplineOfferingId" IS NULL"#
            }
        }
    }

    fn org(&self) -> Option<&str> {
        match self {
            LinkTarget::DisciplinePresets { org } => org.as_deref(),
            LinkTarget::ServiceDisciplines { org, .. } => Some(org),
        }
    }

    fn since_hours(&self) -> Option<i32> {
        match self {
            LinkTarget::ServiceDisciplines { since_hours, .. } => *since_hours,
            LinkTarget::DisciplinePresets { .. } => None,
        }
    }
}

/// Insert one world-readable `Discipline_Preset`, returning its objectId.
pub async fn insert_preset(conn: &mut PgConnection, seed: &CanonicalSeed) -> Result<String> {
    let (name, icon) = (seed.name, seed.icon);
    insert_with_fresh_id("Discipline_Preset", conn, |conn, id| {
        Box::pin(async move {
            let res = sqlx::query(
                r#"INSERT INTO "Discipline_Preset"
                   ("objectId", "createdAt", "updatedAt", "_rperm", "_wperm",
                    "name", "icon", "isPreset", "disciplineName")
                   VALUES ($1, NOW(), NOW(), ARRAY['*'], ARRAY[]::text[], $2, $3, true, $2)
                   ON CONFLICT ("objectId") DO NOTHING"#,
            )
            .persistent(false)
            .bind(id)
            .bind(name)
            .bind(icon)
            .execute(conn)
            .await
            .with_context(|| format!("insert Discipline_Preset {name}"))?;
            Ok(res.rows_affected() == 1)
        })
    })
    .await
}

/// `LinkStore` backed by one open transaction.
pub struct PgLinkStore {
    tx: Option<PgTx>,
    target: LinkTarget,
}

impl PgLinkStore {
    pub async fn open(db: &Db, target: LinkTarget) -> Result<Self> {
        let tx = db.begin().await?;
        Ok(Self { tx: Some(tx), target })
    }

    fn tx(&mut self) -> Result<&mut PgTx> {
        self.tx.as_mut().ok_or_else(|| anyhow!("transaction already closed"))
    }
}

#[async_trait::async_trait]
impl LinkStore for PgLinkStore {
    async fn canonical(&mut self) -> Result<Vec<Canonical>> {
        let sql = self.target.canonical_sql();
        let org = self.target.org().map(str::to_string);
        let is_service = matches!(self.target, LinkTarget::ServiceDisciplines { .. });
        let tx = self.tx()?;
        let mut q = sqlx::query(sql).persistent(false);
        if is_service {
            q = q.bind(org);
        }
        let rows = q.fetch_all(&mut **tx).await.context("load canonical rows")?;
        rows.iter()
            .map(|r| {
                Ok(Canonical {
                    id: r.try_get("objectId")?,
                    name: r.try_get("name")?,
                })
            })
            .collect()
    }

    async fn unlinked(&mut self) -> Result<Vec<LinkCandidate>> {
        let sql = self.target.unlinked_sql(false);
        let org = self.target.org().map(str::to_string);
        let since = self.target.since_hours();
        let is_service = matches!(self.target, LinkTarget::ServiceDisciplines { .. });
        let tx = self.tx()?;
        let mut q = sqlx::query(&sql).persistent(false).bind(org);
        if is_service {
            q = q.bind(since);
        }
        let rows = q.fetch_all(&mut **tx).await.context("discover unlinked records")?;
        rows.iter()
            .map(|r| {
                Ok(LinkCandidate {
                    id: r.try_get("objectId")?,
                    name: r.try_get("name")?,
                })
            })
            .collect()
    }

    async fn insert_canonical(&mut self, seed: &CanonicalSeed) -> Result<String> {
        if !matches!(self.target, LinkTarget::DisciplinePresets { .. }) {
            bail!("{} has no canonical seeds", self.target.subject());
        }
        let tx = self.tx()?;
        insert_preset(&mut **tx, seed).await
    }

    async fn set_link(&mut self, target_id: &str, canonical_id: &str) -> Result<()> {
        let sql = self.target.update_sql();
        let tx = self.tx()?;
        sqlx::query(sql)
            .persistent(false)
            .bind(canonical_id)
            .bind(target_id)
            .execute(&mut **tx)
            .await
            .with_context(|| format!("link {target_id} -> {canonical_id}"))?;
        Ok(())
    }

    async fn count_unlinked(&mut self) -> Result<i64> {
        let sql = self.target.unlinked_sql(true);
        let org = self.target.org().map(str::to_string);
        let since = self.target.since_hours();
        let is_service = matches!(self.target, LinkTarget::ServiceDisciplines { .. });
        let tx = self.tx()?;
        let mut q = sqlx::query_scalar::<_, i64>(&sql).persistent(false).bind(org);
        if is_service {
            q = q.bind(since);
        }
        Ok(q.fetch_one(&mut **tx).await.context("verification count")?)
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await.context("COMMIT failed")?;
            tracing::info!("transaction committed");
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await.context("ROLLBACK failed")?;
            tracing::info!("transaction rolled back");
        }
        Ok(())
    }
}
