//! Link reconciliation: bring every record of a target relation to a non-null link
//! into a canonical relation, falling back to a designated canonical row when a name
//! has no exact match.
//!
//! One pass is: seed missing canonical rows, discover unlinked targets, plan links,
//! write them, re-count, and commit only when nothing is left. The store decides
//! what "canonical" and "unlinked" mean; see `link_targets` for the Postgres call
//! sites.
use std::collections::HashMap;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::error::UpkeepError;
use crate::report::Verification;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    pub id: String,
    pub name: String,
}

/// A target record whose link field is currently null.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCandidate {
    pub id: String,
    pub name: Option<String>,
}

/// Canonical row that must exist before any target is linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalSeed {
    pub name: &'static str,
    pub icon: &'static str,
}

#[derive(Debug, Clone)]
pub struct LinkSpec {
    /// Plural noun used in log lines and the verification message.
    pub subject: &'static str,
    pub fallback_name: String,
    pub normalize: fn(&str) -> String,
}

impl LinkSpec {
    pub fn new(subject: &'static str, fallback_name: impl Into<String>) -> Self {
        Self {
            subject,
            fallback_name: fallback_name.into(),
            normalize: normalize_name,
        }
    }
}

pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Normalized name → canonical row. The first row seen for a name wins.
#[derive(Debug, Default)]
pub struct CanonicalIndex {
    by_name: HashMap<String, Canonical>,
}

impl CanonicalIndex {
    pub fn build(rows: impl IntoIterator<Item = Canonical>, normalize: fn(&str) -> String) -> Self {
        let mut index = Self::default();
        for row in rows {
            index.insert(row, normalize);
        }
        index
    }

    /// Returns false when a row with the same normalized name was already present.
    pub fn insert(&mut self, row: Canonical, normalize: fn(&str) -> String) -> bool {
        let key = normalize(&row.name);
        if let Some(kept) = self.by_name.get(&key) {
            warn!(
                name = %row.name,
                kept = %kept.id,
                ignored = %row.id,
                "duplicate canonical name; keeping the first row"
            );
            return false;
        }
        self.by_name.insert(key, row);
        true
    }

    pub fn get(&self, normalized: &str) -> Option<&Canonical> {
        self.by_name.get(normalized)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLink {
    pub target: LinkCandidate,
    pub canonical_id: String,
    pub kind: MatchKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkPlan {
    pub links: Vec<PlannedLink>,
}

impl LinkPlan {
    pub fn exact(&self) -> usize {
        self.links.iter().filter(|l| l.kind == MatchKind::Exact).count()
    }

    pub fn fallbacks(&self) -> impl Iterator<Item = &PlannedLink> {
        self.links.iter().filter(|l| l.kind == MatchKind::Fallback)
    }
}

/// Pure matching step. A candidate without a name always takes the fallback.
pub fn plan_links(
    index: &CanonicalIndex,
    spec: &LinkSpec,
    targets: &[LinkCandidate],
) -> Result<LinkPlan> {
    let fallback = index
        .get(&(spec.normalize)(&spec.fallback_name))
        .ok_or_else(|| {
            UpkeepError::not_found("fallback canonical row", spec.fallback_name.clone())
        })?;

    let links = targets
        .iter()
        .map(|t| {
            let key = (spec.normalize)(t.name.as_deref().unwrap_or_default());
            match index.get(&key) {
                Some(c) => PlannedLink {
                    target: t.clone(),
                    canonical_id: c.id.clone(),
                    kind: MatchKind::Exact,
                },
                None => PlannedLink {
                    target: t.clone(),
                    canonical_id: fallback.id.clone(),
                    kind: MatchKind::Fallback,
                },
            }
        })
        .collect();
    Ok(LinkPlan { links })
}

/// Transactional view over one target/canonical pair.
///
/// Writes are only visible to other sessions after `commit`; `rollback` discards
/// everything written since the store was opened.
#[async_trait::async_trait]
pub trait LinkStore: Send {
    async fn canonical(&mut self) -> Result<Vec<Canonical>>;
    async fn unlinked(&mut self) -> Result<Vec<LinkCandidate>>;
    async fn insert_canonical(&mut self, seed: &CanonicalSeed) -> Result<String>;
    async fn set_link(&mut self, target_id: &str, canonical_id: &str) -> Result<()>;
    async fn count_unlinked(&mut self) -> Result<i64>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub canonical_created: usize,
    pub exact: usize,
    pub fallback: Vec<LinkCandidate>,
    pub remaining: i64,
}

impl PassReport {
    /// Targets written, or that would be written in dry-run.
    pub fn linked(&self) -> usize {
        self.exact + self.fallback.len()
    }
}

/// One reconciliation pass. Live runs commit only after the re-count reaches zero;
/// any error (including a non-zero re-count) rolls the whole pass back.
pub async fn run_pass<S>(
    store: &mut S,
    spec: &LinkSpec,
    seeds: &[CanonicalSeed],
    dry_run: bool,
) -> Result<PassReport>
where
    S: LinkStore + ?Sized,
{
    let outcome = apply_pass(store, spec, seeds, dry_run).await;
    match outcome {
        Ok(report) => {
            if dry_run {
                store.rollback().await?;
            } else {
                store.commit().await?;
                info!(subject = spec.subject, linked = report.linked(), "pass committed");
            }
            Ok(report)
        }
        Err(e) => {
            if let Err(rb) = store.rollback().await {
                error!(error = %rb, "rollback failed");
            }
            Err(e)
        }
    }
}

async fn apply_pass<S>(
    store: &mut S,
    spec: &LinkSpec,
    seeds: &[CanonicalSeed],
    dry_run: bool,
) -> Result<PassReport>
where
    S: LinkStore + ?Sized,
{
    let mut report = PassReport::default();

    let existing = store.canonical().await?;
    info!(subject = spec.subject, canonical = existing.len(), "loaded canonical rows");
    let mut index = CanonicalIndex::build(existing, spec.normalize);

    for seed in seeds {
        if index.get(&(spec.normalize)(seed.name)).is_some() {
            continue;
        }
        let id = if dry_run {
            format!("<new {}>", seed.name)
        } else {
            store.insert_canonical(seed).await?
        };
        info!(name = seed.name, id = %id, dry_run, "created canonical row");
        index.insert(
            Canonical {
                id,
                name: seed.name.to_string(),
            },
            spec.normalize,
        );
        report.canonical_created += 1;
    }

    let targets = store.unlinked().await?;
    info!(subject = spec.subject, unlinked = targets.len(), "discovered unlinked records");

    let plan = plan_links(&index, spec, &targets)?;
    for link in &plan.links {
        let name = link.target.name.as_deref().unwrap_or("");
        match link.kind {
            MatchKind::Exact => info!(
                target = %link.target.id,
                name,
                canonical = %link.canonical_id,
                "linking"
            ),
            MatchKind::Fallback => warn!(
                target = %link.target.id,
                name,
                fallback = %spec.fallback_name,
                "no exact match; using fallback"
            ),
        }
        if !dry_run {
            store.set_link(&link.target.id, &link.canonical_id).await?;
        }
    }
    report.exact = plan.exact();
    report.fallback = plan.fallbacks().map(|l| l.target.clone()).collect();

    report.remaining = store.count_unlinked().await?;
    Verification::new(report.remaining, dry_run).check(spec.subject)?;
    Ok(report)
}
