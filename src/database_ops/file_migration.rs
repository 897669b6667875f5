//! Copy Parse `_File` objects into Supabase Storage and repoint `patient_files`.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::clients::parse::{ObjectStore, ParseQuery};
use crate::clients::supabase::FileStorage;

pub const FILES_BUCKET: &str = "patient-files";
pub const PAGE_SIZE: u32 = 100;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFile {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub mime_type: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl ParseFile {
    pub fn from_parse(v: &Value) -> Option<Self> {
        let text = |k: &str| v.get(k).and_then(Value::as_str).map(str::to_string);
        Some(Self {
            id: text("objectId")?,
            name: text("name").filter(|n| !n.is_empty()).unwrap_or_else(|| "file".into()),
            url: text("url"),
            mime_type: text("mimeType"),
            created_at: text("createdAt")
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|d| d.with_timezone(&Utc)),
        })
    }
}

/// `<millis>-<8 hex>`, unique enough that two uploads of the same name never collide.
pub fn unique_suffix<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> String {
    format!("{}-{:08x}", now.timestamp_millis(), rng.gen::<u32>())
}

/// `migrated/[orgs/<org>/][patients/<patient>/]<YYYY-MM-DD>/<suffix>-<name>`, dated by
/// the file's creation time.
pub fn storage_path(
    file: &ParseFile,
    org_id: Option<&str>,
    patient_id: Option<&str>,
    now: DateTime<Utc>,
    suffix: &str,
) -> String {
    let mut parts = vec!["migrated".to_string()];
    if let Some(org) = org_id {
        parts.extend(["orgs".to_string(), org.to_string()]);
    }
    if let Some(patient) = patient_id {
        parts.extend(["patients".to_string(), patient.to_string()]);
    }
    parts.push(file.created_at.unwrap_or(now).format("%Y-%m-%d").to_string());
    parts.push(format!("{suffix}-{}", file.name));
    parts.join("/")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub processed: usize,
    pub migrated: usize,
    /// Uploaded, but no `patient_files` row could be repointed.
    pub unlinked: Vec<String>,
    pub failures: Vec<(String, String)>,
}

async fn migrate_one<F>(storage: &F, file: &ParseFile) -> Result<(String, bool)>
where
    F: FileStorage + ?Sized,
{
    let url = file.url.as_deref().context("file has no url")?;
    let body = storage.download(url).await?;
    let now = Utc::now();
    let suffix = unique_suffix(now, &mut rand::thread_rng());
    // Unscoped: the Parse file carries no org or patient.
    let path = storage_path(file, None, None, now, &suffix);
    let content_type = file.mime_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
    storage.upload(FILES_BUCKET, &path, body, content_type).await?;

    let linked = match storage.link_patient_file(&file.id, FILES_BUCKET, &path).await {
        Ok(true) => true,
        Ok(false) => {
            warn!(file = %file.id, "no patient_files record for this file");
            false
        }
        Err(e) => {
            warn!(file = %file.id, error = %e, "could not update patient_files record");
            false
        }
    };
    Ok((path, linked))
}

/// Walks `_File` oldest first, `limit` files at most. One failed file never stops
/// the run; it is collected in the report.
pub async fn migrate_files<S, F>(
    parse: &S,
    storage: &F,
    limit: Option<u32>,
    dry_run: bool,
) -> Result<MigrationReport>
where
    S: ObjectStore + ?Sized,
    F: FileStorage + ?Sized,
{
    let page_size = limit.unwrap_or(PAGE_SIZE).max(1);
    let cap = limit.map(|l| l as usize);
    let mut report = MigrationReport::default();
    let mut skip = 0u32;

    'pages: loop {
        let query = ParseQuery::new(json!({}))
            .limit(page_size)
            .skip(skip)
            .order("createdAt");
        let page = parse.find("_File", &query).await?;
        if page.is_empty() {
            break;
        }
        info!(from = skip + 1, to = skip as usize + page.len(), "processing batch");

        for raw in &page {
            if cap.is_some_and(|c| report.processed >= c) {
                break 'pages;
            }
            let Some(file) = ParseFile::from_parse(raw) else {
                warn!("skipping _File row without objectId");
                continue;
            };
            report.processed += 1;
            println!("  {}. {} ({})", report.processed, file.name, file.id);

            if dry_run {
                println!("     [DRY RUN] would migrate to migrated/{}/{}", file.id, file.name);
                report.migrated += 1;
                continue;
            }
            match migrate_one(storage, &file).await {
                Ok((path, linked)) => {
                    println!("     -> {FILES_BUCKET}/{path}");
                    if !linked {
                        report.unlinked.push(file.id.clone());
                    }
                    report.migrated += 1;
                }
                Err(e) => {
                    error!(file = %file.id, error = %e, "migration failed");
                    report.failures.push((file.id.clone(), format!("{e:#}")));
                }
            }
        }

        if cap.is_some_and(|c| report.processed >= c) || page.len() < page_size as usize {
            break;
        }
        skip += page_size;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fakes::{FakeObjects, FakeStorage};
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn parse_file(id: &str, created: &str) -> Value {
        json!({
            "objectId": id,
            "name": format!("{id}.pdf"),
            "url": format!("https://files.test/{id}.pdf"),
            "mimeType": "application/pdf",
            "createdAt": created,
        })
    }

    fn store_with(n: usize) -> FakeObjects {
        let store = FakeObjects::default();
        for i in 0..n {
            let created = format!("2024-03-{:02}T10:00:00.000Z", i % 28 + 1);
            store.insert("_File", parse_file(&format!("f{i:03}"), &created));
        }
        store
    }

    #[test]
    fn path_is_scoped_and_dated_by_creation() {
        let file = ParseFile::from_parse(&parse_file("f1", "2023-11-05T08:30:00.000Z")).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        assert_eq!(
            storage_path(&file, None, None, now, "1-abc"),
            "migrated/2023-11-05/1-abc-f1.pdf"
        );
        assert_eq!(
            storage_path(&file, Some("O1"), Some("P1"), now, "1-abc"),
            "migrated/orgs/O1/patients/P1/2023-11-05/1-abc-f1.pdf"
        );

        let undated = ParseFile::from_parse(&json!({ "objectId": "f2" })).unwrap();
        assert_eq!(undated.name, "file");
        assert_eq!(storage_path(&undated, None, None, now, "s"), "migrated/2025-01-02/s-file");
    }

    #[test]
    fn suffix_is_millis_and_eight_hex_digits() {
        let now = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let suffix = unique_suffix(now, &mut StdRng::seed_from_u64(7));
        let (millis, hex) = suffix.split_once('-').unwrap();
        assert_eq!(millis, now.timestamp_millis().to_string());
        assert_eq!(hex.len(), 8);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn uploads_every_file_and_links_known_records() {
        let parse = store_with(3);
        let mut storage = FakeStorage::default();
        storage.failing_urls.insert("https://files.test/f001.pdf".into());
        storage.patient_files.lock().unwrap().insert("f000".into(), None);

        let report = migrate_files(&parse, &storage, None, false).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.migrated, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "f001");
        assert_eq!(report.unlinked, ["f002"]);

        let uploads = storage.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 2);
        assert!(uploads.iter().all(|(b, _, _, ct)| b == FILES_BUCKET && ct == "application/pdf"));
        let linked = storage.patient_files.lock().unwrap()["f000"].clone().unwrap();
        assert!(linked.starts_with("patient-files/migrated/2024-03-01/"));
    }

    #[tokio::test]
    async fn pages_through_everything_without_a_limit() {
        let parse = store_with(PAGE_SIZE as usize + 5);
        let storage = FakeStorage::default();
        let report = migrate_files(&parse, &storage, None, false).await.unwrap();
        assert_eq!(report.processed, PAGE_SIZE as usize + 5);
        assert_eq!(storage.uploads.lock().unwrap().len(), PAGE_SIZE as usize + 5);
    }

    #[tokio::test]
    async fn limit_caps_processed_files_and_dry_run_uploads_nothing() {
        let parse = store_with(10);
        let storage = FakeStorage::default();
        let report = migrate_files(&parse, &storage, Some(4), true).await.unwrap();
        assert_eq!(report.processed, 4);
        assert_eq!(report.migrated, 4);
        assert!(storage.uploads.lock().unwrap().is_empty());
    }
}
