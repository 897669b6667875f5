//! Supabase Storage uploads and the `patient_files` PostgREST table, authenticated
//! with the service-role key.
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::parse::truncate_for_log;
use crate::error::UpkeepError;

/// Where migrated file bytes come from and go to.
#[async_trait::async_trait]
pub trait FileStorage: Send + Sync {
    /// Raw bytes behind a Parse file URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>>;
    /// Create `bucket/path`; an existing object is an error, never overwritten.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;
    /// Point the `patient_files` row for a Parse file at its new location. `false`
    /// when no row references the file.
    async fn link_patient_file(
        &self,
        parse_file_id: &str,
        bucket: &str,
        path: &str,
    ) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct PatientFileRow {
    id: Value,
}

impl SupabaseClient {
    pub fn new(base_url: &str, service_key: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent("clinic-upkeep/1.0")
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            http,
        })
    }

    fn rest(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.service_key).bearer_auth(&self.service_key)
    }

    async fn check(
        resp: reqwest::Response,
        service: &'static str,
        what: &str,
        url: &str,
    ) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let body = truncate_for_log(body, 400);
        let message = format!("{what} failed: {status} url={url} body={body}");
        Err(UpkeepError::remote(service, message).into())
    }
}

fn row_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait::async_trait]
impl FileStorage for SupabaseClient {
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let resp = Self::check(resp, "parse", "file download", url).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| anyhow!("file download read failed: {e} url={url}"))?;
        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let url = format!("{}/storage/v1/object/{bucket}/{path}", self.base_url);
        debug!(bucket, path, bytes = body.len(), "storage upload");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.service_key)
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        Self::check(resp, "supabase", "storage upload", &url).await?;
        Ok(())
    }

    async fn link_patient_file(
        &self,
        parse_file_id: &str,
        bucket: &str,
        path: &str,
    ) -> Result<bool> {
        let url = format!("{}/rest/v1/patient_files", self.base_url);
        let resp = self
            .rest(self.http.get(&url))
            .query(&[
                ("parse_object_id", format!("eq.{parse_file_id}")),
                ("select", "id".to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let resp = Self::check(resp, "supabase", "patient_files lookup", &url).await?;
        let rows: Vec<PatientFileRow> = resp
            .json()
            .await
            .map_err(|e| anyhow!("patient_files decode failed: {e} url={url}"))?;
        let Some(row) = rows.first() else {
            return Ok(false);
        };

        let resp = self
            .rest(self.http.patch(&url))
            .query(&[("id", format!("eq.{}", row_id(&row.id)))])
            .header("Prefer", "return=representation")
            .json(&json!({ "storage_bucket": bucket, "storage_path": path }))
            .send()
            .await
            .with_context(|| format!("PATCH {url}"))?;
        Self::check(resp, "supabase", "patient_files update", &url).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_ids_keep_their_text_form() {
        assert_eq!(row_id(&json!("3f2a-uuid")), "3f2a-uuid");
        assert_eq!(row_id(&json!(42)), "42");
    }
}
