use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::UpkeepError;

pub(crate) fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}

/// Parse Server REST client authenticated with the master key.
///
/// - GET    /classes/{Class}?where=&limit=&skip=&order=&include=
/// - PUT    /classes/{Class}/{objectId}
/// - DELETE /classes/{Class}/{objectId}
#[derive(Debug, Clone)]
pub struct ParseClient {
    base_url: String,
    app_id: String,
    master_key: String,
    http: Client,
}

#[derive(Debug, Clone, Default)]
pub struct ParseQuery {
    pub where_: Value,
    pub limit: Option<u32>,
    pub skip: Option<u32>,
    pub order: Option<String>,
    pub include: Vec<String>,
}

impl ParseQuery {
    pub fn new(where_: Value) -> Self {
        Self {
            where_,
            ..Default::default()
        }
    }

    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn skip(mut self, n: u32) -> Self {
        self.skip = Some(n).filter(|n| *n > 0);
        self
    }

    pub fn order(mut self, key: &str) -> Self {
        self.order = Some(key.to_string());
        self
    }

    pub fn include(mut self, key: &str) -> Self {
        self.include.push(key.to_string());
        self
    }

    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();
        let where_ = if self.where_.is_null() { json!({}) } else { self.where_.clone() };
        params.push(("where", where_.to_string()));
        if let Some(n) = self.limit {
            params.push(("limit", n.to_string()));
        }
        if let Some(n) = self.skip {
            params.push(("skip", n.to_string()));
        }
        if let Some(o) = &self.order {
            params.push(("order", o.clone()));
        }
        if !self.include.is_empty() {
            params.push(("include", self.include.join(",")));
        }
        params
    }
}

pub fn pointer(class: &str, object_id: &str) -> Value {
    json!({ "__type": "Pointer", "className": class, "objectId": object_id })
}

/// objectId of a pointer field, whether it came back as a bare pointer or an
/// included object.
pub fn pointer_id(obj: &Value, field: &str) -> Option<String> {
    obj.get(field)
        .and_then(|p| p.get("objectId"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    results: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ParseErrorBody {
    code: Option<i64>,
    error: Option<String>,
}

/// Object API surface used by the maintenance procedures.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn find(&self, class: &str, query: &ParseQuery) -> Result<Vec<Value>>;
    async fn update(&self, class: &str, object_id: &str, fields: Value) -> Result<()>;
    async fn destroy(&self, class: &str, object_id: &str) -> Result<()>;
}

impl ParseClient {
    pub fn new(server_url: &str, app_id: &str, master_key: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent("clinic-upkeep/1.0")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: server_url.trim_end_matches('/').to_string(),
            app_id: app_id.to_string(),
            master_key: master_key.to_string(),
            http,
        })
    }

    fn class_url(&self, class: &str) -> String {
        format!("{}/classes/{class}", self.base_url)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("X-Parse-Application-Id", &self.app_id)
            .header("X-Parse-Master-Key", &self.master_key)
    }

    async fn check(resp: reqwest::Response, what: &str, url: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ParseErrorBody>(&body) {
            Ok(ParseErrorBody {
                code,
                error: Some(error),
            }) => format!("{what} failed: {status} code={} {error}", code.unwrap_or_default()),
            _ => format!("{what} failed: {status} url={url} body={}", truncate_for_log(body, 400)),
        };
        Err(UpkeepError::remote("parse", message).into())
    }
}

#[async_trait::async_trait]
impl ObjectStore for ParseClient {
    async fn find(&self, class: &str, query: &ParseQuery) -> Result<Vec<Value>> {
        let url = self.class_url(class);
        debug!(class, params = ?query.to_params(), "parse find");
        let resp = self
            .authed(self.http.get(&url))
            .query(&query.to_params())
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        let resp = Self::check(resp, "Parse find", &url).await?;
        let body: FindResponse = resp
            .json()
            .await
            .map_err(|e| anyhow!("Parse find decode failed: {e} url={url}"))?;
        Ok(body.results)
    }

    async fn update(&self, class: &str, object_id: &str, fields: Value) -> Result<()> {
        let url = format!("{}/{object_id}", self.class_url(class));
        let resp = self
            .authed(self.http.put(&url))
            .json(&fields)
            .send()
            .await
            .with_context(|| format!("PUT {url}"))?;
        Self::check(resp, "Parse update", &url).await?;
        Ok(())
    }

    async fn destroy(&self, class: &str, object_id: &str) -> Result<()> {
        let url = format!("{}/{object_id}", self.class_url(class));
        let resp = self
            .authed(self.http.delete(&url))
            .send()
            .await
            .with_context(|| format!("DELETE {url}"))?;
        Self::check(resp, "Parse delete", &url).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_encode_where_and_options() {
        let q = ParseQuery::new(json!({ "itemPriceId": { "$exists": false } }))
            .limit(1000)
            .order("createdAt")
            .include("serviceOfferingId")
            .include("serviceOfferingId.itemId");
        let params = q.to_params();
        assert_eq!(params[0], ("where", r#"{"itemPriceId":{"$exists":false}}"#.to_string()));
        assert!(params.contains(&("limit", "1000".to_string())));
        assert!(params.contains(&("order", "createdAt".to_string())));
        assert!(params.contains(&("include", "serviceOfferingId,serviceOfferingId.itemId".to_string())));
    }

    #[test]
    fn skip_is_only_sent_past_the_first_page() {
        let first = ParseQuery::default().limit(100).skip(0).to_params();
        assert!(!first.iter().any(|(k, _)| *k == "skip"));
        let third = ParseQuery::default().limit(100).skip(200).to_params();
        assert!(third.contains(&("skip", "200".to_string())));
    }

    #[test]
    fn empty_where_is_sent_as_object() {
        assert_eq!(ParseQuery::default().to_params()[0].1, "{}");
    }

    #[test]
    fn pointer_id_reads_pointers_and_included_objects() {
        let obj = json!({
            "a": pointer("Appointment", "A1"),
            "b": { "__type": "Object", "className": "Items_Catalog", "objectId": "I1", "itemName": "Massage" },
        });
        assert_eq!(pointer_id(&obj, "a").as_deref(), Some("A1"));
        assert_eq!(pointer_id(&obj, "b").as_deref(), Some("I1"));
        assert_eq!(pointer_id(&obj, "c"), None);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_for_log("héllo".to_string(), 2), "h...");
    }
}
