use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::error::UpkeepError;

pub const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";
pub const STRIPE_API_VERSION: &str = "2024-06-20";
pub const INVOICE_PAGE_SIZE: u32 = 100;

pub type Metadata = BTreeMap<String, String>;

/// Stripe REST client. Bodies are form-encoded, responses JSON.
#[derive(Debug, Clone)]
pub struct StripeClient {
    base_url: String,
    secret_key: String,
    http: Client,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StripeProduct {
    pub id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StripePrice {
    pub id: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StatusTransitions {
    pub finalized_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct InvoiceLine {
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StripeList<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            has_more: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct StripeInvoice {
    pub id: String,
    pub customer: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub amount_due: i64,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub amount_remaining: i64,
    pub currency: Option<String>,
    pub number: Option<String>,
    pub created: Option<i64>,
    #[serde(default)]
    pub status_transitions: StatusTransitions,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub lines: StripeList<InvoiceLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrice {
    pub product: String,
    pub unit_amount: i64,
    pub currency: String,
    pub metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

/// Billing operations the maintenance procedures need.
#[async_trait::async_trait]
pub trait BillingApi: Send + Sync {
    async fn create_product(
        &self,
        product: &NewProduct,
        idempotency_key: &str,
    ) -> Result<StripeProduct>;
    async fn update_product_metadata(&self, product_id: &str, metadata: &Metadata) -> Result<()>;
    async fn create_price(&self, price: &NewPrice, idempotency_key: &str) -> Result<StripePrice>;
    /// First product whose metadata `key` equals `value`.
    async fn find_product(&self, key: &str, value: &str) -> Result<Option<StripeProduct>>;
    async fn find_price(&self, key: &str, value: &str) -> Result<Option<StripePrice>>;
    async fn list_invoices(
        &self,
        customer: &str,
        limit: u32,
        starting_after: Option<&str>,
    ) -> Result<StripeList<StripeInvoice>>;
    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<StripeInvoice>;
    async fn delete_invoice(&self, invoice_id: &str) -> Result<()>;
    async fn void_invoice(&self, invoice_id: &str) -> Result<()>;
}

fn metadata_params(metadata: &Metadata, out: &mut Vec<(String, String)>) {
    for (k, v) in metadata {
        out.push((format!("metadata[{k}]"), v.clone()));
    }
}

fn product_form(p: &NewProduct) -> Vec<(String, String)> {
    let mut form = vec![
        ("name".to_string(), p.name.clone()),
        ("description".to_string(), p.description.clone()),
        ("active".to_string(), "true".to_string()),
    ];
    metadata_params(&p.metadata, &mut form);
    form
}

fn price_form(p: &NewPrice) -> Vec<(String, String)> {
    let mut form = vec![
        ("product".to_string(), p.product.clone()),
        ("unit_amount".to_string(), p.unit_amount.to_string()),
        ("currency".to_string(), p.currency.to_lowercase()),
        ("active".to_string(), "true".to_string()),
    ];
    metadata_params(&p.metadata, &mut form);
    form
}

/// Search query language: `metadata['key']:'value'`.
fn metadata_search(key: &str, value: &str) -> String {
    let esc = |s: &str| s.replace('\\', "\\\\").replace('\'', "\\'");
    format!("metadata['{}']:'{}'", esc(key), esc(value))
}

impl StripeClient {
    pub fn new(secret_key: &str) -> Result<Self> {
        Self::with_base_url(STRIPE_API_BASE, secret_key)
    }

    pub fn with_base_url(base_url: &str, secret_key: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent("clinic-upkeep/1.0")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
            http,
        })
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.secret_key)
            .header("Stripe-Version", STRIPE_API_VERSION)
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder, what: &str) -> Result<T> {
        let resp = self
            .authed(req)
            .send()
            .await
            .with_context(|| format!("Stripe {what} request failed"))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(env) => format!(
                    "{what} failed: {status} {}: {}",
                    env.error.kind.unwrap_or_default(),
                    env.error.message.unwrap_or_default()
                ),
                Err(_) => format!("{what} failed: {status} body={body}"),
            };
            return Err(UpkeepError::remote("stripe", message).into());
        }
        serde_json::from_str(&body).map_err(|e| anyhow!("Stripe {what} decode failed: {e}"))
    }

    async fn search<T: DeserializeOwned>(
        &self,
        resource: &str,
        key: &str,
        value: &str,
    ) -> Result<Option<T>> {
        let url = format!("{}/{resource}/search", self.base_url);
        let query = metadata_search(key, value);
        debug!(resource, query = %query, "stripe search");
        let req = self.http.get(&url).query(&[("query", query.as_str()), ("limit", "1")]);
        let list: StripeList<T> = self.send(req, &format!("{resource} search")).await?;
        Ok(list.data.into_iter().next())
    }
}

#[async_trait::async_trait]
impl BillingApi for StripeClient {
    async fn create_product(
        &self,
        product: &NewProduct,
        idempotency_key: &str,
    ) -> Result<StripeProduct> {
        let req = self
            .http
            .post(format!("{}/products", self.base_url))
            .header("Idempotency-Key", idempotency_key)
            .form(&product_form(product));
        self.send(req, "product create").await
    }

    async fn update_product_metadata(&self, product_id: &str, metadata: &Metadata) -> Result<()> {
        let mut form = Vec::new();
        metadata_params(metadata, &mut form);
        let req = self
            .http
            .post(format!("{}/products/{product_id}", self.base_url))
            .form(&form);
        let _: StripeProduct = self.send(req, "product update").await?;
        Ok(())
    }

    async fn create_price(&self, price: &NewPrice, idempotency_key: &str) -> Result<StripePrice> {
        let req = self
            .http
            .post(format!("{}/prices", self.base_url))
            .header("Idempotency-Key", idempotency_key)
            .form(&price_form(price));
        self.send(req, "price create").await
    }

    async fn find_product(&self, key: &str, value: &str) -> Result<Option<StripeProduct>> {
        self.search("products", key, value).await
    }

    async fn find_price(&self, key: &str, value: &str) -> Result<Option<StripePrice>> {
        self.search("prices", key, value).await
    }

    async fn list_invoices(
        &self,
        customer: &str,
        limit: u32,
        starting_after: Option<&str>,
    ) -> Result<StripeList<StripeInvoice>> {
        let mut params = vec![
            ("customer", customer.to_string()),
            ("limit", limit.clamp(1, INVOICE_PAGE_SIZE).to_string()),
            ("expand[]", "data.lines".to_string()),
        ];
        if let Some(after) = starting_after {
            params.push(("starting_after", after.to_string()));
        }
        let req = self.http.get(format!("{}/invoices", self.base_url)).query(&params);
        self.send(req, "invoice list").await
    }

    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<StripeInvoice> {
        let req = self.http.get(format!("{}/invoices/{invoice_id}", self.base_url));
        self.send(req, "invoice retrieve").await
    }

    async fn delete_invoice(&self, invoice_id: &str) -> Result<()> {
        let req = self.http.delete(format!("{}/invoices/{invoice_id}", self.base_url));
        let _: serde_json::Value = self.send(req, "invoice delete").await?;
        Ok(())
    }

    async fn void_invoice(&self, invoice_id: &str) -> Result<()> {
        let req = self.http.post(format!("{}/invoices/{invoice_id}/void", self.base_url));
        let _: StripeInvoice = self.send(req, "invoice void").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_is_flattened_into_bracket_keys() {
        let mut metadata = Metadata::new();
        metadata.insert("itemId".into(), "I1".into());
        metadata.insert("orgId".into(), "O1".into());
        let form = product_form(&NewProduct {
            name: "Massage".into(),
            description: "Massage".into(),
            metadata,
        });
        assert!(form.contains(&("metadata[itemId]".to_string(), "I1".to_string())));
        assert!(form.contains(&("metadata[orgId]".to_string(), "O1".to_string())));
        assert!(form.contains(&("active".to_string(), "true".to_string())));
    }

    #[test]
    fn price_currency_is_lowercased() {
        let form = price_form(&NewPrice {
            product: "prod_1".into(),
            unit_amount: 8500,
            currency: "CAD".into(),
            metadata: Metadata::new(),
        });
        assert!(form.contains(&("currency".to_string(), "cad".to_string())));
        assert!(form.contains(&("unit_amount".to_string(), "8500".to_string())));
    }

    #[test]
    fn search_values_are_quoted_and_escaped() {
        assert_eq!(metadata_search("itemPriceId", "abc"), "metadata['itemPriceId']:'abc'");
        assert_eq!(metadata_search("k", "o'neil"), r"metadata['k']:'o\'neil'");
    }

    #[test]
    fn invoice_decodes_with_sparse_fields() {
        let inv: StripeInvoice = serde_json::from_str(
            r#"{"id":"in_1","status":"open","amount_due":5000,"metadata":{"noCharge":"true"},
                "lines":{"data":[{"description":"Assessment"}],"has_more":false}}"#,
        )
        .unwrap();
        assert_eq!(inv.amount_due, 5000);
        assert_eq!(inv.amount_paid, 0);
        assert_eq!(inv.status_transitions.finalized_at, None);
        assert_eq!(inv.lines.data[0].description.as_deref(), Some("Assessment"));
    }

    #[test]
    fn error_envelope_decodes() {
        let env: ErrorEnvelope =
            serde_json::from_str(r#"{"error":{"type":"invalid_request_error","message":"No such invoice"}}"#).unwrap();
        assert_eq!(env.error.message.as_deref(), Some("No such invoice"));
    }
}
