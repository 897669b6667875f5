//! In-memory stand-ins for the Stripe, Parse and storage clients.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use serde_json::Value;

use super::parse::{ObjectStore, ParseQuery};
use super::stripe::{
    BillingApi, Metadata, NewPrice, NewProduct, StripeInvoice, StripeList, StripePrice, StripeProduct,
};
use super::supabase::FileStorage;

#[derive(Default)]
pub struct BillingState {
    pub products: Vec<StripeProduct>,
    pub prices: Vec<StripePrice>,
    pub invoices: Vec<StripeInvoice>,
    pub idempotency: HashMap<String, String>,
    pub deleted: Vec<String>,
    pub voided: Vec<String>,
    pub metadata_updates: Vec<String>,
    pub creates: usize,
    /// Invoice ids whose retrieve/delete/void calls fail.
    pub failing: HashSet<String>,
    /// Product/price creates fail when the local id in metadata is listed here.
    pub failing_creates: HashSet<String>,
}

#[derive(Default)]
pub struct FakeBilling {
    pub state: Mutex<BillingState>,
}

impl FakeBilling {
    pub fn with_invoices(invoices: Vec<StripeInvoice>) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().invoices = invoices;
        fake
    }

    fn failing_create(state: &BillingState, metadata: &Metadata) -> bool {
        metadata.values().any(|v| state.failing_creates.contains(v))
    }
}

#[async_trait::async_trait]
impl BillingApi for FakeBilling {
    async fn create_product(
        &self,
        product: &NewProduct,
        idempotency_key: &str,
    ) -> Result<StripeProduct> {
        let mut s = self.state.lock().unwrap();
        if Self::failing_create(&s, &product.metadata) {
            bail!("stripe error: product create rejected");
        }
        if let Some(id) = s.idempotency.get(idempotency_key).cloned() {
            return s
                .products
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .ok_or_else(|| anyhow!("idempotent replay of unknown product"));
        }
        s.creates += 1;
        let p = StripeProduct {
            id: format!("prod_{}", s.products.len() + 1),
            metadata: product.metadata.clone(),
        };
        s.idempotency.insert(idempotency_key.to_string(), p.id.clone());
        s.products.push(p.clone());
        Ok(p)
    }

    async fn update_product_metadata(&self, product_id: &str, metadata: &Metadata) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        let Some(p) = s.products.iter_mut().find(|p| p.id == product_id) else {
            bail!("stripe error: no such product {product_id}");
        };
        p.metadata.extend(metadata.clone());
        s.metadata_updates.push(product_id.to_string());
        Ok(())
    }

    async fn create_price(&self, price: &NewPrice, idempotency_key: &str) -> Result<StripePrice> {
        let mut s = self.state.lock().unwrap();
        if Self::failing_create(&s, &price.metadata) {
            bail!("stripe error: price create rejected");
        }
        if let Some(id) = s.idempotency.get(idempotency_key).cloned() {
            return s
                .prices
                .iter()
                .find(|p| p.id == id)
                .cloned()
                .ok_or_else(|| anyhow!("idempotent replay of unknown price"));
        }
        s.creates += 1;
        let p = StripePrice {
            id: format!("price_{}", s.prices.len() + 1),
            metadata: price.metadata.clone(),
        };
        s.idempotency.insert(idempotency_key.to_string(), p.id.clone());
        s.prices.push(p.clone());
        Ok(p)
    }

    async fn find_product(&self, key: &str, value: &str) -> Result<Option<StripeProduct>> {
        let s = self.state.lock().unwrap();
        Ok(s.products
            .iter()
            .find(|p| p.metadata.get(key).map(String::as_str) == Some(value))
            .cloned())
    }

    async fn find_price(&self, key: &str, value: &str) -> Result<Option<StripePrice>> {
        let s = self.state.lock().unwrap();
        Ok(s.prices
            .iter()
            .find(|p| p.metadata.get(key).map(String::as_str) == Some(value))
            .cloned())
    }

    async fn list_invoices(
        &self,
        customer: &str,
        limit: u32,
        starting_after: Option<&str>,
    ) -> Result<StripeList<StripeInvoice>> {
        let s = self.state.lock().unwrap();
        let mine: Vec<_> = s
            .invoices
            .iter()
            .filter(|i| i.customer.as_deref() == Some(customer))
            .collect();
        let start = match starting_after {
            Some(after) => mine.iter().position(|i| i.id == after).map_or(mine.len(), |p| p + 1),
            None => 0,
        };
        let page: Vec<StripeInvoice> = mine
            .iter()
            .skip(start)
            .take(limit as usize)
            .map(|i| (*i).clone())
            .collect();
        let has_more = start + page.len() < mine.len();
        Ok(StripeList { data: page, has_more })
    }

    async fn retrieve_invoice(&self, invoice_id: &str) -> Result<StripeInvoice> {
        let s = self.state.lock().unwrap();
        if s.failing.contains(invoice_id) {
            bail!("stripe error: retrieve {invoice_id} failed");
        }
        s.invoices
            .iter()
            .find(|i| i.id == invoice_id)
            .cloned()
            .ok_or_else(|| anyhow!("stripe error: no such invoice {invoice_id}"))
    }

    async fn delete_invoice(&self, invoice_id: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if s.failing.contains(invoice_id) {
            bail!("stripe error: delete {invoice_id} failed");
        }
        s.deleted.push(invoice_id.to_string());
        Ok(())
    }

    async fn void_invoice(&self, invoice_id: &str) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if s.failing.contains(invoice_id) {
            bail!("stripe error: void {invoice_id} failed");
        }
        s.voided.push(invoice_id.to_string());
        Ok(())
    }
}

/// Parse classes as `class -> objectId -> object`. `find` ignores the where clause
/// except for `{"field": {"$exists": false}}` and pointer equality.
#[derive(Default)]
pub struct FakeObjects {
    pub classes: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
    pub failing: HashSet<String>,
    pub destroyed: Mutex<Vec<String>>,
}

impl FakeObjects {
    pub fn insert(&self, class: &str, obj: Value) {
        let id = obj["objectId"].as_str().unwrap_or_default().to_string();
        self.classes
            .lock()
            .unwrap()
            .entry(class.to_string())
            .or_default()
            .insert(id, obj);
    }

    pub fn get(&self, class: &str, id: &str) -> Option<Value> {
        self.classes.lock().unwrap().get(class).and_then(|c| c.get(id)).cloned()
    }

    fn matches(obj: &Value, where_: &Value) -> bool {
        let Some(conds) = where_.as_object() else {
            return true;
        };
        conds.iter().all(|(field, cond)| {
            if cond.get("$exists") == Some(&Value::Bool(false)) {
                return obj.get(field).map_or(true, Value::is_null);
            }
            if let Some(id) = cond.get("objectId") {
                return obj.get(field).and_then(|p| p.get("objectId")) == Some(id);
            }
            obj.get(field) == Some(cond)
        })
    }
}

#[async_trait::async_trait]
impl ObjectStore for FakeObjects {
    async fn find(&self, class: &str, query: &ParseQuery) -> Result<Vec<Value>> {
        let classes = self.classes.lock().unwrap();
        let mut out: Vec<Value> = classes
            .get(class)
            .map(|c| c.values().filter(|o| Self::matches(o, &query.where_)).cloned().collect())
            .unwrap_or_default();
        if let Some(order) = &query.order {
            let (key, desc) = match order.strip_prefix('-') {
                Some(k) => (k, true),
                None => (order.as_str(), false),
            };
            out.sort_by(|a, b| {
                let ka = a.get(key).map(Value::to_string).unwrap_or_default();
                let kb = b.get(key).map(Value::to_string).unwrap_or_default();
                if desc { kb.cmp(&ka) } else { ka.cmp(&kb) }
            });
        }
        if let Some(skip) = query.skip {
            out.drain(..out.len().min(skip as usize));
        }
        if let Some(limit) = query.limit {
            out.truncate(limit as usize);
        }
        Ok(out)
    }

    async fn update(&self, class: &str, object_id: &str, fields: Value) -> Result<()> {
        if self.failing.contains(object_id) {
            bail!("parse error: update {object_id} failed");
        }
        let mut classes = self.classes.lock().unwrap();
        let obj = classes
            .get_mut(class)
            .and_then(|c| c.get_mut(object_id))
            .ok_or_else(|| anyhow!("parse error: {class} {object_id} not found"))?;
        if let (Some(target), Some(src)) = (obj.as_object_mut(), fields.as_object()) {
            for (k, v) in src {
                target.insert(k.clone(), v.clone());
            }
        }
        Ok(())
    }

    async fn destroy(&self, class: &str, object_id: &str) -> Result<()> {
        if self.failing.contains(object_id) {
            bail!("parse error: delete {object_id} failed");
        }
        let mut classes = self.classes.lock().unwrap();
        classes.get_mut(class).and_then(|c| c.remove(object_id));
        self.destroyed.lock().unwrap().push(object_id.to_string());
        Ok(())
    }
}

/// Storage stand-in: a download returns the URL's bytes, uploads are recorded.
#[derive(Default)]
pub struct FakeStorage {
    pub uploads: Mutex<Vec<(String, String, Vec<u8>, String)>>,
    /// Parse file id -> linked `bucket/path`, `None` until linked.
    pub patient_files: Mutex<HashMap<String, Option<String>>>,
    pub failing_urls: HashSet<String>,
}

#[async_trait::async_trait]
impl FileStorage for FakeStorage {
    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        if self.failing_urls.contains(url) {
            bail!("file download failed: 404 url={url}");
        }
        Ok(url.as_bytes().to_vec())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let mut uploads = self.uploads.lock().unwrap();
        if uploads.iter().any(|(b, p, _, _)| b == bucket && p == path) {
            bail!("storage upload failed: 409 Duplicate");
        }
        uploads.push((bucket.into(), path.into(), body, content_type.into()));
        Ok(())
    }

    async fn link_patient_file(
        &self,
        parse_file_id: &str,
        bucket: &str,
        path: &str,
    ) -> Result<bool> {
        let mut rows = self.patient_files.lock().unwrap();
        match rows.get_mut(parse_file_id) {
            Some(slot) => {
                *slot = Some(format!("{bucket}/{path}"));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
