pub mod catalog_sync;
pub mod dedupe;
pub mod invoice_sync;
pub mod outbox;
