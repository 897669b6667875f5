use anyhow::{bail, Result};
use clap::Parser;
use clinic_upkeep::billing::catalog_sync::{sync_catalog, CatalogSyncOptions, PgCatalogSync};
use clinic_upkeep::clients::stripe::StripeClient;
use clinic_upkeep::report::{banner, Summary};
use clinic_upkeep::util::db::Db;
use clinic_upkeep::util::env::{self, database_url, keys, or_exit, ConfigResolver};

/// Mirror the org's service catalog into Stripe products and prices.
#[derive(Parser, Debug)]
#[command(name = "sync_catalog_to_stripe")]
struct Args {
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    org: Option<String>,
    /// Max service offerings to process
    #[arg(long)]
    limit: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("sync_catalog_to_stripe");
    let args: Args = env::parse_args();
    let dry_run = env::dry_run_mode(args.dry_run);
    let resolver = ConfigResolver::new();
    let org = or_exit(env::org_id(&resolver, args.org));
    let cfg = or_exit(resolver.require(&[keys::STRIPE_SECRET_KEY]));
    let dsn = or_exit(database_url(&resolver));

    banner("Sync Catalog to Stripe", dry_run);
    println!("Org: {org}");
    let stripe = StripeClient::new(cfg.get(&keys::STRIPE_SECRET_KEY))?;
    let db = Db::connect(&dsn).await?;
    let opts = CatalogSyncOptions {
        org_id: &org,
        limit: args.limit,
        dry_run,
    };
    let outcome = match PgCatalogSync::open(&db).await {
        Ok(mut sync) => sync_catalog(&mut sync, &stripe, &opts).await,
        Err(e) => Err(e),
    };
    db.close().await;
    let s = outcome?;

    Summary::new("Sync Catalog to Stripe", dry_run)
        .count("recovered from outbox", s.recovered)
        .count("still pending", s.still_pending)
        .count("products created", s.products_created)
        .count("products updated", s.products_updated)
        .count("products skipped", s.products_skipped)
        .count("prices created", s.prices_created)
        .count("prices skipped", s.prices_skipped)
        .count("prices failed", s.prices_failed)
        .print();
    // products are only skipped on a Stripe error
    if s.prices_failed + s.products_skipped > 0 {
        bail!(
            "{} product(s) and {} price(s) failed to sync",
            s.products_skipped,
            s.prices_failed
        );
    }
    Ok(())
}
