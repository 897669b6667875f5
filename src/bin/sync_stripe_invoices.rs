use anyhow::Result;
use clap::Parser;
use clinic_upkeep::billing::invoice_sync::{
    link_patient_to_customer, sync_invoices, InvoiceSyncOptions,
};
use clinic_upkeep::clients::stripe::StripeClient;
use clinic_upkeep::error::UpkeepError;
use clinic_upkeep::report::{banner, Summary};
use clinic_upkeep::util::db::Db;
use clinic_upkeep::util::env::{self, database_url, keys, or_exit, ConfigResolver};

/// Mirror Stripe invoices into the local Invoice table.
#[derive(Parser, Debug)]
#[command(name = "sync_stripe_invoices")]
struct Args {
    #[arg(long)]
    dry_run: bool,
    #[arg(long = "patientId")]
    patient_id: Option<String>,
    /// Link the patient to this Stripe customer before syncing (needs --patientId)
    #[arg(long = "customerId")]
    customer_id: Option<String>,
    /// Max invoices per customer
    #[arg(long)]
    limit: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("sync_stripe_invoices");
    let args: Args = env::parse_args();
    let dry_run = env::dry_run_mode(args.dry_run);
    let resolver = ConfigResolver::new();
    let cfg = or_exit(resolver.require(&[keys::STRIPE_SECRET_KEY]));
    let dsn = or_exit(database_url(&resolver));

    banner("Sync Stripe Invoices", dry_run);
    let stripe = StripeClient::new(cfg.get(&keys::STRIPE_SECRET_KEY))?;
    let db = Db::connect(&dsn).await?;

    if let Some(customer) = args.customer_id.as_deref() {
        let Some(patient) = args.patient_id.as_deref() else {
            anyhow::bail!("--customerId requires --patientId");
        };
        if dry_run {
            println!("[DRY RUN] would set stripeCustomerId={customer} on patient {patient}");
        } else if !link_patient_to_customer(&db, patient, customer).await? {
            db.close().await;
            return Err(UpkeepError::not_found("patient", patient).into());
        }
    }

    let opts = InvoiceSyncOptions {
        patient_id: args.patient_id.as_deref(),
        limit: args.limit,
        dry_run,
    };
    let outcome = sync_invoices(&db, &stripe, &opts).await;
    db.close().await;
    let s = outcome?;

    Summary::new("Sync Stripe Invoices", dry_run)
        .count("patients", s.patients)
        .count("invoices fetched", s.fetched)
        .count("inserted", s.inserted)
        .count("updated", s.updated)
        .count("skipped", s.skipped)
        .print();
    Ok(())
}
