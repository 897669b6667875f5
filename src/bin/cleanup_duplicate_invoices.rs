use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use clinic_upkeep::billing::dedupe::{load_invoices, plan_duplicates, remove_duplicates};
use clinic_upkeep::clients::parse::ParseClient;
use clinic_upkeep::clients::stripe::StripeClient;
use clinic_upkeep::report::{banner, Summary};
use clinic_upkeep::util::env::{self, keys, or_exit, ConfigResolver};

/// Keep the earliest invoice per appointment; delete or void the rest in Stripe and
/// remove them locally.
#[derive(Parser, Debug)]
#[command(name = "cleanup_duplicate_invoices")]
struct Args {
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    appointment_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("cleanup_duplicate_invoices");
    let args: Args = env::parse_args();
    let dry_run = env::dry_run_mode(args.dry_run);
    let cfg = or_exit(ConfigResolver::new().require(&[
        keys::PARSE_SERVER_URL,
        keys::PARSE_APP_ID,
        keys::PARSE_MASTER_KEY,
        keys::STRIPE_SECRET_KEY,
    ]));

    banner("Cleanup Duplicate Invoices", dry_run);
    let parse = ParseClient::new(
        cfg.get(&keys::PARSE_SERVER_URL),
        cfg.get(&keys::PARSE_APP_ID),
        cfg.get(&keys::PARSE_MASTER_KEY),
    )?;
    let stripe = StripeClient::new(cfg.get(&keys::STRIPE_SECRET_KEY))?;

    let invoices = load_invoices(&parse, args.appointment_id.as_deref()).await?;
    let groups = plan_duplicates(invoices);
    let duplicates: usize = groups.iter().map(|g| g.remove.len()).sum();
    println!("Found {} appointment(s) with {duplicates} duplicate invoice(s)", groups.len());
    if groups.is_empty() {
        return Ok(());
    }
    if !dry_run {
        println!("Deleting in 5 seconds, Ctrl+C to abort...");
        tokio::time::sleep(Duration::from_secs(5)).await;
    }

    let report = remove_duplicates(&parse, &stripe, &groups, dry_run).await;
    for f in &report.failures {
        println!(
            "  failed {} (stripe {}): {}",
            f.invoice_id,
            f.stripe_invoice_id.as_deref().unwrap_or("-"),
            f.error
        );
    }
    let removed = if dry_run { report.would_remove } else { report.removed.len() };
    Summary::new("Cleanup Duplicate Invoices", dry_run)
        .count("appointments", groups.len())
        .count("kept", report.kept.len())
        .count("removed", removed)
        .count("failed", report.failures.len())
        .print();
    if !report.failures.is_empty() {
        bail!("{} duplicate invoice(s) could not be removed", report.failures.len());
    }
    Ok(())
}
