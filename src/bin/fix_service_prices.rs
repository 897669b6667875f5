use anyhow::Result;
use clap::Parser;
use clinic_upkeep::database_ops::prices::{repair_prices, DEFAULT_THRESHOLD};
use clinic_upkeep::report::{banner, Summary};
use clinic_upkeep::util::db::Db;
use clinic_upkeep::util::env::{self, database_url, or_exit, ConfigResolver};

/// Convert Item_Price rows stored in dollars to cents.
#[derive(Parser, Debug)]
#[command(name = "fix_service_prices")]
struct Args {
    #[arg(long)]
    dry_run: bool,
    /// Prices below this many cents are inspected
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("fix_service_prices");
    let args: Args = env::parse_args();
    let dry_run = env::dry_run_mode(args.dry_run);
    let dsn = or_exit(database_url(&ConfigResolver::new()));

    banner("Fix Service Prices", dry_run);
    println!("Threshold: {} cents", args.threshold);
    let db = Db::connect(&dsn).await?;
    let outcome = repair_prices(&db, args.threshold, dry_run).await;
    db.close().await;
    let report = outcome?;

    if !report.ambiguous.is_empty() {
        println!("\nLeft for manual review:");
        for row in &report.ambiguous {
            println!("  - {} price={} ({} min)", row.id, row.price, row.duration_minutes.unwrap_or_default());
        }
    }
    Summary::new("Fix Service Prices", dry_run)
        .count("converted to cents", report.repaired)
        .count("ambiguous, not changed", report.ambiguous.len())
        .line("still in dollars", report.remaining)
        .print();
    Ok(())
}
