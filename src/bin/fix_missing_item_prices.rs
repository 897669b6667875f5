use anyhow::{bail, Result};
use clap::Parser;
use clinic_upkeep::clients::parse::ParseClient;
use clinic_upkeep::database_ops::appointments::{backfill_item_prices, DEFAULT_LIMIT};
use clinic_upkeep::report::{banner, Summary};
use clinic_upkeep::util::env::{self, keys, or_exit, ConfigResolver};

/// Point appointments without an itemPriceId at their item's shortest price.
#[derive(Parser, Debug)]
#[command(name = "fix_missing_item_prices")]
struct Args {
    #[arg(long)]
    dry_run: bool,
    #[arg(long, default_value_t = DEFAULT_LIMIT)]
    limit: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("fix_missing_item_prices");
    let args: Args = env::parse_args();
    let dry_run = env::dry_run_mode(args.dry_run);
    let cfg = or_exit(ConfigResolver::new().require(&[
        keys::PARSE_SERVER_URL,
        keys::PARSE_APP_ID,
        keys::PARSE_MASTER_KEY,
    ]));

    banner("Fix Missing Item Prices", dry_run);
    let parse = ParseClient::new(
        cfg.get(&keys::PARSE_SERVER_URL),
        cfg.get(&keys::PARSE_APP_ID),
        cfg.get(&keys::PARSE_MASTER_KEY),
    )?;
    let report = backfill_item_prices(&parse, args.limit, dry_run).await?;

    for (id, err) in &report.failures {
        println!("  failed {id}: {err}");
    }
    Summary::new("Fix Missing Item Prices", dry_run)
        .count("appointments found", report.found)
        .count("updated", report.updated)
        .count("skipped", report.skipped)
        .count("items without a price", report.groups_without_price.len())
        .count("failed", report.failures.len())
        .print();
    if !report.failures.is_empty() {
        bail!("{} appointment update(s) failed", report.failures.len());
    }
    Ok(())
}
