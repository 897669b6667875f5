use anyhow::Result;
use clap::Parser;
use clinic_upkeep::database_ops::permissions::{repair_permissions, select_tables};
use clinic_upkeep::report::{banner, Summary};
use clinic_upkeep::util::db::Db;
use clinic_upkeep::util::env::{self, database_url, or_exit, ConfigResolver};

/// Reset null `_rperm` to world-readable on the catalog tables.
#[derive(Parser, Debug)]
#[command(name = "fix_permissions")]
struct Args {
    #[arg(long)]
    dry_run: bool,
    /// Items_Catalog, Discipline_Offering or Service_Detail
    #[arg(long)]
    table: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("fix_permissions");
    let args: Args = env::parse_args();
    let dry_run = env::dry_run_mode(args.dry_run);
    let tables = select_tables(args.table.as_deref())?;
    let dsn = or_exit(database_url(&ConfigResolver::new()));

    banner("Fix Permissions", dry_run);
    let db = Db::connect(&dsn).await?;
    let outcome = repair_permissions(&db, &tables, dry_run).await;
    db.close().await;
    let repairs = outcome?;

    let summary = repairs.iter().fold(Summary::new("Fix Permissions", dry_run), |s, r| {
        s.line(
            r.table,
            format!("{} null before, {} updated, {} remaining", r.null_before, r.updated, r.remaining),
        )
    });
    summary.print();
    Ok(())
}
