use anyhow::Result;
use clap::Parser;
use clinic_upkeep::database_ops::seed_fees::{seed_default_fees, FeeSeedOutcome, DEFAULT_FEES};
use clinic_upkeep::report::{banner, Summary};
use clinic_upkeep::util::db::Db;
use clinic_upkeep::util::env::{self, database_url, or_exit, ConfigResolver};

/// Create the default no-show and late-cancellation fees for an org.
#[derive(Parser, Debug)]
#[command(name = "seed_default_fees")]
struct Args {
    /// Org objectId
    org_id: Option<String>,
    #[arg(long)]
    org: Option<String>,
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("seed_default_fees");
    let args: Args = env::parse_args();
    let dry_run = env::dry_run_mode(args.dry_run);
    let Some(org) = args.org_id.or(args.org) else {
        eprintln!("Usage: seed_default_fees <orgId>");
        std::process::exit(1);
    };
    let dsn = or_exit(database_url(&ConfigResolver::new()));

    banner("Seed Default Fees", dry_run);
    println!("Org: {org}");
    let db = Db::connect(&dsn).await?;
    let outcome = seed_default_fees(&db, &org, dry_run).await;
    db.close().await;

    let summary = Summary::new("Seed Default Fees", dry_run);
    let summary = match outcome? {
        FeeSeedOutcome::AlreadySeeded(n) => summary
            .line("existing fees", n)
            .count("created", 0)
            .line("note", "delete existing fees first to re-seed"),
        FeeSeedOutcome::WouldCreate(n) => summary.count("would create", n),
        FeeSeedOutcome::Created(created) => {
            for (id, name) in &created {
                println!("  created {name} ({id})");
            }
            summary.count("created", created.len()).count("expected", DEFAULT_FEES.len())
        }
    };
    summary.print();
    Ok(())
}
