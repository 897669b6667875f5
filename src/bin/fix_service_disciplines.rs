use anyhow::Result;
use clap::Parser;
use clinic_upkeep::database_ops::link_targets::{
    LinkTarget, PgLinkStore, SERVICE_DISCIPLINE_FALLBACK,
};
use clinic_upkeep::database_ops::reconcile::{run_pass, LinkSpec};
use clinic_upkeep::report::{banner, Summary};
use clinic_upkeep::util::db::Db;
use clinic_upkeep::util::env::{self, database_url, or_exit, ConfigResolver};

/// Link recently created Service_Offering rows to the org's Discipline_Offering.
#[derive(Parser, Debug)]
#[command(name = "fix_service_disciplines")]
struct Args {
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    org: Option<String>,
    /// Only offerings created in the last N hours; 0 looks at all of them
    #[arg(long, default_value_t = 2)]
    since_hours: i32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("fix_service_disciplines");
    let args: Args = env::parse_args();
    let dry_run = env::dry_run_mode(args.dry_run);
    let resolver = ConfigResolver::new();
    let org = or_exit(env::org_id(&resolver, args.org));
    let dsn = or_exit(database_url(&resolver));

    banner("Fix Service Disciplines", dry_run);
    println!("Org: {org}");
    let db = Db::connect(&dsn).await?;
    let target = LinkTarget::ServiceDisciplines {
        org,
        since_hours: (args.since_hours > 0).then_some(args.since_hours),
    };
    let spec = LinkSpec::new(target.subject(), SERVICE_DISCIPLINE_FALLBACK);
    let mut store = PgLinkStore::open(&db, target).await?;
    let outcome = run_pass(&mut store, &spec, &[], dry_run).await;
    drop(store);
    db.close().await;
    let report = outcome?;

    for c in &report.fallback {
        println!(
            "  {} ({}) -> {SERVICE_DISCIPLINE_FALLBACK}",
            c.id,
            c.name.as_deref().unwrap_or("<no item>")
        );
    }
    Summary::new("Fix Service Disciplines", dry_run)
        .count("linked by item name", report.exact)
        .count("linked to fallback", report.fallback.len())
        .line("still unlinked", report.remaining)
        .print();
    Ok(())
}
