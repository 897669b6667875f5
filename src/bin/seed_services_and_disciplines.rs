use anyhow::Result;
use clap::Parser;
use clinic_upkeep::database_ops::seed_catalog::{
    leading_share, seed_catalog, LOCATION_SHARE, OWNERSHIP_GROUP_SHARE,
};
use clinic_upkeep::report::{banner, Summary};
use clinic_upkeep::util::db::Db;
use clinic_upkeep::util::env::{self, database_url, or_exit, ConfigResolver};

/// Seed disciplines, service templates and org/group/location pricing for an org.
#[derive(Parser, Debug)]
#[command(name = "seed_services_and_disciplines")]
struct Args {
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    org: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("seed_services_and_disciplines");
    let args: Args = env::parse_args();
    let dry_run = env::dry_run_mode(args.dry_run);
    let resolver = ConfigResolver::new();
    let org = or_exit(env::org_id(&resolver, args.org));
    let dsn = or_exit(database_url(&resolver));

    banner("Seed Services & Disciplines", dry_run);
    let db = Db::connect(&dsn).await?;
    let outcome = seed_catalog(&db, &org, dry_run).await;
    db.close().await;
    let seeded = outcome?;
    let (org, plan) = (&seeded.org, &seeded.plan);

    Summary::new("Seed Services & Disciplines", dry_run)
        .line("organization", &org.org_name)
        .count("ownership groups", org.ownership_groups.len())
        .count("locations", org.locations.len())
        .count("presets created", plan.presets.len())
        .count("disciplines created", plan.disciplines.len())
        .count("disciplines skipped", plan.skipped_disciplines)
        .count("services created", plan.services.len())
        .count("services skipped", plan.skipped_services)
        .count("service offerings", plan.offering_count())
        .count("price points", plan.price_count())
        .count(
            "groups priced",
            leading_share(org.ownership_groups.len(), OWNERSHIP_GROUP_SHARE),
        )
        .count("locations priced", leading_share(org.locations.len(), LOCATION_SHARE))
        .print();
    Ok(())
}
