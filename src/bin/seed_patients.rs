use anyhow::{bail, Result};
use clap::Parser;
use clinic_upkeep::database_ops::seed_patients::{
    seed_patients, SeedContext, DEFAULT_PATIENT_COUNT, PATIENT_TEMPLATES,
};
use clinic_upkeep::report::{banner, Summary};
use clinic_upkeep::util::db::Db;
use clinic_upkeep::util::env::{self, database_url, keys, or_exit, ConfigResolver};

/// Create test patients with users, notes, appointments and charts.
#[derive(Parser, Debug)]
#[command(name = "seed_patients")]
struct Args {
    #[arg(long)]
    dry_run: bool,
    /// Number of patients; defaults to SEED_NUM_PATIENTS, then 10
    #[arg(long)]
    count: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("seed_patients");
    let args: Args = env::parse_args();
    let dry_run = env::dry_run_mode(args.dry_run);
    let resolver = ConfigResolver::new();
    let cfg = or_exit(resolver.require(&[
        keys::SEED_ORG_ID,
        keys::SEED_LOCATION_ID,
        keys::SEED_STAFF_ID,
        keys::SEED_CREATED_BY_USER_ID,
        keys::SEED_SERVICE_OFFERING_ID,
        keys::SEED_OWNERSHIP_GROUP_ID,
    ]));
    let dsn = or_exit(database_url(&resolver));
    let ctx = SeedContext {
        org_id: cfg.get(&keys::SEED_ORG_ID).to_string(),
        location_id: cfg.get(&keys::SEED_LOCATION_ID).to_string(),
        staff_id: cfg.get(&keys::SEED_STAFF_ID).to_string(),
        created_by: cfg.get(&keys::SEED_CREATED_BY_USER_ID).to_string(),
        service_offering_id: cfg.get(&keys::SEED_SERVICE_OFFERING_ID).to_string(),
        ownership_group_id: cfg.get(&keys::SEED_OWNERSHIP_GROUP_ID).to_string(),
    };
    let count = args
        .count
        .unwrap_or_else(|| env::env_parse("SEED_NUM_PATIENTS", DEFAULT_PATIENT_COUNT));
    if count > PATIENT_TEMPLATES.len() {
        println!("Only {} patient templates exist; seeding that many", PATIENT_TEMPLATES.len());
    }

    banner("Seed Patients", dry_run);
    println!("Organization: {}", ctx.org_id);
    println!("Location: {}", ctx.location_id);
    println!("Ownership group: {}", ctx.ownership_group_id);
    let db = Db::connect(&dsn).await?;
    let outcome = seed_patients(&db, &ctx, count, dry_run).await;
    db.close().await;
    let report = outcome?;

    for (name, err) in &report.failures {
        println!("  failed {name}: {err}");
    }
    Summary::new("Seed Patients", dry_run)
        .count("requested", report.requested)
        .count("successful", report.created.len())
        .count("failed", report.failures.len())
        .count("appointments", report.created.iter().map(|p| p.appointments).sum())
        .count("charts", report.created.iter().map(|p| p.charts).sum())
        .print();
    if !report.failures.is_empty() {
        bail!("{} patient(s) failed to seed", report.failures.len());
    }
    Ok(())
}
