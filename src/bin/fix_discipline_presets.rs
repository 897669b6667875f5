use anyhow::Result;
use clap::Parser;
use clinic_upkeep::database_ops::link_targets::{
    LinkTarget, PgLinkStore, DISCIPLINE_PRESETS, PRESET_FALLBACK,
};
use clinic_upkeep::database_ops::reconcile::{run_pass, LinkSpec};
use clinic_upkeep::report::{banner, Summary};
use clinic_upkeep::util::db::Db;
use clinic_upkeep::util::env::{self, database_url, or_exit, ConfigResolver};

/// Link every Discipline_Offering to its Discipline_Preset, seeding missing presets.
#[derive(Parser, Debug)]
#[command(name = "fix_discipline_presets")]
struct Args {
    #[arg(long)]
    dry_run: bool,
    /// Restrict to one org
    #[arg(long)]
    org: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("fix_discipline_presets");
    let args: Args = env::parse_args();
    let dry_run = env::dry_run_mode(args.dry_run);
    let dsn = or_exit(database_url(&ConfigResolver::new()));

    banner("Fix Discipline Presets", dry_run);
    let db = Db::connect(&dsn).await?;
    let target = LinkTarget::DisciplinePresets { org: args.org };
    let spec = LinkSpec::new(target.subject(), PRESET_FALLBACK);
    let mut store = PgLinkStore::open(&db, target).await?;
    let outcome = run_pass(&mut store, &spec, &DISCIPLINE_PRESETS, dry_run).await;
    drop(store);
    db.close().await;
    let report = outcome?;

    for c in &report.fallback {
        println!("  {} ({}) -> {PRESET_FALLBACK}", c.id, c.name.as_deref().unwrap_or("<no name>"));
    }
    Summary::new("Fix Discipline Presets", dry_run)
        .count("presets created", report.canonical_created)
        .count("linked by name", report.exact)
        .count("linked to fallback", report.fallback.len())
        .line("still unlinked", report.remaining)
        .print();
    Ok(())
}
