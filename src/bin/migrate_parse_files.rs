use anyhow::{bail, Result};
use clap::Parser;
use clinic_upkeep::clients::parse::ParseClient;
use clinic_upkeep::clients::supabase::SupabaseClient;
use clinic_upkeep::database_ops::file_migration::migrate_files;
use clinic_upkeep::report::{banner, Summary};
use clinic_upkeep::util::env::{self, keys, or_exit, ConfigResolver};

/// Copy Parse-hosted files into Supabase Storage and repoint patient_files.
#[derive(Parser, Debug)]
#[command(name = "migrate_parse_files")]
struct Args {
    #[arg(long)]
    dry_run: bool,
    /// Stop after this many files
    #[arg(long)]
    limit: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("migrate_parse_files");
    let args: Args = env::parse_args();
    let dry_run = env::dry_run_mode(args.dry_run);
    let cfg = or_exit(ConfigResolver::new().require(&[
        keys::PARSE_SERVER_URL,
        keys::PARSE_APP_ID,
        keys::PARSE_MASTER_KEY,
        keys::SUPABASE_URL,
        keys::SUPABASE_SERVICE_ROLE_KEY,
    ]));

    banner("Migrate Parse Files", dry_run);
    if let Some(limit) = args.limit {
        println!("Limiting to {limit} files");
    }
    let parse = ParseClient::new(
        cfg.get(&keys::PARSE_SERVER_URL),
        cfg.get(&keys::PARSE_APP_ID),
        cfg.get(&keys::PARSE_MASTER_KEY),
    )?;
    let storage = SupabaseClient::new(
        cfg.get(&keys::SUPABASE_URL),
        cfg.get(&keys::SUPABASE_SERVICE_ROLE_KEY),
    )?;
    let report = migrate_files(&parse, &storage, args.limit, dry_run).await?;

    for (id, err) in &report.failures {
        println!("  failed {id}: {err}");
    }
    Summary::new("Migrate Parse Files", dry_run)
        .count("processed", report.processed)
        .count("migrated", report.migrated)
        .count("without patient_files record", report.unlinked.len())
        .count("errors", report.failures.len())
        .print();
    if !report.failures.is_empty() {
        bail!("{} file(s) failed to migrate", report.failures.len());
    }
    Ok(())
}
