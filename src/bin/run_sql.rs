use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;
use clinic_upkeep::util::env::{self, database_url, or_exit, ConfigResolver};
use clinic_upkeep::util::sql_runner::{connect_postgres_auto, run_sql};

/// Execute a SQL file verbatim against a database.
#[derive(Parser, Debug)]
#[command(name = "run_sql")]
struct Args {
    #[arg(long)]
    file: Option<String>,
    /// Postgres DSN; defaults to the configured database
    #[arg(long)]
    connection: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env::bootstrap_cli("run_sql");
    let args: Args = env::parse_args();
    let Some(file) = args.file else {
        eprintln!("Usage: run_sql --file=<path> --connection=<postgresql://...>");
        std::process::exit(1);
    };
    let dsn = match args.connection {
        Some(c) => c,
        None => or_exit(database_url(&ConfigResolver::new())),
    };

    let path = Path::new(&file);
    if !path.exists() {
        bail!("SQL file does not exist: {file}");
    }
    let sql = std::fs::read_to_string(path).with_context(|| format!("failed to read {file}"))?;
    println!("Executing {file} ({} bytes)", sql.len());

    let client = connect_postgres_auto(&dsn).await?;
    let run = run_sql(&client, &sql)
        .await
        .with_context(|| format!("while executing {file}"))?;
    println!(
        "Done: {} statement(s), {} row(s) affected, {} row(s) returned",
        run.statements, run.rows_affected, run.rows_returned
    );
    Ok(())
}
