//! coherdb - cross-connection visibility check
//!
//! Creates two tables, inserts a row on one connection and reads it back from
//! a second connection whose cache already holds pages of the same table.

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use coherdb::storage::Journal;
use coherdb::{Connection, ConnectionConfig, JournalMode, Value};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// coherdb - reproduces the lost-write scenario on two connections
#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Database file (recreated on every run)
    #[arg(short = 'D', long, default_value = "Simple.db")]
    database: PathBuf,

    /// Page cipher key
    #[arg(short, long, default_value = "000000000000000000")]
    password: String,

    /// Pages retained by each connection cache
    #[arg(short, long, default_value = "2000")]
    cache_size: usize,

    /// Journal mode (delete or truncate)
    #[arg(short, long, default_value = "delete")]
    journal_mode: JournalMode,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let mut config = ConnectionConfig::new(&args.database)
        .with_cache_size(args.cache_size)
        .with_journal_mode(args.journal_mode);
    if !args.password.is_empty() {
        config = config.with_key(&args.password);
    }

    recreate(&args.database).context("Failed to remove the previous database")?;
    create_tables(&config)?;

    let mut c0 = Connection::open(config.clone()).context("Failed to open connection #0")?;
    let mut c1 = Connection::open(config).context("Failed to open connection #1")?;

    // Step 1. Connection #1 caches pages of MainTable.
    let before = c1.query("SELECT id FROM [MainTable]").context("Step 1 failed")?;
    log::debug!("connection #1 saw {} row(s) before the insert", before.len());

    // Step 2. Connection #0 inserts the row connection #1 must see.
    c0.execute_with(
        "INSERT INTO MainTable (id) VALUES (@id)",
        &[("@id", Value::Integer(1))],
    )
    .context("Step 2 failed")?;

    // Step 3. An unrelated write on connection #0.
    c0.execute_with(
        "INSERT INTO DummyTable (Id) VALUES (@id)",
        &[("@id", Value::Integer(1))],
    )
    .context("Step 3 failed")?;

    // Step 4. Connection #1 reads MainTable again.
    let other = c1.query("SELECT id FROM [MainTable]").context("Step 4 failed")?;
    let reproduced = other.is_empty();
    if reproduced {
        println!("Reproduced the issue (the row was not read).");
    } else {
        println!("No repro. The row was read successfully.");
    }

    // Step 5. Connection #0 reads its own write.
    let own = c0.query("SELECT id FROM [MainTable]").context("Step 5 failed")?;
    if own.is_empty() {
        println!("The row was not read even from the connection that inserted it.");
    } else {
        println!("The row was read from the connection that inserted it.");
    }
    log::debug!("connection #1 cache: {:?}", c1.cache_stats());

    c0.close().context("Failed to close connection #0")?;
    c1.close().context("Failed to close connection #1")?;

    Ok(if reproduced || own.is_empty() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn recreate(path: &Path) -> std::io::Result<()> {
    for file in [path.to_path_buf(), Journal::journal_path(path)] {
        match std::fs::remove_file(&file) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
            _ => {}
        }
    }
    Ok(())
}

fn create_tables(config: &ConnectionConfig) -> Result<()> {
    let mut conn = Connection::open(config.clone()).context("Failed to create the database")?;
    conn.execute(
        "CREATE TABLE [MainTable] ([id] int NOT NULL);
         CREATE TABLE [DummyTable] ([id] int NOT NULL);",
    )
    .context("Failed to create tables")?;
    conn.close()?;
    log::info!("created {}", config.path.display());
    Ok(())
}
