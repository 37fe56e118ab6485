use std::{fs::File, path::PathBuf};

use anyhow::{Context, Result};
use balance_engine::{
    bin_utils::{RecordError, Service, ServiceConfig, StoreKind},
    store::OptimisticAccountStore,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Replays a CSV batch of account operations and prints the resulting balances.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// CSV file with `type,account,to,owner,currency,amount` records
    file: PathBuf,
    /// Account store backing the engine
    #[arg(long, value_enum, default_value_t = StoreKind::Locking)]
    store: StoreKind,
    /// Conflicting commits tolerated per operation by the optimistic store
    #[arg(long, default_value_t = OptimisticAccountStore::DEFAULT_MAX_RETRIES)]
    max_retries: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let file = File::open(&cli.file)
        .with_context(|| format!("Failed to open `{}`", cli.file.display()))?;

    let service = Service {
        input: file,
        output: &mut std::io::stdout(),
        config: ServiceConfig {
            store: cli.store,
            max_retries: cli.max_retries,
        },
        error_printer: Box::new(|line, err: RecordError| {
            if !err.is_business_rejection() {
                eprintln!("Error at line {line}: {err}");
            }
        }),
    };
    service.run()
}
