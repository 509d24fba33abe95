use clap::Parser;
use holdfast::application::service::PaymentService;
use holdfast::config::AppConfig;
use holdfast::domain::ports::{FlowJournalRef, HoldIndexRef, LedgerRef};
use holdfast::infrastructure::in_memory::{InMemoryFlowJournal, InMemoryHoldIndex};
use holdfast::infrastructure::in_memory_ledger::InMemoryLedger;
#[cfg(feature = "storage-rocksdb")]
use holdfast::infrastructure::rocksdb::RocksDBStore;
use holdfast::interfaces::csv::batch::execute;
use holdfast::interfaces::csv::command_reader::CommandReader;
use holdfast::interfaces::csv::outcome_writer::OutcomeWriter;
use holdfast::logging::init_logging;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input commands CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, the hold index and
    /// flow history are kept in RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// TOML configuration file (optional)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn in_memory_storage() -> (HoldIndexRef, FlowJournalRef) {
    (
        Arc::new(InMemoryHoldIndex::new()),
        Arc::new(InMemoryFlowJournal::new()),
    )
}

#[cfg(feature = "storage-rocksdb")]
fn open_storage(db_path: Option<&Path>) -> Result<(HoldIndexRef, FlowJournalRef)> {
    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => Ok(in_memory_storage()),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_storage(db_path: Option<&Path>) -> Result<(HoldIndexRef, FlowJournalRef)> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_storage())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).into_diagnostic()?;
    init_logging(&config.logging);

    // The ledger is always the in-memory stand-in; only holds and flows persist.
    let ledger: LedgerRef = Arc::new(InMemoryLedger::new());
    let (index, journal) = open_storage(cli.db_path.as_deref())?;

    let service = PaymentService::new(ledger, index, journal, config);
    service.ensure_system_accounts().await.into_diagnostic()?;
    service.recover().await.into_diagnostic()?;

    let file = File::open(cli.input).into_diagnostic()?;
    let reader = CommandReader::new(file);
    let stdout = io::stdout();
    let mut writer = OutcomeWriter::new(stdout.lock());

    for command_result in reader.commands() {
        match command_result {
            Ok(command) => match execute(&service, command).await {
                Ok(record) => writer.write(&record).into_diagnostic()?,
                Err(e) => eprintln!("Error processing command: {}", e),
            },
            Err(e) => {
                eprintln!("Error reading command: {}", e);
            }
        }
    }

    writer.flush().into_diagnostic()?;
    Ok(())
}
