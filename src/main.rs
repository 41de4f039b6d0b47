use clap::Parser;
use miette::{IntoDiagnostic, Result};
use settlement_engine::config::SettlementConfig;
use settlement_engine::domain::ports::PaymentRepositoryRef;
use settlement_engine::infrastructure::in_memory::InMemoryPaymentRepository;
use settlement_engine::interfaces::csv::payment_writer::PaymentWriter;
use settlement_engine::interfaces::json::scenario::Scenario;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario JSON file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, payments are kept in RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    #[command(flatten)]
    config: SettlementConfig,
}

fn payment_store(db_path: Option<PathBuf>) -> Result<PaymentRepositoryRef> {
    #[cfg(feature = "storage-rocksdb")]
    if let Some(db_path) = db_path {
        use settlement_engine::infrastructure::rocksdb::RocksDbPaymentStore;
        let store = RocksDbPaymentStore::open(db_path)?;
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "storage-rocksdb"))]
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }

    Ok(Arc::new(InMemoryPaymentRepository::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let payments = payment_store(cli.db_path)?;

    let file = File::open(&cli.input).into_diagnostic()?;
    let scenario = Scenario::from_reader(file)?;
    let report = scenario.run(cli.config, payments).await?;

    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(&report.ledger)?;

    let invoice = &report.invoice;
    eprintln!(
        "invoice {}: paid {} of {} {}, remaining {} ({})",
        invoice.id,
        invoice.amount_paid.normalize(),
        invoice.amount_due.normalize(),
        invoice.currency,
        invoice.amount_remaining.normalize(),
        invoice.payment_status,
    );
    eprintln!(
        "subscription {}: {}",
        report.subscription.id, report.subscription.status
    );

    report.outcome?;
    Ok(())
}
