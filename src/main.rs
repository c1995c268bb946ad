use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use erc721_sales::{
    config, BigQueryClient, CollectionIndexer, TransferRecord, TransferSource, TransferTable,
};

/// Pull ERC721 sales and transfers for one collection out of BigQuery.
#[derive(Parser)]
#[command(name = "erc721-sales", version, about)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Every transfer of a collection, as JSON lines, plus the new watermark
    Fetch {
        /// ERC721 contract address
        #[arg(long)]
        address: String,
        /// Only blocks strictly after this watermark
        #[arg(long)]
        since: Option<u64>,
    },
    /// Transfers that moved value
    Sales(SourceArgs),
    /// Transfers that moved no value
    Transfers(SourceArgs),
    /// Sales and transfers from a single query, as one JSON object
    Split(SourceArgs),
    /// Sales priced within [min, max] ether
    Priced {
        #[command(flatten)]
        source: SourceArgs,
        /// Upper bound in ether (inclusive)
        #[arg(long)]
        max: f64,
        /// Lower bound in ether (inclusive, default 0)
        #[arg(long)]
        min: Option<f64>,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// ERC721 contract address to query
    #[arg(long)]
    address: Option<String>,
    /// Only blocks strictly after this watermark
    #[arg(long)]
    since: Option<u64>,
    /// JSON-lines file written by `fetch`, used instead of querying
    #[arg(long)]
    input: Option<PathBuf>,
}

impl SourceArgs {
    fn into_source(self) -> Result<TransferSource> {
        let table = self.input.as_deref().map(read_table).transpose()?;
        Ok(TransferSource::from_parts(table, self.address.as_deref(), self.since)?)
    }
}

#[derive(Serialize)]
struct Split<'a> {
    sales: &'a TransferTable,
    transfers: &'a TransferTable,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load()?;
    let warehouse = BigQueryClient::new(cfg.bigquery)?;
    let indexer = CollectionIndexer::new(warehouse, cfg.tables);

    match cli.cmd {
        Cmd::Fetch { address, since } => {
            let address = erc721_sales::types::parse_address(&address)?;
            let outcome = indexer.fetch_transfers(address, since).await?;
            write_lines(&outcome.transfers)?;
            match outcome.watermark {
                Some(w) => info!(watermark = w, rows = outcome.transfers.len(), "resume with --since {w}"),
                None => info!("collection has no transfers yet"),
            }
        }
        Cmd::Sales(args) => {
            let sales = indexer.sales(args.into_source()?).await?;
            write_lines(&sales)?;
        }
        Cmd::Transfers(args) => {
            let transfers = indexer.transfers(args.into_source()?).await?;
            write_lines(&transfers)?;
        }
        Cmd::Split(args) => {
            let (sales, transfers) = indexer.sales_and_transfers(args.into_source()?).await?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            serde_json::to_writer_pretty(&mut out, &Split { sales: &sales, transfers: &transfers })?;
            writeln!(out)?;
        }
        Cmd::Priced { source, max, min } => {
            let sales = indexer.sales_of_value(source.into_source()?, max, min).await?;
            write_lines(&sales)?;
        }
    }
    Ok(())
}

fn read_table(path: &Path) -> Result<TransferTable> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    serde_json::Deserializer::from_reader(BufReader::new(file))
        .into_iter::<TransferRecord>()
        .collect::<Result<TransferTable, _>>()
        .with_context(|| format!("invalid transfer record in {}", path.display()))
}

fn write_lines(table: &TransferTable) -> Result<()> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for record in table {
        serde_json::to_writer(&mut out, record)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}
