//! ERC721 sales and transfers out of a hosted analytical warehouse.
//!
//! Rows for one token contract are pulled from the public BigQuery Ethereum
//! dataset, priced in ether and split into sales (value moved) and plain
//! transfers. Incremental refreshes resume from the highest block seen.

pub mod config;
pub mod error;
pub mod filters;
pub mod indexer;
pub mod query;
pub mod types;
pub mod warehouse;

pub use error::{Error, Result};
pub use filters::ValueRange;
pub use indexer::CollectionIndexer;
pub use query::{TransferQuery, WarehouseTables};
pub use types::{QueryOutcome, TransferRecord, TransferSource, TransferTable};
pub use warehouse::{BigQueryClient, BigQueryConfig, ResultSet, Warehouse};
