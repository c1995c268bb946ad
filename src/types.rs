use chrono::{DateTime, Utc};
use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

/// One token-transfer event joined with the transaction that carried it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub transaction_hash: H256,
    pub block_number: u64,
    pub block_timestamp: Option<DateTime<Utc>>,
    pub block_hash: Option<H256>,
    pub log_index: u64,
    pub token_address: Address,
    /// Decimal token id as stored by the warehouse.
    pub token_id: String,
    pub from_address: Address,
    pub to_address: Address,
    /// `None` when no transaction row matched the transfer.
    pub gas: Option<u64>,
    /// Transaction value in ether (wei / 10^18).
    pub ether: f64,
}

impl TransferRecord {
    pub fn is_sale(&self) -> bool {
        self.ether != 0.0
    }
}

/// In-memory result table. Empty is a perfectly valid table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferTable(pub Vec<TransferRecord>);

impl TransferTable {
    pub fn new(rows: Vec<TransferRecord>) -> Self {
        Self(rows)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn rows(&self) -> &[TransferRecord] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TransferRecord> {
        self.0.iter()
    }

    pub fn into_rows(self) -> Vec<TransferRecord> {
        self.0
    }

    pub fn max_block_number(&self) -> Option<u64> {
        self.0.iter().map(|r| r.block_number).max()
    }

    pub(crate) fn retain_where<F>(&self, keep: F) -> Self
    where
        F: Fn(&TransferRecord) -> bool,
    {
        Self(self.0.iter().filter(|r| keep(r)).cloned().collect())
    }
}

impl FromIterator<TransferRecord> for TransferTable {
    fn from_iter<I: IntoIterator<Item = TransferRecord>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for TransferTable {
    type Item = TransferRecord;
    type IntoIter = std::vec::IntoIter<TransferRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TransferTable {
    type Item = &'a TransferRecord;
    type IntoIter = std::slice::Iter<'a, TransferRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Rows returned by one collection query plus the watermark to resume from.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryOutcome {
    pub transfers: TransferTable,
    /// Highest block number seen so far. Equals the previous watermark when
    /// the query returned nothing.
    pub watermark: Option<u64>,
    pub previous_watermark: Option<u64>,
}

impl QueryOutcome {
    pub fn new(transfers: TransferTable, previous_watermark: Option<u64>) -> Self {
        let watermark = match (transfers.max_block_number(), previous_watermark) {
            (Some(seen), Some(prev)) => Some(seen.max(prev)),
            (seen, prev) => seen.or(prev),
        };
        Self {
            transfers,
            watermark,
            previous_watermark,
        }
    }

    pub fn made_progress(&self) -> bool {
        self.watermark != self.previous_watermark
    }
}

/// Where an operation gets its rows from.
#[derive(Clone, Debug, PartialEq)]
pub enum TransferSource {
    /// A table the caller already holds.
    Table(TransferTable),
    /// Query the warehouse for this contract, optionally only past `watermark`.
    Collection {
        address: Address,
        watermark: Option<u64>,
    },
}

impl TransferSource {
    pub fn collection(address: &str, watermark: Option<u64>) -> Result<Self> {
        Ok(Self::Collection {
            address: parse_address(address)?,
            watermark,
        })
    }

    /// Builds a source out of two optional, mutually exclusive parts.
    pub fn from_parts(
        table: Option<TransferTable>,
        address: Option<&str>,
        watermark: Option<u64>,
    ) -> Result<Self> {
        match (table, address) {
            (Some(table), None) => Ok(Self::Table(table)),
            (None, Some(address)) => Self::collection(address, watermark),
            (None, None) => Err(Error::invalid_argument(
                "either a transfer table or a collection address must be supplied",
            )),
            (Some(_), Some(_)) => Err(Error::invalid_argument(
                "a transfer table and a collection address are mutually exclusive",
            )),
        }
    }
}

impl From<TransferTable> for TransferSource {
    fn from(table: TransferTable) -> Self {
        Self::Table(table)
    }
}

pub fn parse_address(s: &str) -> Result<Address> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_argument("collection address is empty"));
    }
    Address::from_str(trimmed).map_err(|e| Error::InvalidAddress {
        address: s.to_string(),
        reason: e.to_string(),
    })
}
