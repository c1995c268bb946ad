use ethers::types::Address;
use std::fmt;

pub const DEFAULT_TRANSACTIONS_TABLE: &str = "bigquery-public-data.crypto_ethereum.transactions";
pub const DEFAULT_TOKEN_TRANSFERS_TABLE: &str =
    "bigquery-public-data.crypto_ethereum.token_transfers";

/// Fully qualified ids of the two joined warehouse tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WarehouseTables {
    pub transactions: String,
    pub token_transfers: String,
}

impl Default for WarehouseTables {
    fn default() -> Self {
        Self {
            transactions: DEFAULT_TRANSACTIONS_TABLE.to_string(),
            token_transfers: DEFAULT_TOKEN_TRANSFERS_TABLE.to_string(),
        }
    }
}

/// All transfers of one token contract, optionally only those after a watermark.
#[derive(Clone, Debug)]
pub struct TransferQuery<'a> {
    tables: &'a WarehouseTables,
    token_address: Address,
    watermark: Option<u64>,
}

impl<'a> TransferQuery<'a> {
    pub fn new(tables: &'a WarehouseTables, token_address: Address) -> Self {
        Self {
            tables,
            token_address,
            watermark: None,
        }
    }

    pub fn since(mut self, watermark: Option<u64>) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn to_sql(&self) -> String {
        // Addresses are stored lower-case in the warehouse.
        let mut sql = format!(
            "SELECT\n  \
               transactions.value AS wei_value,\n  \
               transactions.gas AS gas,\n  \
               token_transfers.transaction_hash,\n  \
               token_transfers.token_address,\n  \
               token_transfers.value AS token_id,\n  \
               token_transfers.from_address,\n  \
               token_transfers.to_address,\n  \
               token_transfers.log_index,\n  \
               token_transfers.block_number,\n  \
               token_transfers.block_timestamp,\n  \
               token_transfers.block_hash\n\
             FROM `{transfers}` AS token_transfers\n\
             FULL OUTER JOIN `{transactions}` AS transactions\n  \
               ON token_transfers.transaction_hash = transactions.hash\n\
             WHERE token_transfers.token_address = \"0x{address:x}\"",
            transfers = self.tables.token_transfers,
            transactions = self.tables.transactions,
            address = self.token_address,
        );
        if let Some(w) = self.watermark {
            sql.push_str(&format!(
                "\n  AND token_transfers.block_number > {w}\n  AND transactions.block_number > {w}"
            ));
        }
        sql.push_str("\nORDER BY token_transfers.block_number, token_transfers.log_index");
        sql
    }
}

impl fmt::Display for TransferQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}
