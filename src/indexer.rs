use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::filters::{self, ValueRange};
use crate::query::{TransferQuery, WarehouseTables};
use crate::types::{QueryOutcome, TransferRecord, TransferSource, TransferTable};
use crate::warehouse::{ResultSet, Warehouse};

const WEI_PER_ETHER: f64 = 1e18;

const COLUMNS: &[&str] = &[
    "wei_value",
    "gas",
    "transaction_hash",
    "token_address",
    "token_id",
    "from_address",
    "to_address",
    "log_index",
    "block_number",
    "block_timestamp",
    "block_hash",
];

/// Runs collection queries against a warehouse and splits the rows into
/// sales and plain transfers.
pub struct CollectionIndexer<W> {
    warehouse: W,
    tables: WarehouseTables,
}

impl<W: Warehouse> CollectionIndexer<W> {
    pub fn new(warehouse: W, tables: WarehouseTables) -> Self {
        Self { warehouse, tables }
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    /// Every transfer of `token_address` after `watermark`, with the new watermark.
    pub async fn fetch_transfers(
        &self,
        token_address: Address,
        watermark: Option<u64>,
    ) -> Result<QueryOutcome> {
        let sql = TransferQuery::new(&self.tables, token_address)
            .since(watermark)
            .to_sql();
        debug!(token = ?token_address, ?watermark, "querying collection transfers");

        let rs = self.warehouse.run_query(&sql).await?;
        let outcome = QueryOutcome::new(decode_transfers(&rs)?, watermark);

        if outcome.made_progress() {
            info!(
                token = ?token_address,
                rows = outcome.transfers.len(),
                watermark = ?outcome.watermark,
                "fetched collection transfers"
            );
        } else {
            warn!(token = ?token_address, ?watermark, "no new transfers, watermark unchanged");
        }
        Ok(outcome)
    }

    async fn materialize(&self, source: TransferSource) -> Result<TransferTable> {
        match source {
            TransferSource::Table(table) => Ok(table),
            TransferSource::Collection { address, watermark } => {
                Ok(self.fetch_transfers(address, watermark).await?.transfers)
            }
        }
    }

    pub async fn sales(&self, source: TransferSource) -> Result<TransferTable> {
        Ok(filters::sales(&self.materialize(source).await?))
    }

    pub async fn transfers(&self, source: TransferSource) -> Result<TransferTable> {
        Ok(filters::transfers(&self.materialize(source).await?))
    }

    /// `(sales, transfers)` from at most one query.
    pub async fn sales_and_transfers(
        &self,
        source: TransferSource,
    ) -> Result<(TransferTable, TransferTable)> {
        Ok(filters::partition(&self.materialize(source).await?))
    }

    /// Sales priced within `[min, max]` ether; `min` defaults to zero.
    ///
    /// Zero-value rows never qualify, so a mixed table can be passed as is.
    pub async fn sales_of_value(
        &self,
        source: TransferSource,
        max: f64,
        min: Option<f64>,
    ) -> Result<TransferTable> {
        let range = ValueRange::new(min.unwrap_or(0.0), max)?;
        let sales = self.sales(source).await?;
        Ok(filters::within_value(&sales, range))
    }
}

/// Decodes warehouse rows into transfer records, deriving ether from wei.
pub fn decode_transfers(rs: &ResultSet) -> Result<TransferTable> {
    let idx = rs.column_index(COLUMNS)?;
    rs.rows.iter().map(|row| decode_row(&idx, row)).collect()
}

struct RowView<'r> {
    idx: &'r HashMap<String, usize>,
    row: &'r [Option<String>],
}

impl<'r> RowView<'r> {
    fn get(&self, name: &str) -> Option<&'r str> {
        self.idx
            .get(name)
            .and_then(|&i| self.row.get(i))
            .and_then(|c| c.as_deref())
    }

    fn required(&self, name: &str) -> Result<&'r str> {
        self.get(name)
            .ok_or_else(|| Error::decode(name, "unexpected NULL"))
    }
}

fn decode_row(idx: &HashMap<String, usize>, row: &[Option<String>]) -> Result<TransferRecord> {
    let row = RowView { idx, row };

    // No matching transaction row means nothing was paid.
    let wei = row
        .get("wei_value")
        .map(|v| parse_wei("wei_value", v))
        .transpose()?
        .unwrap_or_default();

    Ok(TransferRecord {
        transaction_hash: parse_hex::<H256>("transaction_hash", row.required("transaction_hash")?)?,
        block_number: parse_integer("block_number", row.required("block_number")?)?,
        block_timestamp: row
            .get("block_timestamp")
            .map(|v| parse_timestamp("block_timestamp", v))
            .transpose()?,
        block_hash: row
            .get("block_hash")
            .map(|v| parse_hex::<H256>("block_hash", v))
            .transpose()?,
        log_index: parse_integer("log_index", row.required("log_index")?)?,
        token_address: parse_hex::<Address>("token_address", row.required("token_address")?)?,
        token_id: row.required("token_id")?.to_string(),
        from_address: parse_hex::<Address>("from_address", row.required("from_address")?)?,
        to_address: parse_hex::<Address>("to_address", row.required("to_address")?)?,
        gas: row.get("gas").map(|v| parse_integer("gas", v)).transpose()?,
        ether: wei_to_ether(wei),
    })
}

/// wei / 10^18. Zero only for zero wei: the smallest non-zero input is 1e-18.
pub fn wei_to_ether(wei: U256) -> f64 {
    if wei.is_zero() {
        return 0.0;
    }
    // Parsing the decimal rendering rounds correctly; summing limbs would not.
    let as_f = wei.to_string().parse::<f64>().unwrap_or(f64::MAX);
    as_f / WEI_PER_ETHER
}

fn parse_wei(column: &str, v: &str) -> Result<U256> {
    // NUMERIC cells may come back with a zero fractional part.
    let digits = match v.split_once('.') {
        Some((whole, frac)) if frac.chars().all(|c| c == '0') => whole,
        Some(_) => return Err(Error::decode(column, format!("fractional wei value {v:?}"))),
        None => v,
    };
    U256::from_dec_str(digits).map_err(|e| Error::decode(column, format!("{v:?}: {e}")))
}

fn parse_integer(column: &str, v: &str) -> Result<u64> {
    v.parse::<u64>()
        .map_err(|e| Error::decode(column, format!("{v:?}: {e}")))
}

fn parse_hex<T>(column: &str, v: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    T::from_str(v).map_err(|e| Error::decode(column, format!("{v:?}: {e}")))
}

/// TIMESTAMP cells arrive as (possibly exponent-formatted) epoch seconds.
fn parse_timestamp(column: &str, v: &str) -> Result<DateTime<Utc>> {
    let secs = v
        .parse::<f64>()
        .map_err(|e| Error::decode(column, format!("{v:?}: {e}")))?;
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round() as u32;
    DateTime::<Utc>::from_timestamp(whole as i64, nanos.min(999_999_999))
        .ok_or_else(|| Error::decode(column, format!("{v:?} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::BAYC;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::Mutex;

    const ONE_ETHER: &str = "1000000000000000000";

    /// Serves canned rows, honouring the watermark clause the way the
    /// warehouse would.
    struct FakeWarehouse {
        rows: Vec<(u64, u64, &'static str)>,
        queries: Mutex<Vec<String>>,
    }

    impl FakeWarehouse {
        fn new(rows: Vec<(u64, u64, &'static str)>) -> Self {
            Self {
                rows,
                queries: Mutex::new(Vec::new()),
            }
        }

        fn query_count(&self) -> usize {
            self.queries.lock().unwrap().len()
        }

        fn last_query(&self) -> String {
            self.queries.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    fn watermark_in(sql: &str) -> Option<u64> {
        let marker = "token_transfers.block_number > ";
        let start = sql.find(marker)? + marker.len();
        let digits: String = sql[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }

    fn row(block: u64, log_index: u64, wei: &str) -> Vec<Option<String>> {
        vec![
            Some(wei.to_string()),
            Some("60000".to_string()),
            Some(format!("0x{:064x}", block * 100 + log_index)),
            Some(BAYC.to_lowercase()),
            Some((block % 10_000).to_string()),
            Some(format!("0x{:040x}", 1)),
            Some(format!("0x{:040x}", 2)),
            Some(log_index.to_string()),
            Some(block.to_string()),
            Some("1.6192765E9".to_string()),
            Some(format!("0x{:064x}", block)),
        ]
    }

    #[async_trait]
    impl Warehouse for FakeWarehouse {
        async fn run_query(&self, sql: &str) -> Result<ResultSet> {
            self.queries.lock().unwrap().push(sql.to_string());
            let since = watermark_in(sql);
            let mut rs = ResultSet::new(COLUMNS.iter().map(|c| c.to_string()).collect());
            rs.rows = self
                .rows
                .iter()
                .filter(|(block, _, _)| since.map_or(true, |w| *block > w))
                .map(|(block, log, wei)| row(*block, *log, wei))
                .collect();
            Ok(rs)
        }
    }

    struct FailingWarehouse;

    #[async_trait]
    impl Warehouse for FailingWarehouse {
        async fn run_query(&self, _sql: &str) -> Result<ResultSet> {
            Err(Error::upstream(Some(403), "Access Denied"))
        }
    }

    fn history() -> FakeWarehouse {
        FakeWarehouse::new(vec![
            (12_287_507, 0, "0"),
            (12_287_507, 1, "0"),
            (12_290_000, 0, "80000000000000000"),
            (12_300_111, 4, ONE_ETHER),
            (12_300_111, 5, "0"),
            (13_000_000, 2, "75000000000000000000"),
            (13_000_001, 0, "1"),
        ])
    }

    fn indexer(w: FakeWarehouse) -> CollectionIndexer<FakeWarehouse> {
        CollectionIndexer::new(w, WarehouseTables::default())
    }

    fn bayc() -> Address {
        crate::types::parse_address(BAYC).unwrap()
    }

    #[test]
    fn ether_is_wei_over_ten_to_the_eighteen() {
        assert_eq!(wei_to_ether(U256::zero()), 0.0);
        assert_eq!(wei_to_ether(U256::from_dec_str(ONE_ETHER).unwrap()), 1.0);
        assert_eq!(wei_to_ether(U256::from_dec_str("75000000000000000000").unwrap()), 75.0);
        assert_eq!(wei_to_ether(U256::from_dec_str("80000000000000000").unwrap()), 0.08);
        assert_eq!(wei_to_ether(U256::one()), 1e-18);
        assert!(wei_to_ether(U256::MAX) > 0.0);
    }

    #[tokio::test]
    async fn decodes_rows_and_derives_ether() {
        let rs = history().run_query("").await.unwrap();
        let table = decode_transfers(&rs).unwrap();
        assert_eq!(table.len(), 7);

        for (record, (_, _, wei)) in table.iter().zip(history().rows) {
            let wei = U256::from_dec_str(wei).unwrap();
            assert_eq!(record.ether, wei_to_ether(wei));
            assert_eq!(record.ether == 0.0, wei.is_zero());
        }

        let first = &table.rows()[0];
        assert_eq!(first.block_number, 12_287_507);
        assert_eq!(first.gas, Some(60_000));
        assert_eq!(first.token_id, "7507");
        assert_eq!(first.block_timestamp.map(|t| t.timestamp()), Some(1_619_276_500));
        assert_eq!(format!("0x{:x}", first.token_address), BAYC.to_lowercase());
    }

    #[test]
    fn missing_transaction_counts_as_zero_wei() {
        let mut rs = ResultSet::new(COLUMNS.iter().map(|c| c.to_string()).collect());
        let mut r = row(5, 0, "0");
        r[0] = None;
        r[1] = None;
        rs.rows.push(r);

        let table = decode_transfers(&rs).unwrap();
        assert_eq!(table.rows()[0].ether, 0.0);
        assert_eq!(table.rows()[0].gas, None);
    }

    #[test]
    fn numeric_with_zero_fraction_is_accepted() {
        assert_eq!(parse_wei("wei_value", "5000.000").unwrap(), U256::from(5000u64));
        assert!(matches!(
            parse_wei("wei_value", "0.5"),
            Err(Error::Decode { .. })
        ));
    }

    #[test]
    fn bad_cells_are_decode_errors() {
        let mut rs = ResultSet::new(COLUMNS.iter().map(|c| c.to_string()).collect());
        let mut r = row(5, 0, "0");
        r[8] = Some("not-a-block".into());
        rs.rows.push(r);

        match decode_transfers(&rs) {
            Err(Error::Decode { column, .. }) => assert_eq!(column, "block_number"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn watermark_is_max_block_and_requery_returns_newer_rows() {
        let idx = indexer(history());

        let full = idx.fetch_transfers(bayc(), None).await.unwrap();
        assert_eq!(full.transfers.len(), 7);
        assert_eq!(full.watermark, Some(13_000_001));
        assert!(!idx.warehouse().last_query().contains("block_number >"));

        let partial = idx.fetch_transfers(bayc(), Some(12_290_000)).await.unwrap();
        let sql = idx.warehouse().last_query();
        assert!(sql.contains("token_transfers.block_number > 12290000"));
        assert!(sql.contains("transactions.block_number > 12290000"));
        assert!(partial.transfers.iter().all(|r| r.block_number > 12_290_000));
        assert!(partial.transfers.len() < full.transfers.len());
        assert_eq!(partial.watermark, full.watermark);
    }

    #[tokio::test]
    async fn caught_up_query_keeps_watermark() {
        let idx = indexer(history());
        let outcome = idx.fetch_transfers(bayc(), Some(13_000_001)).await.unwrap();
        assert!(outcome.transfers.is_empty());
        assert_eq!(outcome.watermark, Some(13_000_001));
        assert!(!outcome.made_progress());
    }

    #[tokio::test]
    async fn partitions_collection_into_sales_and_transfers() {
        let idx = indexer(history());
        let source = TransferSource::Collection { address: bayc(), watermark: None };

        let sales = idx.sales(source.clone()).await.unwrap();
        let transfers = idx.transfers(source).await.unwrap();
        assert_eq!(sales.len(), 4);
        assert_eq!(transfers.len(), 3);
        assert!(sales.iter().all(|r| r.ether != 0.0));
        assert!(transfers.iter().all(|r| r.ether == 0.0));

        let keys = |t: &TransferTable| -> HashSet<(u64, u64)> {
            t.iter().map(|r| (r.block_number, r.log_index)).collect()
        };
        assert!(keys(&sales).is_disjoint(&keys(&transfers)));
    }

    #[tokio::test]
    async fn combined_retrieval_queries_once() {
        let idx = indexer(history());
        let (sales, transfers) = idx
            .sales_and_transfers(TransferSource::Collection { address: bayc(), watermark: None })
            .await
            .unwrap();
        assert_eq!(idx.warehouse().query_count(), 1);
        assert_eq!(sales.len() + transfers.len(), 7);
    }

    #[tokio::test]
    async fn table_source_never_touches_the_warehouse() {
        let idx = indexer(history());
        let table = idx.fetch_transfers(bayc(), None).await.unwrap().transfers;
        let before = idx.warehouse().query_count();

        let (sales, transfers) = idx.sales_and_transfers(table.clone().into()).await.unwrap();
        assert_eq!(sales.len(), 4);
        assert_eq!(transfers.len(), 3);

        let empty = idx.sales(TransferTable::default().into()).await.unwrap();
        assert!(empty.is_empty());
        assert_eq!(idx.warehouse().query_count(), before);
    }

    #[tokio::test]
    async fn sales_of_value_filters_inclusive_range() {
        let idx = indexer(history());
        let source = TransferSource::Collection { address: bayc(), watermark: None };

        let priced = idx.sales_of_value(source.clone(), 1.0, Some(0.08)).await.unwrap();
        let values: Vec<f64> = priced.iter().map(|r| r.ether).collect();
        assert_eq!(values, vec![0.08, 1.0]);

        // Default minimum of zero still excludes transfers: only sales are ranged.
        let cheap = idx.sales_of_value(source, 1.0, None).await.unwrap();
        assert_eq!(cheap.len(), 3);
        assert!(cheap.iter().all(|r| r.is_sale()));

        let again = idx.sales_of_value(priced.clone().into(), 1.0, Some(0.08)).await.unwrap();
        assert_eq!(again, priced);

        let all = idx.fetch_transfers(bayc(), None).await.unwrap().transfers;
        let from_mixed_table = idx.sales_of_value(all.into(), 1.0, None).await.unwrap();
        assert_eq!(from_mixed_table, cheap);
    }

    #[tokio::test]
    async fn sales_of_value_rejects_bad_bounds_before_querying() {
        let idx = indexer(history());
        let source = TransferSource::Collection { address: bayc(), watermark: None };
        let err = idx.sales_of_value(source, 1.0, Some(2.0)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(idx.warehouse().query_count(), 0);
    }

    #[tokio::test]
    async fn upstream_failures_propagate_typed() {
        let idx = CollectionIndexer::new(FailingWarehouse, WarehouseTables::default());
        let err = idx
            .sales(TransferSource::Collection { address: bayc(), watermark: None })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { status: Some(403), .. }));
    }
}
