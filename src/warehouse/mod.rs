pub mod bigquery;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{Error, Result};

pub use bigquery::{BigQueryClient, BigQueryConfig};

/// Something that runs a SQL statement and hands back every row.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn run_query(&self, sql: &str) -> Result<ResultSet>;
}

#[async_trait]
impl<W: Warehouse + ?Sized> Warehouse for std::sync::Arc<W> {
    async fn run_query(&self, sql: &str) -> Result<ResultSet> {
        (**self).run_query(sql).await
    }
}

/// Materialised tabular result. Cells are the warehouse's string rendering,
/// `None` for SQL NULL.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column name to position, failing on the first missing column.
    pub fn column_index(&self, required: &[&str]) -> Result<HashMap<String, usize>> {
        let positions: HashMap<&str, usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();
        required
            .iter()
            .map(|name| {
                positions
                    .get(name)
                    .map(|&i| (name.to_string(), i))
                    .ok_or_else(|| Error::decode(*name, "column missing from result"))
            })
            .collect()
    }
}
