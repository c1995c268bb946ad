//! Row predicates over an in-memory [`TransferTable`].

use crate::error::{Error, Result};
use crate::types::TransferTable;

/// Rows whose transaction carried value.
pub fn sales(table: &TransferTable) -> TransferTable {
    table.retain_where(|r| r.is_sale())
}

/// Rows whose transaction carried no value.
pub fn transfers(table: &TransferTable) -> TransferTable {
    table.retain_where(|r| !r.is_sale())
}

/// Splits a table into `(sales, transfers)` in a single pass.
pub fn partition(table: &TransferTable) -> (TransferTable, TransferTable) {
    let (sales, transfers): (Vec<_>, Vec<_>) = table.iter().cloned().partition(|r| r.is_sale());
    (TransferTable::new(sales), TransferTable::new(transfers))
}

/// Inclusive ether bounds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueRange {
    min: f64,
    max: f64,
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(Error::invalid_argument(format!(
                "value bounds must be finite (min={min}, max={max})"
            )));
        }
        if min > max {
            return Err(Error::invalid_argument(format!(
                "minimum value {min} exceeds maximum {max}"
            )));
        }
        Ok(Self { min, max })
    }

    /// `[0, max]`
    pub fn up_to(max: f64) -> Result<Self> {
        Self::new(0.0, max)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn contains(&self, ether: f64) -> bool {
        ether >= self.min && ether <= self.max
    }
}

pub fn within_value(table: &TransferTable, range: ValueRange) -> TransferTable {
    table.retain_where(|r| range.contains(r.ether))
}
