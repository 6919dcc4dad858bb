use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// The row handed to the receipt store once a user confirms an upload.
///
/// Field names are the ones the `receipts` table accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRecord {
    pub date: NaiveDate,
    pub store_name: String,
    pub total: Money,
    pub upload_timestamp: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_raw_text: Option<String>,
}

impl ReceiptRecord {
    /// Whether the total is still the zero placeholder used when nothing was extracted.
    pub fn has_placeholder_total(&self) -> bool {
        self.total.is_zero()
    }
}
