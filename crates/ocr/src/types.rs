use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use mileage_core::{Money, ReceiptRecord};
use serde::{Deserialize, Serialize};

use crate::dates::parse_date_text;

/// One of the four axis-aligned rotations tried during orientation search.
/// Angles are clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Search order; earlier entries win ties.
    pub const SEARCH_ORDER: [Rotation; 4] =
        [Rotation::Deg0, Rotation::Deg90, Rotation::Deg180, Rotation::Deg270];

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

impl From<Rotation> for u16 {
    fn from(r: Rotation) -> u16 {
        r.degrees()
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;
    fn try_from(degrees: u16) -> Result<Self, Self::Error> {
        match degrees {
            0 => Ok(Rotation::Deg0),
            90 => Ok(Rotation::Deg90),
            180 => Ok(Rotation::Deg180),
            270 => Ok(Rotation::Deg270),
            other => Err(format!("Unsupported rotation: {other}°")),
        }
    }
}

/// Raw output of the OCR engine for one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub text: String,
    /// Per-token confidence, 0–100. Engines report layout rows as -1.
    pub token_confidences: Vec<i32>,
}

/// A single trial rotation and what the OCR engine made of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientationCandidate {
    pub rotation: Rotation,
    pub recognized_text: String,
    pub token_confidences: Vec<i32>,
}

impl OrientationCandidate {
    pub fn new(rotation: Rotation, output: OcrOutput) -> Self {
        Self {
            rotation,
            recognized_text: output.text,
            token_confidences: output.token_confidences,
        }
    }

    /// Mean confidence over tokens scoring above zero; 0.0 when there are none.
    pub fn mean_confidence(&self) -> f32 {
        let (sum, count) = self
            .token_confidences
            .iter()
            .filter(|&&c| c > 0)
            .fold((0i64, 0u32), |(s, n), &c| (s + i64::from(c), n + 1));
        if count == 0 {
            0.0
        } else {
            sum as f32 / count as f32
        }
    }
}

/// Result of a single extraction rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome<T> {
    Matched(T),
    NoMatch,
}

impl<T> RuleOutcome<T> {
    pub fn is_match(&self) -> bool {
        matches!(self, RuleOutcome::Matched(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            RuleOutcome::Matched(v) => Some(v),
            RuleOutcome::NoMatch => None,
        }
    }
}

impl<T> From<Option<T>> for RuleOutcome<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => RuleOutcome::Matched(v),
            None => RuleOutcome::NoMatch,
        }
    }
}

/// Best-effort fields pulled out of receipt OCR text.
///
/// Each field is independent; `None` means no rule matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedReceipt {
    /// Substring of `raw_text`, case as matched.
    pub store_name: Option<String>,
    /// Substring of `raw_text`, not yet parsed.
    pub date_text: Option<String>,
    /// Non-negative decimal without currency symbol or separators.
    pub total_text: Option<String>,
    pub raw_text: String,
}

impl ExtractedReceipt {
    pub fn empty(raw_text: impl Into<String>) -> Self {
        Self {
            store_name: None,
            date_text: None,
            total_text: None,
            raw_text: raw_text.into(),
        }
    }

    /// True when no field was extracted.
    pub fn is_empty(&self) -> bool {
        self.store_name.is_none() && self.date_text.is_none() && self.total_text.is_none()
    }

    pub fn total(&self) -> Option<Money> {
        self.total_text.as_deref().and_then(Money::parse)
    }

    /// Calendar date of the receipt, or `fallback` when none was found or it
    /// does not parse.
    pub fn date_or(&self, fallback: NaiveDate) -> NaiveDate {
        parse_date_text(self.date_text.as_deref().unwrap_or(""), fallback)
    }

    /// Build the record handed to the receipt store. Missing fields become an
    /// empty store name, a zero total and `today`'s date.
    pub fn to_record(&self, today: NaiveDate, uploaded_at: NaiveDateTime) -> ReceiptRecord {
        ReceiptRecord {
            date: self.date_or(today),
            store_name: self.store_name.clone().unwrap_or_default(),
            total: self.total().unwrap_or_else(Money::zero),
            upload_timestamp: uploaded_at,
            ocr_raw_text: Some(self.raw_text.clone()).filter(|t| !t.is_empty()),
        }
    }
}
