use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;
use tracing::debug;

use crate::types::{ExtractedReceipt, RuleOutcome};

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_known_retailer,
    r"(?i)\b(?:wal-mart|walmart|target|costco|kroger|safeway|whole +foods|cvs|walgreens|mcdonald's|starbucks|dollar +tree)\b");
re!(re_caps_header,
    r"^[A-Z][A-Z &]+$");

re!(re_date_numeric,
    r"\b(?:\d{1,2}/\d{1,2}/|\d{1,2}-\d{1,2}-)(?:\d{4}|\d{2})\b");
re!(re_date_year_first,
    r"\b\d{4}(?:/\d{1,2}/|-\d{1,2}-)\d{1,2}\b");
re!(re_date_month_name,
    r"(?i)\b(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?[ \t]+\d{1,2},?[ \t]+(?:\d{4}|\d{2})\b");

re!(re_amount_label,
    r"(?i)\b(?:total|amount|balance)(?:\s+due)?\b[:\s]*\$?\s*(\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)");
re!(re_two_decimal,
    r"\b(\d{1,3}(?:,\d{3})+\.\d{2}|\d+\.\d{2})\b");

// ── Rule tables ──────────────────────────────────────────────────────────────

/// A named extraction rule. Rules for a field are tried in order and the
/// first match wins.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub apply: fn(&str) -> RuleOutcome<String>,
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

pub const STORE_RULES: &[Rule] = &[
    Rule { name: "known_retailer", apply: known_retailer },
    Rule { name: "caps_header_line", apply: caps_header_line },
];

pub const DATE_RULES: &[Rule] = &[
    Rule { name: "numeric_date", apply: numeric_date },
    Rule { name: "year_first_date", apply: year_first_date },
    Rule { name: "month_name_date", apply: month_name_date },
];

pub const TOTAL_RULES: &[Rule] = &[
    Rule { name: "labeled_amount", apply: labeled_amount },
    Rule { name: "largest_amount", apply: largest_amount },
];

// ── Public extraction API ─────────────────────────────────────────────────────

pub struct Extractor;

impl Extractor {
    /// Extract structured fields from raw OCR text. Never fails; fields no
    /// rule matched are `None`.
    pub fn extract(ocr_text: &str) -> ExtractedReceipt {
        ExtractedReceipt {
            store_name: first_match("store_name", STORE_RULES, ocr_text),
            date_text: first_match("date", DATE_RULES, ocr_text),
            total_text: first_match("total", TOTAL_RULES, ocr_text),
            raw_text: ocr_text.to_string(),
        }
    }
}

fn first_match(field: &str, rules: &[Rule], text: &str) -> Option<String> {
    rules.iter().find_map(|rule| match (rule.apply)(text) {
        RuleOutcome::Matched(value) => {
            debug!(field, rule = rule.name, %value, "extraction rule matched");
            Some(value)
        }
        RuleOutcome::NoMatch => None,
    })
}

// ── Store name ────────────────────────────────────────────────────────────────

pub fn known_retailer(text: &str) -> RuleOutcome<String> {
    re_known_retailer()
        .find(text)
        .map(|m| m.as_str().to_string())
        .into()
}

/// First line of at least two characters made only of capitals, spaces and
/// `&`: the storefront header.
pub fn caps_header_line(text: &str) -> RuleOutcome<String> {
    text.lines()
        .map(str::trim)
        .find(|line| re_caps_header().is_match(line))
        .map(str::to_string)
        .into()
}

// ── Date ─────────────────────────────────────────────────────────────────────

pub fn numeric_date(text: &str) -> RuleOutcome<String> {
    find_str(re_date_numeric(), text)
}

pub fn year_first_date(text: &str) -> RuleOutcome<String> {
    find_str(re_date_year_first(), text)
}

pub fn month_name_date(text: &str) -> RuleOutcome<String> {
    find_str(re_date_month_name(), text)
}

fn find_str(re: &Regex, text: &str) -> RuleOutcome<String> {
    re.find(text).map(|m| m.as_str().to_string()).into()
}

// ── Total ────────────────────────────────────────────────────────────────────

/// The amount right after a TOTAL / AMOUNT / BALANCE label. With several
/// labels the largest amount is taken, so a grand total beats the lines
/// summed into it.
pub fn labeled_amount(text: &str) -> RuleOutcome<String> {
    largest(re_amount_label(), text)
}

/// Largest figure with exactly two decimal places anywhere in the text.
pub fn largest_amount(text: &str) -> RuleOutcome<String> {
    largest(re_two_decimal(), text)
}

fn largest(re: &Regex, text: &str) -> RuleOutcome<String> {
    re.captures_iter(text)
        .filter_map(|c| parse_amount_str(c.get(1)?.as_str()))
        .fold(None, |best: Option<(Decimal, String)>, (value, digits)| match best {
            Some((max, _)) if value <= max => best,
            _ => Some((value, digits)),
        })
        .map(|(_, digits)| digits)
        .into()
}

// ── Amount parsing ────────────────────────────────────────────────────────────

/// Strip thousands separators and parse. Returns the decimal alongside the
/// cleaned digits; negative or unparseable text yields `None`.
fn parse_amount_str(s: &str) -> Option<(Decimal, String)> {
    let clean = s.replace(',', "");
    let dec = Decimal::from_str(&clean).ok()?;
    (!dec.is_sign_negative()).then_some((dec, clean))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
