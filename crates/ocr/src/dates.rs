//! Calendar parsing for the date substrings the extractor pulls off receipts.

use chrono::{Datelike, Local, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldOrder {
    MonthDayYear,
    DayMonthYear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateFormat {
    /// `chrono` pattern with a four-digit year.
    Pattern(&'static str),
    /// Numeric date with a two-digit year, see [`expand_two_digit_year`].
    ShortYear { order: FieldOrder, sep: char },
}

use DateFormat::{Pattern, ShortYear};
use FieldOrder::{DayMonthYear, MonthDayYear};

/// Tried in order; the first format that fully matches a valid date wins.
const DATE_FORMATS: [DateFormat; 14] = [
    ShortYear { order: MonthDayYear, sep: '/' },
    Pattern("%m/%d/%Y"),
    ShortYear { order: MonthDayYear, sep: '-' },
    Pattern("%m-%d-%Y"),
    Pattern("%Y-%m-%d"),
    ShortYear { order: DayMonthYear, sep: '/' },
    Pattern("%d/%m/%Y"),
    Pattern("%B %d, %Y"),
    Pattern("%b %d, %Y"),
    Pattern("%B %d %Y"),
    Pattern("%b %d %Y"),
    // Remaining shapes the extractor's date rules accept.
    Pattern("%Y/%m/%d"),
    ShortYear { order: DayMonthYear, sep: '-' },
    Pattern("%d-%m-%Y"),
];

/// Parse OCR date text into a calendar date, returning `fallback` when the
/// text is empty or matches no known format. Never fails.
pub fn parse_date_text(text: &str, fallback: NaiveDate) -> NaiveDate {
    let text = normalize_month_name(text.trim());
    if text.is_empty() {
        return fallback;
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| format.parse(&text))
        .unwrap_or(fallback)
}

/// [`parse_date_text`] with the local calendar date as fallback.
pub fn parse_date_text_or_today(text: &str) -> NaiveDate {
    parse_date_text(text, Local::now().date_naive())
}

/// Two-digit years below 50 are 20xx, the rest 19xx.
pub fn expand_two_digit_year(year: u32) -> i32 {
    let year = year as i32;
    match year {
        0..=49 => 2000 + year,
        50..=99 => 1900 + year,
        _ => year,
    }
}

impl DateFormat {
    fn parse(self, text: &str) -> Option<NaiveDate> {
        match self {
            // `%Y` also takes one to three digits; those are never four-digit years.
            Pattern(pattern) => NaiveDate::parse_from_str(text, pattern)
                .ok()
                .filter(|date| date.year() >= 1000),
            ShortYear { order, sep } => parse_short_year(text, order, sep),
        }
    }
}

fn parse_short_year(text: &str, order: FieldOrder, sep: char) -> Option<NaiveDate> {
    let mut parts = text.split(sep);
    let fields = [parts.next()?, parts.next()?, parts.next()?];
    if parts.next().is_some() || fields.iter().any(|f| f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }

    let (y, m, d) = match order {
        MonthDayYear => (fields[2], fields[0], fields[1]),
        DayMonthYear => (fields[2], fields[1], fields[0]),
    };
    if y.len() != 2 || m.len() > 2 || d.len() > 2 {
        return None;
    }

    let year = expand_two_digit_year(y.parse().ok()?);
    NaiveDate::from_ymd_opt(year, m.parse().ok()?, d.parse().ok()?)
}

/// Bring month-name dates into the shape the `%b`/`%B` patterns read:
/// `Jul.` and `Sept` become `Jul` and `Sep`, a trailing two-digit year is
/// expanded. Numeric text is returned unchanged.
fn normalize_month_name(text: &str) -> String {
    let mut words: Vec<String> = text.split_whitespace().map(str::to_string).collect();
    if words.len() < 2 || !words[0].starts_with(|c: char| c.is_ascii_alphabetic()) {
        return text.to_string();
    }

    let month = words[0].trim_end_matches('.');
    words[0] = if month.eq_ignore_ascii_case("sept") { "Sep".to_string() } else { month.to_string() };

    if let Some(year) = words.last_mut() {
        if year.len() == 2 {
            if let Ok(short) = year.parse::<u32>() {
                *year = expand_two_digit_year(short).to_string();
            }
        }
    }
    words.join(" ")
}
