use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::FormulaError;

/// Result of evaluating a cell: a typed value or a typed error
pub type EvalResult = Result<CellValue, FormulaError>;

/// Serial number of 1899-12-30, the spreadsheet date epoch
fn date_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1899, 12, 30).unwrap_or_default()
}

/// Convert a date to its spreadsheet serial number (days since 1899-12-30)
pub fn date_to_serial(date: NaiveDate) -> f64 {
    (date - date_epoch()).num_days() as f64
}

/// Convert a spreadsheet serial number back to a date (fraction truncated)
pub fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() {
        return None;
    }
    let days = chrono::Duration::try_days(serial.trunc() as i64)?;
    date_epoch().checked_add_signed(days)
}

/// A computed cell value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Boolean(bool),
    Date(NaiveDate),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Coerce to a number for arithmetic
    ///
    /// Text coerces only when the whole (trimmed) string is a finite number;
    /// anything else yields `None` and the caller reports `#VALUE!`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            CellValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            CellValue::Empty => Some(0.0),
            CellValue::Date(d) => Some(date_to_serial(*d)),
            CellValue::Text(s) => parse_number(s),
        }
    }

    /// Render as text (used by `&` and the text functions)
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => format_number(*n),
            CellValue::Text(s) => s.clone(),
            CellValue::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    /// Truthiness for conditions
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            CellValue::Boolean(b) => Some(*b),
            CellValue::Number(n) => Some(*n != 0.0),
            CellValue::Empty => Some(false),
            CellValue::Date(_) => Some(true),
            CellValue::Text(s) => match s.trim().to_uppercase().as_str() {
                "TRUE" => Some(true),
                "FALSE" => Some(false),
                _ => None,
            },
        }
    }

    /// Type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Empty => "empty",
            CellValue::Number(_) => "number",
            CellValue::Text(_) => "text",
            CellValue::Boolean(_) => "boolean",
            CellValue::Date(_) => "date",
        }
    }
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Parse raw (non-formula) cell input into a value
///
/// Blank input is `Empty`; then booleans, numbers, ISO dates, and finally
/// text. Input starting with `=` is a formula and must not be passed here.
pub fn parse_literal(input: &str) -> CellValue {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return CellValue::Empty;
    }

    match trimmed.to_uppercase().as_str() {
        "TRUE" => return CellValue::Boolean(true),
        "FALSE" => return CellValue::Boolean(false),
        _ => {}
    }

    if let Some(num) = parse_number(trimmed) {
        return CellValue::Number(num);
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return CellValue::Date(date);
    }

    CellValue::Text(trimmed.to_string())
}
