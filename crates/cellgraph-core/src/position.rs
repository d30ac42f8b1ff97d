use serde::{Deserialize, Serialize};
use std::fmt;

/// Cell position (0-indexed internally)
///
/// Ordering is row-major: `(row, column)`. The dependency graph relies on this
/// ordering for its deterministic tie-break.
#[derive(
    Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct CellPosition {
    pub row: u32,
    pub column: u32,
}

impl CellPosition {
    pub const fn new(row: u32, column: u32) -> Self {
        CellPosition { row, column }
    }

    /// Create from A1 notation (e.g., "A1" -> (0, 0), "B2" -> (1, 1))
    ///
    /// Dollar signs are accepted and ignored.
    pub fn from_a1(notation: &str) -> Option<Self> {
        let notation = notation.trim();
        let mut col_str = String::new();
        let mut row_str = String::new();

        for c in notation.chars() {
            if c == '$' {
                continue;
            }
            if c.is_ascii_alphabetic() {
                if !row_str.is_empty() {
                    return None; // Letters after numbers
                }
                col_str.push(c);
            } else if c.is_ascii_digit() {
                row_str.push(c);
            } else {
                return None;
            }
        }

        if col_str.is_empty() || row_str.is_empty() {
            return None;
        }

        let column = col_from_label(&col_str)?;
        let row: u32 = row_str.parse().ok()?;

        if row == 0 {
            return None; // Rows are 1-indexed in A1 notation
        }

        Some(CellPosition {
            row: row - 1,
            column,
        })
    }

    /// Convert to A1 notation (e.g., (0, 0) -> "A1")
    pub fn to_a1(&self) -> String {
        format!("{}{}", col_to_label(self.column), u64::from(self.row) + 1)
    }

    /// Canonical node key, `"{row}-{column}"`
    pub fn key(&self) -> String {
        format!("{}-{}", self.row, self.column)
    }

    /// Parse a canonical node key produced by [`CellPosition::key`]
    pub fn from_key(key: &str) -> Option<Self> {
        let (row, column) = key.split_once('-')?;
        Some(CellPosition {
            row: row.parse().ok()?,
            column: column.parse().ok()?,
        })
    }

    /// Check if this position is within bounds
    pub fn is_valid(&self, max_rows: u32, max_columns: u32) -> bool {
        self.row < max_rows && self.column < max_columns
    }
}

impl fmt::Display for CellPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_a1())
    }
}

/// Convert column index (0-indexed) to label (A, B, ..., Z, AA, AB, ...)
pub fn col_to_label(column: u32) -> String {
    let mut label = String::new();
    let mut n = u64::from(column) + 1;

    while n > 0 {
        n -= 1;
        label.insert(0, char::from(b'A' + (n % 26) as u8));
        n /= 26;
    }

    label
}

/// Convert column label (A, B, ..., Z, AA, AB, ...) to index (0-indexed)
///
/// Case-insensitive. Returns `None` for empty labels, non-letters, or labels
/// that overflow a `u32` column index.
pub fn col_from_label(label: &str) -> Option<u32> {
    let mut column: u32 = 0;

    for c in label.chars() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = c.to_ascii_uppercase() as u32 - 'A' as u32 + 1;
        column = column.checked_mul(26)?.checked_add(digit)?;
    }

    column.checked_sub(1)
}
