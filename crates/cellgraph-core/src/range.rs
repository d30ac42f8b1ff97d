use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::FusedIterator;

use crate::position::CellPosition;

/// A rectangular block of cells (e.g., A1:B10)
///
/// Always normalized so that `start` is the top-left and `end` the
/// bottom-right corner. Covered positions are produced lazily by
/// [`CellRange::positions`]; a range is never materialized.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRange {
    pub start: CellPosition,
    pub end: CellPosition,
}

impl CellRange {
    pub fn new(start: CellPosition, end: CellPosition) -> Self {
        CellRange {
            start: CellPosition::new(start.row.min(end.row), start.column.min(end.column)),
            end: CellPosition::new(start.row.max(end.row), start.column.max(end.column)),
        }
    }

    /// Create from A1:B1 notation
    pub fn from_a1(notation: &str) -> Option<Self> {
        let parts: Vec<&str> = notation.split(':').collect();
        match parts.len() {
            1 => {
                let pos = CellPosition::from_a1(parts[0])?;
                Some(CellRange::new(pos, pos))
            }
            2 => {
                let start = CellPosition::from_a1(parts[0])?;
                let end = CellPosition::from_a1(parts[1])?;
                Some(CellRange::new(start, end))
            }
            _ => None,
        }
    }

    /// Convert to A1:B1 notation
    pub fn to_a1(&self) -> String {
        if self.start == self.end {
            self.start.to_a1()
        } else {
            format!("{}:{}", self.start.to_a1(), self.end.to_a1())
        }
    }

    /// Check if a position is within this range
    pub fn contains(&self, pos: CellPosition) -> bool {
        pos.row >= self.start.row
            && pos.row <= self.end.row
            && pos.column >= self.start.column
            && pos.column <= self.end.column
    }

    /// Check if the whole range lies inside a `max_rows` x `max_columns` grid
    pub fn is_valid(&self, max_rows: u32, max_columns: u32) -> bool {
        self.end.is_valid(max_rows, max_columns)
    }

    pub fn row_count(&self) -> u64 {
        u64::from(self.end.row - self.start.row) + 1
    }

    pub fn column_count(&self) -> u64 {
        u64::from(self.end.column - self.start.column) + 1
    }

    /// Total number of covered cells (u64: a full-sheet range overflows u32)
    pub fn cell_count(&self) -> u64 {
        self.row_count() * self.column_count()
    }

    /// Lazily iterate over covered positions, row by row
    pub fn positions(&self) -> RangeIter {
        RangeIter {
            range: *self,
            next: Some(self.start),
        }
    }

    /// Check if this range intersects with another range
    pub fn intersects(&self, other: &CellRange) -> bool {
        !(self.end.row < other.start.row
            || self.start.row > other.end.row
            || self.end.column < other.start.column
            || self.start.column > other.end.column)
    }

    pub fn is_single_cell(&self) -> bool {
        self.start == self.end
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_a1())
    }
}

impl IntoIterator for CellRange {
    type Item = CellPosition;
    type IntoIter = RangeIter;

    fn into_iter(self) -> Self::IntoIter {
        self.positions()
    }
}

/// Lazy, restartable iterator over the positions of a [`CellRange`]
///
/// Cloning the iterator restarts nothing; call [`CellRange::positions`] again
/// to start over.
#[derive(Debug, Clone)]
pub struct RangeIter {
    range: CellRange,
    next: Option<CellPosition>,
}

impl Iterator for RangeIter {
    type Item = CellPosition;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;

        self.next = if current.column < self.range.end.column {
            Some(CellPosition::new(current.row, current.column + 1))
        } else if current.row < self.range.end.row {
            Some(CellPosition::new(current.row + 1, self.range.start.column))
        } else {
            None
        };

        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.next {
            None => 0,
            Some(pos) => {
                let full_rows = u64::from(self.range.end.row - pos.row);
                let in_row = u64::from(self.range.end.column - pos.column) + 1;
                full_rows * self.range.column_count() + in_row
            }
        };
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }
}

impl FusedIterator for RangeIter {}
