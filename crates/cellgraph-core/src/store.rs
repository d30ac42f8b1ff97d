use std::collections::BTreeMap;

use crate::position::CellPosition;
use crate::value::{CellValue, EvalResult};

/// The authoritative mapping from position to raw input and computed value
///
/// Implemented by the host spreadsheet. The recalculation engine reads raw
/// inputs, reads and writes computed values, and uses the grid bounds to
/// reject out-of-range references.
pub trait CellStore {
    /// Raw user input of a cell (empty string for blank cells)
    fn raw_value(&self, position: CellPosition) -> String;

    /// Record raw user input for a cell
    fn set_raw_value(&mut self, position: CellPosition, raw: &str);

    /// Last computed value (`Ok(CellValue::Empty)` for blank cells)
    fn cached_value(&self, position: CellPosition) -> EvalResult;

    /// Store a computed value or error
    fn set_computed_value(&mut self, position: CellPosition, value: EvalResult);

    fn row_count(&self) -> u32;

    fn column_count(&self) -> u32;

    /// Positions of all non-blank cells, in row-major order
    fn positions(&self) -> Vec<CellPosition>;

    fn in_bounds(&self, position: CellPosition) -> bool {
        position.is_valid(self.row_count(), self.column_count())
    }
}

/// A stored cell: raw input plus its cached computed value
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub raw: String,
    pub value: EvalResult,
}

impl Default for Cell {
    fn default() -> Self {
        Cell {
            raw: String::new(),
            value: Ok(CellValue::Empty),
        }
    }
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && matches!(self.value, Ok(CellValue::Empty))
    }
}

/// In-memory sparse [`CellStore`]; only non-blank cells are stored
#[derive(Debug, Clone)]
pub struct Sheet {
    cells: BTreeMap<CellPosition, Cell>,
    rows: u32,
    columns: u32,
}

impl Default for Sheet {
    fn default() -> Self {
        Self::new(Self::MAX_ROWS, Self::MAX_COLUMNS)
    }
}

impl Sheet {
    /// Maximum number of rows (Excel compatibility)
    pub const MAX_ROWS: u32 = 1_048_576;
    /// Maximum number of columns (Column XFD)
    pub const MAX_COLUMNS: u32 = 16_384;

    pub fn new(rows: u32, columns: u32) -> Self {
        Sheet {
            cells: BTreeMap::new(),
            rows,
            columns,
        }
    }

    pub fn get_cell(&self, position: CellPosition) -> Option<&Cell> {
        self.cells.get(&position)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn cell_mut(&mut self, position: CellPosition) -> &mut Cell {
        self.cells.entry(position).or_default()
    }

    fn prune(&mut self, position: CellPosition) {
        if self.cells.get(&position).is_some_and(Cell::is_empty) {
            self.cells.remove(&position);
        }
    }
}

impl CellStore for Sheet {
    fn raw_value(&self, position: CellPosition) -> String {
        self.cells
            .get(&position)
            .map(|c| c.raw.clone())
            .unwrap_or_default()
    }

    fn set_raw_value(&mut self, position: CellPosition, raw: &str) {
        self.cell_mut(position).raw = raw.to_string();
        self.prune(position);
    }

    fn cached_value(&self, position: CellPosition) -> EvalResult {
        self.cells
            .get(&position)
            .map(|c| c.value.clone())
            .unwrap_or(Ok(CellValue::Empty))
    }

    fn set_computed_value(&mut self, position: CellPosition, value: EvalResult) {
        self.cell_mut(position).value = value;
        self.prune(position);
    }

    fn row_count(&self) -> u32 {
        self.rows
    }

    fn column_count(&self) -> u32 {
        self.columns
    }

    fn positions(&self) -> Vec<CellPosition> {
        self.cells.keys().copied().collect()
    }
}
