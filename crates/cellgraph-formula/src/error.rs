use cellgraph_core::CellPosition;
use thiserror::Error;

use crate::config::ConfigError;

/// Hard failures that abort an engine operation
///
/// Problems with a cell's formula are never reported here; they are stored
/// in the cell as a [`cellgraph_core::FormulaError`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Position {position} is outside the {rows}x{columns} grid")]
    OutOfBounds {
        position: CellPosition,
        rows: u32,
        columns: u32,
    },

    #[error("Dependency graph invariant broken at {position}: {detail}")]
    BrokenInvariant {
        position: CellPosition,
        detail: String,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
