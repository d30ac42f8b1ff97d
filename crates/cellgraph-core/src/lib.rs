pub mod error;
pub mod position;
pub mod range;
pub mod store;
pub mod value;

pub use error::{ErrorKind, FormulaError};
pub use position::{col_from_label, col_to_label, CellPosition};
pub use range::{CellRange, RangeIter};
pub use store::{Cell, CellStore, Sheet};
pub use value::{date_to_serial, parse_literal, serial_to_date, CellValue, EvalResult};
