pub mod datetime;
pub mod logical;
pub mod math;
pub mod text;

use cellgraph_core::{CellValue, FormulaError};

/// Names the tokenizer recognizes as functions even without a following `(`
pub const FUNCTION_NAMES: &[&str] = &[
    // Math
    "SUM", "AVERAGE", "COUNT", "COUNTA", "MIN", "MAX", "ABS", "ROUND", "SQRT", "POWER",
    // Logical
    "IF", "IFERROR", "AND", "OR", "NOT",
    // Text
    "CONCAT", "LEN", "UPPER", "LOWER",
    // Date
    "DATE", "YEAR", "MONTH", "DAY",
];

pub fn is_known_function(name: &str) -> bool {
    FUNCTION_NAMES
        .iter()
        .any(|known| known.eq_ignore_ascii_case(name))
}

/// One argument value fed to a variadic function
///
/// Spreadsheet functions treat values typed directly into the formula
/// differently from values read out of referenced cells: `SUM("x")` is an
/// error, while a text cell inside `SUM(A1:A3)` is skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Literal or computed argument
    Direct(CellValue),
    /// Value read from a referenced cell or range
    Referenced(CellValue),
}

impl Operand {
    pub fn value(&self) -> &CellValue {
        match self {
            Operand::Direct(v) | Operand::Referenced(v) => v,
        }
    }
}

/// Stream of operands; errors from referenced cells arrive in-band
pub type OperandResult = Result<Operand, FormulaError>;

/// Check the argument count of a fixed-arity function
pub fn expect_args(name: &str, count: usize, min: usize, max: usize) -> Result<(), FormulaError> {
    if count < min || count > max {
        let expected = if min == max {
            format!("{}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(FormulaError::value(format!(
            "{} expects {} argument(s), got {}",
            name, expected, count
        )));
    }
    Ok(())
}
