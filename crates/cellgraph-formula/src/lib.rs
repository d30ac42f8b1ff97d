pub mod ast;
pub mod config;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use config::{ConfigError, EngineConfig, RecalcMode};
pub use dependency::{CircularReference, DependencyGraph, DependencyNode};
pub use engine::{CellState, Engine, RecalcReport};
pub use error::EngineError;
pub use evaluator::{CellResolver, EvalGuard, Evaluator, FnResolver};
pub use lexer::{CellReference, Lexer, Operator, RangeReference, Token};
pub use parser::{parse, ExpressionParser, ParsedFormula, MAX_NESTING};

use cellgraph_core::{CellPosition, CellRange, EvalResult};

/// Parse and evaluate a single formula against a lookup function
///
/// References outside `rows` x `columns` evaluate to `#REF!`. No recursion
/// or cycle tracking happens here; `resolve` returns final values.
pub fn evaluate_formula(
    formula: &str,
    rows: u32,
    columns: u32,
    resolve: impl FnMut(CellPosition) -> EvalResult,
) -> EvalResult {
    let parsed = parse(formula)?;
    let mut resolver = FnResolver::new(rows, columns, resolve);
    let mut guard = EvalGuard::new(EngineConfig::DEFAULT_MAX_DEPTH);
    Evaluator::new(&mut resolver, &mut guard).evaluate(&parsed)
}

/// Cell and range references of a formula (empty if it does not tokenize)
pub fn extract_references(formula: &str) -> (Vec<CellPosition>, Vec<CellRange>) {
    match parse(formula) {
        Ok(parsed) => (parsed.dependencies, parsed.cell_ranges),
        Err(_) => (Vec::new(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellgraph_core::{CellValue, ErrorKind};

    #[test]
    fn test_evaluate_formula() {
        let result = evaluate_formula("=A1 * 2 + SUM(B1:B2)", 10, 10, |pos| {
            Ok(CellValue::Number(f64::from(pos.row + pos.column + 1)))
        });
        // A1 = 1, B1 = 2, B2 = 3
        assert_eq!(result, Ok(CellValue::Number(7.0)));

        let result = evaluate_formula("no equals", 10, 10, |_| Ok(CellValue::Empty));
        assert_eq!(result.unwrap_err().kind, ErrorKind::Syntax);
    }

    #[test]
    fn test_deeply_nested_formula_is_a_value() {
        let formula = format!("={}1", "-".repeat(200_000));
        let result = evaluate_formula(&formula, 10, 10, |_| Ok(CellValue::Empty));
        assert_eq!(result.unwrap_err().kind, ErrorKind::Syntax);

        let formula = format!("={}1{}", "(".repeat(100), ")".repeat(100));
        let result = evaluate_formula(&formula, 10, 10, |_| Ok(CellValue::Empty));
        assert_eq!(result, Ok(CellValue::Number(1.0)));
    }

    #[test]
    fn test_extract_references() {
        let (cells, ranges) = extract_references("=A1 + SUM(B1:C3) + $A$1");
        assert_eq!(cells, vec![CellPosition::new(0, 0)]);
        assert_eq!(ranges, vec![CellRange::from_a1("B1:C3").unwrap()]);

        assert_eq!(extract_references("=\"unclosed"), (Vec::new(), Vec::new()));
    }
}
