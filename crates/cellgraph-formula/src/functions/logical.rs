use cellgraph_core::{CellValue, EvalResult, FormulaError};

use super::{expect_args, Operand, OperandResult};

/// Interpret a value as a condition (used by IF and NOT)
pub fn truthiness(value: &CellValue) -> Result<bool, FormulaError> {
    value.as_boolean().ok_or_else(|| {
        FormulaError::value(format!("cannot use {} as a condition", value.type_name()))
    })
}

/// Collect the logical values of an operand stream
///
/// Referenced text and blanks are skipped; if nothing logical remains the
/// result is `#VALUE!`.
fn logicals(
    name: &str,
    operands: impl IntoIterator<Item = OperandResult>,
) -> Result<Vec<bool>, FormulaError> {
    let mut values = Vec::new();
    for operand in operands {
        match operand? {
            Operand::Referenced(CellValue::Text(_)) | Operand::Referenced(CellValue::Empty) => {}
            operand => values.push(truthiness(operand.value())?),
        }
    }

    if values.is_empty() {
        return Err(FormulaError::value(format!(
            "{} needs at least one logical value",
            name
        )));
    }
    Ok(values)
}

/// AND - Logical AND of all values
pub fn and(operands: impl IntoIterator<Item = OperandResult>) -> EvalResult {
    let values = logicals("AND", operands)?;
    Ok(CellValue::Boolean(values.into_iter().all(|b| b)))
}

/// OR - Logical OR of all values
pub fn or(operands: impl IntoIterator<Item = OperandResult>) -> EvalResult {
    let values = logicals("OR", operands)?;
    Ok(CellValue::Boolean(values.into_iter().any(|b| b)))
}

/// NOT - Logical NOT
pub fn not(values: &[CellValue]) -> EvalResult {
    expect_args("NOT", values.len(), 1, 1)?;
    Ok(CellValue::Boolean(!truthiness(&values[0])?))
}
