use cellgraph_core::{CellValue, EvalResult, FormulaError};

use super::{expect_args, OperandResult};

/// CONCAT - Concatenate the text of every value, ranges included
pub fn concat(operands: impl IntoIterator<Item = OperandResult>) -> EvalResult {
    let mut result = String::new();
    for operand in operands {
        result.push_str(&operand?.value().as_text());
    }
    Ok(CellValue::Text(result))
}

fn single_text(name: &str, values: &[CellValue]) -> Result<String, FormulaError> {
    expect_args(name, values.len(), 1, 1)?;
    Ok(values[0].as_text())
}

/// LEN - Length of text in characters
pub fn len(values: &[CellValue]) -> EvalResult {
    let text = single_text("LEN", values)?;
    Ok(CellValue::Number(text.chars().count() as f64))
}

/// UPPER - Convert to uppercase
pub fn upper(values: &[CellValue]) -> EvalResult {
    Ok(CellValue::Text(single_text("UPPER", values)?.to_uppercase()))
}

/// LOWER - Convert to lowercase
pub fn lower(values: &[CellValue]) -> EvalResult {
    Ok(CellValue::Text(single_text("LOWER", values)?.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::Operand;
    use cellgraph_core::ErrorKind;

    #[test]
    fn test_concat() {
        let operands = vec![
            Ok(Operand::Direct(CellValue::Text("Hello".to_string()))),
            Ok(Operand::Direct(CellValue::Text(" ".to_string()))),
            Ok(Operand::Referenced(CellValue::Number(42.0))),
            Ok(Operand::Referenced(CellValue::Empty)),
        ];
        assert_eq!(concat(operands), Ok(CellValue::Text("Hello 42".to_string())));
    }

    #[test]
    fn test_concat_propagates_errors() {
        let operands = vec![
            Ok(Operand::Direct(CellValue::Text("a".to_string()))),
            Err(FormulaError::reference("out of bounds")),
        ];
        assert_eq!(concat(operands).unwrap_err().kind, ErrorKind::Ref);
    }

    #[test]
    fn test_len_counts_characters() {
        assert_eq!(
            len(&[CellValue::Text("héllo".to_string())]),
            Ok(CellValue::Number(5.0))
        );
        assert_eq!(len(&[CellValue::Number(123.0)]), Ok(CellValue::Number(3.0)));
    }

    #[test]
    fn test_case_conversion() {
        assert_eq!(
            upper(&[CellValue::Text("hello".to_string())]),
            Ok(CellValue::Text("HELLO".to_string()))
        );
        assert_eq!(
            lower(&[CellValue::Boolean(true)]),
            Ok(CellValue::Text("true".to_string()))
        );
        assert_eq!(upper(&[]).unwrap_err().kind, ErrorKind::Value);
    }
}
