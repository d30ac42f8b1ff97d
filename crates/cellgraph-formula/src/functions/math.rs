use cellgraph_core::{date_to_serial, CellValue, EvalResult, FormulaError};

use super::{expect_args, Operand, OperandResult};

/// Numeric contribution of an operand to an aggregate
///
/// Direct arguments must coerce (`SUM("x")` is `#VALUE!`); referenced text,
/// booleans and blanks are skipped.
fn numeric(operand: &Operand) -> Result<Option<f64>, FormulaError> {
    match operand {
        Operand::Direct(value) => value.as_number().map(Some).ok_or_else(|| {
            FormulaError::value(format!("cannot use {} as a number", value.type_name()))
        }),
        Operand::Referenced(CellValue::Number(n)) => Ok(Some(*n)),
        Operand::Referenced(CellValue::Date(d)) => Ok(Some(date_to_serial(*d))),
        Operand::Referenced(_) => Ok(None),
    }
}

fn fold_numbers(
    operands: impl IntoIterator<Item = OperandResult>,
    mut f: impl FnMut(f64),
) -> Result<usize, FormulaError> {
    let mut count = 0;
    for operand in operands {
        if let Some(n) = numeric(&operand?)? {
            f(n);
            count += 1;
        }
    }
    Ok(count)
}

/// SUM - Sum all numeric values
pub fn sum(operands: impl IntoIterator<Item = OperandResult>) -> EvalResult {
    let mut total = 0.0;
    fold_numbers(operands, |n| total += n)?;
    Ok(CellValue::Number(total))
}

/// AVERAGE - Average of numeric values
pub fn average(operands: impl IntoIterator<Item = OperandResult>) -> EvalResult {
    let mut total = 0.0;
    let count = fold_numbers(operands, |n| total += n)?;

    if count == 0 {
        Err(FormulaError::div_zero())
    } else {
        Ok(CellValue::Number(total / count as f64))
    }
}

/// COUNT - Count numeric values; errors and non-numeric values are ignored
pub fn count(operands: impl IntoIterator<Item = OperandResult>) -> EvalResult {
    let count = operands
        .into_iter()
        .filter(|operand| match operand {
            Ok(Operand::Direct(v)) => v.as_number().is_some(),
            Ok(Operand::Referenced(v)) => matches!(v, CellValue::Number(_) | CellValue::Date(_)),
            Err(_) => false,
        })
        .count();

    Ok(CellValue::Number(count as f64))
}

/// COUNTA - Count non-empty values, errors included
pub fn counta(operands: impl IntoIterator<Item = OperandResult>) -> EvalResult {
    let count = operands
        .into_iter()
        .filter(|operand| match operand {
            Ok(Operand::Referenced(CellValue::Empty)) => false,
            Ok(_) | Err(_) => true,
        })
        .count();

    Ok(CellValue::Number(count as f64))
}

/// MIN - Minimum numeric value (0 when there is none)
pub fn min(operands: impl IntoIterator<Item = OperandResult>) -> EvalResult {
    let mut result: Option<f64> = None;
    fold_numbers(operands, |n| result = Some(result.map_or(n, |r| r.min(n))))?;
    Ok(CellValue::Number(result.unwrap_or(0.0)))
}

/// MAX - Maximum numeric value (0 when there is none)
pub fn max(operands: impl IntoIterator<Item = OperandResult>) -> EvalResult {
    let mut result: Option<f64> = None;
    fold_numbers(operands, |n| result = Some(result.map_or(n, |r| r.max(n))))?;
    Ok(CellValue::Number(result.unwrap_or(0.0)))
}

fn number_arg(name: &str, value: &CellValue) -> Result<f64, FormulaError> {
    value.as_number().ok_or_else(|| {
        FormulaError::value(format!("{} expects a number, got {}", name, value.type_name()))
    })
}

fn finite(name: &str, n: f64) -> EvalResult {
    if n.is_finite() {
        Ok(CellValue::Number(n))
    } else {
        Err(FormulaError::num(format!("{} result is not a finite number", name)))
    }
}

/// ABS - Absolute value
pub fn abs(values: &[CellValue]) -> EvalResult {
    expect_args("ABS", values.len(), 1, 1)?;
    Ok(CellValue::Number(number_arg("ABS", &values[0])?.abs()))
}

/// ROUND - Round half away from zero to the given number of digits
pub fn round(values: &[CellValue]) -> EvalResult {
    expect_args("ROUND", values.len(), 1, 2)?;
    let num = number_arg("ROUND", &values[0])?;
    let digits = match values.get(1) {
        Some(v) => number_arg("ROUND", v)?.trunc() as i32,
        None => 0,
    };

    let factor = 10_f64.powi(digits);
    if factor == 0.0 {
        // Rounding away every representable digit
        return Ok(CellValue::Number(0.0));
    }
    let scaled = num * factor;
    if !scaled.is_finite() {
        // More digits than an f64 carries
        return Ok(CellValue::Number(num));
    }
    finite("ROUND", scaled.round() / factor)
}

/// SQRT - Square root; negative input is `#NUM!`
pub fn sqrt(values: &[CellValue]) -> EvalResult {
    expect_args("SQRT", values.len(), 1, 1)?;
    let n = number_arg("SQRT", &values[0])?;
    if n < 0.0 {
        return Err(FormulaError::num("SQRT of a negative number"));
    }
    Ok(CellValue::Number(n.sqrt()))
}

/// POWER - Raise to power
pub fn power(values: &[CellValue]) -> EvalResult {
    expect_args("POWER", values.len(), 2, 2)?;
    let base = number_arg("POWER", &values[0])?;
    let exp = number_arg("POWER", &values[1])?;
    finite("POWER", base.powf(exp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellgraph_core::ErrorKind;

    fn referenced(values: Vec<CellValue>) -> Vec<OperandResult> {
        values.into_iter().map(|v| Ok(Operand::Referenced(v))).collect()
    }

    #[test]
    fn test_sum_skips_referenced_text() {
        let operands = referenced(vec![
            CellValue::Number(10.0),
            CellValue::Text("x".to_string()),
            CellValue::Number(30.0),
            CellValue::Empty,
        ]);
        assert_eq!(sum(operands), Ok(CellValue::Number(40.0)));
    }

    #[test]
    fn test_sum_rejects_direct_text() {
        let operands = vec![Ok(Operand::Direct(CellValue::Text("x".to_string())))];
        assert_eq!(sum(operands).unwrap_err().kind, ErrorKind::Value);

        let operands = vec![
            Ok(Operand::Direct(CellValue::Text("5".to_string()))),
            Ok(Operand::Direct(CellValue::Boolean(true))),
        ];
        assert_eq!(sum(operands), Ok(CellValue::Number(6.0)));
    }

    #[test]
    fn test_sum_propagates_errors() {
        let operands = vec![
            Ok(Operand::Referenced(CellValue::Number(1.0))),
            Err(FormulaError::div_zero()),
        ];
        assert_eq!(sum(operands).unwrap_err().kind, ErrorKind::DivZero);
    }

    #[test]
    fn test_average() {
        let operands = referenced(vec![
            CellValue::Number(2.0),
            CellValue::Text("skip".to_string()),
            CellValue::Number(4.0),
        ]);
        assert_eq!(average(operands), Ok(CellValue::Number(3.0)));
        assert_eq!(
            average(referenced(vec![CellValue::Empty])).unwrap_err().kind,
            ErrorKind::DivZero
        );
    }

    #[test]
    fn test_count_and_counta() {
        let operands = || {
            let mut ops = referenced(vec![
                CellValue::Number(1.0),
                CellValue::Text("hello".to_string()),
                CellValue::Number(2.0),
                CellValue::Empty,
            ]);
            ops.push(Err(FormulaError::div_zero()));
            ops
        };
        assert_eq!(count(operands()), Ok(CellValue::Number(2.0)));
        assert_eq!(counta(operands()), Ok(CellValue::Number(4.0)));
    }

    #[test]
    fn test_min_max() {
        let values = vec![
            CellValue::Number(5.0),
            CellValue::Number(2.0),
            CellValue::Number(8.0),
        ];
        assert_eq!(min(referenced(values.clone())), Ok(CellValue::Number(2.0)));
        assert_eq!(max(referenced(values)), Ok(CellValue::Number(8.0)));
        assert_eq!(max(Vec::new()), Ok(CellValue::Number(0.0)));
    }

    #[test]
    fn test_scalar_math() {
        assert_eq!(
            round(&[CellValue::Number(3.14159), CellValue::Number(2.0)]),
            Ok(CellValue::Number(3.14))
        );
        assert_eq!(round(&[CellValue::Number(2.5)]), Ok(CellValue::Number(3.0)));
        assert_eq!(
            round(&[CellValue::Number(1234.5678), CellValue::Number(-2.0)]),
            Ok(CellValue::Number(1200.0))
        );
        assert_eq!(abs(&[CellValue::Number(-4.0)]), Ok(CellValue::Number(4.0)));
        assert_eq!(sqrt(&[CellValue::Number(9.0)]), Ok(CellValue::Number(3.0)));
        assert_eq!(
            sqrt(&[CellValue::Number(-1.0)]).unwrap_err().kind,
            ErrorKind::Num
        );
        assert_eq!(
            power(&[CellValue::Number(-8.0), CellValue::Number(0.5)])
                .unwrap_err()
                .kind,
            ErrorKind::Num
        );
        assert_eq!(
            abs(&[CellValue::Text("abc".to_string())]).unwrap_err().kind,
            ErrorKind::Value
        );
    }

    #[test]
    fn test_round_extreme_digits() {
        let round_to = |num: f64, digits: f64| {
            round(&[CellValue::Number(num), CellValue::Number(digits)])
        };
        assert_eq!(round_to(3.25, 400.0), Ok(CellValue::Number(3.25)));
        assert_eq!(round_to(1e300, 20.0), Ok(CellValue::Number(1e300)));
        assert_eq!(round_to(3.25, -400.0), Ok(CellValue::Number(0.0)));
        assert_eq!(round_to(0.0, 1e12), Ok(CellValue::Number(0.0)));
    }
}
