use chrono::{Datelike, Duration, NaiveDate};

use cellgraph_core::{serial_to_date, CellValue, EvalResult, FormulaError};

use super::expect_args;

fn whole_number(name: &str, value: &CellValue) -> Result<i64, FormulaError> {
    value
        .as_number()
        .map(|n| n.trunc() as i64)
        .ok_or_else(|| {
            FormulaError::value(format!("{} expects a number, got {}", name, value.type_name()))
        })
}

/// Resolve a date argument: dates, serial numbers, or ISO date text
fn date_arg(name: &str, value: &CellValue) -> Result<NaiveDate, FormulaError> {
    let invalid = || FormulaError::num(format!("{} argument is not a valid date", name));

    match value {
        CellValue::Date(d) => Ok(*d),
        CellValue::Text(s) => match NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
            Ok(d) => Ok(d),
            Err(_) => {
                let serial = value.as_number().ok_or_else(|| {
                    FormulaError::value(format!("{} cannot read a date from '{}'", name, s))
                })?;
                serial_to_date(serial).ok_or_else(invalid)
            }
        },
        _ => {
            let serial = value.as_number().ok_or_else(invalid)?;
            if serial < 0.0 {
                return Err(invalid());
            }
            serial_to_date(serial).ok_or_else(invalid)
        }
    }
}

/// DATE - Build a date from year, month and day
///
/// Months and days outside their usual range roll over, so
/// `DATE(2024, 13, 1)` is 2025-01-01 and `DATE(2024, 3, 0)` is 2024-02-29.
pub fn date(values: &[CellValue]) -> EvalResult {
    expect_args("DATE", values.len(), 3, 3)?;
    let year = whole_number("DATE", &values[0])?;
    let month = whole_number("DATE", &values[1])?;
    let day = whole_number("DATE", &values[2])?;

    let invalid = || FormulaError::num("DATE arguments do not form a valid date");

    let months = year
        .checked_mul(12)
        .zip(month.checked_sub(1))
        .and_then(|(m, offset)| m.checked_add(offset))
        .ok_or_else(invalid)?;
    let first = i32::try_from(months.div_euclid(12))
        .ok()
        .and_then(|y| NaiveDate::from_ymd_opt(y, months.rem_euclid(12) as u32 + 1, 1))
        .ok_or_else(invalid)?;
    let result = day
        .checked_sub(1)
        .and_then(Duration::try_days)
        .and_then(|offset| first.checked_add_signed(offset))
        .ok_or_else(invalid)?;

    Ok(CellValue::Date(result))
}

/// YEAR - Year component of a date
pub fn year(values: &[CellValue]) -> EvalResult {
    expect_args("YEAR", values.len(), 1, 1)?;
    let d = date_arg("YEAR", &values[0])?;
    Ok(CellValue::Number(d.year() as f64))
}

/// MONTH - Month component of a date (1-12)
pub fn month(values: &[CellValue]) -> EvalResult {
    expect_args("MONTH", values.len(), 1, 1)?;
    let d = date_arg("MONTH", &values[0])?;
    Ok(CellValue::Number(d.month() as f64))
}

/// DAY - Day-of-month component of a date (1-31)
pub fn day(values: &[CellValue]) -> EvalResult {
    expect_args("DAY", values.len(), 1, 1)?;
    let d = date_arg("DAY", &values[0])?;
    Ok(CellValue::Number(d.day() as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellgraph_core::ErrorKind;

    fn ymd(y: i32, m: u32, d: u32) -> CellValue {
        CellValue::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    fn nums(values: &[f64]) -> Vec<CellValue> {
        values.iter().map(|n| CellValue::Number(*n)).collect()
    }

    #[test]
    fn test_date() {
        assert_eq!(date(&nums(&[2024.0, 1.0, 15.0])), Ok(ymd(2024, 1, 15)));
        assert_eq!(date(&nums(&[2024.0, 13.0, 1.0])), Ok(ymd(2025, 1, 1)));
        assert_eq!(date(&nums(&[2024.0, 3.0, 0.0])), Ok(ymd(2024, 2, 29)));
        assert_eq!(date(&nums(&[2024.0, 0.0, 1.0])), Ok(ymd(2023, 12, 1)));
    }

    #[test]
    fn test_date_errors() {
        assert_eq!(
            date(&nums(&[1e12, 1.0, 1.0])).unwrap_err().kind,
            ErrorKind::Num
        );
        assert_eq!(date(&nums(&[2024.0])).unwrap_err().kind, ErrorKind::Value);
        let args = [
            CellValue::Text("year".to_string()),
            CellValue::Number(1.0),
            CellValue::Number(1.0),
        ];
        assert_eq!(date(&args).unwrap_err().kind, ErrorKind::Value);
    }

    #[test]
    fn test_date_extreme_arguments() {
        for args in [
            [2024.0, 1.0, -1e300],
            [2024.0, -1e300, 1.0],
            [-1e300, 1.0, 1.0],
            [2024.0, 1e300, 1e300],
            [1e300, 1e300, -1e300],
        ] {
            assert_eq!(date(&nums(&args)).unwrap_err().kind, ErrorKind::Num, "{:?}", args);
        }
    }

    #[test]
    fn test_components() {
        let d = ymd(2024, 6, 15);
        assert_eq!(year(&[d.clone()]), Ok(CellValue::Number(2024.0)));
        assert_eq!(month(&[d.clone()]), Ok(CellValue::Number(6.0)));
        assert_eq!(day(&[d]), Ok(CellValue::Number(15.0)));
    }

    #[test]
    fn test_components_from_serial_and_text() {
        assert_eq!(year(&[CellValue::Number(45292.0)]), Ok(CellValue::Number(2024.0)));
        assert_eq!(
            month(&[CellValue::Text("2023-11-05".to_string())]),
            Ok(CellValue::Number(11.0))
        );
        assert_eq!(day(&[CellValue::Number(-1.0)]).unwrap_err().kind, ErrorKind::Num);
        assert_eq!(
            day(&[CellValue::Text("soon".to_string())]).unwrap_err().kind,
            ErrorKind::Value
        );
    }
}
