use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Kind of a formula error (Excel-style codes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// #SYNTAX! - Formula could not be tokenized or parsed
    Syntax,
    /// #DIV/0! - Division by zero
    DivZero,
    /// #VALUE! - Type mismatch in arithmetic
    Value,
    /// #REF! - Reference out of bounds or malformed
    Ref,
    /// #NAME? - Unknown function
    Name,
    /// #NUM! - Invalid numeric result
    Num,
    /// #CIRCULAR! - Cell depends on itself
    Circular,
    /// #DEPTH! - Recursive evaluation exceeded the configured depth
    DepthExceeded,
}

impl ErrorKind {
    /// Display code shown in a cell holding this error
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "#SYNTAX!",
            ErrorKind::DivZero => "#DIV/0!",
            ErrorKind::Value => "#VALUE!",
            ErrorKind::Ref => "#REF!",
            ErrorKind::Name => "#NAME?",
            ErrorKind::Num => "#NUM!",
            ErrorKind::Circular => "#CIRCULAR!",
            ErrorKind::DepthExceeded => "#DEPTH!",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// An error attributed to a single cell
///
/// Errors are values: they are stored in cells, displayed, and propagated to
/// dependents that read them.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} {message}")]
pub struct FormulaError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FormulaError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        FormulaError {
            kind,
            message: message.into(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn div_zero() -> Self {
        Self::new(ErrorKind::DivZero, "division by zero")
    }

    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Ref, message)
    }

    pub fn name(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Name, message)
    }

    pub fn num(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Num, message)
    }

    pub fn circular(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Circular, message)
    }

    pub fn depth_exceeded(max_depth: u32) -> Self {
        Self::new(
            ErrorKind::DepthExceeded,
            format!("calculation depth exceeded {max_depth}"),
        )
    }
}
