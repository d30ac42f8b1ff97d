use std::cmp::Ordering;
use std::collections::HashSet;
use std::slice;

use cellgraph_core::{CellPosition, CellValue, EvalResult, FormulaError, RangeIter};

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::functions::{self, Operand, OperandResult};
use crate::parser::ParsedFormula;

/// Source of referenced cell values during evaluation
///
/// The recalculation engine implements this to evaluate dirty precedents on
/// demand; simple callers can wrap a closure in [`FnResolver`].
pub trait CellResolver {
    /// Current value of an in-bounds cell
    fn resolve(&mut self, position: CellPosition, guard: &mut EvalGuard) -> EvalResult;

    fn row_count(&self) -> u32;

    fn column_count(&self) -> u32;
}

/// Tracks the chain of cells being evaluated
///
/// Entering a cell already on the chain is a cycle; a chain longer than the
/// configured depth is `#DEPTH!`.
#[derive(Debug, Clone)]
pub struct EvalGuard {
    visiting: HashSet<CellPosition>,
    depth: u32,
    max_depth: u32,
}

impl EvalGuard {
    pub fn new(max_depth: u32) -> Self {
        EvalGuard {
            visiting: HashSet::new(),
            depth: 0,
            max_depth,
        }
    }

    pub fn enter(&mut self, position: CellPosition) -> Result<(), FormulaError> {
        if self.visiting.contains(&position) {
            return Err(FormulaError::circular(format!(
                "{} is part of a circular reference",
                position
            )));
        }
        if self.depth >= self.max_depth {
            return Err(FormulaError::depth_exceeded(self.max_depth));
        }
        self.visiting.insert(position);
        self.depth += 1;
        Ok(())
    }

    pub fn exit(&mut self, position: CellPosition) {
        if self.visiting.remove(&position) {
            self.depth -= 1;
        }
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn is_visiting(&self, position: CellPosition) -> bool {
        self.visiting.contains(&position)
    }
}

/// A [`CellResolver`] backed by a closure
pub struct FnResolver<F> {
    resolve: F,
    rows: u32,
    columns: u32,
}

impl<F> FnResolver<F>
where
    F: FnMut(CellPosition) -> EvalResult,
{
    pub fn new(rows: u32, columns: u32, resolve: F) -> Self {
        FnResolver {
            resolve,
            rows,
            columns,
        }
    }
}

impl<F> CellResolver for FnResolver<F>
where
    F: FnMut(CellPosition) -> EvalResult,
{
    fn resolve(&mut self, position: CellPosition, _guard: &mut EvalGuard) -> EvalResult {
        (self.resolve)(position)
    }

    fn row_count(&self) -> u32 {
        self.rows
    }

    fn column_count(&self) -> u32 {
        self.columns
    }
}

/// Evaluator for formula AST
pub struct Evaluator<'a, R: CellResolver + ?Sized> {
    resolver: &'a mut R,
    guard: &'a mut EvalGuard,
}

impl<'a, R: CellResolver + ?Sized> Evaluator<'a, R> {
    pub fn new(resolver: &'a mut R, guard: &'a mut EvalGuard) -> Self {
        Self { resolver, guard }
    }

    /// Evaluate a parsed formula to a value or error
    pub fn evaluate(&mut self, formula: &ParsedFormula) -> EvalResult {
        self.evaluate_expr(formula.expression()?)
    }

    /// Evaluate an expression AST to a value
    pub fn evaluate_expr(&mut self, expr: &Expr) -> EvalResult {
        match expr {
            Expr::Number(n) => Ok(CellValue::Number(*n)),
            Expr::String(s) => Ok(CellValue::Text(s.clone())),
            Expr::Boolean(b) => Ok(CellValue::Boolean(*b)),

            Expr::CellRef(reference) => self.read(reference.position),

            Expr::Range(range) => Err(FormulaError::value(format!(
                "range {} cannot be used as a single value",
                range
            ))),

            Expr::Binary { left, op, right } => self.evaluate_binary(left, *op, right),

            Expr::Unary { op, operand } => self.evaluate_unary(*op, operand),

            Expr::FunctionCall { name, args } => self.evaluate_function(name, args),

            Expr::Grouped(inner) => self.evaluate_expr(inner),
        }
    }

    fn in_bounds(&self, position: CellPosition) -> bool {
        position.is_valid(self.resolver.row_count(), self.resolver.column_count())
    }

    fn read(&mut self, position: CellPosition) -> EvalResult {
        if !self.in_bounds(position) {
            return Err(out_of_bounds(position));
        }
        self.resolver.resolve(position, self.guard)
    }

    fn evaluate_binary(&mut self, left: &Expr, op: BinaryOp, right: &Expr) -> EvalResult {
        let left_val = self.evaluate_expr(left)?;
        let right_val = self.evaluate_expr(right)?;

        match op {
            BinaryOp::Add => numeric_op(&left_val, &right_val, |a, b| a + b),
            BinaryOp::Sub => numeric_op(&left_val, &right_val, |a, b| a - b),
            BinaryOp::Mul => numeric_op(&left_val, &right_val, |a, b| a * b),
            BinaryOp::Div => {
                let (a, b) = (number(&left_val)?, number(&right_val)?);
                if b == 0.0 {
                    Err(FormulaError::div_zero())
                } else {
                    finite(a / b)
                }
            }
            BinaryOp::Pow => numeric_op(&left_val, &right_val, f64::powf),

            BinaryOp::Concat => Ok(CellValue::Text(format!(
                "{}{}",
                left_val.as_text(),
                right_val.as_text()
            ))),

            BinaryOp::Eq => compared(&left_val, &right_val, Ordering::is_eq),
            BinaryOp::Ne => compared(&left_val, &right_val, Ordering::is_ne),
            BinaryOp::Lt => compared(&left_val, &right_val, Ordering::is_lt),
            BinaryOp::Gt => compared(&left_val, &right_val, Ordering::is_gt),
            BinaryOp::Le => compared(&left_val, &right_val, Ordering::is_le),
            BinaryOp::Ge => compared(&left_val, &right_val, Ordering::is_ge),
        }
    }

    fn evaluate_unary(&mut self, op: UnaryOp, operand: &Expr) -> EvalResult {
        let n = number(&self.evaluate_expr(operand)?)?;

        match op {
            UnaryOp::Neg => Ok(CellValue::Number(-n)),
            UnaryOp::Pos => Ok(CellValue::Number(n)),
        }
    }

    fn evaluate_function(&mut self, name: &str, args: &[Expr]) -> EvalResult {
        match name.to_uppercase().as_str() {
            // Aggregates stream their operands, expanding ranges lazily
            "SUM" => functions::math::sum(self.operands(args)?),
            "AVERAGE" => functions::math::average(self.operands(args)?),
            "COUNT" => functions::math::count(self.operands(args)?),
            "COUNTA" => functions::math::counta(self.operands(args)?),
            "MIN" => functions::math::min(self.operands(args)?),
            "MAX" => functions::math::max(self.operands(args)?),
            "AND" => functions::logical::and(self.operands(args)?),
            "OR" => functions::logical::or(self.operands(args)?),
            "CONCAT" => functions::text::concat(self.operands(args)?),

            // Only the chosen branch is evaluated
            "IF" => {
                functions::expect_args("IF", args.len(), 2, 3)?;
                let condition = self.evaluate_expr(&args[0])?;
                if functions::logical::truthiness(&condition)? {
                    self.evaluate_expr(&args[1])
                } else if let Some(otherwise) = args.get(2) {
                    self.evaluate_expr(otherwise)
                } else {
                    Ok(CellValue::Boolean(false))
                }
            }
            "IFERROR" => {
                functions::expect_args("IFERROR", args.len(), 2, 2)?;
                match self.evaluate_expr(&args[0]) {
                    Ok(value) => Ok(value),
                    Err(_) => self.evaluate_expr(&args[1]),
                }
            }

            "ABS" => functions::math::abs(&self.scalars(args)?),
            "ROUND" => functions::math::round(&self.scalars(args)?),
            "SQRT" => functions::math::sqrt(&self.scalars(args)?),
            "POWER" => functions::math::power(&self.scalars(args)?),
            "NOT" => functions::logical::not(&self.scalars(args)?),
            "LEN" => functions::text::len(&self.scalars(args)?),
            "UPPER" => functions::text::upper(&self.scalars(args)?),
            "LOWER" => functions::text::lower(&self.scalars(args)?),
            "DATE" => functions::datetime::date(&self.scalars(args)?),
            "YEAR" => functions::datetime::year(&self.scalars(args)?),
            "MONTH" => functions::datetime::month(&self.scalars(args)?),
            "DAY" => functions::datetime::day(&self.scalars(args)?),

            _ => Err(FormulaError::name(format!("unknown function {}", name))),
        }
    }

    fn scalars(&mut self, args: &[Expr]) -> Result<Vec<CellValue>, FormulaError> {
        args.iter().map(|arg| self.evaluate_expr(arg)).collect()
    }

    /// Operand stream over the arguments of a variadic function
    ///
    /// Reference arguments are bounds-checked up front so that functions which
    /// skip in-band errors (COUNT, COUNTA) still report `#REF!`.
    fn operands<'e>(&'e mut self, args: &'e [Expr]) -> Result<Operands<'e, 'a, R>, FormulaError> {
        for arg in args {
            match arg {
                Expr::CellRef(reference) if !self.in_bounds(reference.position) => {
                    return Err(out_of_bounds(reference.position));
                }
                Expr::Range(range) => {
                    let covered = range.range();
                    if !covered.is_valid(self.resolver.row_count(), self.resolver.column_count()) {
                        return Err(FormulaError::reference(format!(
                            "range {} is outside the sheet",
                            covered
                        )));
                    }
                }
                _ => {}
            }
        }

        Ok(Operands {
            evaluator: self,
            args: args.iter(),
            range: None,
        })
    }
}

/// Lazily evaluated function arguments; ranges are walked cell by cell
struct Operands<'e, 'a, R: CellResolver + ?Sized> {
    evaluator: &'e mut Evaluator<'a, R>,
    args: slice::Iter<'e, Expr>,
    range: Option<RangeIter>,
}

impl<R: CellResolver + ?Sized> Iterator for Operands<'_, '_, R> {
    type Item = OperandResult;

    fn next(&mut self) -> Option<OperandResult> {
        loop {
            if let Some(range) = &mut self.range {
                match range.next() {
                    Some(position) => {
                        return Some(self.evaluator.read(position).map(Operand::Referenced))
                    }
                    None => self.range = None,
                }
            }

            let operand = match self.args.next()? {
                Expr::Range(range) => {
                    self.range = Some(range.range().positions());
                    continue;
                }
                Expr::CellRef(reference) => self
                    .evaluator
                    .read(reference.position)
                    .map(Operand::Referenced),
                other => self.evaluator.evaluate_expr(other).map(Operand::Direct),
            };
            return Some(operand);
        }
    }
}

fn out_of_bounds(position: CellPosition) -> FormulaError {
    FormulaError::reference(format!("{} is outside the sheet", position))
}

fn number(value: &CellValue) -> Result<f64, FormulaError> {
    value.as_number().ok_or_else(|| {
        FormulaError::value(format!("cannot use {} as a number", value.type_name()))
    })
}

fn finite(n: f64) -> EvalResult {
    if n.is_finite() {
        Ok(CellValue::Number(n))
    } else {
        Err(FormulaError::num("result is not a finite number"))
    }
}

fn numeric_op(left: &CellValue, right: &CellValue, op: impl Fn(f64, f64) -> f64) -> EvalResult {
    finite(op(number(left)?, number(right)?))
}

fn compared(left: &CellValue, right: &CellValue, test: fn(Ordering) -> bool) -> EvalResult {
    Ok(CellValue::Boolean(test(compare_values(left, right))))
}

/// Order two values for comparison operators
///
/// Numbers (and dates) sort before text, text before booleans. Text compares
/// case-insensitively. A blank cell takes the zero value of the other side.
pub fn compare_values(left: &CellValue, right: &CellValue) -> Ordering {
    fn blank_like(other: &CellValue) -> CellValue {
        match other {
            CellValue::Text(_) => CellValue::Text(String::new()),
            CellValue::Boolean(_) => CellValue::Boolean(false),
            _ => CellValue::Number(0.0),
        }
    }

    fn rank(value: &CellValue) -> u8 {
        match value {
            CellValue::Empty | CellValue::Number(_) | CellValue::Date(_) => 0,
            CellValue::Text(_) => 1,
            CellValue::Boolean(_) => 2,
        }
    }

    let left = if left.is_empty() { blank_like(right) } else { left.clone() };
    let right = if right.is_empty() { blank_like(&left) } else { right.clone() };

    match (&left, &right) {
        (CellValue::Text(a), CellValue::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (CellValue::Boolean(a), CellValue::Boolean(b)) => a.cmp(b),
        _ if rank(&left) == 0 && rank(&right) == 0 => {
            let a = left.as_number().unwrap_or(0.0);
            let b = right.as_number().unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        _ => rank(&left).cmp(&rank(&right)),
    }
}
