use serde::{Deserialize, Serialize};

use cellgraph_core::{CellPosition, CellRange, FormulaError};

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::lexer::{CellReference, Lexer, Paren, Token};

/// Deepest expression tree a formula may build
///
/// Parenthesised groups, function calls, unary signs and every operator in a
/// chain each add a level.
pub const MAX_NESTING: usize = 512;

/// A tokenized formula together with the references it reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFormula {
    /// Formula text including the leading `=`
    pub original: String,
    pub tokens: Vec<Token>,
    /// Every single-cell reference token, in source order
    pub cell_references: Vec<CellReference>,
    /// De-duplicated range references, in source order
    pub cell_ranges: Vec<CellRange>,
    /// De-duplicated single-cell positions; ranges are not flattened here
    pub dependencies: Vec<CellPosition>,
    expression: Result<Expr, FormulaError>,
}

impl ParsedFormula {
    /// Expression tree for evaluation
    ///
    /// Structural problems (unbalanced parentheses, dangling operators, empty
    /// formulas, excessive nesting) surface here as `#SYNTAX!`.
    pub fn expression(&self) -> Result<&Expr, FormulaError> {
        self.expression.as_ref().map_err(Clone::clone)
    }
}

/// Parse a formula string (must start with `=`)
pub fn parse(formula: &str) -> Result<ParsedFormula, FormulaError> {
    let body = formula
        .strip_prefix('=')
        .ok_or_else(|| FormulaError::syntax("formula must start with '='"))?;

    let tokens = Lexer::new(body).tokenize()?;

    let mut cell_references = Vec::new();
    let mut cell_ranges = Vec::new();
    let mut dependencies = Vec::new();

    for token in &tokens {
        match token {
            Token::CellReference(reference) => {
                cell_references.push(*reference);
                if !dependencies.contains(&reference.position) {
                    dependencies.push(reference.position);
                }
            }
            Token::CellRange(range) => {
                let range = range.range();
                if !cell_ranges.contains(&range) {
                    cell_ranges.push(range);
                }
            }
            _ => {}
        }
    }

    let expression = ExpressionParser::new(&tokens).parse();

    Ok(ParsedFormula {
        original: formula.to_string(),
        tokens,
        cell_references,
        cell_ranges,
        dependencies,
        expression,
    })
}

/// An expression with the height of its tree
type Parsed = (Expr, usize);

fn nested(height: usize) -> Result<usize, FormulaError> {
    if height > MAX_NESTING {
        Err(too_deep())
    } else {
        Ok(height)
    }
}

fn too_deep() -> FormulaError {
    FormulaError::syntax(format!(
        "formula is nested more than {} levels deep",
        MAX_NESTING
    ))
}

/// Precedence-climbing parser from tokens to [`Expr`]
///
/// Recursion and tree height are both capped at [`MAX_NESTING`], so hostile
/// input becomes `#SYNTAX!` instead of exhausting the stack.
pub struct ExpressionParser<'t> {
    tokens: &'t [Token],
    position: usize,
    depth: usize,
}

impl<'t> ExpressionParser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    /// Parse the whole token stream into a single expression
    pub fn parse(&mut self) -> Result<Expr, FormulaError> {
        if self.tokens.is_empty() {
            return Err(FormulaError::syntax("empty formula"));
        }

        let (expr, _) = self.parse_binary(1)?;

        match self.peek() {
            None => Ok(expr),
            Some(Token::Parenthesis(Paren::Close)) => {
                Err(FormulaError::syntax("unbalanced ')'"))
            }
            Some(token) => Err(FormulaError::syntax(format!("unexpected token '{}'", token))),
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.position);
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        match self.peek() {
            Some(Token::Operator(op)) => Some(BinaryOp::from(*op)),
            _ => None,
        }
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Parsed, FormulaError> {
        if self.depth >= MAX_NESTING {
            return Err(too_deep());
        }
        self.depth += 1;
        let result = self.parse_chain(min_precedence);
        self.depth -= 1;
        result
    }

    fn parse_chain(&mut self, min_precedence: u8) -> Result<Parsed, FormulaError> {
        let (mut left, mut height) = self.parse_unary()?;

        while let Some(op) = self.peek_binary_op() {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.advance();

            let next_min = if op.is_right_associative() {
                precedence
            } else {
                precedence + 1
            };
            let (right, right_height) = self.parse_binary(next_min)?;
            height = nested(height.max(right_height) + 1)?;
            left = Expr::binary(left, op, right);
        }

        Ok((left, height))
    }

    fn parse_unary(&mut self) -> Result<Parsed, FormulaError> {
        let mut signs = Vec::new();
        loop {
            match self.peek_binary_op() {
                Some(BinaryOp::Sub) => signs.push(UnaryOp::Neg),
                Some(BinaryOp::Add) => signs.push(UnaryOp::Pos),
                _ => break,
            }
            self.advance();
        }

        let (mut expr, height) = self.parse_primary()?;
        let height = nested(height + signs.len())?;
        for op in signs.into_iter().rev() {
            expr = Expr::unary(op, expr);
        }
        Ok((expr, height))
    }

    fn parse_primary(&mut self) -> Result<Parsed, FormulaError> {
        let token = self
            .advance()
            .ok_or_else(|| FormulaError::syntax("unexpected end of formula"))?;

        let leaf = match token {
            Token::Number(n) => Expr::Number(*n),
            Token::String(s) => Expr::String(s.clone()),
            Token::Boolean(b) => Expr::Boolean(*b),
            Token::CellReference(reference) => Expr::CellRef(*reference),
            Token::CellRange(range) => Expr::Range(*range),
            Token::Function(name) => return self.parse_function_call(name),
            Token::Parenthesis(Paren::Open) => {
                let (expr, height) = self.parse_binary(1)?;
                self.expect_close("expected ')'")?;
                return Ok((Expr::Grouped(Box::new(expr)), nested(height + 1)?));
            }
            Token::Parenthesis(Paren::Close) => {
                return Err(FormulaError::syntax("unbalanced ')'"))
            }
            Token::Operator(op) => {
                return Err(FormulaError::syntax(format!(
                    "operator '{}' is missing an operand",
                    op
                )))
            }
            Token::Comma => return Err(FormulaError::syntax("unexpected ','")),
        };
        Ok((leaf, 1))
    }

    fn parse_function_call(&mut self, name: &str) -> Result<Parsed, FormulaError> {
        match self.advance() {
            Some(Token::Parenthesis(Paren::Open)) => {}
            _ => {
                return Err(FormulaError::syntax(format!(
                    "expected '(' after function name {}",
                    name
                )))
            }
        }

        let mut args = Vec::new();
        let mut height = 0;

        if !matches!(self.peek(), Some(Token::Parenthesis(Paren::Close))) {
            loop {
                let (arg, arg_height) = self.parse_binary(1)?;
                args.push(arg);
                height = height.max(arg_height);

                match self.peek() {
                    Some(Token::Comma) => {
                        self.advance();
                    }
                    _ => break,
                }
            }
        }

        self.expect_close(&format!("expected ')' to close {}(", name))?;

        Ok((Expr::function(name, args), nested(height + 1)?))
    }

    fn expect_close(&mut self, message: &str) -> Result<(), FormulaError> {
        match self.advance() {
            Some(Token::Parenthesis(Paren::Close)) => Ok(()),
            _ => Err(FormulaError::syntax(message)),
        }
    }
}
