//! Single-pass formula tokenizer.
//!
//! Characters are accumulated into a word until whitespace, a parenthesis, a
//! comma, a quote, or an operator character interrupts it. Each finished word
//! is classified, first match wins: number, boolean, range (`A1:B2`), cell
//! reference (`$?[A-Z]+$?[1-9][0-9]*`), function name, and finally a plain
//! string literal.

use nom::{
    branch::alt,
    bytes::complete::take_while_m_n,
    character::complete::{char, digit0, digit1, one_of},
    combinator::{all_consuming, map_opt, opt, recognize},
    sequence::{pair, separated_pair, tuple},
    IResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use cellgraph_core::{col_from_label, col_to_label, CellPosition, CellRange, FormulaError};

use crate::functions;

/// A single-cell reference with its absolute markers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellReference {
    pub position: CellPosition,
    /// `A$1`
    pub absolute_row: bool,
    /// `$A1`
    pub absolute_column: bool,
}

impl CellReference {
    pub fn relative(position: CellPosition) -> Self {
        CellReference {
            position,
            absolute_row: false,
            absolute_column: false,
        }
    }
}

impl fmt::Display for CellReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            if self.absolute_column { "$" } else { "" },
            col_to_label(self.position.column),
            if self.absolute_row { "$" } else { "" },
            u64::from(self.position.row) + 1
        )
    }
}

/// A rectangular range reference as written (`B3:A1` keeps its corners)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeReference {
    pub start: CellReference,
    pub end: CellReference,
}

impl RangeReference {
    /// Normalized covered range
    pub fn range(&self) -> CellRange {
        CellRange::new(self.start.position, self.end.position)
    }
}

impl fmt::Display for RangeReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Operator symbols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Pow => "^",
            Operator::Concat => "&",
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Paren {
    Open,
    Close,
}

/// Token types for formula parsing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Token {
    Number(f64),
    String(String),
    Boolean(bool),
    CellReference(CellReference),
    CellRange(RangeReference),
    /// Function name, upper-cased
    Function(String),
    Operator(Operator),
    Parenthesis(Paren),
    /// Argument separator (`,` or `;`)
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{}", n),
            Token::String(s) => write!(f, "\"{}\"", s.replace('"', "\"\"")),
            Token::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            Token::CellReference(r) => write!(f, "{}", r),
            Token::CellRange(r) => write!(f, "{}", r),
            Token::Function(name) => f.write_str(name),
            Token::Operator(op) => write!(f, "{}", op),
            Token::Parenthesis(Paren::Open) => f.write_str("("),
            Token::Parenthesis(Paren::Close) => f.write_str(")"),
            Token::Comma => f.write_str(","),
        }
    }
}

/// Lexer for tokenizing a formula body (the text after the leading `=`)
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    word: String,
    tokens: Vec<Token>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            word: String::new(),
            tokens: Vec::new(),
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(mut self) -> Result<Vec<Token>, FormulaError> {
        while let Some(c) = self.peek() {
            match c {
                c if c.is_whitespace() => {
                    self.flush_word();
                    self.advance();
                }
                '"' => {
                    self.flush_word();
                    let s = self.read_string()?;
                    self.tokens.push(Token::String(s));
                }
                '(' => {
                    self.flush_word();
                    self.advance();
                    self.tokens.push(Token::Parenthesis(Paren::Open));
                }
                ')' => {
                    self.flush_word();
                    self.advance();
                    self.tokens.push(Token::Parenthesis(Paren::Close));
                }
                ',' | ';' => {
                    self.flush_word();
                    self.advance();
                    self.tokens.push(Token::Comma);
                }
                '+' | '-' if self.word_is_exponent_prefix() => {
                    self.word.push(c);
                    self.advance();
                }
                '+' | '-' | '*' | '/' | '^' | '&' | '=' | '<' | '>' => {
                    self.flush_word();
                    let op = self.read_operator();
                    self.tokens.push(Token::Operator(op));
                }
                _ => {
                    self.word.push(c);
                    self.advance();
                }
            }
        }

        self.flush_word();
        Ok(self.tokens)
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        self.position += 1;
        c
    }

    /// Next non-whitespace character, without consuming anything
    fn peek_significant(&self) -> Option<char> {
        self.input[self.position..]
            .iter()
            .copied()
            .find(|c| !c.is_whitespace())
    }

    /// `1e` / `2.5E` followed by a sign continues a number literal
    fn word_is_exponent_prefix(&self) -> bool {
        match self.word.strip_suffix(|c: char| c == 'e' || c == 'E') {
            Some(mantissa) => all_consuming(mantissa_literal)(mantissa).is_ok(),
            None => false,
        }
    }

    fn read_operator(&mut self) -> Operator {
        let c = self.advance();
        match c {
            Some('+') => Operator::Add,
            Some('-') => Operator::Sub,
            Some('*') => Operator::Mul,
            Some('/') => Operator::Div,
            Some('^') => Operator::Pow,
            Some('&') => Operator::Concat,
            Some('<') => match self.peek() {
                Some('>') => {
                    self.advance();
                    Operator::Ne
                }
                Some('=') => {
                    self.advance();
                    Operator::Le
                }
                _ => Operator::Lt,
            },
            Some('>') => {
                if self.peek() == Some('=') {
                    self.advance();
                    Operator::Ge
                } else {
                    Operator::Gt
                }
            }
            _ => Operator::Eq,
        }
    }

    fn read_string(&mut self) -> Result<String, FormulaError> {
        self.advance(); // opening quote
        let mut s = String::new();

        while let Some(c) = self.advance() {
            if c == '"' {
                // "" is an escaped quote
                if self.peek() == Some('"') {
                    s.push('"');
                    self.advance();
                } else {
                    return Ok(s);
                }
            } else {
                s.push(c);
            }
        }

        Err(FormulaError::syntax("unterminated string literal"))
    }

    fn flush_word(&mut self) {
        if self.word.is_empty() {
            return;
        }
        let word = std::mem::take(&mut self.word);
        let called = self.peek_significant() == Some('(');
        self.tokens.push(classify_word(&word, called));
    }
}

/// Classify an accumulated word; `called` is true when `(` follows it
fn classify_word(word: &str, called: bool) -> Token {
    if let Ok((_, n)) = all_consuming(number_literal)(word) {
        return Token::Number(n);
    }

    if word.eq_ignore_ascii_case("TRUE") {
        return Token::Boolean(true);
    }
    if word.eq_ignore_ascii_case("FALSE") {
        return Token::Boolean(false);
    }

    if let Ok((_, (start, end))) =
        all_consuming(separated_pair(cell_reference, char(':'), cell_reference))(word)
    {
        return Token::CellRange(RangeReference { start, end });
    }

    if let Ok((_, reference)) = all_consuming(cell_reference)(word) {
        return Token::CellReference(reference);
    }

    // Unknown names in call position still become functions so that the
    // evaluator can report #NAME?.
    if called || functions::is_known_function(word) {
        return Token::Function(word.to_ascii_uppercase());
    }

    Token::String(word.to_string())
}

/// `12`, `1.5`, `.5`, `3.`
fn mantissa_literal(input: &str) -> IResult<&str, &str> {
    alt((
        recognize(pair(digit1, opt(pair(char('.'), digit0)))),
        recognize(pair(char('.'), digit1)),
    ))(input)
}

/// Unsigned decimal literal with optional exponent
fn number_literal(input: &str) -> IResult<&str, f64> {
    map_opt(
        recognize(pair(
            mantissa_literal,
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        )),
        |s: &str| s.parse::<f64>().ok().filter(|n| n.is_finite()),
    )(input)
}

/// `$?[A-Za-z]{1,3}$?[1-9][0-9]*`
pub(crate) fn cell_reference(input: &str) -> IResult<&str, CellReference> {
    map_opt(
        tuple((
            opt(char('$')),
            take_while_m_n(1, 3, |c: char| c.is_ascii_alphabetic()),
            opt(char('$')),
            recognize(pair(one_of("123456789"), digit0)),
        )),
        |(abs_col, letters, abs_row, digits): (Option<char>, &str, Option<char>, &str)| {
            let column = col_from_label(letters)?;
            let row: u32 = digits.parse().ok()?;
            Some(CellReference {
                position: CellPosition::new(row - 1, column),
                absolute_row: abs_row.is_some(),
                absolute_column: abs_col.is_some(),
            })
        },
    )(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tokenize(input: &str) -> Vec<Token> {
        Lexer::new(input).tokenize().unwrap()
    }

    fn cell(a1: &str) -> Token {
        let reference = all_consuming(cell_reference)(a1).unwrap().1;
        Token::CellReference(reference)
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            tokenize("1 + 2*3"),
            vec![
                Token::Number(1.0),
                Token::Operator(Operator::Add),
                Token::Number(2.0),
                Token::Operator(Operator::Mul),
                Token::Number(3.0),
            ]
        );
    }

    #[test]
    fn test_cell_references() {
        let tokens = tokenize("A1+B2 + $C$3");
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[0], cell("A1"));
        match &tokens[4] {
            Token::CellReference(r) => {
                assert_eq!(r.position, CellPosition::new(2, 2));
                assert!(r.absolute_row && r.absolute_column);
            }
            other => panic!("expected reference, got {:?}", other),
        }
    }

    #[test]
    fn test_mixed_absolute_markers() {
        match &tokenize("$A2")[0] {
            Token::CellReference(r) => assert!(r.absolute_column && !r.absolute_row),
            other => panic!("expected reference, got {:?}", other),
        }
        match &tokenize("a$2")[0] {
            Token::CellReference(r) => {
                assert!(!r.absolute_column && r.absolute_row);
                assert_eq!(r.position, CellPosition::new(1, 0));
            }
            other => panic!("expected reference, got {:?}", other),
        }
    }

    #[test]
    fn test_function_call_with_range() {
        let tokens = tokenize("sum(A1:A10)");
        assert_eq!(tokens[0], Token::Function("SUM".to_string()));
        assert_eq!(tokens[1], Token::Parenthesis(Paren::Open));
        match &tokens[2] {
            Token::CellRange(r) => assert_eq!(r.range(), CellRange::from_a1("A1:A10").unwrap()),
            other => panic!("expected range, got {:?}", other),
        }
        assert_eq!(tokens[3], Token::Parenthesis(Paren::Close));
    }

    #[test]
    fn test_unknown_name_in_call_position_is_function() {
        assert_eq!(tokenize("foo(1)")[0], Token::Function("FOO".to_string()));
        assert_eq!(tokenize("foo")[0], Token::String("foo".to_string()));
    }

    #[test]
    fn test_string_literal() {
        assert_eq!(
            tokenize("\"Hello \"\"World\"\"\""),
            vec![Token::String("Hello \"World\"".to_string())]
        );
        assert!(Lexer::new("\"open").tokenize().is_err());
    }

    #[test]
    fn test_booleans_case_insensitive() {
        assert_eq!(
            tokenize("true <> FALSE"),
            vec![
                Token::Boolean(true),
                Token::Operator(Operator::Ne),
                Token::Boolean(false),
            ]
        );
    }

    #[test]
    fn test_comparison_operators() {
        let ops: Vec<Token> = tokenize("1<=2>=3<4>5=6")
            .into_iter()
            .filter(|t| matches!(t, Token::Operator(_)))
            .collect();
        assert_eq!(
            ops,
            vec![
                Token::Operator(Operator::Le),
                Token::Operator(Operator::Ge),
                Token::Operator(Operator::Lt),
                Token::Operator(Operator::Gt),
                Token::Operator(Operator::Eq),
            ]
        );
    }

    #[test]
    fn test_exponent_numbers() {
        assert_eq!(tokenize("1e-3"), vec![Token::Number(0.001)]);
        assert_eq!(tokenize("2.5E+2"), vec![Token::Number(250.0)]);
        assert_eq!(
            tokenize("E1-3"),
            vec![cell("E1"), Token::Operator(Operator::Sub), Token::Number(3.0)]
        );
    }

    #[test]
    fn test_reference_shape_limits() {
        // Row zero and four-letter columns are not references.
        assert_eq!(tokenize("A0"), vec![Token::String("A0".to_string())]);
        assert_eq!(tokenize("ABCD1"), vec![Token::String("ABCD1".to_string())]);
        // A half-valid range falls back to a string.
        assert_eq!(tokenize("A1:B"), vec![Token::String("A1:B".to_string())]);
    }

    #[test]
    fn test_display_round_trip() {
        let rendered: Vec<String> = tokenize("SUM($A$1:B2, \"x\") >= 3")
            .iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(
            rendered,
            vec!["SUM", "(", "$A$1:B2", ",", "\"x\"", ")", ">=", "3"]
        );
    }
}
