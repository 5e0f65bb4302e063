//! A small column-expression language for deriving dataset columns.
//!
//! ```text
//! k = F / x                      # column of the only (or target's) dataset
//! spring.k = spring["F (N)"] / spring.x
//! k_mean = mean(k); ln_T = ln(T)
//! ```
//!
//! Statements are separated by `;` or newlines, `#` starts a comment. Columns
//! and scalars combine elementwise; aggregates reduce a column to a scalar
//! that broadcasts when used. A program is applied atomically: if any
//! statement fails, no dataset changes.

use std::fmt;

use thiserror::Error;

use super::{format_number, Cell, DataError, Datasets};

#[derive(Debug, Error)]
pub enum ExprError {
    #[error("Syntax error at position {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    #[error("Function '{name}' takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    #[error("Length mismatch: {left} values vs {right} values")]
    LengthMismatch { left: usize, right: usize },

    #[error("Column '{0}' is ambiguous with several datasets loaded; write it as dataset.{0}")]
    AmbiguousDataset(String),

    #[error("Statement {index} failed: {source}")]
    Statement {
        index: usize,
        #[source]
        source: Box<ExprError>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Str(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Assign,
    Sep,
}

fn syntax(pos: usize, message: impl Into<String>) -> ExprError {
    ExprError::Syntax {
        pos,
        message: message.into(),
    }
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        match c {
            '\n' | ';' => {
                tokens.push((start, Token::Sep));
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '0'..='9' | '.'
                if c != '.' || chars.get(i + 1).map_or(false, |n| n.is_ascii_digit()) =>
            {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| syntax(start, format!("invalid number '{}'", text)))?;
                tokens.push((start, Token::Number(value)));
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(chars[start..i].iter().collect())));
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(syntax(start, "unterminated string")),
                        Some(&'\\') if i + 1 < chars.len() => {
                            value.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push((start, Token::Str(value)));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push((start, Token::Caret));
                i += 2;
            }
            _ => {
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '^' => Token::Caret,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '.' => Token::Dot,
                    ',' => Token::Comma,
                    '=' => Token::Assign,
                    other => return Err(syntax(start, format!("unexpected character '{}'", other))),
                };
                tokens.push((start, token));
                i += 1;
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
struct ColumnRef {
    dataset: Option<String>,
    column: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Column(ColumnRef),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// First dataset named explicitly anywhere in the expression.
    fn first_dataset(&self) -> Option<&str> {
        match self {
            Expr::Number(_) => None,
            Expr::Column(r) => r.dataset.as_deref(),
            Expr::Neg(e) => e.first_dataset(),
            Expr::Binary(_, l, r) => l.first_dataset().or_else(|| r.first_dataset()),
            Expr::Call(_, args) => args.iter().find_map(|a| a.first_dataset()),
        }
    }
}

#[derive(Debug, Clone)]
struct Statement {
    target: Option<ColumnRef>,
    expr: Expr,
    source: String,
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(p, _)| *p)
            .unwrap_or_else(|| self.src.chars().count())
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ExprError> {
        let at = self.offset();
        match self.next() {
            Some(t) if t == expected => Ok(()),
            _ => Err(syntax(at, format!("expected {}", what))),
        }
    }

    fn program(&mut self) -> Result<Vec<Statement>, ExprError> {
        let mut statements = Vec::new();
        loop {
            while self.peek() == Some(&Token::Sep) {
                self.pos += 1;
            }
            if self.peek().is_none() {
                break;
            }
            let start_char = self.offset();
            let stmt = self.statement()?;
            let end_char = self.offset();
            match self.peek() {
                None | Some(Token::Sep) => {}
                Some(_) => return Err(syntax(end_char, "expected ';' or a new line")),
            }
            let source: String = self
                .src
                .chars()
                .skip(start_char)
                .take(end_char - start_char)
                .collect();
            statements.push(Statement {
                source: source.trim().to_string(),
                ..stmt
            });
        }
        Ok(statements)
    }

    fn statement(&mut self) -> Result<Statement, ExprError> {
        let at = self.offset();
        let expr = self.expr()?;
        if self.peek() != Some(&Token::Assign) {
            return Ok(Statement {
                target: None,
                expr,
                source: String::new(),
            });
        }
        self.pos += 1;
        let target = match expr {
            Expr::Column(r) => r,
            _ => return Err(syntax(at, "left side of '=' must be a column")),
        };
        let value = self.expr()?;
        Ok(Statement {
            target: Some(target),
            expr: value,
            source: String::new(),
        })
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.atom()?;
        if self.peek() == Some(&Token::Caret) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn bracket_column(&mut self) -> Result<String, ExprError> {
        self.expect(Token::LBracket, "'['")?;
        let at = self.offset();
        let name = match self.next() {
            Some(Token::Str(s)) => s,
            _ => return Err(syntax(at, "expected a quoted column name")),
        };
        self.expect(Token::RBracket, "']'")?;
        Ok(name)
    }

    fn atom(&mut self) -> Result<Expr, ExprError> {
        let at = self.offset();
        match self.peek().cloned() {
            Some(Token::Number(v)) => {
                self.pos += 1;
                Ok(Expr::Number(v))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::LBracket) => Ok(Expr::Column(ColumnRef {
                dataset: None,
                column: self.bracket_column()?,
            })),
            Some(Token::Ident(name)) => {
                self.pos += 1;
                match self.peek() {
                    Some(Token::LParen) => {
                        self.pos += 1;
                        let mut args = Vec::new();
                        if self.peek() != Some(&Token::RParen) {
                            loop {
                                args.push(self.expr()?);
                                if self.peek() == Some(&Token::Comma) {
                                    self.pos += 1;
                                } else {
                                    break;
                                }
                            }
                        }
                        self.expect(Token::RParen, "')' after arguments")?;
                        Ok(Expr::Call(name, args))
                    }
                    Some(Token::Dot) => {
                        self.pos += 1;
                        let col_at = self.offset();
                        match self.next() {
                            Some(Token::Ident(column)) => Ok(Expr::Column(ColumnRef {
                                dataset: Some(name),
                                column,
                            })),
                            _ => Err(syntax(col_at, "expected a column name after '.'")),
                        }
                    }
                    Some(Token::LBracket) if matches!(self.peek_at(1), Some(Token::Str(_))) => {
                        Ok(Expr::Column(ColumnRef {
                            dataset: Some(name),
                            column: self.bracket_column()?,
                        }))
                    }
                    _ => Ok(Expr::Column(ColumnRef {
                        dataset: None,
                        column: name,
                    })),
                }
            }
            Some(_) => Err(syntax(at, "expected a number, column or function call")),
            None => Err(syntax(at, "unexpected end of input")),
        }
    }
}

/// Result of evaluating an expression: one number or a column of numbers.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Value {
    fn map(self, f: impl Fn(f64) -> f64) -> Value {
        match self {
            Value::Scalar(v) => Value::Scalar(f(v)),
            Value::Vector(vs) => Value::Vector(vs.into_iter().map(f).collect()),
        }
    }

    fn zip(self, other: Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, ExprError> {
        Ok(match (self, other) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(f(a, b)),
            (Value::Scalar(a), Value::Vector(bs)) => {
                Value::Vector(bs.into_iter().map(|b| f(a, b)).collect())
            }
            (Value::Vector(as_), Value::Scalar(b)) => {
                Value::Vector(as_.into_iter().map(|a| f(a, b)).collect())
            }
            (Value::Vector(as_), Value::Vector(bs)) => {
                if as_.len() != bs.len() {
                    return Err(ExprError::LengthMismatch {
                        left: as_.len(),
                        right: bs.len(),
                    });
                }
                Value::Vector(as_.into_iter().zip(bs).map(|(a, b)| f(a, b)).collect())
            }
        })
    }

    /// Present (non-NaN) values.
    fn present(&self) -> Vec<f64> {
        match self {
            Value::Scalar(v) => vec![*v],
            Value::Vector(vs) => vs.clone(),
        }
        .into_iter()
        .filter(|v| !v.is_nan())
        .collect()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(v) => f.write_str(&format_number(*v)),
            Value::Vector(vs) => {
                const SHOWN: usize = 10;
                let shown: Vec<String> = vs.iter().take(SHOWN).map(|v| format_number(*v)).collect();
                write!(f, "[{}", shown.join(", "))?;
                if vs.len() > SHOWN {
                    write!(f, ", ... ({} values)", vs.len())?;
                }
                f.write_str("]")
            }
        }
    }
}

fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        "g" => Some(9.8),
        _ => None,
    }
}

fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
}

fn aggregate(name: &str, value: &Value) -> Option<f64> {
    let present = value.present();
    let result = match name {
        "mean" | "avg" => {
            if present.is_empty() {
                f64::NAN
            } else {
                present.iter().sum::<f64>() / present.len() as f64
            }
        }
        "sum" => present.iter().sum(),
        "min" => present.iter().copied().fold(f64::NAN, f64::min),
        "max" => present.iter().copied().fold(f64::NAN, f64::max),
        "var" => sample_variance(&present),
        "std" => sample_variance(&present).sqrt(),
        "count" => present.len() as f64,
        "first" => present.first().copied().unwrap_or(f64::NAN),
        "last" => present.last().copied().unwrap_or(f64::NAN),
        _ => return None,
    };
    Some(result)
}

fn elementwise(name: &str) -> Option<fn(f64) -> f64> {
    let f: fn(f64) -> f64 = match name {
        "sqrt" => f64::sqrt,
        "abs" => f64::abs,
        "exp" => f64::exp,
        "ln" | "log" => f64::ln,
        "log10" => f64::log10,
        "log2" => f64::log2,
        "sin" => f64::sin,
        "cos" => f64::cos,
        "tan" => f64::tan,
        "asin" => f64::asin,
        "acos" => f64::acos,
        "atan" => f64::atan,
        "sinh" => f64::sinh,
        "cosh" => f64::cosh,
        "tanh" => f64::tanh,
        "deg" => f64::to_degrees,
        "rad" => f64::to_radians,
        "round" => f64::round,
        "floor" => f64::floor,
        "ceil" => f64::ceil,
        _ => return None,
    };
    Some(f)
}

fn binary_function(name: &str) -> Option<fn(f64, f64) -> f64> {
    let f: fn(f64, f64) -> f64 = match name {
        "pow" => f64::powf,
        "atan2" => f64::atan2,
        "min2" => f64::min,
        "max2" => f64::max,
        _ => return None,
    };
    Some(f)
}

fn arity(name: &str, expected: &str, got: usize) -> ExprError {
    ExprError::Arity {
        name: name.to_string(),
        expected: expected.to_string(),
        got,
    }
}

struct Evaluator<'a> {
    datasets: &'a Datasets,
    default_dataset: Option<&'a str>,
}

impl<'a> Evaluator<'a> {
    fn column(&self, r: &ColumnRef) -> Result<Value, ExprError> {
        let dataset = match (&r.dataset, self.default_dataset) {
            (Some(ds), _) => ds.as_str(),
            (None, Some(ds)) => {
                let data = self.datasets.get(ds)?;
                if !data.has_column(&r.column) {
                    if let Some(v) = constant(&r.column) {
                        return Ok(Value::Scalar(v));
                    }
                }
                ds
            }
            (None, None) => {
                return match constant(&r.column) {
                    Some(v) => Ok(Value::Scalar(v)),
                    None => Err(ExprError::AmbiguousDataset(r.column.clone())),
                };
            }
        };
        Ok(Value::Vector(self.datasets.get(dataset)?.numbers(&r.column)?))
    }

    fn eval(&self, expr: &Expr) -> Result<Value, ExprError> {
        match expr {
            Expr::Number(v) => Ok(Value::Scalar(*v)),
            Expr::Column(r) => self.column(r),
            Expr::Neg(inner) => Ok(self.eval(inner)?.map(|v| -v)),
            Expr::Binary(op, l, r) => {
                let left = self.eval(l)?;
                let right = self.eval(r)?;
                match op {
                    BinOp::Add => left.zip(right, |a, b| a + b),
                    BinOp::Sub => left.zip(right, |a, b| a - b),
                    BinOp::Mul => left.zip(right, |a, b| a * b),
                    BinOp::Div => left.zip(right, |a, b| a / b),
                    BinOp::Rem => left.zip(right, |a, b| a - b * (a / b).floor()),
                    BinOp::Pow => left.zip(right, f64::powf),
                }
            }
            Expr::Call(name, args) => self.call(name, args),
        }
    }

    fn call(&self, name: &str, args: &[Expr]) -> Result<Value, ExprError> {
        let lowered = name.to_lowercase();
        let name = lowered.as_str();

        if name == "round" && args.len() == 2 {
            let digits = match self.eval(&args[1])? {
                Value::Scalar(d) => d as i32,
                Value::Vector(_) => {
                    return Err(arity(name, "1, or 2 with a scalar digit count,", 2))
                }
            };
            let scale = 10f64.powi(digits);
            return Ok(self.eval(&args[0])?.map(|v| (v * scale).round() / scale));
        }
        if let Some(f) = elementwise(name) {
            if args.len() != 1 {
                return Err(arity(name, "1", args.len()));
            }
            return Ok(self.eval(&args[0])?.map(f));
        }
        if let Some(f) = binary_function(name) {
            if args.len() != 2 {
                return Err(arity(name, "2", args.len()));
            }
            let a = self.eval(&args[0])?;
            let b = self.eval(&args[1])?;
            return a.zip(b, f);
        }
        if args.len() == 1 {
            let value = self.eval(&args[0])?;
            if let Some(v) = aggregate(name, &value) {
                return Ok(Value::Scalar(v));
            }
        } else if aggregate(name, &Value::Scalar(0.0)).is_some() {
            return Err(arity(name, "1", args.len()));
        }
        Err(ExprError::UnknownFunction(name.to_string()))
    }
}

/// What a program did, for the agent's observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutcome {
    /// `dataset.column` for every assignment, in order.
    pub assigned: Vec<String>,
    /// `(statement, value)` for statements without assignment.
    pub values: Vec<(String, Value)>,
}

impl fmt::Display for ExecOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.assigned.is_empty() && self.values.is_empty() {
            return f.write_str("Nothing to execute.");
        }
        let mut lines = Vec::new();
        if !self.assigned.is_empty() {
            lines.push(format!("Assigned columns: {}", self.assigned.join(", ")));
        }
        for (source, value) in &self.values {
            lines.push(format!("{} = {}", source, value));
        }
        f.write_str(&lines.join("\n"))
    }
}

/// Parse and run `src` against `datasets`.
pub fn execute(src: &str, datasets: &mut Datasets) -> Result<ExecOutcome, ExprError> {
    let tokens = tokenize(src)?;
    let statements = Parser {
        src,
        tokens,
        pos: 0,
    }
    .program()?;

    let mut working = datasets.clone();
    let mut outcome = ExecOutcome::default();
    for (i, stmt) in statements.iter().enumerate() {
        run_statement(stmt, &mut working, &mut outcome).map_err(|e| ExprError::Statement {
            index: i + 1,
            source: Box::new(e),
        })?;
    }
    *datasets = working;
    Ok(outcome)
}

fn run_statement(
    stmt: &Statement,
    datasets: &mut Datasets,
    outcome: &mut ExecOutcome,
) -> Result<(), ExprError> {
    let only = (datasets.len() == 1).then(|| datasets.names().remove(0));
    let default_dataset: Option<String> = stmt
        .target
        .as_ref()
        .and_then(|t| t.dataset.clone())
        .or(only)
        .or_else(|| stmt.expr.first_dataset().map(str::to_string));

    let value = Evaluator {
        datasets: &*datasets,
        default_dataset: default_dataset.as_deref(),
    }
    .eval(&stmt.expr)?;

    let Some(target) = &stmt.target else {
        outcome.values.push((stmt.source.clone(), value));
        return Ok(());
    };

    let dataset_name =
        default_dataset.ok_or_else(|| ExprError::AmbiguousDataset(target.column.clone()))?;
    let dataset = datasets.get_mut(&dataset_name)?;
    let rows = dataset.row_count();
    let cells: Vec<Cell> = match value {
        Value::Scalar(v) => vec![Cell::from_number(v); rows],
        Value::Vector(vs) => vs.into_iter().map(Cell::from_number).collect(),
    };
    dataset.set_column(&target.column, cells)?;
    outcome
        .assigned
        .push(format!("{}.{}", dataset_name, target.column));
    Ok(())
}
