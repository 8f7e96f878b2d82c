use std::fmt::Display;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::data::sample::Sample;
use crate::error::PredicateError;

/// A boolean row selection evaluated against an in-memory sample.
///
/// Evaluation failures are reported as `PredicateError`; callers skip the
/// predicate instead of aborting.
pub trait RowPredicate: Send + Sync {
    fn describe(&self) -> String;
    fn evaluate(&self, sample: &Sample) -> Result<Vec<bool>, PredicateError>;
}

pub type Cuts = Vec<Box<dyn RowPredicate>>;

/// Closure-backed predicate
pub struct FnPredicate<F> {
    name: String,
    f: F,
}

impl<F> FnPredicate<F>
where
    F: Fn(&Sample) -> Result<Vec<bool>, PredicateError> + Send + Sync,
{
    pub fn new(name: &str, f: F) -> Self {
        FnPredicate { name: name.to_string(), f }
    }
}

impl<F> RowPredicate for FnPredicate<F>
where
    F: Fn(&Sample) -> Result<Vec<bool>, PredicateError> + Send + Sync,
{
    fn describe(&self) -> String {
        self.name.clone()
    }

    fn evaluate(&self, sample: &Sample) -> Result<Vec<bool>, PredicateError> {
        (self.f)(sample)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&",
            BinOp::Or => "|",
        }
    }

    fn apply(&self, a: f64, b: f64) -> f64 {
        let truth = |x: bool| if x { 1.0 } else { 0.0 };
        match self {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Lt => truth(a < b),
            BinOp::Le => truth(a <= b),
            BinOp::Gt => truth(a > b),
            BinOp::Ge => truth(a >= b),
            BinOp::Eq => truth(a == b),
            BinOp::Ne => truth(a != b),
            BinOp::And => truth(a != 0.0 && b != 0.0),
            BinOp::Or => truth(a != 0.0 || b != 0.0),
        }
    }
}

/// Typed selection expression over named scalar fields.
///
/// Booleans are carried as 1.0 / 0.0 so comparisons, arithmetic and logic
/// compose freely, e.g. `(abs(eta) <= 2.5) & (SCTHits + PixelHits >= 7)`.
///
/// Operators bind as in Python: `&` and `|` bind tighter than comparisons,
/// `and`, `or` and `not` looser. A comparison left unparenthesized next to
/// `&` or `|` therefore reads as a chained comparison, which is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Field(String),
    Const(f64),
    Neg(Box<Expr>),
    Abs(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

enum Value {
    Scalar(f64),
    Rows(Vec<f64>),
}

impl Value {
    fn map(self, f: impl Fn(f64) -> f64) -> Value {
        match self {
            Value::Scalar(v) => Value::Scalar(f(v)),
            Value::Rows(values) => Value::Rows(values.into_iter().map(f).collect()),
        }
    }
}

impl Expr {
    pub fn field(name: &str) -> Expr {
        Expr::Field(name.to_string())
    }

    pub fn constant(value: f64) -> Expr {
        Expr::Const(value)
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// Names of the fields the expression reads
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Field(name) => out.push(name),
            Expr::Const(_) => {}
            Expr::Neg(inner) | Expr::Abs(inner) | Expr::Not(inner) => inner.collect_fields(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.collect_fields(out);
                rhs.collect_fields(out);
            }
        }
    }

    fn eval_values(&self, sample: &Sample) -> Result<Value, PredicateError> {
        match self {
            Expr::Const(v) => Ok(Value::Scalar(*v)),
            Expr::Field(name) => {
                let column = sample
                    .get(name)
                    .ok_or_else(|| PredicateError::MissingField(name.clone()))?;
                if !column.is_scalar() {
                    return Err(PredicateError::NotScalar {
                        field: name.clone(),
                        shape: column.row_shape().to_vec(),
                    });
                }
                Ok(Value::Rows(column.to_f64_vec()))
            }
            Expr::Neg(inner) => Ok(inner.eval_values(sample)?.map(|v| -v)),
            Expr::Abs(inner) => Ok(inner.eval_values(sample)?.map(f64::abs)),
            Expr::Not(inner) => Ok(inner.eval_values(sample)?.map(|v| if v == 0.0 { 1.0 } else { 0.0 })),
            Expr::Binary(op, lhs, rhs) => {
                let lhs = lhs.eval_values(sample)?;
                let rhs = rhs.eval_values(sample)?;
                Ok(match (lhs, rhs) {
                    (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(op.apply(a, b)),
                    (Value::Rows(a), Value::Scalar(b)) => Value::Rows(a.into_iter().map(|x| op.apply(x, b)).collect()),
                    (Value::Scalar(a), Value::Rows(b)) => Value::Rows(b.into_iter().map(|x| op.apply(a, x)).collect()),
                    (Value::Rows(a), Value::Rows(b)) => {
                        Value::Rows(a.into_iter().zip(b).map(|(x, y)| op.apply(x, y)).collect())
                    }
                })
            }
        }
    }

    /// Evaluate to one boolean per row
    pub fn eval(&self, sample: &Sample) -> Result<Vec<bool>, PredicateError> {
        match self.eval_values(sample)? {
            Value::Scalar(v) => Ok(vec![v != 0.0; sample.len()]),
            Value::Rows(values) => Ok(values.into_iter().map(|v| v != 0.0).collect()),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Field(name) => write!(f, "{}", name),
            Expr::Const(v) => write!(f, "{}", v),
            Expr::Neg(inner) => write!(f, "-{}", inner),
            Expr::Abs(inner) => write!(f, "abs({})", inner),
            Expr::Not(inner) => write!(f, "!{}", inner),
            Expr::Binary(op, lhs, rhs) => write!(f, "({} {} {})", lhs, op.symbol(), rhs),
        }
    }
}

impl RowPredicate for Expr {
    fn describe(&self) -> String {
        self.to_string()
    }

    fn evaluate(&self, sample: &Sample) -> Result<Vec<bool>, PredicateError> {
        self.eval(sample)
    }
}

impl FromStr for Expr {
    type Err = PredicateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(s)?;
        let mut parser = Parser { source: s, tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error(&format!("unexpected `{}`", parser.tokens[parser.pos].text())));
        }
        Ok(expr)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(String),
    LParen,
    RParen,
}

impl Token {
    fn text(&self) -> String {
        match self {
            Token::Number(v) => v.to_string(),
            Token::Ident(name) => name.clone(),
            Token::Op(op) => op.clone(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
        }
    }
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^\s*(?:(?P<field>sample\[\s*["'](?P<key>[^"']+)["']\s*\])|(?P<num>\d+\.?\d*(?:[eE][+-]?\d+)?|\.\d+(?:[eE][+-]?\d+)?)|(?P<ident>[A-Za-z_][A-Za-z0-9_]*)|(?P<op><=|>=|==|!=|&&|\|\||[<>+\-*/&|!~])|(?P<lp>\()|(?P<rp>\)))"#,
        )
        .expect("token pattern is valid")
    })
}

fn tokenize(source: &str) -> Result<Vec<Token>, PredicateError> {
    let re = token_regex();
    let mut tokens = Vec::new();
    let mut rest = source;

    while !rest.trim().is_empty() {
        let caps = re.captures(rest).ok_or_else(|| PredicateError::Malformed {
            expr: source.to_string(),
            reason: format!("cannot read `{}`", rest.trim()),
        })?;

        let token = if let Some(key) = caps.name("key") {
            Token::Ident(key.as_str().to_string())
        } else if let Some(num) = caps.name("num") {
            let value = num.as_str().parse::<f64>().map_err(|e| PredicateError::Malformed {
                expr: source.to_string(),
                reason: e.to_string(),
            })?;
            Token::Number(value)
        } else if let Some(ident) = caps.name("ident") {
            match ident.as_str() {
                "True" | "true" => Token::Number(1.0),
                "False" | "false" => Token::Number(0.0),
                "and" | "or" | "not" => Token::Op(ident.as_str().to_string()),
                other => Token::Ident(other.to_string()),
            }
        } else if let Some(op) = caps.name("op") {
            Token::Op(op.as_str().to_string())
        } else if caps.name("lp").is_some() {
            Token::LParen
        } else {
            Token::RParen
        };

        tokens.push(token);
        rest = &rest[caps.get(0).map_or(rest.len(), |m| m.end())..];
    }

    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> PredicateError {
        PredicateError::Malformed { expr: self.source.to_string(), reason: reason.to_string() }
    }

    fn peek_op(&self) -> Option<&str> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(op)) => Some(op.as_str()),
            _ => None,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek_op(), Some("or") | Some("||")) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::binary(BinOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.parse_not()?;
        while matches!(self.peek_op(), Some("and") | Some("&&")) {
            self.pos += 1;
            let rhs = self.parse_not()?;
            lhs = Expr::binary(BinOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, PredicateError> {
        if matches!(self.peek_op(), Some("not") | Some("!")) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_cmp()
    }

    fn comparison(&self) -> Option<BinOp> {
        match self.peek_op() {
            Some("<") => Some(BinOp::Lt),
            Some("<=") => Some(BinOp::Le),
            Some(">") => Some(BinOp::Gt),
            Some(">=") => Some(BinOp::Ge),
            Some("==") => Some(BinOp::Eq),
            Some("!=") => Some(BinOp::Ne),
            _ => None,
        }
    }

    fn parse_cmp(&mut self) -> Result<Expr, PredicateError> {
        let lhs = self.parse_bitor()?;
        let Some(op) = self.comparison() else {
            return Ok(lhs);
        };
        self.pos += 1;
        let rhs = self.parse_bitor()?;
        if self.comparison().is_some() {
            return Err(self.error("chained comparison, parenthesize comparisons joined by `&` or `|`"));
        }
        Ok(Expr::binary(op, lhs, rhs))
    }

    fn parse_bitor(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.parse_bitand()?;
        while self.peek_op() == Some("|") {
            self.pos += 1;
            let rhs = self.parse_bitand()?;
            lhs = Expr::binary(BinOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.parse_sum()?;
        while self.peek_op() == Some("&") {
            self.pos += 1;
            let rhs = self.parse_sum()?;
            lhs = Expr::binary(BinOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_sum(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek_op() {
                Some("+") => BinOp::Add,
                Some("-") => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn parse_term(&mut self) -> Result<Expr, PredicateError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_op() {
                Some("*") => BinOp::Mul,
                Some("/") => BinOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, PredicateError> {
        match self.peek_op() {
            Some("-") => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            Some("~") => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_atom(),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, PredicateError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| self.error("unexpected end of expression"))?;
        self.pos += 1;

        match token {
            Token::Number(v) => Ok(Expr::Const(v)),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Token::Ident(name) if self.tokens.get(self.pos) == Some(&Token::LParen) => {
                self.pos += 1;
                let arg = self.parse_or()?;
                self.expect_rparen()?;
                match name.as_str() {
                    "abs" => Ok(Expr::Abs(Box::new(arg))),
                    other => Err(self.error(&format!("unknown function `{}`", other))),
                }
            }
            Token::Ident(name) => Ok(Expr::Field(name)),
            other => Err(self.error(&format!("unexpected `{}`", other.text()))),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), PredicateError> {
        match self.tokens.get(self.pos) {
            Some(Token::RParen) => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error("missing `)`")),
        }
    }
}

/// Compile selection strings once; unparsable strings are reported and dropped.
pub fn compile_cuts(sources: &[String]) -> Cuts {
    let mut cuts: Cuts = Vec::new();
    for source in sources.iter().filter(|s| !s.trim().is_empty()) {
        match source.parse::<Expr>() {
            Ok(expr) => cuts.push(Box::new(expr)),
            Err(e) => log::warn!("invalid cut skipped: {}", e),
        }
    }
    cuts
}
