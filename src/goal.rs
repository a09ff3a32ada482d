//! The goal algebra: `GoalRef` (a tagged event-counter slice) and its hand-rolled
//! recursive-descent parser.
//!
//! Grounded on clarium's `server/query/query_parse_arith_expr.rs`: a char/token
//! based recursive-descent parser with no parser-generator crate, the same
//! tokenize-then-recurse shape (`parse_arith_expr` → `parse_term` → `parse_factor`).

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::AppError;

/// Predicate operator on a dimension column (§3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `=^`, prefix match.
    Prefix,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Prefix => "=^",
        }
    }

    /// Evaluate this operator comparing a table value against the predicate literal.
    pub fn matches(self, value: &str, literal: &str) -> bool {
        match self {
            Op::Eq => value == literal,
            Op::Ne => value != literal,
            Op::Prefix => value.starts_with(literal),
            Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                match (value.parse::<f64>(), literal.parse::<f64>()) {
                    (Ok(v), Ok(l)) => match self {
                        Op::Lt => v < l,
                        Op::Le => v <= l,
                        Op::Gt => v > l,
                        Op::Ge => v >= l,
                        _ => unreachable!(),
                    },
                    _ => match self {
                        Op::Lt => value < literal,
                        Op::Le => value <= literal,
                        Op::Gt => value > literal,
                        Op::Ge => value >= literal,
                        _ => unreachable!(),
                    },
                }
            }
        }
    }
}

/// The outer function applied to a goal reference: `count`, `value`, or `unique`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalFunc {
    Count,
    Value,
    Unique,
}

impl GoalFunc {
    /// `(column, column_sqr)` per §3.
    fn columns(self) -> (&'static str, &'static str) {
        match self {
            GoalFunc::Count => ("count", "sum_sqr_count"),
            GoalFunc::Value => ("sum_value", "sum_sqr_value"),
            GoalFunc::Unique => ("count_unique", "count_unique"),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            GoalFunc::Count => "count",
            GoalFunc::Value => "value",
            GoalFunc::Unique => "unique",
        }
    }
}

/// A reference to an event-counter slice (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalRef {
    pub func: GoalFunc,
    pub unit_type: String,
    pub agg_type: String,
    pub goal_name: String,
    /// Ordered by dimension name so canonical string form is stable.
    pub dimension_predicates: BTreeMap<String, (Op, String)>,
    pub column: &'static str,
    pub column_sqr: &'static str,
}

impl GoalRef {
    pub fn new(
        func: GoalFunc,
        unit_type: String,
        agg_type: String,
        goal_name: String,
        dimension_predicates: BTreeMap<String, (Op, String)>,
    ) -> Result<Self, AppError> {
        if agg_type != "unit" && agg_type != "global" {
            return Err(AppError::parse(format!(
                "unknown agg_type '{agg_type}', expected 'unit' or 'global'"
            )));
        }
        let (column, column_sqr) = func.columns();
        Ok(GoalRef { func, unit_type, agg_type, goal_name, dimension_predicates, column, column_sqr })
    }

    /// True iff at least one predicate literal is non-empty (§3).
    pub fn is_dimensional(&self) -> bool {
        self.dimension_predicates.values().any(|(_, lit)| !lit.is_empty())
    }

    /// Canonical string form (§4.1): `"{unit_type}.{agg_type}.{goal}"` plus, if
    /// dimensional, a bracketed comma-separated `dim{op}{literal}` list.
    pub fn canonical_string(&self) -> String {
        let mut s = format!("{}.{}.{}", self.unit_type, self.agg_type, self.goal_name);
        if self.is_dimensional() {
            let mut first = true;
            s.push('[');
            for (dim, (op, lit)) in &self.dimension_predicates {
                if !first {
                    s.push(',');
                }
                first = false;
                let _ = write!(s, "{dim}{}{lit}", op.as_str());
            }
            s.push(']');
        }
        s
    }

    /// Extend this ref's predicate map so it carries an entry for every dimension
    /// referenced anywhere in the experiment (§4.1 dimension-schema unification).
    /// Missing dimensions get `(Op::Eq, "")`.
    pub fn unify_dimensions(&mut self, all_dimensions: &std::collections::BTreeSet<String>) {
        for dim in all_dimensions {
            self.dimension_predicates.entry(dim.clone()).or_insert((Op::Eq, String::new()));
        }
    }
}

impl std::hash::Hash for GoalRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical_string().hash(state);
    }
}

/// Recursive-descent tokenizer + parser for the goal-algebra grammar (§4.1 EBNF).
pub(crate) struct GoalParser<'a> {
    chars: Vec<char>,
    pos: usize,
    src: &'a str,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_literal_char(c: char) -> bool {
    c.is_alphanumeric() || "_-.%/| ".contains(c)
}

impl<'a> GoalParser<'a> {
    pub fn new(src: &'a str) -> Self {
        GoalParser { chars: src.chars().collect(), pos: 0, src }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn err(&self, msg: impl Into<String>) -> AppError {
        AppError::parse(format!("{} (in \"{}\")", msg.into(), self.src))
    }

    fn expect_char(&mut self, c: char) -> Result<(), AppError> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err(format!("expected '{c}'")))
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if pred(c)) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_ident(&mut self) -> Result<String, AppError> {
        self.skip_ws();
        let ident = self.take_while(is_ident_char);
        if ident.is_empty() {
            return Err(self.err("expected identifier"));
        }
        Ok(ident)
    }

    /// `expr := term (('+' | '-' | '~') term)*`
    pub fn parse_expr(&mut self) -> Result<crate::expr::Expr, AppError> {
        let mut node = self.parse_term()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('+') => {
                    self.pos += 1;
                    let rhs = self.parse_term()?;
                    node = crate::expr::Expr::Add(Box::new(node), Box::new(rhs));
                }
                Some('-') => {
                    self.pos += 1;
                    let rhs = self.parse_term()?;
                    node = crate::expr::Expr::Sub(Box::new(node), Box::new(rhs));
                }
                Some('~') => {
                    self.pos += 1;
                    let rhs = self.parse_term()?;
                    node = crate::expr::Expr::Tilde(Box::new(node), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(node)
    }

    /// `term := factor (('*' | '/') factor)*`
    fn parse_term(&mut self) -> Result<crate::expr::Expr, AppError> {
        let mut node = self.parse_factor()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('*') => {
                    self.pos += 1;
                    let rhs = self.parse_factor()?;
                    node = crate::expr::Expr::Mul(Box::new(node), Box::new(rhs));
                }
                Some('/') => {
                    self.pos += 1;
                    let rhs = self.parse_factor()?;
                    node = crate::expr::Expr::Div(Box::new(node), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(node)
    }

    /// `factor := number | goalref | '(' expr ')'`
    fn parse_factor(&mut self) -> Result<crate::expr::Expr, AppError> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect_char(')')?;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || (c == '-' && self.digit_follows_minus()) => {
                self.parse_number()
            }
            Some(c) if c.is_alphabetic() => self.parse_goalref(),
            other => Err(self.err(format!("unexpected token {other:?}"))),
        }
    }

    fn digit_follows_minus(&self) -> bool {
        matches!(self.chars.get(self.pos + 1), Some(c) if c.is_ascii_digit())
    }

    fn parse_number(&mut self) -> Result<crate::expr::Expr, AppError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        let digits = self.take_while(|c| c.is_ascii_digit());
        if digits.is_empty() {
            return Err(self.err("malformed number literal"));
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        let n: f64 = text.parse().map_err(|_| self.err("malformed number literal"))?;
        Ok(crate::expr::Expr::Number(n))
    }

    /// `goalref := func '(' unit_type '.' agg_type '.' goal_name [ '(' preds ')' ] ')'`
    fn parse_goalref(&mut self) -> Result<crate::expr::Expr, AppError> {
        let func_name = self.parse_ident()?;
        let func = match func_name.as_str() {
            "count" => GoalFunc::Count,
            "value" => GoalFunc::Value,
            "unique" => GoalFunc::Unique,
            other => return Err(self.err(format!("unknown function '{other}'"))),
        };
        self.expect_char('(')?;
        let unit_type = self.parse_ident()?;
        self.expect_char('.')?;
        let agg_type = self.parse_ident()?;
        self.expect_char('.')?;
        let goal_name = self.parse_ident()?;

        let mut preds = BTreeMap::new();
        self.skip_ws();
        if self.peek() == Some('(') {
            self.pos += 1;
            loop {
                self.skip_ws();
                let dim = self.parse_ident()?;
                self.skip_ws();
                let op = self.parse_op()?;
                let literal = self.take_while(is_literal_char).trim_end().to_string();
                if preds.insert(dim.clone(), (op, literal)).is_some() {
                    return Err(self.err(format!("duplicate dimension predicate '{dim}'")));
                }
                self.skip_ws();
                match self.peek() {
                    Some(',') => {
                        self.pos += 1;
                    }
                    Some(')') => {
                        self.pos += 1;
                        break;
                    }
                    other => return Err(self.err(format!("unexpected token in predicate list: {other:?}"))),
                }
            }
        }
        self.expect_char(')')?;
        let goal_ref = GoalRef::new(func, unit_type, agg_type, goal_name, preds)?;
        Ok(crate::expr::Expr::Goal(Box::new(goal_ref)))
    }

    fn parse_op(&mut self) -> Result<Op, AppError> {
        self.skip_ws();
        let two: String = self.chars.get(self.pos..self.pos + 2).map(|s| s.iter().collect()).unwrap_or_default();
        match two.as_str() {
            "!=" => {
                self.pos += 2;
                return Ok(Op::Ne);
            }
            "<=" => {
                self.pos += 2;
                return Ok(Op::Le);
            }
            ">=" => {
                self.pos += 2;
                return Ok(Op::Ge);
            }
            "=^" => {
                self.pos += 2;
                return Ok(Op::Prefix);
            }
            _ => {}
        }
        match self.peek() {
            Some('=') => {
                self.pos += 1;
                Ok(Op::Eq)
            }
            Some('<') => {
                self.pos += 1;
                Ok(Op::Lt)
            }
            Some('>') => {
                self.pos += 1;
                Ok(Op::Gt)
            }
            other => Err(self.err(format!("expected predicate operator, found {other:?}"))),
        }
    }

    fn finish(&mut self) -> Result<(), AppError> {
        self.skip_ws();
        if self.pos != self.chars.len() {
            return Err(self.err("trailing input after expression"));
        }
        Ok(())
    }
}

/// Parse a goal-algebra expression string into an `Expr` tree (§4.1).
pub fn parse_expression(src: &str) -> Result<crate::expr::Expr, AppError> {
    let mut p = GoalParser::new(src);
    let e = p.parse_expr()?;
    p.finish()?;
    Ok(e)
}
