//! Typed guard and statement trees, with the small parser that builds them
//! from declaration attribute text.
//!
//! Guards are conjunctions of clock constraints and integer guards. Clock
//! constraints are normalized at parse time into upper-bound form
//! `left - right < bound` / `left - right <= bound` where `None` stands for
//! the constant zero, so the zone layer applies them without case analysis.
//! Statements are sequences of integer assignments and clock resets.

use smallvec::SmallVec;
use std::collections::HashMap;
use thiserror::Error;

/// Integer expression over state variables and parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntExpr {
    Const(i32),
    /// Integer variable, by index.
    Var(usize),
    /// Parameter, by index. Parameters are read-only constants.
    Param(usize),
    Neg(Box<IntExpr>),
    Binary {
        op: IntOp,
        left: Box<IntExpr>,
        right: Box<IntExpr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Relational guard over integer expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntGuard {
    pub left: IntExpr,
    pub op: RelOp,
    pub right: IntExpr,
}

/// Strictness of a clock constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockRel {
    Lt,
    Le,
}

/// Upper-bound clock constraint `left - right < bound` (or `<=`), with
/// `None` standing for the constant zero. The bound is evaluated against
/// the integer store when the constraint is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockConstraint {
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub rel: ClockRel,
    pub bound: IntExpr,
}

/// Conjunction of clock constraints and integer guards. Most guards hold
/// one or two atoms, so the containers store that inline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Guard {
    pub clock: SmallVec<[ClockConstraint; 2]>,
    pub int: SmallVec<[IntGuard; 2]>,
}

impl Guard {
    /// The guard that always holds.
    pub fn always() -> Guard {
        Guard::default()
    }

    pub fn is_trivial(&self) -> bool {
        self.clock.is_empty() && self.int.is_empty()
    }
}

/// One update of a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// `var := value`.
    AssignInt { var: usize, value: IntExpr },
    /// `clock := value`.
    ResetToValue { clock: usize, value: IntExpr },
    /// `clock := from`.
    ResetToClock { clock: usize, from: usize },
    /// `clock := from + value`.
    ResetToSum {
        clock: usize,
        from: usize,
        value: IntExpr,
    },
}

/// A sequence of updates, executed left to right.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Statement {
    pub updates: SmallVec<[Update; 2]>,
}

impl Statement {
    pub fn nop() -> Statement {
        Statement::default()
    }
}

/// Variable sets collected by static analysis, as bit masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VarSets {
    pub clocks: u64,
    pub intvars: u64,
    pub params: u64,
}

impl VarSets {
    pub fn union(self, other: VarSets) -> VarSets {
        VarSets {
            clocks: self.clocks | other.clocks,
            intvars: self.intvars | other.intvars,
            params: self.params | other.params,
        }
    }
}

fn int_expr_vars(e: &IntExpr, out: &mut VarSets) {
    match e {
        IntExpr::Const(_) => {}
        IntExpr::Var(v) => out.intvars |= 1 << v,
        IntExpr::Param(p) => out.params |= 1 << p,
        IntExpr::Neg(inner) => int_expr_vars(inner, out),
        IntExpr::Binary { left, right, .. } => {
            int_expr_vars(left, out);
            int_expr_vars(right, out);
        }
    }
}

/// Variables read by a guard.
pub fn guard_reads(g: &Guard) -> VarSets {
    let mut out = VarSets::default();
    for cc in &g.clock {
        if let Some(x) = cc.left {
            out.clocks |= 1 << x;
        }
        if let Some(y) = cc.right {
            out.clocks |= 1 << y;
        }
        int_expr_vars(&cc.bound, &mut out);
    }
    for ig in &g.int {
        int_expr_vars(&ig.left, &mut out);
        int_expr_vars(&ig.right, &mut out);
    }
    out
}

/// Variables read by a statement (right-hand sides).
pub fn statement_reads(s: &Statement) -> VarSets {
    let mut out = VarSets::default();
    for u in &s.updates {
        match u {
            Update::AssignInt { value, .. } | Update::ResetToValue { value, .. } => {
                int_expr_vars(value, &mut out)
            }
            Update::ResetToClock { from, .. } => out.clocks |= 1 << from,
            Update::ResetToSum { from, value, .. } => {
                out.clocks |= 1 << from;
                int_expr_vars(value, &mut out);
            }
        }
    }
    out
}

/// Variables written by a statement (left-hand sides).
pub fn statement_writes(s: &Statement) -> VarSets {
    let mut out = VarSets::default();
    for u in &s.updates {
        match u {
            Update::AssignInt { var, .. } => out.intvars |= 1 << var,
            Update::ResetToValue { clock, .. }
            | Update::ResetToClock { clock, .. }
            | Update::ResetToSum { clock, .. } => out.clocks |= 1 << clock,
        }
    }
    out
}

/// Parse error for guard and statement text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unexpected end of input")]
    UnexpectedEnd,

    #[error("clock '{0}' cannot appear in an integer expression")]
    ClockInIntExpr(String),

    #[error("'{0}' is not a clock; clock differences compare two clocks")]
    NotAClock(String),

    #[error("disequality over clocks is not convex")]
    ClockDisequality,

    #[error("integer literal out of range: {0}")]
    IntOutOfRange(String),

    #[error("parameter '{0}' is read-only")]
    AssignToParam(String),
}

/// Symbol tables used to resolve identifiers while parsing.
pub struct Symbols<'a> {
    pub clocks: &'a HashMap<String, usize>,
    pub intvars: &'a HashMap<String, usize>,
    pub params: &'a HashMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Int(i32),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    AndAnd,
    Comma,
    Assign,
    Rel(RelOp),
}

impl std::fmt::Display for Tok {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tok::Ident(s) => write!(f, "{}", s),
            Tok::Int(n) => write!(f, "{}", n),
            Tok::Plus => write!(f, "+"),
            Tok::Minus => write!(f, "-"),
            Tok::Star => write!(f, "*"),
            Tok::Slash => write!(f, "/"),
            Tok::Percent => write!(f, "%"),
            Tok::LParen => write!(f, "("),
            Tok::RParen => write!(f, ")"),
            Tok::AndAnd => write!(f, "&&"),
            Tok::Comma => write!(f, ","),
            Tok::Assign => write!(f, "="),
            Tok::Rel(RelOp::Eq) => write!(f, "=="),
            Tok::Rel(RelOp::Ne) => write!(f, "!="),
            Tok::Rel(RelOp::Lt) => write!(f, "<"),
            Tok::Rel(RelOp::Le) => write!(f, "<="),
            Tok::Rel(RelOp::Gt) => write!(f, ">"),
            Tok::Rel(RelOp::Ge) => write!(f, ">="),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Tok>, ExprError> {
    let mut toks = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                toks.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                toks.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                toks.push(Tok::Star);
                i += 1;
            }
            '/' => {
                toks.push(Tok::Slash);
                i += 1;
            }
            '%' => {
                toks.push(Tok::Percent);
                i += 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    toks.push(Tok::AndAnd);
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedToken("&".to_string()));
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Rel(RelOp::Eq));
                    i += 2;
                } else {
                    toks.push(Tok::Assign);
                    i += 1;
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Rel(RelOp::Ne));
                    i += 2;
                } else {
                    return Err(ExprError::UnexpectedToken("!".to_string()));
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Rel(RelOp::Le));
                    i += 2;
                } else {
                    toks.push(Tok::Rel(RelOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    toks.push(Tok::Rel(RelOp::Ge));
                    i += 2;
                } else {
                    toks.push(Tok::Rel(RelOp::Gt));
                    i += 1;
                }
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
                let lit = &text[start..i];
                let n: i32 = lit
                    .parse()
                    .map_err(|_| ExprError::IntOutOfRange(lit.to_string()))?;
                toks.push(Tok::Int(n));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                toks.push(Tok::Ident(text[start..i].to_string()));
            }
            _ => return Err(ExprError::UnexpectedToken(c.to_string())),
        }
    }
    Ok(toks)
}

struct Parser<'a> {
    toks: Vec<Tok>,
    pos: usize,
    syms: &'a Symbols<'a>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Result<Tok, ExprError> {
        let t = self.toks.get(self.pos).cloned().ok_or(ExprError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(t)
    }

    fn expect_rel(&mut self) -> Result<RelOp, ExprError> {
        match self.next()? {
            Tok::Rel(op) => Ok(op),
            t => Err(ExprError::UnexpectedToken(t.to_string())),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    // expr := term (('+' | '-') term)*
    fn parse_int_expr(&mut self) -> Result<IntExpr, ExprError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => IntOp::Add,
                Some(Tok::Minus) => IntOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = IntExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    // term := factor (('*' | '/' | '%') factor)*
    fn parse_term(&mut self) -> Result<IntExpr, ExprError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => IntOp::Mul,
                Some(Tok::Slash) => IntOp::Div,
                Some(Tok::Percent) => IntOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_factor()?;
            left = IntExpr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<IntExpr, ExprError> {
        match self.next()? {
            Tok::Int(n) => Ok(IntExpr::Const(n)),
            Tok::Minus => {
                let inner = self.parse_factor()?;
                Ok(match inner {
                    IntExpr::Const(n) => IntExpr::Const(-n),
                    other => IntExpr::Neg(Box::new(other)),
                })
            }
            Tok::LParen => {
                let e = self.parse_int_expr()?;
                match self.next()? {
                    Tok::RParen => Ok(e),
                    t => Err(ExprError::UnexpectedToken(t.to_string())),
                }
            }
            Tok::Ident(name) => {
                if let Some(&v) = self.syms.intvars.get(&name) {
                    Ok(IntExpr::Var(v))
                } else if let Some(&p) = self.syms.params.get(&name) {
                    Ok(IntExpr::Param(p))
                } else if self.syms.clocks.contains_key(&name) {
                    Err(ExprError::ClockInIntExpr(name))
                } else {
                    Err(ExprError::UnknownIdentifier(name))
                }
            }
            t => Err(ExprError::UnexpectedToken(t.to_string())),
        }
    }

    /// Parse one conjunct and push it onto the guard.
    fn parse_conjunct(&mut self, guard: &mut Guard) -> Result<(), ExprError> {
        // A conjunct starting with a clock identifier is a clock constraint.
        if let Some(Tok::Ident(name)) = self.peek() {
            if let Some(&x) = self.syms.clocks.get(name) {
                self.pos += 1;
                let mut right = None;
                if self.peek() == Some(&Tok::Minus) {
                    self.pos += 1;
                    match self.next()? {
                        Tok::Ident(other) => {
                            let y = *self
                                .syms
                                .clocks
                                .get(&other)
                                .ok_or(ExprError::NotAClock(other))?;
                            right = Some(y);
                        }
                        t => return Err(ExprError::UnexpectedToken(t.to_string())),
                    }
                }
                let op = self.expect_rel()?;
                let bound = self.parse_int_expr()?;
                push_clock_constraint(guard, Some(x), right, op, bound)?;
                return Ok(());
            }
        }
        let left = self.parse_int_expr()?;
        let op = self.expect_rel()?;
        let right = self.parse_int_expr()?;
        guard.int.push(IntGuard { left, op, right });
        Ok(())
    }
}

fn neg(e: IntExpr) -> IntExpr {
    match e {
        IntExpr::Const(n) => IntExpr::Const(-n),
        IntExpr::Neg(inner) => *inner,
        other => IntExpr::Neg(Box::new(other)),
    }
}

/// Normalize `left - right OP bound` into upper-bound constraints.
fn push_clock_constraint(
    guard: &mut Guard,
    left: Option<usize>,
    right: Option<usize>,
    op: RelOp,
    bound: IntExpr,
) -> Result<(), ExprError> {
    match op {
        RelOp::Le => guard.clock.push(ClockConstraint {
            left,
            right,
            rel: ClockRel::Le,
            bound,
        }),
        RelOp::Lt => guard.clock.push(ClockConstraint {
            left,
            right,
            rel: ClockRel::Lt,
            bound,
        }),
        RelOp::Ge => guard.clock.push(ClockConstraint {
            left: right,
            right: left,
            rel: ClockRel::Le,
            bound: neg(bound),
        }),
        RelOp::Gt => guard.clock.push(ClockConstraint {
            left: right,
            right: left,
            rel: ClockRel::Lt,
            bound: neg(bound),
        }),
        RelOp::Eq => {
            guard.clock.push(ClockConstraint {
                left,
                right,
                rel: ClockRel::Le,
                bound: bound.clone(),
            });
            guard.clock.push(ClockConstraint {
                left: right,
                right: left,
                rel: ClockRel::Le,
                bound: neg(bound),
            });
        }
        RelOp::Ne => return Err(ExprError::ClockDisequality),
    }
    Ok(())
}

/// Parse a guard: a `&&`-separated conjunction, or empty/`true` for the
/// trivial guard.
pub fn parse_guard(text: &str, syms: &Symbols) -> Result<Guard, ExprError> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed == "true" {
        return Ok(Guard::always());
    }
    let mut parser = Parser {
        toks: tokenize(trimmed)?,
        pos: 0,
        syms,
    };
    let mut guard = Guard::always();
    parser.parse_conjunct(&mut guard)?;
    while !parser.at_end() {
        match parser.next()? {
            Tok::AndAnd => parser.parse_conjunct(&mut guard)?,
            t => return Err(ExprError::UnexpectedToken(t.to_string())),
        }
    }
    Ok(guard)
}

/// Parse a statement: a comma-separated sequence of assignments, or empty
/// for the no-op statement.
pub fn parse_statement(text: &str, syms: &Symbols) -> Result<Statement, ExprError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Statement::nop());
    }
    let mut parser = Parser {
        toks: tokenize(trimmed)?,
        pos: 0,
        syms,
    };
    let mut stmt = Statement::nop();
    loop {
        parse_update(&mut parser, &mut stmt)?;
        if parser.at_end() {
            break;
        }
        match parser.next()? {
            Tok::Comma => {}
            t => return Err(ExprError::UnexpectedToken(t.to_string())),
        }
    }
    Ok(stmt)
}

fn parse_update(parser: &mut Parser, stmt: &mut Statement) -> Result<(), ExprError> {
    let name = match parser.next()? {
        Tok::Ident(name) => name,
        t => return Err(ExprError::UnexpectedToken(t.to_string())),
    };
    match parser.next()? {
        Tok::Assign => {}
        t => return Err(ExprError::UnexpectedToken(t.to_string())),
    }
    if let Some(&clock) = parser.syms.clocks.get(&name) {
        // Clock reset: a constant expression, a clock, or clock + expr.
        if let Some(Tok::Ident(rhs)) = parser.peek() {
            if let Some(&from) = parser.syms.clocks.get(rhs) {
                parser.pos += 1;
                if parser.peek() == Some(&Tok::Plus) {
                    parser.pos += 1;
                    let value = parser.parse_int_expr()?;
                    stmt.updates.push(Update::ResetToSum { clock, from, value });
                } else {
                    stmt.updates.push(Update::ResetToClock { clock, from });
                }
                return Ok(());
            }
        }
        let value = parser.parse_int_expr()?;
        stmt.updates.push(Update::ResetToValue { clock, value });
        Ok(())
    } else if let Some(&var) = parser.syms.intvars.get(&name) {
        let value = parser.parse_int_expr()?;
        stmt.updates.push(Update::AssignInt { var, value });
        Ok(())
    } else if parser.syms.params.contains_key(&name) {
        Err(ExprError::AssignToParam(name))
    } else {
        Err(ExprError::UnknownIdentifier(name))
    }
}
