use std::fmt::{Display, Formatter};

use crate::types::Type;

/// A literal value appearing in an expression.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Real(f64),
}

impl Value {
    pub fn to_f64(self) -> f64 {
        match self {
            Value::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Int(i) => i as f64,
            Value::Real(r) => r,
        }
    }

    pub fn type_of(self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Real(_) => Type::Real,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UnaryOp {
    Not,
    Minus,
    /// Explicit parentheses kept by the upstream parser. Pass-through.
    Parenth,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BinaryOp {
    Implies,
    Iff,
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Plus,
    Minus,
    Times,
    Divide,
}

impl BinaryOp {
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le
        )
    }

    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            BinaryOp::Implies | BinaryOp::Iff | BinaryOp::Or | BinaryOp::And
        )
    }

    /// Mirror a relational operator across its operands: `c op x` holds
    /// exactly when `x op.mirror() c` does.
    pub fn mirror(self) -> BinaryOp {
        match self {
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Ge => BinaryOp::Le,
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Le => BinaryOp::Ge,
            other => other,
        }
    }
}

/// Built-in functions. Floor/ceil/round are unary, pow/mod/log binary,
/// min/max n-ary.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Func {
    Floor,
    Ceil,
    Round,
    Pow,
    Mod,
    Log,
    Min,
    Max,
}

/// Reduction operator of a filter expression.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FilterOp {
    Print,
    PrintAll,
    Min,
    Max,
    ArgMin,
    ArgMax,
    Count,
    Sum,
    Avg,
    First,
    Range,
    ForAll,
    Exists,
    State,
}

impl Display for FilterOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FilterOp::Print => "print",
            FilterOp::PrintAll => "printall",
            FilterOp::Min => "min",
            FilterOp::Max => "max",
            FilterOp::ArgMin => "argmin",
            FilterOp::ArgMax => "argmax",
            FilterOp::Count => "count",
            FilterOp::Sum => "sum",
            FilterOp::Avg => "avg",
            FilterOp::First => "first",
            FilterOp::Range => "range",
            FilterOp::ForAll => "forall",
            FilterOp::Exists => "exists",
            FilterOp::State => "state",
        };
        write!(f, "{s}")
    }
}

/// A typed, already-resolved expression tree.
///
/// The parser and semantic checker live upstream: by the time an `Expr`
/// reaches the evaluator, identifiers are bound, formulas are expanded,
/// and every node is well-typed. The enum is closed on purpose, so
/// dispatch is exhaustive and a new node kind cannot silently fall
/// through.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Constant(String),
    Var(String),
    Label(String),
    Property(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ite(Box<Expr>, Box<Expr>, Box<Expr>),
    Func(Func, Vec<Expr>),
    /// `filter(op, operand, predicate)`; a missing predicate means "true".
    Filter(FilterOp, Box<Expr>, Option<Box<Expr>>),
}

impl Expr {
    pub fn bool(b: bool) -> Self {
        Expr::Literal(Value::Bool(b))
    }

    pub fn int(i: i64) -> Self {
        Expr::Literal(Value::Int(i))
    }

    pub fn real(r: f64) -> Self {
        Expr::Literal(Value::Real(r))
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn constant(name: impl Into<String>) -> Self {
        Expr::Constant(name.into())
    }

    pub fn label(name: impl Into<String>) -> Self {
        Expr::Label(name.into())
    }

    pub fn property(name: impl Into<String>) -> Self {
        Expr::Property(name.into())
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary(op, Box::new(operand))
    }

    pub fn not(operand: Expr) -> Self {
        Expr::unary(UnaryOp::Not, operand)
    }

    pub fn neg(operand: Expr) -> Self {
        Expr::unary(UnaryOp::Minus, operand)
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary(op, Box::new(left), Box::new(right))
    }

    pub fn ite(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Ite(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    pub fn func(f: Func, operands: Vec<Expr>) -> Self {
        Expr::Func(f, operands)
    }

    pub fn filter(op: FilterOp, operand: Expr, predicate: Option<Expr>) -> Self {
        Expr::Filter(op, Box::new(operand), predicate.map(Box::new))
    }

    /// The expression with explicit parentheses stripped, for shape
    /// recognition.
    pub fn unparenthesized(&self) -> &Expr {
        match self {
            Expr::Unary(UnaryOp::Parenth, e) => e.unparenthesized(),
            e => e,
        }
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UnaryOp::Not => write!(f, "!"),
            UnaryOp::Minus => write!(f, "-"),
            UnaryOp::Parenth => Ok(()),
        }
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::Implies => "=>",
            BinaryOp::Iff => "<=>",
            BinaryOp::Or => "|",
            BinaryOp::And => "&",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Times => "*",
            BinaryOp::Divide => "/",
        };
        write!(f, "{s}")
    }
}

impl Display for Func {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Func::Floor => "floor",
            Func::Ceil => "ceil",
            Func::Round => "round",
            Func::Pow => "pow",
            Func::Mod => "mod",
            Func::Log => "log",
            Func::Min => "min",
            Func::Max => "max",
        };
        write!(f, "{s}")
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Literal(Value::Bool(b)) => write!(f, "{b}"),
            Expr::Literal(Value::Int(i)) => write!(f, "{i}"),
            Expr::Literal(Value::Real(r)) => write!(f, "{r}"),
            Expr::Constant(name) | Expr::Var(name) => write!(f, "{name}"),
            Expr::Label(name) => write!(f, "\"{name}\""),
            Expr::Property(name) => write!(f, "{name}"),
            Expr::Unary(UnaryOp::Parenth, e) => write!(f, "({e})"),
            Expr::Unary(op, e) => write!(f, "{op}{e}"),
            Expr::Binary(op, a, b) => write!(f, "{a}{op}{b}"),
            Expr::Ite(c, t, e) => write!(f, "{c}?{t}:{e}"),
            Expr::Func(func, args) => {
                write!(f, "{func}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Filter(op, operand, Some(pred)) => {
                write!(f, "filter({op}, {operand}, {pred})")
            }
            Expr::Filter(op, operand, None) => write!(f, "filter({op}, {operand})"),
        }
    }
}
