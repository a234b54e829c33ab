use std::fmt::{Display, Formatter};

/// Static type of an expression.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Type {
    Bool,
    Int,
    Real,
}

impl Type {
    pub fn is_numeric(self) -> bool {
        matches!(self, Type::Int | Type::Real)
    }

    /// Least common supertype of two numeric types.
    pub fn join(self, other: Type) -> Type {
        match (self, other) {
            (Type::Bool, Type::Bool) => Type::Bool,
            (Type::Int, Type::Int) => Type::Int,
            _ => Type::Real,
        }
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Real => write!(f, "double"),
        }
    }
}
