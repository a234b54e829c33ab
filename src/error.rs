use thiserror::Error;

/// Terminal evaluation failures.
///
/// Domain problems (negative integer exponent, non-positive modulus,
/// degenerate logarithm base) are deliberately not represented here: they
/// poison the affected states with NaN and let the rest of the vector
/// carry on, which is what aggregation over many states needs.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("could not evaluate {kind} \"{name}\"")]
    UnknownIdentifier { kind: &'static str, name: String },

    #[error("unsupported {kind} operator \"{op}\"")]
    UnsupportedOperator { kind: &'static str, op: String },

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("{0}")]
    Filter(String),
}

pub type Result<T, E = EvalError> = std::result::Result<T, E>;
