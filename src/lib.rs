//! # statecheck: state-indexed expression evaluation over MTBDDs
//!
//! **`statecheck`** is the evaluation core of a symbolic model checker:
//! given a typed property expression over a finite state space, it computes
//! the value of the property in every state of interest and reduces the
//! per-state vector to a single diagnostic result through a filter operator.
//!
//! ## How it works
//!
//! States are encoded over boolean variables and sets/vectors of states are
//! stored as **multi-terminal binary decision diagrams (MTBDDs)**: canonical,
//! structurally shared graphs mapping encoded states to real-valued
//! terminals. For a fixed variable ordering every function has exactly one
//! representation, so equality is handle comparison and boolean reasoning
//! is cheap.
//!
//! Per-state results move between two representations: a *symbolic* one (a
//! diagram) and an *explicit* one (a dense vector over reachable states in a
//! fixed enumeration order, induced by an offset-labelled decision diagram).
//! The evaluator keeps results symbolic as long as every operand is
//! symbolic, and drops to the explicit form otherwise.
//!
//! ## Key Features
//!
//! - **Manager-Centric Architecture**: all diagram operations go through the
//!   [`Mtbdd`][crate::mtbdd::Mtbdd] manager, which ensures structural
//!   sharing (hash consing) and caches operation results.
//! - **Explicit Ownership**: diagrams are held through owning
//!   [`Dd`][crate::reference::Dd] handles that must be copied and released
//!   explicitly; the manager counts live references, so leak checks are a
//!   one-line assertion.
//! - **Fast Comparison Paths**: `variable op constant` comparisons build
//!   their truth set directly from the variable's encoding instead of
//!   evaluating both sides.
//! - **Filter Reductions**: `min`/`max`/`argmin`/`argmax`/`count`/`sum`/
//!   `avg`/`first`/`range`/`forall`/`exists`/`state`/`print` over a
//!   predicate-defined subset of states.
//!
//! ## Basic Usage
//!
//! ```rust
//! use statecheck::eval::Evaluator;
//! use statecheck::expr::{BinaryOp, Expr, FilterOp};
//! use statecheck::filter::ResultValue;
//! use statecheck::model::ModelBuilder;
//!
//! // A model with one variable x in 0..=3 and initial state x=0.
//! let model = ModelBuilder::new().var("x", 0, 3).init(&[0]).build();
//!
//! // count(x > 1) over all states.
//! let expr = Expr::filter(
//!     FilterOp::Count,
//!     Expr::binary(BinaryOp::Gt, Expr::var("x"), Expr::int(1)),
//!     None,
//! );
//!
//! let mut eval = Evaluator::new(&model);
//! let result = eval.check(&expr).unwrap();
//! assert_eq!(result.value, Some(ResultValue::Int(2)));
//! ```
//!
//! ## Core Components
//!
//! - **[`mtbdd`]**: the diagram manager and its pointwise operations.
//! - **[`odd`]**: the enumeration order tying diagrams to dense vectors.
//! - **[`eval`]**: the recursive expression evaluator.
//! - **[`filter`]**: the filter/aggregation reduction engine.

pub mod cache;
pub mod error;
pub mod eval;
pub mod expr;
pub mod filter;
pub mod model;
pub mod mtbdd;
pub mod odd;
pub mod reference;
pub mod table;
pub mod types;
pub mod utils;
pub mod values;
