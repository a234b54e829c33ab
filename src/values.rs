use std::any::Any;

use crate::error::{EvalError, Result};
use crate::model::Model;
use crate::mtbdd::ApplyOp;
use crate::reference::Dd;

/// Which concrete representation a [`StateValues`] carries.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Repr {
    Symbolic,
    Explicit,
}

impl Repr {
    /// Representation-selection policy for combining two operands:
    /// symbolic only when both sides are symbolic. Every binary and
    /// n-ary rule goes through here, so the policy cannot drift between
    /// operators.
    pub fn combine(a: Repr, b: Repr) -> Repr {
        match (a, b) {
            (Repr::Symbolic, Repr::Symbolic) => Repr::Symbolic,
            _ => Repr::Explicit,
        }
    }
}

/// Per-state values, either as a shared diagram or as a dense vector
/// over reachable states in enumeration order.
///
/// The opaque variant carries a side-effecting result with no per-state
/// payload; only a `state` filter may pass it through.
pub enum StateValues {
    Symbolic(Dd),
    Explicit(Vec<f64>),
    Opaque(Box<dyn Any>),
}

impl StateValues {
    pub fn repr(&self) -> Option<Repr> {
        match self {
            StateValues::Symbolic(_) => Some(Repr::Symbolic),
            StateValues::Explicit(_) => Some(Repr::Explicit),
            StateValues::Opaque(_) => None,
        }
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, StateValues::Symbolic(_))
    }

    pub fn as_dd(&self) -> Option<&Dd> {
        match self {
            StateValues::Symbolic(dd) => Some(dd),
            _ => None,
        }
    }

    /// Convert to the symbolic representation. Identity when already
    /// symbolic; otherwise rebuilds a diagram from the dense vector via
    /// the enumeration order. Lossless both ways.
    pub fn to_symbolic(self, model: &Model) -> Result<StateValues> {
        match self {
            StateValues::Symbolic(_) => Ok(self),
            StateValues::Explicit(vec) => {
                let dd = model.odd().from_vector(model.mtbdd(), &vec);
                Ok(StateValues::Symbolic(dd))
            }
            StateValues::Opaque(_) => Err(EvalError::InternalInvariant(
                "cannot convert an opaque result to symbolic form".into(),
            )),
        }
    }

    pub fn to_explicit(self, model: &Model) -> Result<StateValues> {
        match self {
            StateValues::Explicit(_) => Ok(self),
            StateValues::Symbolic(dd) => {
                let vec = model.odd().to_vector(model.mtbdd(), &dd);
                model.mtbdd().release(dd);
                Ok(StateValues::Explicit(vec))
            }
            StateValues::Opaque(_) => Err(EvalError::InternalInvariant(
                "cannot convert an opaque result to explicit form".into(),
            )),
        }
    }

    /// The canonical symbolic form as a bare diagram.
    pub fn into_dd(self, model: &Model) -> Result<Dd> {
        match self.to_symbolic(model)? {
            StateValues::Symbolic(dd) => Ok(dd),
            _ => unreachable!(),
        }
    }

    pub fn into_vector(self, model: &Model) -> Result<Vec<f64>> {
        match self.to_explicit(model)? {
            StateValues::Explicit(vec) => Ok(vec),
            _ => unreachable!(),
        }
    }

    /// Zero out entries outside the 0/1 mask, keeping the current
    /// representation.
    pub fn restrict(self, model: &Model, mask: &Dd) -> Result<StateValues> {
        let m = model.mtbdd();
        match self {
            StateValues::Symbolic(dd) => {
                let res = m.apply(ApplyOp::Times, dd, m.copy(mask));
                Ok(StateValues::Symbolic(res))
            }
            StateValues::Explicit(mut vec) => {
                let mask_vec = model.odd().to_vector(m, mask);
                for (v, &keep) in vec.iter_mut().zip(&mask_vec) {
                    if keep == 0.0 {
                        *v = 0.0;
                    }
                }
                Ok(StateValues::Explicit(vec))
            }
            StateValues::Opaque(_) => Err(EvalError::InternalInvariant(
                "cannot restrict an opaque result".into(),
            )),
        }
    }

    /// Give the contained diagram reference back to the manager.
    pub fn release(self, model: &Model) {
        if let StateValues::Symbolic(dd) = self {
            model.mtbdd().release(dd);
        }
    }

    /// Run a closure over the dense view without changing the stored
    /// representation.
    pub fn with_vector<R>(&self, model: &Model, f: impl FnOnce(&[f64]) -> R) -> Result<R> {
        match self {
            StateValues::Explicit(vec) => Ok(f(vec)),
            StateValues::Symbolic(dd) => {
                let vec = model.odd().to_vector(model.mtbdd(), dd);
                Ok(f(&vec))
            }
            StateValues::Opaque(_) => Err(EvalError::InternalInvariant(
                "opaque result has no per-state values".into(),
            )),
        }
    }

    /// Value at one enumeration index.
    pub fn value_at(&self, model: &Model, index: usize) -> Result<f64> {
        match self {
            StateValues::Explicit(vec) => Ok(vec[index]),
            StateValues::Symbolic(dd) => Ok(model.odd().value_at(model.mtbdd(), dd, index)),
            StateValues::Opaque(_) => Err(EvalError::InternalInvariant(
                "opaque result has no per-state values".into(),
            )),
        }
    }

    /// Format per-state values over the mask's states, in enumeration
    /// order. Boolean vectors list the satisfying states, numeric ones
    /// append `=value`; zeros are skipped unless `include_zeros`.
    pub fn format_filtered(
        &self,
        model: &Model,
        filter: &Dd,
        include_zeros: bool,
        boolean: bool,
    ) -> Result<Vec<String>> {
        let filter_vec = model.odd().to_vector(model.mtbdd(), filter);
        self.with_vector(model, |values| {
            let mut lines = Vec::new();
            let reach = model.mtbdd().copy(model.reach());
            model.odd().for_each_nonzero(model.mtbdd(), &reach, |i, bits, _| {
                if filter_vec[i] == 0.0 {
                    return;
                }
                let v = values[i];
                if boolean {
                    if v != 0.0 {
                        lines.push(format!("{}:{}", i, model.state_string(bits)));
                    }
                } else if v != 0.0 || include_zeros {
                    lines.push(format!("{}:{}={}", i, model.state_string(bits), v));
                }
            });
            model.mtbdd().release(reach);
            lines
        })
    }
}

/// Elementwise combination of two explicit vectors.
pub fn apply_explicit(op: ApplyOp, a: &[f64], b: &[f64]) -> Vec<f64> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(&x, &y)| op.eval(x, y)).collect()
}

/// Merge two branches under a 0/1 condition: entries where the condition
/// holds come from `then`, the rest from `otherwise`. Consumes all three.
pub fn merge_ite(
    model: &Model,
    cond: Dd,
    then: StateValues,
    otherwise: StateValues,
) -> Result<StateValues> {
    let cond_vec = model.odd().to_vector(model.mtbdd(), &cond);
    model.mtbdd().release(cond);

    let then_vec = then.into_vector(model)?;
    let else_vec = otherwise.into_vector(model)?;
    let merged = cond_vec
        .iter()
        .zip(then_vec.iter().zip(&else_vec))
        .map(|(&c, (&t, &e))| if c != 0.0 { t } else { e })
        .collect();
    Ok(StateValues::Explicit(merged))
}

/// Closeness test used by min/max diagnostics: relative by default,
/// absolute when requested.
pub fn values_close(a: f64, b: f64, epsilon: f64, absolute: bool) -> bool {
    if absolute {
        (a - b).abs() < epsilon
    } else if a == 0.0 && b == 0.0 {
        true
    } else {
        ((a - b) / a).abs() < epsilon
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::model::{Model, ModelBuilder};

    fn model() -> Model {
        ModelBuilder::new().var("x", 0, 3).init(&[0]).build()
    }

    #[test]
    fn test_round_trip_explicit_symbolic_explicit() {
        let model = model();
        let original = vec![0.5, 0.0, -3.0, 42.0];
        let sv = StateValues::Explicit(original.clone());
        let sv = sv.to_symbolic(&model).unwrap();
        assert!(sv.is_symbolic());
        let vec = sv.into_vector(&model).unwrap();
        assert_eq!(vec, original);
        // The model itself holds reach, start and deadlocks.
        assert_eq!(model.mtbdd().live_refs(), 3);
    }

    #[test]
    fn test_restrict_explicit() {
        let model = model();
        let mask = {
            let m = model.mtbdd();
            let a = m.set_vector_element(m.zero(), model.var("x").unwrap().dd_vars(), 1, 1.0);
            m.set_vector_element(a, model.var("x").unwrap().dd_vars(), 2, 1.0)
        };
        let sv = StateValues::Explicit(vec![1.0, 2.0, 3.0, 4.0])
            .restrict(&model, &mask)
            .unwrap();
        assert_eq!(sv.into_vector(&model).unwrap(), vec![0.0, 2.0, 3.0, 0.0]);
        model.mtbdd().release(mask);
    }

    #[test]
    fn test_restrict_symbolic_matches_explicit() {
        let model = model();
        let m = model.mtbdd();
        let mask = m.set_vector_element(m.zero(), model.var("x").unwrap().dd_vars(), 3, 1.0);

        let values = vec![1.0, 2.0, 3.0, 4.0];
        let symbolic = StateValues::Explicit(values.clone())
            .to_symbolic(&model)
            .unwrap()
            .restrict(&model, &mask)
            .unwrap();
        let explicit = StateValues::Explicit(values).restrict(&model, &mask).unwrap();
        assert_eq!(
            symbolic.into_vector(&model).unwrap(),
            explicit.into_vector(&model).unwrap()
        );
        m.release(mask);
    }

    #[test]
    fn test_merge_ite() {
        let model = model();
        let m = model.mtbdd();
        let x = model.var("x").unwrap();
        // Condition: x >= 2.
        let cond = {
            let a = m.set_vector_element(m.zero(), x.dd_vars(), 2, 1.0);
            m.set_vector_element(a, x.dd_vars(), 3, 1.0)
        };
        let then = StateValues::Explicit(vec![10.0, 11.0, 12.0, 13.0]);
        let otherwise = StateValues::Explicit(vec![0.0, 1.0, 2.0, 3.0]);
        let merged = merge_ite(&model, cond, then, otherwise).unwrap();
        assert_eq!(merged.into_vector(&model).unwrap(), vec![0.0, 1.0, 12.0, 13.0]);
    }

    #[test]
    fn test_opaque_conversion_is_invariant_error() {
        let model = model();
        let sv = StateValues::Opaque(Box::new("side effect"));
        assert!(matches!(
            sv.to_explicit(&model),
            Err(EvalError::InternalInvariant(_))
        ));
    }

    #[test]
    fn test_values_close() {
        assert!(values_close(1.0, 1.0 + 1e-9, 1e-6, false));
        assert!(!values_close(1.0, 1.1, 1e-6, false));
        assert!(values_close(0.0, 0.0, 1e-6, false));
        assert!(values_close(100.0, 100.5, 1.0, true));
    }
}
