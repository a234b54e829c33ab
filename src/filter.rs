use log::{debug, info};

use crate::error::{EvalError, Result};
use crate::eval::Evaluator;
use crate::expr::{Expr, FilterOp};
use crate::reference::Dd;
use crate::types::Type;
use crate::values::{values_close, StateValues};

/// Final outcome of a checked property.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    /// Min/max pair of a range filter.
    Interval(f64, f64),
    /// A side-effecting result with no numeric payload, passed through
    /// by a state filter.
    Opaque,
}

/// Shared result record populated by the top-level filter: the reduced
/// value, a human-readable explanation, and (on request) the raw
/// per-state vector.
#[derive(Debug, Clone, Default)]
pub struct ResultRecord {
    pub value: Option<ResultValue>,
    pub explanation: Option<String>,
    pub vector: Option<Vec<f64>>,
}

/// Descriptor for a filter that pins down a single concrete state, so
/// downstream numeric solvers can work with one state index instead of a
/// full predicate.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CurrentFilter {
    pub state_index: usize,
}

impl<'a> Evaluator<'a> {
    /// Resolve the filter predicate, evaluate the operand over it, and
    /// reduce. Consumes `soi`.
    pub(crate) fn eval_filter(
        &mut self,
        op: FilterOp,
        operand: &Expr,
        pred: Option<&Expr>,
        soi: Dd,
    ) -> Result<StateValues> {
        let m = self.model.mtbdd();

        let filter_true = match pred {
            None => true,
            Some(p) => *p.unparenthesized() == Expr::bool(true),
        };
        let pred_expr = pred.cloned().unwrap_or_else(|| Expr::bool(true));

        // The predicate is resolved over all reachable states; the
        // operand is then only required to be correct on its support.
        let filter_dd = match self.evaluate_dd(&pred_expr, m.copy(self.model.reach())) {
            Ok(dd) => dd,
            Err(e) => {
                m.release(soi);
                return Err(e);
            }
        };
        let count = self.model.odd().count_in(m, &filter_dd);
        debug!("filter({op}) satisfied in {count} states");
        if count == 0 {
            m.release(filter_dd);
            m.release(soi);
            return Err(EvalError::Filter("filter satisfies no states".into()));
        }

        let filter_init = filter_dd == *self.model.start();
        let filter_init_single = filter_init && count == 1;

        self.current_filter = match op {
            FilterOp::State if count == 1 => self
                .model
                .odd()
                .first_index_of(m, &filter_dd)
                .map(|state_index| CurrentFilter { state_index }),
            FilterOp::ForAll | FilterOp::First if filter_init_single => self
                .model
                .odd()
                .first_index_of(m, &filter_dd)
                .map(|state_index| CurrentFilter { state_index }),
            _ => None,
        };

        let op_type = match self.type_of(operand) {
            Ok(t) => t,
            Err(e) => {
                m.release(filter_dd);
                m.release(soi);
                return Err(e);
            }
        };

        let vals = match self.evaluate(operand, m.copy(&filter_dd)) {
            Ok(v) => v,
            Err(e) => {
                m.release(filter_dd);
                m.release(soi);
                return Err(e);
            }
        };

        let states_desc = if filter_true {
            "all states"
        } else if filter_init_single {
            "the initial state"
        } else {
            "states satisfying filter"
        };

        let reduced = self.reduce(op, op_type, vals, &filter_dd, count, states_desc);

        if let Ok(out) = &reduced {
            if self.store_vector {
                if let Ok(vec) = out.with_vector(self.model, |v| v.to_vec()) {
                    self.result.vector = Some(vec);
                }
            }
        }

        m.release(filter_dd);
        m.release(soi);
        reduced
    }

    /// Apply one reduction operator. Consumes `vals`, also on error.
    fn reduce(
        &mut self,
        op: FilterOp,
        op_type: Type,
        vals: StateValues,
        filter_dd: &Dd,
        count: usize,
        states_desc: &str,
    ) -> Result<StateValues> {
        let m = self.model.mtbdd();

        // Only a state filter may carry an opaque operand through.
        if matches!(vals, StateValues::Opaque(_)) && op != FilterOp::State {
            vals.release(self.model);
            return Err(EvalError::InternalInvariant(format!(
                "opaque result reached a \"{op}\" filter"
            )));
        }

        let filter_vec = self.model.odd().to_vector(m, filter_dd);
        let selected = |values: &[f64], f: &mut dyn FnMut(usize, f64)| {
            for (i, (&v, &keep)) in values.iter().zip(&filter_vec).enumerate() {
                if keep != 0.0 {
                    f(i, v);
                }
            }
        };

        match op {
            FilterOp::Print | FilterOp::PrintAll => {
                let include_zeros = op == FilterOp::PrintAll;
                let lines = match vals.format_filtered(
                    self.model,
                    filter_dd,
                    include_zeros,
                    op_type == Type::Bool,
                ) {
                    Ok(lines) => lines,
                    Err(e) => {
                        vals.release(self.model);
                        return Err(e);
                    }
                };
                if include_zeros {
                    info!("Results (including zeros) for filter:");
                } else {
                    info!("Results (non-zero only) for filter:");
                }
                for line in &lines {
                    info!("{line}");
                }
                Ok(vals)
            }
            FilterOp::Min | FilterOp::Max | FilterOp::ArgMin | FilterOp::ArgMax => {
                self.reduce_extreme(op, op_type, vals, count, states_desc, selected)
            }
            FilterOp::Count => {
                let mut n = 0i64;
                self.over_vals(&vals, |values| {
                    selected(values, &mut |_, v| {
                        if v != 0.0 {
                            n += 1;
                        }
                    });
                })?;
                self.result.value = Some(ResultValue::Int(n));
                self.result.explanation =
                    Some(format!("Count over {states_desc}"));
                Ok(vals)
            }
            FilterOp::Sum => {
                let mut sum = 0.0;
                self.over_vals(&vals, |values| {
                    selected(values, &mut |_, v| sum += v);
                })?;
                self.result.value = Some(typed(op_type, sum));
                self.result.explanation = Some(format!("Sum over {states_desc}"));
                Ok(vals)
            }
            FilterOp::Avg => {
                let mut sum = 0.0;
                self.over_vals(&vals, |values| {
                    selected(values, &mut |_, v| sum += v);
                })?;
                self.result.value = Some(ResultValue::Real(sum / count as f64));
                self.result.explanation = Some(format!("Average over {states_desc}"));
                Ok(vals)
            }
            FilterOp::First => {
                let index = match self.first_filter_index(filter_dd) {
                    Ok(i) => i,
                    Err(e) => {
                        vals.release(self.model);
                        return Err(e);
                    }
                };
                let v = match vals.value_at(self.model, index) {
                    Ok(v) => v,
                    Err(e) => {
                        vals.release(self.model);
                        return Err(e);
                    }
                };
                self.result.value = Some(typed(op_type, v));
                self.result.explanation =
                    Some(format!("Value in the first of {states_desc}"));
                Ok(vals)
            }
            FilterOp::Range => {
                let mut min = f64::INFINITY;
                let mut max = f64::NEG_INFINITY;
                self.over_vals(&vals, |values| {
                    selected(values, &mut |_, v| {
                        min = min.min(v);
                        max = max.max(v);
                    });
                })?;
                self.result.value = Some(ResultValue::Interval(min, max));
                self.result.explanation = Some(format!("Range of values over {states_desc}"));
                Ok(vals)
            }
            FilterOp::ForAll | FilterOp::Exists => {
                let dd = match vals.as_dd() {
                    Some(dd) => dd,
                    None => {
                        vals.release(self.model);
                        return Err(EvalError::InternalInvariant(format!(
                            "\"{op}\" filter reached a non-symbolic operand"
                        )));
                    }
                };
                let conj = m.apply_and(m.copy(dd), m.copy(filter_dd));
                let (holds, sat) = if op == FilterOp::ForAll {
                    (conj == *filter_dd, self.model.odd().count_in(m, &conj))
                } else {
                    (!m.is_zero(&conj), self.model.odd().count_in(m, &conj))
                };
                m.release(conj);
                self.result.value = Some(ResultValue::Bool(holds));
                self.result.explanation = Some(format!(
                    "Property satisfied in {sat} of {count} filter states"
                ));
                Ok(vals)
            }
            FilterOp::State => {
                if count != 1 {
                    vals.release(self.model);
                    return Err(EvalError::Filter(format!(
                        "filter should be satisfied in exactly 1 state \
                         (but is satisfied in {count} states)"
                    )));
                }
                if matches!(vals, StateValues::Opaque(_)) {
                    self.result.value = Some(ResultValue::Opaque);
                    self.result.explanation =
                        Some("Value in the filter state".to_string());
                    return Ok(vals);
                }
                let index = match self.first_filter_index(filter_dd) {
                    Ok(i) => i,
                    Err(e) => {
                        vals.release(self.model);
                        return Err(e);
                    }
                };
                let v = match vals.value_at(self.model, index) {
                    Ok(v) => v,
                    Err(e) => {
                        vals.release(self.model);
                        return Err(e);
                    }
                };
                self.result.value = Some(typed(op_type, v));
                self.result.explanation = Some("Value in the filter state".to_string());
                Ok(vals)
            }
        }
    }

    /// Min/max and their attaining-state variants. The attaining set is
    /// computed with the configured tolerance; for argmin/argmax it
    /// replaces the operand as the returned vector.
    fn reduce_extreme(
        &mut self,
        op: FilterOp,
        op_type: Type,
        vals: StateValues,
        count: usize,
        states_desc: &str,
        selected: impl Fn(&[f64], &mut dyn FnMut(usize, f64)),
    ) -> Result<StateValues> {
        let minimizing = matches!(op, FilterOp::Min | FilterOp::ArgMin);

        let mut extreme = if minimizing {
            f64::INFINITY
        } else {
            f64::NEG_INFINITY
        };
        self.over_vals(&vals, |values| {
            selected(values, &mut |_, v| {
                extreme = if minimizing {
                    extreme.min(v)
                } else {
                    extreme.max(v)
                };
            });
        })?;

        let mut attaining = vec![0.0; self.model.num_states()];
        let mut num_attaining = 0usize;
        self.over_vals(&vals, |values| {
            selected(values, &mut |i, v| {
                if values_close(v, extreme, self.term_crit_epsilon, self.term_crit_absolute) {
                    attaining[i] = 1.0;
                    num_attaining += 1;
                }
            });
        })?;
        debug!(
            "{} value {extreme} attained in {num_attaining} of {count} filter states",
            if minimizing { "minimum" } else { "maximum" }
        );
        if self.verbose {
            info!(
                "There are {num_attaining} states with {} value {extreme}",
                if minimizing { "minimum" } else { "maximum" }
            );
        }

        match op {
            FilterOp::Min | FilterOp::Max => {
                self.result.value = Some(typed(op_type, extreme));
                self.result.explanation = Some(if minimizing {
                    format!("Minimum value over {states_desc}")
                } else {
                    format!("Maximum value over {states_desc}")
                });
                Ok(vals)
            }
            FilterOp::ArgMin | FilterOp::ArgMax => {
                vals.release(self.model);
                let submask = self.model.odd().from_vector(self.model.mtbdd(), &attaining);
                self.result.value = None;
                self.result.explanation = Some(if minimizing {
                    "States with minimum value".to_string()
                } else {
                    "States with maximum value".to_string()
                });
                Ok(StateValues::Symbolic(submask))
            }
            _ => unreachable!(),
        }
    }

    fn over_vals(&self, vals: &StateValues, f: impl FnOnce(&[f64])) -> Result<()> {
        vals.with_vector(self.model, f)
    }

    fn first_filter_index(&self, filter_dd: &Dd) -> Result<usize> {
        self.model
            .odd()
            .first_index_of(self.model.mtbdd(), filter_dd)
            .ok_or_else(|| EvalError::InternalInvariant("empty filter set past its guard".into()))
    }
}

fn typed(t: Type, v: f64) -> ResultValue {
    match t {
        Type::Bool => ResultValue::Bool(v != 0.0),
        Type::Int => ResultValue::Int(v as i64),
        Type::Real => ResultValue::Real(v),
    }
}
