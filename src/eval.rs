use log::debug;

use crate::error::{EvalError, Result};
use crate::expr::{BinaryOp, Expr, FilterOp, Func, UnaryOp, Value};
use crate::filter::{CurrentFilter, ResultRecord};
use crate::model::{LabelDef, Model};
use crate::mtbdd::ApplyOp;
use crate::reference::Dd;
use crate::types::Type;
use crate::values::{self, Repr, StateValues};

/// Recursive state-indexed expression evaluator.
///
/// The central contract is `evaluate(expr, states_of_interest)`: the
/// diagram argument is consumed on every path out, including errors, and
/// the returned [`StateValues`] carries exactly one reference owned by
/// the caller. A result may be valid on more states than asked for; it
/// is only guaranteed on the states of interest.
pub struct Evaluator<'a> {
    pub(crate) model: &'a Model,
    /// Tolerance for the min/max attainment diagnostics.
    pub(crate) term_crit_epsilon: f64,
    pub(crate) term_crit_absolute: bool,
    /// Keep the raw per-state vector in the result record.
    pub(crate) store_vector: bool,
    pub(crate) verbose: bool,
    pub(crate) current_filter: Option<CurrentFilter>,
    pub(crate) result: ResultRecord,
}

impl<'a> Evaluator<'a> {
    pub fn new(model: &'a Model) -> Self {
        Self {
            model,
            term_crit_epsilon: 1e-6,
            term_crit_absolute: false,
            store_vector: false,
            verbose: false,
            current_filter: None,
            result: ResultRecord::default(),
        }
    }

    pub fn store_vector(mut self, store: bool) -> Self {
        self.store_vector = store;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn term_crit(mut self, epsilon: f64, absolute: bool) -> Self {
        self.term_crit_epsilon = epsilon;
        self.term_crit_absolute = absolute;
        self
    }

    /// The single-state filter descriptor recorded by the last check,
    /// for downstream numeric solvers.
    pub fn current_filter(&self) -> Option<CurrentFilter> {
        self.current_filter
    }

    /// Check a top-level property: wrap it in a default filter over the
    /// initial states if it has none, evaluate, and return the filled
    /// result record.
    pub fn check(&mut self, expr: &Expr) -> Result<ResultRecord> {
        let wrapped = match expr {
            Expr::Filter(..) => expr.clone(),
            _ => {
                // Single initial state reads off the value there; several
                // report the range over them.
                let op = if self.model.num_start_states() == 1 {
                    FilterOp::State
                } else {
                    FilterOp::Range
                };
                Expr::filter(op, expr.clone(), Some(Expr::label("init")))
            }
        };

        self.result = ResultRecord::default();
        self.current_filter = None;

        let soi = self.model.mtbdd().copy(self.model.reach());
        let vals = self.evaluate(&wrapped, soi)?;
        vals.release(self.model);

        Ok(std::mem::take(&mut self.result))
    }

    /// Evaluate an expression for the given states of interest. Consumes
    /// `soi` on every path.
    pub fn evaluate(&mut self, expr: &Expr, soi: Dd) -> Result<StateValues> {
        let res = self.dispatch(expr, soi)?;
        // Confine symbolic results to the reachable set; explicit ones
        // are confined already by the enumeration order.
        if res.is_symbolic() {
            res.restrict(self.model, self.model.reach())
        } else {
            Ok(res)
        }
    }

    /// Evaluate to the canonical symbolic form as a bare diagram.
    pub fn evaluate_dd(&mut self, expr: &Expr, soi: Dd) -> Result<Dd> {
        let vals = self.evaluate(expr, soi)?;
        match vals.to_symbolic(self.model) {
            Ok(sv) => sv.into_dd(self.model),
            Err(e) => Err(e),
        }
    }

    fn dispatch(&mut self, expr: &Expr, soi: Dd) -> Result<StateValues> {
        let m = self.model.mtbdd();
        match expr {
            Expr::Literal(v) => {
                m.release(soi);
                Ok(StateValues::Symbolic(m.constant(v.to_f64())))
            }
            Expr::Constant(name) => {
                m.release(soi);
                match self.model.constant(name) {
                    Some(v) => Ok(StateValues::Symbolic(m.constant(v.to_f64()))),
                    None => Err(unknown("constant", name)),
                }
            }
            Expr::Var(name) => {
                m.release(soi);
                match self.model.var(name) {
                    Some(v) => Ok(StateValues::Symbolic(self.model.variable_identity(v))),
                    None => Err(unknown("variable", name)),
                }
            }
            Expr::Label(name) => self.eval_label(name, soi),
            Expr::Property(name) => match self.model.property(name) {
                Some(def) => {
                    let def = def.clone();
                    self.evaluate(&def, soi)
                }
                None => {
                    m.release(soi);
                    Err(unknown("property", name))
                }
            },
            Expr::Unary(op, operand) => self.eval_unary(*op, operand, soi),
            Expr::Binary(op, a, b) => {
                if op.is_relational() {
                    self.eval_rel_op(*op, a, b, soi)
                } else {
                    self.eval_binary(*op, a, b, soi)
                }
            }
            Expr::Ite(c, t, e) => self.eval_ite(c, t, e, soi),
            Expr::Func(f, args) => self.eval_func(*f, args, soi),
            Expr::Filter(op, operand, pred) => {
                self.eval_filter(*op, operand, pred.as_deref(), soi)
            }
        }
    }

    fn eval_label(&mut self, name: &str, soi: Dd) -> Result<StateValues> {
        let m = self.model.mtbdd();
        // "init" and "deadlock" are built in; everything else resolves
        // against the label table.
        match name {
            "init" => {
                m.release(soi);
                Ok(StateValues::Symbolic(m.copy(self.model.start())))
            }
            "deadlock" => {
                m.release(soi);
                Ok(StateValues::Symbolic(m.copy(self.model.deadlocks())))
            }
            _ => match self.model.label(name) {
                Some(LabelDef::Diagram(dd)) => {
                    let dd = m.copy(dd);
                    m.release(soi);
                    Ok(StateValues::Symbolic(dd))
                }
                Some(LabelDef::Defined(def)) => {
                    let def = def.clone();
                    self.evaluate(&def, soi)
                }
                None => {
                    m.release(soi);
                    Err(unknown("label", name))
                }
            },
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, soi: Dd) -> Result<StateValues> {
        if op == UnaryOp::Parenth {
            return self.evaluate(operand, soi);
        }
        let vals = self.evaluate(operand, soi)?;
        let m = self.model.mtbdd();
        match (op, vals) {
            (UnaryOp::Not, StateValues::Symbolic(dd)) => {
                Ok(StateValues::Symbolic(m.apply_not(dd)))
            }
            (UnaryOp::Not, other) => {
                other.release(self.model);
                Err(EvalError::InternalInvariant(
                    "boolean negation reached a non-symbolic operand".into(),
                ))
            }
            (UnaryOp::Minus, StateValues::Symbolic(dd)) => Ok(StateValues::Symbolic(m.apply(
                ApplyOp::Minus,
                m.zero(),
                dd,
            ))),
            (UnaryOp::Minus, StateValues::Explicit(vec)) => {
                Ok(StateValues::Explicit(vec.iter().map(|v| -v).collect()))
            }
            (UnaryOp::Minus, other) => {
                other.release(self.model);
                Err(EvalError::InternalInvariant(
                    "arithmetic negation reached an opaque operand".into(),
                ))
            }
            (UnaryOp::Parenth, _) => unreachable!(),
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, a: &Expr, b: &Expr, soi: Dd) -> Result<StateValues> {
        let (va, vb) = self.eval_pair(a, b, soi)?;
        let m = self.model.mtbdd();

        if op.is_boolean() {
            return match (va, vb) {
                (StateValues::Symbolic(da), StateValues::Symbolic(db)) => {
                    let dd = match op {
                        BinaryOp::Implies => m.apply_implies(da, db),
                        BinaryOp::Iff => m.apply_iff(da, db),
                        BinaryOp::Or => m.apply_or(da, db),
                        BinaryOp::And => m.apply_and(da, db),
                        _ => unreachable!(),
                    };
                    Ok(StateValues::Symbolic(dd))
                }
                (va, vb) => {
                    va.release(self.model);
                    vb.release(self.model);
                    Err(EvalError::InternalInvariant(format!(
                        "boolean operator \"{op}\" reached a non-symbolic operand"
                    )))
                }
            };
        }

        let apply_op = match op {
            BinaryOp::Plus => ApplyOp::Plus,
            BinaryOp::Minus => ApplyOp::Minus,
            BinaryOp::Times => ApplyOp::Times,
            BinaryOp::Divide => ApplyOp::Divide,
            _ => {
                va.release(self.model);
                vb.release(self.model);
                return Err(EvalError::UnsupportedOperator {
                    kind: "binary",
                    op: op.to_string(),
                });
            }
        };
        self.combine_arith(apply_op, va, vb)
    }

    /// Apply a pointwise operator under the representation-selection
    /// policy: symbolic iff both operands are symbolic.
    fn combine_arith(
        &mut self,
        op: ApplyOp,
        va: StateValues,
        vb: StateValues,
    ) -> Result<StateValues> {
        let m = self.model.mtbdd();
        let (ra, rb) = match (va.repr(), vb.repr()) {
            (Some(ra), Some(rb)) => (ra, rb),
            _ => {
                va.release(self.model);
                vb.release(self.model);
                return Err(EvalError::InternalInvariant(
                    "arithmetic operator reached an opaque operand".into(),
                ));
            }
        };
        match Repr::combine(ra, rb) {
            Repr::Symbolic => {
                let da = va.into_dd(self.model)?;
                let db = vb.into_dd(self.model)?;
                Ok(StateValues::Symbolic(m.apply(op, da, db)))
            }
            Repr::Explicit => {
                let a = va.into_vector(self.model)?;
                let b = vb.into_vector(self.model)?;
                Ok(StateValues::Explicit(values::apply_explicit(op, &a, &b)))
            }
        }
    }

    fn eval_ite(&mut self, c: &Expr, t: &Expr, e: &Expr, soi: Dd) -> Result<StateValues> {
        let m = self.model.mtbdd();
        let soi_c = m.copy(&soi);
        let soi_t = m.copy(&soi);

        let vc = match self.evaluate(c, soi_c) {
            Ok(v) => v,
            Err(err) => {
                m.release(soi_t);
                m.release(soi);
                return Err(err);
            }
        };
        let vt = match self.evaluate(t, soi_t) {
            Ok(v) => v,
            Err(err) => {
                vc.release(self.model);
                m.release(soi);
                return Err(err);
            }
        };
        let ve = match self.evaluate(e, soi) {
            Ok(v) => v,
            Err(err) => {
                vc.release(self.model);
                vt.release(self.model);
                return Err(err);
            }
        };

        match (vt, ve) {
            (StateValues::Symbolic(dt), StateValues::Symbolic(de)) => {
                let dc = match vc.into_dd(self.model) {
                    Ok(dd) => dd,
                    Err(err) => {
                        m.release(dt);
                        m.release(de);
                        return Err(err);
                    }
                };
                Ok(StateValues::Symbolic(m.ite(dc, dt, de)))
            }
            (vt, ve) => {
                let dc = match vc.into_dd(self.model) {
                    Ok(dd) => dd,
                    Err(err) => {
                        vt.release(self.model);
                        ve.release(self.model);
                        return Err(err);
                    }
                };
                values::merge_ite(self.model, dc, vt, ve)
            }
        }
    }

    fn eval_func(&mut self, f: Func, args: &[Expr], soi: Dd) -> Result<StateValues> {
        match f {
            Func::Floor => self.eval_func_unary(&args[0], soi, |v| v.floor()),
            Func::Ceil => self.eval_func_unary(&args[0], soi, |v| v.ceil()),
            // Half-up rounding, also for negative values.
            Func::Round => self.eval_func_unary(&args[0], soi, |v| (v + 0.5).floor()),
            Func::Pow => {
                // Integer power is guarded per state: negative exponents
                // and results outside the integer range poison with NaN.
                let int_pow = match (self.type_of(&args[0]), self.type_of(&args[1])) {
                    (Ok(Type::Int), Ok(Type::Int)) => true,
                    (Err(e), _) | (_, Err(e)) => {
                        self.model.mtbdd().release(soi);
                        return Err(e);
                    }
                    _ => false,
                };
                let op = if int_pow { ApplyOp::PowInt } else { ApplyOp::Pow };
                let (va, vb) = self.eval_pair(&args[0], &args[1], soi)?;
                self.combine_arith(op, va, vb)
            }
            Func::Mod => {
                let (va, vb) = self.eval_pair(&args[0], &args[1], soi)?;
                self.combine_arith(ApplyOp::Mod, va, vb)
            }
            Func::Log => {
                let (va, vb) = self.eval_pair(&args[0], &args[1], soi)?;
                self.combine_arith(ApplyOp::Log, va, vb)
            }
            Func::Min => self.eval_func_nary(ApplyOp::Min, args, soi),
            Func::Max => self.eval_func_nary(ApplyOp::Max, args, soi),
        }
    }

    fn eval_func_unary(
        &mut self,
        operand: &Expr,
        soi: Dd,
        func: impl Fn(f64) -> f64,
    ) -> Result<StateValues> {
        let vals = self.evaluate(operand, soi)?;
        match vals {
            StateValues::Symbolic(dd) => Ok(StateValues::Symbolic(
                self.model.mtbdd().map_terminals(dd, func),
            )),
            StateValues::Explicit(vec) => {
                Ok(StateValues::Explicit(vec.iter().map(|&v| func(v)).collect()))
            }
            other => {
                other.release(self.model);
                Err(EvalError::InternalInvariant(
                    "unary function reached an opaque operand".into(),
                ))
            }
        }
    }

    /// Left fold for n-ary min/max. Once the accumulator has gone
    /// explicit it stays explicit, so the fold's representation does not
    /// depend on operand order beyond the first switch.
    fn eval_func_nary(&mut self, op: ApplyOp, args: &[Expr], soi: Dd) -> Result<StateValues> {
        debug_assert!(!args.is_empty());
        let m = self.model.mtbdd();

        let mut acc = match self.evaluate(&args[0], m.copy(&soi)) {
            Ok(v) => v,
            Err(e) => {
                m.release(soi);
                return Err(e);
            }
        };
        for arg in &args[1..] {
            let next = match self.evaluate(arg, m.copy(&soi)) {
                Ok(v) => v,
                Err(e) => {
                    acc.release(self.model);
                    m.release(soi);
                    return Err(e);
                }
            };
            acc = match self.combine_arith(op, acc, next) {
                Ok(v) => v,
                Err(e) => {
                    m.release(soi);
                    return Err(e);
                }
            };
        }
        m.release(soi);
        Ok(acc)
    }

    /// Comparisons of the shape "variable op constant" (either order)
    /// build their truth set directly from the variable's encoding,
    /// bypassing the generic evaluate-then-compare route. The states of
    /// interest are irrelevant to the truth set and are discarded.
    fn eval_rel_op(&mut self, op: BinaryOp, a: &Expr, b: &Expr, soi: Dd) -> Result<StateValues> {
        if let Expr::Var(name) = a.unparenthesized() {
            if let Some(c) = self.const_int(b) {
                let name = name.clone();
                self.model.mtbdd().release(soi);
                return self.rel_op_truth_set(&name, op, c);
            }
        }
        if let Expr::Var(name) = b.unparenthesized() {
            if let Some(c) = self.const_int(a) {
                let name = name.clone();
                self.model.mtbdd().release(soi);
                return self.rel_op_truth_set(&name, op.mirror(), c);
            }
        }

        // General route: both sides symbolic (a relational result is
        // boolean), then one pointwise comparison.
        let apply_op = match op {
            BinaryOp::Eq => ApplyOp::Equals,
            BinaryOp::Ne => ApplyOp::NotEquals,
            BinaryOp::Gt => ApplyOp::Greater,
            BinaryOp::Ge => ApplyOp::GreaterEq,
            BinaryOp::Lt => ApplyOp::Less,
            BinaryOp::Le => ApplyOp::LessEq,
            _ => unreachable!(),
        };
        let (va, vb) = self.eval_pair(a, b, soi)?;
        let da = match va.into_dd(self.model) {
            Ok(dd) => dd,
            Err(e) => {
                vb.release(self.model);
                return Err(e);
            }
        };
        let db = match vb.into_dd(self.model) {
            Ok(dd) => dd,
            Err(e) => {
                self.model.mtbdd().release(da);
                return Err(e);
            }
        };
        Ok(StateValues::Symbolic(
            self.model.mtbdd().apply(apply_op, da, db),
        ))
    }

    fn rel_op_truth_set(&mut self, var: &str, op: BinaryOp, c: i64) -> Result<StateValues> {
        let v = match self.model.var(var) {
            Some(v) => v,
            None => return Err(unknown("variable", var)),
        };
        let m = self.model.mtbdd();
        let mut dd = m.zero();
        // Out-of-range constants clip naturally: nothing matches, or
        // everything does.
        for i in 0..v.range_size() {
            let val = v.low() + i as i64;
            let sat = match op {
                BinaryOp::Eq => val == c,
                BinaryOp::Ne => val != c,
                BinaryOp::Gt => val > c,
                BinaryOp::Ge => val >= c,
                BinaryOp::Lt => val < c,
                BinaryOp::Le => val <= c,
                _ => unreachable!(),
            };
            if sat {
                dd = m.set_vector_element(dd, v.dd_vars(), i, 1.0);
            }
        }
        debug!("fast-path truth set for {var} {op} {c}: {} nodes", m.size(&dd));
        Ok(StateValues::Symbolic(dd))
    }

    /// Constant-integer shape: literal, named integer constant, or a
    /// unary minus / parentheses over one.
    fn const_int(&self, e: &Expr) -> Option<i64> {
        match e.unparenthesized() {
            Expr::Literal(Value::Int(i)) => Some(*i),
            Expr::Constant(name) => match self.model.constant(name) {
                Some(Value::Int(i)) => Some(i),
                _ => None,
            },
            Expr::Unary(UnaryOp::Minus, inner) => self.const_int(inner).map(|i| -i),
            _ => None,
        }
    }

    /// Evaluate two operands on independent copies of the states of
    /// interest, releasing everything held if either side fails.
    fn eval_pair(&mut self, a: &Expr, b: &Expr, soi: Dd) -> Result<(StateValues, StateValues)> {
        let m = self.model.mtbdd();
        let soi_a = m.copy(&soi);
        let va = match self.evaluate(a, soi_a) {
            Ok(v) => v,
            Err(e) => {
                m.release(soi);
                return Err(e);
            }
        };
        let vb = match self.evaluate(b, soi) {
            Ok(v) => v,
            Err(e) => {
                va.release(self.model);
                return Err(e);
            }
        };
        Ok((va, vb))
    }

    /// Static type of an expression, mirroring the upstream checker's
    /// rules.
    pub(crate) fn type_of(&self, e: &Expr) -> Result<Type> {
        Ok(match e {
            Expr::Literal(v) => v.type_of(),
            Expr::Constant(name) => match self.model.constant(name) {
                Some(v) => v.type_of(),
                None => return Err(unknown("constant", name)),
            },
            Expr::Var(name) => match self.model.var(name) {
                Some(_) => Type::Int,
                None => return Err(unknown("variable", name)),
            },
            Expr::Label(_) => Type::Bool,
            Expr::Property(name) => match self.model.property(name) {
                Some(def) => self.type_of(def)?,
                None => return Err(unknown("property", name)),
            },
            Expr::Unary(UnaryOp::Not, _) => Type::Bool,
            Expr::Unary(_, inner) => self.type_of(inner)?,
            Expr::Binary(op, a, b) => {
                if op.is_boolean() || op.is_relational() {
                    Type::Bool
                } else if *op == BinaryOp::Divide {
                    Type::Real
                } else {
                    self.type_of(a)?.join(self.type_of(b)?)
                }
            }
            Expr::Ite(_, t, e) => self.type_of(t)?.join(self.type_of(e)?),
            Expr::Func(Func::Floor | Func::Ceil | Func::Round, _) => Type::Int,
            Expr::Func(Func::Pow, args) => self.type_of(&args[0])?.join(self.type_of(&args[1])?),
            Expr::Func(Func::Mod, _) => Type::Int,
            Expr::Func(Func::Log, _) => Type::Real,
            Expr::Func(Func::Min | Func::Max, args) => {
                let mut t = self.type_of(&args[0])?;
                for a in &args[1..] {
                    t = t.join(self.type_of(a)?);
                }
                t
            }
            Expr::Filter(op, operand, _) => match op {
                FilterOp::ForAll | FilterOp::Exists => Type::Bool,
                FilterOp::Count => Type::Int,
                FilterOp::Avg => Type::Real,
                _ => self.type_of(operand)?,
            },
        })
    }
}

fn unknown(kind: &'static str, name: &str) -> EvalError {
    EvalError::UnknownIdentifier {
        kind,
        name: name.to_string(),
    }
}
