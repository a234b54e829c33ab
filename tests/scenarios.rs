use test_log::test;

use statecheck::eval::Evaluator;
use statecheck::expr::{BinaryOp, Expr, FilterOp, Func, UnaryOp, Value};
use statecheck::filter::ResultValue;
use statecheck::model::{Model, ModelBuilder};
use statecheck::values::{self, StateValues};

/// One variable `x` in 0..=3, initial state x=0.
fn model() -> Model {
    ModelBuilder::new().var("x", 0, 3).init(&[0]).build()
}

fn x_gt(c: i64) -> Expr {
    Expr::binary(BinaryOp::Gt, Expr::var("x"), Expr::int(c))
}

#[test]
fn test_count_over_all_states() {
    let model = model();
    let mut eval = Evaluator::new(&model);
    let result = eval
        .check(&Expr::filter(FilterOp::Count, x_gt(1), None))
        .unwrap();
    assert_eq!(result.value, Some(ResultValue::Int(2)));
}

#[test]
fn test_forall_over_all_states() {
    let model = model();
    let mut eval = Evaluator::new(&model);
    let expr = Expr::filter(
        FilterOp::ForAll,
        Expr::binary(BinaryOp::Ge, Expr::var("x"), Expr::int(0)),
        None,
    );
    let result = eval.check(&expr).unwrap();
    assert_eq!(result.value, Some(ResultValue::Bool(true)));
}

#[test]
fn test_out_of_range_comparison_is_empty() {
    let model = model();
    let m = model.mtbdd();
    let mut eval = Evaluator::new(&model);

    let expr = Expr::binary(BinaryOp::Eq, Expr::var("x"), Expr::int(5));
    let dd = eval.evaluate_dd(&expr, m.copy(model.reach())).unwrap();
    assert!(m.is_zero(&dd));
    m.release(dd);

    let result = eval
        .check(&Expr::filter(FilterOp::Exists, expr, None))
        .unwrap();
    assert_eq!(result.value, Some(ResultValue::Bool(false)));
}

#[test]
fn test_ite_mixed_representations_match_symbolic() {
    let model = model();
    let m = model.mtbdd();
    let mut eval = Evaluator::new(&model);

    let ite = Expr::ite(x_gt(1), Expr::var("x"), Expr::int(0));
    let symbolic = eval
        .evaluate(&ite, m.copy(model.reach()))
        .unwrap()
        .into_vector(&model)
        .unwrap();
    assert_eq!(symbolic, vec![0.0, 0.0, 2.0, 3.0]);

    // Same merge with the branches forced into opposite representations.
    let cond = eval.evaluate_dd(&x_gt(1), m.copy(model.reach())).unwrap();
    let then = StateValues::Explicit(vec![0.0, 1.0, 2.0, 3.0]);
    let otherwise = StateValues::Symbolic(m.zero());
    let merged = values::merge_ite(&model, cond, then, otherwise)
        .unwrap()
        .into_vector(&model)
        .unwrap();
    assert_eq!(merged, symbolic);
}

#[test]
fn test_state_filter_requires_single_state() {
    let model = model();
    let mut eval = Evaluator::new(&model);
    let expr = Expr::filter(
        FilterOp::State,
        Expr::var("x"),
        Some(Expr::binary(BinaryOp::Ge, Expr::var("x"), Expr::int(2))),
    );
    let err = eval.check(&expr).unwrap_err();
    assert!(err.to_string().contains("2 states"), "got: {err}");
}

#[test]
fn test_fast_path_matches_general_construction() {
    use statecheck::mtbdd::ApplyOp;

    let model = model();
    let m = model.mtbdd();
    let mut eval = Evaluator::new(&model);
    let x = model.var("x").unwrap();

    let cases = [
        (BinaryOp::Eq, ApplyOp::Equals),
        (BinaryOp::Ne, ApplyOp::NotEquals),
        (BinaryOp::Gt, ApplyOp::Greater),
        (BinaryOp::Ge, ApplyOp::GreaterEq),
        (BinaryOp::Lt, ApplyOp::Less),
        (BinaryOp::Le, ApplyOp::LessEq),
    ];
    for (rel, apply_op) in cases {
        for c in -1..=4 {
            // Fast path, both operand orders.
            let expr = Expr::binary(rel, Expr::var("x"), Expr::int(c));
            let fast = eval.evaluate_dd(&expr, m.copy(model.reach())).unwrap();
            let flipped = Expr::binary(rel.mirror(), Expr::int(c), Expr::var("x"));
            let fast2 = eval.evaluate_dd(&flipped, m.copy(model.reach())).unwrap();

            // General route: pointwise comparison of the variable's
            // identity diagram against the constant, over reach.
            let general = {
                let id = model.variable_identity(x);
                let cmp = m.apply(apply_op, id, m.constant(c as f64));
                m.apply(ApplyOp::Times, cmp, m.copy(model.reach()))
            };

            assert_eq!(fast, general, "x {rel} {c}");
            assert_eq!(fast2, general, "{c} {} x", rel.mirror());
            m.release(fast);
            m.release(fast2);
            m.release(general);
        }
    }
}

#[test]
fn test_reference_hygiene_on_errors() {
    let model = model();
    let m = model.mtbdd();
    let baseline = m.live_refs();
    let mut eval = Evaluator::new(&model);

    let failing = [
        Expr::var("nope"),
        Expr::constant("nope"),
        Expr::label("nope"),
        Expr::property("nope"),
        Expr::binary(BinaryOp::Plus, Expr::var("x"), Expr::var("nope")),
        Expr::binary(BinaryOp::And, Expr::bool(true), Expr::label("nope")),
        Expr::not(Expr::label("nope")),
        Expr::neg(Expr::var("nope")),
        Expr::ite(x_gt(1), Expr::var("nope"), Expr::int(0)),
        Expr::ite(Expr::label("nope"), Expr::var("x"), Expr::int(0)),
        Expr::func(Func::Min, vec![Expr::var("x"), Expr::var("nope")]),
        Expr::func(Func::Pow, vec![Expr::var("x"), Expr::constant("nope")]),
        Expr::filter(FilterOp::Sum, Expr::var("x"), Some(Expr::label("nope"))),
        Expr::filter(FilterOp::Sum, Expr::var("nope"), None),
        Expr::filter(FilterOp::Count, Expr::var("x"), Some(Expr::bool(false))),
    ];
    for expr in &failing {
        assert!(eval.check(expr).is_err(), "expected failure: {expr}");
        assert_eq!(m.live_refs(), baseline, "leak after: {expr}");
    }
}

#[test]
fn test_reference_hygiene_on_success() {
    let model = model();
    let m = model.mtbdd();
    let baseline = m.live_refs();
    let mut eval = Evaluator::new(&model).store_vector(true);

    let exprs = [
        Expr::filter(FilterOp::Sum, Expr::var("x"), None),
        Expr::filter(FilterOp::ArgMax, Expr::var("x"), None),
        Expr::filter(FilterOp::Print, x_gt(0), None),
        Expr::ite(x_gt(1), Expr::var("x"), Expr::int(0)),
        Expr::func(Func::Max, vec![Expr::var("x"), Expr::int(2)]),
    ];
    for expr in &exprs {
        eval.check(expr).unwrap();
        assert_eq!(m.live_refs(), baseline, "leak after: {expr}");
    }
}

#[test]
fn test_default_filter_single_initial_state() {
    let model = ModelBuilder::new().var("x", 0, 3).init(&[2]).build();
    let mut eval = Evaluator::new(&model);
    let result = eval.check(&Expr::var("x")).unwrap();
    assert_eq!(result.value, Some(ResultValue::Int(2)));
    // The single-state filter is recorded for downstream solvers.
    assert_eq!(eval.current_filter().map(|f| f.state_index), Some(2));
}

#[test]
fn test_default_filter_multiple_initial_states() {
    let model = ModelBuilder::new()
        .var("x", 0, 3)
        .init(&[1])
        .init(&[3])
        .build();
    let mut eval = Evaluator::new(&model);
    let result = eval.check(&Expr::var("x")).unwrap();
    assert_eq!(result.value, Some(ResultValue::Interval(1.0, 3.0)));
}

#[test]
fn test_numeric_reductions() {
    let model = model();
    let mut eval = Evaluator::new(&model);

    let sum = eval
        .check(&Expr::filter(FilterOp::Sum, Expr::var("x"), None))
        .unwrap();
    assert_eq!(sum.value, Some(ResultValue::Int(6)));

    let avg = eval
        .check(&Expr::filter(FilterOp::Avg, Expr::var("x"), None))
        .unwrap();
    assert_eq!(avg.value, Some(ResultValue::Real(1.5)));

    let min = eval
        .check(&Expr::filter(
            FilterOp::Min,
            Expr::var("x"),
            Some(x_gt(0)),
        ))
        .unwrap();
    assert_eq!(min.value, Some(ResultValue::Int(1)));

    let first = eval
        .check(&Expr::filter(
            FilterOp::First,
            Expr::var("x"),
            Some(Expr::binary(BinaryOp::Ge, Expr::var("x"), Expr::int(2))),
        ))
        .unwrap();
    assert_eq!(first.value, Some(ResultValue::Int(2)));

    let range = eval
        .check(&Expr::filter(FilterOp::Range, Expr::var("x"), None))
        .unwrap();
    assert_eq!(range.value, Some(ResultValue::Interval(0.0, 3.0)));
}

#[test]
fn test_argmax_vector() {
    let model = model();
    let mut eval = Evaluator::new(&model).store_vector(true);
    let result = eval
        .check(&Expr::filter(FilterOp::ArgMax, Expr::var("x"), None))
        .unwrap();
    assert_eq!(result.value, None);
    assert_eq!(result.vector, Some(vec![0.0, 0.0, 0.0, 1.0]));
}

#[test]
fn test_defined_label_resolution() {
    let model = ModelBuilder::new()
        .var("x", 0, 3)
        .init(&[0])
        .label("big", Expr::binary(BinaryOp::Ge, Expr::var("x"), Expr::int(2)))
        .build();
    let mut eval = Evaluator::new(&model);
    let result = eval
        .check(&Expr::filter(
            FilterOp::Count,
            Expr::label("big"),
            None,
        ))
        .unwrap();
    assert_eq!(result.value, Some(ResultValue::Int(2)));
}

#[test]
fn test_named_constant_in_fast_path() {
    let model = ModelBuilder::new()
        .var("x", 0, 3)
        .init(&[0])
        .constant("k", Value::Int(2))
        .build();
    let mut eval = Evaluator::new(&model);
    let expr = Expr::filter(
        FilterOp::Count,
        Expr::binary(
            BinaryOp::Lt,
            Expr::var("x"),
            Expr::unary(UnaryOp::Parenth, Expr::constant("k")),
        ),
        None,
    );
    let result = eval.check(&expr).unwrap();
    assert_eq!(result.value, Some(ResultValue::Int(2)));
}

#[test]
fn test_domain_errors_poison_with_nan() {
    let model = model();
    let m = model.mtbdd();
    let mut eval = Evaluator::new(&model);

    // Integer power with negative exponent.
    let pow = Expr::func(Func::Pow, vec![Expr::var("x"), Expr::int(-1)]);
    let vec = eval
        .evaluate(&pow, m.copy(model.reach()))
        .unwrap()
        .into_vector(&model)
        .unwrap();
    assert!(vec.iter().all(|v| v.is_nan()));

    // Modulus with non-positive divisor.
    let modulo = Expr::func(Func::Mod, vec![Expr::var("x"), Expr::int(0)]);
    let vec = eval
        .evaluate(&modulo, m.copy(model.reach()))
        .unwrap()
        .into_vector(&model)
        .unwrap();
    assert!(vec.iter().all(|v| v.is_nan()));

    // A poisoned state does not abort an aggregate over healthy ones.
    let guarded = Expr::ite(
        x_gt(0),
        Expr::func(Func::Mod, vec![Expr::int(7), Expr::var("x")]),
        Expr::int(0),
    );
    let vec = eval
        .evaluate(&guarded, m.copy(model.reach()))
        .unwrap()
        .into_vector(&model)
        .unwrap();
    assert_eq!(vec, vec![0.0, 0.0, 1.0, 1.0]);
}

#[test]
fn test_representation_equivalence_for_arithmetic() {
    use statecheck::mtbdd::ApplyOp;

    let model = model();
    let m = model.mtbdd();
    let mut eval = Evaluator::new(&model);

    let a_expr = Expr::binary(BinaryOp::Times, Expr::var("x"), Expr::int(2));
    let b_expr = Expr::binary(BinaryOp::Plus, Expr::var("x"), Expr::int(1));

    for op in [
        ApplyOp::Plus,
        ApplyOp::Minus,
        ApplyOp::Times,
        ApplyOp::Divide,
        ApplyOp::Min,
        ApplyOp::Max,
    ] {
        // Fully symbolic route.
        let da = eval.evaluate_dd(&a_expr, m.copy(model.reach())).unwrap();
        let db = eval.evaluate_dd(&b_expr, m.copy(model.reach())).unwrap();
        let symbolic = StateValues::Symbolic(m.apply(op, da, db))
            .into_vector(&model)
            .unwrap();

        // Explicit route over the same operands.
        let a = eval
            .evaluate(&a_expr, m.copy(model.reach()))
            .unwrap()
            .into_vector(&model)
            .unwrap();
        let b = eval
            .evaluate(&b_expr, m.copy(model.reach()))
            .unwrap()
            .into_vector(&model)
            .unwrap();
        let explicit = values::apply_explicit(op, &a, &b);

        assert_eq!(symbolic, explicit, "{op:?}");
    }
}

#[test]
fn test_deadlock_label() {
    let model = ModelBuilder::new()
        .var("x", 0, 3)
        .init(&[0])
        .deadlock(&[3])
        .build();
    let mut eval = Evaluator::new(&model);
    let result = eval
        .check(&Expr::filter(
            FilterOp::Exists,
            Expr::label("deadlock"),
            None,
        ))
        .unwrap();
    assert_eq!(result.value, Some(ResultValue::Bool(true)));
}
