use anyhow::{Context, Result, ensure};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;

use crate::backend::{self, Backend};
use crate::expression::{BinaryOperator, ExprId, ExpressionTree};
use crate::fixtures;
use crate::interpreter::Interpreter;
use crate::value::{Value, ValueType, Word64};

const ARGUMENT_SLOTS: usize = 4;

/// Bit equality, except that any two NaNs agree: NaN payloads depend on the
/// host's float unit rather than on either backend.
fn same_result(ty: ValueType, left: Word64, right: Word64) -> bool {
    match (Value::from_word(ty, left), Value::from_word(ty, right)) {
        (Value::Double(l), Value::Double(r)) if l.is_nan() && r.is_nan() => true,
        _ => left == right,
    }
}

fn outcome(
    backend: &dyn Backend,
    tree: &ExpressionTree,
    root: ExprId,
    args: &[Word64],
) -> Result<Word64, String> {
    backend.run(tree, root, args).map_err(|err| err.to_string())
}

fn assert_backends_agree(tree: &ExpressionTree, root: ExprId, args: &[Word64]) -> Result<()> {
    let ty = tree.value_type(root)?;
    let expected = outcome(&Interpreter::new(), tree, root, args);
    for backend in backend::backends() {
        let actual = outcome(backend.as_ref(), tree, root, args);
        let agree = match (&expected, &actual) {
            (Ok(expected), Ok(actual)) => same_result(ty, *expected, *actual),
            (Err(expected), Err(actual)) => expected == actual,
            _ => false,
        };
        ensure!(
            agree,
            "Backend {} mismatch for {}: expected {:?}, got {:?}",
            backend.name(),
            tree.display(root),
            expected,
            actual
        );
    }
    Ok(())
}

#[test]
fn runs_fixtures_across_backends() -> Result<()> {
    for workload in fixtures::workloads()? {
        assert_backends_agree(&workload.tree, workload.root, &workload.args)
            .with_context(|| format!("Workload {}", workload.name))?;
    }
    Ok(())
}

#[test]
fn fixture_results_match_reference_values() -> Result<()> {
    let interpreter = Interpreter::new();

    let polynomial = fixtures::int_polynomial(3)?;
    // 3x^3 + 2x^2 + x at x = 3
    let result = interpreter.run(&polynomial.tree, polynomial.root, &polynomial.args)?;
    assert_eq!(result.as_i64(), 81 + 18 + 3);

    let sum = fixtures::balanced_sum(3)?;
    let result = interpreter.run(&sum.tree, sum.root, &sum.args)?;
    assert_eq!(result.as_i64(), (0..8).sum::<i64>());

    let mixed = fixtures::mixed_casts()?;
    let result = interpreter.run(&mixed.tree, mixed.root, &mixed.args)?;
    let scaled = 22.0f64 / 7.0 * 10.0;
    assert_eq!(result.as_i64(), (scaled * scaled) as i64 / 3);
    Ok(())
}

#[test]
fn deep_chains_agree_across_backends() -> Result<()> {
    let mut tree = ExpressionTree::new();
    let half = tree.constant_double(0.5);
    let mut root = tree.argument(0, ValueType::Double);
    for step in 0..4_000 {
        root = if step % 2 == 0 {
            tree.add(root, half)?
        } else {
            tree.mul(half, root)?
        };
    }
    assert_backends_agree(&tree, root, &[Word64::from_f64(3.0)])
}

#[test]
fn unaddressable_argument_is_reported_alike() -> Result<()> {
    let mut tree = ExpressionTree::new();
    let near = tree.argument(0, ValueType::Int64);
    let far = tree.argument(usize::MAX, ValueType::Int64);
    let sum = tree.add(near, far)?;
    assert_backends_agree(&tree, sum, &[Word64::from_i64(1)])
}

/// Untyped tree outline; [`build`] assigns types top-down and inserts casts
/// so every generated outline yields a well-typed expression.
#[derive(Debug, Clone)]
enum Shape {
    Constant { int: i64, double: f64 },
    Argument(usize),
    Cast(Box<Shape>),
    Binary(BinaryOperator, Box<Shape>, Box<Shape>),
    /// Both operands are the same node.
    Shared(BinaryOperator, Box<Shape>),
}

fn int_value() -> impl Strategy<Value = i64> {
    prop_oneof![
        Just(i64::MIN),
        Just(i64::MAX),
        Just(0i64),
        Just(-1i64),
        -3i64..=3,
        any::<i64>(),
    ]
}

fn double_value() -> impl Strategy<Value = f64> {
    prop_oneof![
        Just(0.0f64),
        Just(-0.0f64),
        Just(f64::INFINITY),
        Just(1e300f64),
        -100.0f64..100.0,
        any::<f64>(),
    ]
}

fn value_type() -> impl Strategy<Value = ValueType> {
    prop_oneof![Just(ValueType::Int64), Just(ValueType::Double)]
}

fn operator() -> impl Strategy<Value = BinaryOperator> {
    prop_oneof![
        Just(BinaryOperator::Add),
        Just(BinaryOperator::Sub),
        Just(BinaryOperator::Mul),
        Just(BinaryOperator::Div),
    ]
}

fn shape() -> impl Strategy<Value = Shape> {
    let leaf = prop_oneof![
        (int_value(), double_value()).prop_map(|(int, double)| Shape::Constant { int, double }),
        (0..ARGUMENT_SLOTS).prop_map(Shape::Argument),
    ];
    leaf.prop_recursive(5, 48, 2, |inner| {
        prop_oneof![
            inner.clone().prop_map(|child| Shape::Cast(Box::new(child))),
            (operator(), inner.clone(), inner.clone())
                .prop_map(|(op, left, right)| Shape::Binary(op, Box::new(left), Box::new(right))),
            (operator(), inner).prop_map(|(op, operand)| Shape::Shared(op, Box::new(operand))),
        ]
    })
}

fn other_type(ty: ValueType) -> ValueType {
    match ty {
        ValueType::Int64 => ValueType::Double,
        ValueType::Double => ValueType::Int64,
    }
}

fn build(
    tree: &mut ExpressionTree,
    shape: &Shape,
    slots: &[ValueType],
    ty: ValueType,
) -> Result<ExprId> {
    Ok(match shape {
        Shape::Constant { int, double } => match ty {
            ValueType::Int64 => tree.constant_int(*int),
            ValueType::Double => tree.constant_double(*double),
        },
        Shape::Argument(index) => {
            let slot = slots[*index];
            let arg = tree.argument(*index, slot);
            if slot == ty { arg } else { tree.cast(arg, ty)? }
        }
        Shape::Cast(child) => {
            let child = build(tree, child, slots, other_type(ty))?;
            tree.cast(child, ty)?
        }
        Shape::Binary(op, left, right) => {
            let left = build(tree, left, slots, ty)?;
            let right = build(tree, right, slots, ty)?;
            tree.binary(*op, left, right)?
        }
        Shape::Shared(op, operand) => {
            let operand = build(tree, operand, slots, ty)?;
            tree.binary(*op, operand, operand)?
        }
    })
}

fn case_failure(err: anyhow::Error) -> TestCaseError {
    TestCaseError::fail(format!("{err:#}"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn random_trees_agree_across_backends(
        shape in shape(),
        result_type in value_type(),
        slots in proptest::collection::vec(value_type(), ARGUMENT_SLOTS),
        ints in proptest::collection::vec(int_value(), ARGUMENT_SLOTS),
        doubles in proptest::collection::vec(double_value(), ARGUMENT_SLOTS),
    ) {
        let mut tree = ExpressionTree::new();
        let root = build(&mut tree, &shape, &slots, result_type).map_err(case_failure)?;
        let args: Vec<Word64> = slots
            .iter()
            .enumerate()
            .map(|(index, slot)| match slot {
                ValueType::Int64 => Word64::from_i64(ints[index]),
                ValueType::Double => Word64::from_f64(doubles[index]),
            })
            .collect();
        assert_backends_agree(&tree, root, &args).map_err(case_failure)?;
    }
}
