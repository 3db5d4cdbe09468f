//! Sample expressions shared by the parity harness and the benchmarks.

use crate::expression::{ExprId, ExpressionResult, ExpressionTree};
use crate::value::{ValueType, Word64};

pub struct Workload {
    pub name: &'static str,
    pub tree: ExpressionTree,
    pub root: ExprId,
    pub args: Vec<Word64>,
}

pub fn workloads() -> ExpressionResult<Vec<Workload>> {
    Ok(vec![
        int_polynomial(16)?,
        double_polynomial(16)?,
        mixed_casts()?,
        balanced_sum(6)?,
    ])
}

/// Horner evaluation of `sum(i * x^i)` over `int64`, `x = args[0]`.
pub fn int_polynomial(degree: i64) -> ExpressionResult<Workload> {
    let mut tree = ExpressionTree::new();
    let x = tree.argument(0, ValueType::Int64);
    let mut root = tree.constant_int(degree);
    for coefficient in (0..degree).rev() {
        let scaled = tree.mul(root, x)?;
        let coefficient = tree.constant_int(coefficient);
        root = tree.add(scaled, coefficient)?;
    }
    Ok(Workload {
        name: "int_polynomial",
        tree,
        root,
        args: vec![Word64::from_i64(3)],
    })
}

/// Horner evaluation over `double` with alternating coefficients.
pub fn double_polynomial(degree: u32) -> ExpressionResult<Workload> {
    let mut tree = ExpressionTree::new();
    let x = tree.argument(0, ValueType::Double);
    let mut root = tree.constant_double(1.0);
    for step in 0..degree {
        let scaled = tree.mul(root, x)?;
        let coefficient = tree.constant_double(if step % 2 == 0 { 0.5 } else { -0.25 });
        root = tree.sub(scaled, coefficient)?;
    }
    Ok(Workload {
        name: "double_polynomial",
        tree,
        root,
        args: vec![Word64::from_f64(1.125)],
    })
}

/// `int64((double(a) / double(b)) * c) / d`, with a shared cast subtree.
pub fn mixed_casts() -> ExpressionResult<Workload> {
    let mut tree = ExpressionTree::new();
    let a = tree.argument(0, ValueType::Int64);
    let b = tree.argument(1, ValueType::Int64);
    let c = tree.argument(2, ValueType::Double);
    let d = tree.argument(3, ValueType::Int64);

    let a = tree.cast(a, ValueType::Double)?;
    let b = tree.cast(b, ValueType::Double)?;
    let ratio = tree.div(a, b)?;
    let scaled = tree.mul(ratio, c)?;
    let squared = tree.mul(scaled, scaled)?;
    let truncated = tree.cast(squared, ValueType::Int64)?;
    let root = tree.div(truncated, d)?;
    Ok(Workload {
        name: "mixed_casts",
        tree,
        root,
        args: vec![
            Word64::from_i64(22),
            Word64::from_i64(7),
            Word64::from_f64(10.0),
            Word64::from_i64(3),
        ],
    })
}

/// Balanced binary sum over `2^depth` argument slots.
pub fn balanced_sum(depth: u32) -> ExpressionResult<Workload> {
    let mut tree = ExpressionTree::new();
    let width = 1usize << depth;
    let mut level: Vec<ExprId> = (0..width)
        .map(|index| tree.argument(index, ValueType::Int64))
        .collect();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            next.push(tree.add(pair[0], pair[1])?);
        }
        level = next;
    }
    let root = level[0];
    Ok(Workload {
        name: "balanced_sum",
        tree,
        root,
        args: (0..width as i64).map(Word64::from_i64).collect(),
    })
}
