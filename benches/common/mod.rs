#![allow(dead_code)]
use exprjit::fixtures::{self, Workload};
use exprjit::jit::CompilerOptions;

pub fn workloads() -> Vec<Workload> {
    fixtures::workloads().unwrap_or_else(|err| panic!("build workloads: {err}"))
}

pub fn label(workload: &Workload) -> String {
    format!("{}_{}nodes", workload.name, workload.tree.len())
}

/// Compiler options taken from `EXPRJIT_OPT_LEVEL` and `EXPRJIT_VERIFY`.
pub fn compiler_options() -> CompilerOptions {
    CompilerOptions::from_env().unwrap_or_else(|err| panic!("compiler options: {err}"))
}
