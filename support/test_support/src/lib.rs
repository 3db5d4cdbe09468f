use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaseClass {
    Success,
    ConstructionError,
    RuntimeError,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TypeSpec {
    Int64,
    Double,
}

/// A typed literal, written `{int64: 5}` or `{double: .inf}`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ValueSpec {
    Int64(i64),
    Double(f64),
}

/// Expression written as nested single-key maps, e.g.
/// `{add: [{int64: 2}, {arg: {index: 0, type: int64}}]}`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ExprSpec {
    Int64(i64),
    Double(f64),
    Arg {
        index: usize,
        #[serde(rename = "type")]
        ty: TypeSpec,
    },
    Cast {
        to: TypeSpec,
        child: Box<ExprSpec>,
    },
    Add(Box<ExprSpec>, Box<ExprSpec>),
    Sub(Box<ExprSpec>, Box<ExprSpec>),
    Mul(Box<ExprSpec>, Box<ExprSpec>),
    Div(Box<ExprSpec>, Box<ExprSpec>),
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaseSpec {
    pub class: CaseClass,
    pub expression: ExprSpec,
    #[serde(default)]
    pub args: Vec<ValueSpec>,
    pub expected: Option<ValueSpec>,
    pub error_contains: Option<String>,
    #[serde(default)]
    pub unsupported_backends: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Case {
    pub name: String,
    pub dir: PathBuf,
    pub spec: CaseSpec,
}

pub fn load_cases(cases_dir: &Path) -> Result<Vec<Case>> {
    let mut cases = Vec::new();

    for entry in
        fs::read_dir(cases_dir).with_context(|| format!("Reading {}", cases_dir.display()))?
    {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }

        let case_path = path.join("case.yaml");
        if !case_path.exists() {
            continue;
        }

        let case_name = path
            .file_name()
            .and_then(|value| value.to_str())
            .map(str::to_string)
            .with_context(|| format!("Invalid case directory name {}", path.display()))?;
        let case_raw = fs::read_to_string(&case_path)
            .with_context(|| format!("Reading {}", case_path.display()))?;
        let spec: CaseSpec = serde_yaml::from_str(&case_raw)
            .with_context(|| format!("Parsing {}", case_path.display()))?;
        validate_case(&case_name, &spec)?;

        cases.push(Case {
            name: case_name,
            dir: path,
            spec,
        });
    }

    ensure!(
        !cases.is_empty(),
        "No test cases found in {}",
        cases_dir.display()
    );
    cases.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(cases)
}

fn validate_case(name: &str, spec: &CaseSpec) -> Result<()> {
    match spec.class {
        CaseClass::Success => ensure!(
            spec.expected.is_some(),
            "Case {name} is a success case without an expected value"
        ),
        CaseClass::ConstructionError | CaseClass::RuntimeError => ensure!(
            spec.error_contains.is_some(),
            "Case {name} is an error case without error_contains"
        ),
    }
    Ok(())
}

pub fn validate_unsupported_backends(case: &Case, known_backends: &[&str]) -> Result<()> {
    for backend in &case.spec.unsupported_backends {
        ensure!(
            known_backends.contains(&backend.as_str()),
            "Case {} contains unknown unsupported backend '{}'",
            case.name,
            backend
        );
    }
    Ok(())
}

pub fn is_backend_unsupported(case: &Case, backend_name: &str) -> bool {
    case.spec
        .unsupported_backends
        .iter()
        .any(|name| name == backend_name)
}
