use serde::Deserialize;

use super::error::{JitError, JitResult};

pub const OPT_LEVEL_ENV: &str = "EXPRJIT_OPT_LEVEL";
pub const VERIFY_ENV: &str = "EXPRJIT_VERIFY";

/// Cranelift optimization level.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    pub fn as_setting(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(OptLevel::None),
            "speed" => Some(OptLevel::Speed),
            "speed_and_size" => Some(OptLevel::SpeedAndSize),
            _ => None,
        }
    }
}

/// Settings applied to the host ISA of every [`super::ExpressionCompiler`].
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct CompilerOptions {
    pub opt_level: OptLevel,
    /// Run the Cranelift IR verifier before lowering.
    pub verify: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::default(),
            verify: true,
        }
    }
}

impl CompilerOptions {
    /// Defaults overridden by `EXPRJIT_OPT_LEVEL` and `EXPRJIT_VERIFY`.
    pub fn from_env() -> JitResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> JitResult<Self> {
        let mut options = Self::default();
        if let Some(value) = lookup(OPT_LEVEL_ENV) {
            options.opt_level = OptLevel::parse(value.trim()).ok_or(JitError::InvalidOption {
                name: OPT_LEVEL_ENV,
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup(VERIFY_ENV) {
            options.verify = match value.trim() {
                "1" | "true" => true,
                "0" | "false" => false,
                _ => {
                    return Err(JitError::InvalidOption {
                        name: VERIFY_ENV,
                        value,
                    });
                }
            };
        }
        Ok(options)
    }
}
