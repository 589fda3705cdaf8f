//! Process-wide verifier configuration (spec §2 C18), modeled on the teacher's
//! `LatticeConfigProvider`: a TOML-backed settings struct behind a lazily-initialized,
//! swappable global provider rather than a bag of free functions reading env vars.

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VerifierError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverLimits {
    pub max_variables: usize,
    pub max_assertions: usize,
    pub max_expr_depth: usize,
    pub max_node_count: usize,
}

impl Default for SolverLimits {
    fn default() -> Self {
        SolverLimits {
            max_variables: 500,
            max_assertions: 1000,
            max_expr_depth: 64,
            max_node_count: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub timeout_per_clause_ms: u64,
    pub global_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            timeout_per_clause_ms: 5_000,
            global_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    pub resolver: bool,
    pub purity: bool,
    pub exhaustiveness: bool,
    pub consistency: bool,
}

impl Default for PassConfig {
    fn default() -> Self {
        PassConfig {
            resolver: true,
            purity: true,
            exhaustiveness: true,
            consistency: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    pub treat_new_optional_field_as_compatible: bool,
    pub treat_enum_variant_addition_as_compatible: bool,
}

impl Default for DiffConfig {
    fn default() -> Self {
        DiffConfig {
            treat_new_optional_field_as_compatible: true,
            treat_enum_variant_addition_as_compatible: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    pub solver: SolverLimits,
    pub timeouts: TimeoutConfig,
    pub passes: PassConfig,
    pub diff: DiffConfig,
}

impl VerifierConfig {
    pub fn from_toml_str(text: &str) -> Result<VerifierConfig> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<VerifierConfig> {
        let text = std::fs::read_to_string(path)?;
        VerifierConfig::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(VerifierError::from)
    }
}

static PROVIDER: OnceLock<Mutex<Arc<VerifierConfig>>> = OnceLock::new();

fn provider() -> &'static Mutex<Arc<VerifierConfig>> {
    PROVIDER.get_or_init(|| Mutex::new(Arc::new(VerifierConfig::default())))
}

/// The process-wide configuration, read by every component that doesn't have one
/// threaded to it explicitly (the CLI, mostly). Cloning the `Arc` is cheap; callers
/// should hold their own reference for the duration of a run rather than re-reading
/// per clause.
pub fn current() -> Arc<VerifierConfig> {
    provider().lock().expect("config mutex poisoned").clone()
}

/// Replaces the process-wide configuration. Intended for CLI startup and tests; the
/// orchestrator itself always takes an explicit `&VerifierConfig` rather than calling
/// this.
pub fn set_current(config: VerifierConfig) {
    *provider().lock().expect("config mutex poisoned") = Arc::new(config);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = VerifierConfig::default();
        assert_eq!(cfg.timeouts.timeout_per_clause_ms, 5_000);
        assert_eq!(cfg.timeouts.global_timeout_ms, 60_000);
    }

    #[test]
    fn roundtrips_through_toml() {
        let cfg = VerifierConfig::default();
        let text = cfg.to_toml_string().unwrap();
        let back = VerifierConfig::from_toml_str(&text).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let cfg = VerifierConfig::from_toml_str("[timeouts]\nglobal_timeout_ms = 1000\n").unwrap();
        assert_eq!(cfg.timeouts.global_timeout_ms, 1000);
        assert_eq!(cfg.timeouts.timeout_per_clause_ms, 5_000);
        assert_eq!(cfg.solver.max_variables, 500);
    }
}
