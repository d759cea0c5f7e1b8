// ============================================================================
// Engine configuration
// ============================================================================
//
// 所有字段都有默认值，YAML 文件只需覆盖需要修改的部分

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::scanner::Severity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Byte ceiling for submitted code (inclusive).
    pub max_code_bytes: usize,
    pub max_analysis_secs: u64,
    pub thresholds: Thresholds,
    pub weights: SeverityWeights,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_code_bytes: 100_000,
            max_analysis_secs: 30,
            thresholds: Thresholds::default(),
            weights: SeverityWeights::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(raw)?;
        config.check()?;
        Ok(config)
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.max_analysis_secs)
    }

    fn check(&self) -> Result<()> {
        if self.max_code_bytes == 0 {
            anyhow::bail!("maxCodeBytes must be greater than zero");
        }
        if self.thresholds.max_nesting_depth == 0 || self.thresholds.max_function_lines == 0 {
            anyhow::bail!("thresholds must be greater than zero");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Thresholds {
    pub max_nesting_depth: usize,
    pub max_function_lines: usize,
    pub max_branches: usize,
    pub max_file_complexity: usize,
    pub max_parameters: usize,
    pub min_functions_for_tests: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_nesting_depth: 4,
            max_function_lines: 50,
            max_branches: 10,
            max_file_complexity: 25,
            max_parameters: 5,
            min_functions_for_tests: 3,
        }
    }
}

/// Points deducted from a category score per finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityWeights {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub info: u32,
}

impl Default for SeverityWeights {
    fn default() -> Self {
        Self { critical: 70, high: 25, medium: 10, low: 4, info: 1 }
    }
}

impl SeverityWeights {
    pub fn weight(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
            Severity::Info => self.info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = EngineConfig::from_yaml("maxCodeBytes: 2048\nthresholds:\n  maxNestingDepth: 6\n").unwrap();
        assert_eq!(config.max_code_bytes, 2048);
        assert_eq!(config.thresholds.max_nesting_depth, 6);
        assert_eq!(config.thresholds.max_function_lines, 50);
        assert_eq!(config.weights.critical, 70);
        assert_eq!(config.time_budget(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "maxAnalysisSecs: 5\nweights:\n  high: 30").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.max_analysis_secs, 5);
        assert_eq!(config.weights.high, 30);
        assert_eq!(config.weights.low, 4);
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        assert!(EngineConfig::from_yaml("maxCodeBytes: 0").is_err());
    }
}
