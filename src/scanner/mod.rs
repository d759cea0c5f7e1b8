use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::EngineConfig;
use crate::language::Language;

pub mod source;
pub mod matchers;
pub mod catalog;
pub mod engine;

pub use catalog::RuleCatalog;
pub use engine::{scan, ScanFault, ScanOutcome};
pub use source::SourceText;

/// 严重级别 (Critical 最高)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Severity::Critical => "🔴",
            Severity::High => "🟠",
            Severity::Medium => "🟡",
            Severity::Low => "🔵",
            Severity::Info => "⚪",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    AlgorithmEfficiency,
    Security,
    Memory,
    Maintainability,
    ApiDesign,
    Testing,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::AlgorithmEfficiency,
        Category::Security,
        Category::Memory,
        Category::Maintainability,
        Category::ApiDesign,
        Category::Testing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::AlgorithmEfficiency => "algorithm-efficiency",
            Category::Security => "security",
            Category::Memory => "memory",
            Category::Maintainability => "maintainability",
            Category::ApiDesign => "api-design",
            Category::Testing => "testing",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| anyhow::anyhow!("Unknown category: {s}"))
    }
}

/// 单条规则的一次命中
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub rule_id: &'static str,
    pub category: Category,
    pub severity: Severity,
    pub line: usize,
    pub column: usize,
    pub message: String,
    #[serde(skip)]
    pub suggestion: &'static str,
    pub context: String,
}

/// What a matcher reports: a position and optionally a message that
/// replaces the rule's default one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit {
    pub line: usize,
    pub column: usize,
    pub message: Option<String>,
}

impl Hit {
    pub fn at(line: usize, column: usize) -> Self {
        Self { line, column, message: None }
    }

    pub fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }
}

/// Everything a matcher may look at.
pub struct ScanContext<'a> {
    pub source: &'a SourceText<'a>,
    pub config: &'a EngineConfig,
}

impl<'a> ScanContext<'a> {
    pub fn language(&self) -> Language {
        self.source.language
    }
}

/// 规则匹配策略
pub trait Matcher: Send + Sync {
    fn evaluate(&self, ctx: &ScanContext) -> anyhow::Result<Vec<Hit>>;
}

pub struct Rule {
    pub id: &'static str,
    pub category: Category,
    pub severity: Severity,
    /// Empty means every language.
    pub languages: &'static [Language],
    pub message: &'static str,
    pub suggestion: &'static str,
    pub matcher: Box<dyn Matcher>,
}

impl Rule {
    pub fn applies_to(&self, language: Language) -> bool {
        self.languages.is_empty() || self.languages.contains(&language)
    }

    pub fn info(&self) -> RuleInfo {
        RuleInfo {
            id: self.id,
            category: self.category,
            severity: self.severity,
            languages: self.languages.to_vec(),
            message: self.message,
            suggestion: self.suggestion,
        }
    }
}

/// Serializable description of a rule, for listings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInfo {
    pub id: &'static str,
    pub category: Category,
    pub severity: Severity,
    /// Empty means every language.
    pub languages: Vec<Language>,
    pub message: &'static str,
    pub suggestion: &'static str,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("severity", &self.severity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Low > Severity::Info);
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("security".parse::<Category>().unwrap(), Category::Security);
        assert_eq!("ALGORITHM_EFFICIENCY".parse::<Category>().unwrap(), Category::AlgorithmEfficiency);
        assert!("style".parse::<Category>().is_err());
    }
}
