//! Lexical code metrics.
//!
//! Cyclomatic complexity here is an approximation: one plus the number of
//! branching tokens outside comments and strings. It is not derived from a
//! control-flow graph and will drift from a McCabe-exact value on macros,
//! generated code and exotic syntax.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::language::Language;
use crate::scanner::SourceText;

static PY_BRANCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:if|elif|for|while|except|and|or|case)\b").unwrap()
});
static BRACE_BRANCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:if|for|foreach|while|case|catch)\b|&&|\|\|").unwrap()
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeMetrics {
    pub lines_of_code: usize,
    pub cyclomatic_complexity: usize,
    pub function_count: usize,
    pub class_count: usize,
    /// Comment lines / total lines, 0.0 to 1.0.
    pub comment_ratio: f64,
}

impl CodeMetrics {
    pub fn compute(source: &SourceText) -> Self {
        let total = source.len();
        let lines_of_code = source.lines().iter().filter(|l| !l.raw.trim().is_empty()).count();
        let comment_ratio = if total == 0 {
            0.0
        } else {
            round3(source.comment_lines() as f64 / total as f64)
        };
        Self {
            lines_of_code,
            cyclomatic_complexity: cyclomatic_complexity(source),
            function_count: source.functions().len(),
            class_count: source.classes().len(),
            comment_ratio,
        }
    }
}

/// Branching tokens on one comment- and string-free line.
pub fn branch_points(bare: &str, language: Language) -> usize {
    let re: &Regex = if language == Language::Python { &PY_BRANCH } else { &BRACE_BRANCH };
    re.find_iter(bare).count()
}

pub fn cyclomatic_complexity(source: &SourceText) -> usize {
    1 + source
        .lines()
        .iter()
        .map(|l| branch_points(&l.bare, source.language))
        .sum::<usize>()
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
