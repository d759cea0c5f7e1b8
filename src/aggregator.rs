// ============================================================================
// Aggregator / Scorer
// ============================================================================
//
// 去重 -> 排序 -> 指标 -> 打分 -> 建议。
// Pure function of its inputs: no clock, no randomness, so identical input
// always yields an identical result.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::EngineConfig;
use crate::language::Language;
use crate::metrics::CodeMetrics;
use crate::patterns::{self, RecognizedPattern};
use crate::scanner::{Category, Finding, ScanFault, Severity, SourceText};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scores {
    pub security_score: u32,
    pub performance_score: u32,
    pub maintainability_index: u32,
    /// Heuristic estimate, not a measured coverage figure.
    pub test_coverage_estimate: u32,
}

impl Scores {
    pub const PERFECT: Scores = Scores {
        security_score: 100,
        performance_score: 100,
        maintainability_index: 100,
        test_coverage_estimate: 100,
    };
}

/// User-facing rendering of a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: String,
    pub rule_id: String,
    pub category: Category,
    pub severity: Severity,
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub language: Language,
    pub metrics: CodeMetrics,
    pub scores: Scores,
    pub issues: Vec<Issue>,
    pub suggestions: Vec<String>,
    pub patterns: Vec<RecognizedPattern>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_rules: Vec<String>,
}

impl AnalysisResult {
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

/// Severity (critical first), then rule id, then position.
pub fn rank(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.rule_id.cmp(b.rule_id))
            .then_with(|| a.line.cmp(&b.line))
            .then_with(|| a.column.cmp(&b.column))
    });
}

/// Collapse findings sharing (rule id, line) and rank what is left.
pub fn dedupe(mut findings: Vec<Finding>) -> Vec<Finding> {
    rank(&mut findings);
    // same rule implies same severity, so duplicates are adjacent after ranking
    findings.dedup_by(|later, earlier| later.rule_id == earlier.rule_id && later.line == earlier.line);
    findings
}

pub fn aggregate(
    findings: Vec<Finding>,
    source: &SourceText,
    faults: &[ScanFault],
    config: &EngineConfig,
) -> AnalysisResult {
    let findings = dedupe(findings);
    let metrics = CodeMetrics::compute(source);
    let scores = score(&findings, config);
    let suggestions = suggestions(&findings);

    let issues = findings
        .into_iter()
        .enumerate()
        .map(|(i, f)| Issue {
            id: format!("issue_{:03}", i + 1),
            rule_id: f.rule_id.to_string(),
            category: f.category,
            severity: f.severity,
            message: f.message,
            line: f.line,
            column: f.column,
            context: f.context,
        })
        .collect();

    let mut skipped_rules: Vec<String> = faults.iter().map(|f| f.rule_id.to_string()).collect();
    skipped_rules.sort();
    skipped_rules.dedup();

    AnalysisResult {
        language: source.language,
        metrics,
        scores,
        issues,
        suggestions,
        patterns: patterns::recognize(source),
        skipped_rules,
    }
}

/// File complexity only counts through `MAINT_HIGH_COMPLEXITY`, so a clean
/// result always scores 100 across the board.
pub fn score(findings: &[Finding], config: &EngineConfig) -> Scores {
    let penalty = |categories: &[Category]| -> usize {
        findings
            .iter()
            .filter(|f| categories.contains(&f.category))
            .map(|f| config.weights.weight(f.severity) as usize)
            .sum()
    };
    Scores {
        security_score: discount(penalty(&[Category::Security])),
        performance_score: discount(penalty(&[Category::AlgorithmEfficiency, Category::Memory])),
        maintainability_index: discount(penalty(&[Category::Maintainability, Category::ApiDesign])),
        test_coverage_estimate: discount(penalty(&[Category::Testing])),
    }
}

fn discount(points: usize) -> u32 {
    100usize.saturating_sub(points) as u32
}

/// One suggestion per triggered rule, in ranking order, without repeats.
pub fn suggestions(ranked: &[Finding]) -> Vec<String> {
    let mut rules = HashSet::new();
    let mut texts = HashSet::new();
    let mut out = Vec::new();
    for f in ranked {
        if rules.insert(f.rule_id) && texts.insert(f.suggestion) {
            out.push(f.suggestion.to_string());
        }
    }
    out
}
