// ============================================================================
// Pattern Scanner - 逐条规则执行，单规则故障隔离
// ============================================================================

use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error};

use super::{Finding, RuleCatalog, ScanContext, SourceText};
use crate::config::EngineConfig;
use crate::error::AnalysisError;
use crate::validator::redact_line;

const MAX_CONTEXT_CHARS: usize = 120;

/// A rule whose matcher failed; its contribution is dropped.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFault {
    pub rule_id: &'static str,
    #[serde(skip)]
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub findings: Vec<Finding>,
    pub faults: Vec<ScanFault>,
}

/// Run every applicable rule against `source`.
///
/// The elapsed time is checked after each rule; crossing the configured
/// budget aborts with [`AnalysisError::Timeout`]. A matcher that errors or
/// panics is recorded as a [`ScanFault`] and the scan carries on.
pub fn scan(
    source: &SourceText,
    catalog: &RuleCatalog,
    config: &EngineConfig,
) -> Result<ScanOutcome, AnalysisError> {
    let started = Instant::now();
    let budget = config.time_budget();
    let ctx = ScanContext { source, config };
    let mut outcome = ScanOutcome::default();

    for rule in catalog.for_language(source.language) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| rule.matcher.evaluate(&ctx)));
        let detail = match result {
            Ok(Ok(hits)) => {
                for hit in hits {
                    let Some(line) = hit.line.checked_sub(1).and_then(|i| source.lines().get(i)) else {
                        debug!(rule = rule.id, line = hit.line, "hit outside the source, dropped");
                        continue;
                    };
                    outcome.findings.push(Finding {
                        rule_id: rule.id,
                        category: rule.category,
                        severity: rule.severity,
                        line: hit.line,
                        column: hit.column.max(1),
                        message: hit.message.unwrap_or_else(|| rule.message.to_string()),
                        suggestion: rule.suggestion,
                        context: context_of(line.raw),
                    });
                }
                None
            }
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };

        if let Some(detail) = detail {
            error!(rule = rule.id, "rule matcher failed, skipping: {}", detail);
            outcome.faults.push(ScanFault { rule_id: rule.id, detail });
        }

        if started.elapsed() >= budget {
            return Err(AnalysisError::Timeout { budget_secs: config.max_analysis_secs });
        }
    }

    debug!(
        findings = outcome.findings.len(),
        faults = outcome.faults.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scan finished"
    );
    Ok(outcome)
}

fn context_of(raw: &str) -> String {
    let redacted = redact_line(raw.trim());
    if redacted.chars().count() > MAX_CONTEXT_CHARS {
        let cut: String = redacted.chars().take(MAX_CONTEXT_CHARS).collect();
        format!("{cut}...")
    } else {
        redacted.into_owned()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;
    use crate::scanner::matchers::LineMatcher;
    use crate::scanner::{Category, Hit, Matcher, Rule, Severity};

    struct Failing;
    impl Matcher for Failing {
        fn evaluate(&self, _: &ScanContext) -> anyhow::Result<Vec<Hit>> {
            anyhow::bail!("broken rule")
        }
    }

    struct Panicking;
    impl Matcher for Panicking {
        fn evaluate(&self, _: &ScanContext) -> anyhow::Result<Vec<Hit>> {
            panic!("matcher bug")
        }
    }

    fn rule(id: &'static str, matcher: Box<dyn Matcher>) -> Rule {
        Rule {
            id,
            category: Category::Maintainability,
            severity: Severity::Low,
            languages: &[],
            message: "todo marker",
            suggestion: "resolve it",
            matcher,
        }
    }

    fn todo_rule() -> Rule {
        rule("T_TODO", Box::new(LineMatcher::new(r"TODO").unwrap()))
    }

    #[test]
    fn test_faulty_rules_are_isolated() {
        let catalog = RuleCatalog::from_rules(vec![
            rule("T_FAIL", Box::new(Failing)),
            todo_rule(),
            rule("T_PANIC", Box::new(Panicking)),
        ])
        .unwrap();
        let source = SourceText::new("x = 1\ny = 'TODO'\n", Language::Python);
        let outcome = scan(&source, &catalog, &EngineConfig::default()).unwrap();

        assert_eq!(outcome.findings.len(), 1);
        assert_eq!(outcome.findings[0].line, 2);
        let faulted: Vec<_> = outcome.faults.iter().map(|f| f.rule_id).collect();
        assert_eq!(faulted, vec!["T_FAIL", "T_PANIC"]);
        assert!(outcome.faults[1].detail.contains("matcher bug"));
    }

    #[test]
    fn test_zero_budget_times_out() {
        let catalog = RuleCatalog::from_rules(vec![todo_rule()]).unwrap();
        let config = EngineConfig { max_analysis_secs: 0, ..EngineConfig::default() };
        let source = SourceText::new("TODO", Language::Python);
        let err = scan(&source, &catalog, &config).unwrap_err();
        assert_eq!(err, AnalysisError::Timeout { budget_secs: 0 });
    }

    #[test]
    fn test_context_is_redacted_and_truncated() {
        assert_eq!(context_of("  api_key = \"sk-live-123\"  "), "api_key = \"[REDACTED]\"");
        let long = "x".repeat(300);
        assert_eq!(context_of(&long).chars().count(), MAX_CONTEXT_CHARS + 3);
    }
}
