// ============================================================================
// 端到端场景测试 - Analyzer 公开入口
// ============================================================================

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use codepitamah::events::{MemoryEventSink, SecurityEventKind};
use codepitamah::scanner::matchers::LineMatcher;
use codepitamah::scanner::{Category, Hit, Matcher, Rule, RuleCatalog, ScanContext, Severity};
use codepitamah::{AnalysisError, AnalysisRequest, Analyzer, EngineConfig};

const FIB: &str = "def fib(n):
    if n <= 1:
        return n
    return fib(n - 1) + fib(n - 2)
";

const DUPSCAN: &str = "def has_duplicates(items):
    for i in range(len(items)):
        for j in range(i + 1, len(items)):
            if items[i] == items[j]:
                return True
    return False
";

const MIXED: &str = "import hashlib

cache = {}

def load(ids, db):
    out = []
    for i in ids:
        for j in ids:
            if ids[i] == ids[j]:
                out = out + [i]
        row = db.execute(\"SELECT * FROM t WHERE id = \" + str(i))
        cache[i] = row
    digest = hashlib.md5(str(out).encode())
    return out
";

fn analyzer_with(config: EngineConfig) -> (Analyzer, Arc<MemoryEventSink>) {
    let sink = Arc::new(MemoryEventSink::new());
    let catalog = Arc::new(RuleCatalog::builtin().unwrap());
    (Analyzer::with_parts(config, catalog, sink.clone()), sink)
}

fn analyzer() -> (Analyzer, Arc<MemoryEventSink>) {
    analyzer_with(EngineConfig::default())
}

#[test]
fn test_naive_fibonacci_is_critical() {
    let (analyzer, _) = analyzer();
    let result = analyzer.analyze(&AnalysisRequest::new(FIB, "python")).unwrap();

    let issue = result
        .issues
        .iter()
        .find(|i| i.rule_id == "ALG_EXPONENTIAL_RECURSION")
        .expect("recursion finding");
    assert_eq!(issue.severity, Severity::Critical);
    assert_eq!(issue.category, Category::AlgorithmEfficiency);
    assert_eq!(issue.line, 4);
    assert_eq!(result.issues[0].rule_id, "ALG_EXPONENTIAL_RECURSION");
    assert!(result.scores.performance_score <= 30);
}

#[test]
fn test_single_line_fibonacci_forms() {
    let (analyzer, _) = analyzer();
    let cases = [
        ("typescript", "const fib = (n: number): number => (n <= 1 ? n : fib(n - 1) + fib(n - 2));\n"),
        ("javascript", "const fib = n => n < 2 ? n : fib(n - 1) + fib(n - 2);\n"),
        ("python", "def fib(n): return n if n < 2 else fib(n - 1) + fib(n - 2)\n"),
    ];
    for (language, code) in cases {
        let result = analyzer.analyze(&AnalysisRequest::new(code, language)).unwrap();
        let issue = result
            .issues
            .iter()
            .find(|i| i.rule_id == "ALG_EXPONENTIAL_RECURSION")
            .unwrap_or_else(|| panic!("no recursion finding for {language}"));
        assert_eq!(issue.severity, Severity::Critical);
        assert_eq!(issue.line, 1);
    }
}

#[test]
fn test_memoized_fibonacci_is_clean() {
    let (analyzer, _) = analyzer();
    let code = format!("from functools import lru_cache\n\n@lru_cache(maxsize=None)\n{FIB}");
    let result = analyzer.analyze(&AnalysisRequest::new(code, "py")).unwrap();
    assert!(result.issues.iter().all(|i| i.rule_id != "ALG_EXPONENTIAL_RECURSION"));
    assert!(result.patterns.iter().any(|p| p.name == "Memoization"));
}

#[test]
fn test_pairwise_duplicate_scan() {
    let (analyzer, _) = analyzer();
    let result = analyzer.analyze(&AnalysisRequest::new(DUPSCAN, "python")).unwrap();

    let issue = result
        .issues
        .iter()
        .find(|i| i.rule_id == "ALG_NESTED_EQUALITY_DUPSCAN")
        .expect("dupscan finding");
    assert_eq!(issue.severity, Severity::High);
    assert_eq!(issue.line, 4);
    assert!(result.suggestions.iter().any(|s| s.contains("set")));
    assert!(result.scores.performance_score < 100);
}

#[test]
fn test_hardcoded_secret_is_redacted() {
    let (analyzer, sink) = analyzer();
    let code = "password = \"hunter2-prod\"\nprint(password)\n";
    let result = analyzer.analyze(&AnalysisRequest::new(code, "python")).unwrap();

    let issue = result
        .issues
        .iter()
        .find(|i| i.rule_id == "SEC_HARDCODED_SECRET")
        .expect("secret finding");
    assert_eq!(issue.line, 1);
    assert!(result.scores.security_score < 100);
    assert!(!issue.context.contains("hunter2-prod"));
    assert!(issue.context.contains("[REDACTED]"));

    let json = serde_json::to_string(&result).unwrap();
    assert!(!json.contains("hunter2-prod"));
    // keyword present, request still analysed
    assert_eq!(sink.count(SecurityEventKind::SuspiciousContent), 1);
}

#[test]
fn test_dangerous_code_is_rejected() {
    let (analyzer, sink) = analyzer();
    let code = "import os\nos.system('rm -rf /tmp/x')\n";
    let err = analyzer.analyze(&AnalysisRequest::new(code, "python")).unwrap_err();

    assert!(matches!(err, AnalysisError::DangerousPattern { .. }));
    assert_eq!(err.status(), 400);
    assert_eq!(sink.count(SecurityEventKind::DangerousPatternDetected), 1);
}

#[test]
fn test_unsupported_language() {
    let (analyzer, sink) = analyzer();
    let err = analyzer
        .analyze(&AnalysisRequest::new("DISPLAY 'HELLO'.", "cobol"))
        .unwrap_err();
    assert_eq!(err, AnalysisError::UnsupportedLanguage("cobol".to_string()));
    assert_eq!(sink.count(SecurityEventKind::ValidationError), 1);
}

#[test]
fn test_size_limit_is_inclusive() {
    let config = EngineConfig { max_code_bytes: 64, ..EngineConfig::default() };
    let (analyzer, _) = analyzer_with(config);

    let at_limit = format!("x = 1\n{}", "#".repeat(58));
    assert_eq!(at_limit.len(), 64);
    assert!(analyzer.analyze(&AnalysisRequest::new(at_limit.clone(), "python")).is_ok());

    let over = format!("{at_limit}#");
    let err = analyzer.analyze(&AnalysisRequest::new(over, "python")).unwrap_err();
    assert_eq!(err, AnalysisError::CodeTooLarge { size: 65, limit: 64 });
    assert_eq!(err.status(), 413);
}

#[test]
fn test_trivial_code_scores_perfectly() {
    let (analyzer, _) = analyzer();
    let result = analyzer.analyze(&AnalysisRequest::new("x = 1", "python")).unwrap();
    assert!(result.issues.is_empty());
    assert!(result.suggestions.is_empty());
    insta::assert_json_snapshot!(result.scores, @r###"
    {
      "securityScore": 100,
      "performanceScore": 100,
      "maintainabilityIndex": 100,
      "testCoverageEstimate": 100
    }
    "###);
}

#[test]
fn test_report_wire_shape() {
    let (analyzer, _) = analyzer();
    let code = "password = \"hunter2-prod\"\n";
    let result = analyzer.analyze(&AnalysisRequest::new(code, "python")).unwrap();
    insta::assert_json_snapshot!(result, @r###"
    {
      "language": "python",
      "metrics": {
        "linesOfCode": 1,
        "cyclomaticComplexity": 1,
        "functionCount": 0,
        "classCount": 0,
        "commentRatio": 0.0
      },
      "scores": {
        "securityScore": 75,
        "performanceScore": 100,
        "maintainabilityIndex": 100,
        "testCoverageEstimate": 100
      },
      "issues": [
        {
          "id": "issue_001",
          "ruleId": "SEC_HARDCODED_SECRET",
          "category": "security",
          "severity": "high",
          "message": "Hardcoded credential or secret literal",
          "line": 1,
          "column": 1,
          "context": "password = \"[REDACTED]\""
        }
      ],
      "suggestions": [
        "Load secrets from environment variables or a secret manager; never commit them to source"
      ],
      "patterns": []
    }
    "###);
}

#[test]
fn test_deeply_nested_input_finishes_quickly() {
    let (analyzer, _) = analyzer();
    let code = "{\n".repeat(20_000);

    for language in ["javascript", "java"] {
        let started = Instant::now();
        let result = analyzer.analyze(&AnalysisRequest::new(code.clone(), language));
        assert!(result.is_ok(), "{language}: {:?}", result.err());
        assert!(started.elapsed() < Duration::from_secs(10), "{language} took {:?}", started.elapsed());
    }
}

#[test]
fn test_async_antipatterns() {
    let (analyzer, _) = analyzer();
    let code = "import asyncio, time

async def refresh(urls):
    time.sleep(1)
    results = []
    for u in urls:
        results.append(await fetch(u))
    return await asyncio.gather(*results)
";
    let result = analyzer.analyze(&AnalysisRequest::new(code, "python")).unwrap();
    let found: Vec<_> = result.issues.iter().map(|i| (i.rule_id.as_str(), i.line)).collect();
    assert!(found.contains(&("ALG_BLOCKING_SLEEP_IN_ASYNC", 4)), "{found:?}");
    assert!(found.contains(&("ALG_SEQUENTIAL_AWAIT_IN_LOOP", 7)), "{found:?}");
    assert!(found.contains(&("MAINT_GATHER_WITHOUT_RETURN_EXCEPTIONS", 8)), "{found:?}");
    assert_eq!(result.issues[0].severity, Severity::Critical);
}

#[test]
fn test_results_are_deterministic() {
    let (analyzer, _) = analyzer();
    let request = AnalysisRequest::new(MIXED, "python");
    let first = analyzer.analyze(&request).unwrap();
    let second = analyzer.analyze(&request).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_issues_are_unique_and_ranked() {
    let (analyzer, _) = analyzer();
    let result = analyzer.analyze(&AnalysisRequest::new(MIXED, "python")).unwrap();
    assert!(result.issues.len() >= 4);

    let keys: HashSet<_> = result.issues.iter().map(|i| (i.rule_id.clone(), i.line)).collect();
    assert_eq!(keys.len(), result.issues.len());

    for pair in result.issues.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        assert!(a.severity > b.severity || (a.severity == b.severity && a.rule_id <= b.rule_id));
    }

    let suggestions: HashSet<_> = result.suggestions.iter().collect();
    assert_eq!(suggestions.len(), result.suggestions.len());
}

struct Broken;

impl Matcher for Broken {
    fn evaluate(&self, _: &ScanContext) -> anyhow::Result<Vec<Hit>> {
        anyhow::bail!("matcher state corrupted")
    }
}

#[test]
fn test_faulty_rule_is_skipped() {
    let catalog = RuleCatalog::from_rules(vec![
        Rule {
            id: "X_BROKEN",
            category: Category::Maintainability,
            severity: Severity::High,
            languages: &[],
            message: "never reported",
            suggestion: "none",
            matcher: Box::new(Broken),
        },
        Rule {
            id: "X_PRINT",
            category: Category::Maintainability,
            severity: Severity::Info,
            languages: &[],
            message: "print call",
            suggestion: "Use logging",
            matcher: Box::new(LineMatcher::new(r"\bprint\s*\(").unwrap()),
        },
    ])
    .unwrap();
    let sink = Arc::new(MemoryEventSink::new());
    let analyzer = Analyzer::with_parts(EngineConfig::default(), Arc::new(catalog), sink);

    let result = analyzer.analyze(&AnalysisRequest::new("print(1)\n", "python")).unwrap();
    assert_eq!(result.issues.len(), 1);
    assert_eq!(result.issues[0].rule_id, "X_PRINT");
    assert_eq!(result.skipped_rules, vec!["X_BROKEN".to_string()]);
}

#[test]
fn test_zero_budget_times_out() {
    let config = EngineConfig { max_analysis_secs: 0, ..EngineConfig::default() };
    let (analyzer, sink) = analyzer_with(config);
    let err = analyzer.analyze(&AnalysisRequest::new(FIB, "python")).unwrap_err();

    assert_eq!(err, AnalysisError::Timeout { budget_secs: 0 });
    assert_eq!(err.reason_code(), "ANALYSIS_TIMEOUT");
    assert!(err.public_message().contains("simplify"));
    assert_eq!(sink.count(SecurityEventKind::AnalysisTimeout), 1);
}

#[tokio::test]
async fn test_async_matches_sync() {
    let (analyzer, _) = analyzer();
    let request = AnalysisRequest::new(DUPSCAN, "python");
    let sync = analyzer.analyze(&request).unwrap();
    let asynced = analyzer.analyze_async(request).await.unwrap();
    assert_eq!(sync, asynced);
}

#[test]
fn test_security_status() {
    let (analyzer, _) = analyzer();
    let status = analyzer.security_status();
    assert_eq!(status.status, "active");
    assert_eq!(status.max_code_bytes, 100_000);
    assert_eq!(status.rule_count, analyzer.catalog().len());
    assert!(status.dangerous_patterns_count > 0);
    assert_eq!(status.languages.len(), 6);
}
