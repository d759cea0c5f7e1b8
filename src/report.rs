// ============================================================================
// Markdown 报告 (人类可读输出，--json 时不使用)
// ============================================================================

use std::fmt::Write;

use crate::aggregator::AnalysisResult;
use crate::analyzer::{BatchReport, SecurityStatus};
use crate::error::AnalysisError;
use crate::scanner::{Category, RuleCatalog, Severity};

const SEVERITIES: [Severity; 5] =
    [Severity::Critical, Severity::High, Severity::Medium, Severity::Low, Severity::Info];

pub fn analysis(title: &str, result: &AnalysisResult) -> String {
    let mut out = format!("## 🔍 分析: {title}\n\n");
    let s = &result.scores;
    let m = &result.metrics;
    let _ = writeln!(
        out,
        "**Security**: {} | **Performance**: {} | **Maintainability**: {} | **Tests (est.)**: {}\n",
        s.security_score, s.performance_score, s.maintainability_index, s.test_coverage_estimate
    );
    let _ = writeln!(
        out,
        "*{} 语言 · {} LOC · complexity {} · {} functions · {} classes · comments {:.0}%*\n",
        result.language,
        m.lines_of_code,
        m.cyclomatic_complexity,
        m.function_count,
        m.class_count,
        m.comment_ratio * 100.0
    );

    if result.issues.is_empty() {
        out.push_str("✅ 未发现问题\n");
    } else {
        let counts: Vec<String> = SEVERITIES
            .iter()
            .map(|sev| (sev, result.count(*sev)))
            .filter(|(_, n)| *n > 0)
            .map(|(sev, n)| format!("{} {n}", sev.icon()))
            .collect();
        let _ = writeln!(out, "### Issues ({})\n", counts.join(" "));
        for issue in &result.issues {
            let _ = writeln!(
                out,
                "{} **{}** (行 {}:{}) - {}",
                issue.severity.icon(),
                issue.rule_id,
                issue.line,
                issue.column,
                issue.message
            );
            if !issue.context.is_empty() {
                let _ = writeln!(out, "    `{}`", issue.context);
            }
        }
    }

    if !result.suggestions.is_empty() {
        out.push_str("\n### 💡 Suggestions\n\n");
        for suggestion in &result.suggestions {
            let _ = writeln!(out, "- {suggestion}");
        }
    }

    if !result.patterns.is_empty() {
        out.push_str("\n### 🧩 Patterns\n\n");
        for p in &result.patterns {
            let _ = writeln!(
                out,
                "- **{}** ({:.0}%) - {}",
                p.name,
                p.confidence * 100.0,
                p.description
            );
        }
    }

    if !result.skipped_rules.is_empty() {
        let _ = writeln!(out, "\n*⚠️ 跳过的规则: {}*", result.skipped_rules.join(", "));
    }
    out
}

pub fn batch(report: &BatchReport) -> String {
    let analysed = report.files.iter().filter(|f| f.result.is_some()).count();
    let mut out = format!(
        "## 🛰️ 目录扫描: {}\n\n**文件**: {} | **已分析**: {} | **问题**: {}\n\n",
        report.root,
        report.files.len(),
        analysed,
        report.issue_count()
    );

    if report.files.is_empty() {
        out.push_str("✅ 没有找到支持的源文件\n");
        return out;
    }

    for file in &report.files {
        match (&file.result, &file.error) {
            (Some(result), _) if result.issues.is_empty() => {
                let _ = writeln!(out, "- ✅ `{}`", file.path);
            }
            (Some(result), _) => {
                let worst = result.issues.iter().map(|i| i.severity).max().unwrap_or(Severity::Info);
                let _ = writeln!(
                    out,
                    "- {} `{}` - {} issues (security {}, performance {}, maintainability {})",
                    worst.icon(),
                    file.path,
                    result.issues.len(),
                    result.scores.security_score,
                    result.scores.performance_score,
                    result.scores.maintainability_index
                );
                for issue in result.issues.iter().filter(|i| i.severity >= Severity::High) {
                    let _ = writeln!(out, "    - `{}` {}:{}", issue.rule_id, file.path, issue.line);
                }
            }
            (None, Some(err)) => {
                let _ = writeln!(out, "- ⛔ `{}` - {} ({})", file.path, err.message, err.code);
            }
            (None, None) => {}
        }
    }
    out
}

pub fn rules(catalog: &RuleCatalog, category: Option<Category>) -> String {
    let mut out = String::from("## 📋 规则目录\n\n");
    for cat in Category::ALL.iter().filter(|c| category.map_or(true, |wanted| wanted == **c)) {
        let rules: Vec<_> = catalog.by_category(*cat).collect();
        if rules.is_empty() {
            continue;
        }
        let _ = writeln!(out, "### {} ({})\n", cat, rules.len());
        for rule in rules {
            let languages = if rule.languages.is_empty() {
                "all".to_string()
            } else {
                rule.languages.iter().map(|l| l.as_str()).collect::<Vec<_>>().join(", ")
            };
            let _ = writeln!(
                out,
                "- {} `{}` [{}] - {}",
                rule.severity.icon(),
                rule.id,
                languages,
                rule.message
            );
        }
        out.push('\n');
    }
    out
}

pub fn status(status: &SecurityStatus) -> String {
    let mut out = String::from("## ℹ️ 引擎状态\n\n");
    let _ = writeln!(out, "- **Status**: {}", status.status);
    let _ = writeln!(out, "- **Max code size**: {} bytes", status.max_code_bytes);
    let _ = writeln!(out, "- **Time budget**: {}s", status.max_analysis_secs);
    let _ = writeln!(out, "- **Rules**: {}", status.rule_count);
    let _ = writeln!(out, "- **Dangerous patterns**: {}", status.dangerous_patterns_count);
    let _ = writeln!(out, "- **Languages**: {}", status.languages.join(", "));
    out.push_str("\n### 🛡️ Security features\n\n");
    for feature in &status.security_features {
        let _ = writeln!(out, "- {feature}");
    }
    out
}

pub fn error(err: &AnalysisError) -> String {
    format!("## ⛔ 分析被拒绝\n\n**{}** ({})\n\n{}\n", err.reason_code(), err.status(), err.public_message())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::Analyzer;
    use crate::config::EngineConfig;
    use crate::validator::AnalysisRequest;

    fn analyzer() -> Analyzer {
        Analyzer::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_clean_report() {
        let result = analyzer().analyze(&AnalysisRequest::new("x = 1\n", "python")).unwrap();
        let md = analysis("snippet.py", &result);
        assert!(md.starts_with("## 🔍 分析: snippet.py"));
        assert!(md.contains("**Security**: 100"));
        assert!(md.contains("✅ 未发现问题"));
        assert!(!md.contains("Suggestions"));
    }

    #[test]
    fn test_report_lists_issues_and_suggestions() {
        let code = "def fib(n):\n    if n <= 1:\n        return n\n    return fib(n - 1) + fib(n - 2)\n";
        let result = analyzer().analyze(&AnalysisRequest::new(code, "python")).unwrap();
        let md = analysis("fib.py", &result);
        assert!(md.contains("🔴 **ALG_EXPONENTIAL_RECURSION** (行 4:"));
        assert!(md.contains("### 💡 Suggestions"));
    }

    #[test]
    fn test_rules_filtered_by_category() {
        let a = analyzer();
        let md = rules(a.catalog(), Some(Category::Memory));
        assert!(md.contains("MEM_RESOURCE_LEAK"));
        assert!(!md.contains("SEC_SQL_INJECTION"));
    }

    #[test]
    fn test_error_report_hides_details() {
        let md = error(&AnalysisError::DangerousPattern { pattern: "os.system".into() });
        assert!(md.contains("DANGEROUS_PATTERN"));
        assert!(!md.contains("os.system"));
    }
}
