// ============================================================================
// Input validation and the dangerous-pattern gate
// ============================================================================
//
// 按代价从低到高依次拒绝: empty -> size -> language -> dangerous patterns.
// The gate protects the host running the analysis; it is unrelated to the
// security rules that report on the submitted code.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{AnalysisError, Result};
use crate::events::{SecurityEvent, SecurityEventKind, SecurityEventSink};
use crate::language::Language;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub code: String,
    pub language: String,
}

impl AnalysisRequest {
    pub fn new(code: impl Into<String>, language: impl Into<String>) -> Self {
        Self { code: code.into(), language: language.into() }
    }
}

/// A request that passed every check.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedRequest<'a> {
    pub code: &'a str,
    pub language: Language,
}

struct DangerousPattern {
    name: &'static str,
    regex: Regex,
}

macro_rules! blocked {
    ($name:expr, $re:expr) => {
        DangerousPattern { name: $name, regex: Regex::new($re).unwrap() }
    };
}

static DANGEROUS_PATTERNS: Lazy<Vec<DangerousPattern>> = Lazy::new(|| {
    vec![
        // process execution
        blocked!("os.system", r"\bos\.(system|popen|spawn\w*|exec[lv]\w*)\s*\("),
        blocked!("subprocess", r"\bsubprocess\b"),
        blocked!("child_process", r"\bchild_process\b|\bexecSync\s*\("),
        blocked!("Runtime.exec", r"Runtime\s*\.\s*getRuntime\s*\(\s*\)\s*\.\s*exec\s*\("),
        blocked!("ProcessBuilder", r"\bnew\s+ProcessBuilder\s*\("),
        blocked!("Process.Start", r"\bProcess\s*\.\s*Start\s*\("),
        blocked!("system()", r"(?:^|[^.\w])(system|popen|_popen|execl|execlp|execle|execv|execvp|execve)\s*\("),
        // dynamic evaluation
        blocked!("eval()", r"(?:^|[^.\w])eval\s*\("),
        blocked!("exec()", r"(?:^|[^.\w])exec\s*\("),
        blocked!("__import__", r"__import__\s*\("),
        blocked!("new Function", r"\bnew\s+Function\s*\("),
        // filesystem escape
        blocked!("path traversal", r"(\.\./){2,}|(\.\.\\){2,}"),
        blocked!("system file", r"(?i)/etc/(passwd|shadow|sudoers)\b|c:\\windows\\system32"),
    ]
});

static SECRET_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|pwd|secret|api[_-]?key|access[_-]?key|private[_-]?key|token|credential)").unwrap()
});

static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|`[^`]*`"#).unwrap()
});

static SUSPICIOUS_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(password|secret|token|credential|private|key)\b").unwrap()
});

pub const REDACTED: &str = "\"[REDACTED]\"";

/// Validate a request, reporting every rejection to `events`.
pub fn validate<'a>(
    request: &'a AnalysisRequest,
    config: &EngineConfig,
    events: &dyn SecurityEventSink,
) -> Result<ValidatedRequest<'a>> {
    match check(request, config) {
        Ok(validated) => {
            report_suspicious(validated.code, events);
            Ok(validated)
        }
        Err(err) => {
            let kind = match err {
                AnalysisError::DangerousPattern { .. } => SecurityEventKind::DangerousPatternDetected,
                _ => SecurityEventKind::ValidationError,
            };
            events.report(SecurityEvent::new(kind, err.reason_code(), err.to_string()));
            Err(err)
        }
    }
}

fn check<'a>(request: &'a AnalysisRequest, config: &EngineConfig) -> Result<ValidatedRequest<'a>> {
    let code = request.code.as_str();
    if code.trim().is_empty() {
        return Err(AnalysisError::EmptyCode);
    }
    if code.len() > config.max_code_bytes {
        return Err(AnalysisError::CodeTooLarge { size: code.len(), limit: config.max_code_bytes });
    }
    let language: Language = request.language.parse()?;
    if let Some(pattern) = find_dangerous_pattern(code) {
        return Err(AnalysisError::DangerousPattern { pattern: pattern.to_string() });
    }
    Ok(ValidatedRequest { code, language })
}

/// Name of the first blocked construct in `code`, if any.
pub fn find_dangerous_pattern(code: &str) -> Option<&'static str> {
    DANGEROUS_PATTERNS
        .iter()
        .find(|p| p.regex.is_match(code))
        .map(|p| p.name)
}

pub fn dangerous_pattern_count() -> usize {
    DANGEROUS_PATTERNS.len()
}

fn report_suspicious(code: &str, events: &dyn SecurityEventSink) {
    let hits = SUSPICIOUS_KEYWORD.find_iter(code).count();
    if hits > 0 {
        debug!(hits, "suspicious keywords in submitted code");
        events.report(SecurityEvent::new(
            SecurityEventKind::SuspiciousContent,
            "SUSPICIOUS_CONTENT",
            format!("{} sensitive keyword(s) in submitted code", hits),
        ));
    }
}

/// Redact string literals on a secret-bearing line.
pub fn redact_line(line: &str) -> Cow<'_, str> {
    if SECRET_LINE.is_match(line) {
        STRING_LITERAL.replace_all(line, REDACTED)
    } else {
        Cow::Borrowed(line)
    }
}

/// Redacted copy of `code`, safe to log or echo back.
pub fn redact_secrets(code: &str) -> String {
    code.split('\n').map(redact_line).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;

    fn run(code: &str, lang: &str) -> (Result<Language>, MemoryEventSink) {
        let sink = MemoryEventSink::new();
        let req = AnalysisRequest::new(code, lang);
        let res = validate(&req, &EngineConfig::default(), &sink).map(|v| v.language);
        (res, sink)
    }

    #[test]
    fn test_empty_code() {
        let (res, sink) = run("   \n\t ", "python");
        assert_eq!(res.unwrap_err(), AnalysisError::EmptyCode);
        assert_eq!(sink.count(SecurityEventKind::ValidationError), 1);
    }

    #[test]
    fn test_size_checked_before_language() {
        let config = EngineConfig { max_code_bytes: 4, ..EngineConfig::default() };
        let req = AnalysisRequest::new("x = 12", "cobol");
        let err = validate(&req, &config, &MemoryEventSink::new()).unwrap_err();
        assert!(matches!(err, AnalysisError::CodeTooLarge { size: 6, limit: 4 }));
    }

    #[test]
    fn test_dangerous_patterns() {
        for code in [
            "import os\nos.system('ls')",
            "import subprocess",
            "const cp = require('child_process');",
            "Runtime.getRuntime().exec(cmd);",
            "Process.Start(\"cmd.exe\");",
            "int main() { system(\"ls\"); }",
            "result = eval(user_input)",
            "exec(code)",
            "open('../../../etc/hosts')",
        ] {
            let (res, sink) = run(code, "python");
            assert!(
                matches!(res, Err(AnalysisError::DangerousPattern { .. })),
                "should block: {}",
                code
            );
            assert_eq!(sink.count(SecurityEventKind::DangerousPatternDetected), 1);
        }
    }

    #[test]
    fn test_benign_lookalikes_pass() {
        for code in [
            "cursor.execute(query)",
            "m = pattern.exec(text)",
            "data = open(path).read()",
            "retrieval = evaluate(x)",
            "import os\nbase = os.path.join(a, b)",
        ] {
            let (res, _) = run(code, "python");
            assert!(res.is_ok(), "should pass: {}", code);
        }
    }

    #[test]
    fn test_suspicious_content_is_reported_not_blocked() {
        let (res, sink) = run("token = get_token()", "python");
        assert!(res.is_ok());
        assert_eq!(sink.count(SecurityEventKind::SuspiciousContent), 1);
    }

    #[test]
    fn test_redact_line() {
        assert_eq!(redact_line("password = \"hunter2\""), "password = \"[REDACTED]\"");
        assert_eq!(redact_line("API_KEY='sk-123'"), "API_KEY=\"[REDACTED]\"");
        assert_eq!(redact_line("name = \"bob\""), "name = \"bob\"");
    }

    #[test]
    fn test_redact_secrets_keeps_line_count() {
        let code = "a = 1\nsecret = \"abc\"\nb = 2";
        let redacted = redact_secrets(code);
        assert_eq!(redacted.lines().count(), 3);
        assert!(!redacted.contains("abc"));
    }
}
