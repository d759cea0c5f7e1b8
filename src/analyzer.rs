// ============================================================================
// Analyzer - 对外入口: Validator -> Scanner -> Aggregator
// ============================================================================

use anyhow::Context;
use rayon::prelude::*;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::aggregator::{self, AnalysisResult};
use crate::config::EngineConfig;
use crate::error::{AnalysisError, Result};
use crate::events::{SecurityEvent, SecurityEventKind, SecurityEventSink, TracingEventSink};
use crate::language::Language;
use crate::scanner::{self, RuleCatalog, SourceText};
use crate::validator::{self, AnalysisRequest, ValidatedRequest};

/// Directories never worth scanning.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", "venv", ".venv", "__pycache__", "dist", "build"];

#[derive(Clone)]
pub struct Analyzer {
    config: EngineConfig,
    catalog: Arc<RuleCatalog>,
    events: Arc<dyn SecurityEventSink>,
}

impl Analyzer {
    /// Builtin catalog, events logged through `tracing`.
    pub fn new(config: EngineConfig) -> anyhow::Result<Self> {
        let catalog = RuleCatalog::builtin().context("Failed to build rule catalog")?;
        Ok(Self::with_parts(config, Arc::new(catalog), Arc::new(TracingEventSink)))
    }

    pub fn with_parts(
        config: EngineConfig,
        catalog: Arc<RuleCatalog>,
        events: Arc<dyn SecurityEventSink>,
    ) -> Self {
        Self { config, catalog, events }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    pub fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        let validated = validator::validate(request, &self.config, self.events.as_ref())?;
        let started = Instant::now();

        // 边界处兜底: 任何 panic 都转换为 Internal，细节只进日志
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(validated)));
        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(language = %validated.language, "analysis panicked: {}", detail);
                Err(AnalysisError::Internal)
            }
        };

        match &result {
            Ok(report) => info!(
                language = %validated.language,
                issues = report.issues.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "analysis complete"
            ),
            Err(err @ AnalysisError::Timeout { .. }) => {
                self.events.report(SecurityEvent::new(
                    SecurityEventKind::AnalysisTimeout,
                    err.reason_code(),
                    format!("{} ({} bytes of {})", err, validated.code.len(), validated.language),
                ));
            }
            Err(err) => {
                self.events.report(SecurityEvent::new(
                    SecurityEventKind::AnalysisError,
                    err.reason_code(),
                    err.to_string(),
                ));
            }
        }
        result
    }

    fn run(&self, request: ValidatedRequest<'_>) -> Result<AnalysisResult> {
        let source = SourceText::new(request.code, request.language);
        let outcome = scanner::scan(&source, &self.catalog, &self.config)?;
        if !outcome.faults.is_empty() {
            warn!(faults = outcome.faults.len(), "some rules were skipped");
        }
        Ok(aggregator::aggregate(outcome.findings, &source, &outcome.faults, &self.config))
    }

    /// Runs the analysis on the blocking pool so the caller's event loop
    /// stays responsive.
    pub async fn analyze_async(&self, request: AnalysisRequest) -> Result<AnalysisResult> {
        let analyzer = self.clone();
        tokio::task::spawn_blocking(move || analyzer.analyze(&request))
            .await
            .unwrap_or_else(|e| {
                error!("analysis task failed: {}", e);
                Err(AnalysisError::Internal)
            })
    }

    pub fn security_status(&self) -> SecurityStatus {
        SecurityStatus {
            max_code_bytes: self.config.max_code_bytes,
            max_analysis_secs: self.config.max_analysis_secs,
            dangerous_patterns_count: validator::dangerous_pattern_count(),
            rule_count: self.catalog.len(),
            languages: Language::ALL.iter().map(|l| l.as_str()).collect(),
            security_features: SECURITY_FEATURES.to_vec(),
            status: "active",
        }
    }

    /// Analyze every supported source file under `root` in parallel.
    pub fn analyze_path(&self, root: &Path) -> anyhow::Result<BatchReport> {
        if !root.exists() {
            anyhow::bail!("Path not found: {}", root.display());
        }

        let entries: Vec<_> = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || !e.file_name().to_str().is_some_and(|n| SKIP_DIRS.contains(&n))
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| Language::from_path(e.path()).map(|lang| (e, lang)))
            .collect();

        // 使用 Mutex 保护共享状态 (rayon 并行安全)
        let files: Mutex<Vec<FileReport>> = Mutex::new(Vec::with_capacity(entries.len()));

        entries.par_iter().for_each(|(entry, language)| {
            let path = entry.path();
            let display = path.strip_prefix(root).unwrap_or(path).to_string_lossy().to_string();
            let report = match std::fs::read_to_string(path) {
                Ok(code) => {
                    let request = AnalysisRequest::new(code, language.as_str());
                    match self.analyze(&request) {
                        Ok(result) => FileReport { path: display, result: Some(result), error: None },
                        Err(err) => FileReport {
                            path: display,
                            result: None,
                            error: Some(FileError { code: err.reason_code(), message: err.public_message() }),
                        },
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), "unreadable file skipped: {}", e);
                    FileReport {
                        path: display,
                        result: None,
                        error: Some(FileError { code: "UNREADABLE", message: "File could not be read as UTF-8 text".to_string() }),
                    }
                }
            };
            // 使用 unwrap_or_else 处理 poisoned mutex
            files.lock().unwrap_or_else(|e| e.into_inner()).push(report);
        });

        let mut files = files.into_inner().unwrap_or_else(|e| e.into_inner());
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(BatchReport { root: root.display().to_string(), files })
    }
}

const SECURITY_FEATURES: &[&str] = &[
    "Input validation",
    "Dangerous pattern detection",
    "Code size limits",
    "Analysis timeout protection",
    "Security event logging",
    "Suspicious content detection",
    "Secret redaction in reports",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityStatus {
    pub max_code_bytes: usize,
    pub max_analysis_secs: u64,
    pub dangerous_patterns_count: usize,
    pub rule_count: usize,
    pub languages: Vec<&'static str>,
    pub security_features: Vec<&'static str>,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileError {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FileError>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub root: String,
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn issue_count(&self) -> usize {
        self.files
            .iter()
            .filter_map(|f| f.result.as_ref())
            .map(|r| r.issues.len())
            .sum()
    }
}
