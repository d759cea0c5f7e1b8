//! Security event hook.
//!
//! The engine only emits events; storing and alerting on them belongs to
//! whoever hosts it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecurityEventKind {
    DangerousPatternDetected,
    AnalysisTimeout,
    ValidationError,
    SuspiciousContent,
    AnalysisError,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::DangerousPatternDetected => "DANGEROUS_PATTERN_DETECTED",
            SecurityEventKind::AnalysisTimeout => "ANALYSIS_TIMEOUT",
            SecurityEventKind::ValidationError => "VALIDATION_ERROR",
            SecurityEventKind::SuspiciousContent => "SUSPICIOUS_CONTENT",
            SecurityEventKind::AnalysisError => "ANALYSIS_ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub reason_code: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(kind: SecurityEventKind, reason_code: &str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            reason_code: reason_code.to_string(),
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

pub trait SecurityEventSink: Send + Sync {
    fn report(&self, event: SecurityEvent);
}

/// Writes events to the log as `SECURITY_EVENT` lines.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl SecurityEventSink for TracingEventSink {
    fn report(&self, event: SecurityEvent) {
        warn!(
            kind = event.kind.as_str(),
            reason = %event.reason_code,
            at = %event.timestamp.to_rfc3339(),
            "SECURITY_EVENT: {}",
            event.detail
        );
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self, kind: SecurityEventKind) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }
}

impl SecurityEventSink for MemoryEventSink {
    fn report(&self, event: SecurityEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}
