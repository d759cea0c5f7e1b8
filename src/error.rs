//! Error taxonomy returned by the engine's public entry points.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("code is empty")]
    EmptyCode,

    #[error("code is too large: {size} bytes (limit {limit})")]
    CodeTooLarge { size: usize, limit: usize },

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("code contains a blocked construct: {pattern}")]
    DangerousPattern { pattern: String },

    #[error("analysis exceeded the {budget_secs}s time budget")]
    Timeout { budget_secs: u64 },

    /// Detail stays in the logs, never in the message.
    #[error("internal analysis error")]
    Internal,
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

impl AnalysisError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            AnalysisError::EmptyCode => "EMPTY_CODE",
            AnalysisError::CodeTooLarge { .. } => "CODE_TOO_LARGE",
            AnalysisError::UnsupportedLanguage(_) => "UNSUPPORTED_LANGUAGE",
            AnalysisError::DangerousPattern { .. } => "DANGEROUS_PATTERN",
            AnalysisError::Timeout { .. } => "ANALYSIS_TIMEOUT",
            AnalysisError::Internal => "INTERNAL_ERROR",
        }
    }

    /// Transport status the hosting layer should answer with.
    pub fn status(&self) -> u16 {
        match self {
            AnalysisError::CodeTooLarge { .. } => 413,
            AnalysisError::Timeout { .. } => 408,
            AnalysisError::Internal => 500,
            _ => 400,
        }
    }

    pub fn is_input_error(&self) -> bool {
        self.status() == 400 || self.status() == 413
    }

    /// Message safe to show to the submitter.
    pub fn public_message(&self) -> String {
        match self {
            AnalysisError::EmptyCode => "Code cannot be empty".to_string(),
            AnalysisError::CodeTooLarge { limit, .. } => {
                format!("Code too large. Maximum size: {} bytes", limit)
            }
            AnalysisError::UnsupportedLanguage(lang) => {
                format!("Unsupported language: {}", lang)
            }
            AnalysisError::DangerousPattern { .. } => {
                "Code contains potentially dangerous patterns".to_string()
            }
            AnalysisError::Timeout { budget_secs } => format!(
                "Analysis timed out after {}s. Please simplify or shorten your code.",
                budget_secs
            ),
            AnalysisError::Internal => "Internal server error during analysis".to_string(),
        }
    }
}
