//! CodePitamah: a rule-based static analyzer for source snippets.
//!
//! Validator -> Pattern Scanner -> Aggregator. Start with
//! [`analyzer::Analyzer`].

pub mod aggregator;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod events;
pub mod language;
pub mod metrics;
pub mod patterns;
pub mod report;
pub mod scanner;
pub mod server;
pub mod validator;

pub use aggregator::AnalysisResult;
pub use analyzer::Analyzer;
pub use config::EngineConfig;
pub use error::AnalysisError;
pub use validator::AnalysisRequest;
