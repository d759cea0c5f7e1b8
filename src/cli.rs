// ============================================================================
// CLI 命令处理
// ============================================================================

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::info;

use codepitamah::analyzer::Analyzer;
use codepitamah::config::EngineConfig;
use codepitamah::language::Language;
use codepitamah::report;
use codepitamah::scanner::{Category, RuleInfo};
use codepitamah::server::Server;
use codepitamah::validator::AnalysisRequest;

use crate::Command;

pub fn handle_command(command: Command, json: bool, config: Option<&Path>) -> Result<()> {
    let config = match config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let analyzer = Analyzer::new(config)?;

    match command {
        Command::Analyze { file, code, language } => {
            let (title, code, language) = match (file, code) {
                (Some(path), _) => {
                    let code = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let language = match language {
                        Some(lang) => lang,
                        None => Language::from_path(&path)
                            .map(|l| l.as_str().to_string())
                            .with_context(|| {
                                format!("Cannot infer language of {}, pass --language", path.display())
                            })?,
                    };
                    (path.display().to_string(), code, language)
                }
                (None, Some(code)) => {
                    let language = language.context("--language is required with --code")?;
                    ("snippet".to_string(), code, language)
                }
                (None, None) => bail!("Pass --file or --code"),
            };

            match analyzer.analyze(&AnalysisRequest::new(code, language)) {
                Ok(result) => {
                    if json {
                        print_json(&result)?;
                    } else {
                        print!("{}", report::analysis(&title, &result));
                    }
                    Ok(())
                }
                Err(err) => {
                    if json {
                        print_json(&serde_json::json!({
                            "code": err.reason_code(),
                            "status": err.status(),
                            "message": err.public_message(),
                        }))?;
                    } else {
                        print!("{}", report::error(&err));
                    }
                    bail!("analysis rejected: {}", err.reason_code())
                }
            }
        }

        Command::Scan { path } => {
            let batch = analyzer.analyze_path(&path)?;
            info!(files = batch.files.len(), issues = batch.issue_count(), "scan complete");
            if json {
                print_json(&batch)
            } else {
                print!("{}", report::batch(&batch));
                Ok(())
            }
        }

        Command::Rules { category } => {
            let category: Option<Category> = category.map(|c| c.parse()).transpose()?;
            if json {
                let rules: Vec<RuleInfo> = analyzer
                    .catalog()
                    .iter()
                    .filter(|r| category.map_or(true, |c| r.category == c))
                    .map(|r| r.info())
                    .collect();
                print_json(&rules)
            } else {
                print!("{}", report::rules(analyzer.catalog(), category));
                Ok(())
            }
        }

        Command::Status => {
            let status = analyzer.security_status();
            if json {
                print_json(&status)
            } else {
                print!("{}", report::status(&status));
                Ok(())
            }
        }

        Command::Serve => {
            info!(rules = analyzer.catalog().len(), "serving JSON requests on stdio");
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(async {
                let server = Server::new(analyzer);
                let input = tokio::io::BufReader::new(tokio::io::stdin());
                server.run(input, tokio::io::stdout()).await
            })
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
