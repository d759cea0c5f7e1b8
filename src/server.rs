//! Line-delimited JSON request loop.
//!
//! 每行一个请求，每行一个响应:
//!
//! ```text
//! -> {"id": 1, "method": "analyze", "params": {"code": "...", "language": "python"}}
//! <- {"id": 1, "success": true, "data": {...}, "timestamp": "..."}
//! ```
//!
//! Every request runs in its own task and analysis runs on the blocking
//! pool, so a slow scan never holds up the requests behind it. Responses
//! are written as they complete; clients match them up by `id`.
//! Logs go to stderr; stdout carries responses only.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::analyzer::Analyzer;
use crate::error::AnalysisError;
use crate::scanner::{Category, RuleInfo};
use crate::validator::AnalysisRequest;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct Response {
    id: Value,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    status: u16,
    message: String,
}

/// 协议层错误 (请求格式错误等)，与分析错误共用同一个 error 结构
#[derive(Debug)]
enum Failure {
    Analysis(AnalysisError),
    BadRequest(String),
    UnknownMethod(String),
}

impl Failure {
    fn body(self) -> ErrorBody {
        match self {
            Failure::Analysis(err) => ErrorBody {
                code: err.reason_code(),
                status: err.status(),
                message: err.public_message(),
            },
            Failure::BadRequest(message) => ErrorBody { code: "INVALID_REQUEST", status: 400, message },
            Failure::UnknownMethod(method) => ErrorBody {
                code: "UNKNOWN_METHOD",
                status: 404,
                message: format!("Unknown method: {method}"),
            },
        }
    }
}

#[derive(Clone)]
pub struct Server {
    analyzer: Analyzer,
}

impl Server {
    pub fn new(analyzer: Analyzer) -> Self {
        Self { analyzer }
    }

    /// Answer one request line. Always produces a response, even for
    /// malformed input.
    pub async fn handle_request(&self, line: &str) -> String {
        let (id, outcome) = match serde_json::from_str::<Request>(line) {
            Ok(req) => {
                debug!(method = %req.method, "request");
                let outcome = self.dispatch(&req.method, req.params).await;
                (req.id, outcome)
            }
            Err(e) => (Value::Null, Err(Failure::BadRequest(format!("Malformed request: {e}")))),
        };

        let response = match outcome {
            Ok(data) => Response { id, success: true, data: Some(data), error: None, timestamp: now() },
            Err(failure) => Response { id, success: false, data: None, error: Some(failure.body()), timestamp: now() },
        };
        serde_json::to_string(&response).unwrap_or_else(|e| {
            warn!("failed to encode response: {}", e);
            json!({ "id": Value::Null, "success": false, "timestamp": now() }).to_string()
        })
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> Result<Value, Failure> {
        match method {
            "analyze" => {
                let params = params.ok_or_else(|| Failure::BadRequest("Missing params".to_string()))?;
                let request: AnalysisRequest = serde_json::from_value(params)
                    .map_err(|e| Failure::BadRequest(format!("Invalid analyze params: {e}")))?;
                let result = self.analyzer.analyze_async(request).await.map_err(Failure::Analysis)?;
                to_value(&result)
            }
            "rules" => {
                let category = params
                    .as_ref()
                    .and_then(|p| p.get("category"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.parse::<Category>())
                    .transpose()
                    .map_err(|e| Failure::BadRequest(e.to_string()))?;
                let rules: Vec<RuleInfo> = self
                    .analyzer
                    .catalog()
                    .iter()
                    .filter(|r| category.map_or(true, |c| r.category == c))
                    .map(|r| r.info())
                    .collect();
                Ok(json!({ "count": rules.len(), "rules": rules }))
            }
            "securityStatus" => to_value(&self.analyzer.security_status()),
            other => Err(Failure::UnknownMethod(other.to_string())),
        }
    }

    /// 运行 Server Loop，直到输入 EOF 且所有在途请求都已应答
    pub async fn run<R, W>(&self, input: R, mut output: W) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        // EOF 时丢弃发送端，最后一个任务结束后 recv() 返回 None
        let mut tx = Some(tx);
        let mut lines = input.lines();

        loop {
            tokio::select! {
                line = lines.next_line(), if tx.is_some() => {
                    let Some(line) = line? else {
                        debug!("input closed, draining in-flight requests");
                        tx = None;
                        continue;
                    };
                    let request = line.trim().to_string();
                    if request.is_empty() {
                        continue;
                    }
                    if let Some(tx) = &tx {
                        let server = self.clone();
                        let tx = tx.clone();
                        tokio::spawn(async move {
                            let response = server.handle_request(&request).await;
                            if tx.send(response).is_err() {
                                warn!("response dropped, writer is gone");
                            }
                        });
                    }
                }
                Some(response) = rx.recv() => {
                    output.write_all(response.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await?;
                }
                else => break,
            }
        }
        Ok(())
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, Failure> {
    serde_json::to_value(value).map_err(|e| {
        warn!("failed to encode result: {}", e);
        Failure::Analysis(AnalysisError::Internal)
    })
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}
