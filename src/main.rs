mod cli;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// CodePitamah - rule-based static code analysis
///
/// 默认输出人类可读的 Markdown，--json 输出机器可读格式
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 日志级别 (RUST_LOG 优先)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 输出 JSON 格式 (默认输出 Markdown)
    #[arg(long, global = true)]
    json: bool,

    /// YAML 引擎配置文件
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// 🔍 分析单个文件或代码片段
    Analyze {
        /// 源文件路径
        #[arg(short, long, conflicts_with = "code")]
        file: Option<PathBuf>,

        /// 直接传入代码
        #[arg(short, long)]
        code: Option<String>,

        /// 语言 (python, javascript, typescript, java, cpp, csharp)；传文件时可按扩展名推断
        #[arg(short, long)]
        language: Option<String>,
    },

    /// 🛰️ 目录扫描 - 并行分析所有支持的源文件
    Scan {
        /// 项目路径
        #[arg(short, long, default_value = ".")]
        path: PathBuf,
    },

    /// 📋 列出规则
    Rules {
        /// 只显示某一类: algorithm-efficiency, security, memory, maintainability, api-design, testing
        #[arg(short, long)]
        category: Option<String>,
    },

    /// ℹ️ 引擎与安全配置状态
    Status,

    /// 🔌 stdio JSON 请求循环 (每行一个请求)
    Serve,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志 (stderr，stdout 留给报告和 JSON 响应)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    cli::handle_command(args.command, args.json, args.config.as_deref())
}
