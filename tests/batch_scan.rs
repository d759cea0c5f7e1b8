// ============================================================================
// 目录扫描测试
// ============================================================================

use std::fs;
use std::path::Path;

use codepitamah::{Analyzer, EngineConfig};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn test_scan_mixed_tree() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "src/fib.py", "def fib(n):\n    if n <= 1:\n        return n\n    return fib(n - 1) + fib(n - 2)\n");
    write(root, "src/ok.js", "const x = 1;\n");
    write(root, "src/run.py", "import os\nos.system('ls')\n");
    write(root, "README.md", "# not code\n");
    write(root, "node_modules/dep/index.js", "eval(payload)\n");
    write(root, ".git/hooks/pre-commit.py", "print('hook')\n");

    let analyzer = Analyzer::new(EngineConfig::default()).unwrap();
    let report = analyzer.analyze_path(root).unwrap();

    let paths: Vec<String> = report
        .files
        .iter()
        .map(|f| f.path.replace('\\', "/"))
        .collect();
    assert_eq!(paths, vec!["src/fib.py", "src/ok.js", "src/run.py"]);

    let fib = &report.files[0];
    let result = fib.result.as_ref().unwrap();
    assert!(result.issues.iter().any(|i| i.rule_id == "ALG_EXPONENTIAL_RECURSION"));

    let clean = report.files[1].result.as_ref().unwrap();
    assert!(clean.issues.is_empty());

    let rejected = &report.files[2];
    assert!(rejected.result.is_none());
    assert_eq!(rejected.error.as_ref().unwrap().code, "DANGEROUS_PATTERN");

    assert_eq!(report.issue_count(), result.issues.len());
}

#[test]
fn test_scan_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    let analyzer = Analyzer::new(EngineConfig::default()).unwrap();
    let report = analyzer.analyze_path(dir.path()).unwrap();
    assert!(report.files.is_empty());
    assert_eq!(report.issue_count(), 0);
}

#[test]
fn test_scan_missing_root() {
    let dir = tempfile::tempdir().unwrap();
    let analyzer = Analyzer::new(EngineConfig::default()).unwrap();
    let err = analyzer.analyze_path(&dir.path().join("nope")).unwrap_err();
    assert!(err.to_string().contains("Path not found"));
}

#[test]
fn test_config_file_limits_batch() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "big.py", &format!("x = 1\n{}", "#".repeat(100)));
    let config_path = root.join("engine.yaml");
    fs::write(&config_path, "maxCodeBytes: 32\n").unwrap();

    let config = EngineConfig::load(&config_path).unwrap();
    assert_eq!(config.max_analysis_secs, 30);
    let report = Analyzer::new(config).unwrap().analyze_path(root).unwrap();

    assert_eq!(report.files.len(), 1);
    assert_eq!(report.files[0].error.as_ref().unwrap().code, "CODE_TOO_LARGE");
}
