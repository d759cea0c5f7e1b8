// ============================================================================
// 设计模式识别 (lexical)
// ============================================================================
//
// 每个模式由若干独立信号组成，命中的信号越多置信度越高。

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::scanner::SourceText;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    Architectural,
    Design,
    AntiPattern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedPattern {
    pub name: String,
    pub kind: PatternKind,
    pub confidence: f64,
    pub description: String,
    pub recommendation: String,
}

struct PatternDef {
    name: &'static str,
    kind: PatternKind,
    description: &'static str,
    recommendation: &'static str,
    signals: Vec<Regex>,
    /// Signals needed before the pattern is reported.
    min_signals: usize,
}

/// Confidence by number of signals seen.
const CONFIDENCE: [f64; 5] = [0.0, 0.6, 0.75, 0.85, 0.9];

const GOD_OBJECT_METHODS: usize = 15;

macro_rules! signals {
    ($($re:expr),+ $(,)?) => {
        vec![$(Regex::new($re).unwrap()),+]
    };
}

static PATTERNS: Lazy<Vec<PatternDef>> = Lazy::new(|| {
    vec![
        PatternDef {
            name: "Singleton",
            kind: PatternKind::Design,
            description: "Class restricts itself to a single shared instance",
            recommendation: "Prefer dependency injection; singletons hide dependencies and complicate testing",
            signals: signals![
                r"\b_?_?instance\b\s*=\s*(?:None|null|nullptr)\b",
                r"\b(?:getInstance|get_instance|Instance)\s*\(",
                r"\bdef\s+__new__\s*\(|\bprivate\s+\w+\s*\(\s*\)\s*\{",
                r"\bstatic\s+(?:readonly\s+|final\s+)?\w+\s+_?instance\b",
            ],
            min_signals: 2,
        },
        PatternDef {
            name: "Factory",
            kind: PatternKind::Design,
            description: "Object creation is delegated to a dedicated creator",
            recommendation: "Keep factories focused on construction; register product types instead of growing if/else chains",
            signals: signals![
                r"\bclass\s+\w*Factory\b",
                r"\b(?:def\s+|function\s+|\s)(?:create|make|build)_?[A-Z_a-z]\w*\s*\(",
                r"\breturn\s+(?:new\s+)?[A-Z]\w*\s*\(",
            ],
            min_signals: 2,
        },
        PatternDef {
            name: "Repository",
            kind: PatternKind::Architectural,
            description: "Data access is encapsulated behind a collection-like interface",
            recommendation: "Keep repositories free of business rules and return domain objects",
            signals: signals![
                r"\b(?:class|interface)\s+\w*(?:Repository|Repo|DAO|Dao)\b",
                r"\b(?:find_by|findBy|get_by|getBy)\w*\s*\(",
                r"\b(?:def\s+|\s)(?:save|delete|find_all|findAll)\s*\(",
            ],
            min_signals: 2,
        },
        PatternDef {
            name: "Observer",
            kind: PatternKind::Design,
            description: "Subjects notify registered observers about changes",
            recommendation: "Make sure observers are unregistered to avoid leaks",
            signals: signals![
                r"\b(?:subscribe|attach|add_?[Oo]bserver|addListener|register)\s*\(",
                r"\b(?:notify\w*|emit|dispatch|publish)\s*\(",
                r"\b(?:observers|listeners|subscribers)\b",
            ],
            min_signals: 2,
        },
        PatternDef {
            name: "Decorator",
            kind: PatternKind::Design,
            description: "Behaviour is added by wrapping a function or object",
            recommendation: "Preserve metadata (functools.wraps) and keep wrappers transparent",
            signals: signals![
                r"\bdef\s+\w+\s*\(\s*(?:func|fn|f|function|wrapped)\s*\)",
                r"\bdef\s+wrapper\s*\(",
                r"@(?:functools\.)?wraps\s*\(",
            ],
            min_signals: 2,
        },
        PatternDef {
            name: "Memoization",
            kind: PatternKind::Design,
            description: "Results of expensive calls are cached",
            recommendation: "Bound the cache size so memoization does not become a memory leak",
            signals: signals![
                r"@(?:functools\.)?(?:lru_cache|cache)\b",
                r"\bmemo\w*\s*(?:=|\[)",
                r"\bif\s+.+\s+in\s+(?:memo|cache)\w*\s*:",
            ],
            min_signals: 1,
        },
    ]
});

/// Recognize patterns in deterministic (declaration) order.
pub fn recognize(source: &SourceText) -> Vec<RecognizedPattern> {
    let code = source.code();
    let mut found: Vec<RecognizedPattern> = PATTERNS
        .iter()
        .filter_map(|def| {
            let seen = def.signals.iter().filter(|re| re.is_match(code)).count();
            (seen >= def.min_signals).then(|| RecognizedPattern {
                name: def.name.to_string(),
                kind: def.kind,
                confidence: CONFIDENCE[seen.min(CONFIDENCE.len() - 1)],
                description: def.description.to_string(),
                recommendation: def.recommendation.to_string(),
            })
        })
        .collect();

    for class in source.classes() {
        let methods = source
            .functions()
            .iter()
            .filter(|f| f.start > class.start && f.end <= class.end)
            .count();
        if methods > GOD_OBJECT_METHODS {
            found.push(RecognizedPattern {
                name: "God Object".to_string(),
                kind: PatternKind::AntiPattern,
                confidence: if methods > GOD_OBJECT_METHODS * 2 { 0.9 } else { 0.75 },
                description: format!("Class '{}' has {methods} methods", class.name),
                recommendation: "Split the class by responsibility into smaller collaborating classes".to_string(),
            });
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;

    fn names(code: &str, language: Language) -> Vec<String> {
        recognize(&SourceText::new(code, language)).into_iter().map(|p| p.name).collect()
    }

    #[test]
    fn test_singleton() {
        let code = "class Config:\n    _instance = None\n    def __new__(cls):\n        if cls._instance is None:\n            cls._instance = super().__new__(cls)\n        return cls._instance\n";
        assert!(names(code, Language::Python).contains(&"Singleton".to_string()));
    }

    #[test]
    fn test_memoization_confidence() {
        let code = "@lru_cache(maxsize=None)\ndef fib(n):\n    return n\n";
        let found = recognize(&SourceText::new(code, Language::Python));
        let memo = found.iter().find(|p| p.name == "Memoization").unwrap();
        assert_eq!(memo.confidence, 0.6);
        assert_eq!(memo.kind, PatternKind::Design);
    }

    #[test]
    fn test_god_object() {
        let mut code = String::from("class Everything:\n");
        for i in 0..16 {
            code.push_str(&format!("    def m{i}(self):\n        pass\n"));
        }
        let found = recognize(&SourceText::new(&code, Language::Python));
        let god = found.iter().find(|p| p.name == "God Object").unwrap();
        assert_eq!(god.kind, PatternKind::AntiPattern);
        assert!(god.description.contains("16 methods"));
    }

    #[test]
    fn test_plain_code_has_no_patterns() {
        assert!(names("x = 1\ny = x + 2\n", Language::Python).is_empty());
    }
}
