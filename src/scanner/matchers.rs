// ============================================================================
// Matcher 实现 - 每种规则形态一个策略
// ============================================================================
//
// 扫描器只认识 `Matcher` trait，新增规则形态时在这里加实现，
// engine.rs 不需要改动。
//
// Two families live here:
// - `LineMatcher`: line-local regex checks with optional context conditions
// - structural matchers that look at functions, loops and declarations

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use super::source::{Line, SourceText};
use super::{Hit, Matcher, ScanContext};
use crate::language::Language;
use crate::metrics;

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("Failed to compile pattern: {pattern}"))
}

/// 1-based column of a byte offset.
fn column_at(text: &str, offset: usize) -> usize {
    text.get(..offset).map(|s| s.chars().count()).unwrap_or(0) + 1
}

fn first_non_space(line: &Line) -> usize {
    column_at(&line.code, line.code.len() - line.code.trim_start().len())
}

// ============================================================================
// LineMatcher - 单行正则 + 上下文条件
// ============================================================================

/// Which text of a line a pattern runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Text {
    /// Comments removed, strings kept.
    Code,
    /// Comments removed, string contents masked.
    Bare,
}

struct Near {
    regex: Regex,
    before: usize,
    after: usize,
    wanted: bool,
}

pub struct LineMatcher {
    any: Vec<Regex>,
    text: Text,
    unless: Option<Regex>,
    near: Vec<Near>,
    in_loop: bool,
    in_async: bool,
}

static ASYNC_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\basync\b").unwrap());

/// Inside a function declared `async` (Python, JS/TS, C#).
fn in_async_function(source: &SourceText, idx: usize) -> bool {
    source
        .enclosing_function(idx)
        .is_some_and(|f| ASYNC_HEADER.is_match(&source.line(f.start).bare))
}

impl LineMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        Self::any(&[pattern])
    }

    /// Fires when any of the patterns matches.
    pub fn any(patterns: &[&str]) -> Result<Self> {
        Ok(Self {
            any: patterns.iter().map(|p| compile(p)).collect::<Result<_>>()?,
            text: Text::Code,
            unless: None,
            near: Vec::new(),
            in_loop: false,
            in_async: false,
        })
    }

    pub fn on(mut self, text: Text) -> Self {
        self.text = text;
        self
    }

    /// Suppress the hit when the line also matches `pattern`.
    pub fn unless(mut self, pattern: &str) -> Result<Self> {
        self.unless = Some(compile(pattern)?);
        Ok(self)
    }

    /// Require `pattern` on a line within the window.
    pub fn near(mut self, pattern: &str, before: usize, after: usize) -> Result<Self> {
        self.near.push(Near { regex: compile(pattern)?, before, after, wanted: true });
        Ok(self)
    }

    /// Suppress the hit when `pattern` appears within the window.
    pub fn not_near(mut self, pattern: &str, before: usize, after: usize) -> Result<Self> {
        self.near.push(Near { regex: compile(pattern)?, before, after, wanted: false });
        Ok(self)
    }

    pub fn inside_loop(mut self) -> Self {
        self.in_loop = true;
        self
    }

    pub fn inside_async(mut self) -> Self {
        self.in_async = true;
        self
    }

    fn text_of<'l>(&self, line: &'l Line) -> &'l str {
        match self.text {
            Text::Code => &line.code,
            Text::Bare => &line.bare,
        }
    }

    fn context_ok(&self, source: &SourceText, idx: usize) -> bool {
        self.near.iter().all(|near| {
            let seen = source
                .window(idx, near.before, near.after)
                .any(|i| near.regex.is_match(&source.line(i).code));
            seen == near.wanted
        })
    }
}

impl Matcher for LineMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let mut hits = Vec::new();
        for (idx, line) in source.lines().iter().enumerate() {
            if line.is_blank() {
                continue;
            }
            let text = self.text_of(line);
            let Some(found) = self.any.iter().find_map(|re| re.find(text)) else {
                continue;
            };
            if self.unless.as_ref().is_some_and(|re| re.is_match(&line.code)) {
                continue;
            }
            if self.in_loop && !source.in_loop(idx) {
                continue;
            }
            if self.in_async && !in_async_function(source, idx) {
                continue;
            }
            if !self.context_ok(source, idx) {
                continue;
            }
            hits.push(Hit::at(line.number, column_at(text, found.start())));
        }
        Ok(hits)
    }
}

// ============================================================================
// 算法效率
// ============================================================================

/// Two-branch self recursion with decremented arguments and no cache.
pub struct RecursionMatcher;

static MEMO_GUARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)@(?:functools\.)?(?:lru_cache|cache)\b|\bmemo\w*|\bcache\w*\s*[\[.(]|\bdp\s*\[|\bcomputeIfAbsent\b|\bTryGetValue\b").unwrap()
});
static DECREMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"-\s*\d+").unwrap());

impl Matcher for RecursionMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let mut hits = Vec::new();

        for func in source.functions() {
            let call = compile(&format!(r"\b{}\s*\(([^()]*)\)", regex::escape(&func.name)))?;

            let decorated = (func.start.saturating_sub(3)..func.start)
                .any(|i| MEMO_GUARD.is_match(&source.line(i).code));
            let guarded = decorated || func.body().any(|i| MEMO_GUARD.is_match(&source.line(i).code));
            if guarded {
                continue;
            }

            let mut first_line = None;
            let mut decremented = 0;
            for idx in func.body() {
                let line = source.line(idx);
                // 单行函数的函数体和声明在同一行，跳过声明部分
                let from = if idx == func.start {
                    line.bare.find(func.name.as_str()).map_or(0, |at| at + func.name.len())
                } else {
                    0
                };
                // nested definitions with the same name are rare enough to ignore
                for cap in call.captures_iter(&line.bare[from..]) {
                    let args = cap.get(1).map(|m| m.as_str()).unwrap_or("");
                    if DECREMENT.is_match(args) {
                        decremented += 1;
                        if first_line.is_none() {
                            let col = cap.get(0).map(|m| m.start()).unwrap_or(0);
                            first_line = Some((line.number, column_at(&line.bare, from + col)));
                        }
                    }
                }
            }

            if decremented >= 2 {
                if let Some((line, column)) = first_line {
                    hits.push(Hit::at(line, column).with_message(format!(
                        "Function '{}' calls itself {} times with decremented arguments and no memoization: exponential time",
                        func.name, decremented
                    )));
                }
            }
        }
        Ok(hits)
    }
}

/// `a[x] <op> a[y]` where both sides index the same collection inside
/// at least two enclosing loops.
pub struct IndexedComparisonMatcher {
    pattern: Regex,
}

impl IndexedComparisonMatcher {
    /// `ops` is a regex alternative of comparison operators, e.g. `==`.
    pub fn new(ops: &str) -> Result<Self> {
        let pattern = compile(&format!(
            r"([A-Za-z_]\w*)\s*\[\s*([^\[\]]+?)\s*\]\s*(?:{ops})\s*([A-Za-z_]\w*)\s*\[\s*([^\[\]]+?)\s*\]"
        ))?;
        Ok(Self { pattern })
    }
}

impl Matcher for IndexedComparisonMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let mut hits = Vec::new();
        for (idx, line) in source.lines().iter().enumerate() {
            if source.loop_depth(idx) < 2 {
                continue;
            }
            for cap in self.pattern.captures_iter(&line.bare) {
                let same_collection = cap[1] == cap[3];
                let other_index = cap[2] != cap[4];
                if same_collection && other_index {
                    let col = cap.get(0).map(|m| m.start()).unwrap_or(0);
                    hits.push(Hit::at(line.number, column_at(&line.bare, col)));
                    break;
                }
            }
        }
        Ok(hits)
    }
}

/// A loop header nested inside another loop.
pub struct NestedLoopMatcher;

impl Matcher for NestedLoopMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let hits = source
            .lines()
            .iter()
            .enumerate()
            .filter(|(idx, line)| line.is_loop && source.loop_depth(*idx) >= 1)
            .map(|(_, line)| Hit::at(line.number, first_non_space(line)))
            .collect();
        Ok(hits)
    }
}

static PY_MEMBERSHIP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[\w.\[\]]+\s+(?:not\s+)?in\s+([A-Za-z_]\w*)\s*(?::|\)|$|\band\b|\bor\b)").unwrap()
});
static CALL_MEMBERSHIP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_]\w*)\s*\.\s*(?:includes|indexOf|contains|Contains|IndexOf)\s*\(").unwrap()
});

/// Linear membership test against a list inside a loop.
pub struct MembershipMatcher;

impl MembershipMatcher {
    fn is_list(source: &SourceText, name: &str) -> Result<bool> {
        let escaped = regex::escape(name);
        let decl = match source.language {
            Language::Python => format!(r"\b{escaped}\s*(?::\s*[\w\[\]]+\s*)?=\s*(?:\[|list\()"),
            Language::JavaScript | Language::TypeScript => {
                format!(r"\b{escaped}\s*(?::\s*[\w<>\[\]]+\s*)?=\s*(?:\[|new\s+Array\b|Array\.from\b)")
            }
            Language::Java | Language::CSharp => {
                format!(r"\b(?:List|ArrayList|LinkedList|IList|Collection)\s*<[^>]*>\s+{escaped}\b|\b{escaped}\s*=\s*new\s+(?:ArrayList|List|LinkedList)\b")
            }
            Language::Cpp => format!(r"\b(?:std::)?(?:vector|list|deque)\s*<[^>]*>\s+{escaped}\b"),
        };
        Ok(compile(&decl)?.is_match(source.code()))
    }
}

impl Matcher for MembershipMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let mut verdicts: HashMap<String, bool> = HashMap::new();
        let mut hits = Vec::new();

        for (idx, line) in source.lines().iter().enumerate() {
            if line.is_blank() || line.is_loop || !source.in_loop(idx) {
                continue;
            }
            let re: &Regex = if source.language == Language::Python { &PY_MEMBERSHIP } else { &CALL_MEMBERSHIP };
            let Some(cap) = re.captures(&line.bare) else {
                continue;
            };
            let name = cap[1].to_string();
            let is_list = match verdicts.get(&name) {
                Some(v) => *v,
                None => {
                    let v = Self::is_list(source, &name)?;
                    verdicts.insert(name.clone(), v);
                    v
                }
            };
            if is_list {
                let col = cap.get(0).map(|m| m.start()).unwrap_or(0);
                hits.push(
                    Hit::at(line.number, column_at(&line.bare, col))
                        .with_message(format!("O(n) membership test on list '{name}' inside a loop")),
                );
            }
        }
        Ok(hits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatKind {
    List,
    Text,
}

static SELF_ASSIGN_CONCAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_]\w*)\s*=\s*([A-Za-z_]\w*)\s*(\+|\.concat\s*\()\s*(.*)").unwrap()
});
static PLUS_EQUALS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Za-z_]\w*)\s*\+=\s*(.*)").unwrap());

/// Growing a list or string by concatenation inside a loop.
pub struct ConcatInLoopMatcher {
    pub kind: ConcatKind,
}

impl ConcatInLoopMatcher {
    fn declared_as(&self, source: &SourceText, name: &str) -> Result<bool> {
        let escaped = regex::escape(name);
        let decl = match self.kind {
            ConcatKind::List => format!(r"\b{escaped}\s*(?::\s*[\w\[\]]+\s*)?=\s*(?:\[|list\()"),
            ConcatKind::Text => format!(
                r#"\b{escaped}\s*(?::\s*str\s*)?=\s*(?:["'`]|str\()|\b(?:String|string|std::string)\s+{escaped}\b"#
            ),
        };
        Ok(compile(&decl)?.is_match(source.code()))
    }

    fn rhs_looks_like(&self, rhs: &str) -> bool {
        let rhs = rhs.trim_start();
        match self.kind {
            ConcatKind::List => rhs.starts_with('['),
            ConcatKind::Text => rhs.starts_with('"') || rhs.starts_with('\'') || rhs.starts_with("f\"") || rhs.starts_with("f'"),
        }
    }
}

impl Matcher for ConcatInLoopMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let mut hits = Vec::new();

        for (idx, line) in source.lines().iter().enumerate() {
            if line.is_blank() || !source.in_loop(idx) {
                continue;
            }
            let (name, rhs, start) = if let Some(cap) = SELF_ASSIGN_CONCAT.captures(&line.code) {
                if cap[1] != cap[2] {
                    continue;
                }
                let is_concat_call = cap[3].starts_with('.');
                if is_concat_call && self.kind == ConcatKind::Text {
                    continue;
                }
                (cap[1].to_string(), cap[4].to_string(), cap.get(0).map(|m| m.start()).unwrap_or(0))
            } else if let Some(cap) = PLUS_EQUALS.captures(&line.code) {
                (cap[1].to_string(), cap[2].to_string(), cap.get(0).map(|m| m.start()).unwrap_or(0))
            } else {
                continue;
            };

            if self.rhs_looks_like(&rhs) || self.declared_as(source, &name)? {
                hits.push(Hit::at(line.number, column_at(&line.code, start)));
            }
        }
        Ok(hits)
    }
}

static PY_GROUP_GUARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*if\s+(.+?)\s+not\s+in\s+([A-Za-z_]\w*)\s*:").unwrap()
});
static JS_GROUP_GUARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*if\s*\(\s*!\s*([A-Za-z_$][\w$]*)\s*\[\s*(.+?)\s*\]\s*\)").unwrap()
});

/// `if key not in groups: groups[key] = []` style grouping.
pub struct ManualGroupingMatcher;

impl Matcher for ManualGroupingMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let mut hits = Vec::new();

        for (idx, line) in source.lines().iter().enumerate() {
            let (dict, key) = if let Some(cap) = PY_GROUP_GUARD.captures(&line.code) {
                (cap[2].to_string(), cap[1].to_string())
            } else if let Some(cap) = JS_GROUP_GUARD.captures(&line.code) {
                (cap[1].to_string(), cap[2].to_string())
            } else {
                continue;
            };
            let init = compile(&format!(
                r"\b{}\s*\[\s*{}\s*\]\s*=\s*(?:\[\s*\]|list\(\s*\)|new\s+\w*\s*\(\s*\)|\{{\s*\}})",
                regex::escape(&dict),
                regex::escape(&key)
            ))?;
            // same line (one-liner) or the next two code lines
            let same_line = init.is_match(&line.code);
            let following = source
                .window(idx, 0, 2)
                .skip_while(|&i| i == idx)
                .any(|i| init.is_match(&source.line(i).code));
            if same_line || following {
                hits.push(Hit::at(line.number, first_non_space(line)));
            }
        }
        Ok(hits)
    }
}

static AWAIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bawait\b").unwrap());
static AWAIT_COMPREHENSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\[(]\s*await\b[^\]]*\bfor\b").unwrap());
/// `for`/`while` statements; `.map(async ...)` callbacks are not sequential.
static STATEMENT_LOOP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s}]*(?:for|foreach|while|do)\b").unwrap());
static AWAITING_LOOP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s}]*(?:for\s+await|await\s+foreach)\b").unwrap());

/// `await` on every iteration: the calls run one after another.
/// Reported once per loop.
pub struct SequentialAwaitMatcher;

impl Matcher for SequentialAwaitMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let mut reported = HashSet::new();
        let mut hits = Vec::new();

        for (idx, line) in source.lines().iter().enumerate() {
            let Some(found) = AWAIT.find(&line.bare) else {
                continue;
            };
            let hit = Hit::at(line.number, column_at(&line.bare, found.start()));
            if AWAIT_COMPREHENSION.is_match(&line.bare) {
                hits.push(hit);
                continue;
            }
            if line.is_loop {
                continue;
            }
            let Some(header) = source.enclosing_loop(idx) else {
                continue;
            };
            let head = &source.line(header).bare;
            if STATEMENT_LOOP.is_match(head) && !AWAITING_LOOP.is_match(head) && reported.insert(header) {
                hits.push(hit);
            }
        }
        Ok(hits)
    }
}

// ============================================================================
// 安全
// ============================================================================

static USER_INPUT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\brequest\.(?:args|form|values|params|query|body|GET|POST|json|files|get_json)\b|\breq\.(?:params|query|body|headers)\b|\bgetParameter\s*\(|\binput\s*\(|\bsys\.argv\b|\bprocess\.argv\b|\bRequest\.(?:Query|Form)\b|\[FromQuery\]|\bparams\s*\[").unwrap()
});
static FILE_READ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:open|readFile|readFileSync|createReadStream|fopen|send_file|sendFile|send_from_directory)\s*\(|\bFile\.(?:ReadAllText|ReadAllBytes|OpenRead|Open)\s*\(|\bnew\s+(?:File|FileInputStream|FileReader|StreamReader)\s*\(|\bFiles\.(?:readAllBytes|readString|lines|newInputStream)\s*\(|\bstd::ifstream\b").unwrap()
});
static SANITIZER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:basename|secure_filename|realpath|abspath|normalize|normpath|GetFileName|getCanonicalPath|is_relative_to|startsWith|startswith)\b").unwrap()
});
static ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?:const|let|var|final|String|string|auto|Path|File)\s+)?([A-Za-z_]\w*)\s*(?::\s*[\w\[\]]+\s*)?=[^=](.*)$").unwrap()
});

/// User input reaching a file-read call, directly or through variables.
pub struct TaintedPathMatcher;

impl Matcher for TaintedPathMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let mut tainted: Vec<String> = Vec::new();
        let mut hits = Vec::new();

        for line in source.lines() {
            if line.is_blank() {
                continue;
            }
            let code = line.code.as_str();
            let mentions_taint = |text: &str| {
                USER_INPUT.is_match(text)
                    || tainted.iter().any(|v| contains_word(text, v))
            };

            if let Some(found) = FILE_READ.find(code) {
                let args = &code[found.start()..];
                if mentions_taint(args) && !SANITIZER.is_match(code) {
                    hits.push(Hit::at(line.number, column_at(code, found.start())));
                    continue;
                }
            }

            if let Some(cap) = ASSIGNMENT.captures(code) {
                let name = cap[1].to_string();
                let rhs = cap.get(2).map(|m| m.as_str()).unwrap_or("");
                let taints = mentions_taint(rhs) && !SANITIZER.is_match(rhs);
                if taints {
                    if !tainted.contains(&name) {
                        tainted.push(name);
                    }
                } else {
                    // reassignment from a clean value
                    tainted.retain(|v| v != &name);
                }
            }
        }
        Ok(hits)
    }
}

fn contains_word(text: &str, word: &str) -> bool {
    text.match_indices(word).any(|(at, _)| {
        let before = text[..at].chars().next_back();
        let after = text[at + word.len()..].chars().next();
        let is_ident = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
        !is_ident(before) && !is_ident(after)
    })
}

// ============================================================================
// 内存 / 资源
// ============================================================================

static PY_GLOBAL_COLLECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z_]\w*)\s*(?::\s*[\w\[\], ]+)?=\s*(?:\[\s*\]|\{\s*\}|list\(\s*\)|dict\(\s*\)|set\(\s*\)|defaultdict\()").unwrap()
});
static JS_GLOBAL_COLLECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:\[\s*\]|\{\s*\}|new\s+(?:Map|Set|Array)\b)").unwrap()
});
static STATIC_COLLECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bstatic\s+(?:final\s+|readonly\s+)?[\w:<>,\[\]\s]*?\b([A-Za-z_]\w*)\s*=\s*new\s+[\w:]*(?:List|Map|Set|Dictionary|Vector|Queue)\b|\bstatic\s+std::(?:vector|map|unordered_map|set|list|deque)\s*<[^;]*>\s+([A-Za-z_]\w*)").unwrap()
});

/// Module-level or static collection that only ever grows.
pub struct UnboundedGlobalMatcher;

impl UnboundedGlobalMatcher {
    fn declarations(source: &SourceText) -> Vec<(String, usize)> {
        let mut found = Vec::new();
        for (idx, line) in source.lines().iter().enumerate() {
            let cap = match source.language {
                Language::Python if line.depth == 0 => PY_GLOBAL_COLLECTION.captures(&line.code),
                Language::JavaScript | Language::TypeScript if line.depth == 0 => {
                    JS_GLOBAL_COLLECTION.captures(&line.code)
                }
                Language::Java | Language::CSharp | Language::Cpp => STATIC_COLLECTION.captures(&line.code),
                _ => None,
            };
            if let Some(name) = cap.and_then(|c| c.get(1).or_else(|| c.get(2))) {
                found.push((name.as_str().to_string(), idx));
            }
        }
        found
    }
}

impl Matcher for UnboundedGlobalMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let mut hits = Vec::new();

        for (name, decl_idx) in Self::declarations(source) {
            let escaped = regex::escape(&name);
            let growth = compile(&format!(
                r"\b{escaped}\s*(?:\.\s*(?:append|push|add|put|insert|extend|setdefault|set|Add|TryAdd|push_back|emplace_back|emplace)\s*\(|\[[^\]]+\]\s*=[^=])"
            ))?;
            let eviction = compile(&format!(
                r"\b{escaped}\s*\.\s*(?:pop\w*|clear|remove\w*|delete|shift|splice|Remove\w*|Clear|erase|TryRemove|poll)\s*\(|\bdel\s+{escaped}\b|\b{escaped}\s*=\s*{escaped}\s*\[|\b{escaped}\s*\.\s*length\s*=|\bmaxlen\b|\bmaxsize\b"
            ))?;
            if eviction.is_match(source.code()) {
                continue;
            }
            let first_growth = source.lines().iter().enumerate().find(|(idx, line)| {
                *idx != decl_idx && growth.is_match(&line.code) && source.enclosing_function(*idx).is_some()
            });
            if let Some((_, line)) = first_growth {
                hits.push(Hit::at(line.number, first_non_space(line)).with_message(format!(
                    "'{name}' (declared on line {}) grows on every call and is never evicted",
                    decl_idx + 1
                )));
            }
        }
        Ok(hits)
    }
}

/// Acquisition calls with no matching release anywhere in the snippet.
pub struct PairedCallMatcher {
    acquire: Regex,
    release: Regex,
}

impl PairedCallMatcher {
    pub fn new(acquire: &str, release: &str) -> Result<Self> {
        Ok(Self { acquire: compile(acquire)?, release: compile(release)? })
    }
}

impl Matcher for PairedCallMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        if self.release.is_match(source.code()) {
            return Ok(Vec::new());
        }
        let hits = source
            .lines()
            .iter()
            .filter_map(|line| {
                let found = self.acquire.find(&line.code)?;
                Some(Hit::at(line.number, column_at(&line.code, found.start())))
            })
            .collect();
        Ok(hits)
    }
}

static RESOURCE_ACQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z_]\w*)\s*=\s*(?:await\s+)?(?:new\s+(?:FileInputStream|FileOutputStream|FileReader|FileWriter|BufferedReader|BufferedWriter|Socket|FileStream|StreamReader|StreamWriter|SqlConnection)\b|open\s*\(|[\w.]*\bconnect\s*\(|socket\.socket\s*\(|DriverManager\.getConnection\s*\(|\w+\.getConnection\s*\(|createConnection\s*\(|fopen\s*\(|fs\.openSync\s*\()").unwrap()
});
static SCOPED_ACQUIRE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:async\s+)?with\b|\busing\s*\(|\busing\s+(?:var|\w+)\s+\w+\s*=|\btry\s*\(").unwrap()
});
static FINALLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\s}]*finally\b").unwrap());

/// Connections and handles acquired without a guaranteed release.
pub struct ResourceMatcher;

impl Matcher for ResourceMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let mut hits = Vec::new();

        for (idx, line) in source.lines().iter().enumerate() {
            let Some(cap) = RESOURCE_ACQUIRE.captures(&line.code) else {
                continue;
            };
            if SCOPED_ACQUIRE.is_match(&line.code) {
                continue;
            }
            let name = &cap[1];
            let escaped = regex::escape(name);
            let release = compile(&format!(
                r"\b{escaped}\s*\.\s*(?:close|Close|Dispose|end|release|destroy|disconnect)\s*\(|\bfclose\s*\(\s*{escaped}\s*\)"
            ))?;
            let released_in_finally = source.lines().iter().enumerate().any(|(i, l)| {
                i > idx
                    && release.is_match(&l.code)
                    && source.ancestors(i).any(|a| FINALLY.is_match(&source.line(a).code))
            });
            if !released_in_finally {
                let col = cap.get(0).map(|m| m.start()).unwrap_or(0);
                hits.push(
                    Hit::at(line.number, column_at(&line.code, col))
                        .with_message(format!("'{name}' is acquired without a guaranteed release")),
                );
            }
        }
        Ok(hits)
    }
}

// ============================================================================
// 可维护性
// ============================================================================

/// Reports the control header that opens a block one level past the limit.
pub struct DeepNestingMatcher;

impl Matcher for DeepNestingMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let limit = ctx.config.thresholds.max_nesting_depth;
        let hits = source
            .lines()
            .iter()
            .enumerate()
            .filter(|(idx, line)| line.is_control && source.control_depth(*idx) == limit)
            .map(|(_, line)| {
                Hit::at(line.number, first_non_space(line))
                    .with_message(format!("Nesting depth exceeds {limit} levels"))
            })
            .collect();
        Ok(hits)
    }
}

pub struct LongFunctionMatcher;

impl Matcher for LongFunctionMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let limit = ctx.config.thresholds.max_function_lines;
        let mut hits = Vec::new();
        for func in source.functions() {
            let length = (func.start..=func.end).filter(|&i| !source.line(i).is_blank()).count();
            if length > limit {
                let line = source.line(func.start);
                hits.push(Hit::at(line.number, first_non_space(line)).with_message(format!(
                    "Function '{}' is {length} lines long (limit {limit})",
                    func.name
                )));
            }
        }
        Ok(hits)
    }
}

pub struct BranchCountMatcher;

impl Matcher for BranchCountMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let limit = ctx.config.thresholds.max_branches;
        let mut hits = Vec::new();
        for func in source.functions() {
            let branches: usize = func
                .body()
                .map(|i| metrics::branch_points(&source.line(i).bare, source.language))
                .sum();
            if branches > limit {
                let line = source.line(func.start);
                hits.push(Hit::at(line.number, first_non_space(line)).with_message(format!(
                    "Function '{}' has {branches} branches (limit {limit})",
                    func.name
                )));
            }
        }
        Ok(hits)
    }
}

/// File-level approximate cyclomatic complexity above the threshold.
pub struct ComplexityMatcher;

impl Matcher for ComplexityMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let limit = ctx.config.thresholds.max_file_complexity;
        let complexity = metrics::cyclomatic_complexity(source);
        if complexity <= limit {
            return Ok(Vec::new());
        }
        // 定位到分支最多的函数
        let busiest = source.functions().iter().max_by_key(|f| {
            let branches: usize = f
                .body()
                .map(|i| metrics::branch_points(&source.line(i).bare, source.language))
                .sum();
            (branches, std::cmp::Reverse(f.start))
        });
        let line = busiest.map(|f| f.start + 1).unwrap_or(1);
        Ok(vec![Hit::at(line, 1).with_message(format!(
            "Approximate cyclomatic complexity is {complexity} (limit {limit})"
        ))])
    }
}

static CONDITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\s}]*(?:if|elif|else\s+if)\b\s*(.+?)\s*(?::|\{|\bthen\b)?\s*$").unwrap()
});
static LOGIC_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(?:and|or)\b").unwrap());

/// The same non-trivial condition written out more than once.
pub struct DuplicateConditionMatcher;

impl DuplicateConditionMatcher {
    fn normalize(condition: &str) -> String {
        let inner = condition.trim();
        let inner = inner.strip_prefix('(').and_then(|s| s.strip_suffix(')')).unwrap_or(inner);
        inner.chars().filter(|c| !c.is_whitespace()).collect()
    }
}

impl Matcher for DuplicateConditionMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        let mut hits = Vec::new();

        for line in source.lines() {
            let Some(cap) = CONDITION.captures(&line.code) else {
                continue;
            };
            let key = Self::normalize(&cap[1]);
            // trivial checks like `if x:` repeat legitimately
            let compound = key.chars().any(|c| matches!(c, '<' | '>' | '=' | '&' | '|'))
                || LOGIC_WORD.is_match(&cap[1]);
            if key.len() < 12 || !compound {
                continue;
            }
            match first_seen.get(&key) {
                Some(&first) => hits.push(
                    Hit::at(line.number, first_non_space(line))
                        .with_message(format!("Condition duplicates the one on line {first}")),
                ),
                None => {
                    first_seen.insert(key, line.number);
                }
            }
        }
        Ok(hits)
    }
}

pub struct LongParameterListMatcher;

impl Matcher for LongParameterListMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let limit = ctx.config.thresholds.max_parameters;
        let hits = source
            .functions()
            .iter()
            .filter(|f| f.params > limit)
            .map(|f| {
                let line = source.line(f.start);
                Hit::at(line.number, first_non_space(line)).with_message(format!(
                    "Function '{}' takes {} parameters (limit {limit})",
                    f.name, f.params
                ))
            })
            .collect();
        Ok(hits)
    }
}

static EMPTY_BRACE_CATCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bcatch\s*(?:\([^)]*\))?\s*\{\s*\}").unwrap()
});
static CATCH_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bcatch\s*(?:\([^)]*\))?\s*\{\s*$").unwrap());
static PY_EXCEPT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*except\b[^:]*:\s*(pass)?\s*$").unwrap());

/// Exception handlers that swallow the error.
pub struct EmptyHandlerMatcher;

impl Matcher for EmptyHandlerMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let mut hits = Vec::new();

        // 只在命中 handler 头时才向后找下一行
        let next = move |idx: usize| source.next_code_line(idx).map(|i| source.line(i).code.trim());
        for (idx, line) in source.lines().iter().enumerate() {
            let empty = if source.language == Language::Python {
                match PY_EXCEPT.captures(&line.code) {
                    Some(cap) => cap.get(1).is_some() || next(idx) == Some("pass"),
                    None => false,
                }
            } else {
                EMPTY_BRACE_CATCH.is_match(&line.code)
                    || (CATCH_OPEN.is_match(&line.code) && next(idx).is_some_and(|n| n.starts_with('}')))
            };
            if empty {
                hits.push(Hit::at(line.number, first_non_space(line)));
            }
        }
        Ok(hits)
    }
}

// ============================================================================
// 测试
// ============================================================================

static TEST_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bdef\s+test_\w*|@Test\b|\[(?:Test|Fact|Theory|TestMethod)\]|\b(?:describe|it|test)\s*\(|\bTEST(?:_F)?\s*\(|\bassert\w*\b|\bunittest\b|\bpytest\b|\bexpect\s*\(").unwrap()
});

/// Several functions and not a single test construct.
pub struct MissingTestsMatcher;

impl Matcher for MissingTestsMatcher {
    fn evaluate(&self, ctx: &ScanContext) -> Result<Vec<Hit>> {
        let source = ctx.source;
        let wanted = ctx.config.thresholds.min_functions_for_tests;
        let functions = source.functions().len();
        if functions < wanted || TEST_MARKERS.is_match(source.code()) {
            return Ok(Vec::new());
        }
        let first = source.functions().first().map(|f| f.start + 1).unwrap_or(1);
        Ok(vec![Hit::at(first, 1).with_message(format!(
            "{functions} functions and no tests in sight"
        ))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn run(matcher: &dyn Matcher, code: &str, language: Language) -> Vec<usize> {
        let source = SourceText::new(code, language);
        let config = EngineConfig::default();
        let ctx = ScanContext { source: &source, config: &config };
        matcher.evaluate(&ctx).unwrap().into_iter().map(|h| h.line).collect()
    }

    #[test]
    fn test_line_matcher_in_loop() {
        let m = LineMatcher::new(r"re\.compile\(").unwrap().inside_loop();
        let code = "p = re.compile('a')\nfor x in xs:\n    q = re.compile(x)\n";
        assert_eq!(run(&m, code, Language::Python), vec![3]);
    }

    #[test]
    fn test_line_matcher_near_and_unless() {
        let m = LineMatcher::new(r"hashlib\.md5\(")
            .unwrap()
            .near(r"(?i)passw", 2, 2)
            .unwrap()
            .unless(r"usedforsecurity")
            .unwrap();
        let code = "def h(password):\n    return hashlib.md5(password.encode()).hexdigest()\n\ndigest = hashlib.md5(data, usedforsecurity=False)";
        assert_eq!(run(&m, code, Language::Python), vec![2]);
    }

    #[test]
    fn test_recursion_fib() {
        let code = "def fib(n):\n    if n <= 1:\n        return n\n    return fib(n - 1) + fib(n - 2)\n";
        assert_eq!(run(&RecursionMatcher, code, Language::Python), vec![4]);
    }

    #[test]
    fn test_recursion_single_line_forms() {
        let ts = "const fib = (n: number): number => n <= 1 ? n : fib(n - 1) + fib(n - 2);\n";
        assert_eq!(run(&RecursionMatcher, ts, Language::TypeScript), vec![1]);
        let js = "let x = 1;\nconst fib = n => n < 2 ? n : fib(n - 1) + fib(n - 2);\n";
        assert_eq!(run(&RecursionMatcher, js, Language::JavaScript), vec![2]);
        let py = "def fib(n): return n if n < 2 else fib(n - 1) + fib(n - 2)\n";
        assert_eq!(run(&RecursionMatcher, py, Language::Python), vec![1]);
        let linear = "const down = (n) => n <= 0 ? 0 : down(n - 1);\n";
        assert!(run(&RecursionMatcher, linear, Language::JavaScript).is_empty());
    }

    #[test]
    fn test_recursion_with_cache_is_ignored() {
        let code = "@lru_cache(maxsize=None)\ndef fib(n):\n    if n <= 1:\n        return n\n    return fib(n - 1) + fib(n - 2)\n";
        assert!(run(&RecursionMatcher, code, Language::Python).is_empty());
    }

    #[test]
    fn test_recursion_single_call_is_ignored() {
        let code = "function fact(n) {\n  if (n <= 1) return 1;\n  return n * fact(n - 1);\n}";
        assert!(run(&RecursionMatcher, code, Language::JavaScript).is_empty());
    }

    #[test]
    fn test_line_matcher_inside_async() {
        let m = LineMatcher::new(r"\btime\.sleep\s*\(").unwrap().inside_async();
        let code = "def a():\n    time.sleep(1)\n\nasync def b():\n    time.sleep(1)\n";
        assert_eq!(run(&m, code, Language::Python), vec![5]);
    }

    #[test]
    fn test_sequential_await() {
        let py = "async def fetch_all(urls):\n    out = []\n    for u in urls:\n        out.append(await fetch(u))\n        await log(u)\n    return out\n";
        assert_eq!(run(&SequentialAwaitMatcher, py, Language::Python), vec![4]);

        let streamed = "async def drain(stream):\n    async for item in stream:\n        await handle(item)\n";
        assert!(run(&SequentialAwaitMatcher, streamed, Language::Python).is_empty());

        let comprehension = "async def f(urls):\n    return [await fetch(u) for u in urls]\n";
        assert_eq!(run(&SequentialAwaitMatcher, comprehension, Language::Python), vec![2]);

        let js = "async function all(ids) {\n  await Promise.all(ids.map(async (id) => {\n    await load(id);\n  }));\n  for (const id of ids) {\n    await load(id);\n  }\n}";
        assert_eq!(run(&SequentialAwaitMatcher, js, Language::JavaScript), vec![6]);
    }

    #[test]
    fn test_dupscan() {
        let m = IndexedComparisonMatcher::new("==").unwrap();
        let code = "def dups(items):\n    for i in range(len(items)):\n        for j in range(i + 1, len(items)):\n            if items[i] == items[j]:\n                return True\n";
        assert_eq!(run(&m, code, Language::Python), vec![4]);
        let single = "for i in range(n):\n    if a[i] == b[i]:\n        pass\n";
        assert!(run(&m, single, Language::Python).is_empty());
    }

    #[test]
    fn test_bubble_sort_shape() {
        let m = IndexedComparisonMatcher::new("<=|>=|<|>").unwrap();
        let code = "for (int i = 0; i < n; i++) {\n  for (int j = 0; j < n - 1; j++) {\n    if (arr[j] > arr[j + 1]) {\n      swap(arr, j);\n    }\n  }\n}";
        assert_eq!(run(&m, code, Language::Java), vec![3]);
    }

    #[test]
    fn test_nested_loop() {
        let code = "for a in xs:\n    for b in ys:\n        pass\nfor c in zs:\n    pass\n";
        assert_eq!(run(&NestedLoopMatcher, code, Language::Python), vec![2]);
    }

    #[test]
    fn test_membership_only_for_lists() {
        let code = "seen = []\nallowed = set()\nfor x in xs:\n    if x not in seen:\n        seen.append(x)\n    if x in allowed:\n        pass\n";
        assert_eq!(run(&MembershipMatcher, code, Language::Python), vec![4]);
    }

    #[test]
    fn test_list_and_string_concat() {
        let code = "out = []\ns = ''\ntotal = 0\nfor x in xs:\n    out = out + [x]\n    s += str(x)\n    total += x\n";
        assert_eq!(run(&ConcatInLoopMatcher { kind: ConcatKind::List }, code, Language::Python), vec![5]);
        assert_eq!(run(&ConcatInLoopMatcher { kind: ConcatKind::Text }, code, Language::Python), vec![6]);
    }

    #[test]
    fn test_manual_grouping() {
        let code = "groups = {}\nfor item in items:\n    if item.kind not in groups:\n        groups[item.kind] = []\n    groups[item.kind].append(item)\n";
        assert_eq!(run(&ManualGroupingMatcher, code, Language::Python), vec![3]);
    }

    #[test]
    fn test_tainted_path_direct_and_indirect() {
        let code = "name = request.args.get('f')\npath = os.path.join(BASE, name)\ndata = open(path).read()\nsafe = open(os.path.basename(name))\n";
        assert_eq!(run(&TaintedPathMatcher, code, Language::Python), vec![3]);
        let direct = "app.get('/f', (req, res) => {\n  fs.readFile(req.query.file, cb);\n});";
        assert_eq!(run(&TaintedPathMatcher, direct, Language::JavaScript), vec![2]);
    }

    #[test]
    fn test_unbounded_global() {
        let code = "CACHE = {}\n\ndef remember(k, v):\n    CACHE[k] = v\n    return v\n";
        assert_eq!(run(&UnboundedGlobalMatcher, code, Language::Python), vec![4]);
        let evicted = "CACHE = {}\n\ndef remember(k, v):\n    CACHE[k] = v\n    if len(CACHE) > 100:\n        CACHE.clear()\n";
        assert!(run(&UnboundedGlobalMatcher, evicted, Language::Python).is_empty());
    }

    #[test]
    fn test_paired_calls() {
        let m = PairedCallMatcher::new(r"\.addEventListener\s*\(", r"\.removeEventListener\s*\(").unwrap();
        let leak = "function mount(el) {\n  el.addEventListener('click', onClick);\n}";
        assert_eq!(run(&m, leak, Language::JavaScript), vec![2]);
        let paired = "el.addEventListener('click', f);\nel.removeEventListener('click', f);";
        assert!(run(&m, paired, Language::JavaScript).is_empty());
    }

    #[test]
    fn test_resource_release() {
        let leak = "def load(p):\n    f = open(p)\n    return f.read()\n";
        assert_eq!(run(&ResourceMatcher, leak, Language::Python), vec![2]);
        let scoped = "def load(p):\n    with open(p) as f:\n        return f.read()\n";
        assert!(run(&ResourceMatcher, scoped, Language::Python).is_empty());
        let finally = "def q():\n    conn = db.connect()\n    try:\n        return conn.query()\n    finally:\n        conn.close()\n";
        assert!(run(&ResourceMatcher, finally, Language::Python).is_empty());
    }

    #[test]
    fn test_deep_nesting_reported_once() {
        let code = "def f(a):\n    if a:\n        for x in a:\n            while x:\n                if x > 1:\n                    if x > 2:\n                        if x > 3:\n                            pass\n";
        assert_eq!(run(&DeepNestingMatcher, code, Language::Python), vec![6]);
    }

    #[test]
    fn test_duplicate_condition() {
        let code = "if user.age >= 18 and user.verified:\n    a()\nif x:\n    b()\nif user.age >= 18 and user.verified:\n    c()\n";
        assert_eq!(run(&DuplicateConditionMatcher, code, Language::Python), vec![5]);

        // `or` inside an identifier is not a boolean operator
        let plain = "if self.random_order_flag:\n    a()\nif self.random_order_flag:\n    b()\n";
        assert!(run(&DuplicateConditionMatcher, plain, Language::Python).is_empty());
        let worded = "if ready and not cancelled:\n    a()\nif ready and not cancelled:\n    b()\n";
        assert_eq!(run(&DuplicateConditionMatcher, worded, Language::Python), vec![3]);
    }

    #[test]
    fn test_long_parameter_list() {
        let code = "def f(a, b, c, d, e, g):\n    pass\ndef ok(self, a, b):\n    pass\n";
        assert_eq!(run(&LongParameterListMatcher, code, Language::Python), vec![1]);
    }

    #[test]
    fn test_empty_handlers() {
        let py = "try:\n    a()\nexcept ValueError:\n    pass\n";
        assert_eq!(run(&EmptyHandlerMatcher, py, Language::Python), vec![3]);
        let java = "try {\n  a();\n} catch (Exception e) {\n}\ntry { b(); } catch (IOException e) { log(e); }";
        assert_eq!(run(&EmptyHandlerMatcher, java, Language::Java), vec![3]);
    }

    #[test]
    fn test_missing_tests() {
        let code = "def a():\n    pass\ndef b():\n    pass\ndef c():\n    pass\n";
        assert_eq!(run(&MissingTestsMatcher, code, Language::Python), vec![1]);
        let with_test = format!("{code}def test_a():\n    assert a() is None\n");
        assert!(run(&MissingTestsMatcher, &with_test, Language::Python).is_empty());
    }
}
