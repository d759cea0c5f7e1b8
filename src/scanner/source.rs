// ============================================================================
// SourceText - 一次切分，多规则共享的源码视图
// ============================================================================
//
// Every rule works on the same pre-computed view: lines are split once,
// comments are blanked out, string literal contents are masked, and block
// structure (indentation for Python, braces elsewhere) is resolved into
// parent links. This is a lexical approximation, not a parse; malformed
// input simply yields a flatter structure.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::language::Language;

/// One physical line of the submitted code.
#[derive(Debug, Clone)]
pub struct Line<'a> {
    /// 1-based.
    pub number: usize,
    pub raw: &'a str,
    /// Comments replaced by spaces, strings kept.
    pub code: String,
    /// Like `code`, with string literal contents replaced by spaces.
    pub bare: String,
    pub indent: usize,
    /// Block depth at the start of the line.
    pub depth: usize,
    /// Index of the header line that opened the enclosing block.
    pub parent: Option<usize>,
    pub is_loop: bool,
    pub is_control: bool,
    /// Enclosing loop headers.
    pub loop_depth: usize,
    /// Enclosing control-flow headers (functions and classes excluded).
    pub control_depth: usize,
    /// Header of the innermost enclosing loop.
    pub loop_header: Option<usize>,
}

impl Line<'_> {
    pub fn is_blank(&self) -> bool {
        self.code.trim().is_empty()
    }

    /// Non-blank line holding nothing but comments.
    pub fn is_comment(&self) -> bool {
        self.is_blank() && !self.raw.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpan {
    pub name: String,
    /// Line index of the header.
    pub start: usize,
    /// Line index of the last line of the body (inclusive).
    pub end: usize,
    pub params: usize,
}

impl FunctionSpan {
    pub fn body(&self) -> std::ops::RangeInclusive<usize> {
        (self.start + 1).min(self.end)..=self.end
    }

    pub fn contains(&self, idx: usize) -> bool {
        idx >= self.start && idx <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSpan {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

// ============================================================================
// 语言相关的正则
// ============================================================================

static PY_LOOP: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:async\s+)?(?:for|while)\b").unwrap());
static PY_CONTROL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:if|elif|else|try|except|finally|with|match|case)\b").unwrap()
});
static BRACE_LOOP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:for|foreach|while|do)\b|\.(?:forEach|map|filter|reduce|flatMap|some|every)\s*\(").unwrap()
});
static BRACE_CONTROL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:if|else|try|catch|finally|switch|case|default|using|lock|synchronized)\b").unwrap()
});

static PY_FUNC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\(").unwrap()
});
static JS_FUNC: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*[(<]").unwrap(),
        Regex::new(r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*(?::[^=]+)?=>|[A-Za-z_$][\w$]*\s*=>)").unwrap(),
        Regex::new(r"^\s*(?:(?:public|private|protected|static|async|readonly|override|get|set)\s+)*([A-Za-z_$][\w$]*)\s*\(").unwrap(),
    ]
});
/// `def f(x): return x` and `const f = (x) => x` keep the body on the header line.
static PY_INLINE_FUNC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:async\s+)?def\s+[A-Za-z_]\w*\s*\(.*\)\s*(?:->\s*[^:]+)?:\s*\S").unwrap()
});
static JS_INLINE_ARROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:const|let|var)\s+[A-Za-z_$][\w$]*\s*(?::[^=]+)?=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=>\s*[^\s{]").unwrap()
});
static TYPED_FUNC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?:public|private|protected|internal|static|final|abstract|synchronized|virtual|override|async|inline|explicit|constexpr|extern|unsafe|sealed|native|default)\s+)*(?:[\w:<>\[\],.?*&]+\s+)*?[*&]?(~?[A-Za-z_]\w*)\s*\(").unwrap()
});

static PY_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*class\s+([A-Za-z_]\w*)").unwrap());
static JS_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)").unwrap()
});
static TYPED_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:(?:public|private|protected|internal|static|final|abstract|sealed|partial)\s+)*(?:class|interface|enum|record|struct)\s+([A-Za-z_]\w*)").unwrap()
});

const NOT_A_FUNCTION: &[&str] = &[
    "if", "for", "foreach", "while", "switch", "catch", "return", "using", "lock", "synchronized",
    "sizeof", "typeof", "new", "throw", "else", "do", "try", "await", "yield", "super", "this",
    "function", "with", "case", "delete", "in", "of",
];

// ============================================================================
// SourceText
// ============================================================================

pub struct SourceText<'a> {
    pub text: &'a str,
    pub language: Language,
    lines: Vec<Line<'a>>,
    /// Comment-stripped text, newline joined.
    code: String,
    block_ends: HashMap<usize, usize>,
    functions: Vec<FunctionSpan>,
    classes: Vec<ClassSpan>,
}

impl<'a> SourceText<'a> {
    pub fn new(text: &'a str, language: Language) -> Self {
        let capacity = memchr::memchr_iter(b'\n', text.as_bytes()).count() + 1;
        let mut lines = Vec::with_capacity(capacity);
        let mut lexer = Lexer::new(language);

        for (idx, raw) in text.lines().enumerate() {
            let (code, bare) = lexer.strip(raw);
            let indent = raw
                .chars()
                .take_while(|c| c.is_whitespace())
                .map(|c| if c == '\t' { 4 } else { 1 })
                .sum();
            lines.push(Line {
                number: idx + 1,
                raw,
                code,
                bare,
                indent,
                depth: 0,
                parent: None,
                is_loop: false,
                is_control: false,
                loop_depth: 0,
                control_depth: 0,
                loop_header: None,
            });
        }

        let block_ends = if language.uses_indentation() {
            resolve_indent_blocks(&mut lines)
        } else {
            resolve_brace_blocks(&mut lines)
        };

        for line in lines.iter_mut() {
            let head = header_text(&line.bare);
            let (loop_re, control_re): (&Regex, &Regex) = if language.uses_indentation() {
                (&PY_LOOP, &PY_CONTROL)
            } else {
                (&BRACE_LOOP, &BRACE_CONTROL)
            };
            line.is_loop = loop_re.is_match(head);
            line.is_control = line.is_loop || control_re.is_match(head);
        }

        // 父节点总在前面，一次正向遍历即可
        for idx in 0..lines.len() {
            let Some(parent) = lines[idx].parent.filter(|&p| p < idx) else {
                continue;
            };
            let up = &lines[parent];
            let loop_depth = up.loop_depth + usize::from(up.is_loop);
            let control_depth = up.control_depth + usize::from(up.is_control);
            let loop_header = if up.is_loop { Some(parent) } else { up.loop_header };
            lines[idx].loop_depth = loop_depth;
            lines[idx].control_depth = control_depth;
            lines[idx].loop_header = loop_header;
        }

        let code = lines.iter().map(|l| l.code.as_str()).collect::<Vec<_>>().join("\n");

        let mut source = SourceText {
            text,
            language,
            lines,
            code,
            block_ends,
            functions: Vec::new(),
            classes: Vec::new(),
        };
        source.functions = source.find_functions();
        source.classes = source.find_classes();
        source
    }

    pub fn lines(&self) -> &[Line<'a>] {
        &self.lines
    }

    pub fn line(&self, idx: usize) -> &Line<'a> {
        &self.lines[idx]
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Comment-free text of the whole snippet.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn functions(&self) -> &[FunctionSpan] {
        &self.functions
    }

    pub fn classes(&self) -> &[ClassSpan] {
        &self.classes
    }

    pub fn comment_lines(&self) -> usize {
        self.lines.iter().filter(|l| l.is_comment()).count()
    }

    pub fn block_end(&self, idx: usize) -> Option<usize> {
        self.block_ends.get(&idx).copied()
    }

    /// Enclosing block headers, innermost first.
    pub fn ancestors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        let mut current = self.lines.get(idx).and_then(|l| l.parent);
        std::iter::from_fn(move || {
            let found = current?;
            current = self.lines[found].parent;
            Some(found)
        })
    }

    pub fn loop_depth(&self, idx: usize) -> usize {
        self.lines[idx].loop_depth
    }

    pub fn in_loop(&self, idx: usize) -> bool {
        self.lines[idx].loop_depth > 0
    }

    /// Number of enclosing control-flow blocks (functions and classes excluded).
    pub fn control_depth(&self, idx: usize) -> usize {
        self.lines[idx].control_depth
    }

    pub fn enclosing_loop(&self, idx: usize) -> Option<usize> {
        self.lines[idx].loop_header
    }

    pub fn enclosing_function(&self, idx: usize) -> Option<&FunctionSpan> {
        // innermost span wins for nested functions
        self.functions
            .iter()
            .filter(|f| f.contains(idx))
            .max_by_key(|f| f.start)
    }

    /// Indices of non-blank lines within `radius` lines of `idx`.
    pub fn window(&self, idx: usize, before: usize, after: usize) -> impl Iterator<Item = usize> + '_ {
        let start = idx.saturating_sub(before);
        let end = (idx + after).min(self.lines.len().saturating_sub(1));
        (start..=end).filter(move |&i| !self.lines[i].is_blank())
    }

    /// Next non-blank line after `idx`.
    pub fn next_code_line(&self, idx: usize) -> Option<usize> {
        (idx + 1..self.lines.len()).find(|&i| !self.lines[i].is_blank())
    }

    fn find_functions(&self) -> Vec<FunctionSpan> {
        let mut spans = Vec::new();
        for (idx, line) in self.lines.iter().enumerate() {
            let head = header_text(&line.bare);
            let inline = self.is_inline_function(&line.bare);
            if head.is_empty() || (head.ends_with(';') && !inline) {
                continue;
            }
            let Some((name, name_end)) = self.function_name(&line.bare) else {
                continue;
            };
            let end = match self.block_end(idx) {
                Some(end) => end,
                // 单行函数: start == end
                None if inline => idx,
                None => continue,
            };
            let params = self.count_params(idx, name_end);
            spans.push(FunctionSpan { name, start: idx, end, params });
        }
        spans
    }

    fn is_inline_function(&self, bare: &str) -> bool {
        match self.language {
            Language::Python => PY_INLINE_FUNC.is_match(bare),
            Language::JavaScript | Language::TypeScript => JS_INLINE_ARROW.is_match(bare),
            _ => false,
        }
    }

    /// Function name and the byte offset right after it.
    fn function_name(&self, bare: &str) -> Option<(String, usize)> {
        let captures = match self.language {
            Language::Python => PY_FUNC.captures(bare),
            Language::JavaScript | Language::TypeScript => {
                JS_FUNC.iter().find_map(|re| re.captures(bare))
            }
            _ => TYPED_FUNC.captures(bare),
        }?;
        let name = captures.get(1)?;
        let prefix = &bare[..name.start()];
        if NOT_A_FUNCTION.contains(&name.as_str())
            || (prefix.contains('=') && !self.language.is_ecmascript())
            || prefix
                .split_whitespace()
                .any(|w| matches!(w, "new" | "return" | "throw" | "else" | "await"))
        {
            return None;
        }
        Some((name.as_str().to_string(), name.end()))
    }

    fn count_params(&self, idx: usize, from: usize) -> usize {
        // 参数列表可能跨多行
        let track_angles = matches!(self.language, Language::Java | Language::CSharp | Language::Cpp);
        let mut depth = 0i32;
        let mut started = false;
        let mut commas = 0;
        let mut content = false;
        let mut first = String::new();
        let lookahead = (idx + 8).min(self.lines.len());

        for (i, line) in self.lines[idx..lookahead].iter().enumerate() {
            let text = if i == 0 { line.bare.get(from..).unwrap_or("") } else { line.bare.as_str() };
            for c in text.chars() {
                if !started {
                    if c == '(' {
                        started = true;
                        depth = 1;
                    }
                    continue;
                }
                match c {
                    '(' | '[' | '{' => depth += 1,
                    '<' if track_angles => depth += 1,
                    ')' | ']' | '}' => {
                        depth -= 1;
                        if depth == 0 {
                            return self.param_total(commas, content, &first);
                        }
                    }
                    '>' if track_angles => depth -= 1,
                    ',' if depth == 1 => commas += 1,
                    _ => {}
                }
                if !c.is_whitespace() && c != ',' {
                    content = true;
                    if commas == 0 {
                        first.push(c);
                    }
                }
            }
        }
        self.param_total(commas, content, &first)
    }

    fn param_total(&self, commas: usize, content: bool, first: &str) -> usize {
        if !content || first == "void" {
            return 0;
        }
        let total = commas + 1;
        if self.language == Language::Python && (first.starts_with("self") || first.starts_with("cls")) {
            total - 1
        } else {
            total
        }
    }

    fn find_classes(&self) -> Vec<ClassSpan> {
        let re: &Regex = match self.language {
            Language::Python => &PY_CLASS,
            Language::JavaScript | Language::TypeScript => &JS_CLASS,
            _ => &TYPED_CLASS,
        };
        self.lines
            .iter()
            .enumerate()
            .filter_map(|(idx, line)| {
                let name = re.captures(&line.bare)?.get(1)?.as_str().to_string();
                let end = self.block_end(idx)?;
                Some(ClassSpan { name, start: idx, end })
            })
            .collect()
    }
}

/// Line text with leading closing braces and whitespace removed.
fn header_text(bare: &str) -> &str {
    bare.trim_start_matches(|c: char| c == '}' || c.is_whitespace()).trim_end()
}

fn resolve_indent_blocks(lines: &mut [Line<'_>]) -> HashMap<usize, usize> {
    let mut ends = HashMap::new();
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut last_code = 0;

    for idx in 0..lines.len() {
        if lines[idx].is_blank() {
            lines[idx].depth = stack.len();
            lines[idx].parent = stack.last().map(|&(_, h)| h);
            continue;
        }
        let indent = lines[idx].indent;
        while let Some(&(open_indent, header)) = stack.last() {
            if open_indent < indent {
                break;
            }
            stack.pop();
            ends.insert(header, last_code);
        }
        lines[idx].depth = stack.len();
        lines[idx].parent = stack.last().map(|&(_, h)| h);
        if lines[idx].bare.trim_end().ends_with(':') {
            stack.push((indent, idx));
        }
        last_code = idx;
    }
    for (_, header) in stack {
        ends.insert(header, last_code);
    }
    ends
}

fn resolve_brace_blocks(lines: &mut [Line<'_>]) -> HashMap<usize, usize> {
    let mut ends: HashMap<usize, usize> = HashMap::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut last_code: Option<usize> = None;

    for idx in 0..lines.len() {
        if lines[idx].is_blank() {
            lines[idx].depth = stack.len();
            lines[idx].parent = stack.last().copied();
            continue;
        }
        let bare = lines[idx].bare.clone();
        let trimmed = bare.trim_start();
        let leading = trimmed.chars().take_while(|&c| c == '}').count();
        for _ in 0..leading {
            if let Some(header) = stack.pop() {
                record_end(&mut ends, header, idx);
            }
        }
        lines[idx].depth = stack.len();
        lines[idx].parent = stack.last().copied();

        let rest = &trimmed[leading..];
        let opener = if rest.trim_start().starts_with('{') {
            last_code.unwrap_or(idx)
        } else {
            idx
        };
        for c in rest.chars() {
            match c {
                '{' => stack.push(opener),
                '}' => {
                    if let Some(header) = stack.pop() {
                        record_end(&mut ends, header, idx);
                    }
                }
                _ => {}
            }
        }
        last_code = Some(idx);
    }
    let last = lines.len().saturating_sub(1);
    for header in stack {
        record_end(&mut ends, header, last);
    }
    ends
}

fn record_end(ends: &mut HashMap<usize, usize>, header: usize, end: usize) {
    let slot = ends.entry(header).or_insert(end);
    if end > *slot {
        *slot = end;
    }
}

// ============================================================================
// Lexer - 去注释 / 遮蔽字符串
// ============================================================================

struct Lexer {
    language: Language,
    in_block_comment: bool,
    in_triple: Option<char>,
}

impl Lexer {
    fn new(language: Language) -> Self {
        Self { language, in_block_comment: false, in_triple: None }
    }

    fn strip(&mut self, raw: &str) -> (String, String) {
        let chars: Vec<char> = raw.chars().collect();
        let mut code = String::with_capacity(raw.len());
        let mut bare = String::with_capacity(raw.len());
        let mut quote: Option<char> = None;
        let line_comment = self.language.line_comment();
        let block = self.language.block_comment();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];

            if self.in_block_comment {
                if let Some((_, close)) = block {
                    if starts_with(&chars, i, close) {
                        self.in_block_comment = false;
                        push_blank(&mut code, &mut bare, close.len());
                        i += close.len();
                        continue;
                    }
                }
                push_blank(&mut code, &mut bare, 1);
                i += 1;
                continue;
            }

            if let Some(q) = self.in_triple {
                if c == q && chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q) {
                    for _ in 0..3 {
                        code.push(q);
                        bare.push(q);
                    }
                    self.in_triple = None;
                    i += 3;
                } else {
                    code.push(c);
                    bare.push(' ');
                    i += 1;
                }
                continue;
            }

            if let Some(q) = quote {
                if c == '\\' && i + 1 < chars.len() {
                    code.push(c);
                    code.push(chars[i + 1]);
                    bare.push_str("  ");
                    i += 2;
                    continue;
                }
                code.push(c);
                if c == q {
                    quote = None;
                    bare.push(c);
                } else {
                    bare.push(' ');
                }
                i += 1;
                continue;
            }

            if self.language == Language::Python
                && (c == '"' || c == '\'')
                && chars.get(i + 1) == Some(&c)
                && chars.get(i + 2) == Some(&c)
            {
                for _ in 0..3 {
                    code.push(c);
                    bare.push(c);
                }
                self.in_triple = Some(c);
                i += 3;
                continue;
            }

            if c == '"' || c == '\'' || (c == '`' && self.language.is_ecmascript()) {
                quote = Some(c);
                code.push(c);
                bare.push(c);
                i += 1;
                continue;
            }

            if starts_with(&chars, i, line_comment) {
                break;
            }

            if let Some((open, _)) = block {
                if starts_with(&chars, i, open) {
                    self.in_block_comment = true;
                    push_blank(&mut code, &mut bare, open.len());
                    i += open.len();
                    continue;
                }
            }

            code.push(c);
            bare.push(c);
            i += 1;
        }

        (code, bare)
    }
}

fn starts_with(chars: &[char], at: usize, needle: &str) -> bool {
    let mut offset = at;
    for n in needle.chars() {
        if chars.get(offset) != Some(&n) {
            return false;
        }
        offset += 1;
    }
    true
}

fn push_blank(code: &mut String, bare: &mut String, n: usize) {
    for _ in 0..n {
        code.push(' ');
        bare.push(' ');
    }
}
