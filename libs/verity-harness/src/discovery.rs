//! Static discovery of the submission's entry point.
//!
//! The Invocable is the first top-level `def` or `class` in source order
//! whose name is not one of the harness-provided names below. Nothing is
//! imported or executed to find it.

use thiserror::Error;

/// Names the sandbox namespace provides, plus helper names from the legacy
/// harness that submissions sometimes redefine.
pub const EXCLUDED_NAMES: &[&str] = &[
    "ListNode",
    "TreeNode",
    "Node",
    "null",
    "true",
    "false",
    "run_tests_internal",
    "list_to_ll",
    "ll_to_list",
    "list_to_tree",
    "tree_to_list",
    "adj_to_graph",
    "graph_to_adj",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    #[error("No function/class found. Please define a function or class.")]
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocableKind {
    Function,
    Class,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub name: String,
    /// Declared parameters without the receiver.
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocable {
    pub name: String,
    pub kind: InvocableKind,
    /// Function parameters; empty for classes.
    pub params: Vec<String>,
    /// Methods defined directly in the class body, in source order.
    pub methods: Vec<Method>,
}

impl Invocable {
    pub fn is_class(&self) -> bool {
        self.kind == InvocableKind::Class
    }

    /// The method a single-method class is called through: alphabetically
    /// first, ignoring `_private` and `__dunder__` names.
    pub fn entry_method(&self) -> Option<&Method> {
        self.methods
            .iter()
            .filter(|m| !m.name.starts_with('_'))
            .min_by(|a, b| a.name.cmp(&b.name))
    }
}

pub fn discover(source: &str) -> Result<Invocable, DiscoveryError> {
    let lines = logical_lines(source);
    let mut i = 0;

    while i < lines.len() {
        let line = &lines[i];
        i += 1;
        if line.indent != 0 {
            continue;
        }

        if let Some((name, params)) = parse_def(&line.text) {
            if !EXCLUDED_NAMES.contains(&name.as_str()) {
                return Ok(Invocable {
                    name,
                    kind: InvocableKind::Function,
                    params,
                    methods: Vec::new(),
                });
            }
            continue;
        }

        if let Some(name) = parse_class(&line.text) {
            if EXCLUDED_NAMES.contains(&name.as_str()) {
                continue;
            }
            let body_start = i;
            while i < lines.len() && lines[i].indent > 0 {
                i += 1;
            }
            return Ok(Invocable {
                name,
                kind: InvocableKind::Class,
                params: Vec::new(),
                methods: class_methods(&lines[body_start..i]),
            });
        }
    }

    Err(DiscoveryError::NotFound)
}

fn class_methods(body: &[LogicalLine]) -> Vec<Method> {
    let Some(level) = body.first().map(|l| l.indent) else {
        return Vec::new();
    };
    body.iter()
        .filter(|l| l.indent == level)
        .filter_map(|l| parse_def(&l.text))
        .map(|(name, mut params)| {
            if matches!(params.first().map(String::as_str), Some("self") | Some("cls")) {
                params.remove(0);
            }
            Method { name, params }
        })
        .collect()
}

fn parse_def(text: &str) -> Option<(String, Vec<String>)> {
    let rest = text.strip_prefix("async ").map(str::trim_start).unwrap_or(text);
    let rest = rest.strip_prefix("def ")?.trim_start();
    let (name, rest) = split_ident(rest)?;
    let rest = rest.trim_start().strip_prefix('(')?;
    let close = matching_paren(rest)?;
    Some((name.to_string(), parse_params(&rest[..close])))
}

fn parse_class(text: &str) -> Option<String> {
    let rest = text.strip_prefix("class ")?.trim_start();
    let (name, rest) = split_ident(rest)?;
    matches!(rest.trim_start().chars().next(), Some('(') | Some(':')).then(|| name.to_string())
}

fn split_ident(text: &str) -> Option<(&str, &str)> {
    let end = text
        .char_indices()
        .find(|&(_, c)| !(c.is_alphanumeric() || c == '_'))
        .map_or(text.len(), |(i, _)| i);
    let first = text.chars().next()?;
    if end == 0 || first.is_ascii_digit() {
        return None;
    }
    Some(text.split_at(end))
}

/// Byte offset of the `)` closing an already-opened parenthesis.
fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parameter names from a parameter list: annotations, defaults and the
/// `/`, `*`, `*args`, `**kwargs` markers are dropped.
fn parse_params(list: &str) -> Vec<String> {
    split_top_level(list, ',')
        .into_iter()
        .filter_map(|param| {
            let param = param.trim();
            if param.is_empty() || param.starts_with('*') || param == "/" {
                return None;
            }
            let name = split_top_level(param, ':')
                .into_iter()
                .next()
                .and_then(|p| split_top_level(p, '=').into_iter().next())?
                .trim()
                .to_string();
            (!name.is_empty()).then_some(name)
        })
        .collect()
}

fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            c if c == sep && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

#[derive(Debug)]
struct LogicalLine {
    indent: usize,
    text: String,
}

/// Source lines with comments, blank lines and triple-quoted string bodies
/// removed, and bracketed continuations joined onto their first line.
fn logical_lines(source: &str) -> Vec<LogicalLine> {
    let mut out: Vec<LogicalLine> = Vec::new();
    let mut in_triple: Option<&str> = None;
    let mut pending: Option<(usize, String, i32)> = None;

    for raw in source.lines() {
        let mut line = raw;

        if let Some(delim) = in_triple {
            match line.find(delim) {
                Some(pos) => {
                    in_triple = None;
                    line = &line[pos + 3..];
                    if line.trim().is_empty() {
                        continue;
                    }
                }
                None => continue,
            }
        }

        let code = strip_comment(line);
        if code.trim().is_empty() {
            continue;
        }

        for delim in ["\"\"\"", "'''"] {
            if code.matches(delim).count() % 2 == 1 {
                in_triple = Some(delim);
            }
        }

        let balance = bracket_balance(code);
        match pending.take() {
            Some((indent, mut text, depth)) => {
                text.push(' ');
                text.push_str(code.trim());
                let depth = depth + balance;
                if depth > 0 {
                    pending = Some((indent, text, depth));
                } else {
                    out.push(LogicalLine { indent, text });
                }
            }
            None => {
                let indent = code.len() - code.trim_start().len();
                let text = code.trim().to_string();
                if balance > 0 {
                    pending = Some((indent, text, balance));
                } else {
                    out.push(LogicalLine { indent, text });
                }
            }
        }
    }

    if let Some((indent, text, _)) = pending {
        out.push(LogicalLine { indent, text });
    }
    out
}

fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '#') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn bracket_balance(code: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    for c in code.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_function_with_annotations_and_defaults() {
        let src = "from typing import List\n\ndef twoSum(nums: List[int], target: int = 0, *, flag=None, **kw) -> List[int]:\n    return []\n";
        let inv = discover(src).unwrap();
        assert_eq!(inv.name, "twoSum");
        assert_eq!(inv.kind, InvocableKind::Function);
        assert_eq!(inv.params, vec!["nums", "target", "flag"]);
    }

    #[test]
    fn test_class_methods_drop_self() {
        let src = r#"
class Solution:
    """Docstring mentioning
def notReal(x):
    """
    def twoSum(self, nums, target):
        def inner(a):
            return a
        return []

    def _helper(self, x):
        pass
"#;
        let inv = discover(src).unwrap();
        assert!(inv.is_class());
        assert_eq!(inv.name, "Solution");
        assert_eq!(inv.methods.len(), 2);
        assert_eq!(inv.methods[0].params, vec!["nums", "target"]);
        assert_eq!(inv.entry_method().unwrap().name, "twoSum");
    }

    #[test]
    fn test_entry_method_is_alphabetical() {
        let src = "class Solution:\n    def solve(self, x): pass\n    def __init__(self): pass\n    def build(self, y): pass\n";
        let inv = discover(src).unwrap();
        assert_eq!(inv.entry_method().unwrap().name, "build");
    }

    #[test]
    fn test_harness_names_are_skipped() {
        let src = "class ListNode:\n    def __init__(self, val=0, next=None):\n        self.val = val\n\ndef list_to_ll(a):\n    pass\n\ndef reverseList(head):\n    return head\n";
        let inv = discover(src).unwrap();
        assert_eq!(inv.name, "reverseList");
        assert_eq!(inv.params, vec!["head"]);
    }

    #[test]
    fn test_multiline_signature() {
        let src = "def merge(\n    nums1: list,  # first\n    m: int,\n    nums2,\n    n,\n) -> None:\n    pass\n";
        assert_eq!(discover(src).unwrap().params, vec!["nums1", "m", "nums2", "n"]);
    }

    #[test]
    fn test_nothing_found() {
        assert_eq!(discover("x = 1\nprint(x)\n"), Err(DiscoveryError::NotFound));
        assert_eq!(
            discover("").unwrap_err().to_string(),
            "No function/class found. Please define a function or class."
        );
    }
}
