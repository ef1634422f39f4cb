//! Test-case parser.
//!
//! Test-case text is "almost code": usually a LeetCode-style assignment
//! list (`nums = [2,7,11,15], target = 9`), sometimes a real statement
//! sequence (`a = [1]; b = 2`), occasionally an imperative script that
//! constructs and calls the submission inline. Two explicit stages handle it:
//!
//! 1. the text as a statement sequence over a literal grammar;
//! 2. on a structural failure only, the same text with top-level commas that
//!    precede `name =` rewritten into statement separators.
//!
//! When either stage meets something that is code rather than a literal
//! (a call, an operator, an unknown name) the input is handed to the sandbox
//! as a [`ParsedInput::Script`], with the stage-2 text as its fallback.

use crate::value::Value;
use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error("not a literal: {0}")]
    NotLiteral(String),
}

/// Names bound by evaluating a test input, in assignment order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalScope {
    entries: Vec<(String, Value)>,
}

impl LocalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-binding a name keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for LocalScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedInput {
    /// Fully evaluated on the host.
    Literal {
        scope: LocalScope,
        /// Value of a trailing bare expression, if the text ends in one.
        last_expr: Option<Value>,
    },
    /// Needs a real interpreter; executed inside the sandbox.
    Script {
        source: String,
        /// Comma-normalized text to run when `source` is not valid code.
        fallback: Option<String>,
        /// Names the script assigns at statement level, in order.
        assigned: Vec<String>,
    },
}

impl ParsedInput {
    /// Names available for argument binding.
    pub fn names(&self) -> Vec<&str> {
        match self {
            ParsedInput::Literal { scope, .. } => scope.names().collect(),
            ParsedInput::Script { assigned, .. } => assigned.iter().map(String::as_str).collect(),
        }
    }
}

/// What a case's `output` text asks the comparator to check.
#[derive(Debug, Clone, PartialEq)]
pub enum Expected {
    /// Blank output: execute only, always passes.
    Nothing,
    Value(Value),
    /// `k, name = [...]`: returned count plus the prefix of array `name`.
    Slice { count: i64, name: String, slice: Value },
    /// Not a literal; compared against the actual value's string form.
    Opaque(String),
}

impl Expected {
    pub fn display(&self) -> String {
        match self {
            Expected::Nothing => "(custom - no expected)".to_string(),
            Expected::Value(v) => v.to_string(),
            Expected::Slice { count, name, slice } => format!("{}, {} = {}", count, name, slice),
            Expected::Opaque(s) => s.clone(),
        }
    }
}

pub fn parse_input(text: &str) -> Result<ParsedInput, ParseError> {
    let tier1 = parse_program(text);
    let tier1_err = match tier1 {
        Ok((scope, last_expr)) => return Ok(ParsedInput::Literal { scope, last_expr }),
        Err(e) => e,
    };

    let normalized = normalize_commas(text);

    if let ParseError::NotLiteral(_) = tier1_err {
        return Ok(script(text, normalized));
    }

    let Some(rewritten) = normalized else {
        return if looks_like_code(text) {
            Ok(script(text, None))
        } else {
            Err(tier1_err)
        };
    };

    match parse_program(&rewritten) {
        Ok((scope, _)) => Ok(ParsedInput::Literal {
            scope,
            last_expr: None,
        }),
        Err(ParseError::NotLiteral(_)) => Ok(script(text, Some(rewritten))),
        Err(_) if looks_like_code(text) => Ok(script(text, Some(rewritten))),
        Err(_) => Err(tier1_err),
    }
}

pub fn parse_expected(text: &str) -> Expected {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Expected::Nothing;
    }

    if let Some(caps) = slice_pattern().captures(trimmed) {
        let count = caps[1].parse::<i64>().ok();
        let mut placeholders = LocalScope::new();
        placeholders.insert("_", Value::Str("_".to_string()));
        let slice = parse_expression(&caps[3], &placeholders).ok();
        if let (Some(count), Some(slice)) = (count, slice) {
            return Expected::Slice {
                count,
                name: caps[2].to_string(),
                slice,
            };
        }
    }

    match parse_expression(trimmed, &LocalScope::new()) {
        Ok(value) => Expected::Value(value),
        Err(_) => Expected::Opaque(trimmed.to_string()),
    }
}

/// A single expression (a bare tuple allowed), evaluated against `scope`.
pub fn parse_expression(text: &str, scope: &LocalScope) -> Result<Value, ParseError> {
    let tokens = lex(text)?;
    let mut parser = Parser::new(&tokens, text.len());
    parser.skip_separators();
    let expr = parser.expr_list()?;
    parser.skip_separators();
    if !parser.at_end() {
        return parser.unexpected();
    }
    eval(&expr, scope)
}

fn slice_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^(\d+),\s*([A-Za-z_]\w*)\s*=\s*(.*)$").expect("slice pattern is valid")
    })
}

fn script(text: &str, fallback: Option<String>) -> ParsedInput {
    let mut assigned = assigned_names(text);
    if let Some(fb) = &fallback {
        for name in assigned_names(fb) {
            if !assigned.contains(&name) {
                assigned.push(name);
            }
        }
    }
    ParsedInput::Script {
        source: text.to_string(),
        fallback,
        assigned,
    }
}

/// Statement-level assignment targets (`a = ...`, `a, b = ...`).
fn assigned_names(text: &str) -> Vec<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z_]\w*(?:\s*,\s*[A-Za-z_]\w*)*)\s*=(?:[^=]|$)")
            .expect("assignment pattern is valid")
    });

    let mut names = Vec::new();
    for stmt in text.split(['\n', ';']) {
        if let Some(caps) = pattern.captures(stmt) {
            for name in caps[1].split(',').map(str::trim) {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
    }
    names
}

fn looks_like_code(text: &str) -> bool {
    match lex(text) {
        Ok(tokens) => tokens.windows(2).any(|w| {
            matches!(w[0].tok, Tok::Ident(_)) && matches!(w[1].tok, Tok::LParen)
        }) || tokens.iter().any(|t| matches!(t.tok, Tok::Code(_))),
        Err(_) => false,
    }
}

/// Rewrite top-level `, name =` into `; name =`. `None` when nothing matched.
pub fn normalize_commas(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut changed = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match c {
            '\'' | '"' => quote = Some(c),
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 && precedes_assignment(&chars[i + 1..]) => {
                out.push(';');
                changed = true;
                i += 1;
                continue;
            }
            _ => {}
        }
        out.push(c);
        i += 1;
    }

    changed.then_some(out)
}

fn precedes_assignment(rest: &[char]) -> bool {
    let mut j = 0;
    while j < rest.len() && rest[j].is_whitespace() {
        j += 1;
    }
    if j >= rest.len() || !(rest[j].is_alphabetic() || rest[j] == '_') {
        return false;
    }
    while j < rest.len() && (rest[j].is_alphanumeric() || rest[j] == '_') {
        j += 1;
    }
    while j < rest.len() && rest[j].is_whitespace() {
        j += 1;
    }
    j < rest.len() && rest[j] == '=' && rest.get(j + 1) != Some(&'=')
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Assign,
    Semi,
    Newline,
    Minus,
    Plus,
    /// Anything that only makes sense in general code.
    Code(String),
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
}

const KEYWORDS: &[&str] = &[
    "and", "as", "assert", "async", "await", "break", "class", "continue", "def", "del", "elif",
    "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is", "lambda",
    "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

fn lex(text: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut i = 0;

    let at = |i: usize| chars.get(i).map(|&(_, c)| c);
    let offset_of = |i: usize| chars.get(i).map_or(text.len(), |&(o, _)| o);

    while i < chars.len() {
        let (offset, c) = chars[i];
        let mut push = |tok: Tok| tokens.push(Token { tok, offset });

        match c {
            ' ' | '\t' | '\r' => i += 1,
            '#' => {
                while i < chars.len() && chars[i].1 != '\n' {
                    i += 1;
                }
            }
            '\\' if at(i + 1) == Some('\n') => i += 2,
            '\n' => {
                if depth == 0 {
                    push(Tok::Newline);
                }
                i += 1;
            }
            '[' | '(' => {
                depth += 1;
                push(if c == '[' { Tok::LBracket } else { Tok::LParen });
                i += 1;
            }
            ']' | ')' => {
                depth = depth.saturating_sub(1);
                push(if c == ']' { Tok::RBracket } else { Tok::RParen });
                i += 1;
            }
            ',' => {
                push(Tok::Comma);
                i += 1;
            }
            ';' => {
                push(Tok::Semi);
                i += 1;
            }
            '=' if at(i + 1) == Some('=') => {
                push(Tok::Code("==".to_string()));
                i += 2;
            }
            '=' => {
                push(Tok::Assign);
                i += 1;
            }
            '-' | '+' if at(i + 1) == Some('=') => {
                push(Tok::Code(format!("{}=", c)));
                i += 2;
            }
            '-' => {
                push(Tok::Minus);
                i += 1;
            }
            '+' => {
                push(Tok::Plus);
                i += 1;
            }
            '\'' | '"' => {
                let (s, next) = lex_string(&chars, i, text.len())?;
                push(Tok::Str(s));
                i = next;
            }
            c if c.is_ascii_digit() || (c == '.' && at(i + 1).map_or(false, |d| d.is_ascii_digit())) => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_' || chars[i].1 == '.'
                    || ((chars[i].1 == '+' || chars[i].1 == '-') && matches!(chars[i - 1].1, 'e' | 'E')
                        && !text[offset_of(start)..offset_of(i)].starts_with("0x")))
                {
                    i += 1;
                }
                let raw = &text[offset_of(start)..offset_of(i)];
                push(lex_number(raw));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let word = &text[offset_of(start)..offset_of(i)];
                let quoted = matches!(at(i), Some('\'') | Some('"'));
                if quoted && matches!(word, "r" | "R" | "u" | "U") {
                    let (s, next) = lex_string(&chars, i, text.len())?;
                    push(Tok::Str(s));
                    i = next;
                } else if quoted && word.len() <= 2 {
                    // f-strings, byte strings: general code
                    push(Tok::Code(word.to_string()));
                } else if KEYWORDS.contains(&word) {
                    push(Tok::Code(word.to_string()));
                } else {
                    push(Tok::Ident(word.to_string()));
                }
            }
            '!' | '<' | '>' if at(i + 1) == Some('=') => {
                push(Tok::Code(format!("{}=", c)));
                i += 2;
            }
            other => {
                push(Tok::Code(other.to_string()));
                i += 1;
            }
        }
    }

    Ok(tokens)
}

fn lex_number(raw: &str) -> Tok {
    let cleaned = raw.replace('_', "");
    let lower = cleaned.to_ascii_lowercase();
    let radix = match lower.get(..2) {
        Some("0x") => Some(16),
        Some("0o") => Some(8),
        Some("0b") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        return i64::from_str_radix(&lower[2..], radix)
            .map(Tok::Int)
            .unwrap_or_else(|_| Tok::Code(raw.to_string()));
    }
    if !lower.contains(['.', 'e']) {
        if let Ok(i) = lower.parse::<i64>() {
            return Tok::Int(i);
        }
    }
    lower
        .parse::<f64>()
        .map(Tok::Float)
        .unwrap_or_else(|_| Tok::Code(raw.to_string()))
}

fn lex_string(chars: &[(usize, char)], start: usize, end_offset: usize) -> Result<(String, usize), ParseError> {
    let quote = chars[start].1;
    let triple = chars.get(start + 1).map(|p| p.1) == Some(quote)
        && chars.get(start + 2).map(|p| p.1) == Some(quote);
    let mut i = if triple { start + 3 } else { start + 1 };
    let mut out = String::new();

    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            if !triple {
                return Ok((out, i + 1));
            }
            if chars.get(i + 1).map(|p| p.1) == Some(quote) && chars.get(i + 2).map(|p| p.1) == Some(quote) {
                return Ok((out, i + 3));
            }
        }
        if c == '\n' && !triple {
            break;
        }
        if c == '\\' {
            let Some(&(_, esc)) = chars.get(i + 1) else {
                break;
            };
            match esc {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' | '\'' | '"' => out.push(esc),
                '\n' => {}
                'x' | 'u' => {
                    let width = if esc == 'x' { 2 } else { 4 };
                    let digits: String = chars.iter().skip(i + 2).take(width).map(|p| p.1).collect();
                    match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                        Some(ch) if digits.len() == width => {
                            out.push(ch);
                            i += 2 + width;
                            continue;
                        }
                        _ => {
                            out.push('\\');
                            out.push(esc);
                        }
                    }
                }
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
            i += 2;
            continue;
        }
        out.push(c);
        i += 1;
    }

    Err(ParseError::Syntax {
        offset: chars.get(start).map_or(end_offset, |p| p.0),
        message: "unterminated string literal".to_string(),
    })
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expr {
    Lit(Value),
    Name(String),
    List(Vec<Expr>),
}

struct Stmt {
    /// Chained targets (`a = b = ...`); each entry unpacks a tuple of names.
    targets: Vec<Vec<String>>,
    value: Expr,
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    end_offset: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], end_offset: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            end_offset,
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end_offset, |t| t.offset)
    }

    fn syntax<T>(&self, message: &str) -> Result<T, ParseError> {
        Err(ParseError::Syntax {
            offset: self.offset(),
            message: message.to_string(),
        })
    }

    /// Operators and code tokens mean "this is a program", anything else is
    /// malformed.
    fn unexpected<T>(&self) -> Result<T, ParseError> {
        match self.peek() {
            Some(Tok::Code(c)) => Err(ParseError::NotLiteral(c.clone())),
            Some(Tok::Minus) | Some(Tok::Plus) => Err(ParseError::NotLiteral("arithmetic".to_string())),
            Some(Tok::LParen) => Err(ParseError::NotLiteral("call".to_string())),
            Some(Tok::LBracket) => Err(ParseError::NotLiteral("subscript".to_string())),
            None => self.syntax("unexpected end of input"),
            Some(_) => self.syntax("unexpected token"),
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(Tok::Semi) | Some(Tok::Newline)) {
            self.pos += 1;
        }
    }

    fn program(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        loop {
            self.skip_separators();
            if self.at_end() {
                break;
            }
            stmts.push(self.statement()?);
            match self.peek() {
                None | Some(Tok::Semi) | Some(Tok::Newline) => {}
                _ => return self.unexpected(),
            }
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        let mut parts = vec![(self.offset(), self.expr_list()?)];
        while matches!(self.peek(), Some(Tok::Assign)) {
            self.pos += 1;
            parts.push((self.offset(), self.expr_list()?));
        }

        let (_, value) = parts.remove(parts.len() - 1);
        let mut targets = Vec::with_capacity(parts.len());
        for (offset, target) in parts {
            targets.push(target_names(target).ok_or_else(|| ParseError::Syntax {
                offset,
                message: "cannot assign to literal".to_string(),
            })?);
        }
        Ok(Stmt { targets, value })
    }

    fn starts_expr(&self) -> bool {
        matches!(
            self.peek(),
            Some(Tok::Ident(_))
                | Some(Tok::Int(_))
                | Some(Tok::Float(_))
                | Some(Tok::Str(_))
                | Some(Tok::LBracket)
                | Some(Tok::LParen)
                | Some(Tok::Minus)
                | Some(Tok::Plus)
                | Some(Tok::Code(_))
        )
    }

    /// `a` or `a, b, ...` (a tuple, trailing comma allowed).
    fn expr_list(&mut self) -> Result<Expr, ParseError> {
        let first = self.expr()?;
        if !matches!(self.peek(), Some(Tok::Comma)) {
            return Ok(first);
        }
        let mut items = vec![first];
        while matches!(self.peek(), Some(Tok::Comma)) {
            self.pos += 1;
            if !self.starts_expr() {
                break;
            }
            items.push(self.expr()?);
        }
        Ok(Expr::List(items))
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let sign = match self.peek() {
            Some(Tok::Minus) => {
                self.pos += 1;
                Some(-1)
            }
            Some(Tok::Plus) => {
                self.pos += 1;
                Some(1)
            }
            _ => None,
        };

        let atom = self.atom()?;

        // calls, subscripts, attribute access, binary operators
        if matches!(
            self.peek(),
            Some(Tok::LParen) | Some(Tok::LBracket) | Some(Tok::Code(_)) | Some(Tok::Minus) | Some(Tok::Plus)
        ) {
            return self.unexpected();
        }

        match (sign, atom) {
            (None, atom) => Ok(atom),
            (Some(s), Expr::Lit(Value::Int(i))) => Ok(Expr::Lit(
                i.checked_mul(s).map_or(Value::Float(-(i as f64)), Value::Int),
            )),
            (Some(s), Expr::Lit(Value::Float(f))) => Ok(Expr::Lit(Value::Float(f * s as f64))),
            (Some(_), _) => Err(ParseError::NotLiteral("unary operator".to_string())),
        }
    }

    fn atom(&mut self) -> Result<Expr, ParseError> {
        let Some(tok) = self.peek().cloned() else {
            return self.syntax("unexpected end of input");
        };

        match tok {
            Tok::Int(i) => {
                self.pos += 1;
                Ok(Expr::Lit(Value::Int(i)))
            }
            Tok::Float(f) => {
                self.pos += 1;
                Ok(Expr::Lit(Value::Float(f)))
            }
            Tok::Str(s) => {
                self.pos += 1;
                let mut joined = s;
                while let Some(Tok::Str(next)) = self.peek() {
                    joined.push_str(next);
                    self.pos += 1;
                }
                Ok(Expr::Lit(Value::Str(joined)))
            }
            Tok::Ident(name) => {
                self.pos += 1;
                Ok(Expr::Name(name))
            }
            Tok::LBracket => {
                self.pos += 1;
                let items = self.sequence(|t| matches!(t, Tok::RBracket))?;
                Ok(Expr::List(items))
            }
            Tok::LParen => {
                self.pos += 1;
                if matches!(self.peek(), Some(Tok::RParen)) {
                    self.pos += 1;
                    return Ok(Expr::List(Vec::new()));
                }
                let inner = self.expr_list()?;
                if !matches!(self.peek(), Some(Tok::RParen)) {
                    return self.unexpected_or("expected `)`");
                }
                self.pos += 1;
                Ok(inner)
            }
            Tok::Code(c) => Err(ParseError::NotLiteral(c)),
            _ => self.syntax("expected a value"),
        }
    }

    fn unexpected_or<T>(&self, message: &str) -> Result<T, ParseError> {
        match self.peek() {
            Some(Tok::Code(_)) | Some(Tok::Minus) | Some(Tok::Plus) | Some(Tok::LParen) | Some(Tok::LBracket) => {
                self.unexpected()
            }
            _ => self.syntax(message),
        }
    }

    /// Comma-separated expressions up to (and consuming) the closing token.
    fn sequence(&mut self, closes: impl Fn(&Tok) -> bool) -> Result<Vec<Expr>, ParseError> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(t) if closes(t) => {
                    self.pos += 1;
                    return Ok(items);
                }
                None => return self.syntax("unclosed bracket"),
                _ => {}
            }
            items.push(self.expr()?);
            match self.peek() {
                Some(Tok::Comma) => self.pos += 1,
                Some(t) if closes(t) => {}
                _ => return self.unexpected_or("expected `,` or closing bracket"),
            }
        }
    }
}

fn target_names(target: Expr) -> Option<Vec<String>> {
    match target {
        Expr::Name(name) => Some(vec![name]),
        Expr::List(items) if !items.is_empty() => items
            .into_iter()
            .map(|item| match item {
                Expr::Name(name) => Some(name),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn constant(name: &str) -> Option<Value> {
    match name {
        "null" | "None" => Some(Value::Null),
        "true" | "True" => Some(Value::Bool(true)),
        "false" | "False" => Some(Value::Bool(false)),
        _ => None,
    }
}

fn eval(expr: &Expr, scope: &LocalScope) -> Result<Value, ParseError> {
    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Name(name) => constant(name)
            .or_else(|| scope.get(name).cloned())
            .ok_or_else(|| ParseError::NotLiteral(format!("name `{}`", name))),
        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
    }
}

fn parse_program(text: &str) -> Result<(LocalScope, Option<Value>), ParseError> {
    let tokens = lex(text)?;
    let stmts = Parser::new(&tokens, text.len()).program()?;

    let mut scope = LocalScope::new();
    let mut last_expr = None;
    let count = stmts.len();

    for (i, stmt) in stmts.into_iter().enumerate() {
        let value = eval(&stmt.value, &scope)?;
        if stmt.targets.is_empty() {
            if i + 1 == count {
                last_expr = Some(value);
            }
            continue;
        }
        for names in stmt.targets {
            bind_names(&mut scope, &names, value.clone())?;
        }
    }

    Ok((scope, last_expr))
}

fn bind_names(scope: &mut LocalScope, names: &[String], value: Value) -> Result<(), ParseError> {
    if let [name] = names {
        scope.insert(name.clone(), value);
        return Ok(());
    }
    match value {
        Value::List(items) if items.len() == names.len() => {
            for (name, item) in names.iter().zip(items) {
                scope.insert(name.clone(), item);
            }
            Ok(())
        }
        other => Err(ParseError::Syntax {
            offset: 0,
            message: format!("cannot unpack {} into {} names", other, names.len()),
        }),
    }
}
