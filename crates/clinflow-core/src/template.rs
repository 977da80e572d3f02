// Sandboxed expression evaluator.
//
// This is a purpose-built evaluator, not an embedded general templating
// engine: it supports variable lookup along a scope chain, `.field`/`[index]`
// access, the fixed operator set of the workflow condition language, and a
// small safe-builtin function set. It has no function *definitions*, no
// imports, and refuses attribute access on any name beginning with `_`.
//
// Used for both `{{ ... }}` template rendering in tool-step inputs and
// condition evaluation in `IfStep`/`LoopStep.in`.

use std::collections::HashMap;

use crate::error::{CoreError, Result};

/// A stack of variable scopes, innermost last. Reads walk inside-out;
/// assignment always targets the innermost (last) scope.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<HashMap<String, serde_json::Value>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self { scopes: vec![HashMap::new()] }
    }

    pub fn with_base(vars: HashMap<String, serde_json::Value>) -> Self {
        Self { scopes: vec![vars] }
    }

    pub fn push_scope(&mut self, vars: HashMap<String, serde_json::Value>) {
        self.scopes.push(vars);
    }

    pub fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    /// Assign in the innermost scope.
    pub fn set(&mut self, name: impl Into<String>, value: serde_json::Value) {
        let name = name.into();
        self.scopes.last_mut().expect("scope stack is never empty").insert(name, value);
    }

    /// Assign in the base (outermost) scope — used for store bindings, which
    /// must survive loop scope pops.
    pub fn set_base(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.scopes[0].insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// All bindings visible right now, outermost first so an inner scope's
    /// shadowing binding wins. Used to snapshot a loop iteration's final
    /// variable state.
    pub fn iter_all(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        let mut flattened: HashMap<&String, &serde_json::Value> = HashMap::new();
        for scope in &self.scopes {
            for (k, v) in scope {
                flattened.insert(k, v);
            }
        }
        flattened.into_iter()
    }
}

const FORBIDDEN_TOKENS: &[&str] = &[
    "import", "eval", "exec", "open", "subprocess", "rm", "drop", "pop", "inplace",
];

fn contains_forbidden_token(text: &str) -> Option<String> {
    let mut ident = String::new();
    let mut check = |ident: &str| -> Option<String> {
        if ident.is_empty() {
            return None;
        }
        if (ident.starts_with("__") && ident.ends_with("__")) || FORBIDDEN_TOKENS.contains(&ident) {
            return Some(ident.to_string());
        }
        None
    };
    for c in text.chars() {
        if c.is_alphanumeric() || c == '_' {
            ident.push(c);
        } else {
            if let Some(found) = check(&ident) {
                return Some(found);
            }
            ident.clear();
        }
    }
    check(&ident)
}

/// The result of rendering a template string: either a re-parsed list or a
/// plain string, per spec.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Value(serde_json::Value),
    Text(String),
}

impl Rendered {
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Rendered::Value(v) => v,
            Rendered::Text(s) => serde_json::Value::String(s),
        }
    }
}

/// The fixed safe-builtin set callable from a template or condition
/// expression. Kept alongside `call_builtin`'s own match arms so a bare
/// compatibility expression is recognized using exactly the names that
/// would actually be callable.
const SAFE_BUILTINS: &[&str] = &["len", "min", "max", "sum", "abs", "round", "str", "int", "float", "bool"];

/// Whether `text`, taken as a whole with no `{{ }}` wrapper, is one of the
/// two bare compatibility forms: a call to a safe builtin (`len(notes)`),
/// or an `x[a:b]` slice (`notes[0:3]`). Plain literal text tokenizes too
/// (a bare identifier, a number, a quoted string) but matches neither
/// shape, so it still falls through to `Rendered::Text`.
fn is_bare_evaluable_expression(text: &str) -> bool {
    let Ok(tokens) = tokenize(text) else {
        return false;
    };
    if tokens.is_empty() {
        return false;
    }
    let has_builtin_call = tokens.iter().enumerate().any(|(i, tok)| {
        matches!(tok, Token::Ident(name) if SAFE_BUILTINS.contains(&name.as_str()))
            && matches!(tokens.get(i + 1), Some(Token::LParen))
    });
    if has_builtin_call {
        return true;
    }
    let mut depth = 0i32;
    let mut saw_slice_colon = false;
    for tok in &tokens {
        match tok {
            Token::LBracket => depth += 1,
            Token::RBracket => depth -= 1,
            Token::Colon if depth == 1 => saw_slice_colon = true,
            _ => {}
        }
    }
    saw_slice_colon
}

/// Render a `{{ ... }}`-templated string against the given scope stack.
pub fn render_template(text: &str, scopes: &ScopeStack, step_id: &str) -> Result<Rendered> {
    if let Some(tok) = contains_forbidden_token(text) {
        return Err(CoreError::template(step_id, format!("forbidden token '{tok}' in expression")));
    }
    if !text.contains("{{") {
        if is_bare_evaluable_expression(text) {
            return Ok(Rendered::Value(eval_expr(text, scopes, step_id)?));
        }
        return Ok(Rendered::Text(text.to_string()));
    }

    let mut out = String::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| CoreError::template(step_id, "unterminated '{{' in template"))?;
        let expr_src = after[..end].trim();
        let value = eval_expr(expr_src, scopes, step_id)?;
        out.push_str(&stringify(&value));
        rest = &after[end + 2..];
    }
    out.push_str(rest);

    let trimmed = out.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        if let Ok(value) = eval_expr(trimmed, scopes, step_id) {
            if value.is_array() {
                return Ok(Rendered::Value(value));
            }
        }
    }
    Ok(Rendered::Text(out))
}

fn stringify(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Evaluate a condition expression (simple truthy, comparison, or logical)
/// against the given scope stack.
pub fn eval_condition(expr: &str, scopes: &ScopeStack, step_id: &str) -> Result<bool> {
    if let Some(tok) = contains_forbidden_token(expr) {
        return Err(CoreError::template(step_id, format!("forbidden token '{tok}' in condition")));
    }
    let value = eval_expr(expr, scopes, step_id)?;
    Ok(truthy(&value))
}

pub fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        serde_json::Value::String(s) => !s.is_empty() && s != "false",
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

/// Evaluate a bare expression (no `{{ }}` wrapper) against the scope stack.
pub fn eval_expr(expr: &str, scopes: &ScopeStack, step_id: &str) -> Result<serde_json::Value> {
    let tokens = tokenize(expr).map_err(|e| CoreError::template(step_id, e))?;
    let mut parser = Parser { tokens: &tokens, pos: 0, scopes, step_id };
    let value = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(CoreError::template(step_id, format!("unexpected trailing input in expression '{expr}'")));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Op(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Colon,
}

fn tokenize(src: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            '[' => { tokens.push(Token::LBracket); i += 1; }
            ']' => { tokens.push(Token::RBracket); i += 1; }
            '.' => { tokens.push(Token::Dot); i += 1; }
            ',' => { tokens.push(Token::Comma); i += 1; }
            ':' => { tokens.push(Token::Colon); i += 1; }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let mut s = String::new();
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err("unterminated string literal".to_string());
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            '=' if chars.get(i + 1) == Some(&'=') => { tokens.push(Token::Op("==".into())); i += 2; }
            '!' if chars.get(i + 1) == Some(&'=') => { tokens.push(Token::Op("!=".into())); i += 2; }
            '<' if chars.get(i + 1) == Some(&'=') => { tokens.push(Token::Op("<=".into())); i += 2; }
            '>' if chars.get(i + 1) == Some(&'=') => { tokens.push(Token::Op(">=".into())); i += 2; }
            '<' => { tokens.push(Token::Op("<".into())); i += 1; }
            '>' => { tokens.push(Token::Op(">".into())); i += 1; }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text.parse().map_err(|_| format!("invalid number '{text}'"))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" | "or" | "not" | "in" | "true" | "false" | "null" | "none" => Token::Op(word),
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{other}' in expression")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    scopes: &'a ScopeStack,
    step_id: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn fail(&self, msg: impl Into<String>) -> CoreError {
        CoreError::template(self.step_id, msg.into())
    }

    fn parse_or(&mut self) -> Result<serde_json::Value> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Op(op)) if op == "or") {
            self.bump();
            let right = self.parse_and()?;
            left = serde_json::Value::Bool(truthy(&left) || truthy(&right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<serde_json::Value> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(Token::Op(op)) if op == "and") {
            self.bump();
            let right = self.parse_not()?;
            left = serde_json::Value::Bool(truthy(&left) && truthy(&right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<serde_json::Value> {
        if matches!(self.peek(), Some(Token::Op(op)) if op == "not") {
            self.bump();
            let value = self.parse_not()?;
            return Ok(serde_json::Value::Bool(!truthy(&value)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<serde_json::Value> {
        let left = self.parse_postfix()?;
        let op = match self.peek() {
            Some(Token::Op(op)) if ["==", "!=", "<", "<=", ">", ">="].contains(&op.as_str()) => op.clone(),
            Some(Token::Op(op)) if op == "in" => op.clone(),
            Some(Token::Op(op)) if op == "not" => {
                // lookahead for "not in"
                if matches!(self.tokens.get(self.pos + 1), Some(Token::Op(o)) if o == "in") {
                    self.bump();
                    self.bump();
                    let right = self.parse_postfix()?;
                    return Ok(serde_json::Value::Bool(!contains(&right, &left)));
                }
                return Ok(left);
            }
            _ => return Ok(left),
        };
        self.bump();
        let right = self.parse_postfix()?;
        Ok(serde_json::Value::Bool(apply_comparison(&op, &left, &right)))
    }

    fn parse_postfix(&mut self) -> Result<serde_json::Value> {
        let mut value = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.bump();
                    let field = match self.bump() {
                        Some(Token::Ident(name)) => name.clone(),
                        _ => return Err(self.fail("expected field name after '.'")),
                    };
                    if field.starts_with('_') {
                        return Err(self.fail("attribute access on private name is forbidden"));
                    }
                    value = value.get(&field).cloned().unwrap_or(serde_json::Value::Null);
                }
                Some(Token::LBracket) => {
                    self.bump();
                    value = self.parse_index_or_slice(value)?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_index_or_slice(&mut self, target: serde_json::Value) -> Result<serde_json::Value> {
        if matches!(self.peek(), Some(Token::Colon)) {
            self.bump();
            let end = self.parse_optional_int()?;
            self.expect_rbracket()?;
            return Ok(slice(&target, None, end));
        }
        let first = self.parse_or()?;
        if matches!(self.peek(), Some(Token::Colon)) {
            self.bump();
            let end = self.parse_optional_int()?;
            self.expect_rbracket()?;
            let start = first.as_i64();
            return Ok(slice(&target, start, end));
        }
        self.expect_rbracket()?;
        Ok(index_into(&target, &first))
    }

    fn parse_optional_int(&mut self) -> Result<Option<i64>> {
        if matches!(self.peek(), Some(Token::RBracket)) {
            return Ok(None);
        }
        let value = self.parse_or()?;
        Ok(value.as_i64())
    }

    fn expect_rbracket(&mut self) -> Result<()> {
        match self.bump() {
            Some(Token::RBracket) => Ok(()),
            _ => Err(self.fail("expected ']'")),
        }
    }

    fn parse_primary(&mut self) -> Result<serde_json::Value> {
        match self.bump().cloned() {
            Some(Token::Number(n)) => Ok(serde_json::json!(n)),
            Some(Token::Str(s)) => Ok(serde_json::Value::String(s)),
            Some(Token::Op(op)) if op == "true" => Ok(serde_json::Value::Bool(true)),
            Some(Token::Op(op)) if op == "false" => Ok(serde_json::Value::Bool(false)),
            Some(Token::Op(op)) if op == "null" || op == "none" => Ok(serde_json::Value::Null),
            Some(Token::LParen) => {
                let value = self.parse_or()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(self.fail("expected ')'")),
                }
            }
            Some(Token::LBracket) => self.parse_list_literal(),
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    self.bump();
                    let args = self.parse_args()?;
                    call_builtin(&name, &args).map_err(|e| self.fail(e))
                } else {
                    Ok(self.scopes.get(&name).cloned().unwrap_or(serde_json::Value::Null))
                }
            }
            other => Err(self.fail(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_list_literal(&mut self) -> Result<serde_json::Value> {
        let mut items = Vec::new();
        if matches!(self.peek(), Some(Token::RBracket)) {
            self.bump();
            return Ok(serde_json::Value::Array(items));
        }
        loop {
            items.push(self.parse_or()?);
            match self.bump() {
                Some(Token::Comma) => continue,
                Some(Token::RBracket) => break,
                _ => return Err(self.fail("expected ',' or ']' in list literal")),
            }
        }
        Ok(serde_json::Value::Array(items))
    }

    fn parse_args(&mut self) -> Result<Vec<serde_json::Value>> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.bump();
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.bump() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => return Err(self.fail("expected ',' or ')' in call arguments")),
            }
        }
        Ok(args)
    }
}

fn contains(haystack: &serde_json::Value, needle: &serde_json::Value) -> bool {
    match haystack {
        serde_json::Value::Array(items) => items.contains(needle),
        serde_json::Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        _ => false,
    }
}

fn apply_comparison(op: &str, left: &serde_json::Value, right: &serde_json::Value) -> bool {
    if op == "in" {
        return contains(right, left);
    }
    match op {
        "==" => left == right,
        "!=" => left != right,
        _ => {
            let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
                return false;
            };
            match op {
                "<" => l < r,
                "<=" => l <= r,
                ">" => l > r,
                ">=" => l >= r,
                _ => false,
            }
        }
    }
}

fn index_into(target: &serde_json::Value, index: &serde_json::Value) -> serde_json::Value {
    match (target, index) {
        (serde_json::Value::Array(items), idx) => {
            idx.as_i64().and_then(|i| resolve_index(i, items.len())).and_then(|i| items.get(i)).cloned().unwrap_or(serde_json::Value::Null)
        }
        (serde_json::Value::Object(map), serde_json::Value::String(key)) => {
            map.get(key).cloned().unwrap_or(serde_json::Value::Null)
        }
        (serde_json::Value::String(s), idx) => {
            let chars: Vec<char> = s.chars().collect();
            idx.as_i64()
                .and_then(|i| resolve_index(i, chars.len()))
                .and_then(|i| chars.get(i))
                .map(|c| serde_json::Value::String(c.to_string()))
                .unwrap_or(serde_json::Value::Null)
        }
        _ => serde_json::Value::Null,
    }
}

fn resolve_index(i: i64, len: usize) -> Option<usize> {
    let i = if i < 0 { i + len as i64 } else { i };
    if i < 0 || i as usize >= len {
        None
    } else {
        Some(i as usize)
    }
}

fn slice(target: &serde_json::Value, start: Option<i64>, end: Option<i64>) -> serde_json::Value {
    match target {
        serde_json::Value::Array(items) => {
            let (s, e) = slice_bounds(items.len(), start, end);
            serde_json::Value::Array(items[s..e].to_vec())
        }
        serde_json::Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let (s, e) = slice_bounds(chars.len(), start, end);
            serde_json::Value::String(chars[s..e].iter().collect())
        }
        other => other.clone(),
    }
}

fn slice_bounds(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let clamp = |v: i64| -> usize {
        let v = if v < 0 { v + len as i64 } else { v };
        v.clamp(0, len as i64) as usize
    };
    let s = start.map(clamp).unwrap_or(0);
    let e = end.map(clamp).unwrap_or(len).max(s);
    (s, e)
}

/// The fixed safe-builtin set: `len, min, max, sum, abs, round, str, int,
/// float, bool`. No other function name is callable.
fn call_builtin(name: &str, args: &[serde_json::Value]) -> std::result::Result<serde_json::Value, String> {
    match name {
        "len" => {
            let v = args.first().ok_or("len() requires one argument")?;
            let n = match v {
                serde_json::Value::Array(a) => a.len(),
                serde_json::Value::String(s) => s.chars().count(),
                serde_json::Value::Object(o) => o.len(),
                _ => return Err("len() requires a list, string, or object".to_string()),
            };
            Ok(serde_json::json!(n))
        }
        "min" | "max" => {
            let items = collect_numeric_args(args)?;
            let chosen = if name == "min" {
                items.into_iter().fold(f64::INFINITY, f64::min)
            } else {
                items.into_iter().fold(f64::NEG_INFINITY, f64::max)
            };
            Ok(serde_json::json!(chosen))
        }
        "sum" => {
            let items = collect_numeric_args(args)?;
            Ok(serde_json::json!(items.into_iter().sum::<f64>()))
        }
        "abs" => {
            let n = args.first().and_then(|v| v.as_f64()).ok_or("abs() requires a number")?;
            Ok(serde_json::json!(n.abs()))
        }
        "round" => {
            let n = args.first().and_then(|v| v.as_f64()).ok_or("round() requires a number")?;
            Ok(serde_json::json!(n.round()))
        }
        "str" => Ok(serde_json::Value::String(stringify(args.first().unwrap_or(&serde_json::Value::Null)))),
        "int" => {
            let v = args.first().ok_or("int() requires one argument")?;
            let n = match v {
                serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0) as i64,
                serde_json::Value::String(s) => s.trim().parse::<i64>().map_err(|_| format!("cannot convert '{s}' to int"))?,
                serde_json::Value::Bool(b) => *b as i64,
                _ => return Err("int() requires a number, string, or bool".to_string()),
            };
            Ok(serde_json::json!(n))
        }
        "float" => {
            let v = args.first().ok_or("float() requires one argument")?;
            let n = match v {
                serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
                serde_json::Value::String(s) => s.trim().parse::<f64>().map_err(|_| format!("cannot convert '{s}' to float"))?,
                _ => return Err("float() requires a number or string".to_string()),
            };
            Ok(serde_json::json!(n))
        }
        "bool" => Ok(serde_json::Value::Bool(truthy(args.first().unwrap_or(&serde_json::Value::Null)))),
        other => Err(format!("'{other}' is not a callable builtin")),
    }
}

fn collect_numeric_args(args: &[serde_json::Value]) -> std::result::Result<Vec<f64>, String> {
    let source: Vec<serde_json::Value> = match args {
        [serde_json::Value::Array(items)] => items.clone(),
        other => other.to_vec(),
    };
    source
        .iter()
        .map(|v| v.as_f64().ok_or_else(|| "expected a list of numbers".to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scopes_with(vars: &[(&str, serde_json::Value)]) -> ScopeStack {
        let mut map = HashMap::new();
        for (k, v) in vars {
            map.insert(k.to_string(), v.clone());
        }
        ScopeStack::with_base(map)
    }

    #[test]
    fn renders_simple_variable() {
        let scopes = scopes_with(&[("mrn", serde_json::json!(12345))]);
        let rendered = render_template("patient {{ mrn }}", &scopes, "s1").unwrap();
        assert_eq!(rendered, Rendered::Text("patient 12345".to_string()));
    }

    #[test]
    fn renders_list_literal_as_value() {
        let scopes = scopes_with(&[("ids", serde_json::json!([1, 2, 3]))]);
        let rendered = render_template("{{ ids }}", &scopes, "s1").unwrap();
        assert_eq!(rendered, Rendered::Value(serde_json::json!([1, 2, 3])));
    }

    #[test]
    fn attribute_and_index_access() {
        let scopes = scopes_with(&[(
            "note",
            serde_json::json!({ "text": "hello", "spans": [1, 2, 3] }),
        )]);
        assert_eq!(
            render_template("{{ note.text }}", &scopes, "s1").unwrap(),
            Rendered::Text("hello".to_string())
        );
        assert_eq!(
            render_template("{{ note.spans[0] }}", &scopes, "s1").unwrap(),
            Rendered::Text("1".to_string())
        );
    }

    #[test]
    fn forbidden_token_is_rejected_without_evaluation() {
        let scopes = ScopeStack::new();
        let err = render_template("{{ __import__('os').system('rm -rf /') }}", &scopes, "s1").unwrap_err();
        assert!(matches!(err, CoreError::Template { .. }));
    }

    #[test]
    fn condition_comparison_and_logical_operators() {
        let scopes = scopes_with(&[("age", serde_json::json!(10)), ("flag", serde_json::json!(true))]);
        assert!(eval_condition("age > 5 and flag", &scopes, "s1").unwrap());
        assert!(!eval_condition("age > 50 or not flag", &scopes, "s1").unwrap());
    }

    #[test]
    fn in_and_not_in_operators() {
        let scopes = scopes_with(&[("tags", serde_json::json!(["a", "b"]))]);
        assert!(eval_condition("'a' in tags", &scopes, "s1").unwrap());
        assert!(eval_condition("'z' not in tags", &scopes, "s1").unwrap());
    }

    #[test]
    fn safe_builtins_are_callable() {
        let scopes = scopes_with(&[("items", serde_json::json!([1, 2, 3]))]);
        assert_eq!(eval_expr("len(items)", &scopes, "s1").unwrap(), serde_json::json!(3));
        assert_eq!(eval_expr("sum(items)", &scopes, "s1").unwrap(), serde_json::json!(6.0));
    }

    #[test]
    fn bare_builtin_call_is_evaluated_without_braces() {
        let scopes = scopes_with(&[("notes", serde_json::json!(["a", "b", "c"]))]);
        let rendered = render_template("len(notes)", &scopes, "s1").unwrap();
        assert_eq!(rendered, Rendered::Value(serde_json::json!(3)));
    }

    #[test]
    fn bare_slice_is_evaluated_without_braces() {
        let scopes = scopes_with(&[("notes", serde_json::json!(["a", "b", "c", "d"]))]);
        let rendered = render_template("notes[0:3]", &scopes, "s1").unwrap();
        assert_eq!(rendered, Rendered::Value(serde_json::json!(["a", "b", "c"])));
    }

    #[test]
    fn plain_literal_text_is_not_mistaken_for_an_expression() {
        let scopes = ScopeStack::new();
        let rendered = render_template("no braces here", &scopes, "s1").unwrap();
        assert_eq!(rendered, Rendered::Text("no braces here".to_string()));
    }

    #[test]
    fn unknown_function_is_rejected() {
        let scopes = ScopeStack::new();
        let err = eval_expr("getattr(1, 2)", &scopes, "s1").unwrap_err();
        assert!(matches!(err, CoreError::Template { .. }));
    }
}
