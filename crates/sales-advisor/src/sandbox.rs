//! Chart-Script Sandbox
//!
//! A restricted interpreter for model-generated visualization code. The
//! language has variables, arithmetic, lists, maps, and a fixed allow-list
//! of builtin functions; there is no way to reach the filesystem, the
//! network, or another process from inside it. `chart(...)` stands in for
//! the plotting library: it produces a chart object that the executor
//! captures as the run's result.
//!
//! This is a behavioral sandbox. Running truly untrusted code still calls
//! for an isolated process with resource limits.

use std::collections::HashMap;

use crate::error::{AdvisorError, Result};

/// A runtime value
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Num(f64),
    Bool(bool),
    Str(String),
    List(Vec<Value>),
    /// Insertion-ordered key/value pairs
    Map(Vec<(String, Value)>),
    /// A produced chart object
    Chart(serde_json::Value),
    Unit,
}

type EvalResult<T> = std::result::Result<T, String>;

// Upper bound on interpreter work per run. Generated chart scripts are
// tiny; anything that reaches this is runaway.
const MAX_OPS: u64 = 1_000_000;

/// Execute chart-script code. Returns the chart object representation if
/// one was produced, else any printed output, else a generic success
/// acknowledgment.
pub fn execute(code: &str) -> Result<String> {
    let mut interp = Interp::default();

    for (lineno, raw) in code.lines().enumerate() {
        let line = strip_comment(raw);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        interp
            .exec_line(line)
            .map_err(|e| AdvisorError::Sandbox(format!("line {}: {}", lineno + 1, e)))?;
    }

    Ok(interp.finish())
}

fn strip_comment(line: &str) -> &str {
    // '#' inside string literals is rare in generated chart code; a comment
    // marker is only honored outside quotes.
    let mut in_quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match in_quote {
            Some(q) if c == q => in_quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => in_quote = Some(c),
            None if c == '#' => return &line[..i],
            None => {}
        }
    }
    line
}

#[derive(Default)]
struct Interp {
    vars: HashMap<String, Value>,
    output: String,
    chart: Option<serde_json::Value>,
    ops: u64,
}

impl Interp {
    fn exec_line(&mut self, line: &str) -> EvalResult<()> {
        let tokens = tokenize(line)?;
        if tokens.is_empty() {
            return Ok(());
        }
        self.charge(tokens.len() as u64)?;

        // `name = expr` assignment, else a bare expression statement
        if let (Some(Token::Ident(name)), Some(Token::Eq)) = (tokens.first(), tokens.get(1)) {
            let name = name.clone();
            let value = self.eval_tokens(&tokens[2..])?;
            self.vars.insert(name, value);
        } else {
            self.eval_tokens(&tokens)?;
        }
        Ok(())
    }

    fn charge(&mut self, cost: u64) -> EvalResult<()> {
        self.ops = self.ops.saturating_add(cost);
        if self.ops > MAX_OPS {
            return Err("operation limit exceeded".into());
        }
        Ok(())
    }

    fn eval_tokens(&mut self, tokens: &[Token]) -> EvalResult<Value> {
        let mut parser = Parser {
            tokens,
            pos: 0,
            interp: self,
        };
        let value = parser.parse_expr()?;
        if parser.pos != tokens.len() {
            return Err("unexpected trailing tokens".into());
        }
        Ok(value)
    }

    fn finish(self) -> String {
        if let Some(chart) = self.chart {
            return format!("Chart created: {}", chart);
        }
        let output = self.output.trim_end();
        if output.is_empty() {
            "Code executed successfully".into()
        } else {
            output.to_string()
        }
    }

    /// The builtin allow-list. Anything not matched here does not exist.
    fn call(&mut self, name: &str, args: Vec<Value>) -> EvalResult<Value> {
        match name {
            "print" => {
                let line = args.iter().map(display).collect::<Vec<_>>().join(" ");
                self.output.push_str(&line);
                self.output.push('\n');
                Ok(Value::Unit)
            }
            "len" => {
                let [arg] = one(name, args)?;
                let len = match arg {
                    Value::Str(s) => s.chars().count(),
                    Value::List(l) => l.len(),
                    Value::Map(m) => m.len(),
                    other => return Err(format!("len() of {}", kind(&other))),
                };
                Ok(Value::Num(len as f64))
            }
            "range" => {
                let (start, end) = match args.len() {
                    1 => (0.0, as_num(&args[0])?),
                    2 => (as_num(&args[0])?, as_num(&args[1])?),
                    n => return Err(format!("range() takes 1 or 2 arguments, got {n}")),
                };
                self.charge(if end > start { (end - start) as u64 } else { 0 })?;
                let mut items = Vec::new();
                let mut i = start;
                while i < end {
                    items.push(Value::Num(i));
                    i += 1.0;
                }
                Ok(Value::List(items))
            }
            "sum" => Ok(Value::Num(numeric_args(name, args)?.iter().sum())),
            "min" | "max" => {
                let nums = numeric_args(name, args)?;
                if nums.is_empty() {
                    return Err(format!("{name}() of empty sequence"));
                }
                let folded = nums.iter().copied().fold(nums[0], |acc, n| {
                    if name == "min" { acc.min(n) } else { acc.max(n) }
                });
                Ok(Value::Num(folded))
            }
            "abs" => {
                let [arg] = one(name, args)?;
                Ok(Value::Num(as_num(&arg)?.abs()))
            }
            "round" => {
                let digits = match args.len() {
                    1 => 0i32,
                    2 => as_num(&args[1])? as i32,
                    n => return Err(format!("round() takes 1 or 2 arguments, got {n}")),
                };
                let factor = 10f64.powi(digits);
                Ok(Value::Num((as_num(&args[0])? * factor).round() / factor))
            }
            "int" => {
                let [arg] = one(name, args)?;
                let n = match arg {
                    Value::Str(s) => s
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| format!("int() of invalid string {s:?}"))?,
                    Value::Bool(b) => b as i64 as f64,
                    other => as_num(&other)?,
                };
                Ok(Value::Num(n.trunc()))
            }
            "float" => {
                let [arg] = one(name, args)?;
                let n = match arg {
                    Value::Str(s) => s
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| format!("float() of invalid string {s:?}"))?,
                    Value::Bool(b) => b as i64 as f64,
                    other => as_num(&other)?,
                };
                Ok(Value::Num(n))
            }
            "str" => {
                let [arg] = one(name, args)?;
                Ok(Value::Str(display(&arg)))
            }
            "json" => {
                let [arg] = one(name, args)?;
                let Value::Str(text) = arg else {
                    return Err("json() takes a string".into());
                };
                let parsed: serde_json::Value =
                    serde_json::from_str(&text).map_err(|e| format!("json(): {e}"))?;
                Ok(json_to_value(parsed))
            }
            "chart" => {
                let [arg] = one(name, args)?;
                if !matches!(arg, Value::Map(_)) {
                    return Err("chart() takes a configuration map".into());
                }
                let json = value_to_json(&arg)?;
                self.chart = Some(json.clone());
                Ok(Value::Chart(json))
            }
            _ => Err(format!("unknown function '{name}'")),
        }
    }
}

fn one(name: &str, args: Vec<Value>) -> EvalResult<[Value; 1]> {
    <[Value; 1]>::try_from(args).map_err(|v| format!("{name}() takes 1 argument, got {}", v.len()))
}

/// Flatten arguments for the aggregate builtins: a single list argument or
/// a plain list of numbers.
fn numeric_args(name: &str, args: Vec<Value>) -> EvalResult<Vec<f64>> {
    let items = match args.as_slice() {
        [Value::List(items)] => items.clone(),
        _ => args,
    };
    items
        .iter()
        .map(as_num)
        .collect::<EvalResult<Vec<f64>>>()
        .map_err(|e| format!("{name}(): {e}"))
}

fn as_num(value: &Value) -> EvalResult<f64> {
    match value {
        Value::Num(n) => Ok(*n),
        other => Err(format!("expected a number, got {}", kind(other))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Num(_) => "number",
        Value::Bool(_) => "bool",
        Value::Str(_) => "string",
        Value::List(_) => "list",
        Value::Map(_) => "map",
        Value::Chart(_) => "chart",
        Value::Unit => "unit",
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::Num(n) => format_num(*n),
        Value::Bool(b) => b.to_string(),
        Value::Str(s) => s.clone(),
        Value::List(items) => {
            let inner = items.iter().map(display).collect::<Vec<_>>().join(", ");
            format!("[{inner}]")
        }
        Value::Map(_) => value_to_json(value)
            .map(|j| j.to_string())
            .unwrap_or_default(),
        Value::Chart(json) => json.to_string(),
        Value::Unit => String::new(),
    }
}

fn format_num(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn value_to_json(value: &Value) -> EvalResult<serde_json::Value> {
    Ok(match value {
        Value::Num(n) => {
            if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                serde_json::Value::from(*n as i64)
            } else {
                serde_json::Number::from_f64(*n)
                    .map(serde_json::Value::Number)
                    .ok_or_else(|| "non-finite number".to_string())?
            }
        }
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => serde_json::Value::Array(
            items.iter().map(value_to_json).collect::<EvalResult<_>>()?,
        ),
        Value::Map(entries) => {
            let mut map = serde_json::Map::new();
            for (key, val) in entries {
                map.insert(key.clone(), value_to_json(val)?);
            }
            serde_json::Value::Object(map)
        }
        Value::Chart(json) => json.clone(),
        Value::Unit => serde_json::Value::Null,
    })
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Unit,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => {
            Value::List(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => {
            Value::Map(map.into_iter().map(|(k, v)| (k, json_to_value(v))).collect())
        }
    }
}

// ── Lexer ──

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Eq,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
}

fn tokenize(line: &str) -> EvalResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '0'..='9' => {
                let mut num = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        num.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let parsed = num.parse().map_err(|_| format!("invalid number {num:?}"))?;
                tokens.push(Token::Num(parsed));
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        None => return Err("unterminated string".into()),
                        Some(d) if d == quote => break,
                        Some('\\') => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(other) => text.push(other),
                            None => return Err("unterminated string".into()),
                        },
                        Some(d) => text.push(d),
                    }
                }
                tokens.push(Token::Str(text));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            _ => {
                chars.next();
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '^' => Token::Caret,
                    '=' => Token::Eq,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    ',' => Token::Comma,
                    ':' => Token::Colon,
                    _ => return Err(format!("unexpected character {c:?}")),
                });
            }
        }
    }

    Ok(tokens)
}

// ── Parser / evaluator ──

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    interp: &'a mut Interp,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> EvalResult<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(format!("expected {what}"))
        }
    }

    fn parse_expr(&mut self) -> EvalResult<Value> {
        let mut left = self.parse_term()?;
        loop {
            if self.eat(&Token::Plus) {
                let right = self.parse_term()?;
                left = add(left, right)?;
                if let Value::List(items) = &left {
                    self.interp.charge(items.len() as u64)?;
                }
            } else if self.eat(&Token::Minus) {
                let right = self.parse_term()?;
                left = Value::Num(as_num(&left)? - as_num(&right)?);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_term(&mut self) -> EvalResult<Value> {
        let mut left = self.parse_power()?;
        loop {
            if self.eat(&Token::Star) {
                let right = self.parse_power()?;
                left = Value::Num(as_num(&left)? * as_num(&right)?);
            } else if self.eat(&Token::Slash) {
                let right = self.parse_power()?;
                let divisor = as_num(&right)?;
                if divisor == 0.0 {
                    return Err("division by zero".into());
                }
                left = Value::Num(as_num(&left)? / divisor);
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_power(&mut self) -> EvalResult<Value> {
        let base = self.parse_unary()?;
        if self.eat(&Token::Caret) {
            let exponent = self.parse_unary()?;
            return Ok(Value::Num(as_num(&base)?.powf(as_num(&exponent)?)));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> EvalResult<Value> {
        if self.eat(&Token::Minus) {
            let value = self.parse_unary()?;
            return Ok(Value::Num(-as_num(&value)?));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> EvalResult<Value> {
        let mut value = self.parse_primary()?;
        while self.eat(&Token::LBracket) {
            let index = self.parse_expr()?;
            self.expect(&Token::RBracket, "']'")?;
            value = index_value(value, index)?;
        }
        Ok(value)
    }

    fn parse_primary(&mut self) -> EvalResult<Value> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Value::Num(n)),
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" | "True" => Ok(Value::Bool(true)),
                "false" | "False" => Ok(Value::Bool(false)),
                _ => {
                    if self.eat(&Token::LParen) {
                        let args = self.parse_args()?;
                        self.interp.call(&name, args)
                    } else {
                        self.interp
                            .vars
                            .get(&name)
                            .cloned()
                            .ok_or_else(|| format!("unknown variable '{name}'"))
                    }
                }
            },
            Some(Token::LParen) => {
                let value = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(value)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                        if self.peek() == Some(&Token::RBracket) {
                            break;
                        }
                    }
                    self.expect(&Token::RBracket, "']'")?;
                }
                Ok(Value::List(items))
            }
            Some(Token::LBrace) => {
                let mut entries = Vec::new();
                if !self.eat(&Token::RBrace) {
                    loop {
                        let key = match self.next() {
                            Some(Token::Str(s)) => s,
                            Some(Token::Ident(s)) => s,
                            _ => return Err("expected map key".into()),
                        };
                        self.expect(&Token::Colon, "':'")?;
                        let value = self.parse_expr()?;
                        entries.push((key, value));
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                        if self.peek() == Some(&Token::RBrace) {
                            break;
                        }
                    }
                    self.expect(&Token::RBrace, "'}'")?;
                }
                Ok(Value::Map(entries))
            }
            _ => Err("expected an expression".into()),
        }
    }

    fn parse_args(&mut self) -> EvalResult<Vec<Value>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "')'")?;
        Ok(args)
    }
}

fn add(left: Value, right: Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a + b)),
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (a, b) => Err(format!("cannot add {} and {}", kind(&a), kind(&b))),
    }
}

fn index_value(value: Value, index: Value) -> EvalResult<Value> {
    match (value, index) {
        (Value::List(items), Value::Num(n)) => {
            let i = n as usize;
            items
                .get(i)
                .cloned()
                .ok_or_else(|| format!("list index {i} out of range"))
        }
        (Value::Map(entries), Value::Str(key)) => entries
            .iter()
            .find(|(k, _)| k == &key)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| format!("missing map key {key:?}")),
        (v, i) => Err(format!("cannot index {} with {}", kind(&v), kind(&i))),
    }
}
