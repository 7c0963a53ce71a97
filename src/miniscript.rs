//! A deliberately tiny line-oriented lesson interpreter.
//!
//! The bridge treats interpreters as opaque engines; this one exists so the
//! crate is exercisable end-to-end (demo binary, integration tests) without
//! an external runtime. Its language is a test fixture, not an API surface:
//! integers, strings, variables, `+ - * /`, `print(expr)`, `input(prompt)`,
//! `import name`, and `while True: pass` as the canonical CPU-bound loop
//! (it polls the cooperative interrupt check every iteration).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::thread;
use std::time::Duration;

use crate::engine::{Engine, EngineConsole, EngineError, Program};

type Scope = HashMap<String, Value>;

pub struct MiniScript {
    // Keyed by resolved file name. Survives across runs, like a real
    // interpreter's module cache; the content hash is what keeps edited
    // files from being served stale.
    module_cache: HashMap<String, CachedModule>,
}

struct CachedModule {
    source_hash: u64,
    exports: Scope,
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i64),
    Str(String),
}

impl Value {
    fn render(&self) -> String {
        match self {
            Value::Int(n) => n.to_string(),
            Value::Str(s) => s.clone(),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "str",
        }
    }
}

impl MiniScript {
    pub fn new() -> Self {
        Self {
            module_cache: HashMap::new(),
        }
    }

    fn exec_source(
        &mut self,
        source: &str,
        program: &Program,
        scope: &mut Scope,
        console: &mut dyn EngineConsole,
    ) -> Result<Option<Value>, EngineError> {
        let mut last = None;
        for (index, raw) in source.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            last = self
                .exec_line(line, program, scope, console)
                .map_err(|err| at_line(index + 1, err))?;
        }
        Ok(last)
    }

    fn exec_line(
        &mut self,
        line: &str,
        program: &Program,
        scope: &mut Scope,
        console: &mut dyn EngineConsole,
    ) -> Result<Option<Value>, EngineError> {
        if line == "while True: pass" {
            return spin_until_interrupted(console);
        }
        if let Some(name) = line.strip_prefix("import ") {
            self.import_module(name.trim(), program, scope, console)?;
            return Ok(None);
        }
        if let Some(rest) = line.strip_prefix("print(") {
            if let Some(arg) = rest.strip_suffix(')') {
                let value = eval(arg, scope, console)?;
                let mut text = value.render();
                text.push('\n');
                console.write_stdout(text.as_bytes())?;
                return Ok(None);
            }
        }
        if let Some((lhs, rhs)) = line.split_once('=') {
            let name = lhs.trim();
            if is_identifier(name) {
                let value = eval(rhs, scope, console)?;
                scope.insert(name.to_string(), value);
                return Ok(None);
            }
        }
        Ok(Some(eval(line, scope, console)?))
    }

    fn import_module(
        &mut self,
        name: &str,
        program: &Program,
        scope: &mut Scope,
        console: &mut dyn EngineConsole,
    ) -> Result<(), EngineError> {
        let (file_name, source) = resolve_module(name, program)?;
        let source = source.to_string();
        let source_hash = hash_source(&source);

        if let Some(cached) = self.module_cache.get(&file_name) {
            if cached.source_hash == source_hash {
                scope.extend(cached.exports.clone());
                return Ok(());
            }
        }

        let mut module_scope = Scope::new();
        self.exec_source(&source, program, &mut module_scope, console)
            .map_err(|err| match err {
                EngineError::Runtime(message) => {
                    EngineError::Runtime(format!("in module {name:?}: {message}"))
                }
                other => other,
            })?;
        scope.extend(module_scope.clone());
        self.module_cache.insert(
            file_name,
            CachedModule {
                source_hash,
                exports: module_scope,
            },
        );
        Ok(())
    }
}

impl Default for MiniScript {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for MiniScript {
    fn run(
        &mut self,
        program: &Program,
        console: &mut dyn EngineConsole,
    ) -> Result<Option<String>, EngineError> {
        let source = program
            .entry_source()
            .ok_or_else(|| EngineError::Runtime(format!("entry file {:?} not found", program.entry)))?
            .to_string();
        // Fresh globals per run; the namespace is dropped when this returns.
        let mut scope = Scope::new();
        let last = self.exec_source(&source, program, &mut scope, console)?;
        Ok(last.map(|value| value.render()))
    }
}

fn resolve_module<'p>(name: &str, program: &'p Program) -> Result<(String, &'p str), EngineError> {
    if let Some(source) = program.files.get(name) {
        return Ok((name.to_string(), source));
    }
    let with_ext = format!("{name}.ms");
    if let Some(source) = program.files.get(&with_ext) {
        return Ok((with_ext, source));
    }
    Err(EngineError::Runtime(format!("module {name:?} not found")))
}

fn hash_source(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

fn at_line(lineno: usize, err: EngineError) -> EngineError {
    match err {
        EngineError::Runtime(message) => EngineError::Runtime(format!("line {lineno}: {message}")),
        other => other,
    }
}

fn spin_until_interrupted(console: &mut dyn EngineConsole) -> Result<Option<Value>, EngineError> {
    loop {
        if console.interrupted() {
            return Err(EngineError::Interrupted);
        }
        thread::sleep(Duration::from_millis(1));
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, EngineError> {
    let mut tokens = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => text.push(ch),
                        None => {
                            return Err(EngineError::Runtime(
                                "unterminated string literal".into(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            _ if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| EngineError::Runtime(format!("invalid integer {digits:?}")))?;
                tokens.push(Token::Int(value));
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(name));
            }
            other => {
                return Err(EngineError::Runtime(format!(
                    "unexpected character {other:?}"
                )))
            }
        }
    }
    Ok(tokens)
}

struct ExprParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    scope: &'a Scope,
    console: &'a mut dyn EngineConsole,
}

fn eval(expr: &str, scope: &Scope, console: &mut dyn EngineConsole) -> Result<Value, EngineError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(EngineError::Runtime("empty expression".into()));
    }
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        scope,
        console,
    };
    let value = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(EngineError::Runtime(format!(
            "unexpected trailing input in expression {expr:?}"
        )));
    }
    Ok(value)
}

impl ExprParser<'_> {
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

    fn expression(&mut self) -> Result<Value, EngineError> {
        let mut value = self.term()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Plus | Token::Minus => {
                    self.next();
                    let rhs = self.term()?;
                    value = apply(&op, value, rhs)?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<Value, EngineError> {
        let mut value = self.factor()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Star | Token::Slash => {
                    self.next();
                    let rhs = self.factor()?;
                    value = apply(&op, value, rhs)?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<Value, EngineError> {
        match self.next() {
            Some(Token::Int(n)) => Ok(Value::Int(n)),
            Some(Token::Str(s)) => Ok(Value::Str(s)),
            Some(Token::Minus) => match self.factor()? {
                Value::Int(n) => Ok(Value::Int(-n)),
                other => Err(EngineError::Runtime(format!(
                    "cannot negate a {}",
                    other.type_name()
                ))),
            },
            Some(Token::LParen) => {
                let value = self.expression()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(EngineError::Runtime("expected closing parenthesis".into())),
                }
            }
            Some(Token::Ident(name)) if name == "input" => self.input_call(),
            Some(Token::Ident(name)) => self
                .scope
                .get(&name)
                .cloned()
                .ok_or_else(|| EngineError::Runtime(format!("name {name:?} is not defined"))),
            _ => Err(EngineError::Runtime("expected a value".into())),
        }
    }

    fn input_call(&mut self) -> Result<Value, EngineError> {
        match self.next() {
            Some(Token::LParen) => {}
            _ => return Err(EngineError::Runtime("input requires parentheses".into())),
        }
        let prompt = match self.peek() {
            Some(Token::RParen) => String::new(),
            _ => self.expression()?.render(),
        };
        match self.next() {
            Some(Token::RParen) => {}
            _ => return Err(EngineError::Runtime("expected closing parenthesis".into())),
        }
        let line = self.console.read_line(&prompt)?;
        Ok(Value::Str(line))
    }
}

fn apply(op: &Token, lhs: Value, rhs: Value) -> Result<Value, EngineError> {
    match (op, lhs, rhs) {
        (Token::Plus, Value::Int(a), Value::Int(b)) => a
            .checked_add(b)
            .map(Value::Int)
            .ok_or_else(|| EngineError::Runtime("integer overflow".into())),
        (Token::Plus, Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
        (Token::Minus, Value::Int(a), Value::Int(b)) => a
            .checked_sub(b)
            .map(Value::Int)
            .ok_or_else(|| EngineError::Runtime("integer overflow".into())),
        (Token::Star, Value::Int(a), Value::Int(b)) => a
            .checked_mul(b)
            .map(Value::Int)
            .ok_or_else(|| EngineError::Runtime("integer overflow".into())),
        (Token::Slash, Value::Int(_), Value::Int(0)) => {
            Err(EngineError::Runtime("division by zero".into()))
        }
        (Token::Slash, Value::Int(a), Value::Int(b)) => a
            .checked_div(b)
            .map(Value::Int)
            .ok_or_else(|| EngineError::Runtime("integer overflow".into())),
        (op, lhs, rhs) => Err(EngineError::Runtime(format!(
            "unsupported operand types for {}: {} and {}",
            op_symbol(op),
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

fn op_symbol(op: &Token) -> &'static str {
    match op {
        Token::Plus => "+",
        Token::Minus => "-",
        Token::Star => "*",
        Token::Slash => "/",
        _ => "?",
    }
}
