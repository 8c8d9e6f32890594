//! A small, dependency-light expression grammar: the default Expression
//! Evaluator dialect used when a document declares no `datamodel` (or
//! `datamodel="null"` but still writes guard conditions), and the engine
//! behind the `In()` predicate for every dialect.
//!
//! Grammar (lowest to highest precedence): `||`, `&&`, equality
//! (`==`/`!=`), relational (`<`/`<=`/`>`/`>=`), additive (`+`/`-`),
//! multiplicative (`*`/`/`/`%`), unary (`!`/`-`), primary (literals,
//! dotted identifiers, `In(id)`, parenthesized expressions).
//!
//! This mirrors the two-stage lexer-then-recursive-descent shape used
//! throughout the corpus for small embedded grammars, trimmed to the
//! operator set SCXML guard conditions and `<assign expr="...">` values
//! actually need.

use std::collections::HashMap;
use std::fmt;

use crate::datamodel::DataValue;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    String(String),
    Ident(String),
    True,
    False,
    Null,
    LParen,
    RParen,
    Comma,
    Dot,
    Op(&'static str),
}

#[derive(Debug)]
pub struct ExprError(pub String);

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn lex(src: &str) -> Result<Vec<Token>, ExprError> {
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
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' if !chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ExprError(format!("unterminated string in '{}'", src)));
                }
                i += 1;
                tokens.push(Token::String(s));
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("=="));
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("!="));
                i += 2;
            }
            '<' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op("<="));
                i += 2;
            }
            '>' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(">="));
                i += 2;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                tokens.push(Token::Op("&&"));
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                tokens.push(Token::Op("||"));
                i += 2;
            }
            '<' | '>' | '+' | '-' | '*' | '/' | '%' | '!' => {
                let op: &'static str = match c {
                    '<' => "<",
                    '>' => ">",
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    '%' => "%",
                    '!' => "!",
                    _ => unreachable!(),
                };
                tokens.push(Token::Op(op));
                i += 1;
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ExprError(format!("bad number '{}'", text)))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(match text.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(text),
                });
            }
            other => return Err(ExprError(format!("unexpected character '{}'", other))),
        }
    }
    Ok(tokens)
}

pub struct ExprContext<'a> {
    pub data: &'a HashMap<String, DataValue>,
    pub event: Option<&'a HashMap<String, DataValue>>,
    pub active_paths: &'a dyn Fn(&str) -> bool,
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    ctx: &'a ExprContext<'a>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<DataValue, ExprError> {
        let mut left = self.parse_and()?;
        while self.expect_op("||") {
            let right = self.parse_and()?;
            left = DataValue::Bool(left.truthy() || right.truthy());
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<DataValue, ExprError> {
        let mut left = self.parse_equality()?;
        while self.expect_op("&&") {
            let right = self.parse_equality()?;
            left = DataValue::Bool(left.truthy() && right.truthy());
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<DataValue, ExprError> {
        let left = self.parse_relational()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            if op == "==" || op == "!=" {
                self.pos += 1;
                let right = self.parse_relational()?;
                let eq = left.loosely_equal(&right);
                return Ok(DataValue::Bool(if op == "==" { eq } else { !eq }));
            }
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<DataValue, ExprError> {
        let left = self.parse_additive()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            if matches!(op, "<" | "<=" | ">" | ">=") {
                self.pos += 1;
                let right = self.parse_additive()?;
                let (a, b) = (left.as_number(), right.as_number());
                let r = match op {
                    "<" => a < b,
                    "<=" => a <= b,
                    ">" => a > b,
                    ">=" => a >= b,
                    _ => unreachable!(),
                };
                return Ok(DataValue::Bool(r));
            }
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<DataValue, ExprError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            match self.peek().cloned() {
                Some(Token::Op("+")) => {
                    self.pos += 1;
                    let right = self.parse_multiplicative()?;
                    left = match (&left, &right) {
                        (DataValue::String(a), _) => DataValue::String(format!("{}{}", a, right)),
                        (_, DataValue::String(b)) => DataValue::String(format!("{}{}", left, b)),
                        _ => DataValue::Number(left.as_number() + right.as_number()),
                    };
                }
                Some(Token::Op("-")) => {
                    self.pos += 1;
                    let right = self.parse_multiplicative()?;
                    left = DataValue::Number(left.as_number() - right.as_number());
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<DataValue, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            match self.peek().cloned() {
                Some(Token::Op("*")) => {
                    self.pos += 1;
                    let right = self.parse_unary()?;
                    left = DataValue::Number(left.as_number() * right.as_number());
                }
                Some(Token::Op("/")) => {
                    self.pos += 1;
                    let right = self.parse_unary()?;
                    left = DataValue::Number(left.as_number() / right.as_number());
                }
                Some(Token::Op("%")) => {
                    self.pos += 1;
                    let right = self.parse_unary()?;
                    left = DataValue::Number(left.as_number() % right.as_number());
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<DataValue, ExprError> {
        match self.peek().cloned() {
            Some(Token::Op("!")) => {
                self.pos += 1;
                let v = self.parse_unary()?;
                Ok(DataValue::Bool(!v.truthy()))
            }
            Some(Token::Op("-")) => {
                self.pos += 1;
                let v = self.parse_unary()?;
                Ok(DataValue::Number(-v.as_number()))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<DataValue, ExprError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(DataValue::Number(n)),
            Some(Token::String(s)) => Ok(DataValue::String(s)),
            Some(Token::True) => Ok(DataValue::Bool(true)),
            Some(Token::False) => Ok(DataValue::Bool(false)),
            Some(Token::Null) => Ok(DataValue::Null),
            Some(Token::LParen) => {
                let v = self.parse_or()?;
                if !matches!(self.next(), Some(Token::RParen)) {
                    return Err(ExprError("expected ')'".into()));
                }
                Ok(v)
            }
            Some(Token::Ident(name)) => {
                if name == "In" && matches!(self.peek(), Some(Token::LParen)) {
                    self.pos += 1;
                    let arg = self.parse_or()?;
                    if !matches!(self.next(), Some(Token::RParen)) {
                        return Err(ExprError("expected ')' after In(...)".into()));
                    }
                    let id = arg.as_string();
                    return Ok(DataValue::Bool((self.ctx.active_paths)(&id)));
                }
                self.parse_path(name)
            }
            other => Err(ExprError(format!("unexpected token {:?}", other))),
        }
    }

    fn parse_path(&mut self, first: String) -> Result<DataValue, ExprError> {
        let mut segments = vec![first];
        while matches!(self.peek(), Some(Token::Dot)) {
            self.pos += 1;
            match self.next() {
                Some(Token::Ident(part)) => segments.push(part),
                other => return Err(ExprError(format!("expected identifier, got {:?}", other))),
            }
        }
        Ok(self.resolve_path(&segments))
    }

    fn resolve_path(&self, segments: &[String]) -> DataValue {
        if segments.first().map(String::as_str) == Some("_event") {
            return match self.ctx.event {
                None => DataValue::Null,
                Some(event_data) => {
                    if segments.len() == 1 {
                        DataValue::Null
                    } else {
                        event_data
                            .get(&segments[1..].join("."))
                            .cloned()
                            .unwrap_or(DataValue::Null)
                    }
                }
            };
        }
        let first = segments[0].as_str();
        let root = self
            .ctx
            .data
            .get(first)
            .cloned()
            .unwrap_or(DataValue::Null);
        segments[1..]
            .iter()
            .fold(root, |acc, seg| acc.get_field(seg))
    }
}

pub fn eval(expr: &str, ctx: &ExprContext) -> Result<DataValue, ExprError> {
    let tokens = lex(expr.trim())?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        ctx,
    };
    let v = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError(format!("trailing tokens in '{}'", expr)));
    }
    Ok(v)
}

pub fn eval_bool(expr: &str, ctx: &ExprContext) -> Result<bool, ExprError> {
    eval(expr, ctx).map(|v| v.truthy())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(data: &'a HashMap<String, DataValue>) -> ExprContext<'a> {
        ExprContext {
            data,
            event: None,
            active_paths: &|_| false,
        }
    }

    #[test]
    fn arithmetic_and_comparison() {
        let data = HashMap::new();
        assert_eq!(eval("1 + 2 * 3", &ctx(&data)).unwrap().as_number(), 7.0);
        assert!(eval_bool("1 < 2 && 2 < 3", &ctx(&data)).unwrap());
    }

    #[test]
    fn dotted_data_access() {
        let mut data = HashMap::new();
        let mut inner = HashMap::new();
        inner.insert("x".to_string(), DataValue::Number(2.0));
        data.insert("data".to_string(), DataValue::Object(inner));
        assert_eq!(eval("data.x == 2", &ctx(&data)).unwrap().truthy(), true);
        assert_eq!(eval("data.x == 1", &ctx(&data)).unwrap().truthy(), false);
    }

    #[test]
    fn in_predicate() {
        let data = HashMap::new();
        let active = |p: &str| p == "game.running";
        let c = ExprContext {
            data: &data,
            event: None,
            active_paths: &active,
        };
        assert!(eval_bool("In('game.running')", &c).unwrap());
        assert!(!eval_bool("In('game.stopped')", &c).unwrap());
    }
}
