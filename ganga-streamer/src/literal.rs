//! Scalar literal grammar used inside `<value>` elements.
//!
//! Values are written the way Python's `repr` renders them and read back
//! with an explicit parser, so no expression evaluation ever takes place:
//!
//! ```text
//! literal := 'None' | 'True' | 'False' | int | float | string | list | tuple | dict
//! int     := ['-'] digits ['L']
//! float   := ['-'] digits '.' digits [exponent] | ... | 'inf' | '-inf' | 'nan'
//! string  := ['u'] ( "'" chars "'" | '"' chars '"' )
//! list    := '[' [literal (',' literal)* [',']] ']'
//! tuple   := '(' [literal (',' literal)* [',']] ')'
//! dict    := '{' [string ':' literal (',' string ':' literal)* [',']] '}'
//! ```

use crate::{StreamError, StreamResult};
use ganga_schema::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Renders a plain value. Object references have no literal form.
pub fn to_literal(value: &Value) -> Option<String> {
    let mut out = String::new();
    write_literal(&mut out, value).then_some(out)
}

fn write_literal(out: &mut String, value: &Value) -> bool {
    match value {
        Value::None => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) => write_float(out, *f),
        Value::Str(s) => write_string(out, s),
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                if !write_literal(out, item) {
                    return false;
                }
            }
            out.push(']');
        }
        Value::Dict(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_string(out, key);
                out.push_str(": ");
                if !write_literal(out, item) {
                    return false;
                }
            }
            out.push('}');
        }
        Value::Object(_) => return false,
    }
    true
}

fn write_float(out: &mut String, f: f64) {
    if f.is_nan() {
        out.push_str("nan");
    } else if f.is_infinite() {
        out.push_str(if f > 0.0 { "inf" } else { "-inf" });
    } else {
        // Debug always keeps a '.' or an exponent, so floats never read back as ints.
        let _ = write!(out, "{f:?}");
    }
}

fn write_string(out: &mut String, s: &str) {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

/// Parses one literal; surrounding whitespace is ignored.
pub fn parse_literal(text: &str) -> StreamResult<Value> {
    let mut parser = Parser {
        src: text,
        chars: text.char_indices().collect(),
        pos: 0,
    };
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> StreamError {
        StreamError::Literal {
            text: self.src.to_string(),
            message: format!("{message} at offset {}", self.offset()),
        }
    }

    fn offset(&self) -> usize {
        self.chars.get(self.pos).map_or(self.src.len(), |(i, _)| *i)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn rest_starts_with(&self, word: &str) -> bool {
        self.src[self.offset()..].starts_with(word)
    }

    fn value(&mut self) -> StreamResult<Value> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some('\'' | '"') => self.string().map(Value::Str),
            Some('u' | 'U') if matches!(self.chars.get(self.pos + 1), Some((_, '\'' | '"'))) => {
                self.pos += 1;
                self.string().map(Value::Str)
            }
            Some('[') => {
                self.pos += 1;
                self.sequence(']').map(Value::List)
            }
            Some('(') => {
                self.pos += 1;
                self.sequence(')').map(Value::List)
            }
            Some('{') => {
                self.pos += 1;
                self.dict()
            }
            Some(c) if c == '-' || c == '+' || c == '.' || c.is_ascii_digit() => self.number(),
            Some(_) => self.word(),
        }
    }

    fn word(&mut self) -> StreamResult<Value> {
        for (word, value) in [
            ("None", Value::None),
            ("True", Value::Bool(true)),
            ("False", Value::Bool(false)),
            ("inf", Value::Float(f64::INFINITY)),
            ("nan", Value::Float(f64::NAN)),
        ] {
            if self.rest_starts_with(word) {
                let end = self.pos + word.chars().count();
                let boundary = self
                    .chars
                    .get(end)
                    .is_none_or(|(_, c)| !c.is_alphanumeric() && *c != '_');
                if boundary {
                    self.pos = end;
                    return Ok(value);
                }
            }
        }
        Err(self.error("unknown name"))
    }

    fn number(&mut self) -> StreamResult<Value> {
        let start = self.offset();
        let negative = self.peek() == Some('-');
        if matches!(self.peek(), Some('-' | '+')) {
            self.pos += 1;
        }
        if self.rest_starts_with("inf") {
            self.pos += 3;
            return Ok(Value::Float(if negative {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            }));
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => {}
                '.' => is_float = true,
                'e' | 'E' => {
                    is_float = true;
                    if matches!(self.chars.get(self.pos + 1), Some((_, '+' | '-'))) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
            self.pos += 1;
        }
        let text = &self.src[start..self.offset()];
        if is_float {
            return text
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| self.error("invalid float"));
        }
        let value = text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| self.error("invalid integer"))?;
        // Python 2 long suffix
        let _ = self.eat('L') || self.eat('l');
        Ok(value)
    }

    fn string(&mut self) -> StreamResult<String> {
        let quote = self.bump().ok_or_else(|| self.error("expected string"))?;
        let mut out = String::new();
        loop {
            let c = self
                .bump()
                .ok_or_else(|| self.error("unterminated string"))?;
            match c {
                c if c == quote => return Ok(out),
                '\\' => self.escape(&mut out)?,
                c => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> StreamResult<()> {
        let c = self.bump().ok_or_else(|| self.error("unterminated escape"))?;
        match c {
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'a' => out.push('\u{7}'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '\n' => {}
            'x' => out.push(self.hex_escape(2)?),
            'u' => out.push(self.hex_escape(4)?),
            'U' => out.push(self.hex_escape(8)?),
            '0'..='7' => {
                let mut code = c.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match self.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            code = code * 8 + d;
                            self.pos += 1;
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(code).ok_or_else(|| self.error("invalid octal escape"))?);
            }
            other => {
                // Unknown escapes are kept verbatim, as Python does.
                out.push('\\');
                out.push(other);
            }
        }
        Ok(())
    }

    fn hex_escape(&mut self, digits: usize) -> StreamResult<char> {
        let mut code = 0u32;
        for _ in 0..digits {
            let d = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("invalid hex escape"))?;
            code = code * 16 + d;
        }
        char::from_u32(code).ok_or_else(|| self.error("invalid code point"))
    }

    fn sequence(&mut self, close: char) -> StreamResult<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat(close) {
                return Ok(items);
            }
            items.push(self.value()?);
            self.skip_ws();
            if self.eat(close) {
                return Ok(items);
            }
            if !self.eat(',') {
                return Err(self.error("expected ',' in sequence"));
            }
        }
    }

    fn dict(&mut self) -> StreamResult<Value> {
        let mut map = BTreeMap::new();
        loop {
            self.skip_ws();
            if self.eat('}') {
                return Ok(Value::Dict(map));
            }
            let key = match self.value()? {
                Value::Str(key) => key,
                _ => return Err(self.error("dictionary keys must be strings")),
            };
            self.skip_ws();
            if !self.eat(':') {
                return Err(self.error("expected ':' in dictionary"));
            }
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            if self.eat('}') {
                return Ok(Value::Dict(map));
            }
            if !self.eat(',') {
                return Err(self.error("expected ',' in dictionary"));
            }
        }
    }
}
