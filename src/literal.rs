//! Parser for Python literal syntax.
//!
//! Nova metadata written by the TripleO templates stores the compact service
//! map as the `repr` of a Python value, e.g.
//! `{'HTTP': ['ctlplane', 'internal_api'], 'haproxy': [u'ctlplane']}`.
//! This module accepts only literal data (strings, numbers, booleans, `None`,
//! lists, tuples, sets and dicts) and maps it onto [`serde_json::Value`].
//! Tuples and sets become arrays. Names, calls, operators and anything else
//! are rejected.

use serde_json::{Map, Number, Value};

use crate::{Error, Result};

/// Nesting limit for lists and dicts.
const MAX_DEPTH: usize = 64;

/// Parse one literal value. Trailing input other than whitespace is an error.
pub fn parse(input: &str) -> Result<Value> {
    let mut parser = Parser {
        src: input.as_bytes(),
        pos: 0,
    };
    let value = parser.value(0)?;
    parser.skip_ws();
    if parser.pos != parser.src.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, what: &str) -> Error {
        Error::decode(format!("{} at offset {}", what, self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", byte as char)))
        }
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_DEPTH {
            return Err(self.error("literal nested too deeply"));
        }
        self.skip_ws();
        match self.peek() {
            Some(b'[') => {
                self.pos += 1;
                self.sequence(b']', depth).map(Value::Array)
            }
            Some(b'(') => {
                self.pos += 1;
                self.parenthesized(depth)
            }
            Some(b'{') => {
                self.pos += 1;
                self.braced(depth)
            }
            Some(b'\'' | b'"') => self.string().map(Value::String),
            Some(b'u' | b'U') if matches!(self.src.get(self.pos + 1), Some(b'\'' | b'"')) => {
                self.pos += 1;
                self.string().map(Value::String)
            }
            Some(b'-' | b'+' | b'0'..=b'9' | b'.') => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => self.keyword(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn sequence(&mut self, close: u8, depth: usize) -> Result<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.value(depth + 1)?);
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(c) if c == close => {}
                _ => return Err(self.error("expected ',' or closing bracket")),
            }
        }
    }

    /// `(x)` is just `x`; a comma or `()` makes a tuple.
    fn parenthesized(&mut self, depth: usize) -> Result<Value> {
        self.skip_ws();
        if self.peek() == Some(b')') {
            self.pos += 1;
            return Ok(Value::Array(Vec::new()));
        }
        let first = self.value(depth + 1)?;
        self.skip_ws();
        match self.peek() {
            Some(b')') => {
                self.pos += 1;
                Ok(first)
            }
            Some(b',') => {
                self.pos += 1;
                let mut items = vec![first];
                items.extend(self.sequence(b')', depth)?);
                Ok(Value::Array(items))
            }
            _ => Err(self.error("expected ',' or ')'")),
        }
    }

    /// Dict or set, told apart by what follows the first element.
    fn braced(&mut self, depth: usize) -> Result<Value> {
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(Value::Object(Map::new()));
        }
        let first = self.value(depth + 1)?;
        self.skip_ws();
        match self.peek() {
            Some(b':') => self.dict(first, depth),
            Some(b'}') => {
                self.pos += 1;
                Ok(Value::Array(vec![first]))
            }
            Some(b',') => {
                self.pos += 1;
                let mut items = vec![first];
                for item in self.sequence(b'}', depth)? {
                    if !items.contains(&item) {
                        items.push(item);
                    }
                }
                Ok(Value::Array(items))
            }
            _ => Err(self.error("expected ':', ',' or '}'")),
        }
    }

    fn dict(&mut self, first_key: Value, depth: usize) -> Result<Value> {
        let mut map = Map::new();
        let mut key = self.dict_key(first_key)?;
        loop {
            self.expect(b':')?;
            let value = self.value(depth + 1)?;
            map.insert(key, value);
            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {}
                _ => return Err(self.error("expected ',' or '}'")),
            }
            self.skip_ws();
            if self.peek() == Some(b'}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let next = self.value(depth + 1)?;
            key = self.dict_key(next)?;
        }
    }

    fn dict_key(&self, key: Value) -> Result<String> {
        match key {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok((if b { "True" } else { "False" }).to_string()),
            _ => Err(self.error("dict keys must be strings or numbers")),
        }
    }

    fn keyword(&mut self) -> Result<Value> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
            self.pos += 1;
        }
        match &self.src[start..self.pos] {
            b"True" => Ok(Value::Bool(true)),
            b"False" => Ok(Value::Bool(false)),
            b"None" => Ok(Value::Null),
            other => {
                let name = String::from_utf8_lossy(other).into_owned();
                self.pos = start;
                Err(self.error(&format!("'{}' is not a literal", name)))
            }
        }
    }

    fn number(&mut self) -> Result<Value> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'-' | b'+')) {
            self.pos += 1;
        }
        while matches!(
            self.peek(),
            Some(b'0'..=b'9' | b'.' | b'e' | b'E' | b'_' | b'-' | b'+')
        ) {
            // a sign only belongs to the number right after an exponent marker
            if matches!(self.peek(), Some(b'-' | b'+'))
                && !matches!(self.src.get(self.pos - 1), Some(b'e' | b'E'))
            {
                break;
            }
            self.pos += 1;
        }
        let text: String = String::from_utf8_lossy(&self.src[start..self.pos])
            .chars()
            .filter(|c| *c != '_')
            .collect();

        if let Ok(i) = text.parse::<i64>() {
            return Ok(Value::Number(Number::from(i)));
        }
        text.parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| {
                self.pos = start;
                self.error(&format!("invalid number '{}'", text))
            })
    }

    fn string(&mut self) -> Result<String> {
        let quote = self.src[self.pos];
        self.pos += 1;
        let mut out: Vec<u8> = Vec::new();
        loop {
            let c = self
                .peek()
                .ok_or_else(|| self.error("unterminated string"))?;
            self.pos += 1;
            match c {
                _ if c == quote => break,
                b'\n' => return Err(self.error("newline in string")),
                b'\\' => self.escape(&mut out)?,
                _ => out.push(c),
            }
        }
        String::from_utf8(out).map_err(|_| self.error("string is not valid UTF-8"))
    }

    fn escape(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let c = self
            .peek()
            .ok_or_else(|| self.error("unterminated escape"))?;
        self.pos += 1;
        let decoded = match c {
            b'\\' => '\\',
            b'\'' => '\'',
            b'"' => '"',
            b'n' => '\n',
            b't' => '\t',
            b'r' => '\r',
            b'a' => '\u{07}',
            b'b' => '\u{08}',
            b'f' => '\u{0c}',
            b'v' => '\u{0b}',
            b'0'..=b'7' => self.octal_char(c),
            b'\n' => return Ok(()),
            b'x' => self.hex_char(2)?,
            b'u' => self.hex_char(4)?,
            b'U' => self.hex_char(8)?,
            _ => {
                // unknown escapes are kept verbatim, as Python does
                out.push(b'\\');
                out.push(c);
                return Ok(());
            }
        };
        let mut buf = [0u8; 4];
        out.extend_from_slice(decoded.encode_utf8(&mut buf).as_bytes());
        Ok(())
    }

    /// Up to three octal digits, the first already consumed.
    fn octal_char(&mut self, first: u8) -> char {
        let mut code = u32::from(first - b'0');
        for _ in 0..2 {
            match self.peek() {
                Some(d @ b'0'..=b'7') => {
                    code = code * 8 + u32::from(d - b'0');
                    self.pos += 1;
                }
                _ => break,
            }
        }
        // at most 0o777, always a valid scalar value
        char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)
    }

    fn hex_char(&mut self, digits: usize) -> Result<char> {
        let end = self.pos + digits;
        let hex = self
            .src
            .get(self.pos..end)
            .and_then(|b| std::str::from_utf8(b).ok())
            .ok_or_else(|| self.error("truncated escape"))?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid hex escape"))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| self.error("escape is not a valid character"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_list_of_dicts() {
        let value = parse("[{'name': 'mysql'}]").unwrap();
        assert_eq!(value, json!([{"name": "mysql"}]));
    }

    #[test]
    fn parses_tripleo_compact_map() {
        let value =
            parse("{'HTTP': ['ctlplane', 'internal_api'], u'haproxy': (u'ctlplane',)}").unwrap();
        assert_eq!(
            value,
            json!({"HTTP": ["ctlplane", "internal_api"], "haproxy": ["ctlplane"]})
        );
    }

    #[test]
    fn parses_scalars() {
        assert_eq!(parse("True").unwrap(), json!(true));
        assert_eq!(parse("False").unwrap(), json!(false));
        assert_eq!(parse("None").unwrap(), Value::Null);
        assert_eq!(parse("-42").unwrap(), json!(-42));
        assert_eq!(parse("1_000").unwrap(), json!(1000));
        assert_eq!(parse("2.5").unwrap(), json!(2.5));
        assert_eq!(parse("1e3").unwrap(), json!(1000.0));
    }

    #[test]
    fn decodes_escapes() {
        assert_eq!(parse(r#"'it\'s'"#).unwrap(), json!("it's"));
        assert_eq!(parse(r#""a\tb""#).unwrap(), json!("a\tb"));
        assert_eq!(parse(r#"'\x41\u00e9'"#).unwrap(), json!("Aé"));
        assert_eq!(parse(r#"'C:\d'"#).unwrap(), json!("C:\\d"));
    }

    #[test]
    fn decodes_octal_and_control_escapes() {
        assert_eq!(parse(r"'\012'").unwrap(), json!("\n"));
        assert_eq!(parse(r"'\0'").unwrap(), json!("\0"));
        assert_eq!(parse(r"'\101\1012'").unwrap(), json!("AA2"));
        assert_eq!(parse(r"'\8'").unwrap(), json!("\\8"));
        assert_eq!(
            parse(r"'\a\b\f\v'").unwrap(),
            json!("\u{07}\u{08}\u{0c}\u{0b}")
        );
    }

    #[test]
    fn parentheses_without_comma_are_grouping() {
        assert_eq!(parse("('mysql')").unwrap(), json!("mysql"));
        assert_eq!(parse("( ('mysql') )").unwrap(), json!("mysql"));
        assert_eq!(parse("('mysql',)").unwrap(), json!(["mysql"]));
        assert_eq!(parse("('a', 'b')").unwrap(), json!(["a", "b"]));
        assert_eq!(parse("()").unwrap(), json!([]));
    }

    #[test]
    fn sets_become_arrays() {
        assert_eq!(parse("{'mysql'}").unwrap(), json!(["mysql"]));
        assert_eq!(
            parse("{'HTTP', 'mysql', 'HTTP',}").unwrap(),
            json!(["HTTP", "mysql"])
        );
        assert_eq!(parse("{}").unwrap(), json!({}));
        assert_eq!(parse("{'a': 1, 'b': 2}").unwrap(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn accepts_trailing_commas_and_whitespace() {
        let value = parse("  [ 'a' , 'b' , ]\n").unwrap();
        assert_eq!(value, json!(["a", "b"]));
        assert_eq!(parse("{'a': 1,}").unwrap(), json!({"a": 1}));
        assert_eq!(parse("[]").unwrap(), json!([]));
    }

    #[test]
    fn rejects_code() {
        for input in [
            "__import__('os').system('true')",
            "open('/etc/passwd')",
            "[x for x in y]",
            "1 + 1",
            "{'a': b}",
            "lambda: 0",
        ] {
            let err = parse(input).unwrap_err();
            assert!(matches!(err, Error::Decode(_)), "accepted {input}");
        }
    }

    #[test]
    fn rejects_malformed_structure() {
        for input in ["", "[", "['a'", "{'a' 1}", "'unterminated", "['a'] ['b']", "{[1]: 2}"] {
            assert!(parse(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn rejects_excessive_nesting() {
        let deep = format!("{}{}", "[".repeat(MAX_DEPTH + 2), "]".repeat(MAX_DEPTH + 2));
        assert!(parse(&deep).is_err());
    }
}
