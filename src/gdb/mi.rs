//! GDB/MI output record parser
//!
//! Values are represented as [`serde_json::Value`]: tuples become objects,
//! lists become arrays and c-strings become strings.

use serde_json::{Map, Value};

/// Kind of an MI output record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// `^done`, `^error`, ...
    Result,
    /// `*stopped`, `*running`
    Exec,
    /// `+download`
    Status,
    /// `=thread-created`
    Notify,
    /// `~"..."`
    Console,
    /// `@"..."`
    Target,
    /// `&"..."`
    Log,
    /// `(gdb)`
    Prompt,
    /// Anything GDB printed outside the MI syntax
    Output,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Result => "result",
            RecordKind::Exec => "exec",
            RecordKind::Status => "status",
            RecordKind::Notify => "notify",
            RecordKind::Console => "console",
            RecordKind::Target => "target",
            RecordKind::Log => "log",
            RecordKind::Prompt => "prompt",
            RecordKind::Output => "output",
        }
    }
}

/// One line of MI output
#[derive(Debug, Clone, PartialEq)]
pub struct MiRecord {
    pub token: Option<u64>,
    pub kind: RecordKind,
    /// Result or async class, e.g. `done`
    pub message: Option<String>,
    /// Object of results for result and async records. For stream records,
    /// the string between the quotes with its escapes kept.
    pub payload: Value,
}

impl MiRecord {
    fn new(token: Option<u64>, kind: RecordKind, message: Option<String>, payload: Value) -> Self {
        Self {
            token,
            kind,
            message,
            payload,
        }
    }

    pub fn is(&self, message: Option<&str>, kind: RecordKind) -> bool {
        self.kind == kind && self.message.as_deref() == message
    }
}

/// Parse a single line of GDB output. Never fails: unparsable lines become
/// [`RecordKind::Output`].
pub fn parse_line(line: &str) -> MiRecord {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim_end() == "(gdb)" {
        return MiRecord::new(None, RecordKind::Prompt, None, Value::Null);
    }

    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    let token = if digits > 0 {
        line[..digits].parse().ok()
    } else {
        None
    };
    let rest = &line[digits..];

    let kind = match rest.bytes().next() {
        Some(b'^') => RecordKind::Result,
        Some(b'*') => RecordKind::Exec,
        Some(b'+') => RecordKind::Status,
        Some(b'=') => RecordKind::Notify,
        Some(b'~') if digits == 0 => RecordKind::Console,
        Some(b'@') if digits == 0 => RecordKind::Target,
        Some(b'&') if digits == 0 => RecordKind::Log,
        _ => return output(line),
    };

    match kind {
        RecordKind::Console | RecordKind::Target | RecordKind::Log => {
            let mut parser = Parser::new(&rest[1..]);
            match parser.raw_cstring() {
                Some(s) => MiRecord::new(None, kind, None, Value::String(s)),
                None => output(line),
            }
        }
        _ => {
            let body = &rest[1..];
            let (class, results) = match body.find(',') {
                Some(idx) => (&body[..idx], &body[idx + 1..]),
                None => (body, ""),
            };
            let mut parser = Parser::new(results);
            match parser.results() {
                Some(payload) => MiRecord::new(token, kind, Some(class.to_string()), payload),
                None => output(line),
            }
        }
    }
}

fn output(line: &str) -> MiRecord {
    MiRecord::new(None, RecordKind::Output, None, Value::String(line.to_string()))
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// `result ("," result)*` until the end of input
    fn results(&mut self) -> Option<Value> {
        let mut map = Map::new();
        while self.peek().is_some() {
            let (key, value) = self.result()?;
            insert(&mut map, key, value);
            if !self.eat(b',') {
                break;
            }
        }
        (self.pos == self.input.len()).then_some(Value::Object(map))
    }

    fn result(&mut self) -> Option<(String, Value)> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == b'=' {
                break;
            }
            if matches!(b, b',' | b'{' | b'}' | b'[' | b']' | b'"') {
                return None;
            }
            self.pos += 1;
        }
        let key = std::str::from_utf8(&self.input[start..self.pos]).ok()?.to_string();
        if !self.eat(b'=') {
            return None;
        }
        Some((key, self.value()?))
    }

    fn value(&mut self) -> Option<Value> {
        match self.peek()? {
            b'"' => {
                let raw = self.raw_cstring()?;
                Some(Value::String(unescape(&raw)))
            }
            b'{' => {
                self.pos += 1;
                let mut map = Map::new();
                if self.eat(b'}') {
                    return Some(Value::Object(map));
                }
                loop {
                    let (key, value) = self.result()?;
                    insert(&mut map, key, value);
                    if self.eat(b'}') {
                        return Some(Value::Object(map));
                    }
                    if !self.eat(b',') {
                        return None;
                    }
                }
            }
            b'[' => {
                self.pos += 1;
                let mut items = Vec::new();
                if self.eat(b']') {
                    return Some(Value::Array(items));
                }
                loop {
                    // Lists hold either bare values or `name=value` results
                    let item = match self.peek()? {
                        b'"' | b'{' | b'[' => self.value()?,
                        _ => self.result()?.1,
                    };
                    items.push(item);
                    if self.eat(b']') {
                        return Some(Value::Array(items));
                    }
                    if !self.eat(b',') {
                        return None;
                    }
                }
            }
            _ => None,
        }
    }

    /// Contents of a quoted c-string with escapes left in place
    fn raw_cstring(&mut self) -> Option<String> {
        if !self.eat(b'"') {
            return None;
        }
        let start = self.pos;
        let mut escaped = false;
        while let Some(b) = self.peek() {
            self.pos += 1;
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => {
                    let raw = &self.input[start..self.pos - 1];
                    return Some(String::from_utf8_lossy(raw).into_owned());
                }
                _ => {}
            }
        }
        None
    }
}

/// Repeated keys in one tuple are collected into an array
fn insert(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::Array(existing)) => existing.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

/// Resolve C escapes, including octal byte escapes such as `\302\240`
pub fn unescape(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 == bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let esc = bytes[i + 1];
        i += 2;
        match esc {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'e' => out.push(0x1b),
            b'0'..=b'7' => {
                let mut value = (esc - b'0') as u32;
                let mut digits = 1;
                while digits < 3 && i < bytes.len() && (b'0'..=b'7').contains(&bytes[i]) {
                    value = value * 8 + (bytes[i] - b'0') as u32;
                    i += 1;
                    digits += 1;
                }
                out.push(value as u8);
            }
            other => out.push(other),
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Quote a string as an MI c-string body (without the surrounding quotes)
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}
