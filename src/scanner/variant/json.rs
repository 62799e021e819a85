//! JSON body primitives as parameters

use std::ops::Range;

use serde_json::Value;

use super::{content_type_contains, splice, NameValuePair, Variant, VariantKind};
use crate::http::HttpMessage;

/// A primitive value in the document
#[derive(Debug)]
struct Leaf {
    span: Range<usize>,
    name: String,
    value: String,
    is_string: bool,
}

/// Walks a document already known to be valid JSON and records the byte
/// span of every primitive. Array elements take the key of the enclosing
/// member; top-level primitives have an empty name.
struct Walker<'a> {
    src: &'a str,
    pos: usize,
    leaves: Vec<Leaf>,
}

impl<'a> Walker<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            leaves: Vec::new(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, byte: u8) -> Option<()> {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Some(())
        } else {
            None
        }
    }

    /// Span of a string literal, quotes included
    fn string_span(&mut self) -> Option<Range<usize>> {
        let start = self.pos;
        let bytes = self.src.as_bytes();
        self.pos += 1;
        while let Some(&b) = bytes.get(self.pos) {
            match b {
                b'\\' => self.pos += 2,
                b'"' => {
                    self.pos += 1;
                    return Some(start..self.pos);
                }
                _ => self.pos += 1,
            }
        }
        None
    }

    fn value(&mut self, name: &str) -> Option<()> {
        self.skip_ws();
        match self.peek()? {
            b'{' => self.object(),
            b'[' => self.array(name),
            b'"' => {
                let span = self.string_span()?;
                let value: String = serde_json::from_str(&self.src[span.clone()]).ok()?;
                self.leaves.push(Leaf {
                    span,
                    name: name.to_string(),
                    value,
                    is_string: true,
                });
                Some(())
            }
            _ => {
                let start = self.pos;
                while let Some(b) = self.peek() {
                    if matches!(b, b',' | b'}' | b']' | b' ' | b'\t' | b'\n' | b'\r') {
                        break;
                    }
                    self.pos += 1;
                }
                if start == self.pos {
                    return None;
                }
                self.leaves.push(Leaf {
                    span: start..self.pos,
                    name: name.to_string(),
                    value: self.src[start..self.pos].to_string(),
                    is_string: false,
                });
                Some(())
            }
        }
    }

    fn object(&mut self) -> Option<()> {
        self.pos += 1;
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Some(());
        }
        loop {
            self.skip_ws();
            if self.peek() != Some(b'"') {
                return None;
            }
            let key_span = self.string_span()?;
            let key: String = serde_json::from_str(&self.src[key_span]).ok()?;
            self.expect(b':')?;
            self.value(&key)?;
            self.skip_ws();
            match self.peek()? {
                b',' => self.pos += 1,
                b'}' => {
                    self.pos += 1;
                    return Some(());
                }
                _ => return None,
            }
        }
    }

    fn array(&mut self, name: &str) -> Option<()> {
        self.pos += 1;
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Some(());
        }
        loop {
            self.value(name)?;
            self.skip_ws();
            match self.peek()? {
                b',' => self.pos += 1,
                b']' => {
                    self.pos += 1;
                    return Some(());
                }
                _ => return None,
            }
        }
    }
}

fn leaves(body: &str) -> Vec<Leaf> {
    if serde_json::from_str::<Value>(body).is_err() {
        return Vec::new();
    }
    let mut walker = Walker::new(body);
    match walker.value("") {
        Some(()) => walker.leaves,
        None => Vec::new(),
    }
}

/// Whether `value` can stand in for a number, boolean or null as-is
fn is_json_primitive(value: &str) -> bool {
    matches!(
        serde_json::from_str::<Value>(value),
        Ok(Value::Number(_) | Value::Bool(_) | Value::Null)
    )
}

#[derive(Debug, Clone, Default)]
pub struct JsonVariant {
    params: Vec<NameValuePair>,
}

impl JsonVariant {
    fn write(&self, msg: &mut HttpMessage, position: usize, render: impl FnOnce(&Leaf) -> String) -> String {
        if !content_type_contains(msg, "json") {
            return String::new();
        }
        let body = msg.request_body.clone();
        let Some(leaf) = leaves(&body).into_iter().nth(position) else {
            return String::new();
        };
        let literal = render(&leaf);
        msg.set_request_body(splice(&body, leaf.span, &literal));
        literal
    }
}

impl Variant for JsonVariant {
    fn kind(&self) -> VariantKind {
        VariantKind::Json
    }

    fn set_message(&mut self, msg: &HttpMessage) {
        self.params = if content_type_contains(msg, "json") {
            leaves(&msg.request_body)
                .into_iter()
                .enumerate()
                .map(|(i, l)| NameValuePair::new(VariantKind::Json, &l.name, &l.value, i))
                .collect()
        } else {
            Vec::new()
        };
    }

    fn param_list(&self) -> &[NameValuePair] {
        &self.params
    }

    fn set_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, _name: &str, value: &str) -> String {
        self.write(msg, original.position, |leaf| {
            if !leaf.is_string && is_json_primitive(value) {
                value.to_string()
            } else {
                Value::String(value.to_string()).to_string()
            }
        })
    }

    fn set_escaped_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, _name: &str, value: &str) -> String {
        self.write(msg, original.position, |leaf| {
            if leaf.is_string {
                format!("\"{}\"", value)
            } else {
                value.to_string()
            }
        })
    }
}
