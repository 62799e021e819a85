//! GWT-RPC request parameters
//!
//! Body layout: `version|flags|n|s1|...|sn|payload...|` where the payload is
//! module, strong name, service, method, parameter count, one type reference
//! per parameter and then one value token per parameter. String values are
//! 1-based references into the string table; primitives are literal tokens.

use super::{content_type_contains, NameValuePair, Variant, VariantKind};
use crate::http::HttpMessage;

const PRIMITIVE_TYPES: &[&str] = &["I", "B", "S", "Z", "C", "F", "D", "J"];

fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('!') => out.push('|'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('|', "\\!")
}

#[derive(Debug)]
enum Slot {
    /// Field index of a string-table reference (0 means null)
    StringRef { token: usize, value: String },
    /// Field index of a literal primitive
    Literal { token: usize, value: String },
}

impl Slot {
    fn value(&self) -> &str {
        match self {
            Slot::StringRef { value, .. } | Slot::Literal { value, .. } => value,
        }
    }
}

/// Fields split on `|`, the string-table size and the parameter slots
struct Request {
    fields: Vec<String>,
    table_len: usize,
    slots: Vec<Slot>,
}

fn parse(body: &str) -> Option<Request> {
    let fields: Vec<String> = body.split('|').map(str::to_string).collect();
    let version: u32 = fields.first()?.trim().parse().ok()?;
    if !(5..=7).contains(&version) {
        return None;
    }
    let table_len: usize = fields.get(2)?.parse().ok()?;
    // module, strong name, service, method follow the table
    let payload = table_len.checked_add(3)?;
    let table: Vec<String> = fields.get(3..payload)?.iter().map(|f| unescape(f)).collect();
    let lookup = |token: &str| -> Option<String> {
        let index: usize = token.parse().ok()?;
        if index == 0 {
            return Some(String::new());
        }
        table.get(index - 1).cloned()
    };

    let count: usize = fields.get(payload.checked_add(4)?)?.parse().ok()?;
    if count > fields.len() {
        return None;
    }
    let types_start = payload.checked_add(5)?;
    let values_start = types_start.checked_add(count)?;

    let mut slots = Vec::new();
    for i in 0..count {
        let type_name = lookup(fields.get(types_start + i)?)?;
        let type_name = type_name.split('/').next().unwrap_or_default();
        let token = values_start + i;
        let raw = fields.get(token)?;
        if type_name == "java.lang.String" {
            slots.push(Slot::StringRef {
                token,
                value: lookup(raw)?,
            });
        } else if PRIMITIVE_TYPES.contains(&type_name) {
            slots.push(Slot::Literal {
                token,
                value: unescape(raw),
            });
        } else {
            break;
        }
    }

    Some(Request {
        fields,
        table_len,
        slots,
    })
}

#[derive(Debug, Clone, Default)]
pub struct GwtVariant {
    params: Vec<NameValuePair>,
}

impl GwtVariant {
    fn write(&self, msg: &mut HttpMessage, position: usize, literal: &str) -> String {
        if !content_type_contains(msg, "text/x-gwt-rpc") {
            return String::new();
        }
        let Some(mut request) = parse(&msg.request_body) else {
            return String::new();
        };
        let Some(slot) = request.slots.get(position) else {
            return String::new();
        };

        match *slot {
            Slot::Literal { token, .. } => {
                request.fields[token] = literal.to_string();
            }
            Slot::StringRef { token, .. } => {
                // Other parameters may share the entry, so add a new one
                let index = request.table_len + 1;
                request.fields[token] = index.to_string();
                request.fields.insert(3 + request.table_len, literal.to_string());
                request.fields[2] = index.to_string();
            }
        }
        msg.set_request_body(request.fields.join("|"));
        literal.to_string()
    }
}

impl Variant for GwtVariant {
    fn kind(&self) -> VariantKind {
        VariantKind::Gwt
    }

    fn set_message(&mut self, msg: &HttpMessage) {
        self.params = if content_type_contains(msg, "text/x-gwt-rpc") {
            parse(&msg.request_body)
                .map(|request| {
                    request
                        .slots
                        .iter()
                        .enumerate()
                        .map(|(i, slot)| {
                            NameValuePair::new(VariantKind::Gwt, &format!("arg{}", i), slot.value(), i)
                        })
                        .collect()
                })
                .unwrap_or_default()
        } else {
            Vec::new()
        };
    }

    fn param_list(&self) -> &[NameValuePair] {
        &self.params
    }

    fn set_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, _name: &str, value: &str) -> String {
        self.write(msg, original.position, &escape(value))
    }

    fn set_escaped_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, _name: &str, value: &str) -> String {
        self.write(msg, original.position, value)
    }
}
