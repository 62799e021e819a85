//! OData resource keys and `$filter` comparisons as parameters

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use super::urlencoded::{decode, encode, parse_pairs};
use super::{splice, NameValuePair, Variant, VariantKind};
use crate::http::HttpMessage;

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([A-Za-z_][\w.]*)\(([^()/]*)\)").expect("Invalid key regex"))
}

fn filter_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Za-z_][\w/.]*)\s+(eq|ne|gt|ge|lt|le)\s+('(?:[^']|'')*'|[^\s()]+)")
            .expect("Invalid filter regex")
    })
}

/// A literal with quotes stripped from its span when quoted. `value` is the
/// raw text between the quotes; doubled quotes are still doubled.
struct Literal {
    span: Range<usize>,
    name: String,
    value: String,
    quoted: bool,
}

fn literal(name: &str, raw: &str, offset: usize) -> Literal {
    let quoted = raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'');
    if quoted {
        Literal {
            span: offset + 1..offset + raw.len() - 1,
            name: name.to_string(),
            value: raw[1..raw.len() - 1].to_string(),
            quoted,
        }
    } else {
        Literal {
            span: offset..offset + raw.len(),
            name: name.to_string(),
            value: raw.to_string(),
            quoted,
        }
    }
}

/// Quote doubling for values going into a quoted literal
fn requote(value: &str, quoted: bool) -> String {
    if quoted {
        value.replace('\'', "''")
    } else {
        value.to_string()
    }
}

/// Percent-decode a key taken from the path, then undouble its quotes
fn decode_key(mut key: Literal) -> Literal {
    key.value = decode(&key.value);
    if key.quoted {
        key.value = key.value.replace("''", "'");
    }
    key
}

fn resource_keys(path: &str) -> Vec<Literal> {
    let mut out = Vec::new();
    for caps in key_regex().captures_iter(path) {
        let (Some(entity), Some(keys)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        if keys.as_str().trim().is_empty() {
            continue;
        }
        if !keys.as_str().contains('=') {
            out.push(decode_key(literal(entity.as_str(), keys.as_str(), keys.start())));
            continue;
        }
        let mut offset = keys.start();
        for part in keys.as_str().split(',') {
            if let Some((name, raw)) = part.split_once('=') {
                out.push(decode_key(literal(name.trim(), raw, offset + name.len() + 1)));
            }
            offset += part.len() + 1;
        }
    }
    out
}

/// Resource keys in the path: `Products(5)`, `Items(OrderId=1,Sku='a')`
#[derive(Debug, Clone, Default)]
pub struct ODataIdVariant {
    params: Vec<NameValuePair>,
}

impl ODataIdVariant {
    fn write(&self, msg: &mut HttpMessage, position: usize, value: &str, escape: bool) -> String {
        let path = msg.path().to_string();
        let Some(key) = resource_keys(&path).into_iter().nth(position) else {
            return String::new();
        };
        let written = if escape {
            encode(&requote(value, key.quoted))
        } else {
            value.to_string()
        };
        msg.set_path(&splice(&path, key.span, &written));
        written
    }
}

impl Variant for ODataIdVariant {
    fn kind(&self) -> VariantKind {
        VariantKind::ODataId
    }

    fn set_message(&mut self, msg: &HttpMessage) {
        self.params = resource_keys(msg.path())
            .into_iter()
            .enumerate()
            .map(|(i, k)| NameValuePair::new(VariantKind::ODataId, &k.name, &k.value, i))
            .collect();
    }

    fn param_list(&self) -> &[NameValuePair] {
        &self.params
    }

    fn set_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, _name: &str, value: &str) -> String {
        self.write(msg, original.position, value, true)
    }

    fn set_escaped_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, _name: &str, value: &str) -> String {
        self.write(msg, original.position, value, false)
    }
}

/// Form-decode `raw`, keeping for every decoded byte the raw offset it came
/// from (plus one trailing entry for the end). `None` if the bytes are not
/// UTF-8, since offsets could not be kept through a lossy conversion.
fn decode_mapped(raw: &str) -> Option<(String, Vec<usize>)> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut offsets = Vec::with_capacity(bytes.len() + 1);
    let mut i = 0;
    while i < bytes.len() {
        offsets.push(i);
        let hex = bytes
            .get(i + 1..i + 3)
            .and_then(|h| std::str::from_utf8(h).ok())
            .and_then(|h| u8::from_str_radix(h, 16).ok());
        match (bytes[i], hex) {
            (b'%', Some(byte)) => {
                out.push(byte);
                i += 3;
            }
            (b'+', _) => {
                out.push(b' ');
                i += 1;
            }
            (byte, _) => {
                out.push(byte);
                i += 1;
            }
        }
    }
    offsets.push(bytes.len());
    Some((String::from_utf8(out).ok()?, offsets))
}

/// The decoded `$filter` value and, per decoded byte, its offset in the query
struct Filter {
    text: String,
    offsets: Vec<usize>,
}

impl Filter {
    fn raw_span(&self, span: &Range<usize>) -> Range<usize> {
        self.offsets[span.start]..self.offsets[span.end]
    }
}

fn filter_of(query: &str) -> Option<Filter> {
    let pair = parse_pairs(query).into_iter().find(|p| p.name == "$filter")?;
    let segment = &query[pair.span.clone()];
    let eq = segment.find('=')?;
    let value_start = pair.span.start + eq + 1;
    let (text, offsets) = decode_mapped(&query[value_start..pair.span.end])?;
    Some(Filter {
        text,
        offsets: offsets.into_iter().map(|o| o + value_start).collect(),
    })
}

fn comparisons(filter: &str) -> Vec<Literal> {
    filter_regex()
        .captures_iter(filter)
        .filter_map(|caps| {
            let name = caps.get(1)?;
            let raw = caps.get(3)?;
            let mut literal = literal(name.as_str(), raw.as_str(), raw.start());
            if literal.quoted {
                literal.value = literal.value.replace("''", "'");
            }
            Some(literal)
        })
        .collect()
}

/// Comparison literals inside `$filter`: `Name eq 'bob' and Age gt 30`
#[derive(Debug, Clone, Default)]
pub struct ODataFilterVariant {
    params: Vec<NameValuePair>,
}

impl ODataFilterVariant {
    fn write(&self, msg: &mut HttpMessage, position: usize, value: &str, escape: bool) -> String {
        let Some(query) = msg.query().map(str::to_string) else {
            return String::new();
        };
        let Some(filter) = filter_of(&query) else {
            return String::new();
        };
        let Some(target) = comparisons(&filter.text).into_iter().nth(position) else {
            return String::new();
        };

        let written = if escape {
            encode(&requote(value, target.quoted))
        } else {
            value.to_string()
        };
        msg.set_query(&splice(&query, filter.raw_span(&target.span), &written));
        written
    }
}

impl Variant for ODataFilterVariant {
    fn kind(&self) -> VariantKind {
        VariantKind::ODataFilter
    }

    fn set_message(&mut self, msg: &HttpMessage) {
        self.params = msg
            .query()
            .and_then(filter_of)
            .map(|filter| {
                comparisons(&filter.text)
                    .into_iter()
                    .enumerate()
                    .map(|(i, c)| NameValuePair::new(VariantKind::ODataFilter, &c.name, &c.value, i))
                    .collect()
            })
            .unwrap_or_default();
    }

    fn param_list(&self) -> &[NameValuePair] {
        &self.params
    }

    fn set_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, _name: &str, value: &str) -> String {
        self.write(msg, original.position, value, true)
    }

    fn set_escaped_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, _name: &str, value: &str) -> String {
        self.write(msg, original.position, value, false)
    }
}
