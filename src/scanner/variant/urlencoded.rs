//! `name=value&...` parameters in the query string or a form body

use std::ops::Range;

use super::{content_type_contains, splice, NameValuePair, Variant, VariantKind};
use crate::http::HttpMessage;

/// One `name=value` segment of a urlencoded string
#[derive(Debug, Clone)]
pub(crate) struct RawPair {
    pub span: Range<usize>,
    pub name: String,
    pub value: String,
}

/// Split a urlencoded string into decoded pairs with their raw spans.
/// Empty segments (`a=1&&b=2`) are not parameters.
pub(crate) fn parse_pairs(raw: &str) -> Vec<RawPair> {
    let mut pairs = Vec::new();
    let mut offset = 0;
    for segment in raw.split('&') {
        let span = offset..offset + segment.len();
        offset += segment.len() + 1;
        if segment.is_empty() {
            continue;
        }
        let (name, value) = segment.split_once('=').unwrap_or((segment, ""));
        pairs.push(RawPair {
            span,
            name: decode(name),
            value: decode(value),
        });
    }
    pairs
}

/// Form-style decoding: `+` is a space, invalid UTF-8 is replaced
pub(crate) fn decode(s: &str) -> String {
    let plus = s.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(plus.as_bytes())).into_owned()
}

pub(crate) fn encode(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Query,
    Body,
}

/// Query string or `application/x-www-form-urlencoded` body
#[derive(Debug, Clone)]
pub struct UrlEncodedVariant {
    location: Location,
    params: Vec<NameValuePair>,
}

impl UrlEncodedVariant {
    pub fn query() -> Self {
        Self {
            location: Location::Query,
            params: Vec::new(),
        }
    }

    pub fn form() -> Self {
        Self {
            location: Location::Body,
            params: Vec::new(),
        }
    }

    fn source(&self, msg: &HttpMessage) -> Option<String> {
        match self.location {
            Location::Query => msg.query().map(|q| q.to_string()),
            Location::Body => {
                if content_type_contains(msg, "application/x-www-form-urlencoded") {
                    Some(msg.request_body.clone())
                } else {
                    None
                }
            }
        }
    }

    fn write(&self, msg: &mut HttpMessage, position: usize, segment: &str) -> bool {
        let Some(raw) = self.source(msg) else {
            return false;
        };
        let Some(pair) = parse_pairs(&raw).into_iter().nth(position) else {
            return false;
        };
        let updated = splice(&raw, pair.span, segment);
        match self.location {
            Location::Query => msg.set_query(&updated),
            Location::Body => msg.set_request_body(updated),
        }
        true
    }

    fn inject(&self, msg: &mut HttpMessage, original: &NameValuePair, name: &str, value: &str) -> String {
        let segment = format!("{}={}", encode(name), value);
        if self.write(msg, original.position, &segment) {
            segment
        } else {
            String::new()
        }
    }
}

impl Variant for UrlEncodedVariant {
    fn kind(&self) -> VariantKind {
        match self.location {
            Location::Query => VariantKind::Query,
            Location::Body => VariantKind::Form,
        }
    }

    fn set_message(&mut self, msg: &HttpMessage) {
        let kind = self.kind();
        self.params = self
            .source(msg)
            .map(|raw| {
                parse_pairs(&raw)
                    .into_iter()
                    .enumerate()
                    .map(|(i, p)| NameValuePair::new(kind, &p.name, &p.value, i))
                    .collect()
            })
            .unwrap_or_default();
    }

    fn param_list(&self) -> &[NameValuePair] {
        &self.params
    }

    fn set_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, name: &str, value: &str) -> String {
        self.inject(msg, original, name, &encode(value))
    }

    fn set_escaped_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, name: &str, value: &str) -> String {
        self.inject(msg, original, name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::variant::test_support::assert_isolated;

    #[test]
    fn test_query_injection_scenario() {
        let msg = HttpMessage::new("GET", "http://example.com/item?id=5");
        let mut variant = UrlEncodedVariant::query();
        variant.set_message(&msg);
        assert_eq!(
            variant.param_list(),
            &[NameValuePair::new(VariantKind::Query, "id", "5", 0)]
        );

        let mut attack = msg.clone();
        let pair = variant.param_list()[0].clone();
        let written = variant.set_parameter(&mut attack, &pair, "id", "5'");
        assert_eq!(written, "id=5%27");
        assert_eq!(attack.query(), Some("id=5%27"));
        assert_eq!(attack.request_headers, msg.request_headers);
        assert_eq!(attack.request_body, msg.request_body);
    }

    #[test]
    fn test_duplicate_names_located_by_position() {
        let msg = HttpMessage::new("GET", "http://example.com/?a=1&b=x+y&a=2");
        let mut variant = UrlEncodedVariant::query();
        variant.set_message(&msg);
        let params = variant.param_list().to_vec();
        assert_eq!(params.len(), 3);
        assert_eq!(params[1].value, "x y");

        let mut attack = msg.clone();
        variant.set_parameter(&mut attack, &params[2], "a", "<x>");
        assert_eq!(attack.query(), Some("a=1&b=x+y&a=%3Cx%3E"));
    }

    #[test]
    fn test_escaped_value_written_verbatim() {
        let msg = HttpMessage::new("GET", "http://example.com/?q=1&r=%7e");
        let mut variant = UrlEncodedVariant::query();
        variant.set_message(&msg);
        let pair = variant.param_list()[0].clone();
        let mut attack = msg.clone();
        variant.set_escaped_parameter(&mut attack, &pair, "q", "%2527");
        assert_eq!(attack.query(), Some("q=%2527&r=%7e"));
    }

    #[test]
    fn test_form_body_requires_content_type() {
        let mut msg = HttpMessage::new("POST", "http://example.com/login");
        msg.set_request_header("Content-Length", "15");
        msg.set_request_body("user=bob&pw=x&".to_string());

        let mut variant = UrlEncodedVariant::form();
        variant.set_message(&msg);
        assert!(variant.param_list().is_empty());

        msg.set_request_header("Content-Type", "application/x-www-form-urlencoded");
        variant.set_message(&msg);
        assert_eq!(variant.param_list().len(), 2);

        let after = assert_isolated(VariantKind::Form, &msg, 0, "alice smith");
        assert_eq!(after[0].value, "alice smith");

        let mut attack = msg.clone();
        variant.set_parameter(&mut attack, &variant.param_list()[1], "pw", "secret!");
        assert_eq!(attack.request_body, "user=bob&pw=secret%21&");
        assert_eq!(attack.request_header("content-length"), Some("22"));
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let msg = HttpMessage::new("GET", "http://example.com/?x=1&y=2&flag");
        let mut variant = UrlEncodedVariant::query();
        variant.set_message(&msg);
        let first = variant.param_list().to_vec();
        variant.set_message(&msg);
        assert_eq!(first, variant.param_list());
        assert_eq!(first[2].name, "flag");
        assert_eq!(first[2].value, "");
    }
}
