//! Request header values as parameters

use super::{NameValuePair, Variant, VariantKind};
use crate::http::{Header, HttpMessage};

/// Headers that carry framing, credentials, cookies or scan bookkeeping
const NON_INJECTABLE: &[&str] = &[
    "host",
    "content-length",
    "content-type",
    "transfer-encoding",
    "connection",
    "proxy-connection",
    "cookie",
    "authorization",
    "proxy-authorization",
    "if-modified-since",
    "if-none-match",
    "pragma",
    "cache-control",
    "x-csrf-token",
    "x-csrftoken",
    "x-xsrf-token",
    "x-ancarna-scan-id",
];

fn is_injectable(header: &Header) -> bool {
    !NON_INJECTABLE.contains(&header.name.to_lowercase().as_str())
}

/// Index into `headers` of the `position`-th injectable header
fn locate(headers: &[Header], position: usize) -> Option<usize> {
    headers
        .iter()
        .enumerate()
        .filter(|(_, h)| is_injectable(h))
        .nth(position)
        .map(|(i, _)| i)
}

/// Header variant. An empty name together with an empty value removes the
/// header instead of writing it.
#[derive(Debug, Clone, Default)]
pub struct HeaderVariant {
    params: Vec<NameValuePair>,
}

impl Variant for HeaderVariant {
    fn kind(&self) -> VariantKind {
        VariantKind::Header
    }

    fn set_message(&mut self, msg: &HttpMessage) {
        self.params = msg
            .request_headers
            .iter()
            .filter(|h| is_injectable(h))
            .enumerate()
            .map(|(i, h)| NameValuePair::new(VariantKind::Header, &h.name, &h.value, i))
            .collect();
    }

    fn param_list(&self) -> &[NameValuePair] {
        &self.params
    }

    fn set_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, name: &str, value: &str) -> String {
        let Some(index) = locate(&msg.request_headers, original.position) else {
            return String::new();
        };

        if name.is_empty() && value.is_empty() {
            msg.request_headers.remove(index);
            return String::new();
        }

        let header = &mut msg.request_headers[index];
        if !name.is_empty() {
            header.name = name.to_string();
        }
        header.value = value.to_string();
        format!("{}: {}", header.name, header.value)
    }

    fn set_escaped_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, name: &str, value: &str) -> String {
        self.set_parameter(msg, original, name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::variant::test_support::assert_isolated;

    fn message() -> HttpMessage {
        let mut msg = HttpMessage::new("GET", "http://example.com/");
        msg.request_headers.push(Header::new("User-Agent", "ua"));
        msg.request_headers.push(Header::new("Cookie", "a=1"));
        msg.request_headers.push(Header::new("Referer", "http://example.com/start"));
        msg
    }

    #[test]
    fn test_skips_non_injectable_headers() {
        let mut variant = HeaderVariant::default();
        variant.set_message(&message());
        let names: Vec<_> = variant.param_list().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["User-Agent", "Referer"]);
    }

    #[test]
    fn test_write_keeps_other_headers_and_order() {
        let msg = message();
        assert_isolated(VariantKind::Header, &msg, 1, "javascript:alert(1)");

        let mut variant = HeaderVariant::default();
        variant.set_message(&msg);
        let mut attack = msg.clone();
        let written = variant.set_parameter(&mut attack, &variant.param_list()[0], "User-Agent", "evil");
        assert_eq!(written, "User-Agent: evil");
        let names: Vec<_> = attack.request_headers.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["Host", "User-Agent", "Cookie", "Referer"]);
    }

    #[test]
    fn test_empty_name_and_value_removes_header() {
        let msg = message();
        let mut variant = HeaderVariant::default();
        variant.set_message(&msg);
        let mut attack = msg.clone();
        variant.set_parameter(&mut attack, &variant.param_list()[0], "", "");
        assert!(attack.request_header("user-agent").is_none());
        assert_eq!(attack.request_headers.len(), msg.request_headers.len() - 1);
    }
}
