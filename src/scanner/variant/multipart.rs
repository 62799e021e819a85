//! `multipart/form-data` parts as parameters
//!
//! A plain part contributes its content. A file part contributes three
//! slots: the file content, the file name and the part's Content-Type.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;

use super::{content_type_contains, splice, NameValuePair, Variant, VariantKind};
use crate::http::HttpMessage;

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)(?:^|;)\s*name="([^"]*)""#).expect("Invalid name regex"))
}

fn filename_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i);\s*filename="([^"]*)""#).expect("Invalid filename regex"))
}

fn boundary_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)boundary=(?:"([^"]+)"|([^;\s]+))"#).expect("Invalid boundary regex"))
}

struct Slot {
    span: Range<usize>,
    name: String,
    value: String,
}

fn boundary(msg: &HttpMessage) -> Option<String> {
    let ct = msg.request_header("content-type")?;
    let caps = boundary_regex().captures(ct)?;
    caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str().to_string())
}

/// Header block of one part: Content-Disposition and Content-Type slots
fn part_headers(body: &str, start: usize, end: usize, out: &mut Vec<Slot>, content: Range<usize>) {
    let mut name = None;
    let mut filename = None;
    let mut content_type = None;

    let mut offset = start;
    for line in body[start..end].split('\n') {
        let line_start = offset;
        offset += line.len() + 1;
        let line = line.trim_end_matches('\r');
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value_start = line_start + key.len() + 1;
        if key.trim().eq_ignore_ascii_case("content-disposition") {
            if let Some(m) = name_regex().captures(value).and_then(|c| c.get(1)) {
                name = Some(m.as_str().to_string());
            }
            if let Some(m) = filename_regex().captures(value).and_then(|c| c.get(1)) {
                filename = Some((value_start + m.start()..value_start + m.end(), m.as_str().to_string()));
            }
        } else if key.trim().eq_ignore_ascii_case("content-type") {
            let leading = value.len() - value.trim_start().len();
            let trimmed = value.trim();
            let begin = value_start + leading;
            content_type = Some((begin..begin + trimmed.len(), trimmed.to_string()));
        }
    }

    let Some(name) = name else {
        return;
    };
    out.push(Slot {
        value: body[content.clone()].to_string(),
        span: content,
        name: name.clone(),
    });
    if let Some((span, value)) = filename {
        out.push(Slot {
            span,
            name: name.clone(),
            value,
        });
        if let Some((span, value)) = content_type {
            out.push(Slot { span, name, value });
        }
    }
}

fn slots(msg: &HttpMessage) -> Vec<Slot> {
    if !content_type_contains(msg, "multipart/form-data") {
        return Vec::new();
    }
    let Some(boundary) = boundary(msg) else {
        return Vec::new();
    };
    let body = msg.request_body.as_str();
    let delimiter = format!("--{}", boundary);
    let mut out = Vec::new();

    let Some(mut cursor) = body.find(&delimiter) else {
        return out;
    };
    loop {
        cursor += delimiter.len();
        if body[cursor..].starts_with("--") {
            break;
        }
        if body[cursor..].starts_with("\r\n") {
            cursor += 2;
        } else if body[cursor..].starts_with('\n') {
            cursor += 1;
        }

        let Some(next) = body[cursor..].find(&delimiter).map(|i| i + cursor) else {
            break;
        };
        // Content ends before the line break that precedes the delimiter
        let mut part_end = next;
        if body[..part_end].ends_with("\r\n") {
            part_end -= 2;
        } else if body[..part_end].ends_with('\n') {
            part_end -= 1;
        }
        let part_end = part_end.max(cursor);

        let part = &body[cursor..part_end];
        let (headers_end, content_start) = match part.find("\r\n\r\n") {
            Some(i) => (i, i + 4),
            None => match part.find("\n\n") {
                Some(i) => (i, i + 2),
                None => (part.len(), part.len()),
            },
        };
        part_headers(
            body,
            cursor,
            cursor + headers_end,
            &mut out,
            cursor + content_start..part_end,
        );
        cursor = next;
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct MultipartVariant {
    params: Vec<NameValuePair>,
}

impl MultipartVariant {
    fn write(&self, msg: &mut HttpMessage, position: usize, value: &str) -> String {
        let Some(slot) = slots(msg).into_iter().nth(position) else {
            return String::new();
        };
        let body = splice(&msg.request_body, slot.span, value);
        msg.set_request_body(body);
        value.to_string()
    }
}

impl Variant for MultipartVariant {
    fn kind(&self) -> VariantKind {
        VariantKind::Multipart
    }

    fn set_message(&mut self, msg: &HttpMessage) {
        self.params = slots(msg)
            .into_iter()
            .enumerate()
            .map(|(i, s)| NameValuePair::new(VariantKind::Multipart, &s.name, &s.value, i))
            .collect();
    }

    fn param_list(&self) -> &[NameValuePair] {
        &self.params
    }

    fn set_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, _name: &str, value: &str) -> String {
        self.write(msg, original.position, value)
    }

    fn set_escaped_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, _name: &str, value: &str) -> String {
        self.write(msg, original.position, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::variant::test_support::assert_isolated;

    fn message() -> HttpMessage {
        let body = "--XyZ\r\n\
            Content-Disposition: form-data; name=\"title\"\r\n\
            \r\n\
            hello\r\n\
            --XyZ\r\n\
            Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\
            \r\n\
            file body\r\n\
            --XyZ--\r\n";
        let mut msg = HttpMessage::new("POST", "http://example.com/upload");
        msg.set_request_header("Content-Type", "multipart/form-data; boundary=XyZ");
        msg.set_request_header("Content-Length", &body.len().to_string());
        msg.set_request_body(body.to_string());
        msg
    }

    #[test]
    fn test_plain_and_file_parts() {
        let mut variant = MultipartVariant::default();
        variant.set_message(&message());
        let pairs: Vec<_> = variant
            .param_list()
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("title", "hello"),
                ("upload", "file body"),
                ("upload", "a.txt"),
                ("upload", "text/plain"),
            ]
        );
    }

    #[test]
    fn test_each_slot_is_isolated() {
        let msg = message();
        for (k, value) in [(0, "<b>x</b>"), (1, "<?php ?>"), (2, "shell.php"), (3, "image/png")] {
            let after = assert_isolated(VariantKind::Multipart, &msg, k, value);
            assert_eq!(after[k].value, value);
        }

        let mut variant = MultipartVariant::default();
        variant.set_message(&msg);
        let mut attack = msg.clone();
        variant.set_parameter(&mut attack, &variant.param_list()[2], "upload", "x.jsp");
        assert!(attack.request_body.contains("filename=\"x.jsp\""));
        assert_eq!(
            attack.request_header("content-length"),
            Some(attack.request_body.len().to_string().as_str())
        );
    }
}
