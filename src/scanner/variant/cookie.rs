//! Cookie crumbs as parameters

use std::ops::Range;

use super::urlencoded::encode;
use super::{splice, NameValuePair, Variant, VariantKind};
use crate::http::HttpMessage;

/// One `name=value` crumb of a Cookie header
struct Crumb {
    header: usize,
    span: Range<usize>,
    name: String,
    value: String,
}

fn crumbs(msg: &HttpMessage) -> Vec<Crumb> {
    let mut out = Vec::new();
    for (index, header) in msg.request_headers.iter().enumerate() {
        if !header.name.eq_ignore_ascii_case("cookie") {
            continue;
        }
        let mut offset = 0;
        for part in header.value.split(';') {
            let start = offset + (part.len() - part.trim_start().len());
            let trimmed = part.trim();
            offset += part.len() + 1;
            if trimmed.is_empty() {
                continue;
            }
            let (name, value) = trimmed.split_once('=').unwrap_or((trimmed, ""));
            out.push(Crumb {
                header: index,
                span: start..start + trimmed.len(),
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            });
        }
    }
    out
}

/// Cookie variant. An empty name together with an empty value removes the
/// crumb, and the Cookie header with it once no crumbs are left.
#[derive(Debug, Clone, Default)]
pub struct CookieVariant {
    params: Vec<NameValuePair>,
}

impl CookieVariant {
    fn write(&self, msg: &mut HttpMessage, original: &NameValuePair, name: &str, value: &str) -> String {
        let all = crumbs(msg);
        let Some(crumb) = all.get(original.position) else {
            return String::new();
        };
        let header_index = crumb.header;

        if name.is_empty() && value.is_empty() {
            let remaining: Vec<String> = {
                let header = &msg.request_headers[header_index].value;
                all.iter()
                    .filter(|c| c.header == header_index && c.span != crumb.span)
                    .map(|c| header[c.span.clone()].to_string())
                    .collect()
            };
            if remaining.is_empty() {
                msg.request_headers.remove(header_index);
            } else {
                msg.request_headers[header_index].value = remaining.join("; ");
            }
            return String::new();
        }

        let written = format!("{}={}", name, value);
        let header = &mut msg.request_headers[header_index];
        header.value = splice(&header.value, crumb.span.clone(), &written);
        written
    }
}

impl Variant for CookieVariant {
    fn kind(&self) -> VariantKind {
        VariantKind::Cookie
    }

    fn set_message(&mut self, msg: &HttpMessage) {
        self.params = crumbs(msg)
            .into_iter()
            .enumerate()
            .map(|(i, c)| NameValuePair::new(VariantKind::Cookie, &c.name, &c.value, i))
            .collect();
    }

    fn param_list(&self) -> &[NameValuePair] {
        &self.params
    }

    fn set_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, name: &str, value: &str) -> String {
        self.write(msg, original, name, &encode(value))
    }

    fn set_escaped_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, name: &str, value: &str) -> String {
        self.write(msg, original, name, value)
    }
}
