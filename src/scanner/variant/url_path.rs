//! Path segments as parameters (`/users/42/profile`)

use std::ops::Range;

use super::urlencoded::{decode, encode};
use super::{splice, NameValuePair, Variant, VariantKind};
use crate::http::HttpMessage;

#[derive(Debug, Clone, Default)]
pub struct UrlPathVariant {
    params: Vec<NameValuePair>,
}

fn segments(path: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut offset = 0;
    for segment in path.split('/') {
        if !segment.is_empty() {
            spans.push(offset..offset + segment.len());
        }
        offset += segment.len() + 1;
    }
    spans
}

impl UrlPathVariant {
    fn write(&self, msg: &mut HttpMessage, position: usize, value: &str) -> String {
        let path = msg.path().to_string();
        match segments(&path).into_iter().nth(position) {
            Some(span) => {
                msg.set_path(&splice(&path, span, value));
                value.to_string()
            }
            None => String::new(),
        }
    }
}

impl Variant for UrlPathVariant {
    fn kind(&self) -> VariantKind {
        VariantKind::UrlPath
    }

    fn set_message(&mut self, msg: &HttpMessage) {
        let path = msg.path();
        self.params = segments(path)
            .into_iter()
            .enumerate()
            .map(|(i, span)| {
                let segment = decode(&path[span]);
                NameValuePair::new(VariantKind::UrlPath, &segment, &segment, i)
            })
            .collect();
    }

    fn param_list(&self) -> &[NameValuePair] {
        &self.params
    }

    fn set_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, _name: &str, value: &str) -> String {
        self.write(msg, original.position, &encode(value))
    }

    fn set_escaped_parameter(&self, msg: &mut HttpMessage, original: &NameValuePair, _name: &str, value: &str) -> String {
        self.write(msg, original.position, value)
    }
}
