//! XML leaf text and attribute values as parameters

use std::ops::Range;
use std::sync::OnceLock;

use quick_xml::escape::{escape, unescape};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

use super::{content_type_contains, splice, NameValuePair, Variant, VariantKind};
use crate::http::HttpMessage;

fn attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\s([^\s=/>]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("Invalid attribute regex")
    })
}

#[derive(Debug)]
struct Leaf {
    span: Range<usize>,
    name: String,
    value: String,
}

/// An open element while walking the document
struct Frame {
    name: String,
    /// Insertion point for an element with no content
    content_start: usize,
    text: Option<(Range<usize>, String)>,
    /// Child element, comment, PI or a second text node seen
    mixed: bool,
}

fn attributes(tag: &str, offset: usize, out: &mut Vec<Leaf>) -> Option<()> {
    for caps in attribute_regex().captures_iter(tag) {
        let name = &caps[1];
        if name == "xmlns" || name.starts_with("xmlns:") {
            continue;
        }
        let value = caps.get(2).or_else(|| caps.get(3))?;
        out.push(Leaf {
            span: offset + value.start()..offset + value.end(),
            name: name.to_string(),
            value: unescape(value.as_str()).ok()?.into_owned(),
        });
    }
    Some(())
}

fn leaves(body: &str) -> Vec<Leaf> {
    walk(body).unwrap_or_default()
}

fn walk(body: &str) -> Option<Vec<Leaf>> {
    let mut reader = Reader::from_str(body);
    let mut stack: Vec<Frame> = Vec::new();
    let mut out = Vec::new();
    let mut saw_root = false;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader.read_event().ok()?;
        let after = reader.buffer_position() as usize;

        match event {
            Event::Start(start) => {
                if let Some(parent) = stack.last_mut() {
                    parent.mixed = true;
                } else if saw_root {
                    return None;
                }
                saw_root = true;
                let tag_start = after - 1 - start.len();
                attributes(body.get(tag_start..after - 1)?, tag_start, &mut out)?;
                stack.push(Frame {
                    name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
                    content_start: after,
                    text: None,
                    mixed: false,
                });
            }
            Event::Empty(start) => {
                if let Some(parent) = stack.last_mut() {
                    parent.mixed = true;
                } else if saw_root {
                    return None;
                }
                saw_root = true;
                let tag_start = after - 2 - start.len();
                attributes(body.get(tag_start..after - 2)?, tag_start, &mut out)?;
            }
            Event::End(_) => {
                let frame = stack.pop()?;
                if !frame.mixed {
                    let (span, value) = frame
                        .text
                        .unwrap_or((frame.content_start..frame.content_start, String::new()));
                    out.push(Leaf {
                        span,
                        name: frame.name,
                        value,
                    });
                }
            }
            Event::Text(text) => {
                let Some(frame) = stack.last_mut() else {
                    continue;
                };
                let raw_len = text.len();
                let value = text.unescape().ok()?.into_owned();
                if frame.text.is_some() {
                    frame.mixed = true;
                } else if !value.trim().is_empty() || !frame.mixed {
                    frame.text = Some((before..before + raw_len, value));
                }
            }
            Event::CData(cdata) => {
                let Some(frame) = stack.last_mut() else {
                    continue;
                };
                let value = String::from_utf8_lossy(&cdata).into_owned();
                let span = before..before + "<![CDATA[".len() + cdata.len() + "]]>".len();
                if frame.text.is_some() {
                    frame.mixed = true;
                } else {
                    frame.text = Some((span, value));
                }
            }
            Event::Comment(_) | Event::PI(_) => {
                if let Some(frame) = stack.last_mut() {
                    frame.mixed = true;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() || !saw_root {
        return None;
    }
    out.sort_by_key(|leaf| leaf.span.start);
    Some(out)
}

#[derive(Debug, Clone, Default)]
pub struct XmlVariant {
    params: Vec<NameValuePair>,
}

impl XmlVariant {
    fn write(&self, msg: &mut HttpMessage, position: usize, literal: &str) -> String {
        if !content_type_contains(msg, "xml") {
            return String::new();
        }
        let body = msg.request_body.clone();
        let Some(leaf) = leaves(&body).into_iter().nth(position) else {
            return String::new();
        };
        msg.set_request_body(splice(&body, leaf.span, literal));
        literal.to_string()
    }
}

impl Variant for XmlVariant {
    fn kind(&self) -> VariantKind {
        VariantKind::Xml
    }

    fn set_message(&mut self, msg: &HttpMessage) {
        self.params = if content_type_contains(msg, "xml") {
            leaves(&msg.request_body)
                .into_iter()
                .enumerate()
                .map(|(i, l)| NameValuePair::new(VariantKind::Xml, &l.name, &l.value, i))
                .collect()
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
