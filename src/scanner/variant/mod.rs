//! Parameter variants
//!
//! A variant knows one way parameters are encoded in a request (query string,
//! form body, JSON, cookies, ...). It extracts the attackable name/value pairs
//! from one message and writes a new value back into another message (usually
//! a fresh copy of the first) at the same structural position, leaving every
//! other byte of the encoding alone.
//!
//! Slots are located by `position`, never by name or value: names repeat
//! (`a=1&a=2`) and values are what the attack changes.

mod cookie;
mod gwt;
mod header;
mod json;
mod multipart;
mod odata;
mod url_path;
mod urlencoded;
mod xml;

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::http::HttpMessage;

pub use cookie::CookieVariant;
pub use gwt::GwtVariant;
pub use header::HeaderVariant;
pub use json::JsonVariant;
pub use multipart::MultipartVariant;
pub use odata::{ODataFilterVariant, ODataIdVariant};
pub use url_path::UrlPathVariant;
pub use urlencoded::UrlEncodedVariant;
pub use xml::XmlVariant;

/// Where a parameter lives in the request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    Query,
    Form,
    Multipart,
    UrlPath,
    Header,
    Cookie,
    Json,
    Xml,
    Gwt,
    ODataId,
    ODataFilter,
}

impl VariantKind {
    /// All kinds, in the order the scanner runs them
    pub fn all() -> &'static [VariantKind] {
        &[
            VariantKind::Query,
            VariantKind::Form,
            VariantKind::Multipart,
            VariantKind::Xml,
            VariantKind::Json,
            VariantKind::Gwt,
            VariantKind::ODataId,
            VariantKind::ODataFilter,
            VariantKind::UrlPath,
            VariantKind::Header,
            VariantKind::Cookie,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            VariantKind::Query => "query",
            VariantKind::Form => "form",
            VariantKind::Multipart => "multipart",
            VariantKind::UrlPath => "url_path",
            VariantKind::Header => "header",
            VariantKind::Cookie => "cookie",
            VariantKind::Json => "json",
            VariantKind::Xml => "xml",
            VariantKind::Gwt => "gwt",
            VariantKind::ODataId => "odata_id",
            VariantKind::ODataFilter => "odata_filter",
        }
    }

    /// Fresh, unbound variant of this kind
    pub fn create(&self) -> Box<dyn Variant> {
        match self {
            VariantKind::Query => Box::new(UrlEncodedVariant::query()),
            VariantKind::Form => Box::new(UrlEncodedVariant::form()),
            VariantKind::Multipart => Box::new(MultipartVariant::default()),
            VariantKind::UrlPath => Box::new(UrlPathVariant::default()),
            VariantKind::Header => Box::new(HeaderVariant::default()),
            VariantKind::Cookie => Box::new(CookieVariant::default()),
            VariantKind::Json => Box::new(JsonVariant::default()),
            VariantKind::Xml => Box::new(XmlVariant::default()),
            VariantKind::Gwt => Box::new(GwtVariant::default()),
            VariantKind::ODataId => Box::new(ODataIdVariant::default()),
            VariantKind::ODataFilter => Box::new(ODataFilterVariant::default()),
        }
    }
}

/// One attackable parameter as extracted from a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameValuePair {
    pub kind: VariantKind,
    pub name: String,
    pub value: String,
    pub position: usize,
}

impl NameValuePair {
    pub fn new(kind: VariantKind, name: &str, value: &str, position: usize) -> Self {
        Self {
            kind,
            name: name.to_string(),
            value: value.to_string(),
            position,
        }
    }
}

/// Extracts and injects parameters for one encoding
///
/// `set_parameter` escapes `value` for the encoding; `set_escaped_parameter`
/// writes it verbatim. Both return the fragment actually written, or an empty
/// string when `original.position` does not exist in `msg`.
pub trait Variant: Send + Sync {
    fn kind(&self) -> VariantKind;

    /// Bind to `msg` and extract its parameter list. Never fails: an encoding
    /// that does not apply or does not parse yields an empty list.
    fn set_message(&mut self, msg: &HttpMessage);

    /// Parameters in source order; `position` indexes into this list
    fn param_list(&self) -> &[NameValuePair];

    fn set_parameter(
        &self,
        msg: &mut HttpMessage,
        original: &NameValuePair,
        name: &str,
        value: &str,
    ) -> String;

    fn set_escaped_parameter(
        &self,
        msg: &mut HttpMessage,
        original: &NameValuePair,
        name: &str,
        value: &str,
    ) -> String;
}

/// Replace `span` of `src` with `with`
pub(crate) fn splice(src: &str, span: Range<usize>, with: &str) -> String {
    let mut out = String::with_capacity(src.len() + with.len());
    out.push_str(&src[..span.start]);
    out.push_str(with);
    out.push_str(&src[span.end..]);
    out
}

/// Whether the message's content type contains `needle`
pub(crate) fn content_type_contains(msg: &HttpMessage, needle: &str) -> bool {
    msg.content_type()
        .map(|ct| ct.contains(needle))
        .unwrap_or(false)
}
