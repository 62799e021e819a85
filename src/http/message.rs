//! HTTP message model
//!
//! A request template plus (once sent) its response. The scanner deep-copies
//! messages freely, so everything here is plain owned data.

use serde::{Deserialize, Serialize};

use super::response::HttpResponse;
use crate::error::HttpError;

/// A single header line, kept in wire order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// First header value matching `name` (case-insensitive)
pub fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// HTTP request/response pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpMessage {
    /// Request method
    pub method: String,

    /// Absolute request URI, kept exactly as received
    pub uri: String,

    /// HTTP version of the request line
    pub version: String,

    /// Request headers in wire order
    pub request_headers: Vec<Header>,

    /// Request body
    pub request_body: String,

    /// Response, once the message has been sent
    pub response: Option<HttpResponse>,
}

impl HttpMessage {
    /// Create a request with a `Host` header derived from the URI
    pub fn new(method: &str, uri: &str) -> Self {
        let mut msg = Self {
            method: method.to_uppercase(),
            uri: uri.to_string(),
            version: "HTTP/1.1".to_string(),
            request_headers: Vec::new(),
            request_body: String::new(),
            response: None,
        };
        if let Ok(url) = url::Url::parse(uri) {
            if let Some(host) = url.host_str() {
                let host = match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                };
                msg.request_headers.push(Header::new("Host", &host));
            }
        }
        msg
    }

    /// Parse a raw HTTP/1.x request. Origin-form targets are made absolute
    /// using the `Host` header and `secure` to pick the scheme.
    pub fn parse_request(raw: &str, secure: bool) -> Result<Self, HttpError> {
        let (head, body) = match raw.find("\r\n\r\n") {
            Some(idx) => (&raw[..idx], &raw[idx + 4..]),
            None => match raw.find("\n\n") {
                Some(idx) => (&raw[..idx], &raw[idx + 2..]),
                None => (raw, ""),
            },
        };

        let mut lines = head.lines();
        let request_line = lines
            .next()
            .ok_or_else(|| HttpError::MalformedHeader("empty request".to_string()))?;
        let mut parts = request_line.split_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v)) => (m, t, v),
            _ => {
                return Err(HttpError::MalformedHeader(format!(
                    "bad request line: {}",
                    request_line
                )))
            }
        };

        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HttpError::MalformedHeader(line.to_string()))?;
            headers.push(Header::new(name.trim(), value.trim()));
        }

        let uri = if target.contains("://") {
            target.to_string()
        } else {
            let host = find_header(&headers, "host")
                .ok_or_else(|| HttpError::MalformedHeader("missing Host header".to_string()))?;
            let scheme = if secure { "https" } else { "http" };
            format!("{}://{}{}", scheme, host, target)
        };

        Ok(Self {
            method: method.to_uppercase(),
            uri,
            version: version.to_string(),
            request_headers: headers,
            request_body: body.to_string(),
            response: None,
        })
    }

    /// First request header value matching `name`
    pub fn request_header(&self, name: &str) -> Option<&str> {
        find_header(&self.request_headers, name)
    }

    /// Replace the first header named `name`, or append it
    pub fn set_request_header(&mut self, name: &str, value: &str) {
        match self
            .request_headers
            .iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(name))
        {
            Some(header) => header.value = value.to_string(),
            None => self.request_headers.push(Header::new(name, value)),
        }
    }

    /// Remove every header named `name`
    pub fn remove_request_header(&mut self, name: &str) {
        self.request_headers
            .retain(|h| !h.name.eq_ignore_ascii_case(name));
    }

    /// Replace the body. `Content-Length` is rewritten only if already present.
    pub fn set_request_body(&mut self, body: String) {
        let len = body.len();
        self.request_body = body;
        if self.request_header("content-length").is_some() {
            self.set_request_header("Content-Length", &len.to_string());
        }
    }

    /// Lowercased request content type, if any
    pub fn content_type(&self) -> Option<String> {
        self.request_header("content-type").map(|ct| ct.to_lowercase())
    }

    /// Raw query string (without `?`), `None` when the URI has none
    pub fn query(&self) -> Option<&str> {
        let parts = UriParts::of(&self.uri);
        if parts.query < parts.fragment {
            Some(&self.uri[parts.query + 1..parts.fragment])
        } else {
            None
        }
    }

    /// Replace the raw query string; an empty string drops the `?`
    pub fn set_query(&mut self, query: &str) {
        let parts = UriParts::of(&self.uri);
        let mut uri = String::with_capacity(self.uri.len() + query.len());
        uri.push_str(&self.uri[..parts.query]);
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(query);
        }
        uri.push_str(&self.uri[parts.fragment..]);
        self.uri = uri;
    }

    /// Raw path component
    pub fn path(&self) -> &str {
        let parts = UriParts::of(&self.uri);
        &self.uri[parts.path..parts.query]
    }

    /// Replace the raw path component
    pub fn set_path(&mut self, path: &str) {
        let parts = UriParts::of(&self.uri);
        self.uri = format!("{}{}{}", &self.uri[..parts.path], path, &self.uri[parts.query..]);
    }

    /// Host identity: `scheme://host[:port]`
    pub fn host_key(&self) -> Option<String> {
        let url = url::Url::parse(&self.uri).ok()?;
        let host = url.host_str()?;
        Some(match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        })
    }

    /// Origin-form request target (`/path?query`)
    pub fn request_target(&self) -> String {
        let parts = UriParts::of(&self.uri);
        let target = &self.uri[parts.path..parts.fragment];
        if target.starts_with('/') {
            target.to_string()
        } else {
            format!("/{}", target)
        }
    }

    /// Serialize the request to wire format
    pub fn request_to_wire(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, self.request_target(), self.version);
        for header in &self.request_headers {
            out.push_str(&header.name);
            out.push_str(": ");
            out.push_str(&header.value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.push_str(&self.request_body);
        out
    }

    /// Serialize the response to wire format, if there is one
    pub fn response_to_wire(&self) -> Option<String> {
        self.response.as_ref().map(|r| r.to_wire())
    }

    /// Response body as text (empty when not sent yet)
    pub fn response_body_text(&self) -> String {
        self.response
            .as_ref()
            .map(|r| r.body_text())
            .unwrap_or_default()
    }
}

/// Byte offsets of the URI components
struct UriParts {
    path: usize,
    query: usize,
    fragment: usize,
}

impl UriParts {
    fn of(uri: &str) -> Self {
        let authority = uri.find("://").map(|i| i + 3).unwrap_or(0);
        let path = uri[authority..]
            .find(['/', '?', '#'])
            .map(|i| i + authority)
            .unwrap_or(uri.len());
        let fragment = uri[path..].find('#').map(|i| i + path).unwrap_or(uri.len());
        let query = uri[path..fragment]
            .find('?')
            .map(|i| i + path)
            .unwrap_or(fragment);
        Self {
            path,
            query,
            fragment,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origin_form_request() {
        let raw = "POST /login?next=%2F HTTP/1.1\r\nHost: example.com\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 7\r\n\r\na=1&b=2";
        let msg = HttpMessage::parse_request(raw, true).unwrap();
        assert_eq!(msg.method, "POST");
        assert_eq!(msg.uri, "https://example.com/login?next=%2F");
        assert_eq!(msg.query(), Some("next=%2F"));
        assert_eq!(msg.path(), "/login");
        assert_eq!(msg.request_body, "a=1&b=2");
        assert_eq!(msg.host_key().as_deref(), Some("https://example.com"));
    }

    #[test]
    fn test_parse_rejects_missing_host() {
        let err = HttpMessage::parse_request("GET / HTTP/1.1\r\n\r\n", false).unwrap_err();
        assert!(matches!(err, HttpError::MalformedHeader(_)));
    }

    #[test]
    fn test_set_query_keeps_fragment() {
        let mut msg = HttpMessage::new("GET", "http://example.com:8080/a?x=1#top");
        msg.set_query("x=2&y=3");
        assert_eq!(msg.uri, "http://example.com:8080/a?x=2&y=3#top");
        msg.set_query("");
        assert_eq!(msg.uri, "http://example.com:8080/a#top");
        assert_eq!(msg.host_key().as_deref(), Some("http://example.com:8080"));
    }

    #[test]
    fn test_body_updates_existing_content_length_only() {
        let mut msg = HttpMessage::new("POST", "http://example.com/");
        msg.set_request_body("abc".to_string());
        assert!(msg.request_header("content-length").is_none());

        msg.set_request_header("Content-Length", "3");
        msg.set_request_body("abcdef".to_string());
        assert_eq!(msg.request_header("content-length"), Some("6"));
    }

    #[test]
    fn test_request_to_wire_preserves_header_order() {
        let mut msg = HttpMessage::new("GET", "http://example.com/item?id=5");
        msg.request_headers.push(Header::new("X-B", "2"));
        msg.request_headers.push(Header::new("X-A", "1"));
        let wire = msg.request_to_wire();
        assert!(wire.starts_with("GET /item?id=5 HTTP/1.1\r\nHost: example.com\r\nX-B: 2\r\nX-A: 1\r\n\r\n"));
    }

    #[test]
    fn test_response_to_wire() {
        let mut msg = HttpMessage::new("GET", "http://example.com/");
        assert_eq!(msg.response_to_wire(), None);

        let mut response = HttpResponse::new(404, "gone").with_header("Content-Type", "text/plain");
        response.reason = "Not Found".to_string();
        msg.response = Some(response);
        assert_eq!(
            msg.response_to_wire().as_deref(),
            Some("HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\n\r\ngone")
        );
    }
}
