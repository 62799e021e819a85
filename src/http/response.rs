//! HTTP response types

use serde::{Deserialize, Serialize};

use super::message::{find_header, Header};

/// HTTP response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,

    /// Status text (e.g., "OK", "Not Found")
    pub reason: String,

    /// HTTP version
    pub version: String,

    /// Response headers in wire order
    pub headers: Vec<Header>,

    /// Response body
    pub body: Vec<u8>,

    /// Round trip time in milliseconds
    pub elapsed_ms: u64,
}

impl HttpResponse {
    pub fn new(status: u16, body: &str) -> Self {
        Self {
            status,
            reason: String::new(),
            version: "HTTP/1.1".to_string(),
            headers: Vec::new(),
            body: body.as_bytes().to_vec(),
            elapsed_ms: 0,
        }
    }

    /// Builder-style header append
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push(Header::new(name, value));
        self
    }

    /// First header value matching `name`
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Check if response is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get body as string
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Check whether the content type looks like HTML
    pub fn is_html(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.to_lowercase().contains("html"))
            .unwrap_or(false)
    }

    /// Serialize the response to wire format
    pub fn to_wire(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.version, self.status, self.reason);
        for header in &self.headers {
            out.push_str(&format!("{}: {}\r\n", header.name, header.value));
        }
        out.push_str("\r\n");
        out.push_str(&self.body_text());
        out
    }
}
