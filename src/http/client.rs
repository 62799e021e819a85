//! HTTP client implementation

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use std::time::{Duration, Instant};

use super::message::{Header, HttpMessage};
use super::response::HttpResponse;
use super::HttpSender;
use crate::app::ConnectionParam;
use crate::error::HttpError;

/// Headers the transport computes itself
const TRANSPORT_HEADERS: &[&str] = &["host", "content-length", "connection", "transfer-encoding"];

/// reqwest-backed sender
pub struct HttpClient {
    /// Client that follows redirects
    following: reqwest::Client,

    /// Client that never follows redirects
    direct: reqwest::Client,

    /// Request timeout
    timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: &ConnectionParam) -> Result<Self> {
        let build = |policy: reqwest::redirect::Policy| -> Result<reqwest::Client> {
            let mut builder = reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .redirect(policy)
                .user_agent(&config.user_agent)
                .danger_accept_invalid_certs(config.accept_invalid_certs);

            if let Some(proxy) = &config.upstream_proxy {
                builder = builder.proxy(
                    reqwest::Proxy::all(proxy).context("Invalid upstream proxy")?,
                );
            }

            builder.build().context("Failed to create HTTP client")
        };

        Ok(Self {
            following: build(reqwest::redirect::Policy::limited(config.max_redirects))?,
            direct: build(reqwest::redirect::Policy::none())?,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn map_error(&self, err: reqwest::Error) -> HttpError {
        if err.is_timeout() {
            HttpError::Timeout(self.timeout.as_millis() as u64)
        } else if err.is_connect() {
            HttpError::Connection(err.to_string())
        } else if err.is_builder() {
            HttpError::InvalidUrl(err.to_string())
        } else {
            HttpError::RequestFailed(err.to_string())
        }
    }
}

#[async_trait]
impl HttpSender for HttpClient {
    async fn send(&self, msg: &mut HttpMessage, follow_redirects: bool) -> Result<(), HttpError> {
        let start = Instant::now();

        let method = reqwest::Method::from_bytes(msg.method.as_bytes())
            .map_err(|_| HttpError::MalformedHeader(format!("invalid method {}", msg.method)))?;
        let url = reqwest::Url::parse(&msg.uri)
            .map_err(|_| HttpError::InvalidUrl(msg.uri.clone()))?;

        let client = if follow_redirects {
            &self.following
        } else {
            &self.direct
        };
        let mut builder = client.request(method, url);

        for header in &msg.request_headers {
            if TRANSPORT_HEADERS.contains(&header.name.to_lowercase().as_str()) {
                continue;
            }
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|_| HttpError::MalformedHeader(header.name.clone()))?;
            let value = HeaderValue::from_str(&header.value)
                .map_err(|_| HttpError::MalformedHeader(format!("{}: {}", header.name, header.value)))?;
            builder = builder.header(name, value);
        }

        if !msg.request_body.is_empty() {
            builder = builder.body(msg.request_body.clone());
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;

        let status = response.status();
        let version = format!("{:?}", response.version());
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| Header::new(k.as_str(), &String::from_utf8_lossy(v.as_bytes())))
            .collect();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;

        msg.response = Some(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            version,
            headers,
            body: body.to_vec(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        });

        tracing::trace!(uri = %msg.uri, status = status.as_u16(), "Request sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_client_creation() {
        let client = HttpClient::new(&ConnectionParam::default());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_send_populates_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item"))
            .and(query_param("id", "5'"))
            .and(header("x-probe", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain")
                    .set_body_string("found"),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new(&ConnectionParam::default()).unwrap();
        let mut msg = HttpMessage::new("GET", &format!("{}/item?id=5%27", server.uri()));
        msg.request_headers.push(Header::new("X-Probe", "1"));

        client.send(&mut msg, false).await.unwrap();

        let response = msg.response.as_ref().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body_text(), "found");
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_redirects_follow_flag() {
        let server = MockServer::start().await;
        Mock::given(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
            .mount(&server)
            .await;
        Mock::given(path("/new"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = HttpClient::new(&ConnectionParam::default()).unwrap();

        let mut direct = HttpMessage::new("GET", &format!("{}/old", server.uri()));
        client.send(&mut direct, false).await.unwrap();
        assert_eq!(direct.response.unwrap().status, 302);

        let mut followed = HttpMessage::new("GET", &format!("{}/old", server.uri()));
        client.send(&mut followed, true).await.unwrap();
        assert_eq!(followed.response.unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_invalid_url_is_typed_error() {
        let client = HttpClient::new(&ConnectionParam::default()).unwrap();
        let mut msg = HttpMessage::new("GET", "not a url");
        let err = client.send(&mut msg, false).await.unwrap_err();
        assert!(matches!(err, HttpError::InvalidUrl(_)));
    }
}
