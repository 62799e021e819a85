//! HTTP module
//!
//! Message model plus the transport seam the scanner sends through.

mod client;
mod message;
mod response;

use async_trait::async_trait;

pub use client::HttpClient;
pub use message::{find_header, Header, HttpMessage};
pub use response::HttpResponse;

use crate::error::HttpError;

/// Sends one request and stores the response on the same message
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, msg: &mut HttpMessage, follow_redirects: bool) -> Result<(), HttpError>;
}
