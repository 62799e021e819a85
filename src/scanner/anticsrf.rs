//! Anti-CSRF token handling
//!
//! Tokens are learned from hidden form inputs in observed HTML responses.
//! Before an attack request goes out, any query or form parameter named like
//! a learned token gets a fresh value, fetched by re-requesting the page that
//! issued the token. Whatever value the request carries is replaced.

use std::sync::OnceLock;

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;

use super::variant::{NameValuePair, VariantKind};
use crate::error::HttpError;
use crate::http::{HttpMessage, HttpSender};

/// Default token-name fragments, matched case-insensitively as substrings
pub const DEFAULT_TOKEN_NAMES: &[&str] = &[
    "csrf",
    "_csrf",
    "csrftoken",
    "csrf_token",
    "_token",
    "authenticity_token",
    "xsrf",
];

#[async_trait]
pub trait AntiCsrfHandler: Send + Sync {
    /// Whether a parameter with this name is a token (and so not attacked)
    fn is_token_param(&self, name: &str) -> bool;

    /// Learn tokens from the response carried by `msg`
    fn register(&self, msg: &HttpMessage);

    /// Replace stale token values in `msg` with fresh ones
    async fn refresh_tokens(&self, msg: &mut HttpMessage, sender: &dyn HttpSender) -> Result<(), HttpError>;
}

fn input_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<input[^>]*>").expect("Invalid input regex"))
}

fn name_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\bname\s*=\s*["']([^"']+)["']"#).expect("Invalid name regex"))
}

fn value_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\bvalue\s*=\s*["']([^"']*)["']"#).expect("Invalid value regex"))
}

/// `(name, value)` of every `<input>` that has both attributes
fn form_inputs(html: &str) -> Vec<(String, String)> {
    input_regex()
        .find_iter(html)
        .filter_map(|tag| {
            let tag = tag.as_str();
            let name = name_attr_regex().captures(tag)?.get(1)?.as_str().to_string();
            let value = value_attr_regex().captures(tag)?.get(1)?.as_str().to_string();
            Some((name, value))
        })
        .collect()
}

#[derive(Debug, Clone)]
struct Token {
    name: String,
    value: String,
    /// Request that returned the page carrying the token
    source: HttpMessage,
}

/// In-memory token store
pub struct AntiCsrfTokens {
    names: Vec<String>,
    tokens: RwLock<Vec<Token>>,
}

impl Default for AntiCsrfTokens {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_NAMES.iter().map(|s| s.to_string()).collect())
    }
}

impl AntiCsrfTokens {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names: names.into_iter().map(|n| n.to_lowercase()).collect(),
            tokens: RwLock::new(Vec::new()),
        }
    }

    /// Number of distinct tokens currently known
    pub fn len(&self) -> usize {
        self.tokens.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }

    fn learn(&self, name: &str, value: &str, source: &HttpMessage) {
        let mut tokens = self.tokens.write();
        match tokens
            .iter_mut()
            .find(|t| t.name == name && t.source.uri == source.uri)
        {
            Some(token) => token.value = value.to_string(),
            None => tokens.push(Token {
                name: name.to_string(),
                value: value.to_string(),
                source: source.clone(),
            }),
        }
    }

    /// Learned token with the name of `pair`. When several pages issue it,
    /// the one whose last value the pair carries wins, else the latest learned.
    fn token_for(&self, pair: &NameValuePair) -> Option<Token> {
        if !self.is_token_param(&pair.name) {
            return None;
        }
        let tokens = self.tokens.read();
        tokens
            .iter()
            .find(|t| t.name == pair.name && t.value == pair.value)
            .or_else(|| tokens.iter().rev().find(|t| t.name == pair.name))
            .cloned()
    }
}

#[async_trait]
impl AntiCsrfHandler for AntiCsrfTokens {
    fn is_token_param(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.names.iter().any(|n| name.contains(n.as_str()))
    }

    fn register(&self, msg: &HttpMessage) {
        let Some(response) = &msg.response else {
            return;
        };
        if !response.is_html() {
            return;
        }
        let mut source = msg.clone();
        source.response = None;
        for (name, value) in form_inputs(&response.body_text()) {
            if self.is_token_param(&name) {
                tracing::debug!(token = %name, uri = %msg.uri, "Learned anti-CSRF token");
                self.learn(&name, &value, &source);
            }
        }
    }

    async fn refresh_tokens(&self, msg: &mut HttpMessage, sender: &dyn HttpSender) -> Result<(), HttpError> {
        for kind in [VariantKind::Query, VariantKind::Form] {
            let mut variant = kind.create();
            variant.set_message(msg);
            let pairs = variant.param_list().to_vec();

            for pair in pairs {
                let Some(token) = self.token_for(&pair) else {
                    continue;
                };
                let mut page = token.source.clone();
                sender.send(&mut page, true).await?;

                let fresh = form_inputs(&page.response_body_text())
                    .into_iter()
                    .find(|(name, _)| *name == token.name)
                    .map(|(_, value)| value);
                match fresh {
                    Some(value) => {
                        variant.set_parameter(msg, &pair, &pair.name, &value);
                        self.learn(&token.name, &value, &token.source);
                    }
                    None => {
                        tracing::warn!(token = %token.name, uri = %token.source.uri, "Token missing from refreshed page");
                    }
                }
            }
        }
        Ok(())
    }
}
