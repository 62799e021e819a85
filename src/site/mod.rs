//! Site tree
//!
//! Hosts and paths discovered by the proxy/spider, each node holding the
//! request templates observed for it. Read-only from the scanner's side.

use std::collections::BTreeMap;

use crate::http::HttpMessage;

/// One node of the site tree
#[derive(Debug, Clone, Default)]
pub struct SiteNode {
    /// Segment name (`scheme://host` for host nodes, empty for the root)
    name: String,

    /// Host identity this node belongs to (`None` for the root)
    host: Option<String>,

    /// Child nodes keyed by segment name
    children: BTreeMap<String, SiteNode>,

    /// Request templates observed at this node
    messages: Vec<HttpMessage>,
}

impl SiteNode {
    fn new(name: &str, host: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            host,
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn is_root(&self) -> bool {
        self.host.is_none()
    }

    /// Direct children in name order
    pub fn children(&self) -> impl Iterator<Item = &SiteNode> {
        self.children.values()
    }

    pub fn child(&self, name: &str) -> Option<&SiteNode> {
        self.children.get(name)
    }

    pub fn messages(&self) -> &[HttpMessage] {
        &self.messages
    }

    /// Templates of this node and every descendant, depth first
    pub fn messages_in_subtree(&self) -> Vec<HttpMessage> {
        let mut out = self.messages.clone();
        for child in self.children.values() {
            out.extend(child.messages_in_subtree());
        }
        out
    }

    fn add_message(&mut self, msg: HttpMessage) {
        let duplicate = self.messages.iter().any(|m| {
            m.method == msg.method && m.uri == msg.uri && m.request_body == msg.request_body
        });
        if !duplicate {
            self.messages.push(msg);
        }
    }
}

/// Tree of discovered hosts and paths
#[derive(Debug, Clone, Default)]
pub struct SiteTree {
    root: SiteNode,
}

impl SiteTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(&self) -> &SiteNode {
        &self.root
    }

    /// Host node for `scheme://host[:port]`
    pub fn host(&self, host: &str) -> Option<&SiteNode> {
        self.root.child(host)
    }

    /// Add a request template; returns false when the URI has no host
    pub fn add(&mut self, msg: HttpMessage) -> bool {
        let Some(host) = msg.host_key() else {
            tracing::debug!(uri = %msg.uri, "Ignoring message without host");
            return false;
        };

        let segments: Vec<String> = msg
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        let mut node = self
            .root
            .children
            .entry(host.clone())
            .or_insert_with(|| SiteNode::new(&host, Some(host.clone())));

        for segment in segments {
            node = node
                .children
                .entry(segment.clone())
                .or_insert_with(|| SiteNode::new(&segment, Some(host.clone())));
        }

        node.add_message(msg);
        true
    }

    /// Number of host nodes
    pub fn host_count(&self) -> usize {
        self.root.children.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_grouped_by_host() {
        let mut tree = SiteTree::new();
        assert!(tree.add(HttpMessage::new("GET", "http://a.example/x/y?id=1")));
        assert!(tree.add(HttpMessage::new("GET", "http://a.example/z")));
        assert!(tree.add(HttpMessage::new("GET", "https://b.example:8443/")));
        assert!(!tree.add(HttpMessage::new("GET", "/relative")));

        assert_eq!(tree.host_count(), 2);
        let a = tree.host("http://a.example").unwrap();
        assert_eq!(a.host(), Some("http://a.example"));
        assert_eq!(a.messages_in_subtree().len(), 2);

        let b = tree.host("https://b.example:8443").unwrap();
        assert_eq!(b.messages().len(), 1);
        assert!(tree.root().is_root());
    }

    #[test]
    fn test_duplicate_templates_stored_once() {
        let mut tree = SiteTree::new();
        tree.add(HttpMessage::new("GET", "http://a.example/x?id=1"));
        tree.add(HttpMessage::new("GET", "http://a.example/x?id=1"));
        tree.add(HttpMessage::new("POST", "http://a.example/x?id=1"));
        let x = tree.host("http://a.example").unwrap().child("x").unwrap();
        assert_eq!(x.messages().len(), 2);
    }
}
