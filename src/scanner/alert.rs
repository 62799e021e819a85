//! Alerts raised by active scan plugins

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::HttpMessage;

/// Risk level for alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Info,
    Low,
    Medium,
    High,
}

impl Risk {
    pub fn as_str(&self) -> &'static str {
        match self {
            Risk::Info => "info",
            Risk::Low => "low",
            Risk::Medium => "medium",
            Risk::High => "high",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Risk::Info => "Informational",
            Risk::Low => "Low",
            Risk::Medium => "Medium",
            Risk::High => "High",
        }
    }
}

/// How sure the plugin is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    FalsePositive,
    Low,
    Medium,
    High,
    Confirmed,
}

/// A finding raised against one message
///
/// Alerts are not deduplicated here; listeners own whatever they do with them.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// Unique ID
    pub id: String,

    pub plugin_id: u32,

    /// Alert name/title
    pub name: String,

    pub risk: Risk,

    pub confidence: Confidence,

    pub description: String,

    /// Request method and URI of the affected message
    pub method: String,
    pub uri: String,

    /// Attacked parameter (if applicable)
    pub param: Option<String>,

    /// Value sent to trigger the finding
    pub attack: Option<String>,

    /// Evidence/proof of the vulnerability
    pub evidence: Option<String>,

    pub other_info: Option<String>,

    /// Remediation advice
    pub solution: Option<String>,

    /// References/links
    pub reference: Option<String>,

    pub cwe_id: Option<u32>,

    pub wasc_id: Option<u32>,

    /// The attack message, response included
    #[serde(skip)]
    pub message: HttpMessage,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    /// Create a new alert against `message`
    pub fn new(plugin_id: u32, name: &str, risk: Risk, message: &HttpMessage) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            plugin_id,
            name: name.to_string(),
            risk,
            confidence: Confidence::Medium,
            description: String::new(),
            method: message.method.clone(),
            uri: message.uri.clone(),
            param: None,
            attack: None,
            evidence: None,
            other_info: None,
            solution: None,
            reference: None,
            cwe_id: None,
            wasc_id: None,
            message: message.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Builder pattern methods
    pub fn with_confidence(mut self, confidence: Confidence) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_risk(mut self, risk: Risk) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = desc.to_string();
        self
    }

    pub fn with_param(mut self, param: &str) -> Self {
        self.param = Some(param.to_string());
        self
    }

    pub fn with_attack(mut self, attack: &str) -> Self {
        self.attack = Some(attack.to_string());
        self
    }

    pub fn with_evidence(mut self, evidence: &str) -> Self {
        self.evidence = Some(evidence.to_string());
        self
    }

    pub fn with_other_info(mut self, info: &str) -> Self {
        self.other_info = Some(info.to_string());
        self
    }

    pub fn with_solution(mut self, solution: &str) -> Self {
        self.solution = Some(solution.to_string());
        self
    }

    pub fn with_reference(mut self, reference: &str) -> Self {
        self.reference = Some(reference.to_string());
        self
    }

    pub fn with_cwe(mut self, cwe_id: u32) -> Self {
        self.cwe_id = Some(cwe_id);
        self
    }

    pub fn with_wasc(mut self, wasc_id: u32) -> Self {
        self.wasc_id = Some(wasc_id);
        self
    }

    /// Replace the affected message (e.g. with the final attack message)
    pub fn with_message(mut self, message: &HttpMessage) -> Self {
        self.method = message.method.clone();
        self.uri = message.uri.clone();
        self.message = message.clone();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_json_shape() {
        let msg = HttpMessage::new("POST", "http://example.com/login");
        let alert = Alert::new(40018, "SQL Injection", Risk::High, &msg)
            .with_confidence(Confidence::Confirmed)
            .with_param("user")
            .with_attack("' OR '1'='1")
            .with_cwe(89);

        assert_eq!(alert.method, "POST");
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["risk"], "high");
        assert_eq!(json["confidence"], "confirmed");
        assert_eq!(json["cwe_id"], 89);
        assert!(json.get("message").is_none());
        assert!(Risk::High > Risk::Info);
    }
}
