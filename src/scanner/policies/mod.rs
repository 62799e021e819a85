//! Scan policies: which plugins run, and how hard they try

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How many requests a plugin may spend per parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackStrength {
    Low,
    Medium,
    High,
    Insane,
}

impl AttackStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttackStrength::Low => "low",
            AttackStrength::Medium => "medium",
            AttackStrength::High => "high",
            AttackStrength::Insane => "insane",
        }
    }
}

/// How much evidence a plugin needs before raising. `Off` disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertThreshold {
    Off,
    Low,
    Medium,
    High,
}

impl AlertThreshold {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertThreshold::Off => "off",
            AlertThreshold::Low => "low",
            AlertThreshold::Medium => "medium",
            AlertThreshold::High => "high",
        }
    }
}

/// Per-plugin override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginPolicy {
    pub enabled: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<AttackStrength>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<AlertThreshold>,
}

impl Default for PluginPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            strength: None,
            threshold: None,
        }
    }
}

/// Scan policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPolicy {
    /// Policy name
    pub name: String,

    /// Description
    pub description: String,

    pub default_strength: AttackStrength,

    pub default_threshold: AlertThreshold,

    /// Overrides keyed by plugin id (TOML keys are strings)
    pub plugins: BTreeMap<String, PluginPolicy>,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl ScanPolicy {
    /// Standard scan policy - balanced between speed and coverage
    pub fn standard() -> Self {
        Self {
            name: "Standard".to_string(),
            description: "Balanced scan with every plugin at medium strength".to_string(),
            default_strength: AttackStrength::Medium,
            default_threshold: AlertThreshold::Medium,
            plugins: BTreeMap::new(),
        }
    }

    /// Quick scan - fast but limited coverage
    pub fn quick() -> Self {
        Self {
            name: "Quick".to_string(),
            description: "Fast scan with reduced payloads".to_string(),
            default_strength: AttackStrength::Low,
            ..Self::standard()
        }
    }

    /// Full scan - comprehensive but slow
    pub fn full() -> Self {
        Self {
            name: "Full".to_string(),
            description: "Comprehensive scan that reports weak evidence too".to_string(),
            default_strength: AttackStrength::Insane,
            default_threshold: AlertThreshold::Low,
            plugins: BTreeMap::new(),
        }
    }

    /// Preset by name, case-insensitive
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "standard" | "default" => Some(Self::standard()),
            "quick" => Some(Self::quick()),
            "full" => Some(Self::full()),
            _ => None,
        }
    }

    fn plugin(&self, id: u32) -> Option<&PluginPolicy> {
        self.plugins.get(&id.to_string())
    }

    /// Enabled and not at threshold `Off`
    pub fn is_enabled(&self, id: u32) -> bool {
        self.plugin(id).map_or(true, |p| p.enabled) && self.threshold(id) != AlertThreshold::Off
    }

    pub fn strength(&self, id: u32) -> AttackStrength {
        self.plugin(id)
            .and_then(|p| p.strength)
            .unwrap_or(self.default_strength)
    }

    pub fn threshold(&self, id: u32) -> AlertThreshold {
        self.plugin(id)
            .and_then(|p| p.threshold)
            .unwrap_or(self.default_threshold)
    }

    /// Enable a plugin
    pub fn enable_plugin(&mut self, id: u32) {
        self.plugins.entry(id.to_string()).or_default().enabled = true;
    }

    /// Disable a plugin
    pub fn disable_plugin(&mut self, id: u32) {
        self.plugins.entry(id.to_string()).or_default().enabled = false;
    }

    pub fn set_strength(&mut self, id: u32, strength: AttackStrength) {
        self.plugins.entry(id.to_string()).or_default().strength = Some(strength);
    }

    pub fn set_threshold(&mut self, id: u32, threshold: AlertThreshold) {
        self.plugins.entry(id.to_string()).or_default().threshold = Some(threshold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(ScanPolicy::quick().strength(1), AttackStrength::Low);
        assert_eq!(ScanPolicy::full().threshold(1), AlertThreshold::Low);
        assert_eq!(ScanPolicy::preset("QUICK"), Some(ScanPolicy::quick()));
        assert!(ScanPolicy::preset("nope").is_none());
    }

    #[test]
    fn test_overrides_and_off_threshold() {
        let mut policy = ScanPolicy::standard();
        assert!(policy.is_enabled(40018));

        policy.set_strength(40018, AttackStrength::High);
        assert_eq!(policy.strength(40018), AttackStrength::High);
        assert_eq!(policy.strength(1), AttackStrength::Medium);

        policy.set_threshold(40018, AlertThreshold::Off);
        assert!(!policy.is_enabled(40018));

        policy.set_threshold(40018, AlertThreshold::High);
        policy.disable_plugin(40018);
        assert!(!policy.is_enabled(40018));
        policy.enable_plugin(40018);
        assert!(policy.is_enabled(40018));
    }

    #[test]
    fn test_toml_round_trip() {
        let src = r#"
name = "Custom"
default_strength = "high"

[plugins.10100]
threshold = "off"

[plugins.40012]
strength = "insane"
"#;
        let policy: ScanPolicy = toml::from_str(src).unwrap();
        assert_eq!(policy.name, "Custom");
        assert_eq!(policy.default_threshold, AlertThreshold::Medium);
        assert!(!policy.is_enabled(10100));
        assert_eq!(policy.strength(40012), AttackStrength::Insane);
        assert_eq!(policy.strength(7), AttackStrength::High);

        let again: ScanPolicy = toml::from_str(&toml::to_string(&policy).unwrap()).unwrap();
        assert_eq!(again, policy);
    }
}
