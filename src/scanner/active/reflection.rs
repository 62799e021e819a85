//! Parameter reflection
//!
//! Writes a unique marker into each parameter and reports when it comes
//! back verbatim in the response body. Not a vulnerability by itself, but
//! every reflected parameter is a candidate for injection testing.

use async_trait::async_trait;

use crate::scanner::alert::{Confidence, Risk};
use crate::scanner::param_plugin::{ParamAttack, ParamPlugin};
use crate::scanner::plugin::{Category, PluginInfo};
use crate::scanner::policies::AttackStrength;

#[derive(Debug, Clone, Default)]
pub struct ParameterReflection;

impl ParameterReflection {
    pub const ID: u32 = 10100;

    fn marker() -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("ascan{}", &id[..10])
    }
}

impl PluginInfo for ParameterReflection {
    fn id(&self) -> u32 {
        Self::ID
    }

    fn name(&self) -> &str {
        "Parameter Reflection"
    }

    fn category(&self) -> Category {
        Category::Misc
    }

    fn description(&self) -> &str {
        "A value supplied in this parameter is echoed back unencoded in the response body."
    }

    fn solution(&self) -> &str {
        "Validate the input and encode it for the context it is written into."
    }

    fn cwe_id(&self) -> Option<u32> {
        Some(20)
    }

    fn wasc_id(&self) -> Option<u32> {
        Some(20)
    }
}

#[async_trait]
impl ParamPlugin for ParameterReflection {
    async fn scan_param(&self, attack: &mut ParamAttack<'_>, name: &str, value: &str) -> anyhow::Result<()> {
        let marker = Self::marker();
        // higher strengths also try the marker appended to the original value
        let mut probes = vec![marker.clone()];
        if attack.ctx().strength() >= AttackStrength::High && !value.is_empty() {
            probes.push(format!("{}{}", value, marker));
        }

        for probe in probes {
            if attack.is_stop() {
                return Ok(());
            }
            attack.reset();
            let written = attack.set_parameter(name, &probe);
            if written.is_empty() {
                return Ok(());
            }
            attack.send(false).await?;

            if attack.message().response_body_text().contains(&marker) {
                let alert = attack
                    .new_alert(Risk::Info)
                    .with_confidence(Confidence::Medium)
                    .with_attack(&written)
                    .with_evidence(&marker)
                    .with_other_info(&format!("Parameter location: {}", attack.kind().name()));
                attack.raise(alert);
                return Ok(());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use crate::http::{HttpMessage, HttpResponse, HttpSender};
    use crate::scanner::param::ScannerParam;
    use crate::scanner::param_plugin::ParamScan;
    use crate::scanner::plugin::test_support::{context, AlertLog};
    use crate::scanner::plugin::Plugin;
    use std::sync::Arc;

    /// Echoes the decoded `q` parameter back, drops everything else
    struct EchoQ;

    #[async_trait]
    impl HttpSender for EchoQ {
        async fn send(&self, msg: &mut HttpMessage, _follow: bool) -> Result<(), HttpError> {
            let url = url::Url::parse(&msg.uri).map_err(|e| HttpError::InvalidUrl(e.to_string()))?;
            let q = url
                .query_pairs()
                .find(|(k, _)| k == "q")
                .map(|(_, v)| v.to_string())
                .unwrap_or_default();
            msg.response = Some(HttpResponse::new(200, &format!("<p>You searched for {}</p>", q)));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reports_only_reflected_parameters() {
        let plugin = ParamScan::new(ParameterReflection);
        let log = Arc::new(AlertLog::default());
        let ctx = context(&plugin, ScannerParam::default(), Arc::new(EchoQ), log.clone());

        plugin
            .scan(&ctx, &HttpMessage::new("GET", "http://example.com/search?q=shoes&page=2"))
            .await
            .unwrap();

        let alerts = log.alerts.lock();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].plugin_id, ParameterReflection::ID);
        assert_eq!(alerts[0].param.as_deref(), Some("q"));
        assert_eq!(alerts[0].risk, Risk::Info);
        assert!(alerts[0].attack.as_deref().unwrap_or("").starts_with("q=ascan"));
        assert_eq!(ctx.request_count(), 2);
    }
}
