//! Plugin contracts and the per-plugin scan context

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::alert::{Alert, Risk};
use super::anticsrf::AntiCsrfHandler;
use super::control::ScanControl;
use super::listener::ScannerListener;
use super::param::{ParamExclusions, ScannerParam};
use super::policies::{AlertThreshold, AttackStrength};
use crate::error::HttpError;
use crate::http::{HttpMessage, HttpSender};

/// Header carrying the plugin id when `inject_plugin_id_in_header` is set
pub const SCAN_ID_HEADER: &str = "X-Ancarna-Scan-Id";

/// Plugin category; within a dependency tier plugins run in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    InfoGather,
    Browser,
    Server,
    Misc,
    Injection,
}

/// Static identity of a plugin
pub trait PluginInfo {
    fn id(&self) -> u32;

    fn name(&self) -> &str;

    fn category(&self) -> Category {
        Category::Misc
    }

    /// Ids of plugins that must finish on a host before this one starts
    fn dependencies(&self) -> &[u32] {
        &[]
    }

    fn description(&self) -> &str {
        ""
    }

    fn solution(&self) -> &str {
        ""
    }

    fn reference(&self) -> &str {
        ""
    }

    fn cwe_id(&self) -> Option<u32> {
        None
    }

    fn wasc_id(&self) -> Option<u32> {
        None
    }
}

/// Whole-message plugin
///
/// A fresh instance is made per host run. `init` runs once, then `scan` is
/// called once per request template of the host, possibly concurrently.
#[async_trait]
pub trait Plugin: PluginInfo + Send + Sync {
    fn clone_box(&self) -> Box<dyn Plugin>;

    async fn init(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn scan(&self, ctx: &PluginContext, msg: &HttpMessage) -> anyhow::Result<()>;
}

/// Snapshot of a plugin's identity, used to pre-fill alerts
#[derive(Debug, Clone)]
struct Identity {
    id: u32,
    name: String,
    description: String,
    solution: String,
    reference: String,
    cwe_id: Option<u32>,
    wasc_id: Option<u32>,
}

impl Identity {
    fn of(plugin: &dyn Plugin) -> Self {
        Self {
            id: plugin.id(),
            name: plugin.name().to_string(),
            description: plugin.description().to_string(),
            solution: plugin.solution().to_string(),
            reference: plugin.reference().to_string(),
            cwe_id: plugin.cwe_id(),
            wasc_id: plugin.wasc_id(),
        }
    }
}

/// What every plugin on one host shares
pub(crate) struct HostServices {
    pub host: String,
    pub param: Arc<ScannerParam>,
    pub exclusions: ParamExclusions,
    pub sender: Arc<dyn HttpSender>,
    pub anti_csrf: Option<Arc<dyn AntiCsrfHandler>>,
    pub control: ScanControl,
    pub listener: Arc<dyn ScannerListener>,
}

/// Handed to a plugin for one host run
pub struct PluginContext {
    identity: Identity,
    strength: AttackStrength,
    threshold: AlertThreshold,
    services: Arc<HostServices>,
    skipped: Arc<AtomicBool>,
    deadline: Option<Instant>,
    requests: AtomicU64,
    alerts: AtomicU64,
}

impl PluginContext {
    pub(crate) fn new(
        plugin: &dyn Plugin,
        strength: AttackStrength,
        threshold: AlertThreshold,
        services: Arc<HostServices>,
        skipped: Arc<AtomicBool>,
    ) -> Self {
        let deadline = match services.param.max_rule_duration_in_mins {
            0 => None,
            mins => Some(Instant::now() + Duration::from_secs(mins * 60)),
        };
        Self {
            identity: Identity::of(plugin),
            strength,
            threshold,
            services,
            skipped,
            deadline,
            requests: AtomicU64::new(0),
            alerts: AtomicU64::new(0),
        }
    }

    pub fn plugin_id(&self) -> u32 {
        self.identity.id
    }

    pub fn host(&self) -> &str {
        &self.services.host
    }

    pub fn strength(&self) -> AttackStrength {
        self.strength
    }

    pub fn threshold(&self) -> AlertThreshold {
        self.threshold
    }

    /// Settings snapshot taken when the host started
    pub fn param(&self) -> &ScannerParam {
        &self.services.param
    }

    pub(crate) fn exclusions(&self) -> &ParamExclusions {
        &self.services.exclusions
    }

    /// Whether `name` is an anti-CSRF token that must be left alone
    pub fn is_anti_csrf_token(&self, name: &str) -> bool {
        self.services.param.handle_anti_csrf
            && self
                .services
                .anti_csrf
                .as_ref()
                .map_or(false, |h| h.is_token_param(name))
    }

    /// Host stopped, plugin skipped, or the rule ran out of time
    pub fn is_stop(&self) -> bool {
        self.services.control.is_stopped()
            || self.skipped.load(Ordering::Relaxed)
            || self.rule_expired()
    }

    pub(crate) fn rule_expired(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    /// Requests sent so far
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn alert_count(&self) -> u64 {
        self.alerts.load(Ordering::Relaxed)
    }

    /// Send one request
    ///
    /// Waits while the host is paused, refreshes anti-CSRF tokens, tags the
    /// request with the plugin id if configured, then sleeps `delay_in_ms`.
    /// Token page refetches are paced and counted like any other request.
    pub async fn send(&self, msg: &mut HttpMessage, follow_redirects: bool) -> Result<(), HttpError> {
        let services = &self.services;
        services.control.wait_while_paused().await;

        if services.param.handle_anti_csrf {
            if let Some(handler) = &services.anti_csrf {
                if let Err(e) = handler.refresh_tokens(msg, &Paced(self)).await {
                    tracing::warn!(plugin_id = self.identity.id, host = %services.host, error = %e, "Anti-CSRF refresh failed");
                }
            }
        }

        if services.param.inject_plugin_id_in_header {
            msg.set_request_header(SCAN_ID_HEADER, &self.identity.id.to_string());
        }

        self.paced_send(msg, follow_redirects).await
    }

    /// Sleep `delay_in_ms`, count, send
    async fn paced_send(&self, msg: &mut HttpMessage, follow_redirects: bool) -> Result<(), HttpError> {
        let delay = self.services.param.delay_in_ms();
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.requests.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(plugin_id = self.identity.id, method = %msg.method, uri = %msg.uri, "Sending");
        self.services.sender.send(msg, follow_redirects).await
    }

    /// Alert pre-filled with this plugin's identity
    pub fn new_alert(&self, risk: Risk, msg: &HttpMessage) -> Alert {
        let id = &self.identity;
        let mut alert = Alert::new(id.id, &id.name, risk, msg).with_description(&id.description);
        if !id.solution.is_empty() {
            alert = alert.with_solution(&id.solution);
        }
        if !id.reference.is_empty() {
            alert = alert.with_reference(&id.reference);
        }
        if let Some(cwe) = id.cwe_id {
            alert = alert.with_cwe(cwe);
        }
        if let Some(wasc) = id.wasc_id {
            alert = alert.with_wasc(wasc);
        }
        alert
    }

    /// Hand an alert to the listeners
    pub fn raise(&self, alert: Alert) {
        self.alerts.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(plugin_id = alert.plugin_id, host = %self.services.host, name = %alert.name, "Alert raised");
        self.services.listener.alert_found(&alert);
    }
}

/// Sender handed to the anti-CSRF handler so refetches share the pacing
struct Paced<'a>(&'a PluginContext);

#[async_trait]
impl<'a> HttpSender for Paced<'a> {
    async fn send(&self, msg: &mut HttpMessage, follow_redirects: bool) -> Result<(), HttpError> {
        self.0.paced_send(msg, follow_redirects).await
    }
}
