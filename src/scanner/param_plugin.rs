//! Parameter plugins
//!
//! A `ParamPlugin` is called once per (variant, parameter) of every request
//! template. `ParamScan` wraps one into a `Plugin` by running that loop: each
//! call gets its own copy of the template with the original value in place,
//! so nothing one attack writes leaks into the next.

use async_trait::async_trait;

use super::alert::{Alert, Risk};
use super::plugin::{Category, Plugin, PluginContext, PluginInfo};
use super::variant::{NameValuePair, Variant, VariantKind};
use crate::error::HttpError;
use crate::http::HttpMessage;

/// Per-parameter plugin contract
#[async_trait]
pub trait ParamPlugin: PluginInfo + Clone + Send + Sync + 'static {
    async fn init(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Attack one parameter. An error ends this parameter only.
    async fn scan_param(&self, attack: &mut ParamAttack<'_>, name: &str, value: &str) -> anyhow::Result<()>;
}

/// One (variant, parameter) attack
pub struct ParamAttack<'a> {
    ctx: &'a PluginContext,
    variant: &'a dyn Variant,
    base: &'a HttpMessage,
    original: &'a NameValuePair,
    msg: HttpMessage,
}

impl<'a> ParamAttack<'a> {
    fn new(
        ctx: &'a PluginContext,
        variant: &'a dyn Variant,
        base: &'a HttpMessage,
        original: &'a NameValuePair,
    ) -> Self {
        Self {
            ctx,
            variant,
            base,
            original,
            msg: base.clone(),
        }
    }

    pub fn ctx(&self) -> &PluginContext {
        self.ctx
    }

    pub fn kind(&self) -> VariantKind {
        self.original.kind
    }

    /// The parameter as extracted from the template
    pub fn original(&self) -> &NameValuePair {
        self.original
    }

    /// Current attack message
    pub fn message(&self) -> &HttpMessage {
        &self.msg
    }

    pub fn message_mut(&mut self) -> &mut HttpMessage {
        &mut self.msg
    }

    /// Write an escaped value into the parameter's slot
    pub fn set_parameter(&mut self, name: &str, value: &str) -> String {
        self.variant.set_parameter(&mut self.msg, self.original, name, value)
    }

    /// Write a pre-encoded value verbatim
    pub fn set_escaped_parameter(&mut self, name: &str, value: &str) -> String {
        self.variant
            .set_escaped_parameter(&mut self.msg, self.original, name, value)
    }

    /// Back to a fresh copy of the template
    pub fn reset(&mut self) {
        self.msg = self.base.clone();
    }

    pub async fn send(&mut self, follow_redirects: bool) -> Result<(), HttpError> {
        self.ctx.send(&mut self.msg, follow_redirects).await
    }

    /// Alert against the current attack message, parameter filled in
    pub fn new_alert(&self, risk: Risk) -> Alert {
        self.ctx
            .new_alert(risk, &self.msg)
            .with_param(&self.original.name)
    }

    pub fn raise(&self, alert: Alert) {
        self.ctx.raise(alert);
    }

    pub fn is_stop(&self) -> bool {
        self.ctx.is_stop()
    }
}

/// Whether the template carries query or body parameters at all
fn has_params(msg: &HttpMessage) -> bool {
    msg.query().map_or(false, |q| !q.is_empty()) || !msg.request_body.is_empty()
}

/// Runs a `ParamPlugin` over every enabled variant of a message
#[derive(Clone)]
pub struct ParamScan<P> {
    inner: P,
}

impl<P: ParamPlugin> ParamScan<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<P: ParamPlugin> PluginInfo for ParamScan<P> {
    fn id(&self) -> u32 {
        self.inner.id()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn category(&self) -> Category {
        self.inner.category()
    }

    fn dependencies(&self) -> &[u32] {
        self.inner.dependencies()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn solution(&self) -> &str {
        self.inner.solution()
    }

    fn reference(&self) -> &str {
        self.inner.reference()
    }

    fn cwe_id(&self) -> Option<u32> {
        self.inner.cwe_id()
    }

    fn wasc_id(&self) -> Option<u32> {
        self.inner.wasc_id()
    }
}

#[async_trait]
impl<P: ParamPlugin> Plugin for ParamScan<P> {
    fn clone_box(&self) -> Box<dyn Plugin> {
        Box::new(self.clone())
    }

    async fn init(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        self.inner.init(ctx).await
    }

    async fn scan(&self, ctx: &PluginContext, msg: &HttpMessage) -> anyhow::Result<()> {
        let param = ctx.param();
        let with_params = has_params(msg);

        for kind in param.target_kinds() {
            if ctx.is_stop() {
                return Ok(());
            }
            if kind == VariantKind::Header && !param.scan_headers_all_requests && !with_params {
                continue;
            }

            let mut variant = kind.create();
            variant.set_message(msg);

            for pair in variant.param_list() {
                if ctx.is_stop() {
                    return Ok(());
                }
                if ctx.exclusions().is_excluded(&msg.uri, pair) {
                    tracing::trace!(param = %pair.name, variant = kind.name(), "Excluded parameter");
                    continue;
                }
                if ctx.is_anti_csrf_token(&pair.name) {
                    continue;
                }

                let mut attack = ParamAttack::new(ctx, variant.as_ref(), msg, pair);
                if let Err(e) = self.inner.scan_param(&mut attack, &pair.name, &pair.value).await {
                    tracing::warn!(
                        plugin_id = ctx.plugin_id(),
                        host = ctx.host(),
                        variant = kind.name(),
                        param = %pair.name,
                        error = %e,
                        "Parameter scan failed"
                    );
                }
            }
        }
        Ok(())
    }
}
