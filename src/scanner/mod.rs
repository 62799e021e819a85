//! Active scanner
//!
//! `Scanner` drives one `HostProcess` per host; each host process runs the
//! enabled plugins, and parameter plugins iterate every `Variant` of every
//! request template.

pub mod active;
pub mod alert;
pub mod anticsrf;
pub mod control;
mod engine;
pub mod host_process;
pub mod listener;
pub mod param;
pub mod param_plugin;
pub mod plugin;
pub mod policies;
pub mod variant;
#[cfg(test)]
mod tests;

pub use active::{ParameterReflection, PluginRegistry};
pub use alert::{Alert, Confidence, Risk};
pub use anticsrf::{AntiCsrfHandler, AntiCsrfTokens};
pub use control::{RunState, ScanControl};
pub use engine::Scanner;
pub use host_process::{HostProcess, HostProcessHandle, PluginStatus};
pub use listener::{ScannerListener, TracingListener};
pub use param::{ExcludedParam, ScannerParam};
pub use param_plugin::{ParamAttack, ParamPlugin, ParamScan};
pub use plugin::{Category, Plugin, PluginContext, PluginInfo};
pub use policies::{AlertThreshold, AttackStrength, ScanPolicy};
pub use variant::{NameValuePair, Variant, VariantKind};
