//! Scan observers

use super::alert::Alert;
use super::host_process::HostProcessHandle;

/// Receives scan events. Calls come from worker tasks, so implementations
/// must be cheap and must not block.
pub trait ScannerListener: Send + Sync {
    fn alert_found(&self, _alert: &Alert) {}

    /// A host job was created; `handle` controls it
    fn host_new_scan(&self, _host: &str, _handle: &HostProcessHandle) {}

    fn host_progress(&self, _host: &str, _message: &str, _percent: u8) {}

    fn host_complete(&self, _host: &str) {}

    fn scanner_complete(&self) {}
}

/// Logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl ScannerListener for TracingListener {
    fn alert_found(&self, alert: &Alert) {
        tracing::info!(
            plugin_id = alert.plugin_id,
            risk = alert.risk.as_str(),
            uri = %alert.uri,
            param = ?alert.param,
            "Alert: {}",
            alert.name
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(
                request = %alert.message.request_to_wire(),
                response = %alert.message.response_to_wire().unwrap_or_default(),
                "Alert evidence"
            );
        }
    }

    fn host_new_scan(&self, host: &str, _handle: &HostProcessHandle) {
        tracing::info!(host, "Host scan started");
    }

    fn host_progress(&self, host: &str, message: &str, percent: u8) {
        tracing::debug!(host, percent, "{}", message);
    }

    fn host_complete(&self, host: &str) {
        tracing::info!(host, "Host scan complete");
    }

    fn scanner_complete(&self) {
        tracing::info!("Scan complete");
    }
}
