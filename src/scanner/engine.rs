//! Scan orchestration
//!
//! A `Scanner` runs one scan at a time: it splits the target node into host
//! jobs and keeps up to `host_per_scan` of them running. It also listens to
//! its own hosts, turning their progress into one overall percentage and
//! relaying every event to the registered listeners.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use super::active::PluginRegistry;
use super::alert::Alert;
use super::anticsrf::AntiCsrfHandler;
use super::control::{RunState, ScanControl};
use super::host_process::{HostProcess, HostProcessHandle};
use super::listener::ScannerListener;
use super::param::ScannerParam;
use super::plugin::{HostServices, Plugin};
use super::policies::ScanPolicy;
use crate::error::ScannerError;
use crate::http::{HttpMessage, HttpSender};
use crate::site::SiteNode;

/// One host worth of request templates
struct HostJob {
    host: String,
    messages: Vec<HttpMessage>,
}

struct ScannerInner {
    param: RwLock<ScannerParam>,
    policy: RwLock<ScanPolicy>,
    registry: RwLock<PluginRegistry>,
    sender: Arc<dyn HttpSender>,
    anti_csrf: RwLock<Option<Arc<dyn AntiCsrfHandler>>>,
    listeners: RwLock<Vec<Arc<dyn ScannerListener>>>,

    /// Control of the current (or last) run
    control: RwLock<ScanControl>,
    hosts: Mutex<Vec<HostProcessHandle>>,
    run: Mutex<Option<JoinHandle<()>>>,

    running: AtomicBool,
    alerts: AtomicU64,
    progress: AtomicU8,
    total_hosts: AtomicUsize,
}

impl ScannerInner {
    fn listeners(&self) -> Vec<Arc<dyn ScannerListener>> {
        self.listeners.read().clone()
    }

    fn control(&self) -> ScanControl {
        self.control.read().clone()
    }

    /// Sum of host percents over all hosts of the run; never decreases
    fn update_progress(&self) -> u8 {
        let total = self.total_hosts.load(Ordering::SeqCst);
        if total == 0 {
            return self.progress.load(Ordering::SeqCst);
        }
        let sum: usize = self
            .hosts
            .lock()
            .iter()
            .map(|h| h.percent() as usize)
            .sum();
        let percent = (sum / total).min(100) as u8;
        self.progress.fetch_max(percent, Ordering::SeqCst).max(percent)
    }

    fn pause(&self) {
        self.control.read().pause();
        for host in self.hosts.lock().iter() {
            host.pause();
        }
    }

    fn resume(&self) {
        self.control.read().resume();
        for host in self.hosts.lock().iter() {
            host.resume();
        }
    }

    fn stop(&self) {
        self.control.read().stop();
        for host in self.hosts.lock().iter() {
            host.stop();
        }
    }
}

impl ScannerListener for ScannerInner {
    fn alert_found(&self, alert: &Alert) {
        self.alerts.fetch_add(1, Ordering::SeqCst);
        for listener in self.listeners() {
            listener.alert_found(alert);
        }
    }

    fn host_new_scan(&self, host: &str, handle: &HostProcessHandle) {
        for listener in self.listeners() {
            listener.host_new_scan(host, handle);
        }
    }

    fn host_progress(&self, host: &str, message: &str, percent: u8) {
        self.update_progress();
        for listener in self.listeners() {
            listener.host_progress(host, message, percent);
        }
    }

    fn host_complete(&self, host: &str) {
        self.update_progress();
        for listener in self.listeners() {
            listener.host_complete(host);
        }
    }

    fn scanner_complete(&self) {
        for listener in self.listeners() {
            listener.scanner_complete();
        }
    }
}

/// Hands host events back to the scanner without keeping it alive
struct Relay(Weak<ScannerInner>);

impl ScannerListener for Relay {
    fn alert_found(&self, alert: &Alert) {
        if let Some(inner) = self.0.upgrade() {
            inner.alert_found(alert);
        }
    }

    fn host_progress(&self, host: &str, message: &str, percent: u8) {
        if let Some(inner) = self.0.upgrade() {
            inner.host_progress(host, message, percent);
        }
    }
}

/// Active scanner
#[derive(Clone)]
pub struct Scanner {
    inner: Arc<ScannerInner>,
}

impl Scanner {
    pub fn new(param: ScannerParam, policy: ScanPolicy, registry: PluginRegistry, sender: Arc<dyn HttpSender>) -> Self {
        Self {
            inner: Arc::new(ScannerInner {
                param: RwLock::new(param),
                policy: RwLock::new(policy),
                registry: RwLock::new(registry),
                sender,
                anti_csrf: RwLock::new(None),
                listeners: RwLock::new(Vec::new()),
                control: RwLock::new(ScanControl::default()),
                hosts: Mutex::new(Vec::new()),
                run: Mutex::new(None),
                running: AtomicBool::new(false),
                alerts: AtomicU64::new(0),
                progress: AtomicU8::new(0),
                total_hosts: AtomicUsize::new(0),
            }),
        }
    }

    /// Use `handler` for token refresh when `handle_anti_csrf` is on
    pub fn with_anti_csrf(self, handler: Arc<dyn AntiCsrfHandler>) -> Self {
        *self.inner.anti_csrf.write() = Some(handler);
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn ScannerListener>) {
        self.inner.listeners.write().push(listener);
    }

    /// Replace the settings; hosts that already started keep their snapshot
    pub fn set_param(&self, param: ScannerParam) {
        *self.inner.param.write() = param;
    }

    pub fn param(&self) -> ScannerParam {
        self.inner.param.read().clone()
    }

    pub fn set_policy(&self, policy: ScanPolicy) {
        *self.inner.policy.write() = policy;
    }

    pub fn policy(&self) -> ScanPolicy {
        self.inner.policy.read().clone()
    }

    pub fn register_plugin(&self, plugin: Box<dyn Plugin>) {
        self.inner.registry.write().register(plugin);
    }

    /// Start scanning `node`
    ///
    /// The root node is split into one job per host child; any other node is
    /// a single job covering its subtree. Returns once the scan is under way.
    pub fn start(&self, node: &SiteNode) -> Result<(), ScannerError> {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::SeqCst) {
            return Err(ScannerError::AlreadyRunning);
        }

        let jobs: Vec<HostJob> = if node.is_root() {
            node.children()
                .map(|child| HostJob {
                    host: child.name().to_string(),
                    messages: child.messages_in_subtree(),
                })
                .collect()
        } else {
            vec![HostJob {
                host: node.host().unwrap_or(node.name()).to_string(),
                messages: node.messages_in_subtree(),
            }]
        };
        if jobs.is_empty() {
            inner.running.store(false, Ordering::SeqCst);
            return Err(ScannerError::EmptyTarget(node.name().to_string()));
        }

        let control = ScanControl::default();
        *inner.control.write() = control.clone();
        inner.hosts.lock().clear();
        inner.alerts.store(0, Ordering::SeqCst);
        inner.progress.store(0, Ordering::SeqCst);
        inner.total_hosts.store(jobs.len(), Ordering::SeqCst);

        tracing::info!(hosts = jobs.len(), "Scan starting");
        let handle = tokio::spawn(drive(inner.clone(), jobs, control));
        *inner.run.lock() = Some(handle);
        Ok(())
    }

    /// Stop dispatching new work on every host
    pub fn pause(&self) {
        tracing::info!("Scan paused");
        self.inner.pause();
    }

    pub fn resume(&self) {
        tracing::info!("Scan resumed");
        self.inner.resume();
    }

    /// Cooperative stop of the whole scan
    pub fn stop(&self) {
        tracing::info!("Scan stopping");
        self.inner.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.control().is_stopped()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.control().is_paused()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Overall progress, 0-100
    pub fn progress(&self) -> u8 {
        self.inner.progress.load(Ordering::SeqCst)
    }

    /// Alerts raised in the current (or last) run
    pub fn alert_count(&self) -> u64 {
        self.inner.alerts.load(Ordering::SeqCst)
    }

    /// Handles of the hosts started so far in this run
    pub fn host_handles(&self) -> Vec<HostProcessHandle> {
        self.inner.hosts.lock().clone()
    }

    /// Wait for the current run to finish
    pub async fn join(&self) {
        let handle = self.inner.run.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Scan driver failed");
            }
        }
    }
}

/// Build the process for one host from the current settings
fn build_process(inner: &Arc<ScannerInner>, job: HostJob) -> HostProcess {
    let param = inner.param.read().clone();
    let policy = inner.policy.read().clone();
    let plugins = inner.registry.read().instantiate(&policy);
    let services = Arc::new(HostServices {
        host: job.host,
        exclusions: param.exclusions(),
        param: Arc::new(param),
        sender: inner.sender.clone(),
        anti_csrf: inner.anti_csrf.read().clone(),
        control: ScanControl::default(),
        listener: Arc::new(Relay(Arc::downgrade(inner))),
    });
    HostProcess::new(services, job.messages, plugins, &policy)
}

/// Runs the host jobs, at most `host_per_scan` at a time
async fn drive(inner: Arc<ScannerInner>, jobs: Vec<HostJob>, control: ScanControl) {
    let (host_per_scan, max_mins) = {
        let param = inner.param.read();
        (param.host_per_scan(), param.max_scan_duration_in_mins)
    };

    let timer = (max_mins > 0).then(|| {
        let inner = inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(max_mins * 60)).await;
            tracing::warn!(minutes = max_mins, "Maximum scan duration reached, stopping");
            inner.stop();
        })
    });

    let permits = Arc::new(Semaphore::new(host_per_scan));
    let mut running = JoinSet::new();

    for job in jobs {
        control.wait_while_paused().await;
        if control.is_stopped() {
            break;
        }
        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = control.stopped() => break,
        };

        let host = job.host.clone();
        let process = build_process(&inner, job);
        let handle = process.handle();
        {
            let mut hosts = inner.hosts.lock();
            hosts.push(handle.clone());
            match control.state() {
                RunState::Paused => handle.pause(),
                RunState::Stopped => handle.stop(),
                RunState::Running => {}
            }
        }
        inner.host_new_scan(&host, &handle);

        let inner = inner.clone();
        running.spawn(async move {
            let _permit = permit;
            if let Err(e) = tokio::spawn(process.run()).await {
                tracing::error!(host = %host, error = %e, "Host scan failed");
            }
            inner.host_complete(&host);
        });
    }

    while let Some(joined) = running.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Host task failed");
        }
    }

    if let Some(timer) = timer {
        timer.abort();
    }
    inner.running.store(false, Ordering::SeqCst);
    tracing::info!(
        alerts = inner.alerts.load(Ordering::SeqCst),
        progress = inner.progress.load(Ordering::SeqCst),
        stopped = control.is_stopped(),
        "Scan finished"
    );
    inner.scanner_complete();
}
