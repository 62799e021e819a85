//! Per-host scheduler
//!
//! Plugins run in dependency tiers: a tier starts once every plugin of the
//! previous tiers has reached a terminal state. Inside a tier the work units
//! (one plugin against one request template) share a pool of
//! `thread_per_host` permits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use super::control::ScanControl;
use super::plugin::{HostServices, Plugin, PluginContext, PluginInfo};
use super::policies::{AlertThreshold, AttackStrength, ScanPolicy};
use crate::http::HttpMessage;

/// How long in-flight units get to observe a stop before teardown
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of one plugin on one host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStatus {
    Pending,
    Running,
    Done,
    Stopped,
    /// Init failed, dependency cycle, or skipped by the user
    Skipped,
}

impl PluginStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PluginStatus::Done | PluginStatus::Stopped | PluginStatus::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginStatus::Pending => "pending",
            PluginStatus::Running => "running",
            PluginStatus::Done => "done",
            PluginStatus::Stopped => "stopped",
            PluginStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug)]
struct PluginEntry {
    id: u32,
    name: String,
    status: PluginStatus,
    /// Units not yet finished
    remaining: usize,
    skip: Arc<AtomicBool>,
    expired: bool,
}

/// State shared between the process, its units and its handles
struct HostState {
    services: Arc<HostServices>,
    plugins: Mutex<Vec<PluginEntry>>,
}

impl HostState {
    fn host(&self) -> &str {
        &self.services.host
    }

    fn control(&self) -> &ScanControl {
        &self.services.control
    }

    fn percent(&self) -> u8 {
        percent_of(&self.plugins.lock())
    }

    fn set_running(&self, index: usize, remaining: usize) {
        let mut plugins = self.plugins.lock();
        plugins[index].status = PluginStatus::Running;
        plugins[index].remaining = remaining;
    }

    /// Move a plugin to a terminal state and push progress. No-op if it
    /// already is terminal.
    fn finish(&self, index: usize, status: PluginStatus) {
        let (message, percent) = {
            let mut plugins = self.plugins.lock();
            let entry = &mut plugins[index];
            if entry.status.is_terminal() {
                return;
            }
            entry.status = status;
            entry.remaining = 0;
            let message = format!("{}: {}", entry.name, status.as_str());
            (message, percent_of(&plugins))
        };
        tracing::debug!(host = %self.host(), percent, "{}", message);
        self.services.listener.host_progress(self.host(), &message, percent);
    }

    /// One unit of a plugin is done; the last one settles the plugin
    fn unit_finished(&self, index: usize, expired: bool) {
        let status = {
            let mut plugins = self.plugins.lock();
            let entry = &mut plugins[index];
            entry.expired |= expired;
            entry.remaining = entry.remaining.saturating_sub(1);
            if entry.remaining > 0 || entry.status.is_terminal() {
                return;
            }
            if entry.skip.load(Ordering::Relaxed) {
                PluginStatus::Skipped
            } else if entry.expired || self.control().is_stopped() {
                PluginStatus::Stopped
            } else {
                PluginStatus::Done
            }
        };
        self.finish(index, status);
    }

    /// Settle everything still open, used on stop
    fn finish_open(&self, status: PluginStatus) {
        let open: Vec<usize> = self
            .plugins
            .lock()
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.status.is_terminal())
            .map(|(i, _)| i)
            .collect();
        for index in open {
            self.finish(index, status);
        }
    }
}

fn percent_of(plugins: &[PluginEntry]) -> u8 {
    if plugins.is_empty() {
        return 100;
    }
    let done = plugins.iter().filter(|e| e.status.is_terminal()).count();
    (done * 100 / plugins.len()) as u8
}

/// Counts a unit as finished when dropped, including on panic
struct UnitGuard {
    state: Arc<HostState>,
    ctx: Arc<PluginContext>,
    index: usize,
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            tracing::error!(plugin_id = self.ctx.plugin_id(), host = %self.state.host(), "Plugin panicked");
        }
        self.state.unit_finished(self.index, self.ctx.rule_expired());
    }
}

/// Control surface of a running host, handed to listeners
#[derive(Clone)]
pub struct HostProcessHandle {
    state: Arc<HostState>,
}

impl std::fmt::Debug for HostProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostProcessHandle")
            .field("host", &self.state.host())
            .field("percent", &self.percent())
            .finish()
    }
}

impl HostProcessHandle {
    pub fn host(&self) -> &str {
        self.state.host()
    }

    pub fn pause(&self) {
        self.state.control().pause();
    }

    pub fn resume(&self) {
        self.state.control().resume();
    }

    pub fn stop(&self) {
        self.state.control().stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.control().is_stopped()
    }

    pub fn is_paused(&self) -> bool {
        self.state.control().is_paused()
    }

    /// Skip a plugin that has not finished yet. Returns false if the plugin
    /// is unknown or already terminal.
    pub fn skip_plugin(&self, id: u32) -> bool {
        let plugins = self.state.plugins.lock();
        match plugins.iter().find(|e| e.id == id && !e.status.is_terminal()) {
            Some(entry) => {
                entry.skip.store(true, Ordering::Relaxed);
                tracing::info!(plugin_id = id, host = %self.state.host(), "Plugin skipped by user");
                true
            }
            None => false,
        }
    }

    /// Terminal plugins over all plugins, 0-100
    pub fn percent(&self) -> u8 {
        self.state.percent()
    }

    pub fn plugin_states(&self) -> Vec<(u32, PluginStatus)> {
        self.state
            .plugins
            .lock()
            .iter()
            .map(|e| (e.id, e.status))
            .collect()
    }
}

/// A plugin waiting for its tier
struct Queued {
    plugin: Box<dyn Plugin>,
    strength: AttackStrength,
    threshold: AlertThreshold,
}

/// Runs every plugin against the request templates of one host
pub struct HostProcess {
    state: Arc<HostState>,
    messages: Vec<HttpMessage>,
    queued: Vec<Option<Queued>>,
}

impl HostProcess {
    pub(crate) fn new(
        services: Arc<HostServices>,
        messages: Vec<HttpMessage>,
        mut plugins: Vec<Box<dyn Plugin>>,
        policy: &ScanPolicy,
    ) -> Self {
        plugins.sort_by_key(|p| (p.category(), p.id()));

        let entries = plugins
            .iter()
            .map(|p| PluginEntry {
                id: p.id(),
                name: p.name().to_string(),
                status: PluginStatus::Pending,
                remaining: 0,
                skip: Arc::new(AtomicBool::new(false)),
                expired: false,
            })
            .collect();
        let queued = plugins
            .into_iter()
            .map(|plugin| {
                let id = plugin.id();
                Some(Queued {
                    plugin,
                    strength: policy.strength(id),
                    threshold: policy.threshold(id),
                })
            })
            .collect();

        Self {
            state: Arc::new(HostState {
                services,
                plugins: Mutex::new(entries),
            }),
            messages,
            queued,
        }
    }

    pub fn handle(&self) -> HostProcessHandle {
        HostProcessHandle {
            state: self.state.clone(),
        }
    }

    pub fn host(&self) -> &str {
        self.state.host()
    }

    /// Run to completion, or until stopped
    pub async fn run(mut self) {
        let state = self.state.clone();
        let services = state.services.clone();
        let host = services.host.clone();

        if self.messages.is_empty() || self.queued.is_empty() {
            tracing::info!(host = %host, "Nothing to scan");
            state.finish_open(PluginStatus::Done);
            return;
        }

        if services.param.handle_anti_csrf {
            if let Some(handler) = &services.anti_csrf {
                for msg in &self.messages {
                    handler.register(msg);
                }
            }
        }

        let ids: Vec<(u32, Vec<u32>)> = self
            .queued
            .iter()
            .flatten()
            .map(|q| (q.plugin.id(), q.plugin.dependencies().to_vec()))
            .collect();
        let (tiers, blocked) = dependency_tiers(&ids);
        for index in blocked {
            tracing::warn!(plugin_id = ids[index].0, host = %host, "Dependency cycle, plugin skipped");
            state.finish(index, PluginStatus::Skipped);
        }

        tracing::info!(
            host = %host,
            plugins = ids.len(),
            templates = self.messages.len(),
            threads = services.param.thread_per_host(),
            "Host scan starting"
        );

        let messages = std::mem::take(&mut self.messages);
        for tier in tiers {
            if services.control.is_stopped() {
                break;
            }
            self.run_tier(&tier, &messages).await;
        }

        if services.control.is_stopped() {
            state.finish_open(PluginStatus::Stopped);
        } else {
            state.finish_open(PluginStatus::Done);
        }
        tracing::info!(host = %host, percent = state.percent(), "Host scan finished");
    }

    /// Init the tier's plugins, then dispatch their units and wait for them
    async fn run_tier(&mut self, tier: &[usize], messages: &[HttpMessage]) {
        let state = self.state.clone();
        let control = state.control().clone();

        let mut ready = Vec::with_capacity(tier.len());
        for &index in tier {
            let Some(Queued {
                mut plugin,
                strength,
                threshold,
            }) = self.queued[index].take()
            else {
                continue;
            };
            control.wait_while_paused().await;
            if control.is_stopped() {
                return;
            }

            let skip = state.plugins.lock()[index].skip.clone();
            if skip.load(Ordering::Relaxed) {
                state.finish(index, PluginStatus::Skipped);
                continue;
            }

            let ctx = PluginContext::new(plugin.as_ref(), strength, threshold, state.services.clone(), skip);
            state.set_running(index, messages.len());
            if let Err(e) = plugin.init(&ctx).await {
                tracing::warn!(plugin_id = plugin.id(), host = %state.host(), error = %e, "Plugin init failed, skipping");
                state.finish(index, PluginStatus::Skipped);
                continue;
            }
            let plugin: Arc<dyn Plugin> = Arc::from(plugin);
            ready.push((index, plugin, Arc::new(ctx)));
        }

        let permits = Arc::new(Semaphore::new(state.services.param.thread_per_host()));
        let mut units = JoinSet::new();

        'dispatch: for (index, plugin, ctx) in &ready {
            for msg in messages {
                control.wait_while_paused().await;
                if control.is_stopped() {
                    break 'dispatch;
                }
                if ctx.is_stop() {
                    state.unit_finished(*index, ctx.rule_expired());
                    continue;
                }

                let permit = tokio::select! {
                    permit = permits.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break 'dispatch,
                    },
                    _ = control.stopped() => break 'dispatch,
                };
                // a pause may have come in while waiting for the permit
                control.wait_while_paused().await;
                if control.is_stopped() {
                    break 'dispatch;
                }

                let guard = UnitGuard {
                    state: state.clone(),
                    ctx: ctx.clone(),
                    index: *index,
                };
                let plugin = plugin.clone();
                let msg = msg.clone();
                units.spawn(async move {
                    let _permit = permit;
                    let guard = guard;
                    if guard.ctx.is_stop() {
                        return;
                    }
                    if let Err(e) = plugin.scan(&guard.ctx, &msg).await {
                        tracing::warn!(
                            plugin_id = plugin.id(),
                            host = %guard.state.host(),
                            uri = %msg.uri,
                            error = %e,
                            "Plugin scan failed"
                        );
                    }
                });
            }
        }

        drain(&mut units, &control, state.host()).await;
    }
}

/// Wait for every unit; once stopped, give them `STOP_GRACE` then detach
async fn drain(units: &mut JoinSet<()>, control: &ScanControl, host: &str) {
    let mut deadline: Option<Instant> = None;
    loop {
        if deadline.is_none() && control.is_stopped() {
            deadline = Some(Instant::now() + STOP_GRACE);
        }
        let joined = match deadline {
            Some(at) => match tokio::time::timeout_at(at, units.join_next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    tracing::warn!(host, in_flight = units.len(), "Stop grace period elapsed, detaching units");
                    units.detach_all();
                    return;
                }
            },
            None => tokio::select! {
                joined = units.join_next() => joined,
                _ = control.stopped() => continue,
            },
        };
        match joined {
            None => return,
            Some(Ok(())) => {}
            // panics are logged by the unit guard
            Some(Err(e)) if e.is_panic() => {}
            Some(Err(e)) => tracing::debug!(host, error = %e, "Unit cancelled"),
        }
    }
}

/// Group plugins into tiers by declared dependencies
///
/// `plugins` is `(id, dependencies)` in run order. Dependencies on ids not in
/// the list count as satisfied. Returns the tiers (indices, order kept) and
/// the indices that can never run because of a cycle.
fn dependency_tiers(plugins: &[(u32, Vec<u32>)]) -> (Vec<Vec<usize>>, Vec<usize>) {
    let index_of: HashMap<u32, usize> = plugins.iter().enumerate().map(|(i, (id, _))| (*id, i)).collect();

    let mut waiting_on = vec![0usize; plugins.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); plugins.len()];
    for (i, (_, deps)) in plugins.iter().enumerate() {
        for dep in deps {
            if let Some(&d) = index_of.get(dep) {
                waiting_on[i] += 1;
                dependents[d].push(i);
            }
        }
    }

    let mut placed = vec![false; plugins.len()];
    let mut tiers = Vec::new();
    loop {
        let tier: Vec<usize> = (0..plugins.len())
            .filter(|&i| !placed[i] && waiting_on[i] == 0)
            .collect();
        if tier.is_empty() {
            break;
        }
        for &i in &tier {
            placed[i] = true;
            for &d in &dependents[i] {
                waiting_on[d] -= 1;
            }
        }
        tiers.push(tier);
    }

    let blocked = (0..plugins.len()).filter(|&i| !placed[i]).collect();
    (tiers, blocked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HttpError;
    use crate::http::{HttpResponse, HttpSender};
    use crate::scanner::listener::ScannerListener;
    use crate::scanner::param::ScannerParam;
    use crate::scanner::plugin::Category;
    use async_trait::async_trait;

    #[test]
    fn test_tiers_follow_dependencies() {
        let plugins = vec![(1, vec![]), (2, vec![3]), (3, vec![1]), (4, vec![999])];
        let (tiers, blocked) = dependency_tiers(&plugins);
        assert_eq!(tiers, vec![vec![0, 3], vec![2], vec![1]]);
        assert!(blocked.is_empty());
    }

    #[test]
    fn test_cycle_members_and_their_dependents_are_blocked() {
        let plugins = vec![(1, vec![2]), (2, vec![1]), (3, vec![]), (4, vec![1]), (5, vec![5])];
        let (tiers, blocked) = dependency_tiers(&plugins);
        assert_eq!(tiers, vec![vec![2]]);
        assert_eq!(blocked, vec![0, 1, 3, 4]);
    }

    struct Ok200;

    #[async_trait]
    impl HttpSender for Ok200 {
        async fn send(&self, msg: &mut HttpMessage, _follow: bool) -> Result<(), HttpError> {
            msg.response = Some(HttpResponse::new(200, ""));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Progress {
        seen: Mutex<Vec<u8>>,
    }

    impl ScannerListener for Progress {
        fn host_progress(&self, _host: &str, _message: &str, percent: u8) {
            self.seen.lock().push(percent);
        }
    }

    #[derive(Clone)]
    struct Fixed {
        id: u32,
        category: Category,
        fail_init: bool,
    }

    impl PluginInfo for Fixed {
        fn id(&self) -> u32 {
            self.id
        }

        fn name(&self) -> &str {
            "Fixed"
        }

        fn category(&self) -> Category {
            self.category
        }
    }

    #[async_trait]
    impl Plugin for Fixed {
        fn clone_box(&self) -> Box<dyn Plugin> {
            Box::new(self.clone())
        }

        async fn init(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
            if self.fail_init {
                anyhow::bail!("no baseline");
            }
            Ok(())
        }

        async fn scan(&self, ctx: &PluginContext, msg: &HttpMessage) -> anyhow::Result<()> {
            let mut attack = msg.clone();
            ctx.send(&mut attack, false).await?;
            Ok(())
        }
    }

    fn services(listener: Arc<dyn ScannerListener>) -> Arc<HostServices> {
        let param = ScannerParam::default();
        Arc::new(HostServices {
            host: "http://example.com".to_string(),
            exclusions: param.exclusions(),
            param: Arc::new(param),
            sender: Arc::new(Ok200),
            anti_csrf: None,
            control: ScanControl::default(),
            listener,
        })
    }

    fn plugin(id: u32, category: Category, fail_init: bool) -> Box<dyn Plugin> {
        Box::new(Fixed {
            id,
            category,
            fail_init,
        })
    }

    #[tokio::test]
    async fn test_plugins_sorted_and_reach_terminal_states() {
        let progress = Arc::new(Progress::default());
        let process = HostProcess::new(
            services(progress.clone()),
            vec![HttpMessage::new("GET", "http://example.com/a")],
            vec![
                plugin(20, Category::Injection, false),
                plugin(30, Category::InfoGather, true),
                plugin(10, Category::Injection, false),
            ],
            &ScanPolicy::default(),
        );
        let handle = process.handle();
        let order: Vec<u32> = handle.plugin_states().iter().map(|(id, _)| *id).collect();
        assert_eq!(order, vec![30, 10, 20]);
        assert_eq!(handle.percent(), 0);

        process.run().await;

        assert_eq!(
            handle.plugin_states(),
            vec![
                (30, PluginStatus::Skipped),
                (10, PluginStatus::Done),
                (20, PluginStatus::Done)
            ]
        );
        assert_eq!(handle.percent(), 100);
        assert_eq!(progress.seen.lock().last(), Some(&100));
    }

    #[tokio::test]
    async fn test_no_templates_completes_immediately() {
        let process = HostProcess::new(
            services(Arc::new(Progress::default())),
            Vec::new(),
            vec![plugin(10, Category::Misc, false)],
            &ScanPolicy::default(),
        );
        let handle = process.handle();
        process.run().await;
        assert_eq!(handle.plugin_states(), vec![(10, PluginStatus::Done)]);
        assert!(!handle.skip_plugin(10));
    }

    #[tokio::test]
    async fn test_stopped_before_start_marks_everything_stopped() {
        let process = HostProcess::new(
            services(Arc::new(Progress::default())),
            vec![HttpMessage::new("GET", "http://example.com/a")],
            vec![plugin(10, Category::Misc, false), plugin(11, Category::Misc, false)],
            &ScanPolicy::default(),
        );
        let handle = process.handle();
        handle.stop();
        process.run().await;
        assert!(handle
            .plugin_states()
            .iter()
            .all(|(_, s)| *s == PluginStatus::Stopped));
        assert_eq!(handle.percent(), 100);
    }
}
