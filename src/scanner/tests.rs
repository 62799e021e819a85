//! Scanner scenarios against an in-memory transport

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::*;
use crate::error::{HttpError, ScannerError};
use crate::http::{HttpMessage, HttpResponse, HttpSender};
use crate::site::SiteTree;

/// Answers 200 with the decoded request URI as body, recording send times
#[derive(Default)]
struct MockSender {
    sent: Mutex<Vec<(Instant, String)>>,
}

impl MockSender {
    fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl HttpSender for MockSender {
    async fn send(&self, msg: &mut HttpMessage, _follow: bool) -> Result<(), HttpError> {
        self.sent.lock().push((Instant::now(), msg.uri.clone()));
        let body = urlencoding::decode(&msg.uri)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| msg.uri.clone());
        msg.response = Some(HttpResponse::new(200, &body));
        Ok(())
    }
}

#[derive(Default)]
struct Events {
    alerts: AtomicUsize,
    completes: AtomicUsize,
    scanner_completes: AtomicUsize,
    active_hosts: AtomicUsize,
    max_active_hosts: AtomicUsize,
    handles: Mutex<Vec<HostProcessHandle>>,
    skip_on_start: Option<u32>,
}

impl ScannerListener for Events {
    fn alert_found(&self, _alert: &Alert) {
        self.alerts.fetch_add(1, Ordering::SeqCst);
    }

    fn host_new_scan(&self, _host: &str, handle: &HostProcessHandle) {
        let active = self.active_hosts.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_hosts.fetch_max(active, Ordering::SeqCst);
        if let Some(id) = self.skip_on_start {
            handle.skip_plugin(id);
        }
        self.handles.lock().push(handle.clone());
    }

    fn host_complete(&self, _host: &str) {
        self.active_hosts.fetch_sub(1, Ordering::SeqCst);
        self.completes.fetch_add(1, Ordering::SeqCst);
    }

    fn scanner_complete(&self) {
        self.scanner_completes.fetch_add(1, Ordering::SeqCst);
    }
}

/// What a scripted plugin did, and when
#[derive(Default)]
struct Trace {
    starts: Mutex<Vec<(u32, Instant)>>,
    ends: Mutex<Vec<(u32, Instant)>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

/// Whole-message plugin that sleeps per template
#[derive(Clone)]
struct Scripted {
    id: u32,
    category: Category,
    deps: Vec<u32>,
    work: Duration,
    trace: Arc<Trace>,
}

impl Scripted {
    fn new(id: u32, category: Category, work_ms: u64, trace: &Arc<Trace>) -> Self {
        Self {
            id,
            category,
            deps: Vec::new(),
            work: Duration::from_millis(work_ms),
            trace: trace.clone(),
        }
    }

    fn depends_on(mut self, id: u32) -> Self {
        self.deps.push(id);
        self
    }
}

impl PluginInfo for Scripted {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn category(&self) -> Category {
        self.category
    }

    fn dependencies(&self) -> &[u32] {
        &self.deps
    }
}

#[async_trait]
impl Plugin for Scripted {
    fn clone_box(&self) -> Box<dyn Plugin> {
        Box::new(self.clone())
    }

    async fn scan(&self, _ctx: &PluginContext, _msg: &HttpMessage) -> anyhow::Result<()> {
        self.trace.starts.lock().push((self.id, Instant::now()));
        let running = self.trace.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.trace.max_running.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(self.work).await;
        self.trace.running.fetch_sub(1, Ordering::SeqCst);
        self.trace.ends.lock().push((self.id, Instant::now()));
        Ok(())
    }
}

fn tree(urls: &[&str]) -> SiteTree {
    let mut tree = SiteTree::new();
    for url in urls {
        tree.add(HttpMessage::new("GET", url));
    }
    tree
}

fn scanner(param: ScannerParam, registry: PluginRegistry, sender: Arc<MockSender>, events: Arc<Events>) -> Scanner {
    let scanner = Scanner::new(param, ScanPolicy::standard(), registry, sender);
    scanner.add_listener(events);
    scanner
}

fn registry_of(plugins: Vec<Scripted>) -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    for plugin in plugins {
        registry.register(Box::new(plugin));
    }
    registry
}

#[tokio::test]
async fn test_unit_concurrency_bounded_by_thread_per_host() {
    let urls: Vec<String> = (0..8).map(|i| format!("http://example.com/p{}", i)).collect();
    let urls: Vec<&str> = urls.iter().map(|s| s.as_str()).collect();
    let site = tree(&urls);

    for threads in [1, 2, 4] {
        let trace = Arc::new(Trace::default());
        let mut param = ScannerParam::default();
        param.set_thread_per_host(threads);
        let scanner = scanner(
            param,
            registry_of(vec![
                Scripted::new(1, Category::Misc, 20, &trace),
                Scripted::new(2, Category::Misc, 20, &trace),
            ]),
            Arc::new(MockSender::default()),
            Arc::new(Events::default()),
        );

        scanner.start(site.root()).unwrap();
        scanner.join().await;

        assert_eq!(trace.starts.lock().len(), 16);
        let max = trace.max_running.load(Ordering::SeqCst);
        assert!(max >= 1 && max <= threads as usize, "threads={} max={}", threads, max);
    }
}

#[tokio::test]
async fn test_host_cap() {
    let site = tree(&[
        "http://a.example/",
        "http://b.example/",
        "http://c.example/",
        "http://d.example/",
        "http://e.example/",
    ]);
    let trace = Arc::new(Trace::default());
    let events = Arc::new(Events::default());
    let mut param = ScannerParam::default();
    param.set_host_per_scan(2);
    let scanner = scanner(
        param,
        registry_of(vec![Scripted::new(1, Category::Misc, 30, &trace)]),
        Arc::new(MockSender::default()),
        events.clone(),
    );

    scanner.start(site.root()).unwrap();
    scanner.join().await;

    assert_eq!(events.completes.load(Ordering::SeqCst), 5);
    assert_eq!(events.max_active_hosts.load(Ordering::SeqCst), 2);
    assert_eq!(scanner.host_handles().len(), 5);
    assert_eq!(scanner.progress(), 100);
    assert_eq!(events.scanner_completes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dependency_finishes_before_dependent_starts() {
    let site = tree(&["http://example.com/a", "http://example.com/b", "http://example.com/c"]);
    let trace = Arc::new(Trace::default());
    let mut param = ScannerParam::default();
    param.set_thread_per_host(4);
    // without the dependency, 2 would sort first by category
    let scanner = scanner(
        param,
        registry_of(vec![
            Scripted::new(1, Category::Injection, 20, &trace),
            Scripted::new(2, Category::InfoGather, 5, &trace).depends_on(1),
        ]),
        Arc::new(MockSender::default()),
        Arc::new(Events::default()),
    );

    scanner.start(site.root()).unwrap();
    scanner.join().await;

    let last_end_of_1 = trace
        .ends
        .lock()
        .iter()
        .filter(|(id, _)| *id == 1)
        .map(|(_, t)| *t)
        .max()
        .unwrap();
    let first_start_of_2 = trace
        .starts
        .lock()
        .iter()
        .filter(|(id, _)| *id == 2)
        .map(|(_, t)| *t)
        .min()
        .unwrap();
    assert!(last_end_of_1 <= first_start_of_2);
}

#[tokio::test]
async fn test_stop_prevents_new_units() {
    let urls: Vec<String> = (0..20).map(|i| format!("http://example.com/p{}", i)).collect();
    let urls: Vec<&str> = urls.iter().map(|s| s.as_str()).collect();
    let site = tree(&urls);
    let trace = Arc::new(Trace::default());
    let events = Arc::new(Events::default());
    let scanner = scanner(
        ScannerParam::default(),
        registry_of(vec![Scripted::new(1, Category::Misc, 50, &trace)]),
        Arc::new(MockSender::default()),
        events.clone(),
    );

    scanner.start(site.root()).unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    scanner.stop();
    let started_at_stop = trace.starts.lock().len();
    scanner.join().await;

    assert!(scanner.is_stopped());
    assert!(!scanner.is_running());
    assert!(started_at_stop < 20);
    assert_eq!(trace.starts.lock().len(), started_at_stop);
    assert_eq!(events.scanner_completes.load(Ordering::SeqCst), 1);
    let handle = &scanner.host_handles()[0];
    assert_eq!(handle.plugin_states(), vec![(1, PluginStatus::Stopped)]);
}

#[tokio::test]
async fn test_delay_between_sends() {
    let site = tree(&["http://example.com/item?a=1&b=2&c=3"]);
    let sender = Arc::new(MockSender::default());
    let mut param = ScannerParam::default();
    param.set_delay_in_ms(100);
    let scanner = scanner(
        param,
        PluginRegistry::with_builtin(),
        sender.clone(),
        Arc::new(Events::default()),
    );

    scanner.start(site.root()).unwrap();
    scanner.join().await;

    let sent = sender.sent.lock();
    assert_eq!(sent.len(), 3);
    for pair in sent.windows(2) {
        assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(100));
    }
}

#[tokio::test]
async fn test_reflection_alerts_reach_listeners() {
    let site = tree(&["http://example.com/search?q=shoes", "http://other.example/?id=5"]);
    let events = Arc::new(Events::default());
    let scanner = scanner(
        ScannerParam::default(),
        PluginRegistry::with_builtin(),
        Arc::new(MockSender::default()),
        events.clone(),
    );

    scanner.start(site.root()).unwrap();
    scanner.join().await;

    assert_eq!(events.alerts.load(Ordering::SeqCst), 2);
    assert_eq!(scanner.alert_count(), 2);
    assert_eq!(scanner.progress(), 100);
}

#[tokio::test]
async fn test_malformed_json_sends_nothing() {
    let mut msg = HttpMessage::new("POST", "http://example.com/api");
    msg.set_request_header("Content-Type", "application/json");
    msg.set_request_body(r#"{"a":"#.to_string());
    let mut site = SiteTree::new();
    site.add(msg);
    let sender = Arc::new(MockSender::default());
    let scanner = scanner(
        ScannerParam::default(),
        PluginRegistry::with_builtin(),
        sender.clone(),
        Arc::new(Events::default()),
    );

    scanner.start(site.root()).unwrap();
    scanner.join().await;

    assert_eq!(sender.count(), 0);
    assert_eq!(scanner.progress(), 100);
}

#[tokio::test]
async fn test_second_start_rejected_while_running() {
    let site = tree(&["http://example.com/a"]);
    let trace = Arc::new(Trace::default());
    let scanner = scanner(
        ScannerParam::default(),
        registry_of(vec![Scripted::new(1, Category::Misc, 50, &trace)]),
        Arc::new(MockSender::default()),
        Arc::new(Events::default()),
    );

    scanner.start(site.root()).unwrap();
    assert_eq!(scanner.start(site.root()), Err(ScannerError::AlreadyRunning));
    scanner.join().await;

    // finished scanners can start again
    scanner.start(site.root()).unwrap();
    scanner.join().await;
    assert_eq!(trace.starts.lock().len(), 2);
}

#[tokio::test]
async fn test_empty_tree_is_rejected() {
    let scanner = scanner(
        ScannerParam::default(),
        PluginRegistry::with_builtin(),
        Arc::new(MockSender::default()),
        Arc::new(Events::default()),
    );
    let site = SiteTree::new();
    assert!(matches!(scanner.start(site.root()), Err(ScannerError::EmptyTarget(_))));
    assert!(!scanner.is_running());
}

#[tokio::test]
async fn test_single_host_node() {
    let site = tree(&["http://a.example/x?q=1", "http://b.example/y?q=1"]);
    let sender = Arc::new(MockSender::default());
    let scanner = scanner(
        ScannerParam::default(),
        PluginRegistry::with_builtin(),
        sender.clone(),
        Arc::new(Events::default()),
    );

    scanner.start(site.host("http://b.example").unwrap()).unwrap();
    scanner.join().await;

    let handles = scanner.host_handles();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].host(), "http://b.example");
    assert!(sender.sent.lock().iter().all(|(_, uri)| uri.starts_with("http://b.example/")));
}

#[tokio::test]
async fn test_pause_holds_dispatch_until_resume() {
    let site = tree(&["http://example.com/item?a=1"]);
    let sender = Arc::new(MockSender::default());
    let scanner = scanner(
        ScannerParam::default(),
        PluginRegistry::with_builtin(),
        sender.clone(),
        Arc::new(Events::default()),
    );

    scanner.start(site.root()).unwrap();
    scanner.pause();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(scanner.is_paused());
    assert_eq!(sender.count(), 0);

    scanner.resume();
    scanner.join().await;
    assert_eq!(sender.count(), 1);
}

#[tokio::test]
async fn test_skipped_plugin_counts_as_finished() {
    let site = tree(&["http://example.com/item?a=1"]);
    let sender = Arc::new(MockSender::default());
    let events = Arc::new(Events {
        skip_on_start: Some(ParameterReflection::ID),
        ..Default::default()
    });
    let scanner = scanner(
        ScannerParam::default(),
        PluginRegistry::with_builtin(),
        sender.clone(),
        events.clone(),
    );

    scanner.start(site.root()).unwrap();
    scanner.join().await;

    assert_eq!(sender.count(), 0);
    let handle = &events.handles.lock()[0];
    assert_eq!(
        handle.plugin_states(),
        vec![(ParameterReflection::ID, PluginStatus::Skipped)]
    );
    assert_eq!(scanner.progress(), 100);
}
