//! ascan - headless active scanner
//!
//! Fetches each target once to seed the site tree, runs the active scan and
//! prints the alerts as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ascan::app::Config;
use ascan::error::{AscanError, ScannerError};
use ascan::http::{HttpClient, HttpMessage, HttpSender};
use ascan::scanner::{
    Alert, AntiCsrfTokens, PluginRegistry, ScanPolicy, Scanner, ScannerListener, TracingListener,
};
use ascan::site::SiteTree;

/// Active web application scanner
#[derive(Parser, Debug)]
#[command(name = "ascan")]
#[command(author, version, about = "Active web application scanner", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ASCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Target URL (repeatable)
    #[arg(short, long = "target", env = "ASCAN_TARGETS", value_delimiter = ',')]
    targets: Vec<String>,

    /// Override scanner.thread_per_host
    #[arg(long, env = "ASCAN_THREADS")]
    threads: Option<i64>,

    /// Override scanner.host_per_scan
    #[arg(long, env = "ASCAN_HOSTS")]
    hosts: Option<i64>,

    /// Override scanner.delay_in_ms
    #[arg(long, env = "ASCAN_DELAY_MS")]
    delay_ms: Option<i64>,

    /// Policy preset (standard, quick, full)
    #[arg(long, env = "ASCAN_POLICY")]
    policy: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "ASCAN_LOG_LEVEL")]
    log_level: String,

    /// Log file path (enables file logging)
    #[arg(long, env = "ASCAN_LOG_FILE")]
    log_file: Option<String>,

    /// Enable JSON structured logging
    #[arg(long, env = "ASCAN_LOG_JSON")]
    log_json: bool,

    /// Generate default configuration and exit
    #[arg(long)]
    generate_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate_config: bool,
}

/// Keeps every alert for the final report
#[derive(Default)]
struct AlertCollector {
    alerts: Mutex<Vec<Alert>>,
}

impl ScannerListener for AlertCollector {
    fn alert_found(&self, alert: &Alert) {
        self.alerts.lock().push(alert.clone());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        println!("{}", Config::default().to_toml()?);
        return Ok(());
    }

    init_logging(&cli)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting ascan");

    if cli.validate_config {
        let path = match &cli.config {
            Some(p) => p.clone(),
            None => Config::default_config_path()?,
        };
        Config::validate(&path).map_err(|e| anyhow::anyhow!(AscanError::from(e).user_message()))?;
        tracing::info!(path = %path.display(), "Configuration is valid");
        return Ok(());
    }

    let config = load_config(&cli)?;
    run_scan(&cli, config).await
}

/// Initialize the logging system
fn init_logging(cli: &Cli) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    if let Some(log_path) = &cli.log_file {
        let file_appender = if log_path.contains('/') || log_path.contains('\\') {
            let path = std::path::Path::new(log_path);
            let dir = path.parent().unwrap_or(std::path::Path::new("."));
            let filename = path.file_name().and_then(|s| s.to_str()).unwrap_or("ascan.log");
            RollingFileAppender::new(Rotation::DAILY, dir, filename)
        } else {
            let log_dir = Config::data_dir()
                .map(|d| d.join("logs"))
                .unwrap_or_else(|_| PathBuf::from("."));
            std::fs::create_dir_all(&log_dir).ok();
            RollingFileAppender::new(Rotation::DAILY, log_dir, log_path)
        };

        if cli.log_json {
            subscriber
                .with(fmt::layer().json().with_writer(file_appender).with_ansi(false))
                .init();
        } else {
            subscriber
                .with(fmt::layer().with_writer(file_appender).with_ansi(false))
                .init();
        }
    } else if cli.log_json {
        subscriber.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        // stdout carries the report
        subscriber.with(fmt::layer().with_writer(std::io::stderr)).init();
    }

    Ok(())
}

/// Load configuration with CLI overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).map_err(|e| anyhow::anyhow!(AscanError::from(e).user_message()))?;

    if let Some(threads) = cli.threads {
        config.scanner.set_thread_per_host(threads);
    }
    if let Some(hosts) = cli.hosts {
        config.scanner.set_host_per_scan(hosts);
    }
    if let Some(delay) = cli.delay_ms {
        config.scanner.set_delay_in_ms(delay);
    }
    if let Some(name) = &cli.policy {
        config.policy = ScanPolicy::preset(name).with_context(|| format!("Unknown policy preset '{}'", name))?;
    }

    tracing::debug!(
        host_per_scan = config.scanner.host_per_scan(),
        thread_per_host = config.scanner.thread_per_host(),
        delay_in_ms = config.scanner.delay_in_ms(),
        policy = %config.policy.name,
        "Effective settings"
    );
    Ok(config)
}

/// Request each target once so the tree has templates with responses
async fn seed_site_tree(targets: &[String], sender: &dyn HttpSender) -> Result<SiteTree> {
    let mut tree = SiteTree::new();
    for target in targets {
        if url::Url::parse(target).is_err() {
            let err = AscanError::from(ScannerError::InvalidTarget(target.clone()));
            anyhow::bail!(err.user_message());
        }
        let mut msg = HttpMessage::new("GET", target);
        if let Err(e) = sender.send(&mut msg, true).await {
            tracing::warn!(target = %target, error = %e, "Baseline request failed");
        }
        tree.add(msg);
    }
    Ok(tree)
}

async fn run_scan(cli: &Cli, config: Config) -> Result<()> {
    if cli.targets.is_empty() {
        anyhow::bail!("No targets given. Pass one or more --target URLs.");
    }

    let client: Arc<dyn HttpSender> =
        Arc::new(HttpClient::new(&config.connection).context("Failed to create HTTP client")?);
    let tree = seed_site_tree(&cli.targets, client.as_ref()).await?;

    let handle_anti_csrf = config.scanner.handle_anti_csrf;
    let mut scanner = Scanner::new(config.scanner, config.policy, PluginRegistry::with_builtin(), client);
    if handle_anti_csrf {
        scanner = scanner.with_anti_csrf(Arc::new(AntiCsrfTokens::new(config.anti_csrf.token_names)));
    }

    let collector = Arc::new(AlertCollector::default());
    scanner.add_listener(Arc::new(TracingListener));
    scanner.add_listener(collector.clone());

    scanner
        .start(tree.root())
        .map_err(|e| anyhow::anyhow!(AscanError::from(e).user_message()))?;

    {
        let scanner = scanner.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            scanner.stop();
        });
    }

    scanner.join().await;

    let alerts = collector.alerts.lock().clone();
    println!("{}", serde_json::to_string_pretty(&alerts)?);
    tracing::info!(
        alerts = alerts.len(),
        progress = scanner.progress(),
        stopped = scanner.is_stopped(),
        "Done"
    );
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to register SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Received Ctrl-C, stopping scan");
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, stopping scan");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, stopping scan");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, stopping scan");
        }
    }
}
