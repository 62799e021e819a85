//! Pause / resume / stop signalling
//!
//! Cooperative only: workers read the state at their checkpoints and wait on
//! it before dispatching. Nothing here interrupts a task that is running.

use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

/// Shared run state for one scanner or host
#[derive(Debug, Clone)]
pub struct ScanControl {
    tx: Arc<watch::Sender<RunState>>,
}

impl Default for ScanControl {
    fn default() -> Self {
        Self::new(RunState::Running)
    }
}

impl ScanControl {
    pub fn new(initial: RunState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> RunState {
        *self.tx.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == RunState::Stopped
    }

    pub fn is_paused(&self) -> bool {
        self.state() == RunState::Paused
    }

    /// No effect once stopped
    pub fn pause(&self) {
        self.tx.send_modify(|s| {
            if *s == RunState::Running {
                *s = RunState::Paused;
            }
        });
    }

    /// No effect once stopped
    pub fn resume(&self) {
        self.tx.send_modify(|s| {
            if *s == RunState::Paused {
                *s = RunState::Running;
            }
        });
    }

    /// Terminal
    pub fn stop(&self) {
        self.tx.send_modify(|s| *s = RunState::Stopped);
    }

    /// Returns once the state is anything but `Paused`
    pub async fn wait_while_paused(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|s| *s != RunState::Paused).await;
    }

    /// Returns once stopped
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|s| *s == RunState::Stopped).await;
    }
}
