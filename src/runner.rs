//! Uniform pre/post protocol around a single tab action.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::tab::{Snapshot, Tab};

/// Appended to the status when the action left a file chooser open.
pub const FILE_CHOOSER_NOTE: &str =
    "There is a file chooser visible that requires browser_choose_file to be called";

/// How an action is wrapped.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Status line reported on success.
    pub status: String,
    /// Attach an accessibility snapshot after the action.
    pub capture_snapshot: bool,
    /// Leave a pending file chooser in place before running.
    pub no_clear_file_chooser: bool,
}

impl RunOptions {
    /// Options with the given status, no snapshot, clearing stale choosers.
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            capture_snapshot: false,
            no_clear_file_chooser: false,
        }
    }

    /// Set whether a snapshot is captured.
    pub fn capture_snapshot(mut self, capture: bool) -> Self {
        self.capture_snapshot = capture;
        self
    }

    /// Keep the pending file chooser for this action.
    pub fn keep_file_chooser(mut self) -> Self {
        self.no_clear_file_chooser = true;
        self
    }
}

/// Result of one runner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    status: String,
    snapshot: Option<Snapshot>,
}

impl ActionOutcome {
    /// Status line.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Snapshot, if one was captured.
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Text shown to the caller.
    pub fn to_text(&self) -> String {
        match &self.snapshot {
            Some(snapshot) => format!("{}\n\n{}", self.status, snapshot.to_markdown()),
            None => self.status.clone(),
        }
    }
}

/// Runs actions against a tab with optional settle-wait and snapshot capture.
#[derive(Debug, Clone)]
pub struct ActionRunner {
    settle_timeout: Duration,
}

impl ActionRunner {
    /// Runner whose settle-wait gives up after `settle_timeout`.
    pub fn new(settle_timeout: Duration) -> Self {
        Self { settle_timeout }
    }

    /// Run `action` without waiting for the page to settle.
    pub async fn run<F, Fut>(&self, tab: Tab, action: F, options: RunOptions) -> Result<ActionOutcome>
    where
        F: FnOnce(Tab) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.execute(tab, action, options, false).await
    }

    /// Run `action`, then wait (bounded) for the page to settle.
    pub async fn run_and_wait<F, Fut>(
        &self,
        tab: Tab,
        action: F,
        options: RunOptions,
    ) -> Result<ActionOutcome>
    where
        F: FnOnce(Tab) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.execute(tab, action, options, true).await
    }

    async fn execute<F, Fut>(
        &self,
        tab: Tab,
        action: F,
        options: RunOptions,
        wait: bool,
    ) -> Result<ActionOutcome>
    where
        F: FnOnce(Tab) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let had_file_chooser = tab.has_file_chooser();
        if had_file_chooser && !options.no_clear_file_chooser {
            tracing::debug!(tab = %tab.id(), "dropping stale file chooser");
            tab.clear_file_chooser();
        }

        if let Err(e) = action(tab.clone()).await {
            if !options.no_clear_file_chooser {
                tab.clear_file_chooser();
            }
            return Err(e);
        }

        if wait {
            self.settle(&tab).await;
        }

        let mut status = options.status;
        if tab.has_file_chooser() {
            status = format!("{}\n\n{}", status, FILE_CHOOSER_NOTE);
        }

        let snapshot = if options.capture_snapshot {
            match tab.snapshot().await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!(tab = %tab.id(), error = %e, "snapshot capture failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(ActionOutcome { status, snapshot })
    }

    /// A timeout or settle error is logged and otherwise ignored.
    async fn settle(&self, tab: &Tab) {
        let started = Instant::now();
        match tokio::time::timeout(self.settle_timeout, tab.wait_for_settle()).await {
            Ok(Ok(())) => {
                tracing::debug!(
                    tab = %tab.id(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "page settled"
                );
            }
            Ok(Err(e)) => {
                tracing::debug!(tab = %tab.id(), error = %e, "settle wait failed");
            }
            Err(_) => {
                tracing::debug!(
                    tab = %tab.id(),
                    timeout_ms = self.settle_timeout.as_millis() as u64,
                    "page did not settle before timeout"
                );
            }
        }
    }
}
