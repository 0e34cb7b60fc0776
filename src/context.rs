//! Process-wide browser lifecycle: the open tabs and which one is current.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::BrowserOptions;
use crate::error::{Error, Result};
use crate::tab::{BrowserEngine, Tab, TabId};

/// Summary of one open tab.
#[derive(Debug, Clone)]
pub struct TabInfo {
    /// Position in the tab list.
    pub index: usize,
    /// Tab identifier.
    pub id: TabId,
    /// Current URL (empty if it could not be read).
    pub url: String,
    /// Document title (empty if it could not be read).
    pub title: String,
    /// Whether this is the current tab.
    pub current: bool,
}

#[derive(Default)]
struct TabState {
    tabs: Vec<Tab>,
    current: Option<TabId>,
}

impl TabState {
    /// Drop handles whose page is gone; forget `current` if it was one of them.
    fn prune(&mut self) {
        self.tabs.retain(|t| !t.is_closed());
        if let Some(id) = &self.current {
            if !self.tabs.iter().any(|t| t.id() == id) {
                self.current = None;
            }
        }
    }

    fn current(&self) -> Option<Tab> {
        let id = self.current.as_ref()?;
        self.tabs.iter().find(|t| t.id() == id).cloned()
    }

    fn push_current(&mut self, tab: Tab) {
        self.current = Some(tab.id().clone());
        self.tabs.push(tab);
    }
}

/// Owner of every tab and of the "current tab" pointer.
///
/// Only [`ensure_tab`](Self::ensure_tab), [`new_tab`](Self::new_tab),
/// [`select_tab`](Self::select_tab), [`close_tab`](Self::close_tab) and
/// [`close`](Self::close) assign the pointer. Tool invocations are serialized
/// by [`crate::ToolRegistry`], so this state sees a single writer at a time.
pub struct BrowserContext {
    engine: Arc<dyn BrowserEngine>,
    options: BrowserOptions,
    state: Mutex<TabState>,
}

impl BrowserContext {
    /// Create a context over `engine`. No browser is launched yet.
    pub fn new(engine: Arc<dyn BrowserEngine>, options: BrowserOptions) -> Self {
        Self {
            engine,
            options,
            state: Mutex::new(TabState::default()),
        }
    }

    /// Configuration this context was built with.
    pub fn options(&self) -> &BrowserOptions {
        &self.options
    }

    /// The current tab, creating one if there is none.
    pub async fn ensure_tab(&self) -> Result<Tab> {
        let mut state = self.state.lock().await;
        state.prune();
        if let Some(tab) = state.current() {
            return Ok(tab);
        }

        let tab = self.engine.new_tab().await?;
        tracing::debug!(tab = %tab.id(), "created tab");
        state.push_current(tab.clone());
        Ok(tab)
    }

    /// The current tab, or [`Error::NoActiveTab`].
    pub async fn current_tab(&self) -> Result<Tab> {
        let mut state = self.state.lock().await;
        state.prune();
        state.current().ok_or(Error::NoActiveTab)
    }

    /// Open a new tab and make it current.
    pub async fn new_tab(&self) -> Result<Tab> {
        let mut state = self.state.lock().await;
        state.prune();
        let tab = self.engine.new_tab().await?;
        tracing::debug!(tab = %tab.id(), "opened additional tab");
        state.push_current(tab.clone());
        Ok(tab)
    }

    /// Make the tab at `index` current.
    pub async fn select_tab(&self, index: usize) -> Result<Tab> {
        let mut state = self.state.lock().await;
        state.prune();
        let tab = state.tabs.get(index).cloned().ok_or_else(|| {
            Error::invalid_field("index", format!("no tab at index {}", index))
        })?;
        state.current = Some(tab.id().clone());
        Ok(tab)
    }

    /// Close the tab at `index`, or the current one.
    ///
    /// When the closed tab was current, the tab that took its position becomes
    /// current, or the last tab when it was the last one. Returns `false` when
    /// there was nothing to close.
    pub async fn close_tab(&self, index: Option<usize>) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.prune();
        let tab = match index {
            Some(i) => state.tabs.get(i).cloned().ok_or_else(|| {
                Error::invalid_field("index", format!("no tab at index {}", i))
            })?,
            None => match state.current() {
                Some(tab) => tab,
                None => return Ok(false),
            },
        };

        let position = state
            .tabs
            .iter()
            .position(|t| t.id() == tab.id())
            .unwrap_or_default();
        tab.close().await?;
        state.prune();
        if state.current.is_none() && !state.tabs.is_empty() {
            let next = position.min(state.tabs.len() - 1);
            state.current = Some(state.tabs[next].id().clone());
        }
        Ok(true)
    }

    /// Open tabs in order.
    pub async fn list_tabs(&self) -> Vec<TabInfo> {
        let (tabs, current) = {
            let mut state = self.state.lock().await;
            state.prune();
            (state.tabs.clone(), state.current.clone())
        };

        let mut infos = Vec::with_capacity(tabs.len());
        for (index, tab) in tabs.iter().enumerate() {
            infos.push(TabInfo {
                index,
                id: tab.id().clone(),
                url: tab.url().await.unwrap_or_default(),
                title: tab.title().await.unwrap_or_default(),
                current: current.as_ref() == Some(tab.id()),
            });
        }
        infos
    }

    /// Close every tab and stop the browser. Safe to call repeatedly.
    pub async fn close(&self) -> Result<()> {
        let tabs = {
            let mut state = self.state.lock().await;
            state.current = None;
            std::mem::take(&mut state.tabs)
        };

        for tab in tabs {
            if let Err(e) = tab.close().await {
                tracing::debug!(tab = %tab.id(), error = %e, "tab close failed during teardown");
            }
        }

        if let Err(e) = self.engine.shutdown().await {
            tracing::warn!(error = %e, "browser shutdown failed");
        }
        Ok(())
    }

    /// Install the configured browser channel; returns its name.
    pub async fn install(&self) -> Result<String> {
        self.engine.install().await.map_err(|e| match e {
            Error::InstallFailed(_) => e,
            other => Error::InstallFailed(other.to_string()),
        })
    }
}
