//! Browser tab abstraction.
//!
//! [`TabHandle`] is the primitive surface a tool acts on; [`BrowserEngine`]
//! produces tabs and installs the browser. The CDP implementations live in
//! [`crate::cdp`]; tests substitute their own.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

/// Stable identifier of an open tab.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabId(String);

impl TabId {
    /// Fresh random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        write!(f, "{}", &self.0[..self.0.len().min(8)])
    }
}

/// Point-in-time structured view of a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Page URL at capture time.
    pub url: String,
    /// Document title.
    pub title: String,
    /// Accessibility tree rendered as YAML.
    pub tree: String,
}

impl Snapshot {
    /// Render as the markdown block appended to tool results.
    pub fn to_markdown(&self) -> String {
        format!(
            "- Page URL: {}\n- Page Title: {}\n- Page Snapshot\n```yaml\n{}\n```",
            self.url,
            self.title,
            self.tree.trim_end()
        )
    }
}

/// Exact page size for a PDF export, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfPageSize {
    /// Page width.
    pub width_px: u32,
    /// Page height.
    pub height_px: u32,
}

/// CSS pixels per inch, as used by the print pipeline.
pub const CSS_PX_PER_INCH: f64 = 96.0;

impl PdfPageSize {
    /// Paper `(width, height)` in inches, the unit `Page.printToPDF` takes.
    pub fn paper_inches(&self) -> (f64, f64) {
        (
            f64::from(self.width_px) / CSS_PX_PER_INCH,
            f64::from(self.height_px) / CSS_PX_PER_INCH,
        )
    }
}

/// One controllable browser page.
///
/// Every method fails with [`crate::Error::ActionFailed`] once the tab has
/// been closed.
#[async_trait::async_trait]
pub trait TabHandle: Send + Sync {
    /// Identifier, unique among the tabs of one context.
    fn id(&self) -> &TabId;

    /// Whether [`TabHandle::close`] has run or the page went away.
    fn is_closed(&self) -> bool;

    /// Load `url` and wait for the load event.
    async fn navigate(&self, url: &str) -> Result<()>;

    /// History back. A no-op when there is no previous entry.
    async fn go_back(&self) -> Result<()>;

    /// History forward. A no-op when there is no next entry.
    async fn go_forward(&self) -> Result<()>;

    /// Dispatch a key press (down + up) to the focused element.
    async fn press_key(&self, key: &str) -> Result<()>;

    /// Resize the viewport width, keeping the current height.
    async fn set_viewport_width(&self, width: u32) -> Result<()>;

    /// Full scrollable content height at the current viewport.
    async fn scroll_height(&self) -> Result<u32>;

    /// Write a single-page PDF of exactly `size` to `path`.
    async fn save_pdf(&self, size: PdfPageSize, path: &Path) -> Result<()>;

    /// Whether a page-triggered file chooser is waiting for files.
    fn has_file_chooser(&self) -> bool;

    /// Forget any pending file chooser.
    fn clear_file_chooser(&self);

    /// Submit `paths` to the pending file chooser.
    async fn choose_files(&self, paths: &[PathBuf]) -> Result<()>;

    /// Block until navigation and document loading are quiet.
    ///
    /// Callers bound this with their own timeout.
    async fn wait_for_settle(&self) -> Result<()>;

    /// Capture the accessibility snapshot.
    async fn snapshot(&self) -> Result<Snapshot>;

    /// Current URL.
    async fn url(&self) -> Result<String>;

    /// Document title.
    async fn title(&self) -> Result<String>;

    /// Close the page. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Shared tab pointer.
pub type Tab = Arc<dyn TabHandle>;

/// Produces tabs and manages the browser binary.
#[async_trait::async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Open a blank tab, launching the browser when needed.
    async fn new_tab(&self) -> Result<Tab>;

    /// Make sure the configured channel is installed; returns its name.
    async fn install(&self) -> Result<String>;

    /// Tear the browser process down. Idempotent.
    async fn shutdown(&self) -> Result<()>;
}
