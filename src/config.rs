//! Runtime configuration for the browser context.

use std::path::PathBuf;
use std::time::Duration;

/// Which variant of the snapshot-aware tools gets registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolMode {
    /// Tools attach an accessibility snapshot to their result.
    #[default]
    Snapshot,
    /// Tools return their status line only.
    NoSnapshot,
}

impl ToolMode {
    /// Whether tools built for this mode capture a snapshot.
    pub fn captures_snapshot(self) -> bool {
        matches!(self, ToolMode::Snapshot)
    }
}

/// Browser viewport size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

impl std::str::FromStr for Viewport {
    type Err = String;

    /// Parses `<width>x<height>`, e.g. `1280x720`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected <width>x<height>, got `{}`", s))?;
        let width: u32 = w.trim().parse().map_err(|_| format!("bad width `{}`", w))?;
        let height: u32 = h.trim().parse().map_err(|_| format!("bad height `{}`", h))?;
        if width == 0 || height == 0 {
            return Err("viewport dimensions must be positive".into());
        }
        Ok(Self { width, height })
    }
}

/// Options shared by the browser context and the engine it drives.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Browser channel name (`chrome`, `chromium`, `msedge`, ...).
    pub channel: String,
    /// Explicit browser executable; looked up on `PATH` when absent.
    pub executable_path: Option<PathBuf>,
    /// Run without a visible window.
    pub headless: bool,
    /// Initial viewport for new tabs.
    pub viewport: Viewport,
    /// Directory that receives exported PDFs.
    pub output_dir: PathBuf,
    /// Upper bound on the post-action settle wait.
    pub settle_timeout: Duration,
    /// Snapshot or no-snapshot tool variants.
    pub tool_mode: ToolMode,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            channel: "chrome".into(),
            executable_path: None,
            headless: true,
            viewport: Viewport::default(),
            output_dir: default_output_dir(),
            settle_timeout: Duration::from_millis(5000),
            tool_mode: ToolMode::Snapshot,
        }
    }
}

/// `$TMPDIR/tabdriver-mcp-output`.
pub fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join("tabdriver-mcp-output")
}
