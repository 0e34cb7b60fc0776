//! Chrome DevTools Protocol engine built on chromiumoxide.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::{BackendNodeId, SetFileInputFilesParams};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::input::{DispatchKeyEventParams, DispatchKeyEventType};
use chromiumoxide::cdp::browser_protocol::page::{
    EventFileChooserOpened, EventFrameStartedLoading, EventFrameStoppedLoading,
    GetNavigationHistoryParams, NavigateToHistoryEntryParams, PrintToPdfParams,
    SetInterceptFileChooserDialogParams,
};
use chromiumoxide::cdp::browser_protocol::target::{EventTargetCrashed, EventTargetDestroyed};
use chromiumoxide::handler::viewport::Viewport as CdpViewport;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::BrowserOptions;
use crate::error::{Error, Result};
use crate::keys::KeyDefinition;
use crate::tab::{BrowserEngine, PdfPageSize, Snapshot, Tab, TabHandle, TabId};

/// How long an action gets to start a navigation before the page counts as idle.
const NAVIGATION_GRACE: Duration = Duration::from_millis(300);

struct Running {
    browser: Browser,
    handler: JoinHandle<()>,
    alive: Arc<AtomicBool>,
}

impl Running {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.handler.is_finished()
    }
}

/// Launches one browser process lazily and opens tabs in it.
///
/// A browser whose connection dropped is replaced on the next tab request.
pub struct CdpEngine {
    options: BrowserOptions,
    running: Mutex<Option<Running>>,
}

impl CdpEngine {
    /// Engine for `options`. Nothing is launched until the first tab.
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            running: Mutex::new(None),
        }
    }

    fn resolve_executable(&self) -> Option<PathBuf> {
        if let Some(path) = &self.options.executable_path {
            return path.exists().then(|| path.clone());
        }
        executable_candidates(&self.options.channel)
            .iter()
            .find_map(|name| which::which(name).ok())
            .or_else(|| playwright_cached_executable(&self.options.channel))
    }

    async fn launch(&self) -> Result<Running> {
        let viewport = self.options.viewport;
        let mut builder = BrowserConfig::builder()
            .window_size(viewport.width, viewport.height)
            .viewport(CdpViewport {
                width: viewport.width,
                height: viewport.height,
                ..Default::default()
            })
            .arg("--disable-dev-shm-usage");

        if !self.options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = self.resolve_executable() {
            builder = builder.chrome_executable(path);
        }

        let config = builder.build().map_err(|e| {
            Error::ActionFailed(format!(
                "Browser \"{}\" is not installed ({}). Try to install it using the \"browser_install\" tool.",
                self.options.channel, e
            ))
        })?;

        tracing::info!(channel = %self.options.channel, headless = self.options.headless, "launching browser");
        let (browser, mut handler) = Browser::launch(config).await?;

        let alive = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&alive);
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!(error = %e, "CDP handler event loop ended");
                    break;
                }
            }
            flag.store(false, Ordering::SeqCst);
        });

        Ok(Running {
            browser,
            handler,
            alive,
        })
    }
}

#[async_trait::async_trait]
impl BrowserEngine for CdpEngine {
    async fn new_tab(&self) -> Result<Tab> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.is_alive()) {
            if let Some(stale) = running.take() {
                tracing::warn!("browser connection lost, relaunching");
                stale.handler.abort();
            }
        }
        if running.is_none() {
            *running = Some(self.launch().await?);
        }
        let running = running
            .as_ref()
            .ok_or_else(|| Error::Internal("browser not running".into()))?;

        let page = running.browser.new_page("about:blank").await?;
        let liveness = TabLiveness::new(Arc::clone(&running.alive));
        let tab = CdpTab::attach(page, &running.browser, liveness).await?;
        Ok(Arc::new(tab))
    }

    async fn install(&self) -> Result<String> {
        let channel = self.options.channel.clone();
        if let Some(path) = self.resolve_executable() {
            tracing::info!(channel = %channel, path = %path.display(), "browser already installed");
            return Ok(channel);
        }

        tracing::info!(channel = %channel, "installing browser via playwright");
        let output = tokio::process::Command::new("npx")
            .args(["--yes", "playwright", "install", &channel])
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| Error::InstallFailed(format!("could not run npx: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::InstallFailed(format!(
                "playwright install {} exited with {}: {}",
                channel,
                output.status,
                stderr.trim()
            )));
        }
        Ok(channel)
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };
        tracing::info!("closing browser");
        let closed = running.browser.close().await;
        if let Err(e) = running.browser.wait().await {
            tracing::debug!(error = %e, "browser process did not exit cleanly");
        }
        running.handler.abort();
        closed.map(|_| ()).map_err(Error::from)
    }
}

fn executable_candidates(channel: &str) -> &'static [&'static str] {
    match channel {
        "chromium" => &["chromium", "chromium-browser"],
        "msedge" => &["microsoft-edge", "microsoft-edge-stable", "msedge"],
        "chrome-beta" => &["google-chrome-beta"],
        _ => &["google-chrome", "google-chrome-stable", "chrome"],
    }
}

/// `<cache>/ms-playwright/chromium-<rev>/chrome-linux/chrome`, newest revision first.
fn playwright_cached_executable(channel: &str) -> Option<PathBuf> {
    if channel != "chromium" {
        return None;
    }
    let root = std::env::var_os("PLAYWRIGHT_BROWSERS_PATH")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache/ms-playwright")))?;

    let mut revisions: Vec<PathBuf> = std::fs::read_dir(&root)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("chromium-"))
        })
        .collect();
    revisions.sort();
    revisions
        .into_iter()
        .rev()
        .map(|dir| dir.join("chrome-linux").join("chrome"))
        .find(|p| p.exists())
}

/// Index of the history entry `delta` steps from `current`, if it exists.
pub fn history_entry_index(current: i64, delta: i64, len: usize) -> Option<usize> {
    let target = usize::try_from(current.checked_add(delta)?).ok()?;
    (target < len).then_some(target)
}

/// Whether a tab is still usable.
///
/// A tab dies when it is closed through us, when the browser reports its
/// target destroyed or crashed, or when the browser connection itself drops.
#[derive(Debug, Clone)]
pub struct TabLiveness {
    closed: Arc<AtomicBool>,
    browser_alive: Arc<AtomicBool>,
}

impl TabLiveness {
    /// Fresh open tab in a browser whose connection state is `browser_alive`.
    pub fn new(browser_alive: Arc<AtomicBool>) -> Self {
        Self {
            closed: Arc::new(AtomicBool::new(false)),
            browser_alive,
        }
    }

    /// Mark closed. Returns whether it already was.
    pub fn mark_closed(&self) -> bool {
        self.closed.swap(true, Ordering::SeqCst)
    }

    /// Closed by either side.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || !self.browser_alive.load(Ordering::SeqCst)
    }
}

/// A chromiumoxide page plus its file-chooser and load tracking.
pub struct CdpTab {
    id: TabId,
    page: Page,
    liveness: TabLiveness,
    file_chooser: Arc<StdMutex<Option<BackendNodeId>>>,
    loading: Arc<watch::Sender<bool>>,
    listeners: Vec<JoinHandle<()>>,
}

impl CdpTab {
    /// Wrap `page`, intercepting file choosers it opens and tracking whether
    /// its main frame is loading.
    pub async fn attach(page: Page, browser: &Browser, liveness: TabLiveness) -> Result<Self> {
        page.execute(SetInterceptFileChooserDialogParams::new(true))
            .await?;
        let mut listeners = Vec::with_capacity(3);

        let mut choosers = page.event_listener::<EventFileChooserOpened>().await?;
        let file_chooser = Arc::new(StdMutex::new(None));
        let slot = Arc::clone(&file_chooser);
        listeners.push(tokio::spawn(async move {
            while let Some(event) = choosers.next().await {
                if let Some(node) = event.backend_node_id.clone() {
                    *slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(node);
                }
            }
        }));

        let main_frame = page.mainframe().await?;
        let started = page
            .event_listener::<EventFrameStartedLoading>()
            .await?
            .map(|e| (e.frame_id.clone(), true));
        let stopped = page
            .event_listener::<EventFrameStoppedLoading>()
            .await?
            .map(|e| (e.frame_id.clone(), false));
        let loading = Arc::new(watch::channel(false).0);
        let flag = Arc::clone(&loading);
        listeners.push(tokio::spawn(async move {
            let mut events = Box::pin(futures::stream::select(started, stopped));
            while let Some((frame, busy)) = events.next().await {
                if main_frame.as_ref().map_or(true, |main| *main == frame) {
                    flag.send_replace(busy);
                }
            }
        }));

        let target = page.target_id().clone();
        let destroyed = browser
            .event_listener::<EventTargetDestroyed>()
            .await?
            .map(|e| e.target_id.clone());
        let crashed = browser
            .event_listener::<EventTargetCrashed>()
            .await?
            .map(|e| e.target_id.clone());
        let gone = liveness.clone();
        listeners.push(tokio::spawn(async move {
            let mut events = Box::pin(futures::stream::select(destroyed, crashed));
            while let Some(id) = events.next().await {
                if id == target {
                    tracing::debug!(target_id = ?id, "page target went away");
                    gone.mark_closed();
                    break;
                }
            }
        }));

        Ok(Self {
            id: TabId::new(),
            page,
            liveness,
            file_chooser,
            loading,
            listeners,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::ActionFailed(format!("tab {} is closed", self.id)))
        } else {
            Ok(())
        }
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T> {
        self.page
            .evaluate(script)
            .await?
            .into_value()
            .map_err(|e| Error::ActionFailed(format!("unexpected script result: {}", e)))
    }

    /// Queue a move `delta` entries through session history. Out of range is a no-op.
    async fn step_history(&self, delta: i64) -> Result<()> {
        let history = self
            .page
            .execute(GetNavigationHistoryParams::default())
            .await?
            .result;
        let Some(index) =
            history_entry_index(history.current_index, delta, history.entries.len())
        else {
            tracing::debug!(tab = %self.id, delta, "no history entry to move to");
            return Ok(());
        };
        let entry = history.entries[index].id;
        self.page
            .execute(NavigateToHistoryEntryParams::new(entry))
            .await?;
        Ok(())
    }

    async fn dispatch_key(&self, kind: DispatchKeyEventType, key: &KeyDefinition) -> Result<()> {
        let mut builder = DispatchKeyEventParams::builder()
            .r#type(kind.clone())
            .key(key.key.clone())
            .code(key.code.clone())
            .windows_virtual_key_code(key.key_code)
            .native_virtual_key_code(key.key_code);
        if matches!(kind, DispatchKeyEventType::KeyDown) {
            if let Some(text) = &key.text {
                builder = builder.text(text.clone()).unmodified_text(text.clone());
            }
        }
        let params = builder.build().map_err(Error::ActionFailed)?;
        self.page.execute(params).await?;
        Ok(())
    }

    fn abort_listeners(&self) {
        for listener in &self.listeners {
            listener.abort();
        }
    }
}

#[async_trait::async_trait]
impl TabHandle for CdpTab {
    fn id(&self) -> &TabId {
        &self.id
    }

    fn is_closed(&self) -> bool {
        self.liveness.is_closed()
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.ensure_open()?;
        self.page.goto(url).await?;
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        self.ensure_open()?;
        self.step_history(-1).await
    }

    async fn go_forward(&self) -> Result<()> {
        self.ensure_open()?;
        self.step_history(1).await
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        let definition = KeyDefinition::resolve(key)?;
        self.dispatch_key(definition.down_event(), &definition)
            .await?;
        self.dispatch_key(DispatchKeyEventType::KeyUp, &definition)
            .await
    }

    async fn set_viewport_width(&self, width: u32) -> Result<()> {
        self.ensure_open()?;
        let height: u32 = self.eval("window.innerHeight").await?;
        let params = SetDeviceMetricsOverrideParams::builder()
            .width(i64::from(width))
            .height(i64::from(height.max(1)))
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(Error::ActionFailed)?;
        self.page.execute(params).await?;
        Ok(())
    }

    async fn scroll_height(&self) -> Result<u32> {
        self.ensure_open()?;
        self.eval(
            "Math.max(document.documentElement.scrollHeight, document.body ? document.body.scrollHeight : 0)",
        )
        .await
    }

    async fn save_pdf(&self, size: PdfPageSize, path: &Path) -> Result<()> {
        self.ensure_open()?;
        let (paper_width, paper_height) = size.paper_inches();
        let params = PrintToPdfParams {
            print_background: Some(true),
            paper_width: Some(paper_width),
            paper_height: Some(paper_height),
            margin_top: Some(0.0),
            margin_bottom: Some(0.0),
            margin_left: Some(0.0),
            margin_right: Some(0.0),
            ..Default::default()
        };
        self.page.save_pdf(params, path).await?;
        Ok(())
    }

    fn has_file_chooser(&self) -> bool {
        self.file_chooser
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_some()
    }

    fn clear_file_chooser(&self) {
        *self.file_chooser.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    async fn choose_files(&self, paths: &[PathBuf]) -> Result<()> {
        self.ensure_open()?;
        let node = self
            .file_chooser
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or_else(|| Error::ActionFailed("No file chooser visible".into()))?;

        let files = paths.iter().map(|p| p.display().to_string()).collect();
        let mut params = SetFileInputFilesParams::new(files);
        params.backend_node_id = Some(node);
        self.page.execute(params).await?;
        Ok(())
    }

    async fn wait_for_settle(&self) -> Result<()> {
        self.ensure_open()?;
        let mut loading = self.loading.subscribe();
        // Actions only queue navigations; give one a moment to start.
        let busy = *loading.borrow();
        if !busy {
            let _ = tokio::time::timeout(NAVIGATION_GRACE, loading.wait_for(|busy| *busy)).await;
        }
        loading
            .wait_for(|busy| !*busy)
            .await
            .map(|_| ())
            .map_err(|_| Error::ActionFailed(format!("tab {} is closed", self.id)))?;

        loop {
            let state: String = self.eval("document.readyState").await?;
            if state == "complete" {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        self.ensure_open()?;
        let tree: String = self.eval(SNAPSHOT_SCRIPT).await?;
        Ok(Snapshot {
            url: self.url().await?,
            title: self.title().await?,
            tree,
        })
    }

    async fn url(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn title(&self) -> Result<String> {
        self.ensure_open()?;
        Ok(self.page.get_title().await?.unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        let was_alive = !self.liveness.is_closed();
        if self.liveness.mark_closed() {
            return Ok(());
        }
        self.abort_listeners();
        if was_alive {
            self.page.clone().close().await?;
        }
        Ok(())
    }
}

impl Drop for CdpTab {
    fn drop(&mut self) {
        self.abort_listeners();
    }
}

/// Walks the DOM and renders visible nodes as a YAML accessibility outline.
pub const SNAPSHOT_SCRIPT: &str = r#"(() => {
  const MAX_LINES = 2000;
  const implicit = {
    A: 'link', BUTTON: 'button', H1: 'heading', H2: 'heading', H3: 'heading',
    H4: 'heading', H5: 'heading', H6: 'heading', IMG: 'img', INPUT: 'textbox',
    SELECT: 'combobox', TEXTAREA: 'textbox', UL: 'list', OL: 'list', LI: 'listitem',
    NAV: 'navigation', MAIN: 'main', HEADER: 'banner', FOOTER: 'contentinfo',
    FORM: 'form', TABLE: 'table', TR: 'row', TD: 'cell', TH: 'columnheader',
    P: 'paragraph', DIALOG: 'dialog', ARTICLE: 'article', SECTION: 'region'
  };
  const inputRoles = { checkbox: 'checkbox', radio: 'radio', button: 'button',
    submit: 'button', reset: 'button', range: 'slider', search: 'searchbox', file: 'button' };
  const lines = [];
  const quote = (s) => JSON.stringify(s.replace(/\s+/g, ' ').trim().slice(0, 120));
  const hidden = (el) => {
    if (el.getAttribute('aria-hidden') === 'true') return true;
    const style = window.getComputedStyle(el);
    return style.display === 'none' || style.visibility === 'hidden';
  };
  const roleOf = (el) => {
    const explicit = el.getAttribute('role');
    if (explicit) return explicit;
    if (el.tagName === 'INPUT') return inputRoles[(el.type || 'text').toLowerCase()] || 'textbox';
    return implicit[el.tagName] || null;
  };
  const nameOf = (el) => {
    const label = el.getAttribute('aria-label') || el.getAttribute('alt') || el.getAttribute('title');
    if (label) return label;
    if (el.labels && el.labels.length) return el.labels[0].innerText || '';
    if (el.placeholder) return el.placeholder;
    if (['link', 'button', 'heading', 'listitem', 'cell', 'columnheader', 'paragraph'].includes(roleOf(el)))
      return el.innerText || '';
    return '';
  };
  const visit = (el, depth) => {
    if (lines.length >= MAX_LINES || hidden(el)) return;
    const role = roleOf(el);
    let next = depth;
    if (role) {
      const name = nameOf(el);
      let line = '  '.repeat(depth) + '- ' + role + (name ? ' ' + quote(name) : '');
      if (role === 'heading') {
        const level = el.getAttribute('aria-level') || (/^H[1-6]$/.test(el.tagName) ? el.tagName[1] : null);
        if (level) line += ' [level=' + level + ']';
      }
      if (el.checked) line += ' [checked]';
      if (el.disabled) line += ' [disabled]';
      if (el.value && role === 'textbox') line += ': ' + quote(String(el.value));
      lines.push(line);
      next = depth + 1;
    } else {
      for (const node of el.childNodes) {
        if (node.nodeType === Node.TEXT_NODE && node.textContent.trim()) {
          lines.push('  '.repeat(depth) + '- text: ' + quote(node.textContent));
        }
      }
    }
    for (const child of el.children) visit(child, next);
  };
  if (document.body) visit(document.body, 0);
  return lines.join('\n');
})()"#;
