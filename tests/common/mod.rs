//! In-memory browser engine used by the integration tests.
//!
//! `FakeTab` records every primitive it receives so tests can assert exactly
//! what reached the "browser".

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use tabdriver_mcp::config::BrowserOptions;
use tabdriver_mcp::protocol::{ContentItem, ToolCallResult};
use tabdriver_mcp::tab::{BrowserEngine, PdfPageSize, Snapshot, Tab, TabHandle, TabId};
use tabdriver_mcp::{BrowserContext, Error, Result, ToolMode, ToolRegistry};

/// One primitive received by a fake tab.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Navigate(String),
    GoBack,
    GoForward,
    PressKey(String),
    SetViewportWidth(u32),
    ScrollHeight,
    SavePdf { size: PdfPageSize, path: PathBuf },
    ClearFileChooser,
    ChooseFiles(Vec<PathBuf>),
    WaitForSettle,
    Snapshot,
    Close,
}

#[derive(Default)]
struct Page {
    history: Vec<String>,
    position: usize,
    viewport_width: u32,
    file_chooser: bool,
    submitted_files: Vec<PathBuf>,
}

impl Page {
    fn url(&self) -> String {
        self.history
            .get(self.position)
            .cloned()
            .unwrap_or_else(|| "about:blank".into())
    }
}

/// Scriptable tab.
pub struct FakeTab {
    id: TabId,
    closed: AtomicBool,
    calls: Mutex<Vec<Call>>,
    page: Mutex<Page>,
    settle_never: AtomicBool,
    fail_snapshot: AtomicBool,
    fail_navigation: AtomicBool,
    chooser_on_next_action: AtomicBool,
}

impl FakeTab {
    fn new(viewport_width: u32) -> Self {
        Self {
            id: TabId::new(),
            closed: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            page: Mutex::new(Page {
                viewport_width,
                ..Page::default()
            }),
            settle_never: AtomicBool::new(false),
            fail_snapshot: AtomicBool::new(false),
            fail_navigation: AtomicBool::new(false),
            chooser_on_next_action: AtomicBool::new(false),
        }
    }

    /// Content height the fake lays out at `width`: narrower pages grow taller.
    pub fn height_for(width: u32) -> u32 {
        2_000_000 / width.max(1)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn submitted_files(&self) -> Vec<PathBuf> {
        self.page.lock().unwrap().submitted_files.clone()
    }

    /// Simulate the page opening a file chooser right now.
    pub fn open_file_chooser(&self) {
        self.page.lock().unwrap().file_chooser = true;
    }

    /// The next navigate/press/history action opens a file chooser.
    pub fn open_file_chooser_on_next_action(&self) {
        self.chooser_on_next_action.store(true, Ordering::SeqCst);
    }

    pub fn set_settle_never(&self, never: bool) {
        self.settle_never.store(never, Ordering::SeqCst);
    }

    pub fn set_fail_snapshot(&self, fail: bool) {
        self.fail_snapshot.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_navigation(&self, fail: bool) {
        self.fail_navigation.store(fail, Ordering::SeqCst);
    }

    /// Close the page behind the harness's back (crash, window closed by user).
    pub fn kill(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::ActionFailed("tab is closed".into()))
        } else {
            Ok(())
        }
    }

    fn after_action(&self) {
        if self.chooser_on_next_action.swap(false, Ordering::SeqCst) {
            self.page.lock().unwrap().file_chooser = true;
        }
    }
}

#[async_trait::async_trait]
impl TabHandle for FakeTab {
    fn id(&self) -> &TabId {
        &self.id
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.check_open()?;
        self.record(Call::Navigate(url.to_string()));
        if self.fail_navigation.load(Ordering::SeqCst) {
            return Err(Error::ActionFailed(format!("net::ERR_NAME_NOT_RESOLVED at {}", url)));
        }
        {
            let mut page = self.page.lock().unwrap();
            let keep = if page.history.is_empty() { 0 } else { page.position + 1 };
            page.history.truncate(keep);
            page.history.push(url.to_string());
            page.position = page.history.len() - 1;
        }
        self.after_action();
        Ok(())
    }

    async fn go_back(&self) -> Result<()> {
        self.check_open()?;
        self.record(Call::GoBack);
        {
            let mut page = self.page.lock().unwrap();
            page.position = page.position.saturating_sub(1);
        }
        self.after_action();
        Ok(())
    }

    async fn go_forward(&self) -> Result<()> {
        self.check_open()?;
        self.record(Call::GoForward);
        {
            let mut page = self.page.lock().unwrap();
            if page.position + 1 < page.history.len() {
                page.position += 1;
            }
        }
        self.after_action();
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.check_open()?;
        self.record(Call::PressKey(key.to_string()));
        self.after_action();
        Ok(())
    }

    async fn set_viewport_width(&self, width: u32) -> Result<()> {
        self.check_open()?;
        self.record(Call::SetViewportWidth(width));
        self.page.lock().unwrap().viewport_width = width;
        Ok(())
    }

    async fn scroll_height(&self) -> Result<u32> {
        self.check_open()?;
        self.record(Call::ScrollHeight);
        let width = self.page.lock().unwrap().viewport_width;
        Ok(Self::height_for(width))
    }

    async fn save_pdf(&self, size: PdfPageSize, path: &Path) -> Result<()> {
        self.check_open()?;
        self.record(Call::SavePdf {
            size,
            path: path.to_path_buf(),
        });
        std::fs::write(path, b"%PDF-1.7\n%fake\n")?;
        Ok(())
    }

    fn has_file_chooser(&self) -> bool {
        self.page.lock().unwrap().file_chooser
    }

    fn clear_file_chooser(&self) {
        self.record(Call::ClearFileChooser);
        self.page.lock().unwrap().file_chooser = false;
    }

    async fn choose_files(&self, paths: &[PathBuf]) -> Result<()> {
        self.check_open()?;
        self.record(Call::ChooseFiles(paths.to_vec()));
        let mut page = self.page.lock().unwrap();
        if !page.file_chooser {
            return Err(Error::ActionFailed("No file chooser visible".into()));
        }
        page.file_chooser = false;
        page.submitted_files.extend(paths.iter().cloned());
        Ok(())
    }

    async fn wait_for_settle(&self) -> Result<()> {
        self.check_open()?;
        self.record(Call::WaitForSettle);
        if self.settle_never.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        self.check_open()?;
        self.record(Call::Snapshot);
        if self.fail_snapshot.load(Ordering::SeqCst) {
            return Err(Error::ActionFailed("Execution context was destroyed".into()));
        }
        let url = self.page.lock().unwrap().url();
        Ok(Snapshot {
            url: url.clone(),
            title: "Fake Page".into(),
            tree: format!("- heading \"Fake Page\" [level=1]\n- link \"{}\"", url),
        })
    }

    async fn url(&self) -> Result<String> {
        self.check_open()?;
        Ok(self.page.lock().unwrap().url())
    }

    async fn title(&self) -> Result<String> {
        self.check_open()?;
        Ok("Fake Page".into())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.record(Call::Close);
        Ok(())
    }
}

/// Engine handing out [`FakeTab`]s.
pub struct FakeEngine {
    viewport_width: u32,
    tabs: Mutex<Vec<Arc<FakeTab>>>,
    installed: AtomicBool,
    fail_install: AtomicBool,
    install_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            viewport_width: 1280,
            tabs: Mutex::new(Vec::new()),
            installed: AtomicBool::new(true),
            fail_install: AtomicBool::new(false),
            install_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
        }
    }

    /// Engine whose browser binary is missing until `install` runs.
    pub fn uninstalled() -> Self {
        let engine = Self::new();
        engine.installed.store(false, Ordering::SeqCst);
        engine
    }

    pub fn set_fail_install(&self, fail: bool) {
        self.fail_install.store(fail, Ordering::SeqCst);
    }

    /// Every tab ever created, oldest first.
    pub fn tabs(&self) -> Vec<Arc<FakeTab>> {
        self.tabs.lock().unwrap().clone()
    }

    pub fn tab(&self, index: usize) -> Arc<FakeTab> {
        self.tabs()[index].clone()
    }

    pub fn install_calls(&self) -> usize {
        self.install_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BrowserEngine for FakeEngine {
    async fn new_tab(&self) -> Result<Tab> {
        if !self.installed.load(Ordering::SeqCst) {
            return Err(Error::ActionFailed(
                "Browser \"chrome\" is not installed. Try to install it using the \"browser_install\" tool."
                    .into(),
            ));
        }
        let tab = Arc::new(FakeTab::new(self.viewport_width));
        self.tabs.lock().unwrap().push(tab.clone());
        Ok(tab)
    }

    async fn install(&self) -> Result<String> {
        self.install_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_install.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "npx not found",
            )));
        }
        self.installed.store(true, Ordering::SeqCst);
        Ok("chrome".into())
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Options suitable for tests: short settle timeout, PDFs into `output_dir`.
pub fn test_options(output_dir: &Path, mode: ToolMode) -> BrowserOptions {
    BrowserOptions {
        output_dir: output_dir.to_path_buf(),
        settle_timeout: Duration::from_millis(500),
        tool_mode: mode,
        ..BrowserOptions::default()
    }
}

/// Engine, context and registry wired together.
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub browser: Arc<BrowserContext>,
    pub registry: ToolRegistry,
    pub output_dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(mode: ToolMode) -> Self {
        Self::with_engine(FakeEngine::new(), mode)
    }

    pub fn with_engine(engine: FakeEngine, mode: ToolMode) -> Self {
        let output_dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(engine);
        let browser = Arc::new(BrowserContext::new(
            engine.clone(),
            test_options(output_dir.path(), mode),
        ));
        let registry = ToolRegistry::new(browser.clone());
        Self {
            engine,
            browser,
            registry,
            output_dir,
        }
    }

    /// Call a tool, returning its typed error.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        self.registry.call(name, arguments).await
    }

    /// Call a tool that must succeed; returns its text.
    pub async fn text(&self, name: &str, arguments: Value) -> String {
        let result = self
            .call(name, arguments)
            .await
            .unwrap_or_else(|e| panic!("{} failed: {}", name, e));
        assert!(!result.is_error);
        text_of(&result)
    }

    pub async fn navigate(&self, url: &str) -> String {
        self.text("browser_navigate", json!({ "url": url })).await
    }
}

pub fn text_of(result: &ToolCallResult) -> String {
    assert_eq!(result.content.len(), 1, "exactly one content item");
    match &result.content[0] {
        ContentItem::Text { text } => text.clone(),
    }
}
