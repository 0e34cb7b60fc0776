//! Tool definitions and registry for MCP server.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::ToolMode;
use crate::context::BrowserContext;
use crate::error::{Error, FieldError, Result};
use crate::params::{check_url, input_schema, parse_params, NoParams, Validate};
use crate::protocol::{ToolCallResult, ToolDefinition};
use crate::runner::{ActionRunner, RunOptions};
use crate::tab::{PdfPageSize, Tab};

/// Longest delay `browser_wait` will honor, in seconds.
pub const MAX_WAIT_SECS: f64 = 10.0;

/// PDF width used when the caller gives none.
pub const DEFAULT_PDF_WIDTH: u32 = 1400;

/// Tool trait for implementing MCP tools.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult>;
}

/// Context passed to tools during execution.
pub struct ToolContext {
    /// Tabs and browser lifecycle.
    pub browser: Arc<BrowserContext>,
    /// Pre/post action protocol.
    pub runner: ActionRunner,
}

impl ToolContext {
    /// Create a new tool context.
    pub fn new(browser: Arc<BrowserContext>) -> Self {
        let runner = ActionRunner::new(browser.options().settle_timeout);
        Self { browser, runner }
    }
}

/// Registry of available tools.
///
/// Invocations are serialized: a tool runs to completion before the next one
/// starts, so the current-tab pointer never sees two writers.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    context: Arc<ToolContext>,
    gate: Mutex<()>,
}

impl ToolRegistry {
    /// Registry with the built-in tools for the context's configured mode.
    pub fn new(browser: Arc<BrowserContext>) -> Self {
        let mode = browser.options().tool_mode;
        Self::with_mode(browser, mode)
    }

    /// Registry with the built-in tools for `mode`.
    pub fn with_mode(browser: Arc<BrowserContext>, mode: ToolMode) -> Self {
        let mut registry = Self {
            tools: HashMap::new(),
            order: Vec::new(),
            context: Arc::new(ToolContext::new(browser)),
            gate: Mutex::new(()),
        };
        for tool in builtin_tools(mode) {
            registry.register(tool);
        }
        registry
    }

    /// Get tool definitions, in registration order.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition())
            .collect()
    }

    /// Browser context shared by all tools.
    pub fn browser(&self) -> &Arc<BrowserContext> {
        &self.context.browser
    }

    /// Run a tool, returning its typed error on failure.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_string()))?;

        let _turn = self.gate.lock().await;
        let started = std::time::Instant::now();
        let result = tool.execute(arguments, &self.context).await;
        tracing::debug!(
            tool = name,
            ok = result.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tool finished"
        );
        result
    }

    /// Execute a tool by name.
    ///
    /// Tool failures come back as an `isError` result; only an unknown tool is
    /// an `Err`.
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        match self.call(name, arguments).await {
            Err(e @ Error::ToolNotFound(_)) => Err(e),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool failed");
                Ok(ToolCallResult::error(e.to_string()))
            }
            ok => ok,
        }
    }

    /// Register a custom tool. A tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        if self.tools.insert(name.clone(), tool).is_none() {
            self.order.push(name);
        }
    }
}

/// Every built-in tool, with snapshot-aware tools configured for `mode`.
pub fn builtin_tools(mode: ToolMode) -> Vec<Arc<dyn Tool>> {
    let snapshot = mode.captures_snapshot();
    let mut tools: Vec<Arc<dyn Tool>> = vec![
        navigate(snapshot),
        go_back(snapshot),
        go_forward(snapshot),
        Arc::new(WaitTool),
        press_key(snapshot),
        Arc::new(SaveAsPdfTool),
        Arc::new(CloseTool),
        choose_file(snapshot),
        Arc::new(InstallTool),
        Arc::new(TabListTool),
        tab_new(snapshot),
        tab_select(snapshot),
        Arc::new(TabCloseTool),
    ];
    if snapshot {
        tools.push(Arc::new(SnapshotTool));
    }
    tools
}

fn definition<T: JsonSchema>(name: &str, description: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        description: description.into(),
        input_schema: input_schema::<T>(),
    }
}

// ============================================================================
// Navigation
// ============================================================================

/// `browser_navigate`, optionally attaching a snapshot.
pub fn navigate(capture_snapshot: bool) -> Arc<dyn Tool> {
    Arc::new(NavigateTool { capture_snapshot })
}

/// Tool for loading a URL in the current tab.
pub struct NavigateTool {
    capture_snapshot: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct NavigateArgs {
    /// The URL to navigate to
    url: String,
}

impl Validate for NavigateArgs {
    fn validate(&self) -> Vec<FieldError> {
        check_url("url", &self.url).into_iter().collect()
    }
}

#[async_trait::async_trait]
impl Tool for NavigateTool {
    fn definition(&self) -> ToolDefinition {
        definition::<NavigateArgs>("browser_navigate", "Navigate to a URL")
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: NavigateArgs = parse_params(arguments)?;
        let tab = context.browser.ensure_tab().await?;
        tracing::info!(tab = %tab.id(), url = %args.url, "navigating");

        let options = RunOptions::new(format!("Navigated to {}", args.url))
            .capture_snapshot(self.capture_snapshot);
        let url = args.url;
        let outcome = context
            .runner
            .run(tab, |tab: Tab| async move { tab.navigate(&url).await }, options)
            .await?;
        Ok(ToolCallResult::text(outcome.to_text()))
    }
}

/// `browser_go_back`, optionally attaching a snapshot.
pub fn go_back(capture_snapshot: bool) -> Arc<dyn Tool> {
    Arc::new(HistoryTool {
        direction: HistoryDirection::Back,
        capture_snapshot,
    })
}

/// `browser_go_forward`, optionally attaching a snapshot.
pub fn go_forward(capture_snapshot: bool) -> Arc<dyn Tool> {
    Arc::new(HistoryTool {
        direction: HistoryDirection::Forward,
        capture_snapshot,
    })
}

#[derive(Debug, Clone, Copy)]
enum HistoryDirection {
    Back,
    Forward,
}

/// Tool for moving through session history.
pub struct HistoryTool {
    direction: HistoryDirection,
    capture_snapshot: bool,
}

#[async_trait::async_trait]
impl Tool for HistoryTool {
    fn definition(&self) -> ToolDefinition {
        match self.direction {
            HistoryDirection::Back => {
                definition::<NoParams>("browser_go_back", "Go back to the previous page")
            }
            HistoryDirection::Forward => {
                definition::<NoParams>("browser_go_forward", "Go forward to the next page")
            }
        }
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let _: NoParams = parse_params(arguments)?;
        let tab = context.browser.current_tab().await?;
        let direction = self.direction;
        let status = match direction {
            HistoryDirection::Back => "Navigated back",
            HistoryDirection::Forward => "Navigated forward",
        };

        let outcome = context
            .runner
            .run_and_wait(
                tab,
                |tab: Tab| async move {
                    match direction {
                        HistoryDirection::Back => tab.go_back().await,
                        HistoryDirection::Forward => tab.go_forward().await,
                    }
                },
                RunOptions::new(status).capture_snapshot(self.capture_snapshot),
            )
            .await?;
        Ok(ToolCallResult::text(outcome.to_text()))
    }
}

// ============================================================================
// Timing and input
// ============================================================================

/// Tool for pausing between actions.
pub struct WaitTool;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct WaitArgs {
    /// The time to wait in seconds
    #[schemars(range(min = 0))]
    time: f64,
}

impl Validate for WaitArgs {
    fn validate(&self) -> Vec<FieldError> {
        if self.time.is_finite() && self.time >= 0.0 {
            Vec::new()
        } else {
            vec![FieldError::new("time", "must be a non-negative number of seconds")]
        }
    }
}

/// Seconds actually waited for a requested `time`.
pub fn clamp_wait(time: f64) -> f64 {
    time.clamp(0.0, MAX_WAIT_SECS)
}

#[async_trait::async_trait]
impl Tool for WaitTool {
    fn definition(&self) -> ToolDefinition {
        definition::<WaitArgs>(
            "browser_wait",
            "Wait for a specified time in seconds (at most 10)",
        )
    }

    async fn execute(&self, arguments: Value, _context: &ToolContext) -> Result<ToolCallResult> {
        let args: WaitArgs = parse_params(arguments)?;
        let seconds = clamp_wait(args.time);
        if seconds < args.time {
            tracing::debug!(requested = args.time, seconds, "wait clamped");
        }
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        Ok(ToolCallResult::text(format!("Waited for {} seconds", seconds)))
    }
}

/// `browser_press_key`, optionally attaching a snapshot.
pub fn press_key(capture_snapshot: bool) -> Arc<dyn Tool> {
    Arc::new(PressKeyTool { capture_snapshot })
}

/// Tool for sending a key press to the focused element.
pub struct PressKeyTool {
    capture_snapshot: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct PressKeyArgs {
    /// Name of the key to press or a character to generate, such as `ArrowLeft` or `a`
    key: String,
}

impl Validate for PressKeyArgs {
    fn validate(&self) -> Vec<FieldError> {
        if self.key.is_empty() {
            vec![FieldError::new("key", "must not be empty")]
        } else {
            Vec::new()
        }
    }
}

#[async_trait::async_trait]
impl Tool for PressKeyTool {
    fn definition(&self) -> ToolDefinition {
        definition::<PressKeyArgs>("browser_press_key", "Press a key on the keyboard")
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: PressKeyArgs = parse_params(arguments)?;
        let tab = context.browser.current_tab().await?;

        let options = RunOptions::new(format!("Pressed key {}", args.key))
            .capture_snapshot(self.capture_snapshot);
        let key = args.key;
        let outcome = context
            .runner
            .run_and_wait(tab, |tab: Tab| async move { tab.press_key(&key).await }, options)
            .await?;
        Ok(ToolCallResult::text(outcome.to_text()))
    }
}

// ============================================================================
// Output
// ============================================================================

/// Tool for exporting the whole page as a single-page PDF.
pub struct SaveAsPdfTool;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
struct SaveAsPdfArgs {
    /// Page width in pixels (default 1400)
    #[schemars(range(min = 1))]
    width: Option<u32>,
    /// File name to save the PDF as (default `page-<timestamp>.pdf`)
    file_name: Option<String>,
}

impl Validate for SaveAsPdfArgs {
    fn validate(&self) -> Vec<FieldError> {
        let mut problems = Vec::new();
        if self.width == Some(0) {
            problems.push(FieldError::new("width", "must be at least 1"));
        }
        if matches!(&self.file_name, Some(name) if name.trim().is_empty()) {
            problems.push(FieldError::new("fileName", "must not be empty"));
        }
        problems
    }
}

/// `page-<UTC timestamp>.pdf`, safe on every platform.
pub fn default_pdf_file_name() -> String {
    format!(
        "page-{}.pdf",
        chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ")
    )
}

/// Make `name` a plain file name: no separators, traversal or reserved characters.
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    let mut cleaned = replaced;
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", "-");
    }
    let mut cleaned = cleaned
        .trim_start_matches(['.', ' ', '-'])
        .trim_end_matches(['.', ' '])
        .to_string();
    if cleaned.is_empty() {
        return default_pdf_file_name();
    }
    if !cleaned.to_ascii_lowercase().ends_with(".pdf") {
        cleaned.push_str(".pdf");
    }
    cleaned
}

#[async_trait::async_trait]
impl Tool for SaveAsPdfTool {
    fn definition(&self) -> ToolDefinition {
        definition::<SaveAsPdfArgs>(
            "browser_save_as_pdf",
            "Save the whole page as a single-page PDF",
        )
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: SaveAsPdfArgs = parse_params(arguments)?;
        let tab = context.browser.current_tab().await?;

        let width = args.width.unwrap_or(DEFAULT_PDF_WIDTH);
        let file_name = args
            .file_name
            .as_deref()
            .map(sanitize_file_name)
            .unwrap_or_else(default_pdf_file_name);
        let output_dir = context.browser.options().output_dir.clone();
        tokio::fs::create_dir_all(&output_dir).await?;
        let path = output_dir.join(file_name);

        let status = format!("Saved as {}", path.display());
        let outcome = context
            .runner
            .run(
                tab,
                |tab: Tab| async move {
                    tab.set_viewport_width(width).await?;
                    let height_px = tab.scroll_height().await?;
                    tracing::debug!(width, height_px, path = %path.display(), "exporting pdf");
                    tab.save_pdf(PdfPageSize { width_px: width, height_px }, &path)
                        .await
                },
                RunOptions::new(status),
            )
            .await?;
        Ok(ToolCallResult::text(outcome.to_text()))
    }
}

/// Tool for capturing the current page's accessibility snapshot.
pub struct SnapshotTool;

#[async_trait::async_trait]
impl Tool for SnapshotTool {
    fn definition(&self) -> ToolDefinition {
        definition::<NoParams>(
            "browser_snapshot",
            "Capture accessibility snapshot of the current page",
        )
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let _: NoParams = parse_params(arguments)?;
        let tab = context.browser.current_tab().await?;
        let snapshot = tab.snapshot().await?;
        Ok(ToolCallResult::text(snapshot.to_markdown()))
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

/// Tool for closing the browser.
pub struct CloseTool;

#[async_trait::async_trait]
impl Tool for CloseTool {
    fn definition(&self) -> ToolDefinition {
        definition::<NoParams>("browser_close", "Close the page")
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let _: NoParams = parse_params(arguments)?;
        context.browser.close().await?;
        Ok(ToolCallResult::text("Page closed"))
    }
}

/// `browser_choose_file`, optionally attaching a snapshot.
pub fn choose_file(capture_snapshot: bool) -> Arc<dyn Tool> {
    Arc::new(ChooseFileTool { capture_snapshot })
}

/// Tool for answering a pending file chooser.
pub struct ChooseFileTool {
    capture_snapshot: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ChooseFileArgs {
    /// The absolute paths to the files to upload. Can be a single file or multiple files.
    paths: Vec<String>,
}

impl Validate for ChooseFileArgs {
    fn validate(&self) -> Vec<FieldError> {
        if self.paths.is_empty() {
            return vec![FieldError::new("paths", "must contain at least one path")];
        }
        self.paths
            .iter()
            .enumerate()
            .filter(|(_, p)| !std::path::Path::new(p).is_absolute())
            .map(|(i, _)| FieldError::new(format!("paths.{}", i), "must be an absolute path"))
            .collect()
    }
}

#[async_trait::async_trait]
impl Tool for ChooseFileTool {
    fn definition(&self) -> ToolDefinition {
        definition::<ChooseFileArgs>("browser_choose_file", "Choose one or multiple files to upload")
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: ChooseFileArgs = parse_params(arguments)?;
        let tab = context.browser.current_tab().await?;

        let options = RunOptions::new(format!("Chose files {}", args.paths.join(", ")))
            .capture_snapshot(self.capture_snapshot)
            .keep_file_chooser();
        let paths: Vec<PathBuf> = args.paths.into_iter().map(PathBuf::from).collect();
        let outcome = context
            .runner
            .run_and_wait(tab, |tab: Tab| async move { tab.choose_files(&paths).await }, options)
            .await?;
        Ok(ToolCallResult::text(outcome.to_text()))
    }
}

/// Tool for installing the configured browser.
pub struct InstallTool;

#[async_trait::async_trait]
impl Tool for InstallTool {
    fn definition(&self) -> ToolDefinition {
        definition::<NoParams>(
            "browser_install",
            "Install the browser specified in the config. Call this if you get an error about the browser not being installed.",
        )
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let _: NoParams = parse_params(arguments)?;
        let channel = context.browser.install().await?;
        Ok(ToolCallResult::text(format!("Browser {} installed", channel)))
    }
}

// ============================================================================
// Tabs
// ============================================================================

/// Tool for listing open tabs.
pub struct TabListTool;

#[async_trait::async_trait]
impl Tool for TabListTool {
    fn definition(&self) -> ToolDefinition {
        definition::<NoParams>("browser_tab_list", "List browser tabs")
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let _: NoParams = parse_params(arguments)?;
        let tabs = context.browser.list_tabs().await;
        if tabs.is_empty() {
            return Ok(ToolCallResult::text("### Open tabs\nNo open tabs."));
        }

        let lines = tabs
            .iter()
            .map(|t| {
                let marker = if t.current { " (current)" } else { "" };
                format!("- {}:{} [{}] ({})", t.index, marker, t.title, t.url)
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolCallResult::text(format!("### Open tabs\n{}", lines)))
    }
}

/// `browser_tab_new`, optionally attaching a snapshot.
pub fn tab_new(capture_snapshot: bool) -> Arc<dyn Tool> {
    Arc::new(TabNewTool { capture_snapshot })
}

/// Tool for opening a tab and making it current.
pub struct TabNewTool {
    capture_snapshot: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct TabNewArgs {
    /// The URL to navigate to in the new tab. If not provided, the new tab will be blank.
    url: Option<String>,
}

impl Validate for TabNewArgs {
    fn validate(&self) -> Vec<FieldError> {
        self.url
            .as_deref()
            .and_then(|url| check_url("url", url))
            .into_iter()
            .collect()
    }
}

#[async_trait::async_trait]
impl Tool for TabNewTool {
    fn definition(&self) -> ToolDefinition {
        definition::<TabNewArgs>("browser_tab_new", "Open a new tab")
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: TabNewArgs = parse_params(arguments)?;
        let tab = context.browser.new_tab().await?;
        let Some(url) = args.url else {
            return Ok(ToolCallResult::text("Opened new tab"));
        };

        let options = RunOptions::new(format!("Opened new tab and navigated to {}", url))
            .capture_snapshot(self.capture_snapshot);
        let outcome = context
            .runner
            .run(tab, |tab: Tab| async move { tab.navigate(&url).await }, options)
            .await?;
        Ok(ToolCallResult::text(outcome.to_text()))
    }
}

/// `browser_tab_select`, optionally attaching a snapshot.
pub fn tab_select(capture_snapshot: bool) -> Arc<dyn Tool> {
    Arc::new(TabSelectTool { capture_snapshot })
}

/// Tool for switching the current tab.
pub struct TabSelectTool {
    capture_snapshot: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct TabSelectArgs {
    /// The index of the tab to select
    index: usize,
}

impl Validate for TabSelectArgs {}

#[async_trait::async_trait]
impl Tool for TabSelectTool {
    fn definition(&self) -> ToolDefinition {
        definition::<TabSelectArgs>("browser_tab_select", "Select a tab by index")
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: TabSelectArgs = parse_params(arguments)?;
        let tab = context.browser.select_tab(args.index).await?;
        let options = RunOptions::new(format!("Selected tab {}", args.index))
            .capture_snapshot(self.capture_snapshot);
        let outcome = context
            .runner
            .run(tab, |_: Tab| async { Ok::<(), Error>(()) }, options)
            .await?;
        Ok(ToolCallResult::text(outcome.to_text()))
    }
}

/// Tool for closing one tab.
pub struct TabCloseTool;

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct TabCloseArgs {
    /// The index of the tab to close. Closes the current tab if not provided.
    index: Option<usize>,
}

impl Validate for TabCloseArgs {}

#[async_trait::async_trait]
impl Tool for TabCloseTool {
    fn definition(&self) -> ToolDefinition {
        definition::<TabCloseArgs>("browser_tab_close", "Close a tab")
    }

    async fn execute(&self, arguments: Value, context: &ToolContext) -> Result<ToolCallResult> {
        let args: TabCloseArgs = parse_params(arguments)?;
        let text = if context.browser.close_tab(args.index).await? {
            "Closed tab"
        } else {
            "No open tabs"
        };
        Ok(ToolCallResult::text(text))
    }
}
