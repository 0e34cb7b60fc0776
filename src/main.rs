//! tabdriver-mcp - MCP server for browser tab control
//!
//! This binary serves the browser tools over stdio to MCP clients such as
//! GitHub Copilot and Claude Desktop.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tabdriver_mcp::config::default_output_dir;
use tabdriver_mcp::{BrowserOptions, McpServer, ToolMode, Viewport};

/// MCP server for browser tab control.
#[derive(Parser, Debug)]
#[command(name = "tabdriver-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run in stdio mode (standard MCP transport).
    #[arg(long, default_value = "true")]
    stdio: bool,

    /// Browser channel to drive (chrome, chromium, msedge, chrome-beta).
    #[arg(long = "browser", env = "TABDRIVER_BROWSER", default_value = "chrome")]
    channel: String,

    /// Path to the browser executable (overrides channel lookup).
    #[arg(long, env = "TABDRIVER_EXECUTABLE_PATH")]
    executable_path: Option<PathBuf>,

    /// Show browser window (non-headless mode).
    #[arg(long, env = "TABDRIVER_VISIBLE")]
    visible: bool,

    /// Directory for exported PDFs.
    #[arg(long, env = "TABDRIVER_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Register tools that skip the accessibility snapshot.
    #[arg(long, env = "TABDRIVER_NO_SNAPSHOT")]
    no_snapshot: bool,

    /// Upper bound on waiting for the page to settle after an action.
    #[arg(long, env = "TABDRIVER_SETTLE_TIMEOUT_MS", default_value_t = 5000)]
    settle_timeout_ms: u64,

    /// Viewport size for new tabs, as <width>x<height>.
    #[arg(long, env = "TABDRIVER_VIEWPORT", default_value = "1280x720")]
    viewport: Viewport,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Log output file (default: stderr).
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn browser_options(&self) -> BrowserOptions {
        BrowserOptions {
            channel: self.channel.clone(),
            executable_path: self.executable_path.clone(),
            headless: !self.visible,
            viewport: self.viewport,
            output_dir: self.output_dir.clone().unwrap_or_else(default_output_dir),
            settle_timeout: Duration::from_millis(self.settle_timeout_ms),
            tool_mode: if self.no_snapshot {
                ToolMode::NoSnapshot
            } else {
                ToolMode::Snapshot
            },
        }
    }
}

/// Log to stderr or a file; stdout carries the MCP protocol.
fn init_tracing(args: &Args) -> anyhow::Result<()> {
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (stderr_layer, file_layer) = match &args.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file));
            (None, Some(layer))
        }
        None => (Some(fmt::layer().with_writer(std::io::stderr)), None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_tracing(&args) {
        eprintln!("tabdriver-mcp: {:#}", e);
        return ExitCode::FAILURE;
    }

    tracing::info!(
        "Starting {} v{}",
        tabdriver_mcp::server::SERVER_NAME,
        tabdriver_mcp::server::SERVER_VERSION
    );

    let options = args.browser_options();
    tracing::info!(
        channel = %options.channel,
        headless = options.headless,
        output_dir = %options.output_dir.display(),
        mode = ?options.tool_mode,
        "browser options"
    );

    if !args.stdio {
        tracing::error!("Only stdio mode is currently supported");
        return ExitCode::FAILURE;
    }

    let server = McpServer::with_options(options);
    match server.run_stdio().await {
        Ok(()) => {
            tracing::info!("Server exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
