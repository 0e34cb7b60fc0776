//! # tabdriver-mcp
//!
//! MCP (Model Context Protocol) server that exposes a fixed catalog of
//! browser-tab actions as schema-validated tools.
//!
//! Every tool shares one execution harness:
//!
//! 1. arguments are validated against the tool's declared shape ([`params`]);
//! 2. a tab is obtained from the [`BrowserContext`], either created on demand
//!    (`ensure_tab`) or strictly required (`current_tab`);
//! 3. the [`ActionRunner`] executes the action, optionally waits for the page
//!    to settle and optionally captures an accessibility snapshot;
//! 4. the outcome becomes a text-content [`protocol::ToolCallResult`].
//!
//! ## Available Tools
//!
//! - `browser_navigate`, `browser_go_back`, `browser_go_forward`
//! - `browser_wait` (capped at 10 seconds), `browser_press_key`
//! - `browser_save_as_pdf`, `browser_choose_file`, `browser_snapshot`
//! - `browser_tab_list`, `browser_tab_new`, `browser_tab_select`, `browser_tab_close`
//! - `browser_close`, `browser_install`
//!
//! ## Usage with VS Code
//!
//! Add to your `.vscode/mcp.json`:
//!
//! ```json
//! {
//!   "servers": {
//!     "tabdriver": {
//!       "command": "tabdriver-mcp",
//!       "args": ["--browser", "chrome"],
//!       "env": {}
//!     }
//!   }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cdp;
pub mod config;
pub mod context;
pub mod error;
pub mod keys;
pub mod params;
pub mod protocol;
pub mod runner;
pub mod server;
pub mod tab;
pub mod tools;

pub use config::{BrowserOptions, ToolMode, Viewport};
pub use context::BrowserContext;
pub use error::{Error, FieldError, Result};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, McpMessage};
pub use runner::{ActionOutcome, ActionRunner, RunOptions};
pub use server::McpServer;
pub use tab::{BrowserEngine, TabHandle};
pub use tools::{Tool, ToolRegistry};
