// Tool registry and dispatch

pub mod read_file;
pub mod read_sheet;
pub mod search;
pub mod update_cell;

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::error::{AuthError, Result, ToolError};
use crate::http_client::GoogleHttpClient;
use crate::models::mcp::{ToolDefinition, ToolResult};

/// Default cap on bytes read for a single file
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Registered tools
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Search,
    ReadFile,
    UpdateCell,
    ReadSheet,
}

impl Tool {
    pub const ALL: [Tool; 4] = [Tool::Search, Tool::ReadFile, Tool::UpdateCell, Tool::ReadSheet];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            search::NAME => Some(Tool::Search),
            read_file::NAME => Some(Tool::ReadFile),
            update_cell::NAME => Some(Tool::UpdateCell),
            read_sheet::NAME => Some(Tool::ReadSheet),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tool::Search => search::NAME,
            Tool::ReadFile => read_file::NAME,
            Tool::UpdateCell => update_cell::NAME,
            Tool::ReadSheet => read_sheet::NAME,
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        match self {
            Tool::Search => search::definition(),
            Tool::ReadFile => read_file::definition(),
            Tool::UpdateCell => update_cell::definition(),
            Tool::ReadSheet => read_sheet::definition(),
        }
    }
}

/// Routes tool calls to their handlers.
///
/// Every call produces a `ToolResult`; failures become error envelopes
/// rather than protocol errors.
pub struct ToolDispatcher {
    client: Option<Arc<GoogleHttpClient>>,
    max_download_bytes: u64,
}

impl ToolDispatcher {
    pub fn new(client: Arc<GoogleHttpClient>, max_download_bytes: u64) -> Self {
        Self {
            client: Some(client),
            max_download_bytes,
        }
    }

    /// Dispatcher with no API client; every call fails with an auth error
    pub fn unauthenticated() -> Self {
        Self {
            client: None,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
        }
    }

    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        Tool::ALL.iter().map(Tool::definition).collect()
    }

    pub async fn call(&self, name: &str, arguments: Option<Value>) -> ToolResult {
        let started = Instant::now();

        match self.dispatch(name, arguments).await {
            Ok(result) => {
                tracing::info!(
                    tool = name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tool call completed"
                );
                result
            }
            Err(e) => {
                tracing::warn!(
                    tool = name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Tool call failed"
                );
                e.into_tool_result()
            }
        }
    }

    async fn dispatch(&self, name: &str, arguments: Option<Value>) -> Result<ToolResult> {
        let tool = Tool::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let client = self.client.as_ref().ok_or_else(|| {
            ToolError::Auth(AuthError::NoCredentials(
                "Google API client is not initialized".to_string(),
            ))
        })?;

        let arguments = match arguments {
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(value) => value,
        };

        tracing::debug!(tool = tool.name(), "Dispatching tool call");

        match tool {
            Tool::Search => search::handle(client, arguments).await,
            Tool::ReadFile => read_file::handle(client, arguments, self.max_download_bytes).await,
            Tool::UpdateCell => update_cell::handle(client, arguments).await,
            Tool::ReadSheet => read_sheet::handle(client, arguments).await,
        }
    }
}
