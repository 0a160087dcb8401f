// MCP server
// Newline-delimited JSON-RPC 2.0 over an async reader/writer pair

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::models::mcp::{
    JsonRpcRequest, JsonRpcResponse, ToolCallParams, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::tools::ToolDispatcher;

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "gdrive-mcp";

type MethodResult = std::result::Result<Value, (i64, String)>;

pub struct McpServer {
    dispatcher: Arc<ToolDispatcher>,
}

impl McpServer {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Serve requests until the reader reaches EOF
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();

        while let Some(line) = lines.next_line().await.context("Failed to read request")? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(response) = self.handle_line(line).await {
                let mut out =
                    serde_json::to_string(&response).context("Failed to serialize response")?;
                out.push('\n');
                writer
                    .write_all(out.as_bytes())
                    .await
                    .context("Failed to write response")?;
                writer.flush().await.context("Failed to flush response")?;
            }
        }

        tracing::info!("Input closed, stopping MCP server");
        Ok(())
    }

    /// Handle one raw line; `None` when no response is due
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable JSON-RPC message");
                Some(JsonRpcResponse::failure(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ))
            }
        }
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        tracing::debug!(method = %request.method, id = ?request.id, "JSON-RPC request");

        let result = if request
            .jsonrpc
            .as_deref()
            .is_some_and(|v| v != JSONRPC_VERSION)
            || request.method.is_empty()
        {
            Err((INVALID_REQUEST, "Invalid request".to_string()))
        } else {
            self.dispatch(&request.method, request.params).await
        };

        // Notifications never get a response
        let id = request.id?;

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err((code, message)) => JsonRpcResponse::failure(id, code, message),
        })
    }

    async fn dispatch(&self, method: &str, params: Value) -> MethodResult {
        match method {
            "initialize" => Ok(initialize_result()),
            "notifications/initialized" => {
                tracing::info!("Client initialized");
                Ok(Value::Null)
            }
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.dispatcher.list_tools() })),
            "tools/call" => self.call_tool(params).await,
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {}", other))),
        }
    }

    async fn call_tool(&self, params: Value) -> MethodResult {
        let params: ToolCallParams = serde_json::from_value(params)
            .map_err(|e| (INVALID_PARAMS, format!("Invalid params: {}", e)))?;

        let result = self.dispatcher.call(&params.name, params.arguments).await;

        serde_json::to_value(result).map_err(|e| {
            tracing::error!(error = %e, "Failed to serialize tool result");
            (INTERNAL_ERROR, format!("Failed to serialize tool result: {}", e))
        })
    }
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> McpServer {
        McpServer::new(Arc::new(ToolDispatcher::unauthenticated()))
    }

    async fn roundtrip(input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        server().run(input.as_bytes(), &mut output).await.unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_initialize() {
        let responses =
            roundtrip(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["result"]["serverInfo"]["name"], "gdrive-mcp");
        assert_eq!(responses[0]["result"]["protocolVersion"], PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_notification_has_no_response() {
        let responses = roundtrip(
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n\
             {\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n",
        )
        .await;

        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 2);
        assert_eq!(responses[0]["result"], json!({}));
    }

    #[tokio::test]
    async fn test_parse_error() {
        let responses = roundtrip("not json\n").await;
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[0]["error"]["code"], PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let responses =
            roundtrip(r#"{"jsonrpc":"2.0","id":"a","method":"resources/list"}"#).await;
        assert_eq!(responses[0]["id"], "a");
        assert_eq!(responses[0]["error"]["code"], METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wrong_version_is_invalid_request() {
        let responses = roundtrip(r#"{"jsonrpc":"1.0","id":3,"method":"ping"}"#).await;
        assert_eq!(responses[0]["error"]["code"], INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_tools_list() {
        let responses = roundtrip(r#"{"jsonrpc":"2.0","id":4,"method":"tools/list"}"#).await;
        let tools = responses[0]["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 4);
        assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));
    }

    #[tokio::test]
    async fn test_tools_call_without_client_is_error_envelope() {
        let responses = roundtrip(
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"gdrive_search","arguments":{"query":"x"}}}"#,
        )
        .await;

        let result = &responses[0]["result"];
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("No credentials available"));
    }

    #[tokio::test]
    async fn test_tools_call_missing_name() {
        let responses =
            roundtrip(r#"{"jsonrpc":"2.0","id":6,"method":"tools/call","params":{}}"#).await;
        assert_eq!(responses[0]["error"]["code"], INVALID_PARAMS);
    }
}
