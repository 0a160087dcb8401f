// Error handling module
// Defines error types and tool result conversion

use thiserror::Error;

use crate::models::mcp::ToolResult;

/// Credential lifecycle errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// Never authorized and no out-of-band flow available
    #[error("No credentials available: {0}")]
    NoCredentials(String),

    /// Refresh exchange failed, timed out or was rejected
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Persisted record exists but cannot be read
    #[error("Credential store is corrupt: {0}")]
    StoreCorrupt(String),

    /// Persisting a fresh bundle failed
    #[error("Failed to write credential store: {0}")]
    StoreWriteFailed(String),
}

/// Errors that can occur while executing a tool call
#[derive(Error, Debug)]
pub enum ToolError {
    /// No usable credential
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Error response from a Google API
    #[error("Google API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Tool arguments did not match the input schema
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Tool name not registered
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Remote object cannot be handled (export type, size limit)
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ToolError {
    /// Convert into an error envelope for the caller
    pub fn into_tool_result(self) -> ToolResult {
        if let ToolError::Internal(ref err) = self {
            tracing::error!("Internal error: {:?}", err);
        }
        ToolResult::error(self.to_string())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        ToolError::InvalidArguments(err.to_string())
    }
}

/// Result type alias for tool operations
pub type Result<T> = std::result::Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ToolError::Auth(AuthError::NoCredentials("run `gdrive-mcp auth`".to_string()));
        assert_eq!(
            err.to_string(),
            "Authentication failed: No credentials available: run `gdrive-mcp auth`"
        );

        let err = ToolError::Api {
            status: 404,
            message: "File not found".to_string(),
        };
        assert_eq!(err.to_string(), "Google API error: 404 - File not found");

        let err = ToolError::UnknownTool("gdrive_delete".to_string());
        assert_eq!(err.to_string(), "Unknown tool: gdrive_delete");
    }

    #[test]
    fn test_auth_error_messages() {
        let err = AuthError::RefreshFailed("invalid_grant".to_string());
        assert_eq!(err.to_string(), "Token refresh failed: invalid_grant");

        let err = AuthError::StoreCorrupt("bad json".to_string());
        assert_eq!(err.to_string(), "Credential store is corrupt: bad json");
    }

    #[test]
    fn test_error_envelope() {
        let result = ToolError::InvalidArguments("missing field `query`".to_string())
            .into_tool_result();
        assert!(result.is_error);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["isError"], true);
        assert_eq!(json["content"][0]["type"], "text");
        assert!(json["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("missing field"));
    }

    #[test]
    fn test_internal_error_envelope() {
        let result = ToolError::Internal(anyhow::anyhow!("Something went wrong")).into_tool_result();
        assert!(result.is_error);
    }

    #[test]
    fn test_serde_error_maps_to_invalid_arguments() {
        let err: ToolError = serde_json::from_str::<u32>("\"x\"").unwrap_err().into();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
