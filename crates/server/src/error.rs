//! Errors raised by the tool layer before a request reaches the registration.

use rmcp::model::{ErrorCode, ErrorData as McpError};

/// Structured errors for the ks-offline MCP server.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Tool arguments that cannot be turned into a request.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Tool output could not be encoded as JSON.
    #[error("ENCODE_FAILED: {0}")]
    EncodeFailed(String),
}

impl From<ToolError> for McpError {
    fn from(err: ToolError) -> Self {
        let code = match &err {
            ToolError::InvalidInput(_) => -32602,
            ToolError::EncodeFailed(_) => -32603,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_code() {
        let err: McpError = ToolError::InvalidInput("method: BR EW".into()).into();
        assert_eq!(err.code, ErrorCode(-32602));
        assert!(err.message.starts_with("INVALID_INPUT"));
    }
}
