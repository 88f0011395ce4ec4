use thiserror::Error;

use crate::rpc::message::ErrorObject;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The underlying byte stream is exhausted.
    #[error("end of stream")]
    Eof,

    /// A frame payload contained a newline and cannot be line-framed.
    #[error("invalid content: frame contains a newline")]
    InvalidContent,

    /// The peer or the individual call was cancelled before a response
    /// arrived.
    #[error("RPC error: context canceled")]
    ContextCancelled,

    /// The remote peer answered with a JSON-RPC error response.
    #[error(transparent)]
    Rpc(#[from] ErrorObject),

    /// The remote peer did not advertise the capability this method belongs
    /// to. Raised locally, before any frame is sent.
    #[error("method not supported by remote peer: {0}")]
    MethodNotSupported(String),

    /// An incoming request arrived but no handler was configured.
    #[error("no handler provided for incoming request: {0}")]
    NoHandler(String),

    #[error("request timed out: {0}")]
    Timeout(String),
}

impl Error {
    pub fn error_code(&self) -> i32 {
        match self {
            Error::Rpc(obj) => obj.code,
            Error::MethodNotSupported(_) | Error::NoHandler(_) => -32601,
            Error::InvalidContent => -32600,
            Error::Json(_) => -32700,
            Error::Io(_) | Error::Eof | Error::ContextCancelled | Error::Timeout(_) => -32603,
        }
    }

    /// True when the error came from a cancelled call or peer shutdown rather
    /// than a remote response.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::ContextCancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_display_carries_code_and_message() {
        let err = Error::Rpc(ErrorObject::new(-32603, "Internal error"));
        let text = err.to_string();
        assert!(text.contains("-32603"));
        assert!(text.contains("Internal error"));
        assert_eq!(err.error_code(), -32603);
    }

    #[test]
    fn test_cancelled_display() {
        let err = Error::ContextCancelled;
        assert_eq!(err.to_string(), "RPC error: context canceled");
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_method_not_supported_maps_to_method_not_found() {
        let err = Error::MethodNotSupported("tools/list".to_string());
        assert_eq!(err.error_code(), -32601);
        assert!(err.to_string().contains("tools/list"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io_err.into();
        assert_eq!(err.error_code(), -32603);
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert_eq!(err.error_code(), -32700);
    }
}
