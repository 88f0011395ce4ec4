use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC 2.0 request id. Decoding attempts the integer form first, then
/// the string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i32),
    String(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "{}", s),
        }
    }
}

/// Error member of a JSON-RPC error response. Provider errors travel through
/// this type verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("jsonrpc2 error code {code}: {message}")]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Could not decode JSON object.")
    }

    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid request.")
    }

    pub fn method_not_found() -> Self {
        Self::new(METHOD_NOT_FOUND, "The method does not exist on the server.")
    }

    pub fn invalid_params() -> Self {
        Self::new(INVALID_PARAMS, "Invalid parameters.")
    }

    pub fn internal_error() -> Self {
        Self::new(INTERNAL_ERROR, "Internal error.")
    }
}

/// An incoming frame, classified by which fields are present.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Request {
        id: Id,
        method: String,
        params: Option<Value>,
    },
    Notification {
        method: String,
        params: Option<Value>,
    },
    Response {
        id: Id,
        result: Value,
    },
    Error {
        id: Option<Id>,
        error: ErrorObject,
    },
}

/// Classifies a raw frame. The rules, applied in order:
///
/// 1. `error` present -> error response (`id` may be null or absent);
/// 2. `result` and `id` present -> success response;
/// 3. `method` and `id` present -> request;
/// 4. `method` without `id` -> notification;
/// 5. anything else, or undecodable JSON -> a ParseError object carrying the
///    raw frame as its `data`, returned as `Err`.
pub fn classify(frame: &[u8]) -> Result<WireMessage, ErrorObject> {
    let value: Value = serde_json::from_slice(frame).map_err(|_| parse_error_for(frame))?;
    let obj = value.as_object().ok_or_else(|| parse_error_for(frame))?;

    let id = match obj.get("id") {
        None | Some(Value::Null) => None,
        Some(v) => Some(
            serde_json::from_value::<Id>(v.clone()).map_err(|_| parse_error_for(frame))?,
        ),
    };

    if let Some(err_val) = obj.get("error") {
        let error: ErrorObject =
            serde_json::from_value(err_val.clone()).map_err(|_| parse_error_for(frame))?;
        return Ok(WireMessage::Error { id, error });
    }

    if let Some(result) = obj.get("result") {
        return match id {
            Some(id) => Ok(WireMessage::Response {
                id,
                result: result.clone(),
            }),
            // A result without correlation is not a legal frame.
            None => Err(parse_error_for(frame)),
        };
    }

    if let Some(method) = obj.get("method").and_then(Value::as_str) {
        let params = match obj.get("params") {
            None | Some(Value::Null) => None,
            Some(p) => Some(p.clone()),
        };
        return Ok(match id {
            Some(id) => WireMessage::Request {
                id,
                method: method.to_string(),
                params,
            },
            None => WireMessage::Notification {
                method: method.to_string(),
                params,
            },
        });
    }

    Err(parse_error_for(frame))
}

fn parse_error_for(frame: &[u8]) -> ErrorObject {
    ErrorObject::parse_error().with_data(Value::String(String::from_utf8_lossy(frame).into_owned()))
}

#[derive(Serialize)]
struct RequestFrame<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a Id>,
}

#[derive(Serialize)]
struct ResponseFrame<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorObject>,
    // The id is always serialized; null stands for "correlation unknown".
    id: Option<&'a Id>,
}

pub(crate) fn request_frame(
    id: Option<&Id>,
    method: &str,
    params: Option<&Value>,
) -> crate::Result<Vec<u8>> {
    Ok(serde_json::to_vec(&RequestFrame {
        jsonrpc: JSONRPC_VERSION,
        method,
        params,
        id,
    })?)
}

pub(crate) fn response_frame(id: Option<&Id>, result: &Value) -> crate::Result<Vec<u8>> {
    Ok(serde_json::to_vec(&ResponseFrame {
        jsonrpc: JSONRPC_VERSION,
        result: Some(result),
        error: None,
        id,
    })?)
}

pub(crate) fn error_frame(id: Option<&Id>, error: &ErrorObject) -> crate::Result<Vec<u8>> {
    Ok(serde_json::to_vec(&ResponseFrame {
        jsonrpc: JSONRPC_VERSION,
        result: None,
        error: Some(error),
        id,
    })?)
}
