//! Wire types for the HTTP API. Responses serialize as pretty-printed JSON
//! with alphabetically ordered keys; clients diff and cache on that exact
//! shape, so struct fields here stay in sorted order.

use serde::Serialize;
use serde_json::Value;

/// Why the serve loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerExitReason {
    /// `POST /restart` was called; the process should exit and be
    /// restarted by its supervisor.
    Restart,
}

/// Body of `GET`/`PUT /status/...` responses.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub revision: u64,
    pub status: Value,
    pub url: String,
}

/// Body of `GET /log` responses. The revision is the count of lines ever
/// logged, which long-polls exactly like a tree revision.
#[derive(Debug, Serialize)]
pub struct LogResponse {
    pub log: Vec<String>,
    pub revision: u64,
}

/// Body of `POST /button/...` responses: the button URLs that were pushed.
#[derive(Debug, Serialize)]
pub struct ButtonResponse {
    pub pushed: Vec<String>,
}

/// Body of `POST /host/...` responses: the action URLs that were
/// dispatched.
#[derive(Debug, Serialize)]
pub struct HostResponse {
    pub dispatched: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn bad_request(message: impl Into<String>) -> ErrorResponse {
        ErrorResponse {
            error: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> ErrorResponse {
        ErrorResponse {
            error: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> ErrorResponse {
        ErrorResponse {
            error: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> ErrorResponse {
        ErrorResponse {
            error: message.into(),
        }
    }
}
