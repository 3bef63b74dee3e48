//! Control surface: start / stop / list-sent as status-coded responses.

use crate::engine::DispatchEngine;
use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use tracing::error;

/// A control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlRequest {
    Start,
    Stop,
    #[serde(alias = "sent")]
    ListSent,
}

impl FromStr for ControlRequest {
    type Err = DispatchError;

    /// Accepts `{"command":"start"}` style JSON or a bare word.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with('{') {
            return serde_json::from_str(s)
                .map_err(|e| DispatchError::InvalidCommand(format!("{}: {}", s, e)));
        }

        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "sent" | "list_sent" => Ok(Self::ListSent),
            _ => Err(DispatchError::InvalidCommand(s.to_string())),
        }
    }
}

/// Response to a control command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: u16,
    pub body: Value,
}

impl ControlResponse {
    fn message(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "message": message }),
        }
    }

    /// Error response with the error's display text.
    pub fn error(status: u16, err: &DispatchError) -> Self {
        Self {
            status,
            body: json!({ "error": err.to_string() }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Run one control command against the engine.
pub async fn handle(engine: &DispatchEngine, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::Start => match engine.start() {
            Ok(()) => ControlResponse::message(200, "Message processing started"),
            Err(e) => ControlResponse::error(400, &e),
        },
        ControlRequest::Stop => {
            engine.stop();
            ControlResponse::message(200, "Message processing stopped")
        }
        ControlRequest::ListSent => match engine.list_sent().await {
            Ok(messages) => match serde_json::to_value(&messages) {
                Ok(body) => ControlResponse { status: 200, body },
                Err(e) => {
                    error!(error = %e, "Failed to encode sent messages");
                    ControlResponse {
                        status: 500,
                        body: json!({ "error": e.to_string() }),
                    }
                }
            },
            Err(e) => {
                error!(error = %e, "Failed to list sent messages");
                ControlResponse::error(500, &e)
            }
        },
    }
}
