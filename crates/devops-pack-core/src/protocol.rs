//! devops-pack event wire protocol.
//!
//! Every message on the socket is a JSON text frame carrying one named
//! event and an optional payload: `{"event": "...", "data": ...}`.

use serde::{Deserialize, Serialize};

use crate::types::RunParameters;

/// Client -> Server: start a provisioning run.
pub const EVENT_RUN_SCRIPT: &str = "run_script";

/// Server -> Client: one line of run output.
pub const EVENT_OUTPUT: &str = "output";

/// Server -> Client: sent once when the connection is accepted.
pub const EVENT_CONNECT: &str = "connect";

/// Server -> Client: protocol-level problem with a frame the client sent.
pub const EVENT_ERROR: &str = "error";

/// A single named event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Build a `run_script` frame from collected form values.
    pub fn run_script(params: &RunParameters) -> crate::error::Result<Self> {
        Ok(Self::new(EVENT_RUN_SCRIPT, Some(serde_json::to_value(params)?)))
    }

    /// Build an `output` frame carrying one line of text.
    pub fn output(line: impl Into<String>) -> Self {
        Self::new(EVENT_OUTPUT, Some(serde_json::Value::String(line.into())))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            EVENT_ERROR,
            Some(serde_json::json!({ "message": message.into() })),
        )
    }

    pub fn connect(info: &ConnectInfo) -> crate::error::Result<Self> {
        Ok(Self::new(EVENT_CONNECT, Some(serde_json::to_value(info)?)))
    }

    /// The payload as a string, if it is one.
    pub fn data_str(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.as_str())
    }

    pub fn to_text(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_text(text: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Payload of the `connect` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub conn_id: String,
    pub version: String,
}
