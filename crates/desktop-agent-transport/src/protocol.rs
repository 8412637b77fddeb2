//! Wire protocol between the agent and the service.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use desktop_agent_core::{Outbound, Registration, ToolOutput, ToolRequest, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Message from agent to service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First frame after the socket opens.
    Register {
        device_name: String,
        platform: String,
        scoped_folders: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        platform_version: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_version: Option<String>,
    },
    /// Keepalive.
    Heartbeat,
    /// Result of a tool request.
    Response {
        request_id: String,
        status: ResponseStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bytes_transferred: Option<u64>,
    },
    /// Scoped folders changed while connected.
    UpdateFolders { scoped_folders: Vec<String> },
}

/// Response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
}

impl ClientMessage {
    /// Registration frame.
    #[must_use]
    pub fn register(registration: &Registration) -> Self {
        let device = &registration.device;
        Self::Register {
            device_name: device.name.clone(),
            platform: device.platform.clone(),
            scoped_folders: registration.scoped_folders.clone(),
            platform_version: device.platform_version.clone(),
            app_version: device.app_version.clone(),
        }
    }

    /// Response frame for a tool result. Binary output is base64-encoded.
    #[must_use]
    pub fn response(request_id: String, result: ToolResult) -> Self {
        match result {
            Ok(output) => {
                let bytes_transferred = output.bytes_transferred();
                let data = match output {
                    ToolOutput::Json { data, .. } => data,
                    ToolOutput::Binary(raw) => json!({
                        "content": BASE64.encode(&raw),
                        "encoding": "base64",
                    }),
                };
                Self::Response {
                    request_id,
                    status: ResponseStatus::Success,
                    data: Some(data),
                    error: None,
                    bytes_transferred,
                }
            }
            Err(e) => Self::Response {
                request_id,
                status: ResponseStatus::Error,
                data: None,
                error: Some(e.to_string()),
                bytes_transferred: None,
            },
        }
    }

    /// Decode base64 content carried by a successful binary response.
    #[must_use]
    pub fn decode_binary(&self) -> Option<Vec<u8>> {
        let Self::Response {
            data: Some(data), ..
        } = self
        else {
            return None;
        };
        if data.get("encoding").and_then(Value::as_str) != Some("base64") {
            return None;
        }
        let content = data.get("content").and_then(Value::as_str)?;
        BASE64.decode(content).ok()
    }
}

impl From<Outbound> for ClientMessage {
    fn from(frame: Outbound) -> Self {
        match frame {
            Outbound::Heartbeat => Self::Heartbeat,
            Outbound::Response { request_id, result } => Self::response(request_id, result),
            Outbound::UpdateFolders(scoped_folders) => Self::UpdateFolders { scoped_folders },
        }
    }
}

/// Message from service to agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration accepted.
    Registered { device_id: String },
    /// Tool call.
    Request {
        request_id: String,
        tool: String,
        #[serde(default)]
        params: Value,
    },
}

impl ServerMessage {
    /// The tool request carried by this message, if any.
    #[must_use]
    pub fn into_request(self) -> Option<ToolRequest> {
        match self {
            Self::Request {
                request_id,
                tool,
                params,
            } => Some(ToolRequest::new(request_id, tool, params)),
            Self::Registered { .. } => None,
        }
    }
}
