//! The envelope every frame on a hub connection is wrapped in.
//!
//! Wire shape (JSON object, unknown fields ignored):
//!
//! ```text
//! { "action": "echo", "data": {...}, "timestamp": 1700000000,
//!   "request_id": "r-1", "from": "system", "to": "node-7" }
//! ```
//!
//! Only `action` is required on decode. `data` stays an open
//! [`serde_json::Value`] until a handler asks for a concrete shape via
//! [`Envelope::data_as`].

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::unix_now;

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

pub const ERROR_INVALID_MESSAGE: i32 = 1001;
pub const ERROR_UNKNOWN_ACTION: i32 = 1002;
pub const ERROR_PERMISSION_DENIED: i32 = 1003;
pub const ERROR_INTERNAL: i32 = 1004;
pub const ERROR_RATE_LIMITED: i32 = 1005;

/// Close code carried by `disconnected` notices for an orderly shutdown.
pub const DISCONNECT_NORMAL: i32 = 1000;

/// Value of `from` on messages the hub itself originates.
pub const SYSTEM_SENDER: &str = "system";

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// Message action tag.
///
/// The known vocabulary gets its own variants; anything else survives a
/// decode/encode cycle untouched as [`Action::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Connected,
    Disconnected,
    Ping,
    Pong,
    Error,
    Echo,
    Broadcast,
    Private,
    Notification,
    Command,
    Status,
    Subscribe,
    Unsubscribe,
    Custom(String),
}

impl Action {
    pub fn as_str(&self) -> &str {
        match self {
            Action::Connected => "connected",
            Action::Disconnected => "disconnected",
            Action::Ping => "ping",
            Action::Pong => "pong",
            Action::Error => "error",
            Action::Echo => "echo",
            Action::Broadcast => "broadcast",
            Action::Private => "private",
            Action::Notification => "notification",
            Action::Command => "command",
            Action::Status => "status",
            Action::Subscribe => "subscribe",
            Action::Unsubscribe => "unsubscribe",
            Action::Custom(other) => other,
        }
    }
}

impl From<String> for Action {
    fn from(value: String) -> Self {
        match value.as_str() {
            "connected" => Action::Connected,
            "disconnected" => Action::Disconnected,
            "ping" => Action::Ping,
            "pong" => Action::Pong,
            "error" => Action::Error,
            "echo" => Action::Echo,
            "broadcast" => Action::Broadcast,
            "private" => Action::Private,
            "notification" => Action::Notification,
            "command" => Action::Command,
            "status" => Action::Status,
            "subscribe" => Action::Subscribe,
            "unsubscribe" => Action::Unsubscribe,
            _ => Action::Custom(value),
        }
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        match action {
            Action::Custom(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Seconds since the epoch. Stamped by the server on every envelope it
    /// constructs; defaults to `0` when an inbound message omits it.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl Envelope {
    /// Build an outbound envelope stamped with the current time.
    pub fn new(action: Action, data: Option<Value>) -> Self {
        Self {
            action,
            data,
            timestamp: unix_now(),
            request_id: None,
            from: None,
            to: None,
        }
    }

    /// Build an outbound envelope from any serializable payload.
    pub fn with_data<T: Serialize>(action: Action, data: &T) -> Self {
        Self::new(action, to_payload(data))
    }

    /// Build a reply that echoes the caller's `request_id`.
    pub fn response<T: Serialize>(action: Action, data: &T, request_id: Option<String>) -> Self {
        Self {
            request_id,
            ..Self::with_data(action, data)
        }
    }

    /// Build a hub-originated message (`from = "system"`).
    pub fn system<T: Serialize>(action: Action, data: &T) -> Self {
        Self {
            from: Some(SYSTEM_SENDER.to_string()),
            ..Self::with_data(action, data)
        }
    }

    /// `disconnected` notice sent to a client the hub is about to drop.
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::system(
            Action::Disconnected,
            &DisconnectedData {
                reason: reason.into(),
                code: DISCONNECT_NORMAL,
            },
        )
    }

    /// `error` notice from the hub.
    pub fn error(code: i32, message: impl Into<String>, details: Option<String>) -> Self {
        Self::system(
            Action::Error,
            &ErrorData {
                code,
                message: message.into(),
                details,
            },
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a raw frame payload (text or binary) into an envelope.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Decode `data` into a concrete shape, if present and compatible.
    pub fn data_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.data
            .as_ref()
            .and_then(|value| T::deserialize(value).ok())
    }
}

fn to_payload<T: Serialize>(data: &T) -> Option<Value> {
    match serde_json::to_value(data) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize envelope payload");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

/// Payload of the `connected` greeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub session_id: String,
    pub server_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectedData {
    pub reason: String,
    pub code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandData {
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusData {
    pub online: bool,
    pub last_active: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_info: Option<HashMap<String, Value>>,
}
