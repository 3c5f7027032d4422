//! Pluggable business-message handling.
//!
//! The IO pump hands every decoded envelope to a [`MessageHandler`] and
//! queues whatever it returns back to the sender. Swap the handler to change
//! what the hub does with traffic; the connection plumbing stays the same.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::message::{
    Action, CommandData, Envelope, ErrorData, StatusData, ERROR_UNKNOWN_ACTION,
};
use crate::types::{unix_now, ClientKind};

/// Strategy invoked for every inbound envelope.
///
/// Runs on the connection's read loop, so implementations must not block.
pub trait MessageHandler: Send + Sync {
    /// Return `Some` to reply to the sender, `None` to stay silent.
    fn handle(&self, message: &Envelope, sender_id: &str, sender: ClientKind) -> Option<Envelope>;
}

/// Built-in handler: heartbeat, echo, status and command acknowledgement.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl MessageHandler for DefaultHandler {
    fn handle(&self, message: &Envelope, sender_id: &str, sender: ClientKind) -> Option<Envelope> {
        tracing::debug!(
            action = %message.action,
            sender_id,
            kind = %sender,
            "Handling message",
        );

        let request_id = message.request_id.clone();
        let reply = match &message.action {
            Action::Ping => Envelope::response(
                Action::Pong,
                &json!({
                    "server_time": unix_now(),
                    "sender_id": sender_id,
                }),
                request_id,
            ),
            Action::Echo => Envelope::response(
                Action::Echo,
                &json!({
                    "original_message": message.data.clone().unwrap_or(Value::Null),
                    "echoed_by": "server",
                    "sender_id": sender_id,
                }),
                request_id,
            ),
            Action::Status => {
                let now = unix_now();
                let connection_info = HashMap::from([
                    ("connected_at".to_string(), json!(now)),
                    ("client_id".to_string(), json!(sender_id)),
                ]);
                Envelope::response(
                    Action::Status,
                    &StatusData {
                        online: true,
                        last_active: now,
                        connection_info: Some(connection_info),
                    },
                    request_id,
                )
            }
            Action::Command => {
                let command: CommandData = message.data_as().unwrap_or_default();
                tracing::info!(
                    command = %command.command,
                    args = ?command.args,
                    sender_id,
                    kind = %sender,
                    "Executing command",
                );
                Envelope::response(
                    Action::Command,
                    &json!({
                        "command": command.command,
                        "status": "executed",
                        "result": "command executed",
                    }),
                    request_id,
                )
            }
            other => Envelope::response(
                Action::Error,
                &ErrorData {
                    code: ERROR_UNKNOWN_ACTION,
                    message: "Unknown message action".to_string(),
                    details: Some(other.to_string()),
                },
                request_id,
            ),
        };

        Some(reply)
    }
}
