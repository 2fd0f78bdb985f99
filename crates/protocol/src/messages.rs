//! Protocol message definitions for TermGate.
//!
//! This module defines the JSON messages exchanged over a WebSocket between a
//! browser terminal client and the relay daemon. Messages are text frames of
//! the form `{"type": "...", "data": ...}`.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default terminal width when the client does not request one.
pub const DEFAULT_COLS: u16 = 80;

/// Default terminal height when the client does not request one.
pub const DEFAULT_ROWS: u16 = 24;

/// Messages sent from a terminal client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open an SSH shell session to the requested target.
    Connect(ConnectRequest),
    /// Raw keystrokes for the active session.
    Input(InputData),
    /// Terminal dimensions changed.
    Resize(ResizeRequest),
    /// Tear down the active session, keeping the socket open.
    Disconnect,
}

/// Messages sent from the relay back to a terminal client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The shell is ready; always precedes any output.
    Connected,
    /// Terminal output in shell read order.
    Output(OutputData),
    /// The session failed; no further events follow.
    Error(ErrorMessage),
    /// The shell stream closed; no further events follow.
    Ended,
}

// ============================================================================
// Connect
// ============================================================================

/// What kind of host the session targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// A container exposing an SSH port; probed for readiness before dialing.
    Container,
    /// An arbitrary VM or remote host.
    Vm,
}

/// Request to open an SSH shell session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectRequest {
    /// Target host kind.
    pub kind: SessionKind,
    /// Hostname or address (default: localhost).
    #[serde(default)]
    pub host: Option<String>,
    /// SSH port on the target. Required.
    #[serde(default)]
    pub port: Option<u16>,
    /// Login username (default from daemon config).
    #[serde(default)]
    pub username: Option<String>,
    /// Login password (default from daemon config).
    #[serde(default)]
    pub password: Option<String>,
    /// PEM-encoded private key; takes precedence over password auth.
    #[serde(default)]
    pub private_key: Option<String>,
    /// Passphrase for the private key.
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Initial terminal columns.
    #[serde(default = "default_cols")]
    pub cols: u16,
    /// Initial terminal rows.
    #[serde(default = "default_rows")]
    pub rows: u16,
}

fn default_cols() -> u16 {
    DEFAULT_COLS
}

fn default_rows() -> u16 {
    DEFAULT_ROWS
}

impl Default for ConnectRequest {
    fn default() -> Self {
        Self {
            kind: SessionKind::Container,
            host: None,
            port: None,
            username: None,
            password: None,
            private_key: None,
            passphrase: None,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        }
    }
}

// ============================================================================
// Input / Resize
// ============================================================================

/// Keystrokes from the client terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputData {
    /// Raw input bytes as UTF-8 text.
    pub data: String,
}

/// New terminal dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeRequest {
    /// New terminal columns.
    pub cols: u16,
    /// New terminal rows.
    pub rows: u16,
}

// ============================================================================
// Server events
// ============================================================================

/// Terminal output from the shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputData {
    /// Output bytes as UTF-8 text (lossy decoded).
    pub data: String,
}

/// A session-fatal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Human-readable description.
    pub message: String,
}

// ============================================================================
// Encoding helpers
// ============================================================================

impl ClientMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ServerMessage {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Build an error event from any displayable error.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorMessage {
            message: message.into(),
        })
    }

    /// Build an output event.
    pub fn output(data: impl Into<String>) -> Self {
        ServerMessage::Output(OutputData { data: data.into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_request_defaults() {
        let req = ConnectRequest::default();
        assert_eq!(req.cols, 80);
        assert_eq!(req.rows, 24);
        assert!(req.port.is_none());
        assert!(req.private_key.is_none());
    }

    #[test]
    fn test_connect_tag_and_dimension_defaults() {
        let json = r#"{"type":"connect","data":{"kind":"container","port":2222}}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        match msg {
            ClientMessage::Connect(req) => {
                assert_eq!(req.kind, SessionKind::Container);
                assert_eq!(req.port, Some(2222));
                assert_eq!(req.cols, 80);
                assert_eq!(req.rows, 24);
                assert!(req.username.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_input_frame() {
        let json = r#"{"type":"input","data":{"data":"ls -la\n"}}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Input(InputData {
                data: "ls -la\n".to_string()
            })
        );
    }

    #[test]
    fn test_resize_frame() {
        let json = r#"{"type":"resize","data":{"cols":120,"rows":40}}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Resize(ResizeRequest {
                cols: 120,
                rows: 40
            })
        );
    }

    #[test]
    fn test_disconnect_has_no_payload() {
        let json = r#"{"type":"disconnect"}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        assert_eq!(msg, ClientMessage::Disconnect);
    }

    #[test]
    fn test_session_kind_tags() {
        let vm: SessionKind = serde_json::from_str(r#""vm""#).unwrap();
        assert_eq!(vm, SessionKind::Vm);
        assert_eq!(
            serde_json::to_string(&SessionKind::Container).unwrap(),
            r#""container""#
        );
    }

    #[test]
    fn test_connected_serializes_without_data() {
        let json = ServerMessage::Connected.to_json().unwrap();
        assert_eq!(json, r#"{"type":"connected"}"#);
    }

    #[test]
    fn test_output_event() {
        let msg = ServerMessage::output("$ ");
        let json = msg.to_json().unwrap();
        assert_eq!(json, r#"{"type":"output","data":{"data":"$ "}}"#);
        assert_eq!(ServerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_error_event() {
        let msg = ServerMessage::error("SSH session closed");
        let json = msg.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","data":{"message":"SSH session closed"}}"#
        );
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        assert!(ClientMessage::from_json("{not json").is_err());
        assert!(ClientMessage::from_json(r#"{"type":"launch"}"#).is_err());
    }

    #[test]
    fn test_extra_connect_fields_are_ignored() {
        // clients may send fields this relay does not know about
        let json = r#"{"type":"connect","data":{"kind":"vm","port":22,"label":"dev"}}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        assert!(matches!(msg, ClientMessage::Connect(_)));
    }
}
