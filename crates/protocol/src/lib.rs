//! # TermGate Protocol Library
//!
//! This crate provides the wire protocol definitions for TermGate, a relay
//! between browser terminal clients and SSH shell sessions.
//!
//! ## Overview
//!
//! The protocol crate is the shared vocabulary of the relay:
//!
//! - **Client Messages**: connect, input, resize, disconnect
//! - **Server Events**: connected, output, error, ended
//!
//! Messages travel as JSON text frames over a WebSocket, tagged as
//! `{"type": "...", "data": ...}` so that browser clients can dispatch on the
//! `type` field directly.
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{ClientMessage, ConnectRequest, ServerMessage, SessionKind};
//!
//! // A client asks for a shell on a container's SSH port
//! let request = ClientMessage::Connect(ConnectRequest {
//!     kind: SessionKind::Container,
//!     port: Some(2222),
//!     ..Default::default()
//! });
//! let frame = request.to_json().unwrap();
//!
//! // The relay answers with events
//! let event = ServerMessage::output("$ ");
//! assert!(event.to_json().unwrap().contains("output"));
//! # let _ = frame;
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Client and server message definitions
//! - [`error`]: Error types

pub mod error;
pub mod messages;

pub use error::{ProtocolError, Result};
pub use messages::{
    ClientMessage, ConnectRequest, ErrorMessage, InputData, OutputData, ResizeRequest,
    ServerMessage, SessionKind, DEFAULT_COLS, DEFAULT_ROWS,
};
