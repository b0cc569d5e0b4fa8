// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Error types for the DataLink engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaliError {
    /// The byte stream can no longer be interpreted; the connection must be closed.
    #[error("framing error ({context}): {reason}")]
    Framing { context: String, reason: String },

    /// Read or write failure other than an orderly shutdown by the peer.
    #[error("transport error ({context}): {source}")]
    Transport {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The peer closed the connection.
    #[error("connection closed by peer ({context})")]
    ConnectionClosed { context: String },

    /// The server sent something the protocol does not allow at this point.
    ///
    /// `stream_lost` is set when the offending unit could not be consumed, so
    /// the byte stream is out of step and the connection must be closed.
    #[error("protocol error ({command}): {reason}")]
    Protocol {
        command: String,
        reason: String,
        stream_lost: bool,
    },

    /// The server answered a command with an ERROR reply.
    #[error("server rejected {command} (value {value}): {}", .message.as_deref().unwrap_or("no message"))]
    ErrorReply {
        command: String,
        value: i64,
        message: Option<String>,
    },

    /// Caller error caught before any I/O; the connection remains usable.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No socket is open.
    #[error("not connected")]
    NotConnected,

    /// State or pattern file problems.
    #[error("{path}: {reason}")]
    File { path: String, reason: String },
}

impl DaliError {
    pub(crate) fn framing(context: impl Into<String>, reason: impl Into<String>) -> Self {
        DaliError::Framing { context: context.into(), reason: reason.into() }
    }

    pub(crate) fn protocol(command: impl Into<String>, reason: impl Into<String>) -> Self {
        DaliError::Protocol { command: command.into(), reason: reason.into(), stream_lost: false }
    }

    pub(crate) fn protocol_stream_lost(command: impl Into<String>, reason: impl Into<String>) -> Self {
        DaliError::Protocol { command: command.into(), reason: reason.into(), stream_lost: true }
    }

    pub(crate) fn transport(context: impl Into<String>, source: std::io::Error) -> Self {
        DaliError::Transport { context: context.into(), source }
    }

    pub(crate) fn closed(context: impl Into<String>) -> Self {
        DaliError::ConnectionClosed { context: context.into() }
    }

    /// Whether the connection is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DaliError::Framing { .. }
                | DaliError::Transport { .. }
                | DaliError::ConnectionClosed { .. }
                | DaliError::Protocol { stream_lost: true, .. }
        )
    }
}

impl From<std::io::Error> for DaliError {
    fn from(err: std::io::Error) -> Self {
        DaliError::Transport { context: "I/O".to_string(), source: err }
    }
}

pub type Result<T> = std::result::Result<T, DaliError>;
