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

use crate::error::{DaliError, Result};
use crate::protocol::{REPLY_ERROR, REPLY_OK};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    Ok,
    Error,
}

/// A server reply: `<OK|ERROR> <value> <size>` plus `size` bytes of message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: ReplyStatus,
    /// Command specific, e.g. a match count or a packet ID
    pub value: i64,
    pub message: Option<String>,
}

/// The header line of a reply, before its message has been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReplyLine {
    pub status: ReplyStatus,
    pub value: i64,
    pub size: usize,
}

impl ReplyLine {
    /// `command` names the request being answered, for error context.
    pub fn parse(header: &str, command: &str) -> Result<Self> {
        let fields: Vec<&str> = header.split_whitespace().collect();

        let [status, value, size] = fields[..] else {
            return Err(DaliError::protocol(command, format!("malformed reply '{}'", header)));
        };

        let status = match status {
            REPLY_OK => ReplyStatus::Ok,
            REPLY_ERROR => ReplyStatus::Error,
            _ => {
                return Err(DaliError::protocol(command, format!("unexpected reply '{}'", header)));
            }
        };

        let value = value
            .parse::<i64>()
            .map_err(|_| DaliError::protocol(command, format!("bad reply value in '{}'", header)))?;
        let size = size
            .parse::<usize>()
            .map_err(|_| DaliError::protocol(command, format!("bad reply size in '{}'", header)))?;

        Ok(ReplyLine { status, value, size })
    }
}

/// Message bytes as a string, cut at the first NUL.
fn message_text(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

impl Reply {
    pub(crate) fn from_line(line: ReplyLine, message: &[u8]) -> Self {
        Reply {
            status: line.status,
            value: line.value,
            message: (line.size > 0).then(|| message_text(message)),
        }
    }

    /// Parse a complete reply from its header and the message bytes that followed it.
    pub fn parse(header: &str, message: &[u8]) -> Result<Self> {
        let line = ReplyLine::parse(header, "reply")?;
        if message.len() != line.size {
            return Err(DaliError::protocol(
                "reply",
                format!("declared {} message bytes, got {}", line.size, message.len()),
            ));
        }
        Ok(Reply::from_line(line, message))
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[test]
    fn test_parse_ok_reply() {
        let reply = Reply::parse("OK 42 0\r\n", &[]).expect("valid reply");
        assert_eq!(reply, Reply { status: ReplyStatus::Ok, value: 42, message: None });
        assert!(reply.is_ok());
    }

    #[test]
    fn test_parse_error_reply_with_message() {
        let reply = Reply::parse("ERROR 0 11\r\n", b"bad stream\0").expect("valid reply");
        assert_eq!(
            reply,
            Reply {
                status: ReplyStatus::Error,
                value: 0,
                message: Some("bad stream".to_string()),
            }
        );
        assert!(!reply.is_ok());
    }

    #[test]
    fn test_negative_value() {
        let line = ReplyLine::parse("ERROR -1 0", "POSITION").expect("valid line");
        assert_eq!(line.value, -1);
    }

    #[rstest]
    #[case::unknown_status("MAYBE 1 0")]
    #[case::missing_size("OK 1")]
    #[case::extra_field("OK 1 0 0")]
    #[case::bad_value("OK x 0")]
    #[case::negative_size("OK 1 -5")]
    #[case::empty("")]
    fn test_malformed_reply(#[case] header: &str) {
        assert!(matches!(ReplyLine::parse(header, "MATCH"), Err(DaliError::Protocol { .. })));
    }

    #[test]
    fn test_message_length_must_match() {
        assert!(Reply::parse("OK 0 5", b"abc").is_err());
    }
}
