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

//! Request/reply exchanges outside of streaming.

use tracing::{debug, error, warn};
use crate::codec::{recv_body_within, recv_header, send_unit};
use crate::connection::{Connection, StreamState};
use crate::error::{DaliError, Result};
use crate::packet::{Packet, PacketHeader};
use crate::protocol::*;
use crate::reply::{Reply, ReplyLine, ReplyStatus};
use crate::transport::{Transport, Wait};

// ============================================================================
// Reply Handling
// ============================================================================

fn recv_reply_header(transport: &mut dyn Transport, command: &str) -> Result<String> {
    recv_header(transport, Wait::Block)?
        .ok_or_else(|| DaliError::protocol(command, "no reply received"))
}

/// Read the message that follows a reply line; one larger than `max_message` is an error.
fn recv_reply_body(transport: &mut dyn Transport, line: ReplyLine, command: &str, max_message: usize) -> Result<Reply> {
    let message = recv_body_within(transport, line.size, max_message, command)?;
    Ok(Reply::from_line(line, &message))
}

/// Turn a reply into its value, or into `ErrorReply` if the server said ERROR.
fn reply_value(reply: Reply, command: &str) -> Result<i64> {
    match reply.status {
        ReplyStatus::Ok => Ok(reply.value),
        ReplyStatus::Error => {
            error!(
                command,
                value = reply.value,
                "server returned error: {}",
                reply.message.as_deref().unwrap_or("")
            );
            Err(DaliError::ErrorReply {
                command: command.to_string(),
                value: reply.value,
                message: reply.message,
            })
        }
    }
}

/// Receive and interpret one `OK|ERROR value size` reply.
fn recv_reply(transport: &mut dyn Transport, command: &str) -> Result<i64> {
    let header = recv_reply_header(transport, command)?;
    let line = ReplyLine::parse(&header, command)?;
    let reply = recv_reply_body(transport, line, command, MAX_REPLY_MESSAGE)?;
    reply_value(reply, command)
}

/// A header that was not the expected data unit: surface a server ERROR as such.
fn unexpected_reply(transport: &mut dyn Transport, header: &str, command: &str) -> DaliError {
    let is_reply = header.starts_with(REPLY_OK) || header.starts_with(REPLY_ERROR);
    if !is_reply {
        return DaliError::protocol(command, format!("unexpected response '{}'", header));
    }

    let line = match ReplyLine::parse(header, command) {
        Ok(line) => line,
        Err(e) => return e,
    };
    match recv_reply_body(transport, line, command, MAX_REPLY_MESSAGE) {
        Ok(reply) if reply.is_ok() => {
            DaliError::protocol(command, format!("unexpected OK reply '{}'", header))
        }
        Ok(reply) => match reply_value(reply, command) {
            Err(e) => e,
            Ok(_) => DaliError::protocol(command, "unexpected reply"),
        },
        Err(e) => e,
    }
}

/// Server identification and capabilities from an `ID DataLink ... :: FLAGS` header.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ServerCapabilities {
    pub server_id: String,
    pub protocol_version: f32,
    pub packet_size: usize,
    pub write: bool,
}

impl ServerCapabilities {
    pub fn parse(header: &str) -> Result<Self> {
        let signature_len = SERVER_SIGNATURE.len();
        let signed = header.len() >= signature_len
            && header.is_char_boundary(signature_len)
            && header[..signature_len].eq_ignore_ascii_case(SERVER_SIGNATURE);
        if !signed {
            return Err(DaliError::protocol(CMD_ID, format!("unrecognized server ID '{}'", header)));
        }

        let ident = &header[CMD_ID.len()..];
        let (ident, flags) = match ident.split_once(CAPABILITY_SEPARATOR) {
            Some((ident, flags)) => (ident, flags),
            None => (ident, ""),
        };

        let mut caps = ServerCapabilities {
            server_id: ident.trim().to_string(),
            protocol_version: 0.0,
            packet_size: 0,
            write: false,
        };

        for flag in flags.split_whitespace() {
            if let Some(version) = flag.strip_prefix(CAP_PROTOCOL) {
                match version.parse::<f32>() {
                    Ok(v) => caps.protocol_version = v,
                    Err(_) => warn!("cannot parse server protocol version '{}'", version),
                }
            } else if let Some(size) = flag.strip_prefix(CAP_PACKET_SIZE) {
                match size.parse::<usize>() {
                    Ok(s) => caps.packet_size = s,
                    Err(_) => warn!("cannot parse server packet size '{}'", size),
                }
            } else if flag == CAP_WRITE {
                caps.write = true;
            }
        }

        Ok(caps)
    }
}

// ============================================================================
// Transactions
// ============================================================================

impl Connection {
    fn id_header(&self) -> String {
        format!("{} {}", CMD_ID, self.client_id).trim_end().to_string()
    }

    /// Transport for a request/reply exchange; not allowed while streaming.
    fn transaction_link(&mut self, command: &str) -> Result<&mut (dyn Transport + 'static)> {
        if self.stream_state != StreamState::NotStreaming {
            return Err(DaliError::Validation(format!("{} is not allowed while streaming", command)));
        }
        self.link()
    }

    /// Send one unit and read the `OK|ERROR` reply.
    fn transact(&mut self, command: &str, header: &str, body: Option<&[u8]>) -> Result<i64> {
        let transport = self.transaction_link(command)?;
        debug!(%header, "sending");
        send_unit(transport, header, body)?;
        recv_reply(transport, command)
    }

    /// Reject a body that would push the unit past the wire ceiling, before any I/O.
    fn check_unit_size(header: &str, body_len: usize, what: &str) -> Result<()> {
        let limit = MAX_UNIT_SIZE.saturating_sub(PRE_HEADER_SIZE + header.len());
        if body_len > limit {
            return Err(DaliError::Validation(format!(
                "{} is {} bytes, limit is {}",
                what, body_len, limit
            )));
        }
        Ok(())
    }

    pub(crate) fn exchange_ids(&mut self) -> Result<()> {
        let header = self.id_header();
        let transport = self.link()?;

        debug!(%header, "sending");
        send_unit(transport, &header, None)?;
        let reply = recv_reply_header(transport, CMD_ID)?;
        debug!(%reply, "server ID");

        let caps = ServerCapabilities::parse(&reply)?;
        self.server_id = caps.server_id;
        self.server_protocol_version = caps.protocol_version;
        self.max_packet_size = caps.packet_size;
        self.write_permission = caps.write;
        Ok(())
    }

    /// Position the read pointer at `packet_id`, which must have `packet_time`.
    ///
    /// Returns the server's new current packet ID.
    pub fn position_set(&mut self, packet_id: i64, packet_time: DlTime) -> Result<i64> {
        if packet_id < 0 {
            return Err(DaliError::Validation(format!("packet ID {} is negative", packet_id)));
        }

        let header = format!("{} SET {} {}", CMD_POSITION, packet_id, packet_time);
        let result = self.transact(CMD_POSITION, &header, None);
        result.map_err(|e| self.fail(e, "POSITION SET", false))
    }

    /// Position the read pointer at the first packet with data after `data_time`.
    pub fn position_after(&mut self, data_time: DlTime) -> Result<i64> {
        let header = format!("{} AFTER {}", CMD_POSITION, data_time);
        let result = self.transact(CMD_POSITION, &header, None);
        result.map_err(|e| self.fail(e, "POSITION AFTER", false))
    }

    /// Resume from the last received packet.
    pub fn position_resume(&mut self) -> Result<i64> {
        self.position_set(self.last_packet_id, self.last_packet_time)
    }

    fn send_pattern(&mut self, command: &str, pattern: Option<&str>) -> Result<i64> {
        let pattern = pattern.unwrap_or("");
        let header = format!("{} {}", command, pattern.len());
        Self::check_unit_size(&header, pattern.len(), "pattern")?;
        self.transact(command, &header, Some(pattern.as_bytes()))
    }

    /// Limit streaming to stream IDs matching `pattern`; `None` or empty clears the match.
    ///
    /// Returns the number of currently matched streams.
    pub fn match_streams(&mut self, pattern: Option<&str>) -> Result<i64> {
        let result = self.send_pattern(CMD_MATCH, pattern);
        result.map_err(|e| self.fail(e, CMD_MATCH, false))
    }

    /// Exclude stream IDs matching `pattern`; `None` or empty clears the reject.
    ///
    /// Returns the number of currently rejected streams.
    pub fn reject_streams(&mut self, pattern: Option<&str>) -> Result<i64> {
        let result = self.send_pattern(CMD_REJECT, pattern);
        result.map_err(|e| self.fail(e, CMD_REJECT, false))
    }

    fn send_packet(&mut self, stream_id: &str, data_start: DlTime, data_end: DlTime, data: &[u8], ack: bool) -> Result<i64> {
        if !self.write_permission {
            return Err(DaliError::Validation("server did not grant write permission".to_string()));
        }
        if stream_id.is_empty() || stream_id.len() > MAX_STREAM_ID || stream_id.contains(char::is_whitespace) {
            return Err(DaliError::Validation(format!("invalid stream ID '{}'", stream_id)));
        }
        if self.max_packet_size > 0 && data.len() > self.max_packet_size {
            return Err(DaliError::Validation(format!(
                "packet is {} bytes, server limit is {}",
                data.len(),
                self.max_packet_size
            )));
        }

        let flag = if ack { WRITE_ACK } else { WRITE_NO_ACK };
        let header = format!(
            "{} {} {} {} {} {}",
            CMD_WRITE, stream_id, data_start, data_end, flag, data.len()
        );
        Self::check_unit_size(&header, data.len(), "packet")?;

        if ack {
            return self.transact(CMD_WRITE, &header, Some(data));
        }

        let transport = self.transaction_link(CMD_WRITE)?;
        debug!(%header, "sending");
        send_unit(transport, &header, Some(data))?;
        Ok(0)
    }

    /// Send a packet to the server.
    ///
    /// With `ack` the server's reply is read and the new packet ID returned;
    /// without it no reply is expected and 0 is returned.
    pub fn write(&mut self, stream_id: &str, data_start: DlTime, data_end: DlTime, data: &[u8], ack: bool) -> Result<i64> {
        let result = self.send_packet(stream_id, data_start, data_end, data, ack);
        result.map_err(|e| self.fail(e, CMD_WRITE, false))
    }

    fn request_packet(&mut self, packet_id: i64, max_data: usize) -> Result<Packet> {
        let header = format!("{} {}", CMD_READ, packet_id);
        let transport = self.transaction_link(CMD_READ)?;

        debug!(%header, "sending");
        send_unit(transport, &header, None)?;
        let response = recv_reply_header(transport, CMD_READ)?;

        if !response.starts_with(CMD_PACKET) {
            return Err(unexpected_reply(transport, &response, CMD_READ));
        }

        let parsed = PacketHeader::parse(&response)?;
        let data = recv_body_within(transport, parsed.data_size, max_data, CMD_READ)?;
        Ok(parsed.into_packet(data))
    }

    /// Request one packet by ID; zero or a negative ID asks for the most recent.
    ///
    /// A packet larger than `max_data` is reported as an error without being returned.
    pub fn read(&mut self, packet_id: i64, max_data: usize) -> Result<Packet> {
        let result = self.request_packet(packet_id, max_data);
        result.map_err(|e| self.fail(e, CMD_READ, false))
    }

    fn request_info(&mut self, info_type: &str, max_size: usize) -> Result<Vec<u8>> {
        if info_type.is_empty() || info_type.contains(char::is_whitespace) {
            return Err(DaliError::Validation(format!("invalid INFO type '{}'", info_type)));
        }

        let header = format!("{} {}", CMD_INFO, info_type);
        let transport = self.transaction_link(CMD_INFO)?;

        debug!(%header, "sending");
        send_unit(transport, &header, None)?;
        let response = recv_reply_header(transport, CMD_INFO)?;

        let fields: Vec<&str> = response.split_whitespace().collect();
        let [CMD_INFO, reply_type, size] = fields[..] else {
            return Err(unexpected_reply(transport, &response, CMD_INFO));
        };

        let size = size
            .parse::<usize>()
            .map_err(|_| DaliError::protocol(CMD_INFO, format!("bad size in '{}'", response)))?;
        let info = recv_body_within(transport, size, max_size, CMD_INFO)?;

        let matches = reply_type.len() >= info_type.len()
            && reply_type.is_char_boundary(info_type.len())
            && reply_type[..info_type.len()].eq_ignore_ascii_case(info_type);
        if !matches {
            return Err(DaliError::protocol(
                CMD_INFO,
                format!("requested {} but received {}", info_type, reply_type),
            ));
        }

        Ok(info)
    }

    /// Request server information of `info_type` (e.g. `STATUS`, `STREAMS`, `CONNECTIONS`).
    pub fn get_info(&mut self, info_type: &str, max_size: usize) -> Result<Vec<u8>> {
        let result = self.request_info(info_type, max_size);
        result.map_err(|e| self.fail(e, CMD_INFO, false))
    }
}

// ============================================================================
// Tests
// ============================================================================
