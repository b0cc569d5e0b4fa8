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

//! Unit framing.
//!
//! ```text
//! ┌──────────┬────────┬──────────────────┬──────────────────────┐
//! │ "DL"     │ length │ header           │ body (WRITE, PACKET) │
//! │ 2 bytes  │ 1 byte │ `length` bytes   │ size named in header │
//! └──────────┴────────┴──────────────────┴──────────────────────┘
//! ```
//!
//! The body has no framing of its own; the size in the header is authoritative.

use tracing::trace;
use crate::error::{DaliError, Result};
use crate::protocol::*;
use crate::transport::{Transport, Wait};

/// First word of a header, used to label errors.
fn command_of(header: &str) -> &str {
    header.split_whitespace().next().unwrap_or("<empty>")
}

/// Serialize one unit, rejecting anything the length byte or the wire ceiling cannot carry.
pub fn encode_unit(header: &str, body: Option<&[u8]>) -> Result<Vec<u8>> {
    let body = body.unwrap_or(&[]);
    let command = command_of(header);

    if header.is_empty() {
        return Err(DaliError::framing("send", "header is empty"));
    }
    if header.len() > MAX_HEADER_SIZE {
        return Err(DaliError::framing(
            format!("send {}", command),
            format!("header is {} bytes, limit is {}", header.len(), MAX_HEADER_SIZE),
        ));
    }

    let total = PRE_HEADER_SIZE + header.len() + body.len();
    if total > MAX_UNIT_SIZE {
        return Err(DaliError::framing(
            format!("send {}", command),
            format!("unit is {} bytes, limit is {}", total, MAX_UNIT_SIZE),
        ));
    }

    let mut unit = Vec::with_capacity(total);
    unit.extend_from_slice(&SYNC);
    unit.push(header.len() as u8);
    unit.extend_from_slice(header.as_bytes());
    unit.extend_from_slice(body);
    Ok(unit)
}

/// Send one unit. Nothing is written unless the whole unit is valid.
pub fn send_unit(transport: &mut dyn Transport, header: &str, body: Option<&[u8]>) -> Result<()> {
    let unit = encode_unit(header, body)?;
    let context = format!("send {}", command_of(header));

    let mut written = 0;
    while written < unit.len() {
        match transport.write(&unit[written..]) {
            Ok(0) => return Err(DaliError::closed(context)),
            Ok(n) => written += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DaliError::transport(context, e)),
        }
    }

    trace!(header, body_len = body.map_or(0, <[u8]>::len), "sent unit");
    Ok(())
}

/// Fill `buf` completely.
///
/// Returns `Ok(false)` only when `wait` is `NoWait` and the very first read finds
/// nothing. Once any byte has arrived the rest is read blocking.
fn read_exact(transport: &mut dyn Transport, buf: &mut [u8], wait: Wait, context: &str) -> Result<bool> {
    let mut filled = 0;
    let mut wait = wait;

    while filled < buf.len() {
        match transport.read(&mut buf[filled..], wait) {
            Ok(0) => return Err(DaliError::closed(context)),
            Ok(n) => {
                filled += n;
                wait = Wait::Block;
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock && wait == Wait::NoWait => {
                return Ok(false);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DaliError::transport(context, e)),
        }
    }

    Ok(true)
}

/// Receive the next header.
///
/// With `Wait::NoWait`, `Ok(None)` means no unit has started arriving. A unit
/// that has started is always read through to the end of its header.
pub fn recv_header(transport: &mut dyn Transport, wait: Wait) -> Result<Option<String>> {
    let mut pre_header = [0u8; PRE_HEADER_SIZE];
    if !read_exact(transport, &mut pre_header, wait, "recv pre-header")? {
        return Ok(None);
    }

    if pre_header[..2] != SYNC {
        return Err(DaliError::framing(
            "recv pre-header",
            format!("bad sync bytes {:02X?}", &pre_header[..2]),
        ));
    }

    let length = pre_header[2] as usize;
    if length == 0 {
        return Err(DaliError::framing("recv pre-header", "zero length header"));
    }

    let mut raw = vec![0u8; length];
    read_exact(transport, &mut raw, Wait::Block, "recv header")?;

    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let header = String::from_utf8_lossy(&raw[..end]).trim_end().to_string();

    trace!(%header, "received header");
    Ok(Some(header))
}

/// Receive exactly `size` body bytes, blocking until all have arrived.
pub fn recv_body(transport: &mut dyn Transport, size: usize) -> Result<Vec<u8>> {
    let mut body = vec![0u8; size];
    read_exact(transport, &mut body, Wait::Block, "recv body")?;
    Ok(body)
}

/// Read and discard `size` body bytes through a fixed scratch buffer.
pub fn drain_body(transport: &mut dyn Transport, size: usize) -> Result<()> {
    let mut scratch = [0u8; 4096];
    let mut remaining = size;
    while remaining > 0 {
        let n = remaining.min(scratch.len());
        read_exact(transport, &mut scratch[..n], Wait::Block, "drain body")?;
        remaining -= n;
    }
    trace!(size, "drained body");
    Ok(())
}

/// Receive a body whose declared `size` must not exceed `limit`.
///
/// Nothing is allocated for an oversized body. One up to `MAX_DRAIN_SIZE` is
/// drained so the connection stays usable; anything larger leaves the stream
/// out of step and the error says so.
pub fn recv_body_within(transport: &mut dyn Transport, size: usize, limit: usize, command: &str) -> Result<Vec<u8>> {
    if size <= limit {
        return recv_body(transport, size);
    }

    let reason = format!("declared {} bytes, limit is {}", size, limit);
    if size > MAX_DRAIN_SIZE {
        return Err(DaliError::protocol_stream_lost(command, reason));
    }

    drain_body(transport, size)?;
    Err(DaliError::protocol(command, reason))
}

// ============================================================================
// Tests
// ============================================================================
