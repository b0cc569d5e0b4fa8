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

//! DataLink protocol constants

/// Synchronization bytes that begin every unit on the wire
pub const SYNC: [u8; 2] = *b"DL";

/// Sync bytes plus the header length byte
pub const PRE_HEADER_SIZE: usize = 3;

/// Largest header the single length byte can describe
pub const MAX_HEADER_SIZE: usize = 255;

/// Largest complete unit (pre-header, header and body) the client will send
pub const MAX_UNIT_SIZE: usize = 16384;

/// Port used when the address does not name one
pub const DEFAULT_PORT: u16 = 16000;

/// Host used when the address does not name one
pub const DEFAULT_HOST: &str = "localhost";

/// Largest oversized body that is read and thrown away to keep the stream in step
pub const MAX_DRAIN_SIZE: usize = 1 << 20;

/// Bounded wait used by the blocking collection loop between liveness checks
pub const POLL_INTERVAL_MS: u64 = 500;

/// Largest reply message the transaction layer accepts
pub const MAX_REPLY_MESSAGE: usize = 255;

/// Largest stream ID accepted in a PACKET header
pub const MAX_STREAM_ID: usize = 60;

/// Identification exchange, also sent as the streaming keepalive
pub const CMD_ID: &str = "ID";

/// Reposition the client's read position in the server ring
pub const CMD_POSITION: &str = "POSITION";

/// Stream ID match expression
pub const CMD_MATCH: &str = "MATCH";

/// Stream ID reject expression
pub const CMD_REJECT: &str = "REJECT";

/// Submit a packet to the server
pub const CMD_WRITE: &str = "WRITE";

/// Request one specific packet
pub const CMD_READ: &str = "READ";

/// Request server information
pub const CMD_INFO: &str = "INFO";

/// Begin streaming
pub const CMD_STREAM: &str = "STREAM";

/// End streaming, echoed by the server once the stream is drained
pub const CMD_ENDSTREAM: &str = "ENDSTREAM";

/// Data packet pushed by the server
pub const CMD_PACKET: &str = "PACKET";

/// Successful reply status
pub const REPLY_OK: &str = "OK";

/// Failed reply status
pub const REPLY_ERROR: &str = "ERROR";

/// Server identification prefix expected in the handshake reply
pub const SERVER_SIGNATURE: &str = "ID DATALINK";

/// Separator between the server identification and its capability flags
pub const CAPABILITY_SEPARATOR: &str = "::";

/// Capability flag carrying the server protocol version
pub const CAP_PROTOCOL: &str = "DLPROTO:";

/// Capability flag carrying the server packet size ceiling
pub const CAP_PACKET_SIZE: &str = "PACKETSIZE:";

/// Capability flag granting write permission
pub const CAP_WRITE: &str = "WRITE";

/// Flag requesting an acknowledgement for WRITE
pub const WRITE_ACK: &str = "A";

/// Flag declining an acknowledgement for WRITE
pub const WRITE_NO_ACK: &str = "N";

/// High precision time ticks per second
pub const DLTMODULUS: i64 = 1_000_000;

/// Time value marking an error, '1902/1/1 00:00:00.000000' in ticks
pub const DLTERROR: i64 = -2_145_916_800_000_000;

/// High precision DataLink time, in 1/DLTMODULUS second ticks since the epoch
pub type DlTime = i64;

/// Scale whole epoch seconds to high precision time
pub fn dltime_from_epoch(seconds: i64) -> DlTime {
    seconds * DLTMODULUS
}

/// Scale high precision time to whole epoch seconds, truncating sub-second ticks
pub fn dltime_to_epoch(time: DlTime) -> i64 {
    time / DLTMODULUS
}

/// Epoch seconds with the fractional part, for display
pub fn dltime_to_seconds(time: DlTime) -> f64 {
    time as f64 / DLTMODULUS as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dltime_scaling() {
        assert_eq!(dltime_from_epoch(1_200_000_000), 1_200_000_000_000_000);
        assert_eq!(dltime_to_epoch(1_200_000_000_123_456), 1_200_000_000);
        assert_eq!(dltime_to_seconds(1_500_000), 1.5);
        assert_eq!(dltime_to_epoch(DLTERROR), -2_145_916_800);
    }
}
