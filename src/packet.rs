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
use crate::protocol::{CMD_PACKET, DlTime, MAX_STREAM_ID};

/// One data packet received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Server-assigned channel name, e.g. `XX_STA_00_HHZ/MSEED`
    pub stream_id: String,
    pub packet_id: i64,
    /// Time the server received the packet
    pub packet_time: DlTime,
    pub data_start_time: DlTime,
    pub data_end_time: DlTime,
    pub data_size: usize,
    /// Opaque payload, `data.len() == data_size`
    pub data: Vec<u8>,
}

/// Fields of a `PACKET <streamid> <pktid> <pkttime> <datastart> <dataend> <size>` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PacketHeader {
    pub stream_id: String,
    pub packet_id: i64,
    pub packet_time: DlTime,
    pub data_start_time: DlTime,
    pub data_end_time: DlTime,
    pub data_size: usize,
}

fn field<T: std::str::FromStr>(value: &str, name: &str, header: &str) -> Result<T> {
    value.parse::<T>().map_err(|_| {
        DaliError::protocol(CMD_PACKET, format!("cannot parse {} '{}' in '{}'", name, value, header))
    })
}

impl PacketHeader {
    pub fn parse(header: &str) -> Result<Self> {
        let fields: Vec<&str> = header.split_whitespace().collect();

        let [command, stream_id, packet_id, packet_time, start, end, size] = fields[..] else {
            return Err(DaliError::protocol(
                CMD_PACKET,
                format!("expected 7 fields, got {} in '{}'", fields.len(), header),
            ));
        };

        if command != CMD_PACKET {
            return Err(DaliError::protocol(CMD_PACKET, format!("not a packet header: '{}'", header)));
        }

        if stream_id.len() > MAX_STREAM_ID {
            return Err(DaliError::protocol(
                CMD_PACKET,
                format!("stream ID is {} bytes, limit is {}", stream_id.len(), MAX_STREAM_ID),
            ));
        }

        Ok(PacketHeader {
            stream_id: stream_id.to_string(),
            packet_id: field(packet_id, "packet ID", header)?,
            packet_time: field(packet_time, "packet time", header)?,
            data_start_time: field(start, "data start", header)?,
            data_end_time: field(end, "data end", header)?,
            data_size: field(size, "data size", header)?,
        })
    }

    pub fn into_packet(self, data: Vec<u8>) -> Packet {
        debug_assert_eq!(data.len(), self.data_size);
        Packet {
            stream_id: self.stream_id,
            packet_id: self.packet_id,
            packet_time: self.packet_time,
            data_start_time: self.data_start_time,
            data_end_time: self.data_end_time,
            data_size: self.data_size,
            data,
        }
    }
}
