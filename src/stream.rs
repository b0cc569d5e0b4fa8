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

//! Streaming collection.
//!
//! ```text
//!                  collect()                 terminate
//!  NotStreaming ──── STREAM ───▶ Streaming ── ENDSTREAM ──▶ EndRequested
//!       ▲                           │                           │
//!       └──────── ENDSTREAM from server ◀───────────────────────┘
//! ```
//!
//! While streaming the server may push three kinds of unit: `PACKET` (handed
//! to the caller), `ID` (the answer to a keepalive, swallowed) and `ENDSTREAM`
//! (end of collection). Anything else means the stream can no longer be
//! trusted and the connection is closed.

use std::time::Duration;
use tracing::{debug, info, trace};
use crate::codec::{recv_body, recv_header, send_unit};
use crate::connection::{Connection, StreamState};
use crate::error::{DaliError, Result};
use crate::packet::{Packet, PacketHeader};
use crate::protocol::*;
use crate::transport::Wait;

/// Outcome of one collection call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collected {
    Packet(Packet),
    /// Non-blocking only: nothing complete arrived
    NoPacket,
    /// The server confirmed the end of the stream
    Ended,
}

impl Connection {
    /// Block until a packet arrives or the stream ends.
    ///
    /// The first call sends `STREAM`. A termination request sends `ENDSTREAM`
    /// and keeps delivering packets until the server echoes it.
    pub fn collect(&mut self) -> Result<Collected> {
        let result = self.collect_with(Wait::Block);
        result.map_err(|e| self.fail(e, "collect", true))
    }

    /// Single pass of [`Connection::collect`] that returns [`Collected::NoPacket`]
    /// instead of waiting.
    pub fn collect_nb(&mut self) -> Result<Collected> {
        let result = self.collect_with(Wait::NoWait);
        result.map_err(|e| self.fail(e, "collect", true))
    }

    fn collect_with(&mut self, wait: Wait) -> Result<Collected> {
        if !self.is_connected() {
            return Err(DaliError::NotConnected);
        }

        if self.stream_state == StreamState::NotStreaming {
            if self.stream_ended {
                return Err(DaliError::Validation("stream has already ended".to_string()));
            }
            if self.is_terminate_requested() {
                return Ok(Collected::Ended);
            }
            self.start_stream()?;
        }

        loop {
            self.service_stream()?;

            let transport = self.link()?;
            if wait == Wait::Block
                && !transport.poll_readable(Duration::from_millis(POLL_INTERVAL_MS))?
            {
                continue;
            }

            let Some(header) = recv_header(transport, wait)? else {
                return Ok(Collected::NoPacket);
            };

            match self.dispatch(&header)? {
                Some(collected) => return Ok(collected),
                None if wait == Wait::NoWait => return Ok(Collected::NoPacket),
                None => {}
            }
        }
    }

    fn start_stream(&mut self) -> Result<()> {
        send_unit(self.link()?, CMD_STREAM, None)?;
        self.stream_state = StreamState::Streaming;
        self.keepalive.reset();
        info!(addr = %self.address, "streaming started");
        Ok(())
    }

    /// Act on a pending termination request and a due keepalive.
    fn service_stream(&mut self) -> Result<()> {
        if self.stream_state == StreamState::Streaming && self.is_terminate_requested() {
            send_unit(self.link()?, CMD_ENDSTREAM, None)?;
            self.stream_state = StreamState::EndRequested;
            self.keepalive.reset();
            info!(addr = %self.address, "end of stream requested");
        }

        // Keepalives continue while waiting for the ENDSTREAM echo
        let now = self.clock.now();
        if self.keepalive.sample(now) {
            let header = format!("{} {}", CMD_ID, self.client_id);
            send_unit(self.link()?, header.trim_end(), None)?;
            self.keepalive.reset();
            debug!(addr = %self.address, "keepalive sent");
        }

        Ok(())
    }

    /// Handle one unit pushed by the server. `None` means it was consumed
    /// without producing anything for the caller.
    fn dispatch(&mut self, header: &str) -> Result<Option<Collected>> {
        let command = header.split_whitespace().next().unwrap_or("");

        match command {
            CMD_PACKET => {
                let parsed = PacketHeader::parse(header)?;
                let limit = match self.max_packet_size {
                    0 => MAX_UNIT_SIZE,
                    size => size,
                };
                if parsed.data_size > limit {
                    return Err(DaliError::protocol_stream_lost(
                        CMD_PACKET,
                        format!("packet is {} bytes, limit is {}", parsed.data_size, limit),
                    ));
                }

                let data = recv_body(self.link()?, parsed.data_size)?;
                let packet = parsed.into_packet(data);

                self.last_packet_id = packet.packet_id;
                self.last_packet_time = packet.packet_time;
                self.keepalive.reset();

                debug!(
                    stream = %packet.stream_id,
                    id = packet.packet_id,
                    size = packet.data_size,
                    "packet received"
                );
                Ok(Some(Collected::Packet(packet)))
            }
            CMD_ID => {
                trace!(%header, "keepalive acknowledged");
                Ok(None)
            }
            CMD_ENDSTREAM => {
                self.stream_state = StreamState::NotStreaming;
                self.stream_ended = true;
                info!(addr = %self.address, "stream ended");
                Ok(Some(Collected::Ended))
            }
            _ => Err(DaliError::protocol(
                CMD_STREAM,
                format!("unexpected unit while streaming: '{}'", header),
            )),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::{open_mock, open_mock_with_clock, unit, CLIENT_ID, SERVER_ID};
    use crate::timer::{KeepaliveTrigger, ManualClock};

    fn packet_unit(stream_id: &str, id: i64, body: &[u8]) -> Vec<u8> {
        let header = format!("PACKET {} {} {} {} {} {}", stream_id, id, id * 10, id * 10 - 5, id * 10 - 1, body.len());
        unit(&header, body)
    }

    fn expect_packet(collected: Collected) -> Packet {
        match collected {
            Collected::Packet(packet) => packet,
            other => panic!("expected a packet, got {:?}", other),
        }
    }

    #[test]
    fn test_collect_swallows_id_and_updates_position() {
        let mut conn = open_mock(
            vec![
                Some(unit(SERVER_ID, &[])),
                Some(packet_unit("XX_STA/MSEED", 7, b"payload")),
            ],
            &[unit("STREAM", &[])],
        );

        let packet = expect_packet(conn.collect().expect("collect"));
        assert_eq!(packet.stream_id, "XX_STA/MSEED");
        assert_eq!(packet.packet_id, 7);
        assert_eq!(packet.data, b"payload");
        assert_eq!(conn.last_packet_id(), 7);
        assert_eq!(conn.last_packet_time(), 70);
        assert_eq!(conn.stream_state(), StreamState::Streaming);
    }

    fn scenario_reads() -> Vec<Option<Vec<u8>>> {
        vec![
            Some(unit("PACKET A 1 100 100 105 4", b"\x01\x02\x03\x04")),
            Some(unit(SERVER_ID, &[])),
            Some(unit("PACKET A 2 101 106 109 4", b"\x05\x06\x07\x08")),
        ]
    }

    #[test]
    fn test_scenario_blocking() {
        let mut conn = open_mock(scenario_reads(), &[unit("STREAM", &[])]);

        let first = expect_packet(conn.collect().expect("first"));
        assert_eq!((first.packet_id, first.data_start_time, first.data_end_time), (1, 100, 105));
        assert_eq!(first.data, [1, 2, 3, 4]);

        let second = expect_packet(conn.collect().expect("second"));
        assert_eq!((second.packet_id, second.packet_time), (2, 101));
        assert_eq!(second.data, [5, 6, 7, 8]);
        assert_eq!(conn.last_packet_id(), 2);
        assert_eq!(conn.last_packet_time(), 101);
    }

    #[test]
    fn test_scenario_nonblocking() {
        let mut conn = open_mock(scenario_reads(), &[unit("STREAM", &[])]);

        assert_eq!(expect_packet(conn.collect_nb().expect("first")).packet_id, 1);
        assert_eq!(conn.collect_nb().expect("id"), Collected::NoPacket);
        assert_eq!(expect_packet(conn.collect_nb().expect("second")).packet_id, 2);
    }

    #[test]
    fn test_collect_waits_out_idle_polls() {
        let mut conn = open_mock(
            vec![None, None, Some(packet_unit("A", 1, b"x"))],
            &[unit("STREAM", &[])],
        );
        assert_eq!(expect_packet(conn.collect().expect("collect")).packet_id, 1);
    }

    #[test]
    fn test_collect_nb() {
        let mut conn = open_mock(
            vec![
                None,
                Some(unit(SERVER_ID, &[])),
                Some(packet_unit("A", 3, b"abc")),
            ],
            &[unit("STREAM", &[])],
        );

        assert_eq!(conn.collect_nb().expect("idle"), Collected::NoPacket);
        assert_eq!(conn.collect_nb().expect("id echo"), Collected::NoPacket);
        assert_eq!(expect_packet(conn.collect_nb().expect("packet")).packet_id, 3);
    }

    #[test]
    fn test_terminate_drains_then_ends() {
        let mut conn = open_mock(
            vec![
                Some(packet_unit("A", 1, b"one")),
                Some(packet_unit("A", 2, b"two")),
                Some(unit("ENDSTREAM", &[])),
            ],
            &[unit("STREAM", &[]), unit("ENDSTREAM", &[])],
        );

        assert_eq!(expect_packet(conn.collect().expect("first")).packet_id, 1);

        conn.terminate();
        assert_eq!(expect_packet(conn.collect().expect("in flight")).packet_id, 2);
        assert_eq!(conn.stream_state(), StreamState::EndRequested);

        assert_eq!(conn.collect().expect("end"), Collected::Ended);
        assert_eq!(conn.stream_state(), StreamState::NotStreaming);
        assert!(conn.is_connected(), "ending the stream keeps the socket open");

        let err = conn.collect().expect_err("already ended");
        assert!(matches!(err, DaliError::Validation(_)));
    }

    #[test]
    fn test_terminate_before_streaming() {
        let mut conn = open_mock(vec![], &[]);
        conn.terminate();
        assert_eq!(conn.collect().expect("ended"), Collected::Ended);
        assert_eq!(conn.stream_state(), StreamState::NotStreaming);
    }

    #[test]
    fn test_keepalive_sent_once_per_idle_interval() {
        let clock = ManualClock::new();
        let mut conn = open_mock_with_clock(
            vec![
                None,
                None,
                Some(unit(SERVER_ID, &[])),
                Some(packet_unit("A", 5, b"z")),
            ],
            &[unit("STREAM", &[]), unit(&format!("ID {}", CLIENT_ID), &[])],
            clock.clone(),
        );
        conn.set_keepalive(Duration::from_secs(2));

        // Arms the timer
        assert_eq!(conn.collect_nb().expect("idle"), Collected::NoPacket);

        clock.advance(Duration::from_secs(2));
        assert_eq!(conn.collect_nb().expect("keepalive"), Collected::NoPacket);

        // The echo does not count as traffic
        assert_eq!(conn.collect_nb().expect("echo"), Collected::NoPacket);
        assert_eq!(conn.keepalive.trigger(), KeepaliveTrigger::Armed);

        clock.advance(Duration::from_secs(1));
        assert_eq!(expect_packet(conn.collect_nb().expect("packet")).packet_id, 5);
        assert_eq!(conn.keepalive.trigger(), KeepaliveTrigger::Reset);
    }

    #[test]
    fn test_keepalive_disabled_by_default() {
        let clock = ManualClock::new();
        let mut conn = open_mock_with_clock(vec![None, None], &[unit("STREAM", &[])], clock.clone());

        assert_eq!(conn.collect_nb().expect("idle"), Collected::NoPacket);
        clock.advance(Duration::from_secs(3600));
        assert_eq!(conn.collect_nb().expect("idle"), Collected::NoPacket);
    }

    #[test]
    fn test_unexpected_unit_closes_connection() {
        let mut conn = open_mock(vec![Some(unit("OK 0 0", &[]))], &[unit("STREAM", &[])]);
        let err = conn.collect().expect_err("protocol violation");
        assert!(matches!(err, DaliError::Protocol { .. }));
        assert!(!conn.is_connected());
        assert!(matches!(conn.collect(), Err(DaliError::NotConnected)));
    }

    #[test]
    fn test_server_hang_up_while_streaming() {
        let mut conn = open_mock(vec![Some(vec![])], &[unit("STREAM", &[])]);
        let err = conn.collect().expect_err("closed");
        assert!(matches!(err, DaliError::ConnectionClosed { .. }));
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_packet_over_server_limit_closes_connection() {
        let mut conn = open_mock(
            vec![Some(unit("PACKET A 1 1 1 1 4096", &[]))],
            &[unit("STREAM", &[])],
        );
        let err = conn.collect().expect_err("too large");
        assert!(matches!(err, DaliError::Protocol { .. }));
        assert!(!conn.is_connected());
    }

    #[test]
    fn test_transactions_refused_until_stream_ends() {
        let mut conn = open_mock(
            vec![Some(packet_unit("A", 1, b"x"))],
            &[unit("STREAM", &[])],
        );
        expect_packet(conn.collect().expect("packet"));

        let err = conn.position_after(0).expect_err("streaming");
        assert!(matches!(err, DaliError::Validation(_)));
        assert!(conn.is_connected());
    }

    #[test]
    fn test_keepalive_continues_while_end_requested() {
        let clock = ManualClock::new();
        let mut conn = open_mock_with_clock(
            vec![None, None, None, Some(unit("ENDSTREAM", &[]))],
            &[
                unit("STREAM", &[]),
                unit("ENDSTREAM", &[]),
                unit(&format!("ID {}", CLIENT_ID), &[]),
            ],
            clock.clone(),
        );
        conn.set_keepalive(Duration::from_secs(2));

        assert_eq!(conn.collect_nb().expect("idle"), Collected::NoPacket);

        conn.terminate();
        assert_eq!(conn.collect_nb().expect("end requested"), Collected::NoPacket);
        assert_eq!(conn.stream_state(), StreamState::EndRequested);

        clock.advance(Duration::from_secs(3));
        assert_eq!(conn.collect_nb().expect("keepalive"), Collected::NoPacket);
        assert_eq!(conn.stream_state(), StreamState::EndRequested);

        assert_eq!(conn.collect_nb().expect("echo"), Collected::Ended);
    }

    #[test]
    fn test_huge_packet_without_advertised_size_closes_connection() {
        let mut conn = open_mock(
            vec![Some(unit("PACKET A 1 1 1 1 18446744073709551615", &[]))],
            &[unit("STREAM", &[])],
        );
        conn.max_packet_size = 0;

        let err = conn.collect().expect_err("too large");
        assert!(matches!(err, DaliError::Protocol { stream_lost: true, .. }));
        assert!(!conn.is_connected());
    }

    /// Scripted transport that fires a terminate handle from another thread
    /// the first time the collect loop finds nothing to read.
    struct TerminateWhenIdle {
        inner: crate::transport::MockTransport,
        handle: std::sync::Arc<std::sync::OnceLock<crate::TerminateHandle>>,
        idle_polls: usize,
        // Idle polls seen before each write
        writes_at: std::sync::Arc<std::sync::Mutex<Vec<usize>>>,
    }

    impl crate::transport::Transport for TerminateWhenIdle {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.writes_at.lock().expect("lock").push(self.idle_polls);
            self.inner.write(buf)
        }

        fn read(&mut self, buf: &mut [u8], wait: Wait) -> std::io::Result<usize> {
            self.inner.read(buf, wait)
        }

        fn poll_readable(&mut self, timeout: Duration) -> std::io::Result<bool> {
            let ready = self.inner.poll_readable(timeout)?;
            if !ready {
                self.idle_polls += 1;
                if let Some(handle) = self.handle.get().cloned() {
                    std::thread::spawn(move || handle.terminate()).join().expect("terminate thread");
                }
            }
            Ok(ready)
        }

        fn close(&mut self) -> std::io::Result<()> {
            self.inner.close()
        }
    }

    #[test]
    fn test_terminate_while_blocking_collect_is_idle() {
        use crate::connection::tests::{client_writes, server_reads};
        use std::sync::{Arc, Mutex, OnceLock};

        let handle = Arc::new(OnceLock::new());
        let writes_at = Arc::new(Mutex::new(Vec::new()));
        let transport = TerminateWhenIdle {
            inner: crate::transport::MockTransport::new(
                server_reads(vec![
                    Some(packet_unit("A", 1, b"x")),
                    None,
                    None,
                    Some(unit("ENDSTREAM", &[])),
                ]),
                client_writes(&[unit("STREAM", &[]), unit("ENDSTREAM", &[])]),
            ),
            handle: handle.clone(),
            idle_polls: 0,
            writes_at: writes_at.clone(),
        };

        let mut conn = Connection::open("localhost:16000", CLIENT_ID, Box::new(transport), Box::new(ManualClock::new()))
            .expect("handshake");
        handle.set(conn.terminate_handle()).expect("handle set once");

        assert_eq!(expect_packet(conn.collect().expect("packet")).packet_id, 1);
        assert!(!conn.is_terminate_requested());

        assert_eq!(conn.collect().expect("ended"), Collected::Ended);
        assert_eq!(conn.stream_state(), StreamState::NotStreaming);

        // ID, STREAM, then ENDSTREAM only after the first idle poll
        assert_eq!(*writes_at.lock().expect("lock"), vec![0, 0, 1]);
    }
}
