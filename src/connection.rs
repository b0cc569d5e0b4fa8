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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use crate::error::{DaliError, Result};
use crate::protocol::DlTime;
use crate::timer::{Clock, Keepalive, SystemClock};
use crate::transport::{TcpTransport, Transport};

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    NotStreaming,
    Streaming,
    /// ENDSTREAM sent, waiting for the server to echo it
    EndRequested,
}

/// Cloneable handle that asks a connection to wind down, e.g. from a signal handler thread.
#[derive(Debug, Clone)]
pub struct TerminateHandle(Arc<AtomicBool>);

impl TerminateHandle {
    pub fn terminate(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Connection Structure
// ============================================================================

/// One DataLink connection and all of its protocol state.
pub struct Connection {
    pub(crate) address: String,
    pub(crate) client_id: String,
    pub(crate) transport: Option<Box<dyn Transport>>,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) server_id: String,
    pub(crate) server_protocol_version: f32,
    pub(crate) max_packet_size: usize,
    pub(crate) write_permission: bool,
    pub(crate) last_packet_id: i64,
    pub(crate) last_packet_time: DlTime,
    pub(crate) keepalive: Keepalive,
    pub(crate) terminate: TerminateHandle,
    pub(crate) stream_state: StreamState,
    pub(crate) stream_ended: bool,
}

impl Connection {
    /// Open a TCP connection to `address` (`[host][:port]`) and exchange IDs.
    ///
    /// Any failure closes the socket; there is no half-open result.
    pub fn connect(address: &str, client_id: &str) -> Result<Self> {
        let transport = TcpTransport::connect(address).inspect_err(|e| {
            error!(addr = %address, "cannot connect: {}", e);
        })?;
        Self::open(address, client_id, Box::new(transport), Box::new(SystemClock::new()))
    }

    /// Exchange IDs over an already established transport.
    pub fn open(
        address: &str,
        client_id: &str,
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
    ) -> Result<Self> {
        let mut conn = Connection {
            address: address.to_string(),
            client_id: client_id.to_string(),
            transport: Some(transport),
            clock,
            server_id: String::new(),
            server_protocol_version: 0.0,
            max_packet_size: 0,
            write_permission: false,
            last_packet_id: -1,
            last_packet_time: 0,
            keepalive: Keepalive::new(Duration::ZERO),
            terminate: TerminateHandle(Arc::new(AtomicBool::new(false))),
            stream_state: StreamState::NotStreaming,
            stream_ended: false,
        };

        if let Err(e) = conn.exchange_ids() {
            error!(addr = %conn.address, "ID exchange failed: {}", e);
            conn.disconnect();
            return Err(e);
        }

        info!(
            addr = %conn.address,
            server = %conn.server_id,
            protocol = conn.server_protocol_version,
            "connected"
        );
        Ok(conn)
    }

    /// Close the socket if open. Safe to call any number of times.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                warn!(addr = %self.address, "error closing socket: {}", e);
            }
            debug!(addr = %self.address, "network socket closed");
        }
        self.stream_state = StreamState::NotStreaming;
    }

    /// Ask the collection loop to end the stream. The socket stays open.
    pub fn terminate(&self) {
        self.terminate.terminate();
    }

    pub fn terminate_handle(&self) -> TerminateHandle {
        self.terminate.clone()
    }

    pub fn is_terminate_requested(&self) -> bool {
        self.terminate.is_requested()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// 0.0 when the server did not advertise a version.
    pub fn server_protocol_version(&self) -> f32 {
        self.server_protocol_version
    }

    /// 0 when the server did not advertise a limit.
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn write_permission(&self) -> bool {
        self.write_permission
    }

    pub fn stream_state(&self) -> StreamState {
        self.stream_state
    }

    pub fn last_packet_id(&self) -> i64 {
        self.last_packet_id
    }

    pub fn last_packet_time(&self) -> DlTime {
        self.last_packet_time
    }

    /// Seed the resume position, e.g. from a state file.
    pub fn set_last_packet(&mut self, packet_id: i64, packet_time: DlTime) {
        self.last_packet_id = packet_id;
        self.last_packet_time = packet_time;
    }

    /// Interval between keepalives while streaming; zero disables them.
    pub fn set_keepalive(&mut self, interval: Duration) {
        self.keepalive.set_interval(interval);
    }

    pub fn keepalive_interval(&self) -> Duration {
        self.keepalive.interval()
    }

    pub(crate) fn link(&mut self) -> Result<&mut (dyn Transport + 'static)> {
        match self.transport.as_deref_mut() {
            Some(transport) => Ok(transport),
            None => Err(DaliError::NotConnected),
        }
    }

    /// Log a failed operation, closing the socket when the stream is no longer usable.
    pub(crate) fn fail(&mut self, err: DaliError, context: &str, close_on_protocol: bool) -> DaliError {
        let protocol = matches!(err, DaliError::Protocol { .. });
        if err.is_fatal() || (close_on_protocol && protocol) {
            error!(addr = %self.address, state = ?self.stream_state, "{}: {}", context, err);
            self.disconnect();
        } else {
            warn!(addr = %self.address, state = ?self.stream_state, "{}: {}", context, err);
        }
        err
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ============================================================================
// Tests
// ============================================================================
