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

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;
use tracing::debug;
use crate::error::{DaliError, Result};
use crate::protocol::{DEFAULT_HOST, DEFAULT_PORT};

// ============================================================================
// Wait Policy
// ============================================================================

/// How a single read should behave when no bytes are available yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Block until at least one byte arrives or the peer closes.
    Block,
    /// Return `ErrorKind::WouldBlock` immediately if nothing is buffered.
    NoWait,
}

// ============================================================================
// Transport Trait
// ============================================================================

/// Byte stream operations needed by the DataLink engine
pub trait Transport: Send {
    /// Write some prefix of `buf`, returning how many bytes were accepted.
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize>;

    /// Read into `buf`. `Ok(0)` means the peer closed the connection.
    fn read(&mut self, buf: &mut [u8], wait: Wait) -> std::io::Result<usize>;

    /// Wait up to `timeout` for the stream to become readable (data or EOF).
    fn poll_readable(&mut self, timeout: Duration) -> std::io::Result<bool>;

    fn close(&mut self) -> std::io::Result<()>;
}

// ============================================================================
// Address Parsing
// ============================================================================

/// Split a `[host][:port]` address, filling in `localhost` and port 16000.
///
/// `":"` alone, `"host"`, `":port"` and `"host:port"` are all accepted.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    let (host, port) = match address.rsplit_once(':') {
        Some((host, port)) if !host.ends_with(':') => (host, port),
        _ => (address, ""),
    };

    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = if host.is_empty() { DEFAULT_HOST } else { host };

    let port = if port.is_empty() {
        DEFAULT_PORT
    } else {
        match port.parse::<u16>() {
            Ok(p) if p > 0 => p,
            _ => {
                return Err(DaliError::Validation(format!(
                    "invalid port '{}' in address '{}'",
                    port, address
                )));
            }
        }
    };

    Ok((host.to_string(), port))
}

// ============================================================================
// TCP Transport Implementation
// ============================================================================

/// Real transport over a TCP socket.
///
/// The socket stays in blocking mode; `Wait::NoWait` reads flip it for the
/// duration of that single call only.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn connect(address: &str) -> Result<Self> {
        let (host, port) = parse_address(address)?;

        let stream = TcpStream::connect((host.as_str(), port))
            .map_err(|e| DaliError::transport(format!("connect to {}:{}", host, port), e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| DaliError::transport("configure socket", e))?;

        debug!(%host, port, "network socket opened");
        Ok(TcpTransport { stream })
    }
}

impl Transport for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stream.write(buf)
    }

    fn read(&mut self, buf: &mut [u8], wait: Wait) -> std::io::Result<usize> {
        match wait {
            Wait::Block => self.stream.read(buf),
            Wait::NoWait => {
                self.stream.set_nonblocking(true)?;
                let result = self.stream.read(buf);
                self.stream.set_nonblocking(false)?;
                result
            }
        }
    }

    fn poll_readable(&mut self, timeout: Duration) -> std::io::Result<bool> {
        // A zero read timeout is rejected by the OS
        let timeout = timeout.max(Duration::from_millis(1));
        self.stream.set_read_timeout(Some(timeout))?;

        let mut peeked = [0u8; 1];
        let result = self.stream.peek(&mut peeked);
        self.stream.set_read_timeout(None)?;

        match result {
            Ok(_) => Ok(true),
            Err(e) => match e.kind() {
                std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted => Ok(false),
                _ => Err(e),
            },
        }
    }

    fn close(&mut self) -> std::io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != std::io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Mock Transport for Testing
// ============================================================================

#[cfg(test)]
pub struct MockTransport {
    // Chunks handed out by read (None = nothing available yet, empty = EOF)
    reads: Vec<Option<Vec<u8>>>,
    read_pos: usize,
    chunk_offset: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    // Largest number of bytes accepted per write call
    write_limit: usize,
    // Fail every write after this many bytes have been accepted
    fail_writes_after: Option<usize>,
}

#[cfg(test)]
impl MockTransport {
    pub fn new(reads: Vec<Option<Vec<u8>>>, expected_writes: Vec<u8>) -> Self {
        MockTransport {
            reads,
            read_pos: 0,
            chunk_offset: 0,
            write_log: Vec::new(),
            expected_writes,
            write_limit: usize::MAX,
            fail_writes_after: None,
        }
    }

    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = limit;
        self
    }

    pub fn with_write_failure_after(mut self, bytes: usize) -> Self {
        self.fail_writes_after = Some(bytes);
        self
    }
}

#[cfg(test)]
impl Transport for MockTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Some(limit) = self.fail_writes_after {
            if self.write_log.len() >= limit {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "Mock broken pipe",
                ));
            }
        }

        let n = buf.len().min(self.write_limit);
        self.write_log.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8], wait: Wait) -> std::io::Result<usize> {
        loop {
            // Out of responses = peer closed
            let Some(entry) = self.reads.get(self.read_pos) else {
                return Ok(0);
            };

            let Some(chunk) = entry else {
                self.read_pos += 1;
                if wait == Wait::NoWait {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::WouldBlock,
                        "Mock would block",
                    ));
                }
                // A blocking read just waits out the stall
                continue;
            };

            if chunk.is_empty() {
                self.read_pos += 1;
                return Ok(0);
            }

            let n = buf.len().min(chunk.len() - self.chunk_offset);
            buf[..n].copy_from_slice(&chunk[self.chunk_offset..self.chunk_offset + n]);
            self.chunk_offset += n;

            if self.chunk_offset == chunk.len() {
                self.read_pos += 1;
                self.chunk_offset = 0;
            }

            return Ok(n);
        }
    }

    fn poll_readable(&mut self, _timeout: Duration) -> std::io::Result<bool> {
        match self.reads.get(self.read_pos) {
            Some(None) => {
                self.read_pos += 1;
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    fn close(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl Drop for MockTransport {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.reads.len(),
            "MockTransport dropped with {} unconsumed reads (consumed {} of {})",
            self.reads.len() - self.read_pos,
            self.read_pos,
            self.reads.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockTransport write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;
    use std::net::TcpListener;

    #[rstest]
    #[case::host_and_port("server.example:18000", "server.example", 18000)]
    #[case::host_only("server.example", "server.example", 16000)]
    #[case::port_only(":17000", "localhost", 17000)]
    #[case::colon_only(":", "localhost", 16000)]
    #[case::empty("", "localhost", 16000)]
    #[case::bracketed_ipv6("[::1]:16001", "::1", 16001)]
    fn test_parse_address(#[case] address: &str, #[case] host: &str, #[case] port: u16) {
        let (h, p) = parse_address(address).expect("address should parse");
        assert_eq!(h, host);
        assert_eq!(p, port);
    }

    #[rstest]
    #[case("localhost:notaport")]
    #[case("localhost:0")]
    #[case("localhost:70000")]
    fn test_parse_address_bad_port(#[case] address: &str) {
        assert!(matches!(parse_address(address), Err(DaliError::Validation(_))));
    }

    #[test]
    fn test_tcp_transport_nowait_and_poll() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");

        let mut transport = TcpTransport::connect(&addr.to_string()).expect("connect");
        let (mut peer, _) = listener.accept().expect("accept");

        let mut buf = [0u8; 8];
        let err = transport.read(&mut buf, Wait::NoWait).expect_err("nothing sent yet");
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
        assert!(!transport.poll_readable(Duration::from_millis(20)).expect("poll"));

        peer.write_all(b"DL").expect("peer write");
        assert!(transport.poll_readable(Duration::from_secs(5)).expect("poll"));

        let n = transport.read(&mut buf, Wait::Block).expect("read");
        assert_eq!(&buf[..n], b"DL");

        drop(peer);
        assert!(transport.poll_readable(Duration::from_secs(5)).expect("poll"));
        assert_eq!(transport.read(&mut buf, Wait::Block).expect("eof"), 0);

        transport.close().expect("close");
    }
}
