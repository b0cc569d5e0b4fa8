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

//! Client side of the DataLink protocol: framing, request/reply transactions
//! and packet streaming over TCP.

pub mod codec;
pub mod config;
pub mod protocol;
pub mod state;
pub mod timer;
pub mod transport;

mod connection;
mod error;
mod packet;
mod reply;
mod stream;
mod transaction;

pub use connection::{Connection, StreamState, TerminateHandle};
pub use error::{DaliError, Result};
pub use packet::Packet;
pub use reply::{Reply, ReplyStatus};
pub use stream::Collected;
