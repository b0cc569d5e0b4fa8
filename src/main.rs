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

// DataLink streaming client
use clap::Parser;
use dali::config::resolve_pattern;
use dali::protocol::{dltime_to_seconds, POLL_INTERVAL_MS};
use dali::state::StateFile;
use dali::{Collected, Connection, DaliError, Packet, TerminateHandle};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "daliclient")]
#[command(about = "Collect packets from a DataLink server", long_about = None)]
struct Cli {
    /// Server address as [host][:port]
    #[arg(default_value = "localhost:16000")]
    address: String,

    /// Increase verbosity, may be repeated
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print details of each received packet
    #[arg(short = 'p')]
    print_details: bool,

    /// Stream ID match expression, or @FILE with one pattern per line
    #[arg(short = 'm', value_name = "PATTERN")]
    match_pattern: Option<String>,

    /// Stream ID reject expression, or @FILE with one pattern per line
    #[arg(short = 'r', value_name = "PATTERN")]
    reject_pattern: Option<String>,

    /// Save and restore the stream position in this file
    #[arg(short = 'S', value_name = "STATEFILE")]
    state_file: Option<PathBuf>,

    /// Send a keepalive after this many idle seconds, 0 disables
    #[arg(short = 'k', default_value = "0", value_name = "SECONDS")]
    keepalive: u64,

    /// Client ID sent to the server
    #[arg(short = 'I', value_name = "CLIENTID")]
    client_id: Option<String>,

    /// Poll for packets instead of blocking
    #[arg(long)]
    nonblock: bool,
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// `program:user:pid:arch`, the conventional DataLink client ID
fn default_client_id() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    format!("daliclient:{}:{}:{}", user, std::process::id(), std::env::consts::ARCH)
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(log_level(cli.verbose))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), DaliError> {
    let client_id = cli.client_id.clone().unwrap_or_else(default_client_id);
    let state = cli.state_file.clone().map(StateFile::new);

    let mut conn = Connection::connect(&cli.address, &client_id)?;
    conn.set_keepalive(Duration::from_secs(cli.keepalive));

    // SIGINT/SIGTERM end the stream cleanly so the position can be saved
    if let Err(e) = ctrlc::set_handler(terminate_on_signal(conn.terminate_handle())) {
        warn!("cannot install signal handler: {}", e);
    }

    if let Some(state) = &state {
        if let Some(record) = state.recover()? {
            if record.address != conn.address() {
                warn!(saved = %record.address, current = %conn.address(), "state file is for another server");
            }
            if record.packet_id > 0 {
                conn.set_last_packet(record.packet_id, record.packet_time);
                let id = conn.position_resume()?;
                info!(packet_id = id, "resuming from saved position");
            }
        }
    }

    if let Some(pattern) = &cli.match_pattern {
        let pattern = resolve_pattern(pattern)?;
        let count = conn.match_streams(Some(&pattern))?;
        info!(count, "streams matched");
    }

    if let Some(pattern) = &cli.reject_pattern {
        let pattern = resolve_pattern(pattern)?;
        let count = conn.reject_streams(Some(&pattern))?;
        info!(count, "streams rejected");
    }

    let result = collect_packets(&mut conn, &cli);
    conn.disconnect();

    if let Some(state) = &state {
        save_state(&conn, state)?;
    }

    result
}

/// Signal handler body: ask the collect loop to send ENDSTREAM and wind down
fn terminate_on_signal(handle: TerminateHandle) -> impl Fn() + Send + 'static {
    move || handle.terminate()
}

fn save_state(conn: &Connection, state: &StateFile) -> Result<(), DaliError> {
    if conn.last_packet_id() >= 0 {
        state.save(conn.address(), conn.last_packet_id(), conn.last_packet_time())?;
    }
    Ok(())
}

fn collect_packets(conn: &mut Connection, cli: &Cli) -> Result<(), DaliError> {
    loop {
        let collected = if cli.nonblock {
            conn.collect_nb()?
        } else {
            conn.collect()?
        };

        match collected {
            Collected::Packet(packet) => print_packet(&packet, cli.print_details),
            Collected::NoPacket => std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS)),
            Collected::Ended => {
                info!("stream ended");
                return Ok(());
            }
        }
    }
}

fn print_packet(packet: &Packet, details: bool) {
    if details {
        println!(
            "{}, {}, {} bytes, packet time {:.6}, data {:.6} to {:.6}",
            packet.stream_id,
            packet.packet_id,
            packet.data_size,
            dltime_to_seconds(packet.packet_time),
            dltime_to_seconds(packet.data_start_time),
            dltime_to_seconds(packet.data_end_time),
        );
    } else {
        println!("{}, {}, {} bytes", packet.stream_id, packet.packet_id, packet.data_size);
    }
}
