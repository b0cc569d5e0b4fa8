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

//! Saved client position, one line of `<address> <packet id> <packet time>`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use crate::error::{DaliError, Result};
use crate::protocol::DlTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    pub address: String,
    pub packet_id: i64,
    pub packet_time: DlTime,
}

impl StateRecord {
    fn parse(line: &str) -> Option<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [address, packet_id, packet_time] = fields[..] else {
            return None;
        };

        Some(StateRecord {
            address: address.to_string(),
            packet_id: packet_id.parse().ok()?,
            packet_time: packet_time.parse().ok()?,
        })
    }
}

pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error(&self, reason: impl Into<String>) -> DaliError {
        DaliError::File {
            path: self.path.display().to_string(),
            reason: reason.into(),
        }
    }

    pub fn save(&self, address: &str, packet_id: i64, packet_time: DlTime) -> Result<()> {
        let line = format!("{} {} {}\n", address, packet_id, packet_time);
        std::fs::write(&self.path, line).map_err(|e| self.error(format!("cannot write state: {}", e)))?;
        debug!(path = %self.path.display(), packet_id, "saved connection state");
        Ok(())
    }

    /// `Ok(None)` when no state has been saved yet.
    pub fn recover(&self) -> Result<Option<StateRecord>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no state file found");
                return Ok(None);
            }
            Err(e) => return Err(self.error(format!("cannot read state: {}", e))),
        };

        let line = contents
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| self.error("state file is empty"))?;

        let record = StateRecord::parse(line)
            .ok_or_else(|| self.error(format!("cannot parse state '{}'", line.trim())))?;

        info!(
            path = %self.path.display(),
            packet_id = record.packet_id,
            "recovered connection state"
        );
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    fn scratch(name: &str) -> StateFile {
        StateFile::new(std::env::temp_dir().join(format!("dali-{}-{}.state", std::process::id(), name)))
    }

    #[test]
    fn test_save_then_recover() {
        let state = scratch("roundtrip");
        state.save("server.example:16000", 4521, 1_200_000_000_000_000).expect("save");

        let contents = std::fs::read_to_string(state.path()).expect("read back");
        assert_eq!(contents, "server.example:16000 4521 1200000000000000\n");

        let record = state.recover().expect("recover").expect("record present");
        assert_eq!(
            record,
            StateRecord {
                address: "server.example:16000".to_string(),
                packet_id: 4521,
                packet_time: 1_200_000_000_000_000,
            }
        );
        std::fs::remove_file(state.path()).expect("cleanup");
    }

    #[test]
    fn test_recover_missing_file() {
        let state = scratch("missing");
        assert_eq!(state.recover().expect("missing is fine"), None);
    }

    #[rstest]
    #[case::empty("")]
    #[case::too_few_fields("localhost:16000 12\n")]
    #[case::bad_id("localhost:16000 twelve 0\n")]
    fn test_recover_malformed(#[case] contents: &str) {
        let state = scratch(&format!("malformed-{}", contents.len()));
        std::fs::write(state.path(), contents).expect("write");
        assert!(matches!(state.recover(), Err(DaliError::File { .. })));
        std::fs::remove_file(state.path()).expect("cleanup");
    }
}
