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

use std::path::Path;
use tracing::debug;
use crate::error::{DaliError, Result};

/// Lines starting with one of these are comments
const COMMENT_MARKERS: [char; 2] = ['#', '*'];

/// Join the patterns listed one per line into a single `a|b|c` expression.
///
/// Blank lines and comment lines are skipped.
pub fn parse_pattern_list(contents: &str) -> Option<String> {
    let patterns: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_MARKERS))
        .collect();

    (!patterns.is_empty()).then(|| patterns.join("|"))
}

/// Read a stream list file for MATCH or REJECT.
pub fn read_pattern_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let file_error = |reason: String| DaliError::File {
        path: path.display().to_string(),
        reason,
    };

    let contents = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
    let pattern = parse_pattern_list(&contents)
        .ok_or_else(|| file_error("no stream patterns found".to_string()))?;

    debug!(path = %path.display(), %pattern, "read stream list");
    Ok(pattern)
}

/// A `-m`/`-r` argument: either a pattern, or `@file` naming a stream list.
pub fn resolve_pattern(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => read_pattern_file(path),
        None => Ok(arg.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("dali-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).expect("write scratch file");
        path
    }

    #[test]
    fn test_pattern_list_skips_comments_and_blanks() {
        let contents = "# stations\nXX_ABC.*\n\n* disabled\n  YY_DEF/MSEED  \n";
        assert_eq!(parse_pattern_list(contents).as_deref(), Some("XX_ABC.*|YY_DEF/MSEED"));
    }

    #[test]
    fn test_pattern_list_empty() {
        assert_eq!(parse_pattern_list("# nothing\n\n"), None);
    }

    #[test]
    fn test_read_pattern_file() {
        let path = scratch_file("streams.list", "A.*\nB.*\n");
        assert_eq!(read_pattern_file(&path).expect("read"), "A.*|B.*");
        assert_eq!(resolve_pattern(&format!("@{}", path.display())).expect("resolve"), "A.*|B.*");
        std::fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn test_read_pattern_file_errors() {
        let missing = std::env::temp_dir().join("dali-definitely-missing.list");
        assert!(matches!(read_pattern_file(&missing), Err(DaliError::File { .. })));

        let path = scratch_file("empty.list", "# only comments\n");
        assert!(matches!(read_pattern_file(&path), Err(DaliError::File { .. })));
        std::fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn test_resolve_plain_pattern() {
        assert_eq!(resolve_pattern("^XX_.*").expect("plain"), "^XX_.*");
    }
}
