//! Parser for nix's fixed-output hash mismatch diagnostic.
//!
//! Derived hashes are discovered by building an attr path that is expected
//! to fail, then reading the `specified:` / `got:` pair out of the build
//! log. The diagnostic layout is stable enough to key on these anchors;
//! any deviation errors out rather than silently misreading hashes.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

const MISMATCH_MARKER: &str = "hash mismatch in fixed-output derivation";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMismatch {
    pub specified: String,
    pub got: String,
}

impl HashMismatch {
    /// Render the canonical three-line diagnostic this parser consumes.
    pub fn formatted(&self) -> String {
        format!(
            "error: {MISMATCH_MARKER} '/nix/store/0000000000000000000000000000000000-source.drv':\n         specified: {}\n            got:    {}\n",
            self.specified, self.got
        )
    }
}

// The hash lines carry variable indentation, so both patterns match the
// trailing portion of the line and are never anchored to its start.
fn specified_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"specified:\s*(\S+)\s*$").expect("specified hash regex"))
}

fn got_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"got:\s*(\S+)\s*$").expect("got hash regex"))
}

/// Extract the `(specified, got)` hash pair from a failed build's log.
///
/// The line containing the mismatch marker must be followed by the
/// `specified:` line and then the `got:` line, in that order.
pub fn find_hash_mismatch(build_log: &str) -> Result<HashMismatch> {
    let lines: Vec<&str> = build_log.lines().collect();
    let marker = lines
        .iter()
        .position(|line| line.contains(MISMATCH_MARKER))
        .ok_or_else(|| Error::HashMismatchParse("no hash mismatch message found".to_string()))?;

    let specified_line = lines.get(marker + 1).ok_or_else(|| {
        Error::HashMismatchParse("log truncated after hash mismatch line".to_string())
    })?;
    let got_line = lines.get(marker + 2).ok_or_else(|| {
        Error::HashMismatchParse("log truncated after specified hash line".to_string())
    })?;

    let specified = capture_hash(specified_re(), specified_line).ok_or_else(|| {
        Error::HashMismatchParse(format!("expected specified hash line, saw {specified_line:?}"))
    })?;
    let got = capture_hash(got_re(), got_line).ok_or_else(|| {
        Error::HashMismatchParse(format!("expected got hash line, saw {got_line:?}"))
    })?;

    Ok(HashMismatch { specified, got })
}

fn capture_hash(re: &Regex, line: &str) -> Option<String> {
    re.captures(line)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}
