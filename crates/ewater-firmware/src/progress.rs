//! esptool output parsing
//!
//! esptool redraws its progress line with `\r`, so output is split on both
//! `\r` and `\n` before looking for a percentage.

use std::sync::LazyLock;

use regex::Regex;

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*%").expect("valid percent regex"));

/// First percentage in `line`, capped at 100.
pub fn parse_progress(line: &str) -> Option<u8> {
    let captures = PERCENT.captures(line)?;
    // digits too long for u32 are still "more than 100"
    let value = captures[1].parse::<u32>().unwrap_or(u32::MAX);
    Some(value.min(100) as u8)
}

/// Splits a byte stream into trimmed, non-empty segments
#[derive(Debug, Default)]
pub struct SegmentSplitter {
    pending: Vec<u8>,
}

impl SegmentSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every segment it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut segments = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.flush_into(&mut segments);
            } else {
                self.pending.push(byte);
            }
        }
        segments
    }

    /// The trailing segment, if the stream ended without a terminator.
    pub fn finish(&mut self) -> Option<String> {
        let mut segments = Vec::new();
        self.flush_into(&mut segments);
        segments.pop()
    }

    fn flush_into(&mut self, segments: &mut Vec<String>) {
        let text = String::from_utf8_lossy(&self.pending);
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            segments.push(trimmed.to_string());
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress() {
        assert_eq!(
            parse_progress("Writing at 0x00010000... (3 %)"),
            Some(3)
        );
        assert_eq!(parse_progress("Writing at 0x000f4000... (100%)"), Some(100));
        assert_eq!(parse_progress("Hash of data verified."), None);
    }

    #[test]
    fn test_parse_progress_caps() {
        assert_eq!(parse_progress("250%"), Some(100));
        assert_eq!(parse_progress("99999999999999999999 %"), Some(100));
    }

    #[test]
    fn test_splitter_handles_carriage_returns() {
        let mut splitter = SegmentSplitter::new();
        let mut out = splitter.push(b"Writing (10 %)\rWriting (20 %)\r");
        out.extend(splitter.push(b"Writ"));
        out.extend(splitter.push(b"ing (30 %)\r\nLeaving...\n"));
        assert_eq!(
            out,
            vec![
                "Writing (10 %)",
                "Writing (20 %)",
                "Writing (30 %)",
                "Leaving..."
            ]
        );
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_splitter_finish_returns_tail() {
        let mut splitter = SegmentSplitter::new();
        assert!(splitter.push(b"Hard resetting").is_empty());
        assert_eq!(splitter.finish().as_deref(), Some("Hard resetting"));
    }
}
