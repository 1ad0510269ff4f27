//! Streaming log cleaner.
//!
//! Turns raw agent output into a readable log: escape sequences and carriage
//! returns are stripped, transient network-error blocks (an HTML error page
//! dumped by a dropped connection) are dropped and runs of blank lines are
//! collapsed. Input is line-buffered so the clean log grows with the raw one.

use regex::Regex;
use std::collections::VecDeque;
use std::sync::LazyLock;

/// Number of non-blank lines kept for the output tail.
pub const TAIL_LINES: usize = 30;

/// A partial line longer than this is flushed without waiting for `\n`.
const MAX_PENDING: usize = 64 * 1024;

static ANSI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;]*[a-zA-Z]|\x1b\][^\x07]*\x07|\x1b\[\?[0-9;]*[a-zA-Z]|\r")
        .expect("ansi regex is valid")
});

static NOISE_BLOCK_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)Error:\s*peer closed connection|Error:\s*incomplete chunked read|^\s*<html>\s*$",
    )
    .expect("noise block start regex is valid")
});

static NOISE_BLOCK_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</html>").expect("noise block end regex is valid"));

static NOISE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*Error:\s*peer closed connection|^\s*\(incomplete chunked read\)\s*$")
        .expect("noise line regex is valid")
});

/// Remove escape sequences and carriage returns.
pub fn strip_ansi(text: &str) -> String {
    ANSI.replace_all(text, "").into_owned()
}

/// Line-buffered sanitizer state.
#[derive(Debug, Default)]
pub struct LogSanitizer {
    pending: Vec<u8>,
    in_noise: bool,
    prev_blank: bool,
    tail: VecDeque<String>,
}

impl LogSanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw chunk; returns the clean text of every completed line.
    pub fn feed(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();

        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.push_line(&String::from_utf8_lossy(&line), &mut out);
        }

        if self.pending.len() > MAX_PENDING {
            let line = std::mem::take(&mut self.pending);
            self.push_line(&String::from_utf8_lossy(&line), &mut out);
        }
        out
    }

    /// Flush a trailing partial line.
    pub fn finish(&mut self) -> String {
        let mut out = String::new();
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.push_line(&String::from_utf8_lossy(&line), &mut out);
        }
        out
    }

    /// Last non-blank clean lines, oldest first.
    pub fn tail(&self) -> Vec<String> {
        self.tail.iter().cloned().collect()
    }

    fn push_line(&mut self, raw: &str, out: &mut String) {
        let line = strip_ansi(raw);
        let trimmed = line.trim();

        if self.in_noise {
            if NOISE_BLOCK_END.is_match(trimmed) {
                self.in_noise = false;
            }
            return;
        }
        if NOISE_BLOCK_START.is_match(trimmed) {
            self.in_noise = true;
            return;
        }
        if NOISE_LINE.is_match(trimmed) {
            return;
        }

        let blank = trimmed.is_empty();
        if blank && self.prev_blank {
            return;
        }
        self.prev_blank = blank;

        out.push_str(&line);
        if !blank {
            if self.tail.len() == TAIL_LINES {
                self.tail.pop_front();
            }
            self.tail.push_back(trimmed.to_string());
        }
    }
}

/// Clean a complete log in one go.
pub fn sanitize(raw: &[u8]) -> String {
    let mut sanitizer = LogSanitizer::new();
    let mut out = sanitizer.feed(raw);
    out.push_str(&sanitizer.finish());
    out
}
