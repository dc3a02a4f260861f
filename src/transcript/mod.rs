//! Transcript parsing
//!
//! Turns the combined, speaker-labelled transcript text into ordered
//! [`Utterance`] records. The expected layout is a header line per speaker
//! turn followed by indented lines of spoken text:
//!
//! ```text
//! [00:01:05 - 00:01:12] 🎤 Alice:
//!    Let's go over the rollout plan.
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::Lines;
use std::sync::OnceLock;

/// One speaker turn parsed from the transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Start offset in seconds
    pub start_time: f64,
    /// End offset in seconds (never before `start_time`)
    pub end_time: f64,
    pub speaker: String,
    /// Spoken text, continuation lines trimmed and space-joined
    pub text: String,
    /// Header line plus the untouched continuation lines
    pub raw_text: String,
}

impl Utterance {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

fn header_regex() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        Regex::new(
            r"^\[(\d{1,2}):(\d{2}):(\d{2})\s*-\s*(\d{1,2}):(\d{2}):(\d{2})\]\s*\S+\s+(.+?):\s*$",
        )
        .expect("transcript header pattern is valid")
    })
}

/// Parsed header of a speaker turn
struct Header {
    start_time: f64,
    end_time: f64,
    speaker: String,
}

fn parse_header(line: &str) -> Option<Header> {
    let caps = header_regex().captures(line)?;

    let field = |i: usize| -> f64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(0) as f64
    };

    let start_time = field(1) * 3600.0 + field(2) * 60.0 + field(3);
    let mut end_time = field(4) * 3600.0 + field(5) * 60.0 + field(6);
    if end_time < start_time {
        tracing::debug!("Clamping inverted time range in header: {}", line);
        end_time = start_time;
    }

    Some(Header {
        start_time,
        end_time,
        speaker: caps.get(7)?.as_str().trim().to_string(),
    })
}

/// Lazy iterator over the utterances of a transcript.
///
/// Single pass: once exhausted it stays exhausted.
pub struct Utterances<'a> {
    lines: Lines<'a>,
    open: Option<Utterance>,
}

impl<'a> Utterances<'a> {
    pub fn new(content: &'a str) -> Self {
        Self {
            lines: content.lines(),
            open: None,
        }
    }

    fn close(&mut self, next: Option<Utterance>) -> Option<Utterance> {
        let previous = std::mem::replace(&mut self.open, next);
        previous.filter(|u| !u.text.trim().is_empty())
    }
}

impl Iterator for Utterances<'_> {
    type Item = Utterance;

    fn next(&mut self) -> Option<Utterance> {
        while let Some(line) = self.lines.next() {
            if let Some(header) = parse_header(line) {
                let opened = Utterance {
                    start_time: header.start_time,
                    end_time: header.end_time,
                    speaker: header.speaker,
                    text: String::new(),
                    raw_text: line.to_string(),
                };
                if let Some(done) = self.close(Some(opened)) {
                    return Some(done);
                }
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            // Text before the first header has no owner and is dropped
            if let Some(current) = self.open.as_mut() {
                if !current.text.is_empty() {
                    current.text.push(' ');
                }
                current.text.push_str(trimmed);
                current.raw_text.push('\n');
                current.raw_text.push_str(line);
            }
        }

        self.close(None)
    }
}

/// Parse the full transcript into utterances
pub fn parse_transcript(content: &str) -> Vec<Utterance> {
    Utterances::new(content).collect()
}

/// Format seconds as `m:ss`, or `h:mm:ss` past the first hour
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
