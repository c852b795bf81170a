//! Normalized transcript and SRT conversion

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// Source that supplied a transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Remote,
    Local,
    Asr,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Remote => "remote",
            Tier::Local => "local",
            Tier::Asr => "asr",
        })
    }
}

/// One time-stamped piece of text (seconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Ordered list of segments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub segments: Vec<Segment>,
}

/// Transcript plus the tier that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct AcquiredTranscript {
    pub transcript: Transcript,
    pub tier: Tier,
}

/// Malformed SRT input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed SRT: {0}")]
pub struct SrtError(pub String);

fn timing_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(\d{1,2}):(\d{2}):(\d{2})[,.](\d{1,3})\s*-->\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{1,3})",
        )
        .expect("timing regex is valid")
    })
}

/// Format seconds as `HH:MM:SS,mmm`
pub fn format_srt_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        ms
    )
}

fn captured_seconds(caps: &regex::Captures<'_>, first: usize) -> f64 {
    let field = |i: usize| -> f64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    let millis_str = caps.get(first + 3).map(|m| m.as_str()).unwrap_or("0");
    // "5" means 500 ms, "05" means 50 ms
    let millis = format!("{:0<3}", millis_str).parse::<f64>().unwrap_or(0.0);
    field(first) * 3600.0 + field(first + 1) * 60.0 + field(first + 2) + millis / 1000.0
}

impl Transcript {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// True when no segment carries text
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.text.trim().is_empty())
    }

    /// Text only, one segment per line, for the generation backend
    pub fn plain_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `[HH:MM:SS,mmm] text` lines
    pub fn timestamped_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| format!("[{}] {}", format_srt_timestamp(s.start), s.text.trim()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_srt(&self) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments.iter().enumerate() {
            out.push_str(&format!(
                "{}\n{} --> {}\n{}\n\n",
                i + 1,
                format_srt_timestamp(segment.start),
                format_srt_timestamp(segment.end),
                segment.text.trim()
            ));
        }
        out
    }

    /// Parse SRT text; tolerates a BOM, CRLF line endings and missing indices
    pub fn from_srt(input: &str) -> Result<Self, SrtError> {
        let normalized = input.trim_start_matches('\u{feff}').replace("\r\n", "\n");
        let mut segments = Vec::new();

        for block in normalized.split("\n\n") {
            let lines: Vec<&str> = block.lines().filter(|l| !l.trim().is_empty()).collect();
            if lines.is_empty() {
                continue;
            }

            let timing_idx = match lines.iter().position(|l| timing_line().is_match(l.trim())) {
                Some(idx) if idx <= 1 => idx,
                _ => return Err(SrtError(format!("block without timing line: {:?}", lines[0]))),
            };

            let caps = timing_line()
                .captures(lines[timing_idx].trim())
                .ok_or_else(|| SrtError(lines[timing_idx].to_string()))?;

            segments.push(Segment {
                start: captured_seconds(&caps, 1),
                end: captured_seconds(&caps, 5),
                text: lines[timing_idx + 1..].join("\n"),
            });
        }

        Ok(Self { segments })
    }
}
