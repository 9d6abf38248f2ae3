use anyhow::{Context, Result, bail};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;
use std::time::Duration;

use super::logging::log_event;
use crate::ui::prelude::Level;

lazy_static! {
    static ref MARKUP: Regex = Regex::new(r"<[^>]*>|\{\\[^}]*\}").expect("valid markup pattern");
    static ref EMPHASIS: Regex = Regex::new(r"(?i)</?i>|\{\\i1\}").expect("valid emphasis pattern");
}

/// One subtitle cue, ready for synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleLine {
    pub start: Duration,
    pub end: Duration,
    /// Text with markup removed
    pub text: String,
    pub is_emphasis: bool,
}

pub fn load_subtitles(path: &Path) -> Result<Vec<SubtitleLine>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read subtitles from {}", path.display()))?;
    let (contents, encoding) = decode_subtitle_bytes(&bytes);
    log_event(
        Level::Debug,
        "dub.subtitles.encoding",
        format!("Reading {} as {encoding}", path.display()),
    );
    parse_srt(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Decode UTF-8 (with or without BOM), falling back to Windows-1252 for
/// legacy subtitle files.
pub fn decode_subtitle_bytes(bytes: &[u8]) -> (String, &'static str) {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), "utf-8"),
        Err(_) => (bytes.iter().map(|&b| windows_1252_char(b)).collect(), "windows-1252"),
    }
}

fn windows_1252_char(byte: u8) -> char {
    const HIGH: [char; 32] = [
        '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8d}', 'Ž',
        '\u{8f}', '\u{90}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ', '\u{9d}',
        'ž', 'Ÿ',
    ];
    match byte {
        0x80..=0x9f => HIGH[(byte - 0x80) as usize],
        _ => byte as char,
    }
}

pub fn parse_srt(input: &str) -> Result<Vec<SubtitleLine>> {
    let mut cues = Vec::new();
    let mut lines = input.lines().peekable();

    while let Some(line) = lines.next() {
        let mut header = line.trim();
        if header.is_empty() {
            continue;
        }

        // The index line is optional; the cue starts at the timing line.
        if !header.contains("-->") {
            header = lines
                .next()
                .map(str::trim)
                .context("SRT cue is missing a timestamp line")?;
        }

        let (start_raw, end_raw) = header
            .split_once("-->")
            .map(|(a, b)| (a.trim(), b.trim()))
            .context("SRT cue timestamp line must contain '-->'")?;
        // drop position hints such as "X1:100 X2:200"
        let end_raw = end_raw.split_whitespace().next().unwrap_or(end_raw);

        let start = parse_timestamp(start_raw)
            .with_context(|| format!("Failed to parse SRT start timestamp '{start_raw}'"))?;
        let end = parse_timestamp(end_raw)
            .with_context(|| format!("Failed to parse SRT end timestamp '{end_raw}'"))?;

        if end < start {
            bail!("SRT cue ends before it starts: {start_raw} --> {end_raw}");
        }

        let mut text_lines = Vec::new();
        while let Some(next) = lines.next_if(|next| !next.trim().is_empty()) {
            text_lines.push(next.trim());
        }

        let raw = text_lines.join(" ");
        let text = strip_markup(&raw);
        if text.is_empty() {
            log_event(
                Level::Debug,
                "dub.subtitles.empty",
                format!("Skipping cue at {start_raw} with no speakable text"),
            );
            continue;
        }

        cues.push(SubtitleLine {
            start,
            end,
            text,
            is_emphasis: is_emphasis(&raw),
        });
    }

    cues.sort_by_key(|cue| cue.start);
    Ok(cues)
}

pub fn is_emphasis(raw: &str) -> bool {
    EMPHASIS.is_match(raw)
}

pub fn strip_markup(raw: &str) -> String {
    MARKUP
        .replace_all(raw, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_timestamp(value: &str) -> Result<Duration> {
    let cleaned = value.trim().replace(',', ".");
    let (time_part, fractional_part) = cleaned.split_once('.').unwrap_or((cleaned.as_str(), "0"));

    let mut hms = time_part.split(':');
    let hours = hms
        .next()
        .context("Timestamp missing hours")?
        .parse::<u64>()
        .context("Invalid hours in timestamp")?;
    let minutes = hms
        .next()
        .context("Timestamp missing minutes")?
        .parse::<u64>()
        .context("Invalid minutes in timestamp")?;
    let seconds = hms
        .next()
        .context("Timestamp missing seconds")?
        .parse::<u64>()
        .context("Invalid seconds in timestamp")?;

    if hms.next().is_some() {
        bail!("Timestamp has more than three components: {value}");
    }

    let mut millis_str: String = fractional_part.chars().take(3).collect();
    while millis_str.len() < 3 {
        millis_str.push('0');
    }
    let millis = millis_str
        .parse::<u64>()
        .context("Invalid millisecond component in timestamp")?;

    let total_seconds = hours * 3600 + minutes * 60 + seconds;
    Ok(Duration::from_secs(total_seconds) + Duration::from_millis(millis))
}
