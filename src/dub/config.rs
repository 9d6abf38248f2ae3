use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::paths;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DubConfig {
    /// Segments per batch when the single-pass render has to be split
    pub batch_size: usize,
    /// Input count above which a render graph is rejected before ffmpeg runs
    pub max_render_inputs: usize,
    /// Total argument bytes above which a render graph is rejected
    pub max_command_bytes: usize,
    /// Timeout for a single ffmpeg render invocation, in seconds
    pub render_timeout_secs: u64,
    /// Timeout for a single synthesis command or clip conversion, in seconds
    pub synthesis_timeout_secs: u64,
    pub sample_rate: u32,
    pub channels: u32,
    /// Gain applied to normal speech clips (dB)
    pub voice_gain_db: f64,
    /// Gain applied to emphasis speech clips (dB)
    pub emphasis_voice_gain_db: f64,
    /// Background gain while normal speech plays (0.0-1.0)
    pub duck_level: f64,
    /// Background gain while emphasis speech plays (0.0-1.0)
    pub emphasis_duck_level: f64,
    /// Duck the background in the single-pass render instead of a flat gain
    pub duck_single_pass: bool,
    pub output_codec: String,
    pub output_bitrate: Option<String>,
    /// Tempo factor applied to synthesized speech
    pub speech_rate: f64,
    /// Target language code, used for synthesis and the track tag
    pub language: String,
    pub track_name: String,
    /// Synthesis command; `{text}`, `{lang}` and `{output}` are substituted
    pub tts_command: Vec<String>,
}

impl Default for DubConfig {
    fn default() -> Self {
        Self {
            batch_size: Self::DEFAULT_BATCH_SIZE,
            max_render_inputs: 250,
            max_command_bytes: 128 * 1024,
            render_timeout_secs: Self::DEFAULT_RENDER_TIMEOUT_SECS,
            synthesis_timeout_secs: 60,
            sample_rate: 48_000,
            channels: 2,
            voice_gain_db: -8.0,
            emphasis_voice_gain_db: -5.0,
            duck_level: Self::DEFAULT_DUCK_LEVEL,
            emphasis_duck_level: Self::DEFAULT_EMPHASIS_DUCK_LEVEL,
            duck_single_pass: true,
            output_codec: "ac3".to_string(),
            output_bitrate: Some("192k".to_string()),
            speech_rate: 1.25,
            language: "et".to_string(),
            track_name: "AI Dubbed Audio".to_string(),
            // "--" stops dialogue lines like "- Hello" from parsing as options
            tts_command: [
                "gtts-cli", "--lang", "{lang}", "--output", "{output}", "--", "{text}",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl DubConfig {
    pub const DEFAULT_BATCH_SIZE: usize = 40;
    pub const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 900;
    pub const DEFAULT_DUCK_LEVEL: f64 = 0.2;
    pub const DEFAULT_EMPHASIS_DUCK_LEVEL: f64 = 0.6;

    pub fn load() -> Result<Self> {
        Self::load_from_path(config_path()?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let config = Self::default();
            config.save_to_path(path)?;
            return Ok(config);
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading dub config from {}", path.display()))?;
        let config: Self = toml::from_str(&contents).context("parsing dub config")?;
        Ok(config.sanitized())
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating dub config directory {}", parent.display()))?;
        }

        fs::write(path, self.to_toml()?)
            .with_context(|| format!("writing dub config to {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serializing dub config")
    }

    /// Replace values that would make rendering impossible with defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.batch_size == 0 {
            self.batch_size = defaults.batch_size;
        }
        if self.max_render_inputs < 2 {
            self.max_render_inputs = defaults.max_render_inputs;
        }
        if self.max_command_bytes == 0 {
            self.max_command_bytes = defaults.max_command_bytes;
        }
        if self.render_timeout_secs == 0 {
            self.render_timeout_secs = defaults.render_timeout_secs;
        }
        if self.synthesis_timeout_secs == 0 {
            self.synthesis_timeout_secs = defaults.synthesis_timeout_secs;
        }
        if self.sample_rate == 0 {
            self.sample_rate = defaults.sample_rate;
        }
        if self.channels == 0 {
            self.channels = defaults.channels;
        }
        if !valid_gain(self.duck_level) {
            self.duck_level = defaults.duck_level;
        }
        if !valid_gain(self.emphasis_duck_level) {
            self.emphasis_duck_level = defaults.emphasis_duck_level;
        }
        if !self.voice_gain_db.is_finite() {
            self.voice_gain_db = defaults.voice_gain_db;
        }
        if !self.emphasis_voice_gain_db.is_finite() {
            self.emphasis_voice_gain_db = defaults.emphasis_voice_gain_db;
        }
        // atempo accepts 0.5..=100 per filter instance
        if !self.speech_rate.is_finite() || !(0.5..=100.0).contains(&self.speech_rate) {
            self.speech_rate = defaults.speech_rate;
        }
        if self.output_codec.trim().is_empty() {
            self.output_codec = defaults.output_codec;
        }
        if self.tts_command.is_empty() {
            self.tts_command = defaults.tts_command;
        }
        self
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render_timeout_secs)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }
}

fn valid_gain(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(paths::dubber_config_dir()?.join("dub.toml"))
}
