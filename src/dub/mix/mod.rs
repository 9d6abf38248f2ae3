//! Translates placed speech segments and the background track into ffmpeg
//! filter graphs.
//!
//! Every graph ends in a single `[outa]` label whose length is trimmed to the
//! job duration, so all artifacts of one job line up sample for sample and can
//! be summed later without drifting.

mod util;


use std::path::{Path, PathBuf};

use super::config::DubConfig;
use super::segments::{DuckingInterval, PlacedSegment};

pub use self::util::format_time;
use self::util::{channel_layout, delay_ms, enable_between};

/// Intervals closer than this are treated as touching when coalescing.
const COALESCE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<String>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, filter: String) {
        self.filters.push(filter);
    }

    pub fn join(&self) -> String {
        self.filters.join("; ")
    }
}

/// Codec and format of one render output.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoding {
    pub codec: String,
    pub bitrate: Option<String>,
    pub sample_rate: u32,
    pub channels: u32,
}

impl AudioEncoding {
    /// Lossless PCM used for batch partials and the merged voice-over.
    pub fn intermediate(config: &DubConfig) -> Self {
        Self {
            codec: "pcm_s16le".to_string(),
            bitrate: None,
            sample_rate: config.sample_rate,
            channels: config.channels,
        }
    }

    /// Encoding of the track handed to the muxer.
    pub fn output(config: &DubConfig) -> Self {
        Self {
            codec: config.output_codec.clone(),
            bitrate: config.output_bitrate.clone(),
            sample_rate: config.sample_rate,
            channels: config.channels,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self.codec.as_str() {
            "ac3" => "ac3",
            "eac3" => "eac3",
            "aac" => "m4a",
            "flac" => "flac",
            "libopus" | "opus" => "opus",
            "libmp3lame" | "mp3" => "mp3",
            c if c.starts_with("pcm_") => "wav",
            _ => "mka",
        }
    }

    pub fn push_to(&self, args: &mut Vec<String>) {
        args.push("-c:a".to_string());
        args.push(self.codec.clone());
        if let Some(bitrate) = &self.bitrate {
            args.push("-b:a".to_string());
            args.push(bitrate.clone());
        }
        args.push("-ar".to_string());
        args.push(self.sample_rate.to_string());
        args.push("-ac".to_string());
        args.push(self.channels.to_string());
    }
}

/// How the background stream is treated before summation.
#[derive(Debug, Clone, PartialEq)]
pub enum BackgroundGain {
    /// One gain node over the whole track
    Flat(f64),
    /// Time-windowed gain overrides, one per interval
    Ducked(Vec<DuckingInterval>),
}

/// The stream the speech clips of a graph are laid over.
#[derive(Debug, Clone)]
pub enum BaseTrack<'a> {
    Background { path: &'a Path, gain: BackgroundGain },
    Silence,
}

/// One ffmpeg invocation: its inputs, filter graph and duration.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderInstructions {
    pub inputs: Vec<PathBuf>,
    pub filter_complex: String,
    pub duration: f64,
}

impl RenderInstructions {
    pub const OUTPUT_LABEL: &'static str = "outa";

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn to_args(&self, output: &Path, encoding: &AudioEncoding) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
        ];
        for input in &self.inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().into_owned());
        }
        args.push("-filter_complex".to_string());
        args.push(self.filter_complex.clone());
        args.push("-map".to_string());
        args.push(format!("[{}]", Self::OUTPUT_LABEL));
        encoding.push_to(&mut args);
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

/// Gains applied while building graphs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixLevels {
    pub voice_gain_db: f64,
    pub emphasis_voice_gain_db: f64,
    pub duck_level: f64,
    pub emphasis_duck_level: f64,
}

impl MixLevels {
    pub fn from_config(config: &DubConfig) -> Self {
        Self {
            voice_gain_db: config.voice_gain_db,
            emphasis_voice_gain_db: config.emphasis_voice_gain_db,
            duck_level: config.duck_level,
            emphasis_duck_level: config.emphasis_duck_level,
        }
    }

    fn voice_gain(&self, is_emphasis: bool) -> f64 {
        if is_emphasis {
            self.emphasis_voice_gain_db
        } else {
            self.voice_gain_db
        }
    }

    fn duck_gain(&self, is_emphasis: bool) -> f64 {
        if is_emphasis {
            self.emphasis_duck_level
        } else {
            self.duck_level
        }
    }
}

pub struct MixGraphBuilder {
    levels: MixLevels,
    sample_rate: u32,
    channels: u32,
}

impl MixGraphBuilder {
    pub fn new(config: &DubConfig) -> Self {
        Self {
            levels: MixLevels::from_config(config),
            sample_rate: config.sample_rate,
            channels: config.channels,
        }
    }

    /// Graph for a batch of speech clips laid over `base`.
    ///
    /// Input 0 is the background when there is one; the clips follow in
    /// batch order. Each clip gets a delay equal to its placement and a fixed
    /// gain chosen by its emphasis flag. Everything is summed without
    /// renormalization.
    pub fn build(
        &self,
        batch: &[PlacedSegment],
        base: BaseTrack<'_>,
        total_duration: f64,
    ) -> RenderInstructions {
        let mut filters = FilterChain::new();
        let mut inputs = Vec::with_capacity(batch.len() + 1);

        let base_label = match base {
            BaseTrack::Background { path, gain } => {
                inputs.push(path.to_path_buf());
                filters.push(self.background_chain(0, Some(&gain), total_duration, "bg"));
                "bg"
            }
            BaseTrack::Silence => {
                filters.push(self.silence_source(total_duration, "base"));
                "base"
            }
        };

        let mut labels = vec![base_label.to_string()];
        for (idx, placed) in batch.iter().enumerate() {
            let input_index = inputs.len();
            inputs.push(placed.segment.clip.clone());

            let label = format!("v{idx}");
            filters.push(self.segment_chain(placed, input_index, &label));
            labels.push(label);
        }

        self.push_sum(&mut filters, &labels, true, "first", total_duration);

        RenderInstructions {
            inputs,
            filter_complex: filters.join(),
            duration: total_duration,
        }
    }

    /// Graph that lays an already mixed voice-over track on the background.
    /// With `ducking` the background is turned down inside each interval and
    /// summed without renormalization; without it this is a plain two-input
    /// overlay at ffmpeg's default normalization.
    pub fn build_overlay(
        &self,
        background: &Path,
        voice: &Path,
        ducking: Option<&[DuckingInterval]>,
        total_duration: f64,
    ) -> RenderInstructions {
        let mut filters = FilterChain::new();
        let gain = ducking.map(|intervals| BackgroundGain::Ducked(intervals.to_vec()));

        filters.push(self.background_chain(0, gain.as_ref(), total_duration, "bg"));
        filters.push(format!("[1:a]{format}[vo]", format = self.aformat()));

        let labels = ["bg".to_string(), "vo".to_string()];
        self.push_sum(
            &mut filters,
            &labels,
            ducking.is_some(),
            "first",
            total_duration,
        );

        RenderInstructions {
            inputs: vec![background.to_path_buf(), voice.to_path_buf()],
            filter_complex: filters.join(),
            duration: total_duration,
        }
    }

    /// Graph that sums partial voice-over tracks into one.
    pub fn build_sum(&self, partials: &[PathBuf], total_duration: f64) -> RenderInstructions {
        let mut filters = FilterChain::new();
        let mut labels = Vec::with_capacity(partials.len());

        for idx in 0..partials.len() {
            let label = format!("p{idx}");
            filters.push(format!(
                "[{idx}:a]{format}[{label}]",
                format = self.aformat()
            ));
            labels.push(label);
        }

        self.push_sum(&mut filters, &labels, true, "longest", total_duration);

        RenderInstructions {
            inputs: partials.to_vec(),
            filter_complex: filters.join(),
            duration: total_duration,
        }
    }

    /// Graph that re-encodes the background alone.
    pub fn build_passthrough(&self, background: &Path, duration: f64) -> RenderInstructions {
        let mut filters = FilterChain::new();
        filters.push(format!(
            "[0:a]{format}[{out}]",
            format = self.aformat(),
            out = RenderInstructions::OUTPUT_LABEL
        ));

        RenderInstructions {
            inputs: vec![background.to_path_buf()],
            filter_complex: filters.join(),
            duration,
        }
    }

    /// Ducking intervals for a set of placements, with touching intervals of
    /// the same kind merged to keep the graph small.
    pub fn ducking_intervals(placed: &[PlacedSegment]) -> Vec<DuckingInterval> {
        let mut intervals: Vec<DuckingInterval> = Vec::with_capacity(placed.len());
        for p in placed.iter().filter(|p| p.segment.duration > 0.0) {
            let next = p.ducking_interval();
            match intervals.last_mut() {
                Some(last)
                    if last.is_emphasis == next.is_emphasis
                        && next.start - last.end <= COALESCE_EPSILON =>
                {
                    last.end = last.end.max(next.end);
                }
                _ => intervals.push(next),
            }
        }
        intervals
    }

    fn aformat(&self) -> String {
        format!(
            "aformat=sample_rates={rate}:channel_layouts={layout}",
            rate = self.sample_rate,
            layout = channel_layout(self.channels)
        )
    }

    fn silence_source(&self, total_duration: f64, label: &str) -> String {
        format!(
            "anullsrc=r={rate}:cl={layout},atrim=duration={duration}[{label}]",
            rate = self.sample_rate,
            layout = channel_layout(self.channels),
            duration = format_time(total_duration),
        )
    }

    fn segment_chain(&self, placed: &PlacedSegment, input_index: usize, label: &str) -> String {
        let delay = delay_ms(placed.placed_start);
        format!(
            "[{input}:a]{format},adelay={delay}:all=1,volume={gain:.2}dB[{label}]",
            input = input_index,
            format = self.aformat(),
            delay = delay,
            gain = self.levels.voice_gain(placed.segment.is_emphasis),
        )
    }

    /// Background padded or cut to the job duration, then gain applied.
    fn background_chain(
        &self,
        input_index: usize,
        gain: Option<&BackgroundGain>,
        total_duration: f64,
        label: &str,
    ) -> String {
        let duration = format_time(total_duration);
        let mut chain = format!(
            "[{input_index}:a]{format},apad=whole_dur={duration},atrim=duration={duration}",
            format = self.aformat(),
        );

        match gain {
            None => {}
            Some(BackgroundGain::Flat(level)) => {
                chain.push_str(&format!(",volume={level:.6}"));
            }
            Some(BackgroundGain::Ducked(intervals)) => {
                for interval in intervals {
                    chain.push_str(&format!(
                        ",volume={enable}:volume={level:.6}",
                        enable = enable_between(interval.start, interval.end),
                        level = self.levels.duck_gain(interval.is_emphasis),
                    ));
                }
            }
        }

        chain.push_str(&format!("[{label}]"));
        chain
    }

    fn push_sum(
        &self,
        filters: &mut FilterChain,
        labels: &[String],
        raw_sum: bool,
        duration_mode: &str,
        total_duration: f64,
    ) {
        let trim = format!("atrim=duration={}", format_time(total_duration));
        let out = RenderInstructions::OUTPUT_LABEL;

        if let [single] = labels {
            filters.push(format!("[{single}]{trim}[{out}]"));
            return;
        }

        let inputs = labels
            .iter()
            .map(|label| format!("[{label}]"))
            .collect::<String>();
        let normalize = if raw_sum { ":normalize=0" } else { "" };
        filters.push(format!(
            "{inputs}amix=inputs={count}{normalize}:dropout_transition=0:duration={duration_mode}[mix]",
            count = labels.len(),
        ));
        filters.push(format!("[mix]{trim}[{out}]"));
    }
}
