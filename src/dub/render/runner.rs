use std::io::{self, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;

use crate::ui::prelude::{OutputFormat, get_output_format};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stderr fragments that mean ffmpeg gave up on the size of the graph
/// rather than on its content.
const TOO_LARGE_MARKERS: &[&str] = &[
    "Too many open files",
    "Too many inputs",
    "Argument list too long",
    "Cannot allocate memory",
];

pub trait FfmpegRunner: Send + Sync {
    fn run(&self, args: &[String], options: FfmpegRunOptions) -> Result<(), RunFailure>;
}

#[derive(Debug, Clone)]
pub struct FfmpegRunOptions {
    pub total_duration: Option<f64>,
    pub timeout: Duration,
    pub verbose: bool,
}

impl FfmpegRunOptions {
    pub fn new(total_duration: Option<f64>, timeout: Duration, verbose: bool) -> Self {
        Self {
            total_duration,
            timeout,
            verbose,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunFailure {
    #[error("ffmpeg exited with status {code:?}: {message}")]
    Exit { code: Option<i32>, message: String },

    #[error("ffmpeg timed out after {0:?}")]
    TimedOut(Duration),

    #[error("ffmpeg rejected the graph: {0}")]
    TooLarge(String),

    #[error("failed to run ffmpeg: {0}")]
    Spawn(String),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemFfmpegRunner;

impl FfmpegRunner for SystemFfmpegRunner {
    fn run(&self, args: &[String], options: FfmpegRunOptions) -> Result<(), RunFailure> {
        let mut child = match Command::new("ffmpeg")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) if err.kind() == io::ErrorKind::ArgumentListTooLong => {
                return Err(RunFailure::TooLarge(err.to_string()));
            }
            Err(err) => return Err(RunFailure::Spawn(err.to_string())),
        };

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunFailure::Spawn("ffmpeg stderr was not captured".to_string()))?;

        let pb = progress_bar(options.total_duration);
        let reader_pb = pb.clone();
        let verbose = options.verbose;
        let reader = thread::spawn(move || {
            let mut scan = StderrScan::default();
            let _ = read_ffmpeg_stderr(stderr, verbose, reader_pb.as_ref(), &mut scan);
            scan
        });

        let status = wait_with_deadline(&mut child, options.timeout);
        let scan = reader.join().unwrap_or_default();

        if let Some(pb) = pb {
            match &status {
                Ok(s) if s.success() => pb.finish_with_message("done"),
                _ => pb.abandon_with_message("failed"),
            }
        }

        let status = status?;
        if status.success() {
            return Ok(());
        }

        let message = scan.summary();
        if scan.too_large {
            return Err(RunFailure::TooLarge(message));
        }
        Err(RunFailure::Exit {
            code: status.code(),
            message,
        })
    }
}

fn wait_with_deadline(
    child: &mut std::process::Child,
    timeout: Duration,
) -> Result<ExitStatus, RunFailure> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RunFailure::TimedOut(timeout));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RunFailure::Spawn(err.to_string()));
            }
        }
    }
}

fn progress_bar(total_duration: Option<f64>) -> Option<ProgressBar> {
    let duration = total_duration?;
    if get_output_format() == OutputFormat::Json {
        return None;
    }

    let pb = ProgressBar::new((duration * 1000.0) as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>8}/{len:8} ({eta}) {msg}")
    {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏ "));
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("rendering".to_string());
    Some(pb)
}

#[derive(Debug, Default)]
struct StderrScan {
    last_line: String,
    error_lines: Vec<String>,
    too_large: bool,
}

impl StderrScan {
    fn observe(&mut self, line: &str) {
        self.last_line = line.to_string();

        if line.contains("error") || line.contains("Error") || line.contains("ERROR") {
            self.error_lines.push(line.to_string());
        }
        if TOO_LARGE_MARKERS.iter().any(|marker| line.contains(marker)) {
            self.too_large = true;
        }
    }

    fn summary(&self) -> String {
        let message = if self.error_lines.is_empty() {
            self.last_line.clone()
        } else {
            self.error_lines.join("\n")
        };
        message.trim().to_string()
    }
}

fn read_ffmpeg_stderr<R: Read>(
    mut stderr: R,
    verbose: bool,
    pb: Option<&ProgressBar>,
    scan: &mut StderrScan,
) -> io::Result<()> {
    let mut buffer = [0u8; 4096];
    let mut accumulated = String::new();

    loop {
        let bytes_read = stderr.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }

        accumulated.push_str(&String::from_utf8_lossy(&buffer[..bytes_read]));

        while let Some(pos) = accumulated.find(['\r', '\n']) {
            let line = accumulated[..pos].to_string();
            accumulated.drain(..=pos);

            if line.is_empty() {
                continue;
            }

            if verbose {
                match pb {
                    Some(pb) => pb.println(&line),
                    None => eprintln!("{}", line),
                }
            }

            scan.observe(&line);

            if let Some(pb) = pb
                && let Some(progress) = parse_ffmpeg_progress(&line)
            {
                pb.set_position((progress * 1000.0) as u64);
                if let Some(speed) = parse_ffmpeg_speed(&line) {
                    pb.set_message(speed);
                }
            }
        }
    }

    if !accumulated.trim().is_empty() {
        scan.observe(accumulated.trim());
    }

    Ok(())
}

fn parse_ffmpeg_progress(line: &str) -> Option<f64> {
    let time_start = line.find("time=")?;
    let time_str = &line[time_start + 5..];
    let time_end = time_str.find(' ')?;
    parse_time_to_seconds(&time_str[..time_end])
}

fn parse_time_to_seconds(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

fn parse_ffmpeg_speed(line: &str) -> Option<String> {
    let speed_start = line.find("speed=")?;
    let speed_str = line[speed_start + 6..].trim_start();
    let speed_end = speed_str.find('x')?;
    Some(speed_str[..speed_end + 1].to_string())
}
