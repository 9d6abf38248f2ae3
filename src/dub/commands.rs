use anyhow::Result;

use super::cli::{ConfigCommands, DubArgs};
use super::config::{DubConfig, config_path};
use super::pipeline::{DubRequest, default_output_path, print_report, run_dub_job};

pub async fn handle_dub_command(args: DubArgs) -> Result<()> {
    let config = apply_overrides(DubConfig::load()?, &args);
    let request = DubRequest {
        output: args
            .out_file
            .clone()
            .unwrap_or_else(|| default_output_path(&args.video)),
        video: args.video,
        subtitles: args.subtitles,
        keep_workspace: args.keep_workspace,
        dry_run: args.dry_run,
        verbose: args.verbose,
    };

    if let Some(report) = run_dub_job(request, config).await? {
        print_report(&report);
    }
    Ok(())
}

pub fn handle_config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => print!("{}", DubConfig::load()?.to_toml()?),
        ConfigCommands::Path => println!("{}", config_path()?.display()),
    }
    Ok(())
}

fn apply_overrides(mut config: DubConfig, args: &DubArgs) -> DubConfig {
    if let Some(language) = &args.language {
        config.language = language.clone();
    }
    if let Some(name) = &args.track_name {
        config.track_name = name.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(timeout) = args.timeout {
        config.render_timeout_secs = timeout;
    }
    if let Some(speed) = args.speed {
        config.speech_rate = speed;
    }
    config.sanitized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args() -> DubArgs {
        DubArgs {
            video: PathBuf::from("in.mp4"),
            subtitles: PathBuf::from("in.srt"),
            out_file: None,
            language: None,
            track_name: None,
            batch_size: None,
            timeout: None,
            speed: None,
            keep_workspace: false,
            dry_run: false,
            verbose: false,
        }
    }

    #[test]
    fn flags_override_config() {
        let args = DubArgs {
            language: Some("fi".to_string()),
            batch_size: Some(12),
            timeout: Some(30),
            speed: Some(1.0),
            ..args()
        };

        let config = apply_overrides(DubConfig::default(), &args);

        assert_eq!(config.language, "fi");
        assert_eq!(config.batch_size, 12);
        assert_eq!(config.render_timeout_secs, 30);
        assert_eq!(config.speech_rate, 1.0);
        assert_eq!(config.track_name, "AI Dubbed Audio");
    }

    #[test]
    fn invalid_overrides_fall_back_to_defaults() {
        let args = DubArgs {
            batch_size: Some(0),
            speed: Some(0.1),
            ..args()
        };

        let config = apply_overrides(DubConfig::default(), &args);

        assert_eq!(config.batch_size, DubConfig::DEFAULT_BATCH_SIZE);
        assert_eq!(config.speech_rate, 1.25);
    }
}
