mod common;
mod dub;
mod ui;

use clap::{Parser, Subcommand};

use crate::dub::{ConfigCommands, DubArgs};
use crate::ui::prelude::*;

/// Dubber main parser
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Activate debug mode
    #[arg(short, long, global = true)]
    debug: bool,

    /// Output format for messages
    #[arg(long, value_enum, global = true, default_value = "text")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dub a video: speak its subtitles over the original audio
    Dub(DubArgs),

    /// Inspect the dub configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    ui::init(cli.output, !cli.no_color);
    ui::set_debug_mode(cli.debug);

    let result = match cli.command {
        Commands::Dub(args) => dub::handle_dub_command(args).await,
        Commands::Config { command } => dub::handle_config_command(command),
    };

    if let Err(e) = result {
        emit(Level::Error, "cli.error", &format!("{e:#}"), None);
        std::process::exit(1);
    }
}
