use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediaforge")]
#[command(author, version, about = "Upload-and-transform media job service")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP job service
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one transformation locally and wait for it
    Run {
        /// Input media file
        #[arg(required = true)]
        input: PathBuf,

        /// Operation: transcode, trim or overlay_text
        #[arg(long = "op", default_value = "transcode")]
        operation: String,

        /// Output format (mp4, mov, mkv, webm, mp3, wav, aac, m4a, flac)
        #[arg(long)]
        format: Option<String>,

        /// Trim start ([HH:]MM:SS[.fff] or seconds)
        #[arg(long)]
        start: Option<String>,

        /// Trim end
        #[arg(long)]
        end: Option<String>,

        /// Overlay text
        #[arg(long)]
        text: Option<String>,

        /// Overlay font name from the config
        #[arg(long)]
        font: Option<String>,

        /// Extra parameter such as title=Demo (repeatable)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Copy the result here instead of leaving it in the output directory
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}
