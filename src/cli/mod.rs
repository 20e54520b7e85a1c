use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::jobs::{JobSettings, Language};
use crate::output::OutputKind;

#[derive(Parser, Debug)]
#[command(
    name = "transcribe",
    about = "Transcribe video files and YouTube links using Whisper",
    version,
    long_about = "Transcribe video files and YouTube links using Whisper. Writes a markdown transcript \
                  (and optionally SRT subtitles) next to the source, or runs a small HTTP job server."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe a video file or a YouTube URL
    Transcribe {
        /// Video file path or YouTube URL
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// Output directory (defaults to the source's directory, or the current one for URLs)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Also generate SRT subtitles
        #[arg(long)]
        srt: bool,

        /// Include timestamps in markdown
        #[arg(short, long)]
        timestamps: bool,

        /// Language code (auto, ru, en, ...)
        #[arg(short, long, value_name = "LANG")]
        lang: Option<String>,

        /// Whisper model (tiny, base, small, medium, large-v3)
        #[arg(short, long, value_name = "MODEL")]
        model: Option<String>,

        /// Format the text with an LLM
        #[arg(short, long = "format")]
        format: bool,
    },

    /// Run the HTTP job server
    Serve {
        /// Address to bind
        #[arg(short = 'H', long, value_name = "HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, value_name = "PORT")]
        port: Option<u16>,
    },

    /// Show or initialise the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Write the default configuration to the user config path
        #[arg(long)]
        init: bool,
    },
}

/// Job settings for a `transcribe` invocation
pub fn transcribe_settings(
    srt: bool,
    timestamps: bool,
    lang: Option<&str>,
    model: Option<&str>,
    format: bool,
    default_model: &str,
) -> JobSettings {
    JobSettings {
        language: lang.map(Language::from).unwrap_or_default(),
        model: model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(default_model)
            .to_string(),
        include_timestamps: timestamps,
        output_kind: if srt { OutputKind::Both } else { OutputKind::Markdown },
        use_text_enhancement: format,
    }
}

/// Bar message for a global progress value
pub fn stage_message(progress: u8) -> &'static str {
    match progress {
        0..=9 => "Extracting audio...",
        10..=94 => "Transcribing...",
        _ => "Finishing...",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_transcribe_flags() {
        let cli = Cli::parse_from([
            "transcribe", "transcribe", "talk.mp4", "--srt", "-t", "-l", "ru", "-m", "small", "-f",
        ]);

        match cli.command {
            Commands::Transcribe { source, srt, timestamps, lang, model, format, output } => {
                assert_eq!(source, "talk.mp4");
                assert!(srt && timestamps && format);
                assert_eq!(lang.as_deref(), Some("ru"));
                assert_eq!(model.as_deref(), Some("small"));
                assert!(output.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_transcribe_settings() {
        let settings = transcribe_settings(true, false, Some("EN"), None, false, "medium");
        assert_eq!(settings.output_kind, OutputKind::Both);
        assert_eq!(settings.language, Language::Code("en".to_string()));
        assert_eq!(settings.model, "medium");

        let settings = transcribe_settings(false, true, None, Some("tiny"), true, "medium");
        assert_eq!(settings.output_kind, OutputKind::Markdown);
        assert_eq!(settings.language, Language::Auto);
        assert!(settings.include_timestamps && settings.use_text_enhancement);
        assert_eq!(settings.model, "tiny");
    }

    #[test]
    fn test_stage_message() {
        assert_eq!(stage_message(0), "Extracting audio...");
        assert_eq!(stage_message(10), "Transcribing...");
        assert_eq!(stage_message(94), "Transcribing...");
        assert_eq!(stage_message(95), "Finishing...");
    }
}
