use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use video_transcriber::cli::{self, Cli, Commands};
use video_transcriber::extractors::Source;
use video_transcriber::{server, utils, Config, TranscriberError, TranscriptionPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.json_logs);

    let mut config = Config::load().await?;

    match cli.command {
        Commands::Transcribe {
            source,
            output,
            srt,
            timestamps,
            lang,
            model,
            format,
        } => {
            let source = Source::detect(&source);
            if let Source::LocalFile(path) = &source {
                if !path.exists() {
                    eprintln!("{} File not found: {}", style("Error:").red().bold(), path.display());
                    std::process::exit(1);
                }
            }

            let missing = utils::check_dependencies(&config).await;
            if !missing.is_empty() {
                eprintln!("{}", style("Dependency check warnings:").yellow());
                for dep in missing {
                    eprintln!("   • {}", dep);
                }
            }

            let settings = cli::transcribe_settings(
                srt,
                timestamps,
                lang.as_deref(),
                model.as_deref(),
                format,
                &config.whisper.default_model,
            );

            let pipeline = TranscriptionPipeline::new(&config);
            if settings.use_text_enhancement && !pipeline.enhancement_available() {
                eprintln!(
                    "{} no API key configured, text formatting is skipped",
                    style("Warning:").yellow()
                );
            }

            match &source {
                Source::LocalFile(path) => println!("{} {}", style("Transcribing:").blue(), path.display()),
                Source::RemoteUrl(video) => println!("{} {}", style("Downloading:").blue(), video.url),
            }
            println!(
                "{}",
                style(format!("Model: {}, Language: {}", settings.model, settings.language)).dim()
            );

            let bar = progress_bar(cli.quiet);
            let on_progress = {
                let bar = bar.clone();
                move |progress: u8| {
                    bar.set_position(progress as u64);
                    bar.set_message(cli::stage_message(progress));
                }
            };

            match pipeline
                .transcribe_source(&source, &settings, output.as_deref(), on_progress)
                .await
            {
                Ok(outcome) => {
                    bar.finish_and_clear();
                    for path in &outcome.outputs {
                        println!("{} Saved to: {}", style("✓").green(), path.display());
                    }
                    println!(
                        "{}",
                        style(format!(
                            "Language: {}, duration: {}, {} segments",
                            outcome.language,
                            utils::format_duration(outcome.duration_seconds),
                            outcome.segments.len()
                        ))
                        .dim()
                    );
                }
                Err(e) => {
                    bar.abandon();
                    tracing::debug!("Transcription failed: {:?}", e);
                    eprintln!("{} {}", style("Error:").red().bold(), e);
                    let code = match e {
                        TranscriberError::SourceNotFound(_) | TranscriberError::InvalidSource(_) => 1,
                        _ => 2,
                    };
                    std::process::exit(code);
                }
            }
        }
        Commands::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;

            server::serve(config).await?;
        }
        Commands::Config { show, init } => {
            if init {
                let path = config.save().await.context("Failed to write configuration")?;
                println!("Configuration written to: {}", path.display());
            }
            if show || !init {
                config.display();
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) {
    let default_directive = if verbose { "video_transcriber=debug" } else { "video_transcriber=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(100);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
    {
        bar.set_style(bar_style.progress_chars("=> "));
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar.set_message(cli::stage_message(0));
    bar
}
