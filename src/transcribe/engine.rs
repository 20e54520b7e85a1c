use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use super::Segment;
use crate::{Result, TranscriberError};

const LANGUAGE_MARKER: &str = "auto-detected language:";

/// Language reported when neither the caller nor the engine knows it
pub const UNKNOWN_LANGUAGE: &str = "unknown";

/// One run of the speech engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub audio_path: PathBuf,
    /// Explicit language code, `None` to auto-detect
    pub language: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechOutput {
    pub segments: Vec<Segment>,
    pub language: String,
}

/// Trait for speech-to-text engines.
///
/// Implementations block until the whole file is processed and hand every
/// segment to `on_segment` as soon as it is known, in time order. Callers run
/// this on a blocking worker.
pub trait SpeechEngine: Send + Sync {
    fn transcribe(&self, request: &SpeechRequest, on_segment: &mut dyn FnMut(&Segment)) -> Result<SpeechOutput>;

    fn name(&self) -> &'static str;
}

/// whisper.cpp command line engine
pub struct WhisperCliEngine {
    binary: String,
    models_dir: PathBuf,
    threads: Option<usize>,
}

impl WhisperCliEngine {
    pub fn new(binary: impl Into<String>, models_dir: impl Into<PathBuf>, threads: Option<usize>) -> Self {
        Self {
            binary: binary.into(),
            models_dir: models_dir.into(),
            threads,
        }
    }

    pub fn model_path(&self, model: &str) -> PathBuf {
        self.models_dir.join(format!("ggml-{}.bin", model))
    }
}

impl SpeechEngine for WhisperCliEngine {
    fn transcribe(&self, request: &SpeechRequest, on_segment: &mut dyn FnMut(&Segment)) -> Result<SpeechOutput> {
        let model_path = self.model_path(&request.model);
        if !model_path.exists() {
            return Err(TranscriberError::TranscriptionBackendFailure(format!(
                "Model not found: {} (download it into the models directory)",
                model_path.display()
            )));
        }

        let mut command = Command::new(&self.binary);
        command
            .arg("-m")
            .arg(&model_path)
            .arg("-f")
            .arg(&request.audio_path)
            .arg("-l")
            .arg(request.language.as_deref().unwrap_or("auto"));
        if let Some(threads) = self.threads {
            command.arg("-t").arg(threads.to_string());
        }

        tracing::debug!("Running {} with model {}", self.binary, request.model);

        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => TranscriberError::TranscriptionBackendFailure(format!(
                    "{} is not installed or not in PATH",
                    self.binary
                )),
                _ => TranscriberError::TranscriptionBackendFailure(format!("Failed to start {}: {}", self.binary, e)),
            })?;

        let stderr = child.stderr.take();
        let stderr_reader = std::thread::spawn(move || {
            let mut diagnostics = Vec::new();
            if let Some(stderr) = stderr {
                for_each_lossy_line(BufReader::new(stderr), |line| diagnostics.push(line));
            }
            diagnostics
        });

        let mut segments = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            for_each_lossy_line(BufReader::new(stdout), |line| {
                if let Some(segment) = parse_segment_line(&line) {
                    on_segment(&segment);
                    segments.push(segment);
                }
            });
        }

        let status = child.wait()?;
        let diagnostics = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            let tail: Vec<&str> = diagnostics.iter().rev().take(5).rev().map(String::as_str).collect();
            return Err(TranscriberError::TranscriptionBackendFailure(format!(
                "{} exited with {}: {}",
                self.binary,
                status,
                tail.join("\n")
            )));
        }

        let language = request
            .language
            .clone()
            .or_else(|| diagnostics.iter().find_map(|line| detect_language(line)))
            .unwrap_or_else(|| UNKNOWN_LANGUAGE.to_string());

        tracing::debug!("{} produced {} segments, language {}", self.binary, segments.len(), language);
        Ok(SpeechOutput { segments, language })
    }

    fn name(&self) -> &'static str {
        "whisper.cpp"
    }
}

/// Feed every line of `reader` to `f` until EOF.
///
/// whisper.cpp can split a multi-byte character across tokens, so lines are
/// decoded lossily instead of ending the read at the first invalid byte.
fn for_each_lossy_line(mut reader: impl BufRead, mut f: impl FnMut(String)) {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                f(line.trim_end_matches(['\n', '\r']).to_string());
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!("Stopped reading engine output: {}", e);
                break;
            }
        }
    }
}

/// Parse `[HH:MM:SS.mmm --> HH:MM:SS.mmm]  text`
pub fn parse_segment_line(line: &str) -> Option<Segment> {
    let rest = line.trim().strip_prefix('[')?;
    let (times, text) = rest.split_once(']')?;
    let (start, end) = times.split_once("-->")?;

    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    Some(Segment::new(parse_timestamp(start)?, parse_timestamp(end)?, text))
}

fn parse_timestamp(raw: &str) -> Option<f64> {
    let mut parts = raw.trim().split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.replace(',', ".").parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// `whisper_full_with_state: auto-detected language: en (p = 0.97)` -> `en`
pub fn detect_language(line: &str) -> Option<String> {
    let (_, rest) = line.split_once(LANGUAGE_MARKER)?;
    rest.split_whitespace().next().map(str::to_string)
}
