use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{PipelineConfig, ToolCommand};
use crate::error::{SlidecastError, SlidecastResult};
use crate::tools::run_tool;

/// Something that can turn text into a speech file.
pub trait SpeechEngine: Send + Sync {
    fn label(&self) -> String;
    fn synthesize(&self, text: &str, out_path: &Path) -> SlidecastResult<()>;
}

/// Speech through a command-line engine with an espeak-compatible interface
/// (`-s <wpm> [-v <voice>] -w <out.wav> <text>`).
pub struct CommandSpeechEngine {
    tool: ToolCommand,
    rate: u32,
    voice: Option<String>,
    timeout: Duration,
}

impl CommandSpeechEngine {
    pub fn new(tool: ToolCommand, rate: u32, voice: Option<String>, timeout: Duration) -> Self {
        Self {
            tool,
            rate,
            voice,
            timeout,
        }
    }

    pub fn args(&self, text: &str, out_path: &Path) -> Vec<String> {
        let mut args = vec!["-s".to_owned(), self.rate.to_string()];
        if let Some(voice) = &self.voice {
            args.push("-v".to_owned());
            args.push(voice.clone());
        }
        args.push("-w".to_owned());
        args.push(out_path.to_string_lossy().into_owned());
        // Keeps a leading '-' in the narration from being read as a flag.
        args.push("--".to_owned());
        args.push(text.to_owned());
        args
    }
}

impl SpeechEngine for CommandSpeechEngine {
    fn label(&self) -> String {
        self.tool.label()
    }

    fn synthesize(&self, text: &str, out_path: &Path) -> SlidecastResult<()> {
        run_tool(&self.tool, &self.args(text, out_path), self.timeout).into_result(&self.tool)?;
        ensure_non_empty(out_path, &self.tool)
    }
}

/// Generates silent audio of an exact length through ffmpeg's `anullsrc`.
pub struct SilenceGenerator {
    ffmpeg: ToolCommand,
    sample_rate: u32,
    channels: u32,
    timeout: Duration,
}

impl SilenceGenerator {
    pub fn new(ffmpeg: ToolCommand, sample_rate: u32, channels: u32, timeout: Duration) -> Self {
        Self {
            ffmpeg,
            sample_rate,
            channels,
            timeout,
        }
    }

    pub fn args(&self, duration_secs: f64, out_path: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_owned(),
            "-loglevel".to_owned(),
            "error".to_owned(),
            "-y".to_owned(),
            "-f".to_owned(),
            "lavfi".to_owned(),
            "-i".to_owned(),
            format!("anullsrc=sample_rate={}", self.sample_rate),
            "-t".to_owned(),
            format_secs(duration_secs),
            "-ac".to_owned(),
            self.channels.to_string(),
            "-c:a".to_owned(),
            "pcm_s16le".to_owned(),
            out_path.to_string_lossy().into_owned(),
        ]
    }

    pub fn generate(&self, duration_secs: f64, out_path: &Path) -> SlidecastResult<()> {
        run_tool(&self.ffmpeg, &self.args(duration_secs, out_path), self.timeout)
            .into_result(&self.ffmpeg)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioKind {
    Speech,
    Silence,
}

pub struct NarrationSynthesizer {
    engine: Box<dyn SpeechEngine>,
    silence: SilenceGenerator,
}

impl NarrationSynthesizer {
    pub fn new(engine: Box<dyn SpeechEngine>, silence: SilenceGenerator) -> Self {
        Self { engine, silence }
    }

    pub fn with_engine(mut self, engine: Box<dyn SpeechEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let timeout = config.tools.timeout();
        Self::new(
            Box::new(CommandSpeechEngine::new(
                config.tools.tts.clone(),
                config.speech.rate,
                config.speech.voice.clone(),
                timeout,
            )),
            SilenceGenerator::new(
                config.tools.ffmpeg.clone(),
                config.video.sample_rate,
                config.video.channels,
                timeout,
            ),
        )
    }

    /// Speech first; on any speech error, silence of exactly `duration_secs`.
    /// Fails only when both paths fail.
    pub fn synthesize(
        &self,
        text: &str,
        duration_secs: f64,
        out_path: &Path,
    ) -> SlidecastResult<AudioKind> {
        let speech_error = match self.engine.synthesize(text, out_path) {
            Ok(()) => {
                debug!(path = %out_path.display(), engine = %self.engine.label(), "speech synthesized");
                return Ok(AudioKind::Speech);
            }
            Err(error) => error,
        };

        warn!(
            path = %out_path.display(),
            error = %speech_error,
            "speech synthesis failed, generating {:.1}s of silence",
            duration_secs
        );
        // A half-written speech file must not be mistaken for the fallback.
        let _ = fs::remove_file(out_path);

        match self.silence.generate(duration_secs, out_path) {
            Ok(()) => Ok(AudioKind::Silence),
            Err(silence_error) => Err(SlidecastError::SynthesisFailure {
                path: out_path.to_path_buf(),
                reason: format!("speech: {speech_error}; silence: {silence_error}"),
            }),
        }
    }
}

fn ensure_non_empty(path: &Path, tool: &ToolCommand) -> SlidecastResult<()> {
    match fs::metadata(path) {
        Ok(metadata) if metadata.len() > 0 => Ok(()),
        _ => Err(SlidecastError::SynthesisFailure {
            path: path.to_path_buf(),
            reason: format!("'{}' exited successfully but wrote no audio", tool.label()),
        }),
    }
}

/// Seconds as ffmpeg accepts them, without float noise.
pub fn format_secs(secs: f64) -> String {
    let rounded = format!("{secs:.3}");
    rounded
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_owned()
}
