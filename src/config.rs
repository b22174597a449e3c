use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{SlidecastError, SlidecastResult};

pub const DEFAULT_INTRO_TEXT: &str = "Welcome to your lesson! Let's begin the adventure.";

/// Everything a run needs besides the script and output path. Every field has
/// a default, so a config file only lists what it overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub slide: SlideConfig,
    pub intro: Option<IntroConfig>,
    pub line_duration_secs: f64,
    pub video: VideoConfig,
    pub speech: SpeechConfig,
    pub tools: ToolsConfig,
    pub work: WorkLayout,
    pub jobs: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slide: SlideConfig::default(),
            intro: Some(IntroConfig::default()),
            line_duration_secs: 30.0,
            video: VideoConfig::default(),
            speech: SpeechConfig::default(),
            tools: ToolsConfig::default(),
            work: WorkLayout::default(),
            jobs: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlideConfig {
    pub width: u32,
    pub height: u32,
    pub background: Option<PathBuf>,
    pub font: Option<PathBuf>,
    pub font_size: f32,
    pub wrap_chars: usize,
    pub max_lines: usize,
    pub text_origin: [u32; 2],
    pub line_spacing: u32,
    pub text_color: [u8; 3],
    pub gradient_top: [u8; 3],
    pub gradient_bottom: [u8; 3],
}

impl Default for SlideConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            background: None,
            font: None,
            font_size: 32.0,
            wrap_chars: 60,
            max_lines: 10,
            text_origin: [40, 50],
            line_spacing: 50,
            text_color: [0, 0, 0],
            gradient_top: [255, 255, 255],
            gradient_bottom: [0, 0, 255],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntroConfig {
    pub text: String,
    pub duration_secs: f64,
}

impl Default for IntroConfig {
    fn default() -> Self {
        Self {
            text: DEFAULT_INTRO_TEXT.to_owned(),
            duration_secs: 8.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VideoConfig {
    pub fps: u32,
    pub video_codec: String,
    pub pixel_format: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 25,
            video_codec: "libx264".to_owned(),
            pixel_format: "yuv420p".to_owned(),
            audio_codec: "aac".to_owned(),
            sample_rate: 44_100,
            channels: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpeechConfig {
    /// Words per minute handed to the TTS engine.
    pub rate: u32,
    pub voice: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            rate: 180,
            voice: None,
        }
    }
}

/// An external program plus leading arguments inserted before the generated ones.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn label(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub ffmpeg: ToolCommand,
    pub tts: ToolCommand,
    pub timeout_secs: u64,
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: ToolCommand::new("ffmpeg"),
            tts: ToolCommand::new("espeak-ng"),
            timeout_secs: 300,
        }
    }
}

/// Run-scoped working directory layout. Sub-directories are relative to `root`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkLayout {
    pub root: PathBuf,
    pub slides_dir: String,
    pub audio_dir: String,
    pub segments_dir: String,
    pub manifest_file: String,
}

impl Default for WorkLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("slidecast_work"),
            slides_dir: "static_slides".to_owned(),
            audio_dir: "narration_audio".to_owned(),
            segments_dir: "video_segments".to_owned(),
            manifest_file: "concat_list.txt".to_owned(),
        }
    }
}

impl WorkLayout {
    pub fn slides(&self) -> PathBuf {
        self.root.join(&self.slides_dir)
    }

    pub fn audio(&self) -> PathBuf {
        self.root.join(&self.audio_dir)
    }

    pub fn segments(&self) -> PathBuf {
        self.root.join(&self.segments_dir)
    }

    pub fn manifest(&self) -> PathBuf {
        self.root.join(&self.manifest_file)
    }

    pub fn create_dirs(&self) -> SlidecastResult<()> {
        for dir in [self.slides(), self.audio(), self.segments()] {
            fs::create_dir_all(&dir).map_err(|error| {
                SlidecastError::config(format!(
                    "failed to create working directory {}: {error}",
                    dir.display()
                ))
            })?;
        }
        Ok(())
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> SlidecastResult<Self> {
        let contents = fs::read_to_string(path).map_err(|error| {
            SlidecastError::config(format!("failed to read config {}: {error}", path.display()))
        })?;
        let config = Self::from_yaml_str(&contents).map_err(|error| match error {
            SlidecastError::Config(message) => {
                SlidecastError::config(format!("{}: {message}", path.display()))
            }
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> SlidecastResult<Self> {
        // An empty document means "all defaults".
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            SlidecastError::config(format!("failed to parse yaml at {location}: {error}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SlidecastResult<()> {
        let slide = &self.slide;
        if slide.width == 0 || slide.height == 0 {
            return Err(SlidecastError::config(format!(
                "slide size must be positive, got {}x{}",
                slide.width, slide.height
            )));
        }
        if slide.width % 2 != 0 || slide.height % 2 != 0 {
            return Err(SlidecastError::config(format!(
                "slide size must be even for yuv420p output, got {}x{}",
                slide.width, slide.height
            )));
        }
        if !(slide.font_size > 0.0) {
            return Err(SlidecastError::config("slide.font_size must be > 0"));
        }
        if slide.wrap_chars == 0 {
            return Err(SlidecastError::config("slide.wrap_chars must be > 0"));
        }
        if slide.max_lines == 0 {
            return Err(SlidecastError::config("slide.max_lines must be > 0"));
        }
        if !(self.line_duration_secs > 0.0) {
            return Err(SlidecastError::config("line_duration_secs must be > 0"));
        }
        if let Some(intro) = &self.intro {
            if !(intro.duration_secs > 0.0) {
                return Err(SlidecastError::config("intro.duration_secs must be > 0"));
            }
        }
        if self.video.fps == 0 {
            return Err(SlidecastError::config("video.fps must be > 0"));
        }
        if self.video.sample_rate == 0 || self.video.channels == 0 {
            return Err(SlidecastError::config(
                "video.sample_rate and video.channels must be > 0",
            ));
        }
        if self.speech.rate == 0 {
            return Err(SlidecastError::config("speech.rate must be > 0"));
        }
        if self.tools.timeout_secs == 0 {
            return Err(SlidecastError::config("tools.timeout_secs must be > 0"));
        }
        if self.jobs == 0 {
            return Err(SlidecastError::config("jobs must be > 0"));
        }
        Ok(())
    }
}
