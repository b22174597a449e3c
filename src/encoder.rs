use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::config::{PipelineConfig, ToolCommand, VideoConfig};
use crate::error::SlidecastResult;
use crate::narration::format_secs;
use crate::tools::run_tool;

/// Muxes one still image and one audio file into a fixed-length segment.
pub struct SegmentEncoder {
    ffmpeg: ToolCommand,
    video: VideoConfig,
    timeout: Duration,
}

impl SegmentEncoder {
    pub fn new(ffmpeg: ToolCommand, video: VideoConfig, timeout: Duration) -> Self {
        Self {
            ffmpeg,
            video,
            timeout,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.tools.ffmpeg.clone(),
            config.video.clone(),
            config.tools.timeout(),
        )
    }

    /// The image loops forever and the audio is padded with silence, so `-t`
    /// alone decides the length whether the narration is shorter or longer.
    pub fn args(
        &self,
        slide_path: &Path,
        audio_path: &Path,
        duration_secs: f64,
        out_path: &Path,
    ) -> Vec<String> {
        vec![
            "-hide_banner".to_owned(),
            "-loglevel".to_owned(),
            "error".to_owned(),
            "-y".to_owned(),
            "-loop".to_owned(),
            "1".to_owned(),
            "-framerate".to_owned(),
            self.video.fps.to_string(),
            "-i".to_owned(),
            slide_path.to_string_lossy().into_owned(),
            "-i".to_owned(),
            audio_path.to_string_lossy().into_owned(),
            "-map".to_owned(),
            "0:v:0".to_owned(),
            "-map".to_owned(),
            "1:a:0".to_owned(),
            "-af".to_owned(),
            "apad".to_owned(),
            "-c:v".to_owned(),
            self.video.video_codec.clone(),
            "-r".to_owned(),
            self.video.fps.to_string(),
            "-pix_fmt".to_owned(),
            self.video.pixel_format.clone(),
            "-c:a".to_owned(),
            self.video.audio_codec.clone(),
            "-ar".to_owned(),
            self.video.sample_rate.to_string(),
            "-ac".to_owned(),
            self.video.channels.to_string(),
            "-t".to_owned(),
            format_secs(duration_secs),
            "-shortest".to_owned(),
            out_path.to_string_lossy().into_owned(),
        ]
    }

    /// `MissingExternalTool` when ffmpeg cannot be spawned, `EncodeFailure`
    /// when it ran and failed or timed out.
    pub fn encode(
        &self,
        slide_path: &Path,
        audio_path: &Path,
        duration_secs: f64,
        out_path: &Path,
    ) -> SlidecastResult<()> {
        let args = self.args(slide_path, audio_path, duration_secs, out_path);
        run_tool(&self.ffmpeg, &args, self.timeout).into_result(&self.ffmpeg)?;
        info!(segment = %out_path.display(), "encoded segment");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder(program: &str) -> SegmentEncoder {
        SegmentEncoder::new(
            ToolCommand::new(program),
            VideoConfig::default(),
            Duration::from_secs(5),
        )
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|arg| arg == flag)
            .and_then(|index| args.get(index + 1))
            .map(String::as_str)
    }

    #[test]
    fn args_fix_duration_and_audio_format() {
        let args = encoder("ffmpeg").args(
            Path::new("/w/slide_001.png"),
            Path::new("/w/narration_001.wav"),
            30.0,
            Path::new("/w/segment_001.mp4"),
        );
        assert_eq!(value_after(&args, "-t"), Some("30"));
        assert_eq!(value_after(&args, "-ar"), Some("44100"));
        assert_eq!(value_after(&args, "-ac"), Some("1"));
        assert_eq!(value_after(&args, "-pix_fmt"), Some("yuv420p"));
        assert_eq!(value_after(&args, "-loop"), Some("1"));
        assert_eq!(value_after(&args, "-af"), Some("apad"));
        assert!(args.iter().any(|arg| arg == "-shortest"));
        assert_eq!(args.last().map(String::as_str), Some("/w/segment_001.mp4"));
    }

    #[test]
    fn inputs_are_image_then_audio() {
        let args = encoder("ffmpeg").args(
            Path::new("s.png"),
            Path::new("a.wav"),
            8.0,
            Path::new("o.mp4"),
        );
        let inputs = args
            .iter()
            .enumerate()
            .filter(|(_, arg)| *arg == "-i")
            .filter_map(|(index, _)| args.get(index + 1).cloned())
            .collect::<Vec<_>>();
        assert_eq!(inputs, vec!["s.png", "a.wav"]);
    }

    #[test]
    fn missing_ffmpeg_is_distinct_from_failure() {
        let missing = encoder("/nonexistent/slidecast-ffmpeg")
            .encode(Path::new("s.png"), Path::new("a.wav"), 1.0, Path::new("o.mp4"))
            .expect_err("missing tool should fail");
        assert_eq!(missing.code(), "MISSING_EXTERNAL_TOOL");

        #[cfg(unix)]
        {
            let failed = encoder("false")
                .encode(Path::new("s.png"), Path::new("a.wav"), 1.0, Path::new("o.mp4"))
                .expect_err("failing tool should fail");
            assert_eq!(failed.code(), "ENCODE_FAILURE");
        }
    }
}
