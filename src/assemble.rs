use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{PipelineConfig, ToolCommand};
use crate::error::{SlidecastError, SlidecastResult};
use crate::tools::{run_tool, ToolStatus};

/// One planned segment, in unit order. `encoded` is false when the unit was
/// dropped before or during encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    pub index: usize,
    pub path: PathBuf,
    pub duration_secs: f64,
    pub encoded: bool,
}

/// Ordered segments that exist on disk and will be concatenated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildManifest {
    entries: Vec<SegmentEntry>,
}

impl BuildManifest {
    /// Keeps, in the given order, every entry that was encoded and whose file
    /// exists now; the rest are skipped with a warning.
    pub fn build(planned: &[SegmentEntry]) -> Self {
        let mut entries = Vec::with_capacity(planned.len());
        for entry in planned {
            if !entry.encoded {
                warn!(unit = entry.index, "no segment for unit, skipping");
                continue;
            }
            if !entry.path.is_file() {
                warn!(
                    unit = entry.index,
                    path = %entry.path.display(),
                    "video segment not found, skipping"
                );
                continue;
            }
            entries.push(entry.clone());
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[SegmentEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_duration_secs(&self) -> f64 {
        self.entries.iter().map(|entry| entry.duration_secs).sum()
    }

    /// ffmpeg concat-demuxer list: one `file '<absolute path>'` line per segment.
    pub fn to_concat_list(&self) -> SlidecastResult<String> {
        let mut out = String::new();
        for entry in &self.entries {
            let absolute = absolute_path(&entry.path)?;
            out.push_str("file '");
            out.push_str(&escape_concat_path(&absolute.to_string_lossy()));
            out.push_str("'\n");
        }
        Ok(out)
    }

    pub fn write_concat_list(&self, list_path: &Path) -> SlidecastResult<()> {
        fs::write(list_path, self.to_concat_list()?)?;
        Ok(())
    }
}

fn absolute_path(path: &Path) -> SlidecastResult<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    Ok(std::env::current_dir()?.join(path))
}

/// Single quotes end a quoted concat path, so each becomes `'\''`.
fn escape_concat_path(path: &str) -> String {
    path.replace('\'', r"'\''")
}

/// Stream-copies the manifest's segments into the final video.
pub struct Assembler {
    ffmpeg: ToolCommand,
    timeout: Duration,
}

impl Assembler {
    pub fn new(ffmpeg: ToolCommand, timeout: Duration) -> Self {
        Self { ffmpeg, timeout }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.tools.ffmpeg.clone(), config.tools.timeout())
    }

    pub fn args(list_path: &Path, output_path: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_owned(),
            "-loglevel".to_owned(),
            "error".to_owned(),
            "-y".to_owned(),
            "-f".to_owned(),
            "concat".to_owned(),
            "-safe".to_owned(),
            "0".to_owned(),
            "-i".to_owned(),
            list_path.to_string_lossy().into_owned(),
            "-c:v".to_owned(),
            "copy".to_owned(),
            "-c:a".to_owned(),
            "copy".to_owned(),
            "-avoid_negative_ts".to_owned(),
            "make_zero".to_owned(),
            output_path.to_string_lossy().into_owned(),
        ]
    }

    /// Writes the list file and concatenates. Any failure here is fatal for
    /// the run and leaves no output file behind.
    pub fn assemble(
        &self,
        manifest: &BuildManifest,
        list_path: &Path,
        output_path: &Path,
    ) -> SlidecastResult<()> {
        if manifest.is_empty() {
            return Err(SlidecastError::concatenation("manifest has no segments"));
        }

        manifest.write_concat_list(list_path).map_err(|error| {
            SlidecastError::concatenation(format!(
                "failed to write concat list {}: {error}",
                list_path.display()
            ))
        })?;
        info!(
            segments = manifest.len(),
            list = %list_path.display(),
            "concatenating segments"
        );

        let status = run_tool(&self.ffmpeg, &Self::args(list_path, output_path), self.timeout);
        let failure = match status {
            ToolStatus::Succeeded => return Ok(()),
            ToolStatus::Missing => format!(
                "'{}' not found; install ffmpeg and make sure it is on PATH",
                self.ffmpeg.label()
            ),
            ToolStatus::Failed {
                exit_code,
                stderr_tail,
            } => format!(
                "'{}' failed ({}): {stderr_tail}",
                self.ffmpeg.label(),
                exit_code.map_or_else(|| "no exit code".to_owned(), |code| format!("exit code {code}"))
            ),
        };

        if output_path.exists() {
            let _ = fs::remove_file(output_path);
        }
        Err(SlidecastError::concatenation(failure))
    }
}
