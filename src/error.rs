use std::path::PathBuf;

pub type SlidecastResult<T> = Result<T, SlidecastError>;

#[derive(thiserror::Error, Debug)]
pub enum SlidecastError {
    #[error("script file not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("script produced no narration units: {0}")]
    ParseEmpty(String),

    #[error("failed to write slide image {}: {reason}", .path.display())]
    AssetRenderFailure { path: PathBuf, reason: String },

    #[error("narration audio failed for {}: {reason}", .path.display())]
    SynthesisFailure { path: PathBuf, reason: String },

    #[error("external tool '{tool}' not found on this system")]
    MissingExternalTool { tool: String },

    #[error("'{tool}' failed ({status}): {stderr_tail}")]
    EncodeFailure {
        tool: String,
        status: String,
        stderr_tail: String,
    },

    #[error("unit {index} was abandoned when its worker thread panicked")]
    UnitAborted { index: usize },

    #[error("final concatenation failed: {0}")]
    ConcatenationFailure(String),

    #[error("no video segments were produced (0 of {total_units} units)")]
    NoSegments { total_units: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SlidecastError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn concatenation(msg: impl Into<String>) -> Self {
        Self::ConcatenationFailure(msg.into())
    }

    /// Stable machine-readable code, used in run summaries and `--json` output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingInput(_) => "MISSING_INPUT",
            Self::ParseEmpty(_) => "PARSE_EMPTY",
            Self::AssetRenderFailure { .. } => "ASSET_RENDER_FAILURE",
            Self::SynthesisFailure { .. } => "SYNTHESIS_FAILURE",
            Self::MissingExternalTool { .. } => "MISSING_EXTERNAL_TOOL",
            Self::EncodeFailure { .. } => "ENCODE_FAILURE",
            Self::UnitAborted { .. } => "UNIT_ABORTED",
            Self::ConcatenationFailure(_) => "CONCATENATION_FAILURE",
            Self::NoSegments { .. } => "NO_SEGMENTS",
            Self::Config(_) => "CONFIG",
            Self::Io(_) => "IO",
        }
    }

    /// Whether the pipeline drops the affected unit and keeps going.
    pub fn is_per_unit(&self) -> bool {
        matches!(
            self,
            Self::AssetRenderFailure { .. }
                | Self::SynthesisFailure { .. }
                | Self::MissingExternalTool { .. }
                | Self::EncodeFailure { .. }
                | Self::UnitAborted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            SlidecastError::MissingInput(PathBuf::from("x.txt")).code(),
            "MISSING_INPUT"
        );
        assert_eq!(
            SlidecastError::concatenation("boom").code(),
            "CONCATENATION_FAILURE"
        );
        assert_eq!(
            SlidecastError::MissingExternalTool {
                tool: "ffmpeg".to_owned()
            }
            .code(),
            "MISSING_EXTERNAL_TOOL"
        );
    }

    #[test]
    fn only_unit_scoped_kinds_are_recoverable() {
        let encode = SlidecastError::EncodeFailure {
            tool: "ffmpeg".to_owned(),
            status: "exit status 1".to_owned(),
            stderr_tail: String::new(),
        };
        assert!(encode.is_per_unit());
        assert!(SlidecastError::UnitAborted { index: 2 }.is_per_unit());
        assert!(!SlidecastError::concatenation("x").is_per_unit());
        assert!(!SlidecastError::ParseEmpty("x".to_owned()).is_per_unit());
    }

    #[test]
    fn io_preserves_source() {
        let err = SlidecastError::from(std::io::Error::other("boom"));
        assert!(err.to_string().contains("boom"));
    }
}
