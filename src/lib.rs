//! Slidecast turns a narrated lesson script into one slide video: a slide
//! image and a narration track per quoted line, encoded into fixed-length
//! segments and stream-copied into the final file with ffmpeg.

pub mod assemble;
pub mod builtin_font;
pub mod config;
pub mod encoder;
pub mod error;
pub mod narration;
pub mod pipeline;
pub mod script;
pub mod slide;
pub mod tools;

pub use config::PipelineConfig;
pub use error::{SlidecastError, SlidecastResult};
pub use pipeline::{plan_script, plan_units, NarrationUnit, Pipeline, RunSummary};
