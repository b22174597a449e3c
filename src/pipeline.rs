use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

use serde::Serialize;
use tracing::{info, warn};

use crate::assemble::{Assembler, BuildManifest, SegmentEntry};
use crate::config::{PipelineConfig, WorkLayout};
use crate::encoder::SegmentEncoder;
use crate::error::{SlidecastError, SlidecastResult};
use crate::narration::{AudioKind, NarrationSynthesizer, SpeechEngine};
use crate::script::parse_narration_lines;
use crate::slide::SlideRenderer;
use crate::tools;

const PREVIEW_CHARS: usize = 50;

/// One slide + one audio track + one segment. Index 0 is the intro when enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationUnit {
    pub index: usize,
    pub text: String,
    pub duration_secs: f64,
    pub is_intro: bool,
}

impl NarrationUnit {
    /// File-name stem unique per unit within a run.
    pub fn stem(&self) -> String {
        if self.is_intro {
            "intro".to_owned()
        } else {
            format!("{:03}", self.index)
        }
    }

    pub fn preview(&self) -> String {
        let mut preview = self.text.chars().take(PREVIEW_CHARS).collect::<String>();
        if self.text.chars().count() > PREVIEW_CHARS {
            preview.push_str("...");
        }
        preview
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitPaths {
    pub slide: PathBuf,
    pub audio: PathBuf,
    pub segment: PathBuf,
}

impl UnitPaths {
    pub fn for_unit(layout: &WorkLayout, unit: &NarrationUnit) -> Self {
        let stem = unit.stem();
        Self {
            slide: layout.slides().join(format!("slide_{stem}.png")),
            audio: layout.audio().join(format!("narration_{stem}.wav")),
            segment: layout.segments().join(format!("segment_{stem}.mp4")),
        }
    }
}

/// Intro first (if configured), then every narration line in script order.
pub fn plan_units(script: &str, config: &PipelineConfig) -> SlidecastResult<Vec<NarrationUnit>> {
    let mut units = Vec::new();
    if let Some(intro) = &config.intro {
        units.push(NarrationUnit {
            index: 0,
            text: intro.text.clone(),
            duration_secs: intro.duration_secs,
            is_intro: true,
        });
    }
    units.extend(
        parse_narration_lines(script)
            .into_iter()
            .enumerate()
            .map(|(offset, line)| NarrationUnit {
                index: offset + 1,
                text: line.into_string(),
                duration_secs: config.line_duration_secs,
                is_intro: false,
            }),
    );

    if units.is_empty() {
        return Err(SlidecastError::ParseEmpty(
            "no quoted narration lines found and the intro is disabled".to_owned(),
        ));
    }
    Ok(units)
}

/// Reads `script_path` and plans its units.
pub fn plan_script(
    script_path: &Path,
    config: &PipelineConfig,
) -> SlidecastResult<Vec<NarrationUnit>> {
    if !script_path.is_file() {
        return Err(SlidecastError::MissingInput(script_path.to_path_buf()));
    }
    let script = fs::read_to_string(script_path)?;
    plan_units(&script, config)
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn remove_stale_output(output_path: &Path) -> SlidecastResult<()> {
    match fs::remove_file(output_path) {
        Ok(()) => {
            info!(output = %output_path.display(), "removed output left by an earlier run");
            Ok(())
        }
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

#[derive(Debug)]
pub enum UnitOutcome {
    Encoded { audio: AudioKind },
    Dropped(SlidecastError),
}

impl UnitOutcome {
    pub fn is_encoded(&self) -> bool {
        matches!(self, Self::Encoded { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DroppedUnit {
    pub index: usize,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_units: usize,
    pub encoded_units: usize,
    pub silent_units: usize,
    pub dropped: Vec<DroppedUnit>,
    pub degenerate: bool,
    pub estimated_duration_secs: f64,
    pub output: PathBuf,
}

pub struct Pipeline {
    config: PipelineConfig,
    renderer: SlideRenderer,
    synthesizer: NarrationSynthesizer,
    encoder: SegmentEncoder,
    assembler: Assembler,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> SlidecastResult<Self> {
        config.validate()?;
        Ok(Self {
            renderer: SlideRenderer::new(&config.slide),
            synthesizer: NarrationSynthesizer::from_config(&config),
            encoder: SegmentEncoder::from_config(&config),
            assembler: Assembler::from_config(&config),
            config,
        })
    }

    /// Replaces the command-line speech engine.
    pub fn with_speech_engine(mut self, engine: Box<dyn SpeechEngine>) -> Self {
        self.synthesizer = NarrationSynthesizer::from_config(&self.config).with_engine(engine);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, script_path: &Path, output_path: &Path) -> SlidecastResult<RunSummary> {
        if is_same_file(script_path, output_path) {
            return Err(SlidecastError::config(format!(
                "output path {} would overwrite the script",
                output_path.display()
            )));
        }
        // Only a successful assembly may leave a file at the output path.
        remove_stale_output(output_path)?;
        let units = plan_script(script_path, &self.config)?;
        let line_count = units.iter().filter(|unit| !unit.is_intro).count();
        info!(
            script = %script_path.display(),
            lines = line_count,
            units = units.len(),
            "parsed script"
        );
        if line_count == 0 {
            warn!("script has no narration lines; only the intro will be produced");
        }

        self.config.work.create_dirs()?;
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if !tools::is_available(
            &self.config.tools.ffmpeg,
            "-version",
            self.config.tools.timeout(),
        ) {
            warn!(
                tool = %self.config.tools.ffmpeg.program.display(),
                "ffmpeg did not answer -version; segments will likely fail"
            );
        }

        let outcomes = self.process_units(&units);
        self.finish(&units, outcomes, output_path)
    }

    fn finish(
        &self,
        units: &[NarrationUnit],
        outcomes: Vec<UnitOutcome>,
        output_path: &Path,
    ) -> SlidecastResult<RunSummary> {
        let planned = units
            .iter()
            .zip(&outcomes)
            .map(|(unit, outcome)| SegmentEntry {
                index: unit.index,
                path: UnitPaths::for_unit(&self.config.work, unit).segment,
                duration_secs: unit.duration_secs,
                encoded: outcome.is_encoded(),
            })
            .collect::<Vec<_>>();
        let manifest = BuildManifest::build(&planned);

        let dropped = units
            .iter()
            .zip(&outcomes)
            .filter_map(|(unit, outcome)| match outcome {
                UnitOutcome::Dropped(error) => Some(DroppedUnit {
                    index: unit.index,
                    code: error.code(),
                    message: error.to_string(),
                }),
                UnitOutcome::Encoded { .. } => None,
            })
            .collect::<Vec<_>>();
        let silent_units = outcomes
            .iter()
            .filter(|outcome| {
                matches!(
                    outcome,
                    UnitOutcome::Encoded {
                        audio: AudioKind::Silence
                    }
                )
            })
            .count();

        info!(
            produced = manifest.len(),
            total = units.len(),
            "segments ready for assembly"
        );
        if manifest.is_empty() {
            return Err(SlidecastError::NoSegments {
                total_units: units.len(),
            });
        }

        let intro_index = units.iter().find(|unit| unit.is_intro).map(|unit| unit.index);
        let degenerate = intro_index
            .is_some_and(|intro| manifest.len() == 1 && manifest.entries()[0].index == intro);
        if degenerate {
            warn!("only the intro segment was produced; the final video contains just the intro");
        }

        self.assembler
            .assemble(&manifest, &self.config.work.manifest(), output_path)?;

        let summary = RunSummary {
            total_units: units.len(),
            encoded_units: manifest.len(),
            silent_units,
            dropped,
            degenerate,
            estimated_duration_secs: manifest.total_duration_secs(),
            output: output_path.to_path_buf(),
        };
        info!(
            output = %output_path.display(),
            encoded = summary.encoded_units,
            total = summary.total_units,
            degenerate = summary.degenerate,
            "final video created"
        );
        Ok(summary)
    }

    /// Runs every unit, on `jobs` workers when more than one. The returned
    /// outcomes line up with `units` regardless of completion order.
    pub fn process_units(&self, units: &[NarrationUnit]) -> Vec<UnitOutcome> {
        let workers = self.config.jobs.min(units.len());
        if workers <= 1 {
            return units
                .iter()
                .map(|unit| self.process_unit(unit, units.len()))
                .collect();
        }

        let slots = Mutex::new(
            (0..units.len())
                .map(|_| None)
                .collect::<Vec<Option<UnitOutcome>>>(),
        );
        let next = AtomicUsize::new(0);

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for worker in 0..workers {
                let spawned = thread::Builder::new()
                    .name(format!("slidecast-unit-{worker}"))
                    .spawn_scoped(scope, || loop {
                        let position = next.fetch_add(1, Ordering::SeqCst);
                        let Some(unit) = units.get(position) else {
                            break;
                        };
                        let outcome = self.process_unit(unit, units.len());
                        slots.lock().unwrap_or_else(PoisonError::into_inner)[position] =
                            Some(outcome);
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(error) => warn!(worker, %error, "failed to spawn unit worker"),
                }
            }

            for handle in handles {
                if handle.join().is_err() {
                    warn!("unit worker panicked");
                }
            }
        });

        // Claimed units without an outcome died with their worker and are not
        // retried. Unclaimed ones (no worker could be spawned) run here.
        let claimed = next.load(Ordering::SeqCst).min(units.len());
        slots
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .zip(units)
            .enumerate()
            .map(|(position, (slot, unit))| match slot {
                Some(outcome) => outcome,
                None if position < claimed => {
                    let error = SlidecastError::UnitAborted { index: unit.index };
                    warn!(unit = unit.index, %error, "dropping unit");
                    UnitOutcome::Dropped(error)
                }
                None => self.process_unit(unit, units.len()),
            })
            .collect()
    }

    /// Render, synthesize, encode. Each failure drops only this unit.
    pub fn process_unit(&self, unit: &NarrationUnit, total: usize) -> UnitOutcome {
        let paths = UnitPaths::for_unit(&self.config.work, unit);
        info!(
            unit = unit.index,
            total,
            text = %unit.preview(),
            "processing unit"
        );

        if let Err(error) = self.renderer.render(&unit.text, &paths.slide) {
            warn!(unit = unit.index, %error, "slide render failed, dropping unit");
            return UnitOutcome::Dropped(error);
        }

        let audio = match self
            .synthesizer
            .synthesize(&unit.text, unit.duration_secs, &paths.audio)
        {
            Ok(audio) => audio,
            Err(error) => {
                warn!(unit = unit.index, %error, "no audio for unit, dropping it");
                return UnitOutcome::Dropped(error);
            }
        };

        // A stale segment from an earlier run must not stand in for this one.
        let _ = fs::remove_file(&paths.segment);
        match self
            .encoder
            .encode(&paths.slide, &paths.audio, unit.duration_secs, &paths.segment)
        {
            Ok(()) => UnitOutcome::Encoded { audio },
            Err(error @ SlidecastError::MissingExternalTool { .. }) => {
                warn!(unit = unit.index, %error, "encoder not installed, dropping unit");
                UnitOutcome::Dropped(error)
            }
            Err(error) => {
                warn!(unit = unit.index, %error, "segment encode failed, dropping unit");
                UnitOutcome::Dropped(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IntroConfig, ToolCommand};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn intro_is_first_and_lines_follow_in_order() {
        let config = PipelineConfig::default();
        let units = plan_units("Scene: A\nPet: \"one\"\nScene: B\nPet: \"two\"", &config)
            .expect("units should plan");
        let summary = units
            .iter()
            .map(|unit| (unit.index, unit.text.as_str(), unit.duration_secs, unit.is_intro))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                (0, config.intro.as_ref().map_or("", |i| i.text.as_str()), 8.0, true),
                (1, "one", 30.0, false),
                (2, "two", 30.0, false),
            ]
        );
    }

    #[test]
    fn script_without_lines_still_plans_the_intro() {
        let units = plan_units("Scene: A\nnothing quoted", &PipelineConfig::default())
            .expect("intro alone is a valid plan");
        assert_eq!(units.len(), 1);
        assert!(units[0].is_intro);
    }

    #[test]
    fn no_lines_and_no_intro_is_parse_empty() {
        let config = PipelineConfig {
            intro: None,
            ..PipelineConfig::default()
        };
        let error = plan_units("", &config).expect_err("nothing to do");
        assert_eq!(error.code(), "PARSE_EMPTY");
    }

    #[test]
    fn missing_script_is_missing_input() {
        let error = plan_script(Path::new("/nonexistent/lesson.txt"), &PipelineConfig::default())
            .expect_err("missing script");
        assert_eq!(error.code(), "MISSING_INPUT");
    }

    #[test]
    fn unit_paths_are_distinct_per_unit() {
        let layout = WorkLayout::default();
        let intro = NarrationUnit {
            index: 0,
            text: "hi".to_owned(),
            duration_secs: 8.0,
            is_intro: true,
        };
        let first = NarrationUnit {
            index: 1,
            is_intro: false,
            ..intro.clone()
        };
        let a = UnitPaths::for_unit(&layout, &intro);
        let b = UnitPaths::for_unit(&layout, &first);
        assert!(a.slide.ends_with("slide_intro.png"));
        assert!(b.audio.ends_with("narration_001.wav"));
        assert!(b.segment.ends_with("segment_001.mp4"));
        assert_ne!(a.segment, b.segment);
    }

    #[test]
    fn preview_truncates_long_text() {
        let unit = NarrationUnit {
            index: 3,
            text: "x".repeat(80),
            duration_secs: 30.0,
            is_intro: false,
        };
        assert_eq!(unit.preview().chars().count(), PREVIEW_CHARS + 3);
    }

    struct RecordingEngine {
        spoken: Arc<Mutex<Vec<String>>>,
    }

    impl SpeechEngine for RecordingEngine {
        fn label(&self) -> String {
            "recording".to_owned()
        }

        fn synthesize(&self, text: &str, out_path: &Path) -> SlidecastResult<()> {
            self.spoken
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(text.to_owned());
            if text == "boom" {
                panic!("speech engine crashed");
            }
            fs::write(out_path, b"RIFF")?;
            Ok(())
        }
    }

    #[cfg(unix)]
    #[test]
    fn panicked_worker_drops_its_unit_without_rerunning_others() {
        let dir = tempdir().expect("tempdir should create");
        let mut config = PipelineConfig::default();
        config.jobs = 2;
        config.slide.width = 64;
        config.slide.height = 48;
        config.slide.text_origin = [2, 2];
        config.work.root = dir.path().join("work");
        config.tools.ffmpeg = ToolCommand::new("sh").with_args([
            "-c",
            r#"for last; do :; done; printf media > "$last""#,
            "fake-ffmpeg",
        ]);
        config.work.create_dirs().expect("work dirs should create");

        let spoken = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(config)
            .expect("config should validate")
            .with_speech_engine(Box::new(RecordingEngine {
                spoken: spoken.clone(),
            }));
        let units = plan_units(
            "Scene: A\nPet: \"one\"\nPet: \"boom\"\nPet: \"three\"\nPet: \"four\"",
            pipeline.config(),
        )
        .expect("units should plan");
        let outcomes = pipeline.process_units(&units);

        let codes = outcomes
            .iter()
            .map(|outcome| match outcome {
                UnitOutcome::Encoded { .. } => "ENCODED",
                UnitOutcome::Dropped(error) => error.code(),
            })
            .collect::<Vec<_>>();
        assert_eq!(
            codes,
            vec!["ENCODED", "ENCODED", "UNIT_ABORTED", "ENCODED", "ENCODED"]
        );

        let mut spoken = spoken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        spoken.sort();
        let mut expected = units.iter().map(|unit| unit.text.clone()).collect::<Vec<_>>();
        expected.sort();
        assert_eq!(spoken, expected, "each unit is attempted exactly once");
    }

    #[test]
    fn stale_output_is_removed_even_when_the_script_is_missing() {
        let dir = tempdir().expect("tempdir should create");
        let output = dir.path().join("final.mp4");
        fs::write(&output, b"old video").expect("old output should write");

        let mut config = PipelineConfig::default();
        config.work.root = dir.path().join("work");
        let error = Pipeline::new(config)
            .expect("config should validate")
            .run(&dir.path().join("absent.txt"), &output)
            .expect_err("missing script");
        assert_eq!(error.code(), "MISSING_INPUT");
        assert!(!output.exists());
    }

    #[test]
    fn output_may_not_overwrite_the_script() {
        let dir = tempdir().expect("tempdir should create");
        let script = dir.path().join("lesson.txt");
        fs::write(&script, "Scene: A\nPet: \"hi\"").expect("script should write");

        let error = Pipeline::new(PipelineConfig::default())
            .expect("config should validate")
            .run(&script, &script)
            .expect_err("same path");
        assert_eq!(error.code(), "CONFIG");
        assert!(script.is_file());
    }

    #[test]
    fn custom_intro_text_is_used() {
        let config = PipelineConfig {
            intro: Some(IntroConfig {
                text: "Hello class".to_owned(),
                duration_secs: 5.0,
            }),
            ..PipelineConfig::default()
        };
        let units = plan_units("", &config).expect("intro plan");
        assert_eq!(units[0].text, "Hello class");
        assert_eq!(units[0].duration_secs, 5.0);
    }
}
