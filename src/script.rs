//! Script parsing: heading-delimited blocks and the quoted narration lines inside them.

use std::sync::OnceLock;

use regex::Regex;

/// Raw text of one `Scene:` section, heading marker removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptBlock {
    pub content: String,
}

/// A whitespace-normalized, non-empty quoted utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationLine(String);

impl NarrationLine {
    /// Collapses whitespace runs and trims; `None` when nothing is left.
    pub fn normalize(raw: &str) -> Option<Self> {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            None
        } else {
            Some(Self(collapsed))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

fn heading_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*Scene:[ \t]*").expect("heading regex should compile")
    })
}

fn utterance_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Speaker label, colon, then content between any of the straight or
        // curly double quotes. `(?s)` lets the content span lines.
        Regex::new(r#"(?s)[\p{L}\p{N}_][\p{L}\p{N}_ '\-]*:[ \t]*["“”„](.*?)["“”]"#)
            .expect("utterance regex should compile")
    })
}

/// Splits the script on line-anchored `Scene:` markers. Text before the first
/// marker becomes its own block; blocks that trim to empty are dropped.
pub fn parse_blocks(text: &str) -> Vec<ScriptBlock> {
    heading_pattern()
        .split(text)
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| ScriptBlock {
            content: chunk.to_owned(),
        })
        .collect()
}

impl ScriptBlock {
    /// Narration lines in order of appearance. Lazy; a block without any
    /// quoted speaker lines yields nothing.
    pub fn narration_lines(&self) -> impl Iterator<Item = NarrationLine> + '_ {
        utterance_pattern()
            .captures_iter(&self.content)
            .filter_map(|captures| captures.get(1))
            .filter_map(|content| NarrationLine::normalize(content.as_str()))
    }
}

/// Every narration line of the script, flattened in source order.
pub fn parse_narration_lines(text: &str) -> Vec<NarrationLine> {
    parse_blocks(text)
        .iter()
        .flat_map(|block| block.narration_lines().collect::<Vec<_>>())
        .collect()
}
