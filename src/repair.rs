//! Best-effort recovery of a JSON object from generative-model output.
//!
//! The text is parsed directly first. Failing that, a fenced code block or
//! the outermost `{ ... }` span is extracted and run through an ordered list
//! of textual patches, each aimed at one corruption shape (mostly missing or
//! trailing commas). The patches are regex heuristics: they can insert a
//! comma inside a string literal that happens to look like `"x""key":`, and
//! they do nothing for shapes they were not written for. Order matters,
//! since later patches assume earlier ones have run.
//!
//! Nothing is ever guessed: the result is either a fully parsed value or
//! [`Error::MalformedJson`] with the failure position and surrounding text.

use crate::error::{Error, JsonDiagnostic, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

const CONTEXT_CHARS: usize = 50;

// A JSON string literal, escapes included.
const QUOTED: &str = r#""(?:[^"\\]|\\.)*""#;

static FENCED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence regex"));
static BRACES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("brace regex"));

static STRING_BEFORE_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"({QUOTED})(\s*)({QUOTED}\s*:)")).expect("string regex")
});
static CLOSE_BEFORE_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"([}}\]])(\s*)({QUOTED}\s*:)")).expect("close regex")
});
static NUMBER_BEFORE_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"([0-9])(\s*)({QUOTED}\s*:)")).expect("number regex")
});
static LITERAL_BEFORE_KEY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(true|false|null)(\s*)({QUOTED}\s*:)")).expect("literal regex")
});
static TRAILING_COMMA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",\s*([}\]])").expect("trailing comma regex"));

/// Identifies one patch in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixId {
    /// `"value""key":` -> `"value","key":`
    QuotedStringBeforeKey,
    /// `}"key":` / `]"key":` -> `},"key":`
    CloseBeforeKey,
    /// `1"key":` -> `1,"key":`
    NumberBeforeKey,
    /// `true"key":` -> `true,"key":`
    LiteralBeforeKey,
    /// `,}` / `,]` -> `}` / `]`
    TrailingComma,
    /// A line ending in a string followed by a line opening a key.
    LineBreakBeforeKey,
    Custom(&'static str),
}

/// A pure text rewrite.
#[derive(Clone, Copy)]
pub struct Patch {
    pub id: FixId,
    pub apply: fn(&str) -> String,
}

impl std::fmt::Debug for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Patch").field(&self.id).finish()
    }
}

/// Where the working text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    Whole,
    Fenced,
    Braces,
}

/// Record of one repair call.
#[derive(Debug, Clone)]
pub struct RepairAttempt {
    pub raw_text: String,
    pub extraction: Extraction,
    pub extracted_json: String,
    /// Patches that changed the text, in the order they ran.
    pub applied_fixes: Vec<FixId>,
    pub result: std::result::Result<Value, JsonDiagnostic>,
}

impl RepairAttempt {
    pub fn into_result(self) -> Result<Value> {
        self.result.map_err(Error::MalformedJson)
    }
}

#[derive(Debug, Clone)]
pub struct JsonRepair {
    patches: Vec<Patch>,
}

impl Default for JsonRepair {
    fn default() -> Self {
        Self {
            patches: vec![
                Patch {
                    id: FixId::QuotedStringBeforeKey,
                    apply: comma_between_strings,
                },
                Patch {
                    id: FixId::CloseBeforeKey,
                    apply: comma_after_close,
                },
                Patch {
                    id: FixId::NumberBeforeKey,
                    apply: comma_after_number,
                },
                Patch {
                    id: FixId::LiteralBeforeKey,
                    apply: comma_after_literal,
                },
                Patch {
                    id: FixId::TrailingComma,
                    apply: strip_trailing_commas,
                },
                Patch {
                    id: FixId::LineBreakBeforeKey,
                    apply: comma_at_line_end,
                },
            ],
        }
    }
}

impl JsonRepair {
    /// Appends `patch` after the built-in ones.
    pub fn with_patch(mut self, patch: Patch) -> Self {
        self.patches.push(patch);
        self
    }

    pub fn patches(&self) -> impl Iterator<Item = FixId> + '_ {
        self.patches.iter().map(|p| p.id)
    }

    pub fn repair(&self, raw: &str) -> Result<Value> {
        self.attempt(raw).into_result()
    }

    pub fn attempt(&self, raw: &str) -> RepairAttempt {
        let direct_err = match serde_json::from_str::<Value>(raw) {
            Ok(value) => {
                return RepairAttempt {
                    raw_text: raw.to_string(),
                    extraction: Extraction::Whole,
                    extracted_json: raw.to_string(),
                    applied_fixes: Vec::new(),
                    result: Ok(value),
                };
            }
            Err(e) => e,
        };

        let (extraction, working) = if let Some(cap) = FENCED_RE.captures(raw) {
            (Extraction::Fenced, cap[1].to_string())
        } else if let Some(m) = BRACES_RE.find(raw) {
            (Extraction::Braces, m.as_str().to_string())
        } else {
            let diag = diagnose(&direct_err, raw);
            warn!("No JSON object found in generated text: {diag}");
            return RepairAttempt {
                raw_text: raw.to_string(),
                extraction: Extraction::Whole,
                extracted_json: raw.to_string(),
                applied_fixes: Vec::new(),
                result: Err(diag),
            };
        };
        debug!("Extracted JSON ({extraction:?}) length: {}", working.len());

        if let Ok(value) = serde_json::from_str::<Value>(&working) {
            return RepairAttempt {
                raw_text: raw.to_string(),
                extraction,
                extracted_json: working,
                applied_fixes: Vec::new(),
                result: Ok(value),
            };
        }

        let mut text = working.clone();
        let mut applied = Vec::new();
        for patch in &self.patches {
            let next = (patch.apply)(&text);
            if next != text {
                info!("JSON repair applied {:?}", patch.id);
                applied.push(patch.id);
                text = next;
            }
        }

        let result = serde_json::from_str::<Value>(&text).map_err(|e| {
            let diag = diagnose(&e, &text);
            warn!("JSON parse failed after repair: {diag}");
            diag
        });

        RepairAttempt {
            raw_text: raw.to_string(),
            extraction,
            extracted_json: working,
            applied_fixes: applied,
            result,
        }
    }
}

/// Repairs `raw` with the default patch pipeline.
pub fn repair(raw: &str) -> Result<Value> {
    JsonRepair::default().repair(raw)
}

/// Repairs `raw` and deserializes the value into `T`.
pub fn repair_as<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let value = repair(raw)?;
    serde_json::from_value(value).map_err(shape_error)
}

/// A value that parsed but does not fit the target type.
pub(crate) fn shape_error(e: serde_json::Error) -> Error {
    Error::MalformedJson(JsonDiagnostic {
        message: format!("unexpected structure: {e}"),
        offset: 0,
        line: e.line(),
        column: e.column(),
        context: String::new(),
    })
}

fn comma_between_strings(text: &str) -> String {
    STRING_BEFORE_KEY_RE
        .replace_all(text, "${1},${2}${3}")
        .into_owned()
}

fn comma_after_close(text: &str) -> String {
    CLOSE_BEFORE_KEY_RE
        .replace_all(text, "${1},${2}${3}")
        .into_owned()
}

fn comma_after_number(text: &str) -> String {
    NUMBER_BEFORE_KEY_RE
        .replace_all(text, "${1},${2}${3}")
        .into_owned()
}

fn comma_after_literal(text: &str) -> String {
    LITERAL_BEFORE_KEY_RE
        .replace_all(text, "${1},${2}${3}")
        .into_owned()
}

fn strip_trailing_commas(text: &str) -> String {
    TRAILING_COMMA_RE.replace_all(text, "${1}").into_owned()
}

fn comma_at_line_end(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        let current = line.trim();
        let needs_comma = lines.get(i + 1).is_some_and(|next| {
            let next = next.trim();
            current.ends_with('"')
                && !current.ends_with(",\"")
                && next.starts_with('"')
                && next.contains(':')
        });

        if needs_comma {
            let end = line.trim_end().len();
            out.push(format!("{},{}", &line[..end], &line[end..]));
        } else {
            out.push((*line).to_string());
        }
    }

    out.join("\n")
}

fn diagnose(err: &serde_json::Error, text: &str) -> JsonDiagnostic {
    let offset = byte_offset(text, err.line(), err.column());
    JsonDiagnostic {
        message: err.to_string(),
        offset,
        line: err.line(),
        column: err.column(),
        context: context_around(text, offset),
    }
}

fn byte_offset(text: &str, line: usize, column: usize) -> usize {
    if line == 0 {
        return 0;
    }
    let mut offset = 0;
    for (idx, l) in text.split_inclusive('\n').enumerate() {
        if idx + 1 == line {
            return (offset + column.saturating_sub(1)).min(text.len());
        }
        offset += l.len();
    }
    text.len()
}

fn context_around(text: &str, offset: usize) -> String {
    let mut at = offset.min(text.len());
    while !text.is_char_boundary(at) {
        at -= 1;
    }
    let before: Vec<char> = text[..at].chars().rev().take(CONTEXT_CHARS).collect();
    let after = text[at..].chars().take(CONTEXT_CHARS);
    before.into_iter().rev().chain(after).collect()
}
