use crate::error::Result;
use crate::repair;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const DEFAULT_OUTPUT_NAME: &str = "GeneratedVideo";

/// Fields whose markup is stripped in matching scenes.
pub const MARKUP_FIELDS: &[&str] = &["main_text", "subtitle", "text", "voiceover", "event", "narration"];

static MARKUP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("markup regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Scene {
    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn count_field(&self, key: &str, default: usize) -> usize {
        self.fields
            .get(key)
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(default)
    }
}

/// A narrated video description: an ordered list of typed scenes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDocument {
    #[serde(default = "default_output_name")]
    pub output_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_music: Option<String>,
    pub scenes: Vec<Scene>,
}

fn default_output_name() -> String {
    DEFAULT_OUTPUT_NAME.to_string()
}

/// One image slot a scene needs filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRequest {
    pub scene_index: usize,
    /// Which part of the scene the images are for, e.g. `left` or `event[2]`.
    pub slot: String,
    /// Candidate topics, tried in order until one yields images.
    pub topics: Vec<String>,
    pub count: usize,
}

impl SceneDocument {
    /// Parses possibly malformed model output into a document.
    pub fn parse(raw: &str) -> Result<Self> {
        repair::repair_as(raw)
    }

    /// Parses, then strips markup from scenes whose type is in `scene_types`.
    pub fn parse_clean(raw: &str, scene_types: Option<&[&str]>) -> Result<Self> {
        let mut value = repair::repair(raw)?;
        strip_markup(&mut value, scene_types);
        serde_json::from_value(value).map_err(repair::shape_error)
    }

    pub fn image_requests(&self) -> Vec<ImageRequest> {
        let mut requests = Vec::new();

        for (idx, scene) in self.scenes.iter().enumerate() {
            let mut push = |slot: &str, topics: Vec<String>, count: usize| {
                if !topics.is_empty() && count > 0 {
                    requests.push(ImageRequest {
                        scene_index: idx,
                        slot: slot.to_string(),
                        topics,
                        count,
                    });
                }
            };

            match scene.kind.as_str() {
                "image_text" => {
                    let topic = scene.str_field("wikipedia_topic").unwrap_or("placeholder");
                    push("main", vec![topic.to_string()], scene.count_field("num_images", 1));
                }
                "multi_image_text" => {
                    let topics = scene
                        .fields
                        .get("wikipedia_topics")
                        .and_then(Value::as_array)
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(Value::as_str)
                                .map(str::trim)
                                .filter(|s| !s.is_empty())
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default();
                    push("main", topics, scene.count_field("num_images", 2));
                }
                "quick_lecture_slide" => {
                    if let Some(topic) = scene.str_field("wikipedia_topic") {
                        push("main", vec![topic.to_string()], 1);
                    }
                }
                "dual_image_comparison" => {
                    if let Some(topic) = scene.str_field("left_wikipedia_topic") {
                        push("left", vec![topic.to_string()], 1);
                    }
                    if let Some(topic) = scene.str_field("right_wikipedia_topic") {
                        push("right", vec![topic.to_string()], 1);
                    }
                }
                "timeline" => {
                    let events = scene.fields.get("events").and_then(Value::as_array);
                    for (i, event) in events.into_iter().flatten().enumerate() {
                        let desc = event
                            .get("image_description")
                            .and_then(Value::as_str)
                            .map(str::trim)
                            .filter(|s| !s.is_empty());
                        if let Some(desc) = desc {
                            push(&format!("event[{i}]"), vec![desc.to_string()], 1);
                        }
                    }
                }
                _ => {}
            }
        }

        requests
    }
}

/// Removes `<...>` tags from a string.
pub fn remove_markup(text: &str) -> String {
    MARKUP_RE.replace_all(text, "").into_owned()
}

/// Strips markup from [`MARKUP_FIELDS`] of every object whose `type` is in
/// `scene_types` (any type when `None`). Matching objects are not descended
/// into; everything else is walked recursively.
pub fn strip_markup(value: &mut Value, scene_types: Option<&[&str]>) {
    match value {
        Value::Object(map) => {
            let matches = map.get("type").and_then(Value::as_str).is_some_and(|kind| {
                scene_types.is_none_or(|types| types.contains(&kind))
            });

            if matches {
                for field in MARKUP_FIELDS {
                    if let Some(Value::String(text)) = map.get_mut(*field) {
                        *text = remove_markup(text);
                    }
                }
            } else {
                for child in map.values_mut() {
                    strip_markup(child, scene_types);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_markup(item, scene_types);
            }
        }
        _ => {}
    }
}
