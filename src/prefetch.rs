use crate::init;
use crate::resolver::{ImageQuery, ImageResolver};
use crate::scene::SceneDocument;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub generated_at: String,
    pub documents: Vec<DocumentEntry>,
    pub failures: Vec<FailureEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentEntry {
    pub source: PathBuf,
    pub output_name: String,
    pub images: Vec<ImageEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageEntry {
    pub scene_index: usize,
    pub slot: String,
    /// The topic that produced `paths`, or the first candidate when none did.
    pub topic: String,
    pub paths: Vec<PathBuf>,
    /// No images were found; the scene should draw a placeholder.
    pub placeholder: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    pub source: PathBuf,
    pub reason: String,
}

impl Manifest {
    pub async fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            init::ensure_dir(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(self)?;
        fs::write(path, body)
            .await
            .with_context(|| format!("Failed to write manifest {}", path.display()))?;
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.documents
            .iter()
            .flat_map(|d| &d.images)
            .map(|i| i.paths.len())
            .sum()
    }
}

/// Expands files and directories into the scene files to process.
/// Directories contribute every `*.json` below them, sorted.
pub fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(input)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| {
                    path.extension()
                        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
                })
                .collect();
            found.sort();
            files.extend(found);
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            anyhow::bail!("input not found: {}", input.display());
        }
    }
    Ok(files)
}

/// Resolves every image request of every scene document in `inputs`.
///
/// Images for a document land in `save_dir/<output_name>`; manifest paths are
/// relative to `manifest_dir`. Documents that cannot be parsed are recorded
/// as failures and skipped.
pub async fn prefetch(
    resolver: &ImageResolver,
    inputs: &[PathBuf],
    save_dir: &Path,
    manifest_dir: &Path,
) -> Result<Manifest> {
    let files = collect_inputs(inputs)?;
    let mut documents = Vec::new();
    let mut failures = Vec::new();

    for file in files {
        let raw = match fs::read_to_string(&file).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cannot read {}: {e}", file.display());
                failures.push(FailureEntry {
                    source: file,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let doc = match SceneDocument::parse(&raw) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Skipping {}: {e}", file.display());
                failures.push(FailureEntry {
                    source: file,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        info!(
            "Prefetching images for {} ({} scenes)",
            doc.output_name,
            doc.scenes.len()
        );
        let doc_dir = save_dir.join(sanitize_dir_name(&doc.output_name));
        let mut images = Vec::new();

        for request in doc.image_requests() {
            let mut used = request.topics.first().cloned().unwrap_or_default();
            let mut paths = Vec::new();

            for topic in &request.topics {
                let query = ImageQuery::new(topic.clone(), request.count, &doc_dir);
                let found = resolver.resolve(&query).await;
                if !found.is_empty() {
                    used = topic.clone();
                    paths = found;
                    break;
                }
                info!("No images for {topic}, trying next candidate");
            }

            if paths.is_empty() {
                warn!(
                    "Scene {} ({}) gets a placeholder: nothing found for {:?}",
                    request.scene_index, request.slot, request.topics
                );
            }

            images.push(ImageEntry {
                scene_index: request.scene_index,
                slot: request.slot,
                topic: used,
                placeholder: paths.is_empty(),
                paths: paths.iter().map(|p| relative_to(p, manifest_dir)).collect(),
            });
        }

        documents.push(DocumentEntry {
            source: file,
            output_name: doc.output_name,
            images,
        });
    }

    Ok(Manifest {
        generated_at: chrono::Utc::now().to_rfc3339(),
        documents,
        failures,
    })
}

fn sanitize_dir_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "GeneratedVideo".to_string()
    } else {
        cleaned
    }
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let (Ok(path_abs), Ok(base_abs)) = (std::path::absolute(path), std::path::absolute(base)) else {
        return path.to_path_buf();
    };
    pathdiff::diff_paths(&path_abs, &base_abs).unwrap_or_else(|| path.to_path_buf())
}
