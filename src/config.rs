use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// What to do with vector graphics listed on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SvgPolicy {
    /// Keep `.svg` files and render them to PNG after download.
    #[default]
    Rasterize,
    /// Drop `.svg` titles before download.
    Exclude,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub user_agent: String,
    pub wikipedia_api: String,
    pub openverse_api: String,
    pub openverse_license_type: String,
    pub image_list_limit: u32,
    pub max_workers: usize,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub svg_policy: SvgPolicy,
    pub excluded_title_terms: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            user_agent: "DocVideoMaker/1.0 (https://example.com; contact@example.com)".to_string(),
            wikipedia_api: "https://en.wikipedia.org/w/api.php".to_string(),
            openverse_api: "https://api.openverse.engineering/v1/images/".to_string(),
            openverse_license_type: "commercial,modification".to_string(),
            image_list_limit: 50,
            max_workers: 5,
            request_timeout_secs: 60,
            connect_timeout_secs: 30,
            svg_policy: SvgPolicy::default(),
            excluded_title_terms: vec!["logo".to_string(), "icon".to_string()],
        }
    }
}

impl ResolverConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: ResolverConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;

        if config.user_agent.trim().is_empty() {
            anyhow::bail!("config: user_agent missing");
        }
        if config.max_workers == 0 {
            anyhow::bail!("config: max_workers must be at least 1");
        }

        Ok(config)
    }

    /// Loads `path` when given, otherwise the defaults.
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path).await,
            None => Ok(Self::default()),
        }
    }
}
