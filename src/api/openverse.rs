use super::HttpFetch;
use crate::error::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Open-media search client used as the fallback source.
#[derive(Clone)]
pub struct OpenverseSource {
    fetch: Arc<dyn HttpFetch>,
    api_url: String,
    license_type: String,
}

impl OpenverseSource {
    pub fn new(
        fetch: Arc<dyn HttpFetch>,
        api_url: impl Into<String>,
        license_type: impl Into<String>,
    ) -> Self {
        Self {
            fetch,
            api_url: api_url.into(),
            license_type: license_type.into(),
        }
    }

    /// Direct image URLs for `query`, at most `count` of them.
    pub async fn search(&self, query: &str, count: usize) -> Result<Vec<String>> {
        info!("Attempting Openverse fallback for query: {query}");
        let params = [
            ("q", query.to_string()),
            ("license_type", self.license_type.clone()),
            ("page_size", count.to_string()),
        ];
        let data = self.fetch.get_json(&self.api_url, &params).await?;

        let urls: Vec<String> = data
            .get("results")
            .and_then(Value::as_array)
            .map(|results| {
                results
                    .iter()
                    .take(count)
                    .filter_map(|r| r.get("url").and_then(Value::as_str))
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        info!("Found {} images from Openverse", urls.len());
        Ok(urls)
    }
}
