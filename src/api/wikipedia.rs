use super::HttpFetch;
use crate::config::SvgPolicy;
use crate::error::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Outcome of a `prop=images` lookup for one title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageLookup {
    Missing,
    NoImages { title: String },
    Images { title: String, image_titles: Vec<String> },
}

/// MediaWiki query client for the primary source.
#[derive(Clone)]
pub struct WikipediaSource {
    fetch: Arc<dyn HttpFetch>,
    api_url: String,
    image_limit: u32,
}

impl WikipediaSource {
    pub fn new(fetch: Arc<dyn HttpFetch>, api_url: impl Into<String>, image_limit: u32) -> Self {
        Self {
            fetch,
            api_url: api_url.into(),
            image_limit,
        }
    }

    pub async fn page_images(&self, title: &str) -> Result<PageLookup> {
        let query = [
            ("action", "query".to_string()),
            ("format", "json".to_string()),
            ("titles", title.to_string()),
            ("prop", "images".to_string()),
            ("imlimit", self.image_limit.to_string()),
        ];
        let data = self.fetch.get_json(&self.api_url, &query).await?;
        debug!("Wikipedia page response for {title}: {data}");

        let Some(page) = first_page(&data) else {
            return Ok(PageLookup::Missing);
        };
        if page.get("missing").is_some() || page.get("invalid").is_some() {
            return Ok(PageLookup::Missing);
        }

        let resolved = page
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(title)
            .to_string();

        match page.get("images").and_then(Value::as_array) {
            Some(images) => {
                let image_titles = images
                    .iter()
                    .filter_map(|img| img.get("title").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();
                Ok(PageLookup::Images {
                    title: resolved,
                    image_titles,
                })
            }
            None => Ok(PageLookup::NoImages { title: resolved }),
        }
    }

    /// Title of the best full-text search hit; [`Error::NoMatchFound`] when
    /// the search comes back empty.
    pub async fn search_title(&self, topic: &str) -> Result<String> {
        let query = [
            ("action", "query".to_string()),
            ("format", "json".to_string()),
            ("list", "search".to_string()),
            ("srsearch", topic.to_string()),
            ("srlimit", "1".to_string()),
        ];
        let data = self.fetch.get_json(&self.api_url, &query).await?;
        debug!("Wikipedia search response for {topic}: {data}");

        data.pointer("/query/search/0/title")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::NoMatchFound {
                topic: topic.to_string(),
            })
    }

    /// Direct binary URL for a `File:` title.
    pub async fn image_url(&self, file_title: &str) -> Result<Option<String>> {
        let query = [
            ("action", "query".to_string()),
            ("format", "json".to_string()),
            ("titles", file_title.to_string()),
            ("prop", "imageinfo".to_string()),
            ("iiprop", "url".to_string()),
        ];
        let data = self.fetch.get_json(&self.api_url, &query).await?;
        debug!("Image URL response for {file_title}: {data}");

        Ok(first_page(&data)
            .and_then(|page| page.pointer("/imageinfo/0/url"))
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string))
    }
}

fn first_page(data: &Value) -> Option<&Value> {
    data.pointer("/query/pages")?
        .as_object()?
        .values()
        .next()
}

/// Drops titles naming an excluded term (case-insensitive), and `.svg`
/// titles when `policy` is [`SvgPolicy::Exclude`].
pub fn filter_titles(titles: &[String], policy: SvgPolicy, excluded_terms: &[String]) -> Vec<String> {
    titles
        .iter()
        .filter(|title| {
            let lower = title.to_lowercase();
            if excluded_terms
                .iter()
                .any(|term| lower.contains(&term.to_lowercase()))
            {
                return false;
            }
            !(policy == SvgPolicy::Exclude && lower.ends_with(".svg"))
        })
        .cloned()
        .collect()
}
