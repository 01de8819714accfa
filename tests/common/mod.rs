#![allow(dead_code)]

use async_trait::async_trait;
use explainer_assets::api::{HttpFetch, Query};
use explainer_assets::{Error, ResolverConfig, Result};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const WIKI_API: &str = "https://wiki.test/w/api.php";
pub const OPENVERSE_API: &str = "https://openverse.test/v1/images/";

pub fn test_config() -> ResolverConfig {
    ResolverConfig {
        wikipedia_api: WIKI_API.to_string(),
        openverse_api: OPENVERSE_API.to_string(),
        ..ResolverConfig::default()
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 200, 30, 255]));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

pub fn svg_bytes() -> Vec<u8> {
    br#"<svg xmlns="http://www.w3.org/2000/svg" width="12" height="9"><circle cx="6" cy="4" r="3" fill="blue"/></svg>"#.to_vec()
}

fn key(url: &str, query: &[(&str, String)]) -> String {
    let mut pairs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    format!("{url}?{}", pairs.join("&"))
}

/// Canned HTTP responses keyed by URL and query. Anything unregistered
/// fails like an unreachable host.
#[derive(Default)]
pub struct FakeFetch {
    json: HashMap<String, Value>,
    bytes: HashMap<String, Vec<u8>>,
    delay: Duration,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn page(mut self, title: &str, images: &[&str]) -> Self {
        let images: Vec<Value> = images.iter().map(|t| json!({"ns": 6, "title": t})).collect();
        self.json.insert(
            page_key(title),
            json!({"query": {"pages": {"4242": {"pageid": 4242, "title": title, "images": images}}}}),
        );
        self
    }

    pub fn page_without_images(mut self, title: &str) -> Self {
        self.json.insert(
            page_key(title),
            json!({"query": {"pages": {"77": {"pageid": 77, "title": title}}}}),
        );
        self
    }

    pub fn missing_page(mut self, title: &str) -> Self {
        self.json.insert(
            page_key(title),
            json!({"query": {"pages": {"-1": {"title": title, "missing": ""}}}}),
        );
        self
    }

    pub fn search(mut self, topic: &str, hit: Option<&str>) -> Self {
        let results: Vec<Value> = hit.into_iter().map(|t| json!({"ns": 0, "title": t})).collect();
        let query = [
            ("action", "query".to_string()),
            ("format", "json".to_string()),
            ("list", "search".to_string()),
            ("srsearch", topic.to_string()),
            ("srlimit", "1".to_string()),
        ];
        self.json
            .insert(key(WIKI_API, &query), json!({"query": {"search": results}}));
        self
    }

    pub fn image_info(mut self, file_title: &str, url: &str) -> Self {
        let query = [
            ("action", "query".to_string()),
            ("format", "json".to_string()),
            ("titles", file_title.to_string()),
            ("prop", "imageinfo".to_string()),
            ("iiprop", "url".to_string()),
        ];
        self.json.insert(
            key(WIKI_API, &query),
            json!({"query": {"pages": {"9": {"title": file_title, "imageinfo": [{"url": url}]}}}}),
        );
        self
    }

    /// A `File:` title resolving to `url`, which serves `bytes`.
    pub fn wiki_file(self, file_title: &str, url: &str, bytes: Vec<u8>) -> Self {
        self.image_info(file_title, url).file(url, bytes)
    }

    pub fn openverse(mut self, q: &str, page_size: usize, urls: &[&str]) -> Self {
        let query = [
            ("q", q.to_string()),
            ("license_type", "commercial,modification".to_string()),
            ("page_size", page_size.to_string()),
        ];
        let results: Vec<Value> = urls.iter().map(|u| json!({"id": u, "url": u})).collect();
        self.json
            .insert(key(OPENVERSE_API, &query), json!({"result_count": results.len(), "results": results}));
        self
    }

    pub fn file(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.bytes.insert(url.to_string(), bytes);
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requested(&self, needle: &str) -> bool {
        self.requests().iter().any(|r| r.contains(needle))
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

fn page_key(title: &str) -> String {
    let query = [
        ("action", "query".to_string()),
        ("format", "json".to_string()),
        ("titles", title.to_string()),
        ("prop", "images".to_string()),
        ("imlimit", "50".to_string()),
    ];
    key(WIKI_API, &query)
}

#[async_trait]
impl HttpFetch for FakeFetch {
    async fn get_json(&self, url: &str, query: Query<'_>) -> Result<Value> {
        let k = key(url, query);
        self.requests.lock().unwrap().push(k.clone());
        self.json.get(&k).cloned().ok_or(Error::SourceUnavailable {
            source_name: url.to_string(),
            reason: "connection refused".to_string(),
        })
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.requests.lock().unwrap().push(url.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.bytes.get(url).cloned().ok_or(Error::SourceUnavailable {
            source_name: url.to_string(),
            reason: "HTTP 404".to_string(),
        })
    }
}
