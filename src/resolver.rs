use crate::api::openverse::OpenverseSource;
use crate::api::wikipedia::{PageLookup, WikipediaSource, filter_titles};
use crate::api::{HttpFetch, ReqwestFetch};
use crate::config::ResolverConfig;
use crate::download::{DownloadedImage, download_image};
use crate::error::Error;
use crossbeam::queue::SegQueue;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageQuery {
    pub topic: String,
    pub desired_count: usize,
    pub save_dir: PathBuf,
}

impl ImageQuery {
    pub fn new(topic: impl Into<String>, desired_count: usize, save_dir: impl Into<PathBuf>) -> Self {
        Self {
            topic: topic.into(),
            desired_count,
            save_dir: save_dir.into(),
        }
    }
}

enum DownloadJob {
    /// A `File:` title whose URL still has to be looked up.
    FileTitle(String),
    Url(String),
}

/// Resolves a topic to validated images on disk, Wikipedia first and
/// Openverse as the fallback.
///
/// Failures never reach the caller: they only shrink the result, which may
/// be empty.
pub struct ImageResolver {
    config: ResolverConfig,
    fetch: Arc<dyn HttpFetch>,
    wikipedia: WikipediaSource,
    openverse: OpenverseSource,
}

impl ImageResolver {
    pub fn new(config: ResolverConfig) -> anyhow::Result<Self> {
        let fetch = Arc::new(ReqwestFetch::new(&config)?);
        Ok(Self::with_fetch(config, fetch))
    }

    pub fn with_fetch(config: ResolverConfig, fetch: Arc<dyn HttpFetch>) -> Self {
        let wikipedia = WikipediaSource::new(
            Arc::clone(&fetch),
            config.wikipedia_api.clone(),
            config.image_list_limit,
        );
        let openverse = OpenverseSource::new(
            Arc::clone(&fetch),
            config.openverse_api.clone(),
            config.openverse_license_type.clone(),
        );
        Self {
            config,
            fetch,
            wikipedia,
            openverse,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub async fn resolve(&self, query: &ImageQuery) -> Vec<PathBuf> {
        self.resolve_images(query)
            .await
            .into_iter()
            .map(|img| img.path)
            .collect()
    }

    pub async fn resolve_images(&self, query: &ImageQuery) -> Vec<DownloadedImage> {
        let count = query.desired_count;
        let topic = query.topic.as_str();
        if count == 0 {
            return Vec::new();
        }

        info!("Starting image fetch for: {topic}");
        if let Err(e) = tokio::fs::create_dir_all(&query.save_dir).await {
            warn!("Cannot create {}: {e}", query.save_dir.display());
            return Vec::new();
        }
        let save_dir = query.save_dir.as_path();

        let lookup = match self.wikipedia.page_images(topic).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!("Wikipedia lookup failed for {topic}: {e}");
                return self.fallback(topic, count, save_dir).await;
            }
        };

        let lookup = match lookup {
            PageLookup::Missing => {
                warn!("No article found for topic: {topic}, searching for related articles");
                match self.wikipedia.search_title(topic).await {
                    Ok(related) => {
                        info!("Using related article title: {related}");
                        match self.wikipedia.page_images(&related).await {
                            Ok(lookup) => lookup,
                            Err(e) => {
                                warn!("Wikipedia lookup failed for {related}: {e}");
                                return self.fallback(&related, count, save_dir).await;
                            }
                        }
                    }
                    Err(Error::NoMatchFound { .. }) => {
                        warn!("No related articles found, switching to Openverse fallback");
                        return self.fallback(topic, count, save_dir).await;
                    }
                    Err(e) => {
                        warn!("Wikipedia search failed for {topic}: {e}");
                        return self.fallback(topic, count, save_dir).await;
                    }
                }
            }
            other => other,
        };

        let (title, image_titles) = match lookup {
            PageLookup::Images { title, image_titles } => (title, image_titles),
            PageLookup::NoImages { title } => {
                warn!("No images found in article: {title}");
                return self.fallback(&title, count, save_dir).await;
            }
            PageLookup::Missing => {
                warn!("Related article for {topic} vanished");
                return self.fallback(topic, count, save_dir).await;
            }
        };

        let mut candidates = filter_titles(
            &image_titles,
            self.config.svg_policy,
            &self.config.excluded_title_terms,
        );
        info!("Found {} candidate images after filtering", candidates.len());
        candidates.truncate(count);

        let jobs = candidates.into_iter().map(DownloadJob::FileTitle).collect();
        let mut images = self.download_all(jobs, save_dir).await;

        if images.len() < count {
            let needed = count - images.len();
            info!(
                "Only got {} images from Wikipedia, need {needed} more",
                images.len()
            );
            images.extend(self.fallback(&title, needed, save_dir).await);
        }

        finish(images, count)
    }

    async fn fallback(&self, topic: &str, count: usize, save_dir: &Path) -> Vec<DownloadedImage> {
        let urls = match self.openverse.search(topic, count).await {
            Ok(urls) => urls,
            Err(e) => {
                warn!("Openverse API error: {e}");
                return Vec::new();
            }
        };
        let jobs = urls.into_iter().map(DownloadJob::Url).collect();
        let images = self.download_all(jobs, save_dir).await;
        info!("Returning {} images from Openverse fallback", images.len());
        finish(images, count)
    }

    /// Runs every job on a pool of at most `max_workers` concurrent downloads.
    /// Output is in completion order.
    async fn download_all(&self, jobs: Vec<DownloadJob>, save_dir: &Path) -> Vec<DownloadedImage> {
        if jobs.is_empty() {
            return Vec::new();
        }

        let workers = self.config.max_workers.min(jobs.len()).max(1);
        let permits = Arc::new(Semaphore::new(workers));
        let collected = Arc::new(SegQueue::new());
        let mut tasks = JoinSet::new();

        for job in jobs {
            let permits = Arc::clone(&permits);
            let collected = Arc::clone(&collected);
            let fetch = Arc::clone(&self.fetch);
            let wikipedia = self.wikipedia.clone();
            let dir = save_dir.to_path_buf();
            let policy = self.config.svg_policy;

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };

                let url = match job {
                    DownloadJob::Url(url) => url,
                    DownloadJob::FileTitle(title) => {
                        info!("Processing image title: {title}");
                        match wikipedia.image_url(&title).await {
                            Ok(Some(url)) => url,
                            Ok(None) => {
                                warn!("No image URL for {title}");
                                return;
                            }
                            Err(e) => {
                                warn!("Image URL lookup failed for {title}: {e}");
                                return;
                            }
                        }
                    }
                };

                match download_image(fetch.as_ref(), &url, &dir, policy).await {
                    Ok(image) => collected.push(image),
                    Err(e) => warn!("Dropping {url}: {e}"),
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Download task failed: {e}");
            }
        }

        let mut images = Vec::with_capacity(collected.len());
        while let Some(image) = collected.pop() {
            images.push(image);
        }
        images
    }
}

fn finish(mut images: Vec<DownloadedImage>, count: usize) -> Vec<DownloadedImage> {
    let mut seen = HashSet::new();
    images.retain(|img| seen.insert(img.path.clone()));
    images.truncate(count);
    info!("Final image count: {}", images.len());
    images
}
