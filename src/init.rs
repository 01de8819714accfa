use anyhow::Result;
use std::path::Path;
use tokio::fs;
use tracing::info;

pub const DEFAULT_SAVE_DIR: &str = "downloaded_images";
pub const DEFAULT_MANIFEST_DIR: &str = "manifests";

pub async fn ensure_dir(path: &Path) -> Result<()> {
    if !fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false) {
        fs::create_dir_all(path).await?;
        info!("Created directory: {}", path.display());
    }
    Ok(())
}
