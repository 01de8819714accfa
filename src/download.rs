use crate::api::HttpFetch;
use crate::config::SvgPolicy;
use crate::error::{Error, Result};
use anyhow::{Context, bail};
use once_cell::sync::Lazy;
use resvg::{tiny_skia, usvg};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Upper bound on `name_1`, `name_2`, ... suffixes tried for one file.
const MAX_NAME_SUFFIX: usize = 1000;

/// A file on disk that passed a full decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedImage {
    pub path: PathBuf,
    pub source_url: String,
    pub validated: bool,
}

/// Last path segment of `url`, without query or fragment.
pub fn file_name_from_url(url: &str) -> String {
    let segment = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
            .to_string(),
        Err(_) => {
            let path = url.split(['?', '#']).next().unwrap_or_default();
            path.rsplit('/').next().unwrap_or_default().to_string()
        }
    };

    let cleaned: String = segment
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();

    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "image".to_string()
    } else {
        cleaned
    }
}

fn is_svg_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".svg")
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

fn png_name_for(svg_name: &str) -> String {
    let (stem, _) = split_extension(svg_name);
    format!("{stem}.png")
}

/// `name` for the first attempt, then `stem_N.ext`.
fn numbered_name(name: &str, attempt: usize) -> String {
    if attempt == 0 {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    format!("{stem}_{attempt}{ext}")
}

/// Largest rasterized canvas accepted, in pixels. Matches the 512 MiB
/// allocation budget of `image::Limits::default()` at four bytes per pixel.
pub const MAX_SVG_PIXELS: u64 = 512 * 1024 * 1024 / 4;

static SVG_FONTS: Lazy<Arc<usvg::fontdb::Database>> = Lazy::new(|| {
    let mut db = usvg::fontdb::Database::new();
    db.load_system_fonts();
    debug!("Loaded {} font faces for SVG text", db.len());
    Arc::new(db)
});

/// Requested families first, then the generic ones, then any installed face.
fn svg_font_resolver() -> usvg::FontResolver<'static> {
    usvg::FontResolver {
        select_font: Box::new(|font, fontdb| {
            let mut families: Vec<usvg::fontdb::Family<'_>> = font
                .families()
                .iter()
                .map(|family| match family {
                    usvg::FontFamily::Serif => usvg::fontdb::Family::Serif,
                    usvg::FontFamily::SansSerif => usvg::fontdb::Family::SansSerif,
                    usvg::FontFamily::Cursive => usvg::fontdb::Family::Cursive,
                    usvg::FontFamily::Fantasy => usvg::fontdb::Family::Fantasy,
                    usvg::FontFamily::Monospace => usvg::fontdb::Family::Monospace,
                    usvg::FontFamily::Named(name) => usvg::fontdb::Family::Name(name),
                })
                .collect();
            families.extend([
                usvg::fontdb::Family::SansSerif,
                usvg::fontdb::Family::Serif,
                usvg::fontdb::Family::Monospace,
            ]);

            let style = match font.style() {
                usvg::FontStyle::Normal => usvg::fontdb::Style::Normal,
                usvg::FontStyle::Italic => usvg::fontdb::Style::Italic,
                usvg::FontStyle::Oblique => usvg::fontdb::Style::Oblique,
            };
            let query = usvg::fontdb::Query {
                families: &families,
                weight: usvg::fontdb::Weight(font.weight()),
                stretch: usvg::fontdb::Stretch::Normal,
                style,
            };

            fontdb
                .query(&query)
                .or_else(|| fontdb.faces().next().map(|face| face.id))
        }),
        select_fallback: usvg::FontResolver::default_fallback_selector(),
    }
}

/// Renders an SVG document to PNG bytes at its intrinsic size.
///
/// Canvases larger than [`MAX_SVG_PIXELS`] are rejected before any pixel
/// buffer is allocated.
pub fn rasterize_svg(bytes: &[u8]) -> anyhow::Result<Vec<u8>> {
    let opts = usvg::Options {
        fontdb: Arc::clone(&SVG_FONTS),
        font_resolver: svg_font_resolver(),
        ..Default::default()
    };
    let tree = usvg::Tree::from_data(bytes, &opts).context("parse svg tree")?;

    let size = tree.size().to_int_size();
    let (width, height) = (size.width(), size.height());
    let pixels = u64::from(width) * u64::from(height);
    if pixels > MAX_SVG_PIXELS {
        bail!("svg canvas {width}x{height} exceeds the {MAX_SVG_PIXELS} pixel limit");
    }

    let mut pixmap = tiny_skia::Pixmap::new(width, height)
        .with_context(|| format!("allocate {width}x{height} pixmap"))?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    let mut rgba = Vec::with_capacity(pixmap.data().len());
    for px in pixmap.pixels() {
        let c = px.demultiply();
        rgba.extend_from_slice(&[c.red(), c.green(), c.blue(), c.alpha()]);
    }

    let img = image::RgbaImage::from_raw(width, height, rgba).context("pixel buffer size mismatch")?;
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png)
        .context("encode png")?;
    Ok(out.into_inner())
}

/// Fully decodes the file at `path`.
pub fn validate_image(path: &Path) -> Result<()> {
    let reader = image::ImageReader::open(path)?
        .with_guessed_format()
        .map_err(|e| Error::invalid_image(path, e))?;
    reader
        .decode()
        .map(|_| ())
        .map_err(|e| Error::invalid_image(path, e))
}

fn store_validated(bytes: Vec<u8>, save_dir: &Path, name: &str) -> Result<PathBuf> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".download-")
        .tempfile_in(save_dir)?;
    tmp.write_all(&bytes)?;
    tmp.flush()?;

    // The temp file is removed on drop if validation fails.
    validate_image(tmp.path())?;

    // Never overwrite: a taken name gets a numeric suffix.
    for attempt in 0..=MAX_NAME_SUFFIX {
        let final_path = save_dir.join(numbered_name(name, attempt));
        match tmp.persist_noclobber(&final_path) {
            Ok(_) => return Ok(final_path),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => tmp = e.file,
            Err(e) => return Err(Error::Io(e.error)),
        }
    }
    Err(Error::invalid_image(
        save_dir.join(name),
        format!("no free file name after {MAX_NAME_SUFFIX} attempts"),
    ))
}

/// Downloads `url` into `save_dir`, converting SVG per `policy`, and keeps
/// the file only if it decodes.
pub async fn download_image(
    fetch: &dyn HttpFetch,
    url: &str,
    save_dir: &Path,
    policy: SvgPolicy,
) -> Result<DownloadedImage> {
    info!("Downloading image from URL: {url}");
    let mut name = file_name_from_url(url);
    let mut bytes = fetch.get_bytes(url).await?;

    if is_svg_name(&name) {
        match policy {
            SvgPolicy::Exclude => {
                return Err(Error::invalid_image(save_dir.join(&name), "svg excluded by policy"));
            }
            SvgPolicy::Rasterize => {
                info!("Converting SVG to PNG: {name}");
                let target = png_name_for(&name);
                let svg_bytes = std::mem::take(&mut bytes);
                bytes = tokio::task::spawn_blocking(move || rasterize_svg(&svg_bytes))
                    .await
                    .map_err(|e| Error::invalid_image(save_dir.join(&name), e))?
                    .map_err(|e| Error::invalid_image(save_dir.join(&name), format!("{e:#}")))?;
                name = target;
            }
        }
    }

    let dir = save_dir.to_path_buf();
    let file_name = name.clone();
    let stored = tokio::task::spawn_blocking(move || store_validated(bytes, &dir, &file_name))
        .await
        .map_err(|e| Error::invalid_image(save_dir.join(&name), e))?;

    match stored {
        Ok(path) => {
            info!("Successfully downloaded image to: {}", path.display());
            Ok(DownloadedImage {
                path,
                source_url: url.to_string(),
                validated: true,
            })
        }
        Err(err) => {
            warn!("Error processing image {url}: {err}");
            Err(err)
        }
    }
}
