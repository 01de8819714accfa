mod common;

use common::{FakeFetch, png_bytes, svg_bytes, test_config};
use explainer_assets::{ImageQuery, ImageResolver, ResolverConfig, SvgPolicy};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn resolver(config: ResolverConfig, fetch: &Arc<FakeFetch>) -> ImageResolver {
    ImageResolver::with_fetch(config, Arc::clone(fetch) as Arc<dyn explainer_assets::api::HttpFetch>)
}

fn assert_decodes(path: &Path) {
    assert!(path.is_file(), "{} missing", path.display());
    image::ImageReader::open(path)
        .unwrap()
        .with_guessed_format()
        .unwrap()
        .decode()
        .unwrap_or_else(|e| panic!("{} does not decode: {e}", path.display()));
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

const UP: &str = "https://upload.test/commons";

#[tokio::test]
async fn exact_page_yields_requested_count() {
    let fetch = Arc::new(
        FakeFetch::new()
            .page(
                "Quantum chromodynamics",
                &["File:Quark.png", "File:Wikipedia logo.png", "File:Gluon.jpg", "File:Extra.png"],
            )
            .wiki_file("File:Quark.png", &format!("{UP}/Quark.png"), png_bytes(4, 4))
            .wiki_file("File:Gluon.jpg", &format!("{UP}/Gluon.jpg"), png_bytes(3, 2))
            .wiki_file("File:Extra.png", &format!("{UP}/Extra.png"), png_bytes(2, 2)),
    );
    let out = tempfile::tempdir().unwrap();
    let save_dir = out.path().join("images");

    let paths = resolver(test_config(), &fetch)
        .resolve(&ImageQuery::new("Quantum chromodynamics", 2, &save_dir))
        .await;

    assert_eq!(paths.len(), 2);
    for path in &paths {
        assert_decodes(path);
    }
    assert!(!fetch.requested("logo"));
    assert!(!fetch.requested("Extra"));
    assert!(!fetch.requested("openverse"));
}

#[tokio::test]
async fn missing_page_without_search_hit_uses_fallback_only() {
    let fetch = Arc::new(
        FakeFetch::new()
            .missing_page("Zorblax theory")
            .search("Zorblax theory", None)
            .openverse("Zorblax theory", 2, &["https://cdn.test/zorblax.png"])
            .file("https://cdn.test/zorblax.png", png_bytes(5, 5)),
    );
    let out = tempfile::tempdir().unwrap();

    let images = resolver(test_config(), &fetch)
        .resolve_images(&ImageQuery::new("Zorblax theory", 2, out.path()))
        .await;

    assert_eq!(images.len(), 1);
    assert_eq!(images[0].source_url, "https://cdn.test/zorblax.png");
    assert!(images[0].validated);
    assert_eq!(images[0].path, out.path().join("zorblax.png"));
    assert_decodes(&images[0].path);
    assert!(!fetch.requested("prop=imageinfo"));
}

#[tokio::test]
async fn search_hit_becomes_working_title() {
    let fetch = Arc::new(
        FakeFetch::new()
            .missing_page("quark gluon stuff")
            .search("quark gluon stuff", Some("Quark–gluon plasma"))
            .page("Quark–gluon plasma", &["File:Plasma.png"])
            .wiki_file("File:Plasma.png", &format!("{UP}/Plasma.png"), png_bytes(2, 2)),
    );
    let out = tempfile::tempdir().unwrap();

    let paths = resolver(test_config(), &fetch)
        .resolve(&ImageQuery::new("quark gluon stuff", 1, out.path()))
        .await;

    assert_eq!(paths, vec![out.path().join("Plasma.png")]);
    assert_decodes(&paths[0]);
}

#[tokio::test]
async fn invalid_download_is_dropped_and_shortfall_filled_once() {
    let fetch = Arc::new(
        FakeFetch::new()
            .page("Standard Model", &["File:Good.png", "File:Broken.png"])
            .wiki_file("File:Good.png", &format!("{UP}/Good.png"), png_bytes(2, 2))
            .wiki_file("File:Broken.png", &format!("{UP}/Broken.png"), b"<html>not an image</html>".to_vec())
            .openverse("Standard Model", 1, &["https://cdn.test/sm.png"])
            .file("https://cdn.test/sm.png", png_bytes(6, 3)),
    );
    let out = tempfile::tempdir().unwrap();

    let paths = resolver(test_config(), &fetch)
        .resolve(&ImageQuery::new("Standard Model", 2, out.path()))
        .await;

    assert_eq!(paths.len(), 2);
    for path in &paths {
        assert_decodes(path);
    }
    // The broken file and every temp file are gone.
    assert_eq!(dir_entries(out.path()), vec!["Good.png", "sm.png"]);
    let openverse_calls = fetch
        .requests()
        .iter()
        .filter(|r| r.starts_with(common::OPENVERSE_API))
        .count();
    assert_eq!(openverse_calls, 1);
}

#[tokio::test]
async fn supplement_with_same_file_name_keeps_both_images() {
    let fetch = Arc::new(
        FakeFetch::new()
            .page("Neutrino", &["File:Detector.png"])
            .wiki_file("File:Detector.png", &format!("{UP}/Detector.png"), png_bytes(4, 4))
            .openverse("Neutrino", 1, &["https://cdn.test/Detector.png"])
            .file("https://cdn.test/Detector.png", png_bytes(9, 5)),
    );
    let out = tempfile::tempdir().unwrap();

    let images = resolver(test_config(), &fetch)
        .resolve_images(&ImageQuery::new("Neutrino", 2, out.path()))
        .await;

    assert_eq!(images.len(), 2);
    assert_eq!(dir_entries(out.path()), vec!["Detector.png", "Detector_1.png"]);
    for image in &images {
        let decoded = image::open(&image.path).unwrap();
        let expected = if image.source_url.starts_with(UP) { 4 } else { 9 };
        assert_eq!(decoded.width(), expected, "{} came from {}", image.path.display(), image.source_url);
    }
}

#[tokio::test]
async fn nothing_anywhere_is_an_empty_result() {
    let fetch = Arc::new(
        FakeFetch::new()
            .missing_page("asdfqwer")
            .search("asdfqwer", None)
            .openverse("asdfqwer", 3, &[]),
    );
    let out = tempfile::tempdir().unwrap();

    let paths = resolver(test_config(), &fetch)
        .resolve(&ImageQuery::new("asdfqwer", 3, out.path()))
        .await;

    assert!(paths.is_empty());
}

#[tokio::test]
async fn unreachable_sources_are_an_empty_result() {
    let fetch = Arc::new(FakeFetch::new());
    let out = tempfile::tempdir().unwrap();

    let paths = resolver(test_config(), &fetch)
        .resolve(&ImageQuery::new("CP violation", 2, out.path()))
        .await;

    assert!(paths.is_empty());
    assert!(fetch.requested("openverse"));
}

#[tokio::test]
async fn page_without_media_goes_to_fallback_with_page_title() {
    let fetch = Arc::new(
        FakeFetch::new()
            .page_without_images("Bare page")
            .openverse("Bare page", 1, &["https://cdn.test/bare.png"])
            .file("https://cdn.test/bare.png", png_bytes(2, 2)),
    );
    let out = tempfile::tempdir().unwrap();

    let paths = resolver(test_config(), &fetch)
        .resolve(&ImageQuery::new("Bare page", 1, out.path()))
        .await;

    assert_eq!(paths, vec![out.path().join("bare.png")]);
}

#[tokio::test]
async fn svg_is_rasterized_to_png() {
    let fetch = Arc::new(
        FakeFetch::new()
            .page("Feynman diagram", &["File:Diagram.svg"])
            .wiki_file("File:Diagram.svg", &format!("{UP}/Diagram.svg"), svg_bytes()),
    );
    let out = tempfile::tempdir().unwrap();

    let paths = resolver(test_config(), &fetch)
        .resolve(&ImageQuery::new("Feynman diagram", 1, out.path()))
        .await;

    assert_eq!(paths, vec![out.path().join("Diagram.png")]);
    let img = image::open(&paths[0]).unwrap();
    assert_eq!((img.width(), img.height()), (12, 9));
    assert_eq!(dir_entries(out.path()), vec!["Diagram.png"]);
}

#[tokio::test]
async fn svg_exclusion_skips_vector_titles() {
    let fetch = Arc::new(
        FakeFetch::new()
            .page("Feynman diagram", &["File:Diagram.svg", "File:Photo.png"])
            .wiki_file("File:Photo.png", &format!("{UP}/Photo.png"), png_bytes(2, 2)),
    );
    let out = tempfile::tempdir().unwrap();
    let config = ResolverConfig {
        svg_policy: SvgPolicy::Exclude,
        ..test_config()
    };

    let paths = resolver(config, &fetch)
        .resolve(&ImageQuery::new("Feynman diagram", 1, out.path()))
        .await;

    assert_eq!(paths, vec![out.path().join("Photo.png")]);
    assert!(!fetch.requested("Diagram"));
}

#[tokio::test]
async fn downloads_respect_worker_limit() {
    let titles: Vec<String> = (0..8).map(|i| format!("File:Img{i}.png")).collect();
    let title_refs: Vec<&str> = titles.iter().map(String::as_str).collect();
    let mut fake = FakeFetch::new()
        .with_delay(Duration::from_millis(40))
        .page("Hadron", &title_refs);
    for (i, title) in titles.iter().enumerate() {
        fake = fake.wiki_file(title, &format!("{UP}/Img{i}.png"), png_bytes(2, 2));
    }
    let fetch = Arc::new(fake);
    let out = tempfile::tempdir().unwrap();

    let paths = resolver(test_config(), &fetch)
        .resolve(&ImageQuery::new("Hadron", 8, out.path()))
        .await;

    assert_eq!(paths.len(), 8);
    let peak = fetch.peak_in_flight();
    assert!(peak <= 5, "peak {peak} exceeds pool size");
    assert!(peak > 1, "downloads never overlapped");
}

#[tokio::test]
async fn configured_worker_limit_is_honoured() {
    let mut fake = FakeFetch::new()
        .with_delay(Duration::from_millis(20))
        .page("Meson", &["File:A.png", "File:B.png", "File:C.png", "File:D.png"]);
    for name in ["A", "B", "C", "D"] {
        fake = fake.wiki_file(&format!("File:{name}.png"), &format!("{UP}/{name}.png"), png_bytes(1, 1));
    }
    let fetch = Arc::new(fake);
    let out = tempfile::tempdir().unwrap();
    let config = ResolverConfig {
        max_workers: 2,
        ..test_config()
    };

    let paths = resolver(config, &fetch)
        .resolve(&ImageQuery::new("Meson", 4, out.path()))
        .await;

    assert_eq!(paths.len(), 4);
    assert!(fetch.peak_in_flight() <= 2);
}

#[tokio::test]
async fn zero_count_makes_no_requests() {
    let fetch = Arc::new(FakeFetch::new());
    let out = tempfile::tempdir().unwrap();

    let paths = resolver(test_config(), &fetch)
        .resolve(&ImageQuery::new("Anything", 0, out.path()))
        .await;

    assert!(paths.is_empty());
    assert!(fetch.requests().is_empty());
}

#[tokio::test]
async fn save_directory_is_created() {
    let fetch = Arc::new(
        FakeFetch::new()
            .page("Proton", &["File:P.png"])
            .wiki_file("File:P.png", &format!("{UP}/P.png"), png_bytes(2, 2)),
    );
    let out = tempfile::tempdir().unwrap();
    let nested = out.path().join("a").join("b");

    let paths = resolver(test_config(), &fetch)
        .resolve(&ImageQuery::new("Proton", 1, &nested))
        .await;

    assert_eq!(paths, vec![nested.join("P.png")]);
}
