use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use explainer_assets::config::ResolverConfig;
use explainer_assets::error::Error;
use explainer_assets::init;
use explainer_assets::prefetch;
use explainer_assets::repair::JsonRepair;
use explainer_assets::resolver::{ImageQuery, ImageResolver};
use explainer_assets::scene::strip_markup;
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "explainer-assets", about = "Image and scene-JSON tooling for explainer videos")]
struct Cli {
    /// Resolver config (JSON); defaults are used when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download validated images for a topic.
    Images {
        topic: String,
        #[arg(short = 'n', long, default_value_t = 2)]
        count: usize,
        #[arg(short, long, default_value = init::DEFAULT_SAVE_DIR)]
        out: PathBuf,
    },
    /// Repair model-generated JSON read from FILE or stdin.
    Repair {
        file: Option<PathBuf>,
        /// Remove markup tags from scene text fields.
        #[arg(long)]
        strip_markup: bool,
    },
    /// Fetch every image referenced by scene files or directories.
    Prefetch {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long, default_value = init::DEFAULT_SAVE_DIR)]
        out: PathBuf,
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = ResolverConfig::load_or_default(cli.config.as_deref()).await?;

    let code = match cli.command {
        Command::Images { topic, count, out } => {
            let resolver = ImageResolver::new(config)?;
            let paths = resolver.resolve(&ImageQuery::new(topic, count, out)).await;
            for path in &paths {
                println!("{}", path.display());
            }
            if paths.is_empty() { 2 } else { 0 }
        }
        Command::Repair { file, strip_markup: strip } => {
            let raw = match file {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read stdin")?;
                    buf
                }
            };

            match JsonRepair::default().repair(&raw) {
                Ok(mut value) => {
                    if strip {
                        strip_markup(&mut value, None);
                    }
                    println!("{}", serde_json::to_string_pretty(&value)?);
                    0
                }
                Err(Error::MalformedJson(diag)) => {
                    eprintln!("[ERROR] {diag}");
                    1
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Prefetch {
            inputs,
            out,
            manifest,
        } => {
            let manifest_path = manifest.unwrap_or_else(|| {
                PathBuf::from(init::DEFAULT_MANIFEST_DIR).join(format!(
                    "prefetch-{}.json",
                    chrono::Local::now().format("%Y%m%d-%H%M%S")
                ))
            });
            let manifest_dir = manifest_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));

            let resolver = ImageResolver::new(config)?;
            let result = prefetch::prefetch(&resolver, &inputs, &out, &manifest_dir).await?;
            result.write(&manifest_path).await?;
            println!(
                "{} images across {} documents ({} failed) -> {}",
                result.image_count(),
                result.documents.len(),
                result.failures.len(),
                manifest_path.display()
            );
            if result.failures.is_empty() { 0 } else { 1 }
        }
    };

    std::process::exit(code);
}
