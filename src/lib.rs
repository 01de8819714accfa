pub mod api;
pub mod config;
pub mod download;
pub mod error;
pub mod init;
pub mod prefetch;
pub mod repair;
pub mod resolver;
pub mod scene;

pub use config::{ResolverConfig, SvgPolicy};
pub use download::DownloadedImage;
pub use error::{Error, JsonDiagnostic, Result};
pub use repair::{FixId, JsonRepair, Patch, RepairAttempt, repair, repair_as};
pub use resolver::{ImageQuery, ImageResolver};
pub use scene::{ImageRequest, Scene, SceneDocument};
