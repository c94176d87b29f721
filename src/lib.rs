//! Load a directory of medical images into a scene, merging its label images
//! into a single multi-segment segmentation.
//!
//! ```no_run
//! use loadnii::{DirectoryImport, ExportScene, ImportOptions};
//! use std::path::Path;
//!
//! let mut scene = ExportScene::new("loaded")?;
//! let summary = DirectoryImport::new(ImportOptions::new()).run(Path::new("patient01"), &mut scene)?;
//! println!("{} volumes, {} structures", summary.volumes.len(), summary.structures.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod common;
pub mod error;
pub mod image;
pub mod loader;
pub mod merge;
pub mod nrrd;
pub mod scene;

pub use common::{Geometry, ImageKind};
pub use error::ImportError;
pub use loader::{DirectoryImport, ImportOptions, ImportSummary};
pub use merge::MergedSegmentation;
pub use scene::{ExportScene, Scene, SceneError};
