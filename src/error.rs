//! Error type for directory imports.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::image::ImageError;
use crate::nrrd::NrrdError;
use crate::scene::SceneError;

/// Errors that abort a directory import.
#[derive(Error, Debug)]
pub enum ImportError {
    /// The input directory could not be listed.
    #[error("failed to list directory '{}': {source}", .path.display())]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A directory entry could not be read as an image.
    #[error("failed to read image '{}': {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: ImageError,
    },

    /// A label image does not have the same voxel grid as the first one.
    #[error("label image '{}' has shape {found:?}, expected {expected:?}", .path.display())]
    ShapeMismatch {
        path: PathBuf,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// The archive name is not a plain file name.
    #[error("archive name '{0}' must be a plain file name")]
    InvalidArchiveName(String),

    /// The temporary directory for the merged archive could not be created.
    #[error("failed to create temporary directory: {0}")]
    TempDir(#[source] io::Error),

    /// The merged archive could not be written.
    #[error("failed to write archive '{}': {source}", .path.display())]
    WriteArchive {
        path: PathBuf,
        #[source]
        source: NrrdError,
    },

    /// The merged archive could not be removed after loading.
    #[error("failed to remove temporary archive '{}': {source}", .path.display())]
    RemoveArchive {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The scene refused to load a file.
    #[error("scene failed to load '{}': {source}", .path.display())]
    Scene {
        path: PathBuf,
        #[source]
        source: SceneError,
    },
}

/// Result type for directory imports.
pub type Result<T> = std::result::Result<T, ImportError>;
