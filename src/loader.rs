//! Importing a directory of images into a scene.
//!
//! Every entry of the directory is classified by pixel representation.
//! Volumes are handed straight to the scene; label images are stacked into
//! one segmentation, written to a temporary NRRD archive, handed to the
//! scene and then removed.

use log::{debug, info, warn};
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{ImportError, Result};
use crate::image::{self, LabelImage, SourceImage};
use crate::merge::{merge_structures, MergedSegmentation};
use crate::nrrd;
use crate::scene::Scene;

/// File name of the merged archive inside its temporary directory.
pub const DEFAULT_ARCHIVE_NAME: &str = "Structures.nrrd";

/// Options for a directory import.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Skip entries that cannot be read as images instead of aborting.
    pub skip_unreadable: bool,

    /// File name of the merged archive; its stem names the segmentation.
    pub archive_name: String,

    /// Where the temporary directory is created. Defaults to the system
    /// temporary directory.
    pub temp_root: Option<PathBuf>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            skip_unreadable: false,
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            temp_root: None,
        }
    }
}

impl ImportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_unreadable(mut self, skip: bool) -> Self {
        self.skip_unreadable = skip;
        self
    }

    pub fn archive_name(mut self, name: impl Into<String>) -> Self {
        self.archive_name = name.into();
        self
    }

    pub fn temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }
}

/// What an import did to the scene.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportSummary {
    /// Files handed to the scene as volumes, in discovery order.
    pub volumes: Vec<PathBuf>,
    /// Names of the merged structures, in channel order.
    pub structures: Vec<String>,
    /// Entries skipped because they could not be read.
    pub skipped: Vec<PathBuf>,
    /// Location of the temporary archive, if one was written. It no longer
    /// exists once the import returns.
    pub archive: Option<PathBuf>,
}

impl ImportSummary {
    pub fn loaded_segmentation(&self) -> bool {
        self.archive.is_some()
    }
}

/// Loads every image in a directory into a [`Scene`].
#[derive(Debug, Clone, Default)]
pub struct DirectoryImport {
    options: ImportOptions,
}

impl DirectoryImport {
    pub fn new(options: ImportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    /// Imports every image found in `directory` into `scene`.
    ///
    /// Entries are visited in file name order. Label images are collected and
    /// merged into one segmentation after the last entry; every other image is
    /// handed to the scene as a volume straight away. Any error aborts the
    /// import, and nodes already added to the scene stay.
    ///
    /// # Arguments
    ///
    /// * `directory` - The directory to import. It is not searched recursively.
    /// * `scene` - The host that receives the volumes and the segmentation.
    ///
    /// # Returns
    ///
    /// An `ImportSummary` listing the volumes, merged structures and skipped
    /// entries, or the `ImportError` that stopped the import.
    pub fn run<S: Scene + ?Sized>(&self, directory: &Path, scene: &mut S) -> Result<ImportSummary> {
        check_archive_name(&self.options.archive_name)?;
        let mut summary = ImportSummary::default();
        let mut structures: Vec<LabelImage> = Vec::new();

        for path in list_entries(directory)? {
            let source = match image::classify(&path) {
                Ok(source) => source,
                Err(e) if self.options.skip_unreadable => {
                    warn!("Skipping {}: {}", path.display(), e);
                    summary.skipped.push(path);
                    continue;
                }
                Err(source) => return Err(ImportError::Image { path, source }),
            };
            debug!("{} classified as {}", path.display(), source.kind());

            match source {
                SourceImage::Label(label) => structures.push(label),
                SourceImage::Volume(path) => {
                    info!("Loading {}", path.display());
                    scene
                        .add_volume(&path)
                        .map_err(|source| ImportError::Scene {
                            path: path.clone(),
                            source,
                        })?;
                    summary.volumes.push(path);
                }
            }
        }

        if let Some(merged) = merge_structures(&structures)? {
            summary.structures = merged.names.clone();
            summary.archive = Some(self.load_segmentation(merged, scene)?);
        }

        info!("Processing completed");
        Ok(summary)
    }

    /// Writes `merged` to a fresh temporary directory, hands it to the scene
    /// and removes the file again. Returns where the archive was written.
    fn load_segmentation<S: Scene + ?Sized>(
        &self,
        merged: MergedSegmentation,
        scene: &mut S,
    ) -> Result<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("loadnii");
        let temp_dir = match &self.options.temp_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(ImportError::TempDir)?;

        let archive = temp_dir.path().join(&self.options.archive_name);
        info!(
            "Writing {} structures to {}",
            merged.channel_count(),
            archive.display()
        );
        nrrd::write(&archive, &merged.into_nrrd()).map_err(|source| {
            ImportError::WriteArchive {
                path: archive.clone(),
                source,
            }
        })?;

        scene
            .add_segmentation(&archive)
            .map_err(|source| ImportError::Scene {
                path: archive.clone(),
                source,
            })?;

        fs::remove_file(&archive).map_err(|source| ImportError::RemoveArchive {
            path: archive.clone(),
            source,
        })?;
        // dropping the guard removes the now empty directory
        drop(temp_dir);
        Ok(archive)
    }
}

/// The archive must land inside its temporary directory, so only a plain
/// file name is accepted.
fn check_archive_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(file_name)), None) if file_name == name => Ok(()),
        _ => Err(ImportError::InvalidArchiveName(name.to_string())),
    }
}

/// Entries of `directory` in file name order. Not recursive and not filtered.
fn list_entries(directory: &Path) -> Result<Vec<PathBuf>> {
    let list_error = |source| ImportError::ListDirectory {
        path: directory.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(directory)
        .map_err(list_error)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(list_error)?;
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(entries)
}
