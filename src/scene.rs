//! The host scene that imported files are handed to.
//!
//! Import logic only talks to the [`Scene`] trait. [`ExportScene`] is the
//! host used by the command line tool: it keeps a copy of every loaded file
//! in an output directory.

use log::info;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::image::structure_name;
use crate::merge::MergedSegmentation;
use crate::nrrd::{self, NrrdError};

/// Errors a scene can report when loading a file.
#[derive(Error, Debug)]
pub enum SceneError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid segmentation archive: {0}")]
    Archive(#[from] NrrdError),

    #[error("'{}' is not a file", .0.display())]
    NotAFile(PathBuf),
}

/// Loaders of the host application.
///
/// Paths passed to `add_segmentation` are temporary and only guaranteed to
/// exist for the duration of the call.
pub trait Scene {
    /// Loads `path` as an intensity volume.
    fn add_volume(&mut self, path: &Path) -> Result<(), SceneError>;

    /// Loads `path` as a multi-segment label map.
    fn add_segmentation(&mut self, path: &Path) -> Result<(), SceneError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Volume,
    Segmentation,
}

/// A node created by [`ExportScene`].
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub kind: NodeKind,
    pub name: String,
    /// Where the node's file was stored.
    pub path: PathBuf,
    /// Segment names, empty for volumes.
    pub segments: Vec<String>,
}

/// A scene that stores every loaded file in `output_dir`.
#[derive(Debug)]
pub struct ExportScene {
    output_dir: PathBuf,
    nodes: Vec<SceneNode>,
}

impl ExportScene {
    pub fn new(output_dir: impl Into<PathBuf>) -> Result<Self, SceneError> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            nodes: Vec::new(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn nodes(&self) -> &[SceneNode] {
        &self.nodes
    }

    /// A path in the output directory that does not exist yet, suffixing
    /// `_1`, `_2`, ... to the stem when needed.
    fn unique_path(&self, stem: &str, extension: &str) -> PathBuf {
        let mut candidate = self.output_dir.join(format!("{}{}", stem, extension));
        let mut counter = 1;
        while candidate.exists() {
            candidate = self
                .output_dir
                .join(format!("{}_{}{}", stem, counter, extension));
            counter += 1;
        }
        candidate
    }
}

fn ensure_file(path: &Path) -> Result<(), SceneError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(SceneError::NotAFile(path.to_path_buf()))
    }
}

impl Scene for ExportScene {
    fn add_volume(&mut self, path: &Path) -> Result<(), SceneError> {
        ensure_file(path)?;
        let name = structure_name(path);
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let extension = file_name
            .as_deref()
            .and_then(|n| n.strip_prefix(name.as_str()))
            .unwrap_or("")
            .to_string();
        let destination = self.unique_path(&name, &extension);
        fs::copy(path, &destination)?;
        info!("Added volume node '{}' ({})", name, destination.display());

        self.nodes.push(SceneNode {
            kind: NodeKind::Volume,
            name,
            path: destination,
            segments: Vec::new(),
        });
        Ok(())
    }

    fn add_segmentation(&mut self, path: &Path) -> Result<(), SceneError> {
        ensure_file(path)?;
        let image = nrrd::read(path)?;
        let segments: Vec<String> = (0..)
            .map_while(|i| image.metadata_value(&MergedSegmentation::name_key(i)))
            .map(str::to_string)
            .collect();

        let name = structure_name(path);
        let destination = self.unique_path(&name, ".seg.nrrd");
        fs::copy(path, &destination)?;
        info!(
            "Added segmentation node '{}' with segments {:?} ({})",
            name,
            segments,
            destination.display()
        );

        self.nodes.push(SceneNode {
            kind: NodeKind::Segmentation,
            name,
            path: destination,
            segments,
        });
        Ok(())
    }
}
