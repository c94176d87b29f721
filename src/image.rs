//! Classifying and reading source images.
//!
//! NIfTI files go through the `nifti` crate; `.nrrd` files through this
//! crate's own codec. Only the header of a volume is read, since the scene
//! loads volumes by path. Label images are read in full so they can be merged.

use ndarray::{Array3, ArrayD, Axis, Ix3};
use nifti::error::NiftiError;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, NiftiType, ReaderOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::common::{Geometry, ImageKind};
use crate::nrrd::{self, NrrdError};

/// Errors that can occur while probing or reading an image.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error("nifti error: {0}")]
    Nifti(#[from] NiftiError),

    #[error("nrrd error: {0}")]
    Nrrd(#[from] NrrdError),

    #[error("expected a 3D image, found shape {0:?}")]
    NotVolumetric(Vec<usize>),
}

/// On-disk container of a source image, decided by file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Nifti,
    Nrrd,
}

impl ImageFormat {
    /// Anything that is not `.nrrd` is handed to the nifti reader, which
    /// rejects what it cannot parse.
    pub fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("nrrd") => ImageFormat::Nrrd,
            _ => ImageFormat::Nifti,
        }
    }
}

/// A label image read from disk, named after its file.
#[derive(Debug, Clone)]
pub struct LabelImage {
    pub path: PathBuf,
    pub name: String,
    pub data: Array3<u8>,
    pub geometry: Geometry,
}

/// A directory entry after classification.
#[derive(Debug, Clone)]
pub enum SourceImage {
    Label(LabelImage),
    Volume(PathBuf),
}

impl SourceImage {
    pub fn kind(&self) -> ImageKind {
        match self {
            SourceImage::Label(_) => ImageKind::Label,
            SourceImage::Volume(_) => ImageKind::Volume,
        }
    }
}

/// Classifies `path`, reading the voxels only when it is a label image.
pub fn classify(path: &Path) -> Result<SourceImage, ImageError> {
    match pixel_kind(path)? {
        ImageKind::Label => read_label(path).map(SourceImage::Label),
        ImageKind::Volume => Ok(SourceImage::Volume(path.to_path_buf())),
    }
}

/// Reads just enough of `path` to know its pixel representation.
pub fn pixel_kind(path: &Path) -> Result<ImageKind, ImageError> {
    match ImageFormat::of(path) {
        ImageFormat::Nifti => {
            let header = NiftiHeader::from_file(path)?;
            Ok(nifti_kind(&header)?)
        }
        ImageFormat::Nrrd => {
            let header = nrrd::read_header(path)?;
            Ok(if header.is_uint8() {
                ImageKind::Label
            } else {
                ImageKind::Volume
            })
        }
    }
}

fn nifti_kind(header: &NiftiHeader) -> Result<ImageKind, NiftiError> {
    match header.data_type()? {
        NiftiType::Uint8 => Ok(ImageKind::Label),
        _ => Ok(ImageKind::Volume),
    }
}

/// Reads a label image in full, ready to be merged.
///
/// NIfTI and NRRD files are both accepted. Trailing axes of length one are
/// dropped, so a single-volume 4D file still counts as 3D.
///
/// # Arguments
///
/// * `path` - A `&Path` to an 8-bit unsigned image, usually one that
///   `pixel_kind` classified as `ImageKind::Label`.
///
/// # Returns
///
/// A `LabelImage` holding the voxels, the LPS geometry and the structure name
/// derived from the file name, or an `ImageError` when the file cannot be
/// read or is not three-dimensional.
pub fn read_label(path: &Path) -> Result<LabelImage, ImageError> {
    let (data, geometry) = match ImageFormat::of(path) {
        ImageFormat::Nifti => {
            let obj = ReaderOptions::new().read_file(path)?;
            let geometry = nifti_geometry(obj.header());
            let data = obj.into_volume().into_ndarray::<u8>()?;
            (data, geometry)
        }
        ImageFormat::Nrrd => {
            let image = nrrd::read(path)?;
            (image.data, image.geometry)
        }
    };
    Ok(LabelImage {
        path: path.to_path_buf(),
        name: structure_name(path),
        data: into_volume3(data)?,
        geometry,
    })
}

fn nifti_geometry(header: &NiftiHeader) -> Geometry {
    let affine = header.affine::<f64>();
    let mut rows = [[0.0; 4]; 3];
    for (r, row) in rows.iter_mut().enumerate() {
        for (c, value) in row.iter_mut().enumerate() {
            *value = affine[(r, c)];
        }
    }
    Geometry::from_ras_affine(rows)
}

/// Drops trailing singleton axes (e.g. a time axis of length 1) and
/// enforces 3D.
fn into_volume3(mut data: ArrayD<u8>) -> Result<Array3<u8>, ImageError> {
    while data.ndim() > 3 && data.shape()[data.ndim() - 1] == 1 {
        let last = data.ndim() - 1;
        data = data.index_axis_move(Axis(last), 0);
    }
    let shape = data.shape().to_vec();
    data.into_dimensionality::<Ix3>()
        .map_err(|_| ImageError::NotVolumetric(shape))
}

/// Structure name for a label file: the file name without its last
/// extension, treating `.nii.gz` as a single extension.
pub fn structure_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".nii.gz") && lower.len() > ".nii.gz".len() {
        return file_name[..file_name.len() - ".nii.gz".len()].to_string();
    }
    match path.file_stem() {
        Some(stem) => stem.to_string_lossy().into_owned(),
        None => file_name,
    }
}
