//! Stacking label images into one multi-segment label map.

use log::warn;
use ndarray::prelude::*;

use crate::common::Geometry;
use crate::error::ImportError;
use crate::image::LabelImage;
use crate::nrrd::NrrdImage;

/// Label images stacked along a trailing channel axis.
#[derive(Debug, Clone)]
pub struct MergedSegmentation {
    /// Voxels indexed `[i, j, k, channel]`.
    pub data: Array4<u8>,
    pub geometry: Geometry,
    /// One name per channel, in channel order.
    pub names: Vec<String>,
}

impl MergedSegmentation {
    pub fn channel_count(&self) -> usize {
        self.data.shape()[3]
    }

    /// Metadata key naming channel `index`.
    pub fn name_key(index: usize) -> String {
        format!("Segment{}_Name", index)
    }

    pub fn into_nrrd(self) -> NrrdImage {
        let mut image = NrrdImage::new(self.data.into_dyn(), self.geometry);
        for (index, name) in self.names.into_iter().enumerate() {
            image = image.with_metadata(Self::name_key(index), name);
        }
        image
    }
}

/// Stacks label images into a single 4D segmentation, one channel each.
///
/// Every structure gets a new trailing axis and the results are
/// concatenated along it in the given order. The merged geometry is taken
/// from the last structure. Structures whose geometry differs from it are
/// merged anyway and reported with a warning.
///
/// # Arguments
///
/// * `structures` - A slice of `LabelImage` in discovery order. All of them
///   must share the same voxel shape.
///
/// # Returns
///
/// `Some(MergedSegmentation)` with `Segment<i>_Name` names in channel order,
/// `None` when `structures` is empty, or `ImportError::ShapeMismatch` when a
/// structure's shape differs from the first one.
pub fn merge_structures(
    structures: &[LabelImage],
) -> Result<Option<MergedSegmentation>, ImportError> {
    let (first, last) = match (structures.first(), structures.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return Ok(None),
    };

    let shape = first.data.shape();
    for structure in structures {
        if structure.data.shape() != shape {
            return Err(ImportError::ShapeMismatch {
                path: structure.path.clone(),
                expected: shape.to_vec(),
                found: structure.data.shape().to_vec(),
            });
        }
        if !structure.geometry.approx_eq(&last.geometry) {
            warn!(
                "Geometry of {} differs from {}; using the latter for the merged segmentation",
                structure.path.display(),
                last.path.display()
            );
        }
    }

    // combine volumes by stacking them along the 4th dimension
    let fixed_shape = [shape[0], shape[1], shape[2], structures.len()];
    let mut combined = Array::<u8, Ix4>::zeros(fixed_shape);
    for (index, structure) in structures.iter().enumerate() {
        combined
            .slice_mut(s![.., .., .., index])
            .assign(&structure.data);
    }

    Ok(Some(MergedSegmentation {
        data: combined,
        geometry: last.geometry.clone(),
        names: structures.iter().map(|s| s.name.clone()).collect(),
    }))
}
