use nalgebra::{Matrix3, Vector3};
use std::fmt;

/// Tolerance used when comparing geometry read back from files.
const GEOMETRY_EPSILON: f64 = 1e-6;

// set up enums and structs
/// How a source image is handled, decided from its pixel representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// 8-bit unsigned voxels holding structure membership.
    Label,
    /// Any other pixel representation, loaded as an intensity volume.
    Volume,
}

impl ImageKind {
    pub fn is_label(&self) -> bool {
        matches!(self, ImageKind::Label)
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageKind::Label => write!(f, "label"),
            ImageKind::Volume => write!(f, "volume"),
        }
    }
}

/// Physical placement of a voxel grid in LPS patient space.
///
/// `direction` holds one unit column per voxel axis, so the world position of
/// voxel `[i, j, k]` is `origin + direction * diag(spacing) * [i, j, k]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub spacing: Vector3<f64>,
    pub origin: Vector3<f64>,
    pub direction: Matrix3<f64>,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            spacing: Vector3::new(1.0, 1.0, 1.0),
            origin: Vector3::zeros(),
            direction: Matrix3::identity(),
        }
    }
}

impl Geometry {
    pub fn new(spacing: Vector3<f64>, origin: Vector3<f64>, direction: Matrix3<f64>) -> Self {
        Self {
            spacing,
            origin,
            direction,
        }
    }

    /// Builds a geometry from the top three rows of a voxel-to-RAS affine,
    /// as stored by nifti.
    pub fn from_ras_affine(rows: [[f64; 4]; 3]) -> Self {
        // RAS -> LPS flips the sign of the first two world axes
        let flip = [-1.0, -1.0, 1.0];
        let axes: [Vector3<f64>; 3] = [0, 1, 2].map(|col| {
            Vector3::new(
                flip[0] * rows[0][col],
                flip[1] * rows[1][col],
                flip[2] * rows[2][col],
            )
        });
        let origin = Vector3::new(
            flip[0] * rows[0][3],
            flip[1] * rows[1][3],
            flip[2] * rows[2][3],
        );
        Self::from_space_directions(axes, origin)
    }

    /// Builds a geometry from the scaled axis vectors used by NRRD's
    /// `space directions` field. A zero-length axis keeps spacing 1 and the
    /// identity column.
    pub fn from_space_directions(axes: [Vector3<f64>; 3], origin: Vector3<f64>) -> Self {
        let mut spacing = Vector3::new(1.0, 1.0, 1.0);
        let mut direction = Matrix3::identity();
        for (i, axis) in axes.iter().enumerate() {
            let norm = axis.norm();
            if norm > 0.0 {
                spacing[i] = norm;
                direction.set_column(i, &(axis / norm));
            }
        }
        Self::new(spacing, origin, direction)
    }

    /// The scaled axis vectors, one per voxel axis.
    pub fn space_directions(&self) -> [Vector3<f64>; 3] {
        [0, 1, 2].map(|i| self.direction.column(i) * self.spacing[i])
    }

    /// Equality up to the rounding introduced by text and f32 storage.
    pub fn approx_eq(&self, other: &Geometry) -> bool {
        (self.spacing - other.spacing).amax() < GEOMETRY_EPSILON
            && (self.origin - other.origin).amax() < GEOMETRY_EPSILON
            && (self.direction - other.direction).amax() < GEOMETRY_EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ras_affine_is_flipped_to_lps() {
        let geometry = Geometry::from_ras_affine([
            [2.0, 0.0, 0.0, 10.0],
            [0.0, 3.0, 0.0, 20.0],
            [0.0, 0.0, 4.0, 30.0],
        ]);
        assert_eq!(geometry.spacing, Vector3::new(2.0, 3.0, 4.0));
        assert_eq!(geometry.origin, Vector3::new(-10.0, -20.0, 30.0));
        assert_eq!(
            geometry.direction,
            Matrix3::new(-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0)
        );
    }

    #[test]
    fn space_directions_round_trip() {
        let axes = [
            Vector3::new(0.0, 1.5, 0.0),
            Vector3::new(-2.0, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 0.5),
        ];
        let geometry = Geometry::from_space_directions(axes, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(geometry.spacing, Vector3::new(1.5, 2.0, 0.5));
        assert_eq!(geometry.space_directions(), axes);
    }

    #[test]
    fn degenerate_axis_keeps_unit_spacing() {
        let axes = [Vector3::zeros(), Vector3::new(0.0, 2.0, 0.0), Vector3::new(0.0, 0.0, 2.0)];
        let geometry = Geometry::from_space_directions(axes, Vector3::zeros());
        assert_eq!(geometry.spacing[0], 1.0);
        assert_eq!(
            geometry.direction.column(0).into_owned(),
            Vector3::new(1.0, 0.0, 0.0)
        );
    }

    #[test]
    fn approx_eq_tolerates_rounding() {
        let a = Geometry::default();
        let mut b = Geometry::default();
        b.spacing[0] += 1e-9;
        assert!(a.approx_eq(&b));
        b.origin[2] = 1.0;
        assert!(!a.approx_eq(&b));
    }

    #[test]
    fn image_kind_display() {
        assert_eq!(ImageKind::Label.to_string(), "label");
        assert!(!ImageKind::Volume.is_label());
    }
}
