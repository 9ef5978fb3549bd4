// ============================================================
// Layer 3 — Volume Domain Type
// ============================================================
// A 3D scalar field plus the 4x4 affine that maps voxel
// indices to physical coordinates. Plain data, no framework
// types: tensors only appear once a batch is built in Layer 4.

use ndarray::Array3;

/// 4x4 voxel-index -> physical-space transform, row major.
pub type Affine = [[f32; 4]; 4];

/// The identity affine used for freshly generated volumes.
pub const IDENTITY_AFFINE: Affine = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// A single 3D volume: voxel intensities (or label values) and
/// its spatial orientation metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    /// Voxel data indexed as [x, y, z]
    pub data: Array3<f32>,

    /// Voxel-to-world transform carried through save/load
    pub affine: Affine,
}

impl Volume {
    /// Create a volume with an explicit affine.
    pub fn new(data: Array3<f32>, affine: Affine) -> Self {
        Self { data, affine }
    }

    /// Create a volume positioned at the identity affine.
    pub fn with_identity_affine(data: Array3<f32>) -> Self {
        Self::new(data, IDENTITY_AFFINE)
    }

    /// Spatial shape as [x, y, z].
    pub fn shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[0], s[1], s[2]]
    }

    /// True when `other` covers the same spatial extent.
    /// Image and label volumes of one sample must agree on this
    /// before any cropping or resizing is applied.
    pub fn same_shape(&self, other: &Volume) -> bool {
        self.shape() == other.shape()
    }
}
