// ============================================================
// Layer 4 — Transform Pipeline
// ============================================================
// Unary array -> array operations applied left to right before
// a sample is handed to the batcher. Every transform is pure
// except the random crop, which draws a fresh offset per call.
//
// Shape contract: a transform that receives an array of the
// wrong rank or extent fails fast with a descriptive error.
// Nothing here pads or truncates silently.
//
// Arrays are dynamic-rank (`ArrayD`) because `AddChannel` moves
// samples from rank 3 to rank 4 mid-pipeline.

use anyhow::{bail, Context, Result};
use ndarray::{ArrayD, Axis, Ix3, Ix4};
use rand::Rng;

/// One volume-to-volume operation.
pub trait VolumeTransform: Send + Sync {
    /// Short name used in error messages.
    fn name(&self) -> &'static str;

    /// Apply the operation, producing a new array.
    fn apply(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>>;
}

/// An ordered sequence of transforms.
pub struct TransformPipeline {
    steps: Vec<Box<dyn VolumeTransform>>,
}

impl TransformPipeline {
    pub fn new(steps: Vec<Box<dyn VolumeTransform>>) -> Self {
        Self { steps }
    }

    /// Run every step in order, left to right.
    pub fn apply(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let mut current = input;
        for step in &self.steps {
            current = step
                .apply(current)
                .with_context(|| format!("transform '{}' failed", step.name()))?;
        }
        Ok(current)
    }
}

// ─── ScaleIntensity ───────────────────────────────────────────────────────────

/// Linearly rescale voxel values to [0, 1] using the input's own
/// min/max. A constant input maps to all zeros (the lower bound);
/// there is no division by zero.
pub struct ScaleIntensity;

impl VolumeTransform for ScaleIntensity {
    fn name(&self) -> &'static str {
        "scale_intensity"
    }

    fn apply(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let min = input.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = input.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let range = max - min;
        if !range.is_finite() {
            bail!("input contains non-finite values");
        }
        if range <= f32::EPSILON {
            return Ok(ArrayD::zeros(input.raw_dim()));
        }
        Ok(input.mapv(|v| (v - min) / range))
    }
}

// ─── AddChannel ───────────────────────────────────────────────────────────────

/// Insert a leading channel axis of size 1, turning a 3D volume
/// into a channel-first 4D one. Applied exactly once per sample:
/// an input that already carries a channel axis is rejected.
pub struct AddChannel;

impl VolumeTransform for AddChannel {
    fn name(&self) -> &'static str {
        "add_channel"
    }

    fn apply(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        if input.ndim() != 3 {
            bail!(
                "expected an unchannelled 3D volume, got rank {} with shape {:?}",
                input.ndim(),
                input.shape()
            );
        }
        Ok(input.insert_axis(Axis(0)))
    }
}

// ─── RandSpatialCrop ──────────────────────────────────────────────────────────

/// Fixed-size crop at a uniformly random offset fully inside the
/// input bounds. Works on rank-3 volumes and on channel-first
/// rank-4 volumes (the crop applies to the trailing three axes).
///
/// When an image and its label must stay aligned, sample one
/// offset with [`sample_offset`](Self::sample_offset) and apply
/// it to both via [`crop_at`](Self::crop_at); that coordination
/// belongs to the paired dataset, not to this type.
pub struct RandSpatialCrop {
    size: [usize; 3],
}

impl RandSpatialCrop {
    pub fn new(size: [usize; 3]) -> Self {
        Self { size }
    }

    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    /// Draw a crop origin such that the crop fits entirely inside
    /// a volume of the given spatial shape.
    pub fn sample_offset<R: Rng>(&self, spatial: [usize; 3], rng: &mut R) -> Result<[usize; 3]> {
        let mut offset = [0usize; 3];
        for axis in 0..3 {
            if self.size[axis] > spatial[axis] {
                bail!(
                    "crop size {:?} exceeds input shape {:?} on axis {}",
                    self.size,
                    spatial,
                    axis
                );
            }
            let slack = spatial[axis] - self.size[axis];
            offset[axis] = if slack == 0 { 0 } else { rng.gen_range(0..=slack) };
        }
        Ok(offset)
    }

    /// Extract the crop at a previously sampled offset.
    pub fn crop_at(&self, input: &ArrayD<f32>, offset: [usize; 3]) -> Result<ArrayD<f32>> {
        let spatial = spatial_shape(input)?;
        for axis in 0..3 {
            if offset[axis] + self.size[axis] > spatial[axis] {
                bail!(
                    "crop at {:?} with size {:?} leaves bounds of {:?}",
                    offset,
                    self.size,
                    spatial
                );
            }
        }

        let [x0, y0, z0] = offset;
        let [sx, sy, sz] = self.size;
        let cropped = match input.ndim() {
            3 => {
                let view = input.view().into_dimensionality::<Ix3>()?;
                view.slice(ndarray::s![x0..x0 + sx, y0..y0 + sy, z0..z0 + sz])
                    .to_owned()
                    .into_dyn()
            }
            4 => {
                let view = input.view().into_dimensionality::<Ix4>()?;
                view.slice(ndarray::s![.., x0..x0 + sx, y0..y0 + sy, z0..z0 + sz])
                    .to_owned()
                    .into_dyn()
            }
            rank => bail!("cannot crop a rank-{rank} array"),
        };
        Ok(cropped)
    }
}

impl VolumeTransform for RandSpatialCrop {
    fn name(&self) -> &'static str {
        "rand_spatial_crop"
    }

    fn apply(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let spatial = spatial_shape(&input)?;
        let offset = self.sample_offset(spatial, &mut rand::thread_rng())?;
        self.crop_at(&input, offset)
    }
}

// ─── Resize ───────────────────────────────────────────────────────────────────

/// Deterministic trilinear resize to an exact target shape.
/// Used on the validation path, so repeated runs over the same
/// volumes see identical inputs.
pub struct Resize {
    size: [usize; 3],
}

impl Resize {
    pub fn new(size: [usize; 3]) -> Self {
        Self { size }
    }
}

impl VolumeTransform for Resize {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn apply(&self, input: ArrayD<f32>) -> Result<ArrayD<f32>> {
        if self.size.iter().any(|&d| d == 0) {
            bail!("resize target must be positive in every dimension");
        }
        match input.ndim() {
            3 => {
                let view = input.view().into_dimensionality::<Ix3>()?;
                Ok(resize_trilinear(&view, self.size).into_dyn())
            }
            4 => {
                let view = input.view().into_dimensionality::<Ix4>()?;
                let channels = view.shape()[0];
                let [sx, sy, sz] = self.size;
                let mut out = ndarray::Array4::<f32>::zeros((channels, sx, sy, sz));
                for c in 0..channels {
                    let resized = resize_trilinear(&view.index_axis(Axis(0), c), self.size);
                    out.index_axis_mut(Axis(0), c).assign(&resized);
                }
                Ok(out.into_dyn())
            }
            rank => bail!("cannot resize a rank-{rank} array"),
        }
    }
}

/// Trilinear interpolation with half-voxel alignment: output
/// voxel centres are mapped back into input voxel space and the
/// eight surrounding voxels are blended.
fn resize_trilinear(input: &ndarray::ArrayView3<f32>, target: [usize; 3]) -> ndarray::Array3<f32> {
    let (nx, ny, nz) = input.dim();
    let [tx, ty, tz] = target;
    let scale = [
        nx as f32 / tx as f32,
        ny as f32 / ty as f32,
        nz as f32 / tz as f32,
    ];

    ndarray::Array3::from_shape_fn((tx, ty, tz), |(x, y, z)| {
        let src = [
            ((x as f32 + 0.5) * scale[0] - 0.5).clamp(0.0, (nx - 1) as f32),
            ((y as f32 + 0.5) * scale[1] - 0.5).clamp(0.0, (ny - 1) as f32),
            ((z as f32 + 0.5) * scale[2] - 0.5).clamp(0.0, (nz - 1) as f32),
        ];
        let lo = [
            src[0].floor() as usize,
            src[1].floor() as usize,
            src[2].floor() as usize,
        ];
        let hi = [
            (lo[0] + 1).min(nx - 1),
            (lo[1] + 1).min(ny - 1),
            (lo[2] + 1).min(nz - 1),
        ];
        let frac = [
            src[0] - lo[0] as f32,
            src[1] - lo[1] as f32,
            src[2] - lo[2] as f32,
        ];

        let mut acc = 0.0f32;
        for (cx, wx) in [(lo[0], 1.0 - frac[0]), (hi[0], frac[0])] {
            for (cy, wy) in [(lo[1], 1.0 - frac[1]), (hi[1], frac[1])] {
                for (cz, wz) in [(lo[2], 1.0 - frac[2]), (hi[2], frac[2])] {
                    acc += wx * wy * wz * input[[cx, cy, cz]];
                }
            }
        }
        acc
    })
}

/// Trailing three axes of a rank-3 or channel-first rank-4 array.
fn spatial_shape(input: &ArrayD<f32>) -> Result<[usize; 3]> {
    let shape = input.shape();
    match shape.len() {
        3 => Ok([shape[0], shape[1], shape[2]]),
        4 => Ok([shape[1], shape[2], shape[3]]),
        rank => bail!("expected a rank-3 or rank-4 array, got rank {rank}"),
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn volume(shape: (usize, usize, usize)) -> ArrayD<f32> {
        Array3::from_shape_fn(shape, |(x, y, z)| (x + 2 * y + 3 * z) as f32).into_dyn()
    }

    #[test]
    fn test_scale_intensity_hits_unit_range() {
        let out = ScaleIntensity.apply(volume((4, 4, 4))).unwrap();
        let min = out.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = out.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert!((min - 0.0).abs() < 1e-6);
        assert!((max - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_scale_intensity_constant_maps_to_lower_bound() {
        let input = ArrayD::from_elem(ndarray::IxDyn(&[3, 3, 3]), 7.5f32);
        let out = ScaleIntensity.apply(input).unwrap();
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_add_channel_prepends_axis_once() {
        let out = AddChannel.apply(volume((4, 5, 6))).unwrap();
        assert_eq!(out.shape(), &[1, 4, 5, 6]);
        // A second application must fail: the channel axis exists
        assert!(AddChannel.apply(out).is_err());
    }

    #[test]
    fn test_crop_fits_and_offsets_stay_in_bounds() {
        let crop = RandSpatialCrop::new([2, 2, 2]);
        let input = volume((6, 6, 6));
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..20 {
            let offset = crop.sample_offset([6, 6, 6], &mut rng).unwrap();
            let out = crop.crop_at(&input, offset).unwrap();
            assert_eq!(out.shape(), &[2, 2, 2]);
        }
    }

    #[test]
    fn test_oversized_crop_rejected() {
        let crop = RandSpatialCrop::new([8, 2, 2]);
        let mut rng = StdRng::seed_from_u64(5);
        assert!(crop.sample_offset([6, 6, 6], &mut rng).is_err());
    }

    #[test]
    fn test_shared_offset_keeps_pair_aligned() {
        let crop = RandSpatialCrop::new([3, 3, 3]);
        let image = volume((8, 8, 8));
        let label = image.clone();
        let mut rng = StdRng::seed_from_u64(9);
        let offset = crop.sample_offset([8, 8, 8], &mut rng).unwrap();
        let image_crop = crop.crop_at(&image, offset).unwrap();
        let label_crop = crop.crop_at(&label, offset).unwrap();
        assert_eq!(image_crop, label_crop);
    }

    #[test]
    fn test_resize_reaches_target_shape() {
        let out = Resize::new([4, 4, 4]).apply(volume((8, 6, 10))).unwrap();
        assert_eq!(out.shape(), &[4, 4, 4]);
    }

    #[test]
    fn test_resize_identity_preserves_values() {
        let input = volume((5, 5, 5));
        let out = Resize::new([5, 5, 5]).apply(input.clone()).unwrap();
        for (a, b) in input.iter().zip(out.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_resize_channelled_input() {
        let input = AddChannel.apply(volume((8, 8, 8))).unwrap();
        let out = Resize::new([4, 4, 4]).apply(input).unwrap();
        assert_eq!(out.shape(), &[1, 4, 4, 4]);
    }

    #[test]
    fn test_crop_as_pipeline_step_draws_its_own_offset() {
        let pipeline = TransformPipeline::new(vec![
            Box::new(AddChannel),
            Box::new(RandSpatialCrop::new([2, 2, 2])),
        ]);
        let out = pipeline.apply(volume((6, 6, 6))).unwrap();
        assert_eq!(out.shape(), &[1, 2, 2, 2]);
    }

    #[test]
    fn test_pipeline_applies_in_order() {
        let pipeline = TransformPipeline::new(vec![
            Box::new(ScaleIntensity),
            Box::new(AddChannel),
            Box::new(Resize::new([4, 4, 4])),
        ]);
        let out = pipeline.apply(volume((8, 8, 8))).unwrap();
        assert_eq!(out.shape(), &[1, 4, 4, 4]);
        assert!(out.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }
}
