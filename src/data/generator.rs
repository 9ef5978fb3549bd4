// ============================================================
// Layer 4 — Synthetic Volume Generator
// ============================================================
// Produces paired image/label volumes for the demo workflow:
// randomly placed spheres written into the label volume, the
// same spheres with per-object intensity plus Gaussian noise
// written into the image volume.
//
// Each call draws independently from the supplied RNG; there is
// no state carried between calls.

use anyhow::{bail, Result};
use ndarray::Array3;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;

use crate::domain::volume::Volume;

/// Parameters for one synthetic image/label pair.
#[derive(Debug, Clone)]
pub struct SyntheticVolumeConfig {
    /// Spatial shape [x, y, z] of both volumes
    pub shape: [usize; 3],

    /// Number of spheres to place
    pub num_objects: usize,

    /// Sphere radius range in voxels (inclusive bounds)
    pub radius_min: usize,
    pub radius_max: usize,

    /// Number of distinct foreground label classes (>= 1);
    /// each sphere is assigned a class in 1..=num_classes
    pub num_classes: usize,

    /// Standard deviation of the additive background noise
    pub noise_std: f32,
}

impl Default for SyntheticVolumeConfig {
    fn default() -> Self {
        Self {
            shape: [64, 64, 64],
            num_objects: 6,
            radius_min: 4,
            radius_max: 10,
            num_classes: 1,
            noise_std: 0.05,
        }
    }
}

impl SyntheticVolumeConfig {
    fn validate(&self) -> Result<()> {
        if self.shape.iter().any(|&d| d == 0) {
            bail!("volume shape must be positive in every dimension, got {:?}", self.shape);
        }
        if self.num_classes == 0 {
            bail!("num_classes must be at least 1");
        }
        if self.radius_min == 0 || self.radius_min > self.radius_max {
            bail!(
                "invalid radius range [{}, {}]",
                self.radius_min,
                self.radius_max
            );
        }
        let smallest = self.shape.iter().copied().min().unwrap_or(0);
        if 2 * self.radius_max >= smallest {
            bail!(
                "radius_max {} does not fit inside volume shape {:?}",
                self.radius_max,
                self.shape
            );
        }
        Ok(())
    }
}

/// Generate one (image, label) pair of identical shape.
///
/// The label volume holds the class value of each sphere (0 is
/// background); the image volume holds the same spheres with a
/// per-object intensity in [0.4, 1.0] plus Gaussian noise.
pub fn generate_pair<R: Rng>(cfg: &SyntheticVolumeConfig, rng: &mut R) -> Result<(Volume, Volume)> {
    cfg.validate()?;

    let [nx, ny, nz] = cfg.shape;
    let mut label = Array3::<f32>::zeros((nx, ny, nz));
    let mut image = Array3::<f32>::zeros((nx, ny, nz));

    for _ in 0..cfg.num_objects {
        let radius = rng.gen_range(cfg.radius_min..=cfg.radius_max);
        // Keep the whole sphere inside the bounds
        let cx = rng.gen_range(radius..nx - radius);
        let cy = rng.gen_range(radius..ny - radius);
        let cz = rng.gen_range(radius..nz - radius);
        let class = rng.gen_range(1..=cfg.num_classes) as f32;
        let intensity = rng.gen_range(0.4..1.0f32);

        paint_sphere(&mut label, &mut image, (cx, cy, cz), radius, class, intensity);
    }

    if cfg.noise_std > 0.0 {
        let noise_dist = Normal::new(0.0f32, cfg.noise_std)
            .map_err(|e| anyhow::anyhow!("invalid noise distribution: {e}"))?;
        let noise = Array3::random_using((nx, ny, nz), noise_dist, rng);
        image += &noise;
    }

    tracing::debug!(
        "Generated synthetic pair: shape {:?}, {} objects",
        cfg.shape,
        cfg.num_objects
    );

    Ok((
        Volume::with_identity_affine(image),
        Volume::with_identity_affine(label),
    ))
}

/// Rasterise one sphere into both volumes.
/// Overlapping spheres simply overwrite earlier ones.
fn paint_sphere(
    label: &mut Array3<f32>,
    image: &mut Array3<f32>,
    center: (usize, usize, usize),
    radius: usize,
    class: f32,
    intensity: f32,
) {
    let (cx, cy, cz) = center;
    let r2 = (radius * radius) as i64;

    // Only walk the bounding box of the sphere
    for x in cx - radius..=cx + radius {
        for y in cy - radius..=cy + radius {
            for z in cz - radius..=cz + radius {
                let dx = x as i64 - cx as i64;
                let dy = y as i64 - cy as i64;
                let dz = z as i64 - cz as i64;
                if dx * dx + dy * dy + dz * dz <= r2 {
                    label[[x, y, z]] = class;
                    image[[x, y, z]] = intensity;
                }
            }
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_pair_shapes_match() {
        let cfg = SyntheticVolumeConfig {
            shape: [32, 32, 32],
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let (image, label) = generate_pair(&cfg, &mut rng).unwrap();
        assert_eq!(image.shape(), [32, 32, 32]);
        assert!(image.same_shape(&label));
    }

    #[test]
    fn test_label_classes_in_range() {
        let cfg = SyntheticVolumeConfig {
            shape: [48, 48, 48],
            num_classes: 3,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let (_, label) = generate_pair(&cfg, &mut rng).unwrap();
        let max = label.data.iter().cloned().fold(0.0f32, f32::max);
        assert!(label.data.iter().all(|&v| v >= 0.0 && v <= 3.0));
        // At least one sphere actually landed
        assert!(max >= 1.0);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let cfg = SyntheticVolumeConfig {
            shape: [0, 32, 32],
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        assert!(generate_pair(&cfg, &mut rng).is_err());
    }

    #[test]
    fn test_oversized_radius_rejected() {
        let cfg = SyntheticVolumeConfig {
            shape: [16, 16, 16],
            radius_max: 10,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        assert!(generate_pair(&cfg, &mut rng).is_err());
    }
}
