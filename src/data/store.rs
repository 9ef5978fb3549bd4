// ============================================================
// Layer 4 — Volume Store (NIfTI-1)
// ============================================================
// Persists volumes as NIfTI-1 files: a 348-byte little-endian
// header, 4 bytes of extension padding, then the voxel data in
// F-order (x fastest). The affine is carried in the sform rows
// (srow_x/y/z, sform_code = 1). Data is always float32.
//
// `.nii` writes the raw stream; `.nii.gz` wraps it in gzip.
// `load` is the exact inverse of `save` for any file written
// here, including the affine.

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array3;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::domain::volume::{Affine, Volume};

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;
const DATATYPE_FLOAT32: i16 = 16;
const MAGIC: &[u8; 4] = b"n+1\0";

/// Write `volume` to `path`, gzip-compressed when the path ends
/// in `.gz`. The parent directory must already exist.
pub fn save(volume: &Volume, path: &Path) -> Result<()> {
    let bytes = encode(volume);

    if is_gzipped(path) {
        let file = File::create(path)
            .with_context(|| format!("cannot create '{}'", path.display()))?;
        let mut encoder = GzEncoder::new(file, Compression::fast());
        encoder
            .write_all(&bytes)
            .with_context(|| format!("cannot write '{}'", path.display()))?;
        encoder
            .finish()
            .with_context(|| format!("cannot finish '{}'", path.display()))?;
    } else {
        std::fs::write(path, &bytes)
            .with_context(|| format!("cannot write '{}'", path.display()))?;
    }

    tracing::debug!("Saved volume {:?} to '{}'", volume.shape(), path.display());
    Ok(())
}

/// Read a volume previously written by [`save`].
pub fn load(path: &Path) -> Result<Volume> {
    let mut bytes = Vec::new();
    if is_gzipped(path) {
        let file = File::open(path)
            .with_context(|| format!("cannot open '{}'", path.display()))?;
        GzDecoder::new(file)
            .read_to_end(&mut bytes)
            .with_context(|| format!("cannot decompress '{}'", path.display()))?;
    } else {
        bytes = std::fs::read(path)
            .with_context(|| format!("cannot read '{}'", path.display()))?;
    }

    decode(&bytes).with_context(|| format!("corrupt volume file '{}'", path.display()))
}

fn is_gzipped(path: &Path) -> bool {
    path.extension().map_or(false, |e| e == "gz")
}

// ─── Encoding ─────────────────────────────────────────────────────────────────

fn encode(volume: &Volume) -> Vec<u8> {
    let [nx, ny, nz] = volume.shape();
    let mut out = Vec::with_capacity(VOX_OFFSET + nx * ny * nz * 4);

    // sizeof_hdr
    out.extend_from_slice(&(HEADER_SIZE as i32).to_le_bytes());
    // data_type[10], db_name[18], extents, session_error
    out.extend_from_slice(&[0u8; 34]);
    // regular, dim_info
    out.push(b'r');
    out.push(0);

    // dim[8]: rank then extents
    for d in [3i16, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1] {
        out.extend_from_slice(&d.to_le_bytes());
    }
    // intent_p1..p3, intent_code
    out.extend_from_slice(&[0u8; 14]);
    // datatype, bitpix, slice_start
    out.extend_from_slice(&DATATYPE_FLOAT32.to_le_bytes());
    out.extend_from_slice(&32i16.to_le_bytes());
    out.extend_from_slice(&0i16.to_le_bytes());
    // pixdim[8]: qfac then voxel sizes from the affine diagonal
    let a = &volume.affine;
    for p in [1.0f32, a[0][0].abs(), a[1][1].abs(), a[2][2].abs(), 1.0, 1.0, 1.0, 1.0] {
        out.extend_from_slice(&p.to_le_bytes());
    }
    // vox_offset
    out.extend_from_slice(&(VOX_OFFSET as f32).to_le_bytes());
    // scl_slope, scl_inter
    out.extend_from_slice(&1.0f32.to_le_bytes());
    out.extend_from_slice(&0.0f32.to_le_bytes());
    // slice_end, slice_code, xyzt_units
    out.extend_from_slice(&[0u8; 4]);
    // cal_max, cal_min, slice_duration, toffset, glmax, glmin
    out.extend_from_slice(&[0u8; 24]);
    // descrip[80], aux_file[24]
    let mut descrip = [0u8; 80];
    let tag = b"voxelseg";
    descrip[..tag.len()].copy_from_slice(tag);
    out.extend_from_slice(&descrip);
    out.extend_from_slice(&[0u8; 24]);
    // qform_code = 0, sform_code = 1
    out.extend_from_slice(&0i16.to_le_bytes());
    out.extend_from_slice(&1i16.to_le_bytes());
    // quatern_b/c/d, qoffset_x/y/z
    out.extend_from_slice(&[0u8; 24]);
    // srow_x, srow_y, srow_z
    for row in &volume.affine[..3] {
        for v in row {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }
    // intent_name[16]
    out.extend_from_slice(&[0u8; 16]);
    // magic
    out.extend_from_slice(MAGIC);
    debug_assert_eq!(out.len(), HEADER_SIZE);
    // extension flag padding up to vox_offset
    out.extend_from_slice(&[0u8; VOX_OFFSET - HEADER_SIZE]);

    // Voxel data, F-order: x varies fastest
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                out.extend_from_slice(&volume.data[[x, y, z]].to_le_bytes());
            }
        }
    }

    out
}

// ─── Decoding ─────────────────────────────────────────────────────────────────

fn decode(bytes: &[u8]) -> Result<Volume> {
    if bytes.len() < VOX_OFFSET {
        bail!("file too small for a NIfTI-1 header ({} bytes)", bytes.len());
    }
    if read_i32(bytes, 0) != HEADER_SIZE as i32 {
        bail!("bad sizeof_hdr, not a NIfTI-1 file");
    }
    if &bytes[344..348] != MAGIC {
        bail!("bad magic, not a single-file NIfTI-1 volume");
    }

    let rank = read_i16(bytes, 40);
    if rank != 3 {
        bail!("expected a 3-dimensional volume, header says rank {rank}");
    }
    let nx = read_i16(bytes, 42) as usize;
    let ny = read_i16(bytes, 44) as usize;
    let nz = read_i16(bytes, 46) as usize;

    let datatype = read_i16(bytes, 70);
    if datatype != DATATYPE_FLOAT32 {
        bail!("unsupported datatype {datatype}, expected float32 (16)");
    }

    let vox_offset = read_f32(bytes, 108) as usize;
    let expected = vox_offset + nx * ny * nz * 4;
    if bytes.len() < expected {
        bail!(
            "truncated voxel data: {} bytes present, {} expected",
            bytes.len(),
            expected
        );
    }

    let mut affine: Affine = [[0.0; 4]; 4];
    for (r, row) in affine.iter_mut().take(3).enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = read_f32(bytes, 280 + (r * 4 + c) * 4);
        }
    }
    affine[3] = [0.0, 0.0, 0.0, 1.0];

    let mut data = Array3::<f32>::zeros((nx, ny, nz));
    let mut offset = vox_offset;
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                data[[x, y, z]] = read_f32(bytes, offset);
                offset += 4;
            }
        }
    }

    Ok(Volume::new(data, affine))
}

fn read_i16(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_f32(bytes: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("voxelseg_store_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn sample_volume() -> Volume {
        let data = Array3::from_shape_fn((5, 4, 3), |(x, y, z)| {
            (x as f32) + 10.0 * (y as f32) + 100.0 * (z as f32)
        });
        let mut affine = crate::domain::volume::IDENTITY_AFFINE;
        affine[0][3] = -12.5;
        affine[1][1] = 2.0;
        Volume::new(data, affine)
    }

    #[test]
    fn test_round_trip_uncompressed() {
        let path = temp_path("roundtrip.nii");
        let volume = sample_volume();
        save(&volume, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, volume);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_round_trip_gzipped() {
        let path = temp_path("roundtrip.nii.gz");
        let volume = sample_volume();
        save(&volume, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded, volume);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_corrupt_file_is_a_read_error() {
        let path = temp_path("corrupt.nii");
        std::fs::write(&path, b"definitely not a nifti file").unwrap();
        assert!(load(&path).is_err());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_a_read_error() {
        assert!(load(Path::new("/nonexistent/volume.nii")).is_err());
    }
}
