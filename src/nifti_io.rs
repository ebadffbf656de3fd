//! NIfTI image I/O
//!
//! Loads QC timeseries as [`VolumeSeries`] and writes 3D maps (temporal
//! mean, temporal SD, region labels) back out as float32 NIfTI-1.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::error::QcError;
use crate::volume::VolumeSeries;

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;

/// 3D NIfTI volume (first timepoint of anything with more dimensions)
pub struct NiftiData {
    /// Volume data as f64
    pub data: Vec<f64>,
    /// Dimensions (nx, ny, nz)
    pub dims: (usize, usize, usize),
    /// Voxel sizes in mm
    pub voxel_size: (f64, f64, f64),
    /// Affine transformation matrix (4x4, row-major)
    pub affine: [f64; 16],
}

/// Check if bytes are gzip compressed
fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Header summary for diagnostics
fn get_header_info(bytes: &[u8]) -> String {
    if bytes.len() < HEADER_SIZE {
        return format!("File too small ({} bytes, need at least {})", bytes.len(), HEADER_SIZE);
    }

    let sizeof_hdr = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magic = String::from_utf8_lossy(&bytes[344..348]).to_string();
    let datatype = i16::from_le_bytes([bytes[70], bytes[71]]);

    format!("sizeof_hdr={}, magic='{}', datatype={}", sizeof_hdr, magic, datatype)
}

fn parse_object(bytes: &[u8]) -> Result<InMemNiftiObject, QcError> {
    if is_gzip(bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes))).map_err(|e| {
            let mut decompressed = Vec::new();
            let info = if GzDecoder::new(Cursor::new(bytes))
                .read_to_end(&mut decompressed)
                .is_ok()
            {
                get_header_info(&decompressed)
            } else {
                "could not decompress".to_string()
            };
            QcError::Nifti(format!("failed to read gzipped NIfTI: {} ({})", e, info))
        })
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes)).map_err(|e| {
            QcError::Nifti(format!("failed to read NIfTI: {} ({})", e, get_header_info(bytes)))
        })
    }
}

/// Decode to a Fortran-ordered buffer plus (nx, ny, nz, nt)
fn decode(
    obj: InMemNiftiObject,
) -> Result<(Vec<f64>, (usize, usize, usize, usize), (f64, f64, f64), [f64; 16]), QcError> {
    let header = obj.header();
    if (header.dim[0] as usize) < 3 {
        return Err(QcError::Nifti(format!(
            "expected at least 3D volume, got {}D",
            header.dim[0]
        )));
    }

    let pixdim = header.pixdim;
    let voxel_size = (pixdim[1] as f64, pixdim[2] as f64, pixdim[3] as f64);
    let affine = get_affine(header);

    // scl_slope/scl_inter are applied by into_ndarray
    let array: Array<f64, _> = obj
        .into_volume()
        .into_ndarray()
        .map_err(|e| QcError::Nifti(format!("failed to convert to ndarray: {}", e)))?;

    let shape = array.shape().to_vec();
    if shape.len() < 3 {
        return Err(QcError::Nifti(format!(
            "expected at least 3D array, got {}D",
            shape.len()
        )));
    }
    let (nx, ny, nz) = (shape[0], shape[1], shape[2]);
    let nt = if shape.len() >= 4 { shape[3] } else { 1 };

    // Extract in Fortran order: x fastest, then y, z, t
    let mut data = Vec::with_capacity(nx * ny * nz * nt);
    if shape.len() == 3 {
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    data.push(array[[i, j, k]]);
                }
            }
        }
    } else {
        let array = array
            .into_dimensionality::<ndarray::Ix4>()
            .map_err(|_| QcError::Nifti(format!("unsupported {}D volume", shape.len())))?;
        for t in 0..nt {
            for k in 0..nz {
                for j in 0..ny {
                    for i in 0..nx {
                        data.push(array[[i, j, k, t]]);
                    }
                }
            }
        }
    }

    Ok((data, (nx, ny, nz, nt), voxel_size, affine))
}

/// Load a 3D NIfTI volume from bytes (.nii or .nii.gz, auto-detected)
///
/// 4D inputs are reduced to their first timepoint.
pub fn load_nifti(bytes: &[u8]) -> Result<NiftiData, QcError> {
    let (mut data, (nx, ny, nz, _), voxel_size, affine) = decode(parse_object(bytes)?)?;
    data.truncate(nx * ny * nz);
    Ok(NiftiData { data, dims: (nx, ny, nz), voxel_size, affine })
}

/// Load a 4D QC timeseries from bytes
///
/// A 3D file is read as a single-timepoint series.
pub fn load_series(bytes: &[u8]) -> Result<VolumeSeries, QcError> {
    let (data, dims, voxel_size, affine) = decode(parse_object(bytes)?)?;
    VolumeSeries::new(data, dims, voxel_size, affine)
}

/// Get affine transformation matrix from header
fn get_affine(header: &NiftiHeader) -> [f64; 16] {
    // Prefer sform if available (sform_code > 0)
    if header.sform_code > 0 {
        let s = &header.srow_x;
        let t = &header.srow_y;
        let u = &header.srow_z;
        [
            s[0] as f64, s[1] as f64, s[2] as f64, s[3] as f64,
            t[0] as f64, t[1] as f64, t[2] as f64, t[3] as f64,
            u[0] as f64, u[1] as f64, u[2] as f64, u[3] as f64,
            0.0, 0.0, 0.0, 1.0,
        ]
    } else {
        // Fall back to identity with voxel scaling
        let vsx = header.pixdim[1] as f64;
        let vsy = header.pixdim[2] as f64;
        let vsz = header.pixdim[3] as f64;
        [
            vsx, 0.0, 0.0, 0.0,
            0.0, vsy, 0.0, 0.0,
            0.0, 0.0, vsz, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }
}

/// Encode a float32 NIfTI-1 single file (.nii) for up to four dimensions
fn encode(
    data: &[f64],
    dims: (usize, usize, usize, usize),
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Result<Vec<u8>, QcError> {
    let (nx, ny, nz, nt) = dims;
    let (vsx, vsy, vsz) = voxel_size;
    if data.len() != nx * ny * nz * nt {
        return Err(QcError::Nifti(format!(
            "data length {} does not match {}x{}x{}x{}",
            data.len(), nx, ny, nz, nt
        )));
    }
    let max_dim = i16::MAX as usize;
    if nx > max_dim || ny > max_dim || nz > max_dim || nt > max_dim {
        return Err(QcError::Nifti(format!(
            "dimensions {}x{}x{}x{} exceed NIfTI-1 limits",
            nx, ny, nz, nt
        )));
    }

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());

    let ndim: i16 = if nt > 1 { 4 } else { 3 };
    let dim: [i16; 8] = [ndim, nx as i16, ny as i16, nz as i16, nt as i16, 1, 1, 1];
    for (i, &d) in dim.iter().enumerate() {
        let offset = 40 + i * 2;
        header[offset..offset + 2].copy_from_slice(&d.to_le_bytes());
    }

    // datatype = 16 (FLOAT32), bitpix = 32
    header[70..72].copy_from_slice(&16i16.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    let pixdim: [f32; 8] = [1.0, vsx as f32, vsy as f32, vsz as f32, 1.0, 1.0, 1.0, 1.0];
    for (i, &p) in pixdim.iter().enumerate() {
        let offset = 76 + i * 4;
        header[offset..offset + 4].copy_from_slice(&p.to_le_bytes());
    }

    header[108..112].copy_from_slice(&(VOX_OFFSET as f32).to_le_bytes());
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes());

    // sform_code = 1 (scanner anat)
    header[254..256].copy_from_slice(&1i16.to_le_bytes());
    for (row, base) in [280usize, 296, 312].iter().enumerate() {
        for c in 0..4 {
            let offset = base + c * 4;
            header[offset..offset + 4].copy_from_slice(&(affine[row * 4 + c] as f32).to_le_bytes());
        }
    }

    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(VOX_OFFSET + data.len() * 4);
    buffer
        .write_all(&header)
        .map_err(|e| QcError::Nifti(format!("write header failed: {}", e)))?;
    buffer
        .write_all(&[0u8; 4])
        .map_err(|e| QcError::Nifti(format!("write extension failed: {}", e)))?;
    for &val in data {
        buffer
            .write_all(&(val as f32).to_le_bytes())
            .map_err(|e| QcError::Nifti(format!("write data failed: {}", e)))?;
    }

    Ok(buffer)
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>, QcError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .map_err(|e| QcError::Nifti(format!("gzip compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| QcError::Nifti(format!("gzip finish failed: {}", e)))
}

/// Save a 3D map as uncompressed NIfTI bytes
pub fn save_nifti(
    data: &[f64],
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Result<Vec<u8>, QcError> {
    encode(data, (dims.0, dims.1, dims.2, 1), voxel_size, affine)
}

/// Save a full series as uncompressed NIfTI bytes
pub fn save_series(series: &VolumeSeries) -> Result<Vec<u8>, QcError> {
    encode(series.data(), series.dims(), series.voxel_size, &series.affine)
}

fn write_file(path: &Path, bytes: Vec<u8>) -> Result<(), QcError> {
    let bytes = if path.to_string_lossy().ends_with(".nii.gz") {
        gzip(&bytes)?
    } else {
        bytes
    };
    std::fs::write(path, &bytes).map_err(|e| QcError::io(path, e))
}

fn read_file(path: &Path) -> Result<Vec<u8>, QcError> {
    std::fs::read(path).map_err(|e| QcError::io(path, e))
}

/// Read a 3D NIfTI file (.nii or .nii.gz)
pub fn read_nifti_file(path: &Path) -> Result<NiftiData, QcError> {
    load_nifti(&read_file(path)?)
}

/// Read a 4D QC series from a NIfTI file (.nii or .nii.gz)
pub fn read_series_file(path: &Path) -> Result<VolumeSeries, QcError> {
    load_series(&read_file(path)?)
}

/// Save a 3D map; `.nii.gz` paths are gzip compressed
pub fn save_nifti_to_file(
    path: &Path,
    data: &[f64],
    dims: (usize, usize, usize),
    voxel_size: (f64, f64, f64),
    affine: &[f64; 16],
) -> Result<(), QcError> {
    write_file(path, save_nifti(data, dims, voxel_size, affine)?)
}

/// Save a series; `.nii.gz` paths are gzip compressed
pub fn save_series_to_file(path: &Path, series: &VolumeSeries) -> Result<(), QcError> {
    write_file(path, save_series(series)?)
}
