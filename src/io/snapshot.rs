//! Parameter snapshots: the optimized state handed to downstream renderers.
//!
//! File format: `.psdf`
//!
//! Layout (little-endian):
//! ```text
//! Magic: "PSDFSNAP" (8 bytes)
//! Version: u32
//! Field param count: u64
//! Material param count: u64
//! Light slot count: u64
//! Iterations completed: u64
//! Field params: f32 × field count
//! Material params: f32 × material count
//! Per light slot: raw_direction (3 × f32), log_intensity (3 × f32)
//! ```
//!
//! The snapshot is a plain parameter dump, not a live API: downstream
//! rendering/relighting rebuilds the networks from their configs and loads
//! these flat vectors.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use nalgebra::Vector3;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

const MAGIC: &[u8; 8] = b"PSDFSNAP";
const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a snapshot file (bad magic)")]
    InvalidMagic,

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
}

/// A trained-parameter snapshot.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub field_params: Vec<f32>,
    pub material_params: Vec<f32>,
    /// (raw_direction, log_intensity) per light slot, in slot order.
    pub lights: Vec<(Vector3<f32>, Vector3<f32>)>,
    pub iterations: u64,
}

pub fn save_snapshot(path: &Path, snap: &Snapshot) -> Result<(), SnapshotError> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_all(MAGIC)?;
    w.write_u32::<LittleEndian>(VERSION)?;
    w.write_u64::<LittleEndian>(snap.field_params.len() as u64)?;
    w.write_u64::<LittleEndian>(snap.material_params.len() as u64)?;
    w.write_u64::<LittleEndian>(snap.lights.len() as u64)?;
    w.write_u64::<LittleEndian>(snap.iterations)?;
    for &v in &snap.field_params {
        w.write_f32::<LittleEndian>(v)?;
    }
    for &v in &snap.material_params {
        w.write_f32::<LittleEndian>(v)?;
    }
    for (dir, li) in &snap.lights {
        for i in 0..3 {
            w.write_f32::<LittleEndian>(dir[i])?;
        }
        for i in 0..3 {
            w.write_f32::<LittleEndian>(li[i])?;
        }
    }
    w.flush()?;
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<Snapshot, SnapshotError> {
    let mut r = BufReader::new(File::open(path)?);
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(SnapshotError::InvalidMagic);
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let n_field = r.read_u64::<LittleEndian>()? as usize;
    let n_material = r.read_u64::<LittleEndian>()? as usize;
    let n_lights = r.read_u64::<LittleEndian>()? as usize;
    let iterations = r.read_u64::<LittleEndian>()?;

    let mut field_params = vec![0.0f32; n_field];
    for v in field_params.iter_mut() {
        *v = r.read_f32::<LittleEndian>()?;
    }
    let mut material_params = vec![0.0f32; n_material];
    for v in material_params.iter_mut() {
        *v = r.read_f32::<LittleEndian>()?;
    }
    let mut lights = Vec::with_capacity(n_lights);
    for _ in 0..n_lights {
        let mut dir = Vector3::zeros();
        let mut li = Vector3::zeros();
        for i in 0..3 {
            dir[i] = r.read_f32::<LittleEndian>()?;
        }
        for i in 0..3 {
            li[i] = r.read_f32::<LittleEndian>()?;
        }
        lights.push((dir, li));
    }

    Ok(Snapshot {
        field_params,
        material_params,
        lights,
        iterations,
    })
}
