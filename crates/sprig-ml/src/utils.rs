use std::{
    collections::HashMap,
    io::{self, Write},
    path::Path,
};

use anyhow::{Result, ensure};
use candle_core::{DType, Device, Tensor};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, instrument};

pub const DEFAULT_PROGRESS_MSG: &str = "Processing";
pub const DEFAULT_PROGRESS_INTERVAL: usize = 1000;

/// Index argument of [`one_hot`]: one position, or one position per row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OneHotIndex {
    Single(usize),
    Many(Vec<usize>),
}

impl From<usize> for OneHotIndex {
    fn from(value: usize) -> Self {
        OneHotIndex::Single(value)
    }
}

impl From<Vec<usize>> for OneHotIndex {
    fn from(value: Vec<usize>) -> Self {
        OneHotIndex::Many(value)
    }
}

impl From<&[usize]> for OneHotIndex {
    fn from(value: &[usize]) -> Self {
        OneHotIndex::Many(value.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for OneHotIndex {
    fn from(value: [usize; N]) -> Self {
        OneHotIndex::Many(value.to_vec())
    }
}

/// One-hot encoding.
///
/// A single index gives a `(dims,)` vector, a list of indices a `(len, dims)` matrix.
/// Indices must be smaller than `dims`.
#[instrument(level = "trace", skip(index, device))]
pub fn one_hot(
    index: impl Into<OneHotIndex>,
    dims: usize,
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    let index = index.into();
    let (indices, single) = match index {
        OneHotIndex::Single(i) => (vec![i], true),
        OneHotIndex::Many(v) => (v, false),
    };
    if let Some(bad) = indices.iter().find(|&&i| i >= dims) {
        anyhow::bail!("one_hot: index {} out of range for {} dims", bad, dims);
    }

    let n = indices.len();
    let indices = indices.into_iter().map(|i| i as u32).collect::<Vec<_>>();
    let indices = Tensor::from_vec(indices, n, device)?;
    let encoded = candle_nn::encoding::one_hot(indices, dims, 1f32, 0f32)?.to_dtype(dtype)?;
    if single {
        Ok(encoded.squeeze(0)?)
    } else {
        Ok(encoded)
    }
}

/// [`one_hot`] with `u8` entries.
pub fn one_hot_u8(index: impl Into<OneHotIndex>, dims: usize, device: &Device) -> Result<Tensor> {
    one_hot(index, dims, DType::U8, device)
}

/// Writes `"{msg} [{current}/{total}]... {pct}%"` over the current line when
/// `current` is a multiple of `interval` or the last loop, then ends the line
/// once `current == total`.
///
/// An `interval` of zero reports every loop. A `total` of zero reports 100%.
pub fn write_progress<W: Write>(
    out: &mut W,
    current: usize,
    total: usize,
    msg: &str,
    interval: usize,
) -> io::Result<()> {
    let interval = interval.max(1);
    if current % interval == 0 || current == total {
        let percent = if total == 0 {
            100.0
        } else {
            current as f64 / total as f64 * 100.0
        };
        write!(out, "{msg} [{current}/{total}]... {percent:.2}%\r")?;
    }
    if current == total {
        writeln!(out)?;
    }
    out.flush()
}

/// [`write_progress`] on stdout.
pub fn print_progress(current: usize, total: usize, msg: &str, interval: usize) -> Result<()> {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    write_progress(&mut lock, current, total, msg, interval)?;
    Ok(())
}

/// Serializes any serde value to bytes.
pub fn dumps<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Inverse of [`dumps`].
pub fn loads<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// Saves named tensors to a safetensors file.
pub fn save_tensors<P: AsRef<Path>>(tensors: &HashMap<String, Tensor>, path: P) -> Result<()> {
    let path = path.as_ref();
    ensure!(
        path.extension().is_some_and(|ext| ext == "safetensors"),
        "save_tensors: expected a .safetensors path, got {}",
        path.display()
    );
    candle_core::safetensors::save(tensors, path)?;
    debug!(num_tensors = tensors.len(), path = %path.display(), "saved tensors");
    Ok(())
}

/// Loads every tensor of a safetensors file onto `device`.
pub fn load_tensors<P: AsRef<Path>>(path: P, device: &Device) -> Result<HashMap<String, Tensor>> {
    let path = path.as_ref();
    let tensors = candle_core::safetensors::load(path, device)?;
    debug!(num_tensors = tensors.len(), path = %path.display(), "loaded tensors");
    Ok(tensors)
}
