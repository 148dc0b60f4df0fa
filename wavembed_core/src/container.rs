//! Per-file feature container: a safetensors file with two named tensors.
//!
//! `features` holds the pruned feature matrix transposed to frame-major order
//! and flattened to one dimension (f32). `info` is the 3-element i64 array
//! `[frames_per_second, frames, channels]`, where frames_per_second is the
//! fixed constant 100.

use std::borrow::Cow;
use std::path::Path;

use anyhow::{Context, Result, ensure};
use ndarray::ArrayView2;
use safetensors::SafeTensors;
use safetensors::tensor::{Dtype, View, serialize_to_file};

use crate::FRAMES_PER_SECOND;

/// Extension given to every written container, replacing the audio extension.
pub const CONTAINER_EXTENSION: &str = "context";

const FEATURES_KEY: &str = "features";
const INFO_KEY: &str = "info";

struct RawTensor {
    dtype: Dtype,
    shape: Vec<usize>,
    data: Vec<u8>,
}

impl View for RawTensor {
    fn dtype(&self) -> Dtype {
        self.dtype
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(&self.data)
    }

    fn data_len(&self) -> usize {
        self.data.len()
    }
}

/// A decoded container, as read back from disk.
pub struct Container {
    pub frames_per_second: i64,
    pub frames: usize,
    pub channels: usize,
    /// Frame-major flattened features, length `frames * channels`.
    pub features: Vec<f32>,
}

/// Write one container from a (channels, frames) matrix.
///
/// The matrix is stored transposed (frame-major) and flattened; frame and
/// channel counts are recorded in the `info` tensor.
pub fn write<P: AsRef<Path>>(path: P, features: ArrayView2<f32>) -> Result<()> {
    let path = path.as_ref();
    let (channels, frames) = features.dim();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory {}", parent.display()))?;
    }

    let mut feature_bytes = Vec::with_capacity(frames * channels * 4);
    // .t() yields a (frames, channels) view; row-major iteration over it is
    // exactly the frame-major flattening the downstream reader expects.
    for v in features.t().iter() {
        feature_bytes.extend_from_slice(&v.to_le_bytes());
    }

    let info = [FRAMES_PER_SECOND, frames as i64, channels as i64];
    let mut info_bytes = Vec::with_capacity(info.len() * 8);
    for v in info {
        info_bytes.extend_from_slice(&v.to_le_bytes());
    }

    let tensors = vec![
        (
            FEATURES_KEY,
            RawTensor {
                dtype: Dtype::F32,
                shape: vec![frames * channels],
                data: feature_bytes,
            },
        ),
        (
            INFO_KEY,
            RawTensor {
                dtype: Dtype::I64,
                shape: vec![3],
                data: info_bytes,
            },
        ),
    ];

    serialize_to_file(tensors, &None, path)
        .with_context(|| format!("failed to write container {}", path.display()))?;
    Ok(())
}

/// Read a container back, validating the shape invariant between `info` and
/// `features`.
pub fn read<P: AsRef<Path>>(path: P) -> Result<Container> {
    let path = path.as_ref();
    let buf = std::fs::read(path)
        .with_context(|| format!("failed to read container {}", path.display()))?;
    let st = SafeTensors::deserialize(&buf)
        .with_context(|| format!("not a valid container: {}", path.display()))?;

    let info = st.tensor(INFO_KEY).context("container is missing 'info'")?;
    ensure!(info.dtype() == Dtype::I64, "'info' must be i64");
    let info: Vec<i64> = info
        .data()
        .chunks_exact(8)
        .map(|c| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(c);
            i64::from_le_bytes(bytes)
        })
        .collect();
    ensure!(info.len() == 3, "'info' must have 3 elements, got {}", info.len());

    let features = st
        .tensor(FEATURES_KEY)
        .context("container is missing 'features'")?;
    ensure!(features.dtype() == Dtype::F32, "'features' must be f32");
    let features: Vec<f32> = features
        .data()
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    let frames = usize::try_from(info[1]).context("negative frame count")?;
    let channels = usize::try_from(info[2]).context("negative channel count")?;
    ensure!(
        features.len() == frames * channels,
        "feature length {} does not match {} frames x {} channels",
        features.len(),
        frames,
        channels
    );

    Ok(Container {
        frames_per_second: info[0],
        frames,
        channels,
        features,
    })
}
