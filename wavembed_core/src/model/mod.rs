pub mod wav2vec;

use anyhow::Result;
use ndarray::Array2;

/// The two per-frame representations produced by one forward pass, both
/// shaped (channels, frames).
pub struct Embedding {
    /// Low-level feature vectors ("z"), straight from the feature extractor.
    pub feature: Array2<f32>,
    /// Context vectors ("c"), after the temporal aggregation stage.
    pub context: Array2<f32>,
}

/// An opaque pretrained acoustic model: raw waveform in, (z, c) pair out.
///
/// The dataset writer only depends on this seam, so the real checkpoint-backed
/// model can be swapped for a synthetic one in tests.
pub trait AcousticModel {
    fn embed(&self, samples: &[f32]) -> Result<Embedding>;
}
