//! Precompute per-frame speech embeddings with a pretrained acoustic model
//! and store them as per-file containers for a downstream ASR pipeline.

pub mod audio;
pub mod container;
pub mod model;
pub mod writer;

/// Sample rate every input file must already have. Nothing is resampled;
/// a mismatch is a fatal error.
pub const REQUIRED_SAMPLE_RATE: u32 = 16_000;

/// Embedding channels produced by the acoustic model.
pub const EMBEDDING_CHANNELS: usize = 512;

/// Frames per second of the embedding sequence. Fixed constant of the
/// container format (model stride of 160 samples at 16 kHz).
pub const FRAMES_PER_SECOND: i64 = 100;
