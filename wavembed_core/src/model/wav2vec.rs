//! Candle-backed wav2vec embedding model.
//!
//! Loads pretrained weights from a safetensors checkpoint, with architecture
//! hyperparameters from an optional `config.json` next to it. The forward
//! computation is fixed: a strided convolutional feature extractor producing
//! the "z" representation, followed by a causal convolutional aggregator
//! producing the "c" representation.

use std::path::Path;

use anyhow::{Context, Result, ensure};
use candle_core::{D, DType, Device, Module, Tensor};
use candle_nn::{Conv1d, Conv1dConfig, VarBuilder};
use ndarray::Array2;
use serde::Deserialize;

use super::{AcousticModel, Embedding};
use crate::EMBEDDING_CHANNELS;

#[derive(Debug, Clone, Deserialize)]
pub struct Wav2VecConfig {
    #[serde(default = "default_conv_dim")]
    pub conv_dim: Vec<usize>,
    #[serde(default = "default_conv_kernel")]
    pub conv_kernel: Vec<usize>,
    #[serde(default = "default_conv_stride")]
    pub conv_stride: Vec<usize>,
    #[serde(default = "default_agg_layers")]
    pub agg_layers: usize,
    #[serde(default = "default_agg_kernel")]
    pub agg_kernel: usize,
}

fn default_conv_dim() -> Vec<usize> {
    vec![512, 512, 512, 512, 512]
}
fn default_conv_kernel() -> Vec<usize> {
    vec![10, 8, 4, 4, 4]
}
fn default_conv_stride() -> Vec<usize> {
    // Total stride 160 samples: 100 frames per second at 16 kHz.
    vec![5, 4, 2, 2, 2]
}
fn default_agg_layers() -> usize {
    9
}
fn default_agg_kernel() -> usize {
    3
}

impl Default for Wav2VecConfig {
    fn default() -> Self {
        Self {
            conv_dim: default_conv_dim(),
            conv_kernel: default_conv_kernel(),
            conv_stride: default_conv_stride(),
            agg_layers: default_agg_layers(),
            agg_kernel: default_agg_kernel(),
        }
    }
}

impl Wav2VecConfig {
    /// Read `config.json` from the checkpoint's directory, falling back to
    /// the stock wav2vec hyperparameters when it is absent.
    fn for_checkpoint(checkpoint: &Path) -> Result<Self> {
        let config_path = checkpoint
            .parent()
            .map(|d| d.join("config.json"))
            .filter(|p| p.exists());

        match config_path {
            Some(p) => {
                let data = std::fs::read_to_string(&p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                serde_json::from_str(&data)
                    .with_context(|| format!("failed to parse {}", p.display()))
            }
            None => Ok(Self::default()),
        }
    }
}

#[derive(Debug)]
struct ConvBlock {
    conv: Conv1d,
}

impl ConvBlock {
    fn load(
        in_c: usize,
        out_c: usize,
        kernel: usize,
        stride: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let cfg = Conv1dConfig {
            stride,
            ..Default::default()
        };
        let conv = candle_nn::conv1d(in_c, out_c, kernel, cfg, vb.pp("conv"))?;
        Ok(Self { conv })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        self.conv.forward(xs)?.gelu()
    }
}

/// Pretrained wav2vec model. Waveform in, (z, c) out.
#[derive(Debug)]
pub struct Wav2Vec {
    extractor: Vec<ConvBlock>,
    aggregator: Vec<ConvBlock>,
    agg_kernel: usize,
    device: Device,
}

impl Wav2Vec {
    /// Load a safetensors checkpoint onto the given accelerator (CUDA ordinal
    /// if available, CPU otherwise). The checkpoint must exist.
    pub fn load<P: AsRef<Path>>(checkpoint: P, gpu: usize) -> Result<Self> {
        let checkpoint = checkpoint.as_ref();
        ensure!(
            checkpoint.exists(),
            "model checkpoint '{}' does not exist",
            checkpoint.display()
        );

        let config = Wav2VecConfig::for_checkpoint(checkpoint)?;
        ensure!(
            config.conv_dim.len() == config.conv_kernel.len()
                && config.conv_dim.len() == config.conv_stride.len(),
            "conv_dim, conv_kernel and conv_stride must have the same length"
        );
        ensure!(
            config.conv_dim.last() == Some(&EMBEDDING_CHANNELS),
            "feature extractor must end in {} channels",
            EMBEDDING_CHANNELS
        );
        ensure!(config.agg_kernel >= 1, "agg_kernel must be at least 1");

        let device = Device::cuda_if_available(gpu)?;

        let data = std::fs::read(checkpoint)
            .with_context(|| format!("failed to read checkpoint {}", checkpoint.display()))?;
        let vb = VarBuilder::from_buffered_safetensors(data, DType::F32, &device)
            .context("failed to load safetensors checkpoint")?;

        let fe = vb.pp("feature_extractor");
        let mut extractor = Vec::with_capacity(config.conv_dim.len());
        for i in 0..config.conv_dim.len() {
            let in_c = if i == 0 { 1 } else { config.conv_dim[i - 1] };
            extractor.push(ConvBlock::load(
                in_c,
                config.conv_dim[i],
                config.conv_kernel[i],
                config.conv_stride[i],
                fe.pp(format!("conv_layers.{i}")),
            )?);
        }

        let fa = vb.pp("feature_aggregator");
        let mut aggregator = Vec::with_capacity(config.agg_layers);
        for i in 0..config.agg_layers {
            aggregator.push(ConvBlock::load(
                EMBEDDING_CHANNELS,
                EMBEDDING_CHANNELS,
                config.agg_kernel,
                1,
                fa.pp(format!("conv_layers.{i}")),
            )?);
        }

        tracing::info!(
            checkpoint = %checkpoint.display(),
            extractor_layers = extractor.len(),
            aggregator_layers = aggregator.len(),
            ?device,
            "wav2vec model loaded"
        );

        Ok(Self {
            extractor,
            aggregator,
            agg_kernel: config.agg_kernel,
            device,
        })
    }

    fn forward(&self, xs: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let mut z = xs.clone();
        for block in &self.extractor {
            z = block.forward(&z)?;
        }

        // Causal aggregation: left-pad so frame t only sees frames <= t.
        let mut c = z.clone();
        for block in &self.aggregator {
            let padded = c.pad_with_zeros(D::Minus1, self.agg_kernel - 1, 0)?;
            c = block.forward(&padded)?;
        }

        Ok((z, c))
    }
}

impl AcousticModel for Wav2Vec {
    fn embed(&self, samples: &[f32]) -> Result<Embedding> {
        let input = Tensor::from_vec(samples.to_vec(), (1, 1, samples.len()), &self.device)?;
        let (z, c) = self.forward(&input).context("forward pass failed")?;
        Ok(Embedding {
            feature: to_array2(&z.squeeze(0)?)?,
            context: to_array2(&c.squeeze(0)?)?,
        })
    }
}

fn to_array2(t: &Tensor) -> Result<Array2<f32>> {
    let (channels, frames) = t.dims2()?;
    let flat = t.flatten_all()?.to_vec1::<f32>()?;
    Ok(Array2::from_shape_vec((channels, frames), flat)?)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn tmp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("embed-model-test-{name}-{nanos}"));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn zero_aggregator_kernel_is_rejected() {
        let dir = tmp_dir("aggkernel");

        // Config validation happens before the checkpoint is parsed, so a
        // stub weight file is enough here.
        std::fs::write(dir.join("config.json"), r#"{"agg_kernel": 0}"#).expect("write config");
        let checkpoint = dir.join("model.safetensors");
        std::fs::write(&checkpoint, b"stub").expect("write checkpoint");

        let err = Wav2Vec::load(&checkpoint, 0).expect_err("must reject kernel 0");
        assert!(err.to_string().contains("agg_kernel"));

        std::fs::remove_dir_all(dir).expect("cleanup");
    }

    #[test]
    fn mismatched_conv_lists_are_rejected() {
        let dir = tmp_dir("convlists");

        std::fs::write(
            dir.join("config.json"),
            r#"{"conv_dim": [512, 512], "conv_kernel": [10], "conv_stride": [5, 4]}"#,
        )
        .expect("write config");
        let checkpoint = dir.join("model.safetensors");
        std::fs::write(&checkpoint, b"stub").expect("write checkpoint");

        assert!(Wav2Vec::load(&checkpoint, 0).is_err());

        std::fs::remove_dir_all(dir).expect("cleanup");
    }
}
