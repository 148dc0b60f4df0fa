//! Corpus-wide embedding dataset writer.
//!
//! Runs every audio input through the acoustic model, prunes embedding
//! channels that carry no information anywhere in the corpus, and writes one
//! container per input. Pruning is a corpus-wide decision, so all inference
//! happens before the first container is written; a failure on any file
//! therefore aborts the run with nothing on disk.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use ndarray::{Array2, Array3, ArrayView2, Axis, s};

use crate::audio::decoder;
use crate::container::{self, CONTAINER_EXTENSION};
use crate::model::AcousticModel;
use crate::{EMBEDDING_CHANNELS, REQUIRED_SAMPLE_RATE};

/// Sidecar file recording the auto-discovered pruning list.
pub const REMOVE_DIMS_FILE: &str = "remove_dims";

pub struct EmbeddingDatasetWriter {
    model: Box<dyn AcousticModel>,
    output_root: PathBuf,
    extension: String,
    use_feature: bool,
    remove_dims: Option<PathBuf>,
    paths: Vec<PathBuf>,
}

impl EmbeddingDatasetWriter {
    /// Build a writer over a fixed input list. Every input path must already
    /// exist; a missing one fails construction before any processing starts.
    pub fn new(
        output_root: PathBuf,
        model: Box<dyn AcousticModel>,
        extension: String,
        use_feature: bool,
        remove_dims: Option<PathBuf>,
        paths: Vec<PathBuf>,
    ) -> Result<Self> {
        for path in &paths {
            ensure!(
                path.exists(),
                "input path '{}' does not exist",
                path.display()
            );
        }
        if let Some(list) = &remove_dims {
            ensure!(
                list.exists(),
                "dimension-removal file '{}' does not exist",
                list.display()
            );
        }

        Ok(Self {
            model,
            output_root,
            extension,
            use_feature,
            remove_dims,
            paths,
        })
    }

    /// Read the input list from a reader (normally stdin): one path per line,
    /// trimmed, empty lines skipped.
    pub fn read_paths<R: BufRead>(reader: R) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for line in reader.lines() {
            let line = line.context("failed to read input path list")?;
            let line = line.trim();
            if !line.is_empty() {
                paths.push(PathBuf::from(line));
            }
        }
        Ok(paths)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// An input counts as audio when its path contains the configured
    /// extension substring; everything else is treated as a label file.
    fn is_audio(&self, path: &Path) -> bool {
        path.to_string_lossy().contains(self.extension.as_str())
    }

    fn container_path(&self, input: &Path) -> Result<PathBuf> {
        let name = input
            .file_name()
            .with_context(|| format!("input path '{}' has no file name", input.display()))?
            .to_string_lossy();
        let from = format!(".{}", self.extension);
        let to = format!(".{CONTAINER_EXTENSION}");
        Ok(self.output_root.join(name.replace(&from, &to)))
    }

    /// Run inference over the corpus, decide the pruning set, and write one
    /// container per audio input.
    pub fn write_features(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_root).with_context(|| {
            format!(
                "failed to create output directory {}",
                self.output_root.display()
            )
        })?;

        let audio: Vec<&PathBuf> = self.paths.iter().filter(|p| self.is_audio(p)).collect();

        let mut feats: Vec<Array2<f32>> = Vec::with_capacity(audio.len());
        let mut nframes: Vec<usize> = Vec::with_capacity(audio.len());
        let mut max_frames = 0usize;
        let mut discovered: Vec<usize> = Vec::new();

        for (i, path) in audio.iter().enumerate() {
            let (samples, rate) = decoder::decode_to_f32_mono(path)?;
            ensure!(
                rate == REQUIRED_SAMPLE_RATE,
                "'{}' has sample rate {} Hz, expected {} (no resampling is performed)",
                path.display(),
                rate,
                REQUIRED_SAMPLE_RATE
            );

            let embedding = self.model.embed(&samples)?;
            let feat = if self.use_feature {
                embedding.feature
            } else {
                embedding.context
            };
            ensure!(
                feat.nrows() == EMBEDDING_CHANNELS,
                "'{}' produced {} channels, expected {}",
                path.display(),
                feat.nrows(),
                EMBEDDING_CHANNELS
            );

            collect_zero_variance(feat.view(), &mut discovered);

            let frames = feat.ncols();
            tracing::info!(
                file = %path.display(),
                frames,
                index = i + 1,
                total = audio.len(),
                "computed embedding"
            );

            max_frames = max_frames.max(frames);
            nframes.push(frames);
            feats.push(feat);
        }

        // One padded batch so channel deletion is a single uniform operation.
        // The padding never reaches disk: each container is cut back to its
        // file's true frame count below.
        let mut batch = Array3::<f32>::zeros((feats.len(), EMBEDDING_CHANNELS, max_frames));
        for (i, feat) in feats.iter().enumerate() {
            batch
                .slice_mut(s![i, .., ..feat.ncols()])
                .assign(feat);
        }
        drop(feats);

        let remove = match &self.remove_dims {
            None => {
                tracing::info!(dims = ?discovered, "removing dimensions with zero variance");
                let sidecar = self.output_root.join(REMOVE_DIMS_FILE);
                std::fs::write(&sidecar, format_remove_dims(&discovered))
                    .with_context(|| format!("failed to write {}", sidecar.display()))?;
                discovered
            }
            Some(list) => {
                tracing::info!(file = %list.display(), "removing dimensions from external list");
                let text = std::fs::read_to_string(list)
                    .with_context(|| format!("failed to read {}", list.display()))?;
                parse_remove_dims(&text)?
            }
        };

        for &dim in &remove {
            ensure!(
                dim < EMBEDDING_CHANNELS,
                "removal dimension {} is out of range (0..{})",
                dim,
                EMBEDDING_CHANNELS
            );
        }

        let keep: Vec<usize> = (0..EMBEDDING_CHANNELS)
            .filter(|d| !remove.contains(d))
            .collect();
        let pruned = batch.select(Axis(1), &keep);
        tracing::info!(shape = ?pruned.shape(), "pruned corpus array");

        for (i, path) in audio.iter().enumerate() {
            let target = self.container_path(path)?;
            container::write(&target, pruned.slice(s![i, .., ..nframes[i]]))?;
        }

        Ok(())
    }

    /// Copy every non-audio input verbatim into the output root, overwriting
    /// files of the same name.
    pub fn copy_labels(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_root).with_context(|| {
            format!(
                "failed to create output directory {}",
                self.output_root.display()
            )
        })?;

        for path in self.paths.iter().filter(|p| !self.is_audio(p)) {
            let name = path
                .file_name()
                .with_context(|| format!("label path '{}' has no file name", path.display()))?;
            std::fs::copy(path, self.output_root.join(name))
                .with_context(|| format!("failed to copy label {}", path.display()))?;
        }
        Ok(())
    }
}

/// Append every exactly-zero-variance channel of one file to the corpus-wide
/// discovery list, keeping first-discovery order and skipping duplicates.
///
/// A channel that varies in one file but is constant in another still ends up
/// in the list; downstream training depends on this cross-file union.
fn collect_zero_variance(feat: ArrayView2<f32>, discovered: &mut Vec<usize>) {
    let variance = feat.var_axis(Axis(1), 0.0);
    for (dim, v) in variance.iter().enumerate() {
        if *v == 0.0 && !discovered.contains(&dim) {
            discovered.push(dim);
        }
    }
}

fn format_remove_dims(dims: &[usize]) -> String {
    let mut out = String::new();
    for dim in dims {
        out.push_str(&dim.to_string());
        out.push(' ');
    }
    out
}

fn parse_remove_dims(text: &str) -> Result<Vec<usize>> {
    text.split_ascii_whitespace()
        .map(|tok| {
            tok.parse::<usize>()
                .with_context(|| format!("invalid removal dimension '{tok}'"))
        })
        .collect()
}
