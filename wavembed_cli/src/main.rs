//! Precompute speech embeddings for a corpus of audio files.
//!
//! Reads one input path per line from stdin, runs each audio file through a
//! pretrained wav2vec checkpoint, prunes zero-variance embedding channels
//! corpus-wide, and writes one container per file into the output directory.

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use wavembed_core::model::wav2vec::Wav2Vec;
use wavembed_core::writer::EmbeddingDatasetWriter;

#[derive(Parser, Debug)]
#[command(name = "wavembed", about = "Pre-compute embeddings for ASR datasets")]
struct Args {
    /// Output directory. Created if absent.
    #[arg(short, long)]
    output: PathBuf,

    /// Path to the pretrained model checkpoint (safetensors).
    #[arg(long)]
    model: PathBuf,

    /// Audio file extension; inputs not containing it are treated as labels.
    #[arg(long, default_value = "wav")]
    ext: String,

    /// Do not copy label files. Useful for large datasets.
    #[arg(long)]
    no_copy_labels: bool,

    /// Use the feature vector ("z") instead of the context vector ("c").
    #[arg(long)]
    use_feat: bool,

    /// File containing a list of dimensions to remove, space separated.
    /// Without it, zero-variance dimensions are discovered from the corpus.
    #[arg(long)]
    remove_dims: Option<PathBuf>,

    /// Accelerator ordinal to run the model on.
    #[arg(long, default_value_t = 0)]
    gpu: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let args = Args::parse();

    let model = Wav2Vec::load(&args.model, args.gpu)?;
    let paths = EmbeddingDatasetWriter::read_paths(io::stdin().lock())?;

    let writer = EmbeddingDatasetWriter::new(
        args.output,
        Box::new(model),
        args.ext,
        args.use_feat,
        args.remove_dims,
        paths,
    )?;

    tracing::info!(files = writer.len(), "writing features");
    writer.write_features()?;

    if !args.no_copy_labels {
        writer.copy_labels()?;
    }

    Ok(())
}
