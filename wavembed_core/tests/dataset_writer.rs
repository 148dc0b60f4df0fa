//! End-to-end tests for the embedding dataset writer, driven by a synthetic
//! acoustic model and real wav files on disk.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use ndarray::Array2;

use wavembed_core::model::{AcousticModel, Embedding};
use wavembed_core::writer::{EmbeddingDatasetWriter, REMOVE_DIMS_FILE};
use wavembed_core::{EMBEDDING_CHANNELS, container};

const HOP: usize = 160;

/// Deterministic stand-in for the pretrained model: one frame per 160
/// samples, every channel varying over time except the configured constant
/// ones.
struct SyntheticModel {
    constant_channels: Vec<usize>,
}

impl SyntheticModel {
    fn value(&self, channel: usize, frame: usize) -> f32 {
        if self.constant_channels.contains(&channel) {
            0.25
        } else {
            0.001 * (channel + 1) as f32 + 0.1 * (frame + 1) as f32
        }
    }
}

impl AcousticModel for SyntheticModel {
    fn embed(&self, samples: &[f32]) -> Result<Embedding> {
        let frames = samples.len() / HOP;
        let feature = Array2::from_shape_fn((EMBEDDING_CHANNELS, frames), |(c, t)| {
            self.value(c, t)
        });
        let context = feature.mapv(|v| v + 0.5);
        Ok(Embedding { feature, context })
    }
}

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    // The writer classifies inputs by extension substring over the whole
    // path, so the fixture directory must not contain "wav" itself.
    let dir = std::env::temp_dir().join(format!("embed-writer-test-{name}-{nanos}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_wav(path: &Path, sample_rate: u32, frames: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
    for i in 0..frames * HOP {
        writer.write_sample(((i % 100) as i16) * 50).expect("sample");
    }
    writer.finalize().expect("finalize wav");
}

fn make_writer(
    out: &Path,
    constant_channels: Vec<usize>,
    use_feature: bool,
    remove_dims: Option<PathBuf>,
    paths: Vec<PathBuf>,
) -> EmbeddingDatasetWriter {
    EmbeddingDatasetWriter::new(
        out.to_path_buf(),
        Box::new(SyntheticModel { constant_channels }),
        "wav".to_string(),
        use_feature,
        remove_dims,
        paths,
    )
    .expect("construct writer")
}

#[test]
fn uniform_corpus_round_trips_without_padding() {
    let dir = tmp_dir("uniform");
    let out = dir.join("out");

    let mut paths = Vec::new();
    for name in ["a.wav", "b.wav", "c.wav"] {
        let p = dir.join(name);
        write_wav(&p, 16_000, 12);
        paths.push(p);
    }

    let writer = make_writer(&out, vec![], true, None, paths);
    writer.write_features().expect("write features");

    for name in ["a.context", "b.context", "c.context"] {
        let c = container::read(out.join(name)).expect("read container");
        assert_eq!(c.frames_per_second, 100);
        assert_eq!(c.frames, 12);
        assert_eq!(c.channels, EMBEDDING_CHANNELS);
        assert_eq!(c.features.len(), 12 * EMBEDDING_CHANNELS);
    }

    // No channel was constant, so auto-discovery found nothing.
    let sidecar = std::fs::read_to_string(out.join(REMOVE_DIMS_FILE)).expect("sidecar");
    assert_eq!(sidecar, "");

    std::fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn padding_never_reaches_containers() {
    let dir = tmp_dir("padding");
    let out = dir.join("out");

    let short = dir.join("short.wav");
    let long = dir.join("long.wav");
    write_wav(&short, 16_000, 5);
    write_wav(&long, 16_000, 20);

    let writer = make_writer(&out, vec![], true, None, vec![short, long]);
    writer.write_features().expect("write features");

    let c = container::read(out.join("short.context")).expect("read short");
    assert_eq!(c.frames, 5);
    assert_eq!(c.features.len(), 5 * EMBEDDING_CHANNELS);

    // The last stored frame is the file's own data, not padding zeros.
    let model = SyntheticModel {
        constant_channels: vec![],
    };
    let last_frame = &c.features[4 * EMBEDDING_CHANNELS..];
    for (channel, &v) in last_frame.iter().enumerate() {
        assert_eq!(v, model.value(channel, 4));
    }

    let c = container::read(out.join("long.context")).expect("read long");
    assert_eq!(c.frames, 20);

    std::fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn auto_discovery_prunes_corpus_constant_channel() {
    let dir = tmp_dir("discovery");
    let out = dir.join("out");

    let mut paths = Vec::new();
    for name in ["a.wav", "b.wav"] {
        let p = dir.join(name);
        write_wav(&p, 16_000, 8);
        paths.push(p);
    }

    let writer = make_writer(&out, vec![7], true, None, paths);
    writer.write_features().expect("write features");

    let sidecar = std::fs::read_to_string(out.join(REMOVE_DIMS_FILE)).expect("sidecar");
    assert_eq!(sidecar, "7 ");

    let c = container::read(out.join("a.context")).expect("read container");
    assert_eq!(c.channels, EMBEDDING_CHANNELS - 1);
    assert_eq!(c.features.len(), 8 * (EMBEDDING_CHANNELS - 1));

    // Channel 7 is gone: frame 0 holds channels 0..6 then 8.. in order.
    let model = SyntheticModel {
        constant_channels: vec![7],
    };
    assert_eq!(c.features[6], model.value(6, 0));
    assert_eq!(c.features[7], model.value(8, 0));

    std::fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn external_list_overrides_discovery() {
    let dir = tmp_dir("external");
    let out = dir.join("out");

    let wav = dir.join("a.wav");
    write_wav(&wav, 16_000, 6);

    // Channel 5 is constant, but the external list wins.
    let list = dir.join("dims.txt");
    std::fs::write(&list, "3 9 200 ").expect("write list");

    let writer = make_writer(&out, vec![5], true, Some(list), vec![wav]);
    writer.write_features().expect("write features");

    let c = container::read(out.join("a.context")).expect("read container");
    assert_eq!(c.channels, EMBEDDING_CHANNELS - 3);

    // Discovery mode was not used, so no sidecar is written.
    assert!(!out.join(REMOVE_DIMS_FILE).exists());

    std::fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn out_of_range_external_dimension_is_fatal() {
    let dir = tmp_dir("outofrange");
    let out = dir.join("out");

    let wav = dir.join("a.wav");
    write_wav(&wav, 16_000, 4);

    let list = dir.join("dims.txt");
    std::fs::write(&list, "600 ").expect("write list");

    let writer = make_writer(&out, vec![], true, Some(list), vec![wav]);
    assert!(writer.write_features().is_err());

    std::fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn context_is_selected_unless_use_feature() {
    let dir = tmp_dir("context");
    let out = dir.join("out");

    let wav = dir.join("a.wav");
    write_wav(&wav, 16_000, 4);

    let writer = make_writer(&out, vec![], false, None, vec![wav]);
    writer.write_features().expect("write features");

    let c = container::read(out.join("a.context")).expect("read container");
    let model = SyntheticModel {
        constant_channels: vec![],
    };
    // Context representation is the synthetic feature shifted by 0.5.
    assert_eq!(c.features[0], model.value(0, 0) + 0.5);

    std::fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn wrong_sample_rate_aborts_with_no_output() {
    let dir = tmp_dir("samplerate");
    let out = dir.join("out");

    let good = dir.join("good.wav");
    let bad = dir.join("bad.wav");
    write_wav(&good, 16_000, 4);
    write_wav(&bad, 8_000, 4);

    let writer = make_writer(&out, vec![], true, None, vec![good, bad]);
    let err = writer.write_features().expect_err("must abort");
    assert!(err.to_string().contains("sample rate"));

    // Serialization only starts after corpus-wide inference succeeds, so a
    // mid-corpus failure leaves no container and no sidecar behind.
    assert!(!out.join("good.context").exists());
    assert!(!out.join("bad.context").exists());
    assert!(!out.join(REMOVE_DIMS_FILE).exists());

    std::fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn missing_input_fails_before_processing() {
    let dir = tmp_dir("missing");
    let out = dir.join("out");

    let result = EmbeddingDatasetWriter::new(
        out,
        Box::new(SyntheticModel {
            constant_channels: vec![],
        }),
        "wav".to_string(),
        true,
        None,
        vec![dir.join("nope.wav")],
    );
    assert!(result.is_err());

    std::fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn labels_are_copied_verbatim() {
    let dir = tmp_dir("labels");
    let out = dir.join("out");

    let wav = dir.join("a.wav");
    write_wav(&wav, 16_000, 4);
    let label = dir.join("a.txt");
    std::fs::write(&label, "hello world\n").expect("write label");

    let writer = make_writer(&out, vec![], true, None, vec![wav, label]);
    writer.write_features().expect("write features");
    writer.copy_labels().expect("copy labels");

    // The label went through untouched; no container was written for it.
    let copied = std::fs::read_to_string(out.join("a.txt")).expect("read copy");
    assert_eq!(copied, "hello world\n");
    assert!(out.join("a.context").exists());
    assert!(!out.join("a.txt.context").exists());

    std::fs::remove_dir_all(dir).expect("cleanup");
}

#[test]
fn label_under_extension_named_directory_counts_as_audio() {
    let dir = tmp_dir("subdir");
    let out = dir.join("out");

    // The extension filter matches anywhere in the path, so a text file under
    // a "wav"-named directory is picked up for decoding and fails the run.
    let sub = dir.join("wav-labels");
    std::fs::create_dir_all(&sub).expect("create subdir");
    let label = sub.join("notes.txt");
    std::fs::write(&label, "not audio\n").expect("write label");

    let writer = make_writer(&out, vec![], true, None, vec![label]);
    assert!(writer.write_features().is_err());

    std::fs::remove_dir_all(dir).expect("cleanup");
}
