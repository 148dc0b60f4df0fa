//! Inspect a written embedding container: print its metadata and feature
//! statistics, optionally dumping the features to CSV (one row per frame)
//! for comparison against other implementations.

use anyhow::{Context, Result, bail};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        bail!("usage: wavembed-inspect <container> [features.csv]");
    }

    let container = wavembed_core::container::read(&args[1])
        .with_context(|| format!("failed to read container: {}", args[1]))?;

    println!("Container: {}", args[1]);
    println!("Frames/s:  {}", container.frames_per_second);
    println!("Frames:    {}", container.frames);
    println!("Channels:  {}", container.channels);
    println!(
        "Duration:  {:.2}s",
        container.frames as f64 / container.frames_per_second as f64
    );

    let min = container.features.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = container
        .features
        .iter()
        .cloned()
        .fold(f32::NEG_INFINITY, f32::max);
    let mean = container.features.iter().sum::<f32>() / container.features.len().max(1) as f32;
    let nan_count = container.features.iter().filter(|v| v.is_nan()).count();

    println!("Min:       {min:.6}");
    println!("Max:       {max:.6}");
    println!("Mean:      {mean:.6}");
    println!("NaNs:      {nan_count}");

    if let Some(csv_path) = args.get(2) {
        let mut writer = csv::Writer::from_path(csv_path)
            .with_context(|| format!("failed to create CSV output: {csv_path}"))?;

        for frame in container.features.chunks(container.channels) {
            let record: Vec<String> = frame.iter().map(|v| v.to_string()).collect();
            writer.write_record(&record)?;
        }
        writer.flush()?;

        println!("Wrote: {csv_path}");
        println!("Rows:  {}", container.frames);
    }

    Ok(())
}
