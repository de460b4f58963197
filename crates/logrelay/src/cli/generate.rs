//! Synthetic log file generator for load testing the pipeline.

use anyhow::{Context, Result};
use chrono::{Duration, SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const WRITE_BUFFER_SIZE: usize = 64 * 1024;
const JSON_PAYLOAD_RATIO: f64 = 0.3;

const LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARN", "ERROR", "FATAL"];

const MESSAGES: [&str; 8] = [
    "request handled",
    "cache miss for key",
    "connection pool exhausted",
    "retrying upstream call",
    "user session expired",
    "disk usage above threshold",
    "scheduled job finished",
    "payload rejected by validator",
];

#[derive(clap::Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Output file
    pub path: PathBuf,

    /// Approximate size in MiB
    #[arg(long, default_value_t = 10)]
    pub size_mb: u64,

    /// Seed for reproducible output
    #[arg(long)]
    pub seed: Option<u64>,
}

pub fn run(args: GenerateArgs) -> Result<()> {
    let target = args.size_mb.saturating_mul(1024 * 1024);
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let written = generate(&args.path, target, &mut rng)
        .with_context(|| format!("Failed to write {}", args.path.display()))?;
    info!(path = %args.path.display(), bytes = written, "Log file generated");
    println!("Wrote {} bytes to {}", written, args.path.display());
    Ok(())
}

/// Write lines until at least `target_bytes` are on disk. Returns bytes written.
pub fn generate<R: Rng>(path: &Path, target_bytes: u64, rng: &mut R) -> std::io::Result<u64> {
    let file = File::create(path)?;
    let mut out = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);
    let start = Utc::now();
    let mut written = 0u64;
    let mut seq = 0i64;

    while written < target_bytes {
        let line = render_line(start + Duration::milliseconds(seq), rng);
        out.write_all(line.as_bytes())?;
        written += line.len() as u64;
        seq += 1;
    }

    out.flush()?;
    Ok(written)
}

fn render_line<R: Rng>(at: chrono::DateTime<Utc>, rng: &mut R) -> String {
    let level = LEVELS[rng.gen_range(0..LEVELS.len())];
    let message = MESSAGES[rng.gen_range(0..MESSAGES.len())];
    let mut line = format!(
        "[{}] {} {}",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        level,
        message
    );

    if rng.gen_bool(JSON_PAYLOAD_RATIO) {
        let payload = serde_json::json!({
            "request_id": rng.gen::<u32>(),
            "latency_ms": rng.gen_range(1..5000),
            "user": format!("user{}", rng.gen_range(1..1000)),
        });
        line.push(' ');
        line.push_str(&payload.to_string());
    }

    line.push('\n');
    line
}
