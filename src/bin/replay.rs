use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use fastslam_rs::{FastSlam, Message, SlamConfig};
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::json;

#[derive(Parser, Debug)]
#[command(about = "Replay recorded command/observation logs through the FastSLAM engine")]
struct Args {
    /// Path to a message log (.json or .json.gz)
    #[arg(long, conflicts_with = "log_dir")]
    log: Option<PathBuf>,

    /// Directory of logs to batch replay (*.json[.gz])
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Engine config (JSON); defaults when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the particle count
    #[arg(long)]
    particles: Option<usize>,

    /// Override the RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Print the pose estimate after every message
    #[arg(long, default_value_t = false)]
    trace: bool,
}

#[derive(Deserialize)]
struct LogFile {
    messages: Vec<serde_json::Value>,
}

fn load_log(path: &Path) -> anyhow::Result<LogFile> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let reader = BufReader::new(GzDecoder::new(file));
        Ok(serde_json::from_reader(reader)?)
    } else {
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

fn run_once(path: &Path, config: &SlamConfig, args: &Args) -> anyhow::Result<serde_json::Value> {
    let log = load_log(path)?;
    let mut slam = FastSlam::new(config.clone())?;

    let mut rejected = 0usize;
    for (i, raw) in log.messages.into_iter().enumerate() {
        let message = match serde_json::from_value::<Message>(raw) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Message {} skipped: {}", i, e);
                rejected += 1;
                continue;
            }
        };
        if let Err(e) = message.validate() {
            log::warn!("Message {} skipped: {}", i, e);
            rejected += 1;
            continue;
        }

        let estimate = slam.apply_message(&message);
        if args.trace {
            println!(
                "[TRACE] t={:.2} x={:.3} y={:.3} heading={:.3}",
                message.stamp(),
                estimate.x,
                estimate.y,
                estimate.heading
            );
        }
    }

    let state = slam.get_state();
    let landmarks: Vec<serde_json::Value> = slam
        .best_particle()
        .landmarks()
        .map(|(id, lm)| {
            let (x, y) = lm.position();
            json!({
                "id": id.0,
                "x": x,
                "y": y,
                "color": lm.color(),
                "support_count": lm.support_count,
                "immutable": lm.immutable,
            })
        })
        .collect();

    Ok(json!({
        "log": path.display().to_string(),
        "rejected_messages": rejected,
        "state": state,
        "landmarks": landmarks,
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => SlamConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SlamConfig::default(),
    };
    if let Some(n) = args.particles {
        config.particle_count = n;
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    config.validate()?;

    let mut results = Vec::new();
    if let Some(dir) = args.log_dir.as_ref() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !(path.is_file() && (name.ends_with(".json") || name.ends_with(".json.gz"))) {
                continue;
            }
            match run_once(&path, &config, &args) {
                Ok(res) => results.push(res),
                Err(e) => log::error!("Failed {}: {:#}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &config, &args)?);
    } else {
        anyhow::bail!("Provide --log or --log-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
