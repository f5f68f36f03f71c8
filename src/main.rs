use std::io::BufRead;
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use fastslam_rs::live_status::{current_timestamp, LiveStatus};
use fastslam_rs::{FastSlam, Message, SlamConfig};

#[derive(Parser, Debug)]
#[command(name = "fastslam")]
#[command(about = "FastSLAM node: JSON-line commands/observations on stdin, pose estimates on stdout", long_about = None)]
struct Args {
    /// Engine config (JSON); defaults when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for live_status.json
    #[arg(long, default_value = "fastslam_status")]
    status_dir: PathBuf,

    /// Write the status file every N messages (0 = only at exit)
    #[arg(long, default_value = "50")]
    status_every: u64,

    /// Inbound queue depth
    #[arg(long, default_value = "1000")]
    queue: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.config.as_ref() {
        Some(path) => SlamConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SlamConfig::default(),
    };
    std::fs::create_dir_all(&args.status_dir)
        .with_context(|| format!("creating {}", args.status_dir.display()))?;

    log::info!("[{}] FastSLAM node starting", ts_now());
    log::info!("  Particles: {}", config.particle_count);
    log::info!("  Seed: {:?}", config.seed);
    log::info!("  Status Dir: {}", args.status_dir.display());

    let mut slam = FastSlam::new(config)?;

    // stdin reader feeds the engine through a bounded queue
    let (line_tx, mut line_rx) = mpsc::channel::<String>(args.queue.max(1));
    let _reader_handle = spawn_line_reader(std::io::BufReader::new(std::io::stdin()), line_tx);

    let started = Instant::now();
    let mut stdout = tokio::io::stdout();
    let mut received = 0u64;
    let mut rejected = 0u64;
    let status_path = args.status_dir.join("live_status.json");

    loop {
        let line = tokio::select! {
            line = line_rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                log::info!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        received += 1;

        let message = match Message::parse_line(trimmed) {
            Ok(m) => m,
            Err(e) => {
                rejected += 1;
                log::warn!("Dropped message {}: {}", received, e);
                continue;
            }
        };

        let estimate = slam.apply_message(&message);
        let mut out = serde_json::to_string(&estimate)?;
        out.push('\n');
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;

        if args.status_every > 0 && received % args.status_every == 0 {
            let status = build_status(&slam, started, received, rejected);
            if let Err(e) = status.save(&status_path) {
                log::warn!("Status write failed: {}", e);
            }
        }
    }

    let final_status = build_status(&slam, started, received, rejected);
    let final_path = args
        .status_dir
        .join(format!("live_status_{}_final.json", ts_now_clean()));
    final_status.save(&final_path)?;
    log::info!(
        "[{}] Final status: {} messages ({} rejected), {} cycles -> {}",
        ts_now(),
        received,
        rejected,
        final_status.filter.observation_cycles,
        final_path.display()
    );

    Ok(())
}

/// Forward lines from `reader` on a plain OS thread.
///
/// A blocking read there never holds up runtime shutdown after ctrl-c. The
/// thread ends at EOF, on a read error, or once the receiver is dropped.
fn spawn_line_reader<B>(reader: B, tx: mpsc::Sender<String>) -> JoinHandle<()>
where
    B: BufRead + Send + 'static,
{
    std::thread::spawn(move || {
        for line in reader.lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    })
}

fn build_status(slam: &FastSlam, started: Instant, received: u64, rejected: u64) -> LiveStatus {
    let mut status = LiveStatus::new(slam.get_state());
    status.timestamp = current_timestamp();
    status.uptime_seconds = started.elapsed().as_secs();
    status.messages_received = received;
    status.messages_rejected = rejected;
    status
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
