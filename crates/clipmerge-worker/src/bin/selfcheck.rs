use std::path::Path;
use std::process::Command;

use clipmerge_media::{check_ffmpeg, check_ffprobe};
use clipmerge_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "clipmerge-selfcheck: starting with scratch_dir={}",
        config.scratch_dir
    );
    ensure_scratch_dir(&config.scratch_dir).await?;
    ensure_ffmpeg()?;
    ensure_ffprobe()?;

    println!(
        "clipmerge-selfcheck: ok ({} workers, queue capacity {})",
        config.max_concurrent_tasks, config.queue_capacity
    );
    Ok(())
}

async fn ensure_scratch_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;

    // Scratch must be writable, not just present
    let probe = path.join(".selfcheck");
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn ensure_ffmpeg() -> anyhow::Result<()> {
    let ffmpeg = check_ffmpeg()?;
    let output = Command::new(&ffmpeg)
        .arg("-version")
        .output()
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffmpeg -version failed: {:?}", output.status));
    }
    Ok(())
}

fn ensure_ffprobe() -> anyhow::Result<()> {
    let ffprobe = check_ffprobe()?;
    println!("clipmerge-selfcheck: ffprobe at {}", ffprobe.display());
    Ok(())
}
