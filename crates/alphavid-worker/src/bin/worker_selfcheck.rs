use std::path::Path;

use alphavid_media::ffmpeg_version;
use alphavid_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_workdir(&config.work_dir).await?;
    ensure_ffmpeg(&config.ffmpeg_path).await?;
    ensure_env_present(&["REDIS_URL"])?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_workdir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path).await?;

    let probe = tempfile::NamedTempFile::new_in(path)
        .map_err(|e| anyhow::anyhow!("work dir {} not writable: {}", path.display(), e))?;
    drop(probe);
    Ok(())
}

async fn ensure_ffmpeg(binary: &str) -> anyhow::Result<()> {
    let version = ffmpeg_version(binary)
        .await
        .map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    println!("worker-selfcheck: {}", version);
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
