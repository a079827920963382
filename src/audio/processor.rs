use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use notify::{EventKind, RecursiveMode, Watcher};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::audio::transcription::is_supported_format;
use crate::database::models::JobType;
use crate::database::repositories::{JobsRepository, MeetingsRepository};
use crate::state::AppContext;

/// Watches the input directory for audio files and turns each new file into
/// a process-audio job. One task owns the filesystem watcher, one consumes
/// the queue; both observe shutdown. Files already present at startup are
/// scanned in, so nothing is lost while the service was down.
pub fn spawn(ctx: Arc<AppContext>, shutdown: CancellationToken) -> anyhow::Result<JoinHandle<()>> {
    let input_dir = ctx.config.input_dir.clone();
    std::fs::create_dir_all(&input_dir)
        .with_context(|| format!("failed to create input directory {}", input_dir.display()))?;
    std::fs::create_dir_all(input_dir.join("processed"))
        .context("failed to create processed directory")?;
    std::fs::create_dir_all(ctx.config.output_dir.join("transcriptions"))
        .context("failed to create output directory")?;

    let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

    // Queue files that arrived while the service was down.
    let mut existing = 0;
    for entry in std::fs::read_dir(&input_dir).context("failed to scan input directory")? {
        let entry = entry.context("failed to scan input directory")?;
        let path = entry.path();
        if path.is_file() {
            let _ = tx.send(path);
            existing += 1;
        }
    }
    if existing > 0 {
        info!("queued {} existing files from {}", existing, input_dir.display());
    }

    let watcher_tx = tx.clone();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_)) {
                    for path in event.paths {
                        let _ = watcher_tx.send(path);
                    }
                }
            }
            Err(e) => error!("file watcher error: {}", e),
        }
    })
    .context("failed to create file watcher")?;
    watcher
        .watch(&input_dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", input_dir.display()))?;
    info!("file watcher started: {}", input_dir.display());

    Ok(tokio::spawn(consume_queue(ctx, shutdown, rx, watcher)))
}

async fn consume_queue(
    ctx: Arc<AppContext>,
    shutdown: CancellationToken,
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    watcher: notify::RecommendedWatcher,
) {
    // The watcher stops when dropped; parking it here ties its lifetime to
    // the consumer task.
    let _watcher = watcher;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            path = rx.recv() => {
                let Some(path) = path else { break };
                if let Err(e) = handle_discovered_file(&ctx, &path).await {
                    error!("failed to queue {}: {}", path.display(), e);
                }
            }
        }
    }

    info!("audio processor stopped");
}

/// Creates the synthetic meeting and the process-audio job for a discovered
/// file, unless a job already references it (uploads enqueue their own job
/// before the file write lands, and the startup scan can race the watcher).
async fn handle_discovered_file(ctx: &Arc<AppContext>, path: &Path) -> Result<(), sqlx::Error> {
    let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
        return Ok(());
    };
    if !is_supported_format(filename) {
        debug!("ignoring non-audio file {}", filename);
        return Ok(());
    }

    let pool = ctx.pool();
    let path_str = path.to_string_lossy();
    if JobsRepository::exists_for_path(pool, &path_str).await? {
        debug!("{} is already queued", filename);
        return Ok(());
    }

    let meeting = MeetingsRepository::create(
        pool,
        filename,
        json!({"source": "audio", "filename": filename}),
    )
    .await?;
    JobsRepository::enqueue(
        pool,
        &meeting.id,
        JobType::ProcessAudio,
        json!({"path": path_str, "filename": filename}),
    )
    .await?;

    info!("queued audio file {} as meeting {}", filename, meeting.id);
    Ok(())
}
