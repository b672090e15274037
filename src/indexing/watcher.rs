//! Debounced file watcher driving incremental reindexing.
//!
//! Events coalesce per path inside one debounce window: only the latest
//! add/change/unlink intent for a path is acted on. The embedding provider
//! is owned by the indexer handed in, so watching never re-initializes
//! models behind the caller's back.

use crate::error::{WatchError, WatchResult};
use crate::indexing::indexer::{IndexOptions, Indexer};
use crate::indexing::walker;
use crate::parsing::Language;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Floor applied to the configured debounce.
const MIN_DEBOUNCE_MS: u64 = 50;

/// Called after each processed batch with the changed and deleted paths.
pub type BatchFn = Box<dyn Fn(&[String], &[String]) + Send + Sync>;

pub struct WatchOptions {
    pub debounce_ms: u64,
    pub on_batch: Option<BatchFn>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce_ms: 300,
            on_batch: None,
        }
    }
}

enum Control {
    Flush(oneshot::Sender<()>),
    Close(oneshot::Sender<()>),
}

/// Handle on a running watch. Dropping it without `close()` aborts the
/// task; `close()` drains pending changes first.
pub struct WatchHandle {
    control_tx: mpsc::Sender<Control>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl WatchHandle {
    /// Process any pending changes now, without waiting out the debounce.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.control_tx.send(Control::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Stop watching. Pending changes are drained before this returns;
    /// calling it again is a no-op.
    pub async fn close(&mut self) {
        let (tx, rx) = oneshot::channel();
        if self.control_tx.send(Control::Close(tx)).await.is_ok() {
            let _ = rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Start watching the indexer's project root.
pub fn watch(mut indexer: Indexer, options: WatchOptions) -> WatchResult<WatchHandle> {
    let root = indexer.layout().root().to_path_buf();
    let debounce = Duration::from_millis(options.debounce_ms.max(MIN_DEBOUNCE_MS));

    let (event_tx, mut event_rx) = mpsc::channel::<Event>(256);
    let mut watcher =
        notify::recommended_watcher(move |result: notify::Result<Event>| match result {
            Ok(event) => {
                let _ = event_tx.blocking_send(event);
            }
            Err(e) => tracing::warn!(error = %e, "file watch event error"),
        })
        .map_err(|e| WatchError::Init {
            reason: e.to_string(),
        })?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| WatchError::PathWatch {
            path: root.clone(),
            reason: e.to_string(),
        })?;

    let (control_tx, mut control_rx) = mpsc::channel::<Control>(8);
    let on_batch = options.on_batch;

    let task = tokio::spawn(async move {
        // Keep the OS watcher alive for the task's lifetime.
        let _watcher = watcher;
        let mut changed: HashSet<String> = HashSet::new();
        let mut deleted: HashSet<String> = HashSet::new();
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            let armed = deadline;
            let timer = async move {
                match armed {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                maybe_event = event_rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    if absorb_event(&root, &event, &mut changed, &mut deleted) {
                        deadline = Some(tokio::time::Instant::now() + debounce);
                    }
                }
                _ = timer => {
                    deadline = None;
                    run_batch(&mut indexer, &mut changed, &mut deleted, on_batch.as_ref()).await;
                    // Events that arrived while indexing re-arm the timer.
                    if !changed.is_empty() || !deleted.is_empty() {
                        deadline = Some(tokio::time::Instant::now() + debounce);
                    }
                }
                maybe_control = control_rx.recv() => {
                    match maybe_control {
                        Some(Control::Flush(reply)) => {
                            deadline = None;
                            run_batch(&mut indexer, &mut changed, &mut deleted, on_batch.as_ref()).await;
                            let _ = reply.send(());
                        }
                        Some(Control::Close(reply)) => {
                            // Drain pending changes before going away.
                            run_batch(&mut indexer, &mut changed, &mut deleted, on_batch.as_ref()).await;
                            let _ = reply.send(());
                            break;
                        }
                        None => break,
                    }
                }
            }
        }
    });

    Ok(WatchHandle {
        control_tx,
        task: Some(task),
    })
}

/// Fold one FS event into the pending sets. The latest intent per path
/// wins. Returns whether anything was recorded.
fn absorb_event(
    root: &Path,
    event: &Event,
    changed: &mut HashSet<String>,
    deleted: &mut HashSet<String>,
) -> bool {
    let mut recorded = false;
    for path in &event.paths {
        let Some(rel) = relevant_rel_path(root, path) else {
            continue;
        };
        match event.kind {
            EventKind::Remove(_) => {
                changed.remove(&rel);
                deleted.insert(rel);
                recorded = true;
            }
            EventKind::Create(_) | EventKind::Modify(_) => {
                deleted.remove(&rel);
                changed.insert(rel);
                recorded = true;
            }
            _ => {}
        }
    }
    recorded
}

/// A path the watcher cares about: under the root, a supported language,
/// and not inside a denied directory.
fn relevant_rel_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    if walker::path_is_denied(rel) {
        return None;
    }
    Language::from_path(rel)?;
    Some(walker::normalize_rel_path(rel))
}

async fn run_batch(
    indexer: &mut Indexer,
    changed: &mut HashSet<String>,
    deleted: &mut HashSet<String>,
    on_batch: Option<&BatchFn>,
) {
    if changed.is_empty() && deleted.is_empty() {
        return;
    }
    let changed_snapshot: Vec<String> = changed.drain().collect();
    let deleted_snapshot: Vec<String> = deleted.drain().collect();

    let options = IndexOptions {
        changed_files: Some(changed_snapshot.iter().map(PathBuf::from).collect()),
        deleted_files: deleted_snapshot.iter().map(PathBuf::from).collect(),
        ..IndexOptions::default()
    };
    match indexer.index(options).await {
        Ok(report) => match on_batch {
            Some(callback) => callback(&changed_snapshot, &deleted_snapshot),
            None => tracing::info!(
                changed = changed_snapshot.len(),
                deleted = deleted_snapshot.len(),
                processed_chunks = report.processed_chunks,
                "watch batch indexed"
            ),
        },
        Err(e) => tracing::warn!(error = %e, "watch batch failed"),
    }
}
