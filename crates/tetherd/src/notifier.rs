//! Change notification: turns bursts of relay list edits into one reload.
//!
//! ```text
//!   notify thread ──▶ ChangeSignal ──▶ mpsc(1) ──▶ debouncer task ──▶ SupervisorHandle::reload
//! ```
//!
//! The watcher callback runs on notify's own thread and only performs a
//! non-blocking `try_send`; the reload itself always runs as a supervisor
//! command on the tokio runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::supervisor::SupervisorHandle;

/// Default quiet period before a reload.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

// ============================================================================
// Change Signal
// ============================================================================

/// Sender side of the change channel. Cheap to clone and safe to use from
/// any thread, inside or outside the runtime.
#[derive(Debug, Clone)]
pub struct ChangeSignal {
    sender: mpsc::Sender<()>,
}

impl ChangeSignal {
    /// Records that the membership may have changed.
    ///
    /// Never blocks. A signal that is already pending absorbs this one.
    pub fn notify(&self) {
        match self.sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => {
                debug!("Change signal dropped: debouncer stopped");
            }
        }
    }
}

/// Creates a change signal and the receiver the debouncer consumes.
pub fn signal_channel() -> (ChangeSignal, mpsc::Receiver<()>) {
    let (sender, receiver) = mpsc::channel(1);
    (ChangeSignal { sender }, receiver)
}

// ============================================================================
// Debouncer
// ============================================================================

/// Spawns the task that waits for `window` of quiet after a signal and then
/// asks the supervisor to reload.
///
/// Every new signal inside the window restarts it. Signals arriving while a
/// reload is running are kept and produce one more reload afterwards.
pub fn spawn_debouncer(
    mut signals: mpsc::Receiver<()>,
    window: Duration,
    supervisor: SupervisorHandle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                signal = signals.recv() => {
                    if signal.is_none() {
                        break;
                    }
                }
            }

            // Quiet period
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    signal = signals.recv() => match signal {
                        Some(()) => continue,
                        None => break,
                    },
                    _ = sleep(window) => break,
                }
            }

            info!("Relay list changed, reloading");
            match supervisor.reload().await {
                Ok(report) if report.is_empty() => debug!("Reload made no changes"),
                Ok(report) => info!(
                    added = report.added.len(),
                    removed = report.removed.len(),
                    "Reload applied"
                ),
                Err(e) => {
                    warn!(error = %e, "Reload rejected, debouncer stopping");
                    break;
                }
            }
        }
        debug!("Debouncer stopped");
    })
}

// ============================================================================
// File Watcher
// ============================================================================

/// Watches one file and raises a [`ChangeSignal`] when it is written or
/// replaced. Watching stops when this value is dropped.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl FileWatcher {
    /// Starts watching `path`.
    ///
    /// The parent directory is watched so editors that replace the file
    /// (write to a temp file, then rename) are still seen.
    pub fn watch(path: impl Into<PathBuf>, signal: ChangeSignal) -> Result<Self, WatchError> {
        let path = path.into();
        let directory = watch_directory(&path);
        let file_name = path.file_name().map(|n| n.to_os_string());

        let watch_error = |source| WatchError::Watch {
            path: path.clone(),
            source,
        };

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    if is_relevant(&event, file_name.as_deref()) {
                        signal.notify();
                    }
                }
                Err(e) => warn!(error = %e, "File watch error"),
            }
        })
        .map_err(watch_error)?;

        watcher
            .watch(&directory, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;

        info!(path = %path.display(), "Watching relay list");
        Ok(Self {
            _watcher: watcher,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn watch_directory(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn is_relevant(event: &Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Any
    ) {
        return false;
    }
    let Some(file_name) = file_name else {
        return false;
    };
    event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(file_name))
}
