//! Hot reload: request plumbing, the file watcher, and the controller that
//! rebuilds and swaps the program on the render thread.
//!
//! Any thread may post a [`ReloadReason`] through a [`ReloadHandle`]. The
//! render loop polls the [`ReloadController`] once per iteration, before it
//! touches the program, so a swap is always observed whole.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crossbeam_channel::{unbounded, Receiver, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::error::LoadError;
use crate::state::{ActiveProgram, RunnerState};

/// Why a reload was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadReason {
    SourceChanged,
    Manual,
}

/// Cloneable sender side of the reload channel.
#[derive(Debug, Clone)]
pub struct ReloadHandle {
    sender: Sender<ReloadReason>,
}

impl ReloadHandle {
    /// Posts a request; returns false once the render loop has gone away.
    pub fn request(&self, reason: ReloadReason) -> bool {
        self.sender.send(reason).is_ok()
    }
}

/// Receiver side, consumed by [`ReloadController::new`].
#[derive(Debug)]
pub struct ReloadRequests {
    receiver: Receiver<ReloadReason>,
}

pub fn reload_channel() -> (ReloadHandle, ReloadRequests) {
    let (sender, receiver) = unbounded();
    (ReloadHandle { sender }, ReloadRequests { receiver })
}

/// Result of one reload attempt.
#[derive(Debug)]
pub enum ReloadOutcome {
    Swapped,
    Rejected(LoadError),
}

/// Applies reload requests on the render thread.
///
/// The controller is idle between calls to [`poll`](Self::poll); a reload
/// starts and finishes inside one call, so the loop never sees it half done.
pub struct ReloadController {
    requests: ReloadRequests,
}

impl ReloadController {
    pub fn new(requests: ReloadRequests) -> Self {
        Self { requests }
    }

    /// Drains pending requests and performs at most one reload.
    ///
    /// On success the program, uniform table and clock are replaced together.
    /// On failure the diagnostic is logged and `runner` is left untouched.
    pub fn poll<B: Backend>(
        &mut self,
        backend: &mut B,
        runner: &mut RunnerState<B::Program>,
    ) -> Option<ReloadOutcome> {
        let mut pending = self.requests.receiver.try_iter();
        let reason = pending.next()?;
        let coalesced = 1 + pending.count();

        let path = runner.source_path().to_path_buf();
        debug!(?reason, coalesced, path = %path.display(), "reloading shader");

        let outcome = match ActiveProgram::load(backend, &path) {
            Ok(next) => {
                runner.swap(next);
                info!(path = %path.display(), "shader reloaded");
                ReloadOutcome::Swapped
            }
            Err(err) => {
                error!(path = %path.display(), "reload rejected, keeping previous program:\n{err}");
                ReloadOutcome::Rejected(err)
            }
        };
        Some(outcome)
    }
}

/// Watches one fragment file and posts [`ReloadReason::SourceChanged`].
pub struct SourceWatcher {
    _watcher: RecommendedWatcher,
}

impl SourceWatcher {
    /// Watches the parent directory so editors that save by renaming a
    /// temporary file over the original still trigger a reload.
    pub fn spawn(path: &Path, handle: ReloadHandle) -> notify::Result<Self> {
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(|name| name.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    if touches_file(&event, file_name.as_ref()) {
                        trace_event(&event);
                        let _ = handle.request(ReloadReason::SourceChanged);
                    }
                }
                Err(err) => warn!(error = %err, "file watcher error"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        info!(path = %path.display(), "watching shader for changes");

        Ok(Self { _watcher: watcher })
    }
}

fn trace_event(event: &Event) {
    tracing::trace!(kind = ?event.kind, paths = ?event.paths, "shader source event");
}

/// True for content-changing events on exactly the watched file name.
fn touches_file(event: &Event, file_name: Option<&OsString>) -> bool {
    let Some(file_name) = file_name else {
        return false;
    };
    let relevant = matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any
    );
    relevant
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name.as_os_str()))
}
