//! Displayed-image watcher: notices when the file on disk changes.
//!
//! notify::RecommendedWatcher runs callbacks on an internal thread;
//! change notifications reach the window's loop through an mpsc channel and
//! are drained on each image poll. If a notify watcher cannot be set up
//! (unsupported filesystem, inotify limits) the file's mtime is compared on
//! each poll instead.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::SystemTime;

use anyhow::Result;
use log::{debug, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};

pub struct FileWatcher {
    rx: mpsc::Receiver<()>,
    _watcher: RecommendedWatcher, // Drop stops watching
}

impl FileWatcher {
    /// Create a FileWatcher that monitors the given file for changes.
    ///
    /// Linux inotify loses the watch on rename (atomic save), so we watch
    /// the parent directory (NonRecursive) and filter events by path.
    pub fn new(path: &Path) -> Result<Self> {
        let canonical = path.canonicalize()?;
        let target = canonical.clone();
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let ours = event.paths.iter().any(|p| p == &target);
                    if ours && (event.kind.is_modify() || event.kind.is_create()) {
                        let _ = tx.send(());
                    }
                }
            },
            notify::Config::default(),
        )?;
        let parent = canonical
            .parent()
            .ok_or_else(|| anyhow::anyhow!("cannot watch root path"))?;
        watcher.watch(parent, RecursiveMode::NonRecursive)?;

        Ok(Self { rx, _watcher: watcher })
    }

    /// Return true if the file has changed since last check (non-blocking).
    /// Multiple queued notifications are collapsed into a single true.
    pub fn has_changed(&self) -> bool {
        let mut changed = false;
        while self.rx.try_recv().is_ok() {
            changed = true;
        }
        changed
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Change detection for the displayed image.
pub enum ImageWatch {
    Notify(FileWatcher),
    Mtime {
        path: PathBuf,
        last: Option<SystemTime>,
    },
}

impl ImageWatch {
    pub fn new(path: &Path) -> Self {
        match FileWatcher::new(path) {
            Ok(w) => {
                debug!("watch: notify watcher on {}", path.display());
                ImageWatch::Notify(w)
            }
            Err(e) => {
                warn!("watch: {e}; falling back to mtime polling");
                Self::polling(path)
            }
        }
    }

    pub fn polling(path: &Path) -> Self {
        ImageWatch::Mtime {
            path: path.to_path_buf(),
            last: mtime(path),
        }
    }

    pub fn has_changed(&mut self) -> bool {
        match self {
            ImageWatch::Notify(w) => w.has_changed(),
            ImageWatch::Mtime { path, last } => {
                let now = mtime(path);
                // A vanished file is not a change; wait for it to come back.
                if now.is_some() && now != *last {
                    *last = now;
                    true
                } else {
                    false
                }
            }
        }
    }
}
