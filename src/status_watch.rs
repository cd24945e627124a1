//! Master-side watcher for secondary-display requests.
//!
//! A producing tool writes the source status record; the master polls it and
//! launches a secondary viewer when a new request shows up.
//!
//! ```text
//! Idle ──poll──→ Checking ──(record newer than us, and changed)──→ Triggering ──→ Idle
//!                   └──────────(absent / stale / unchanged)──────────────────────→ Idle
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::debug;

use crate::convert::ConversionService;
use crate::status::StatusStore;

pub const DEFAULT_STARTUP_DELAY: Duration = Duration::from_millis(2000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Checking,
    Triggering,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Nothing new (absent, unreadable, stale or unchanged record).
    Unchanged,
    /// A new request was seen. `launch` is the derived asset to show, if it
    /// exists on disk.
    Triggered { launch: Option<PathBuf> },
}

pub struct StatusWatcher {
    store: StatusStore,
    started_at: SystemTime,
    last_mtime: Option<SystemTime>,
    last_exported: Option<PathBuf>,
    state: WatchState,
}

impl StatusWatcher {
    /// Records last modified at or before `started_at` are leftovers from an
    /// earlier run and never trigger.
    pub fn new(store: StatusStore, started_at: SystemTime) -> Self {
        Self {
            store,
            started_at,
            last_mtime: None,
            last_exported: None,
            state: WatchState::Idle,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn check(&mut self) -> CheckOutcome {
        self.state = WatchState::Checking;
        let outcome = self.evaluate();
        self.state = WatchState::Idle;
        outcome
    }

    fn evaluate(&mut self) -> CheckOutcome {
        let Some(snapshot) = self.store.read() else {
            return CheckOutcome::Unchanged;
        };
        if snapshot.modified <= self.started_at {
            return CheckOutcome::Unchanged;
        }
        let exported = snapshot.record.exported_jpg;
        if self.last_mtime == Some(snapshot.modified) && self.last_exported == exported {
            return CheckOutcome::Unchanged;
        }

        self.state = WatchState::Triggering;
        self.last_mtime = Some(snapshot.modified);
        self.last_exported = exported.clone();
        debug!("status_watch: new request, exported={exported:?}");
        CheckOutcome::Triggered {
            launch: exported.filter(|p| p.exists()),
        }
    }
}

/// What the "open secondary" command should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenRequest {
    /// Convert `source` into `output`, then launch.
    Convert { source: PathBuf, output: PathBuf },
    /// Already viewable; launch directly.
    Launch(PathBuf),
    Nothing,
}

/// Decide the on-demand action from the current source record.
///
/// Records that only carry `exported_jpg` (written by older producers) are
/// launched without conversion.
pub fn open_request(store: &StatusStore, conversion: &ConversionService) -> OpenRequest {
    let Some(snapshot) = store.read() else {
        debug!("status_watch: no source record at {}", store.path().display());
        return OpenRequest::Nothing;
    };
    let record = snapshot.record;
    match (record.source_nef, record.exported_jpg) {
        (Some(source), exported) => {
            let output = exported.unwrap_or_else(|| conversion.output_path(&source));
            OpenRequest::Convert { source, output }
        }
        (None, Some(exported)) if Path::new(&exported).exists() => OpenRequest::Launch(exported),
        _ => OpenRequest::Nothing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{ConversionSettings, ExternalConverter};
    use crate::status::StatusRecord;
    use std::fs::{self, File};

    fn touch(path: &Path, at: SystemTime) {
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(at)
            .unwrap();
    }

    fn write_request(store: &StatusStore, exported: Option<PathBuf>, at: SystemTime) {
        store
            .write(&StatusRecord::source_request(None, exported))
            .unwrap();
        touch(store.path(), at);
    }

    fn epoch(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn absent_record_stays_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = StatusWatcher::new(StatusStore::new(dir.path().join("s.json")), epoch(100));
        assert_eq!(w.check(), CheckOutcome::Unchanged);
        assert_eq!(w.state(), WatchState::Idle);
    }

    #[test]
    fn stale_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let jpg = dir.path().join("x.jpg");
        fs::write(&jpg, b"jpg").unwrap();
        let store = StatusStore::new(dir.path().join("s.json"));
        write_request(&store, Some(jpg), epoch(50));
        let mut w = StatusWatcher::new(store, epoch(100));
        assert_eq!(w.check(), CheckOutcome::Unchanged);
    }

    #[test]
    fn triggers_once_per_change() {
        let dir = tempfile::tempdir().unwrap();
        let jpg = dir.path().join("x.jpg");
        fs::write(&jpg, b"jpg").unwrap();
        let store = StatusStore::new(dir.path().join("s.json"));
        let mut w = StatusWatcher::new(store.clone(), epoch(100));

        write_request(&store, Some(jpg.clone()), epoch(200));
        assert_eq!(
            w.check(),
            CheckOutcome::Triggered {
                launch: Some(jpg.clone())
            }
        );
        assert_eq!(w.state(), WatchState::Idle);
        assert_eq!(w.check(), CheckOutcome::Unchanged);

        // Rewritten later: triggers again.
        write_request(&store, Some(jpg.clone()), epoch(300));
        assert!(matches!(w.check(), CheckOutcome::Triggered { .. }));

        // Same mtime but different asset: triggers too.
        let other = dir.path().join("y.jpg");
        write_request(&store, Some(other), epoch(300));
        assert_eq!(w.check(), CheckOutcome::Triggered { launch: None });
    }

    #[test]
    fn missing_asset_triggers_without_launch() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("s.json"));
        let mut w = StatusWatcher::new(store.clone(), epoch(100));
        write_request(&store, Some(dir.path().join("gone.jpg")), epoch(200));
        assert_eq!(w.check(), CheckOutcome::Triggered { launch: None });
    }

    fn conversion(dir: &Path) -> ConversionService {
        ConversionService::new(
            Box::new(ExternalConverter {
                interpreter: None,
                program: "/bin/false".into(),
            }),
            ConversionSettings::new(dir),
        )
    }

    #[test]
    fn open_request_variants() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("s.json"));
        let conv = conversion(dir.path());
        assert_eq!(open_request(&store, &conv), OpenRequest::Nothing);

        store
            .write(&StatusRecord::source_request(Some("/a.raw".into()), None))
            .unwrap();
        assert_eq!(
            open_request(&store, &conv),
            OpenRequest::Convert {
                source: "/a.raw".into(),
                output: dir.path().join("a_converted.jpg"),
            }
        );

        store
            .write(&StatusRecord::source_request(
                Some("/a.raw".into()),
                Some("/out/a.jpg".into()),
            ))
            .unwrap();
        assert!(matches!(
            open_request(&store, &conv),
            OpenRequest::Convert { output, .. } if output == Path::new("/out/a.jpg")
        ));

        let jpg = dir.path().join("legacy.jpg");
        fs::write(&jpg, b"jpg").unwrap();
        store
            .write(&StatusRecord::source_request(None, Some(jpg.clone())))
            .unwrap();
        assert_eq!(open_request(&store, &conv), OpenRequest::Launch(jpg));

        store
            .write(&StatusRecord::source_request(None, Some("/nope.jpg".into())))
            .unwrap();
        assert_eq!(open_request(&store, &conv), OpenRequest::Nothing);
    }
}
