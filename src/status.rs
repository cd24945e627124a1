//! Status records: what an instance is currently showing, persisted as JSON.
//!
//! Every instance owns exactly one status file and rewrites the whole record on
//! each change. A producing tool writes a separate "source" record that asks
//! the master to show a converted asset next to the original.
//!
//! There is no locking. A reader that sees a torn or half-written file treats
//! it as "no status" and simply tries again on the next poll.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Local, NaiveDateTime, Timelike};
use log::debug;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, ViewerError};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Local wall-clock time with second precision, stored as `YYYY-MM-DD HH:MM:SS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    pub fn now() -> Self {
        let now = Local::now().naive_local();
        Self(now.with_nanosecond(0).unwrap_or(now))
    }

    pub fn parse(s: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
            .ok()
            .map(Self)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Timestamp::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Running,
    Exited,
}

/// One status file's content.
///
/// `app_status` and `app_started` default when missing so that hand-written
/// source records (which usually only carry `source_nef`/`exported_jpg`) still
/// parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    #[serde(default)]
    pub app_status: AppStatus,
    #[serde(default)]
    pub app_started: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_opened: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_updated: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_nef: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_jpg: Option<PathBuf>,
}

impl StatusRecord {
    /// Record written by a producer asking the master to show `exported`
    /// (or the conversion of `source`) in a secondary window.
    pub fn source_request(source: Option<PathBuf>, exported: Option<PathBuf>) -> Self {
        let now = Timestamp::now();
        Self {
            app_status: AppStatus::Running,
            app_started: now,
            file_updated: Some(now),
            source_nef: source,
            exported_jpg: exported,
            ..Self::default()
        }
    }
}

/// A record together with the file's modification time at read.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub record: StatusRecord,
    pub modified: SystemTime,
}

/// Whole-record JSON store backed by a single file.
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record, distinguishing a missing file from a malformed one.
    pub fn try_read(&self) -> Result<StatusSnapshot> {
        let meta = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ViewerError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(self.unreadable(e)),
        };
        let modified = meta.modified().map_err(|e| self.unreadable(e))?;
        let text = fs::read_to_string(&self.path).map_err(|e| self.unreadable(e))?;
        let record = serde_json::from_str(&text).map_err(|e| self.unreadable(e))?;
        Ok(StatusSnapshot { record, modified })
    }

    /// Read the record; any failure reads as "no status".
    pub fn read(&self) -> Option<StatusSnapshot> {
        match self.try_read() {
            Ok(snapshot) => Some(snapshot),
            Err(ViewerError::NotFound(_)) => None,
            Err(e) => {
                debug!("status: {e}");
                None
            }
        }
    }

    /// Overwrite the whole file with `record`, creating the directory if needed.
    pub fn write(&self, record: &StatusRecord) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, json)?;
        debug!("status: wrote {}", self.path.display());
        Ok(())
    }

    fn unreadable(&self, e: impl fmt::Display) -> ViewerError {
        ViewerError::StatusUnreadable {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct OpenFile {
    path: PathBuf,
    opened: Timestamp,
    updated: Timestamp,
}

/// The status an instance publishes about itself.
///
/// Every mutation re-serializes all known fields into the owned store.
pub struct InstanceStatus {
    store: StatusStore,
    started: Timestamp,
    running: bool,
    current: Option<OpenFile>,
}

impl InstanceStatus {
    pub fn new(store: StatusStore) -> Self {
        Self {
            store,
            started: Timestamp::now(),
            running: true,
            current: None,
        }
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    pub fn record(&self) -> StatusRecord {
        StatusRecord {
            app_status: if self.running {
                AppStatus::Running
            } else {
                AppStatus::Exited
            },
            app_started: self.started,
            file_path: self.current.as_ref().map(|f| f.path.clone()),
            file_opened: self.current.as_ref().map(|f| f.opened),
            file_updated: self.current.as_ref().map(|f| f.updated),
            ..StatusRecord::default()
        }
    }

    /// Write the initial "running" record.
    pub fn announce(&self) -> Result<()> {
        self.store.write(&self.record())
    }

    pub fn file_opened(&mut self, path: &Path) -> Result<()> {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let now = Timestamp::now();
        debug!("status: file opened {}", path.display());
        self.current = Some(OpenFile {
            path,
            opened: now,
            updated: now,
        });
        self.announce()
    }

    /// The image finished (re)displaying. No-op when nothing is open.
    pub fn file_viewed(&mut self) -> Result<()> {
        self.file_viewed_at(Timestamp::now())
    }

    /// Like [`file_viewed`](Self::file_viewed) with an explicit clock reading.
    /// `file_updated` never moves backwards.
    pub fn file_viewed_at(&mut self, now: Timestamp) -> Result<()> {
        let Some(current) = self.current.as_mut() else {
            return Ok(());
        };
        current.updated = current.updated.max(now);
        self.announce()
    }

    pub fn exited(&mut self) -> Result<()> {
        self.running = false;
        debug!("status: marking exited");
        self.announce()
    }
}
