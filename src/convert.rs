//! Raw → viewable conversion through an external converter.
//!
//! ```text
//! ensure_viewable(source)
//!   ├─ output fresher than source ─→ Ready(output)      (no conversion)
//!   └─ otherwise spawn converter ──→ Pending(job)
//!                                      job.poll() every poll_interval:
//!                                        Running  → wait for exit
//!                                        exit 0   → Flushing: wait until size > min
//!                                        exit ≠ 0 / budget exhausted → ConversionFailed
//! ```
//!
//! Converters have been seen to exit 0 before the output is flushed, so a
//! zero exit code alone is not trusted.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Result, ViewerError};

pub const DEFAULT_MIN_OUTPUT_BYTES: u64 = 50 * 1024;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_POLLS: u32 = 20;

/// Starts a conversion of `source` into `output`.
pub trait ConverterBackend {
    fn start(&self, source: &Path, output: &Path) -> io::Result<Box<dyn RunningConversion>>;
}

/// A conversion in progress.
pub trait RunningConversion {
    /// `None` while still running, `Some(true)` on a zero exit code.
    fn try_finish(&mut self) -> io::Result<Option<bool>>;
}

impl RunningConversion for Child {
    fn try_finish(&mut self) -> io::Result<Option<bool>> {
        Ok(self.try_wait()?.map(|status| {
            debug!("convert: converter exited with {status}");
            status.success()
        }))
    }
}

/// Runs `[interpreter] program source output` as a child process.
#[derive(Debug, Clone)]
pub struct ExternalConverter {
    pub interpreter: Option<PathBuf>,
    pub program: PathBuf,
}

impl ConverterBackend for ExternalConverter {
    fn start(&self, source: &Path, output: &Path) -> io::Result<Box<dyn RunningConversion>> {
        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.program);
                cmd
            }
            None => Command::new(&self.program),
        };
        cmd.arg(source)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        debug!("convert: spawning {cmd:?}");
        Ok(Box::new(cmd.spawn()?))
    }
}

#[derive(Debug, Clone)]
pub struct ConversionSettings {
    pub scratch_dir: PathBuf,
    pub min_output_bytes: u64,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl ConversionSettings {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            min_output_bytes: DEFAULT_MIN_OUTPUT_BYTES,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }
}

/// Result of [`ConversionService::ensure_viewable`].
#[derive(Debug)]
pub enum Conversion {
    /// Output is up to date.
    Ready(PathBuf),
    /// Converter started; drive with [`ConversionJob::poll`].
    Pending(ConversionJob),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Ready(PathBuf),
}

enum Phase {
    Running(Box<dyn RunningConversion>),
    Flushing { attempts: u32 },
    Done,
}

pub struct ConversionJob {
    source: PathBuf,
    output: PathBuf,
    min_output_bytes: u64,
    max_polls: u32,
    phase: Phase,
}

impl fmt::Debug for ConversionJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.phase {
            Phase::Running(_) => "running".to_string(),
            Phase::Flushing { attempts } => format!("flushing({attempts})"),
            Phase::Done => "done".to_string(),
        };
        f.debug_struct("ConversionJob")
            .field("source", &self.source)
            .field("output", &self.output)
            .field("phase", &phase)
            .finish()
    }
}

impl ConversionJob {
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Advance the job by one poll. Non-blocking.
    pub fn poll(&mut self) -> Result<JobStatus> {
        if let Phase::Running(child) = &mut self.phase {
            match child.try_finish() {
                Ok(None) => return Ok(JobStatus::Pending),
                Ok(Some(true)) => {
                    debug!("convert: {} exited cleanly, waiting for output", self.source.display());
                    self.phase = Phase::Flushing { attempts: 0 };
                }
                Ok(Some(false)) => {
                    self.phase = Phase::Done;
                    return Err(ViewerError::ConversionFailed(format!(
                        "converter failed for {}",
                        self.source.display()
                    )));
                }
                Err(e) => {
                    self.phase = Phase::Done;
                    return Err(ViewerError::ConversionFailed(format!(
                        "cannot wait for converter: {e}"
                    )));
                }
            }
        }

        match &mut self.phase {
            Phase::Flushing { attempts } => {
                let size = fs::metadata(&self.output).map(|m| m.len()).unwrap_or(0);
                if size > self.min_output_bytes {
                    info!("convert: {} ready ({size} bytes)", self.output.display());
                    self.phase = Phase::Done;
                    return Ok(JobStatus::Ready(self.output.clone()));
                }
                *attempts += 1;
                debug!(
                    "convert: output {} bytes after check {attempts}/{}",
                    size, self.max_polls
                );
                if *attempts >= self.max_polls {
                    self.phase = Phase::Done;
                    return Err(ViewerError::ConversionFailed(format!(
                        "{} never grew past {} bytes",
                        self.output.display(),
                        self.min_output_bytes
                    )));
                }
                Ok(JobStatus::Pending)
            }
            Phase::Done => Err(ViewerError::ConversionFailed("job already finished".into())),
            Phase::Running(_) => Ok(JobStatus::Pending),
        }
    }
}

pub struct ConversionService {
    backend: Box<dyn ConverterBackend>,
    settings: ConversionSettings,
}

impl ConversionService {
    pub fn new(backend: Box<dyn ConverterBackend>, settings: ConversionSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &ConversionSettings {
        &self.settings
    }

    /// `<scratch>/<stem>_converted.jpg`
    pub fn output_path(&self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".into());
        self.settings.scratch_dir.join(format!("{stem}_converted.jpg"))
    }

    pub fn ensure_viewable(&self, source: &Path) -> Result<Conversion> {
        self.ensure_viewable_to(source, &self.output_path(source))
    }

    /// Like [`ensure_viewable`](Self::ensure_viewable) with an explicit output path.
    pub fn ensure_viewable_to(&self, source: &Path, output: &Path) -> Result<Conversion> {
        if !source.exists() {
            return Err(ViewerError::NotFound(source.to_path_buf()));
        }
        if is_fresh(source, output) {
            debug!("convert: {} is up to date", output.display());
            return Ok(Conversion::Ready(output.to_path_buf()));
        }
        if let Some(dir) = output.parent() {
            fs::create_dir_all(dir)?;
        }
        info!("convert: {} -> {}", source.display(), output.display());
        let child = self.backend.start(source, output).map_err(|e| {
            ViewerError::ConversionFailed(format!("cannot start converter: {e}"))
        })?;
        Ok(Conversion::Pending(ConversionJob {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            min_output_bytes: self.settings.min_output_bytes,
            max_polls: self.settings.max_polls,
            phase: Phase::Running(child),
        }))
    }

    /// Block until `conversion` settles, sleeping between polls.
    pub fn run_to_completion(&self, conversion: Conversion) -> Result<PathBuf> {
        let mut job = match conversion {
            Conversion::Ready(path) => return Ok(path),
            Conversion::Pending(job) => job,
        };
        loop {
            match job.poll()? {
                JobStatus::Ready(path) => return Ok(path),
                JobStatus::Pending => thread::sleep(self.settings.poll_interval),
            }
        }
    }
}

/// Output exists and was modified strictly after the source.
pub fn is_fresh(source: &Path, output: &Path) -> bool {
    let mtime = |p: &Path| fs::metadata(p).and_then(|m| m.modified());
    match (mtime(source), mtime(output)) {
        (Ok(src), Ok(out)) => out > src,
        (Err(e), _) => {
            warn!("convert: cannot stat {}: {e}", source.display());
            false
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::fs::File;
    use std::rc::Rc;
    use std::time::SystemTime;

    /// Writes `bytes` into the output on start and exits with `exit_ok`
    /// after `polls_until_exit` polls.
    struct FakeConverter {
        starts: Rc<Cell<u32>>,
        bytes: usize,
        exit_ok: bool,
        polls_until_exit: u32,
    }

    struct FakeRun {
        remaining: u32,
        exit_ok: bool,
    }

    impl RunningConversion for FakeRun {
        fn try_finish(&mut self) -> io::Result<Option<bool>> {
            if self.remaining == 0 {
                return Ok(Some(self.exit_ok));
            }
            self.remaining -= 1;
            Ok(None)
        }
    }

    impl ConverterBackend for FakeConverter {
        fn start(&self, source: &Path, output: &Path) -> io::Result<Box<dyn RunningConversion>> {
            self.starts.set(self.starts.get() + 1);
            fs::write(output, vec![0u8; self.bytes])?;
            let src_mtime = fs::metadata(source)?.modified()?;
            File::options()
                .write(true)
                .open(output)?
                .set_modified(src_mtime + Duration::from_secs(10))?;
            Ok(Box::new(FakeRun {
                remaining: self.polls_until_exit,
                exit_ok: self.exit_ok,
            }))
        }
    }

    fn service(dir: &Path, bytes: usize, exit_ok: bool) -> (ConversionService, Rc<Cell<u32>>) {
        let starts = Rc::new(Cell::new(0));
        let backend = FakeConverter {
            starts: starts.clone(),
            bytes,
            exit_ok,
            polls_until_exit: 2,
        };
        let svc = ConversionService::new(Box::new(backend), ConversionSettings::new(dir));
        (svc, starts)
    }

    fn drive(job: &mut ConversionJob) -> Result<PathBuf> {
        for _ in 0..100 {
            if let JobStatus::Ready(p) = job.poll()? {
                return Ok(p);
            }
        }
        panic!("job never settled");
    }

    fn raw_source(dir: &Path) -> PathBuf {
        let src = dir.join("a.raw");
        fs::write(&src, b"raw").unwrap();
        src
    }

    #[test]
    fn output_path_uses_stem() {
        let (svc, _) = service(Path::new("/tmp"), 0, true);
        assert_eq!(
            svc.output_path(Path::new("/photos/DSC_0001.NEF")),
            PathBuf::from("/tmp/DSC_0001_converted.jpg")
        );
    }

    #[test]
    fn second_call_uses_cached_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = raw_source(dir.path());
        let (svc, starts) = service(dir.path(), 60 * 1024, true);

        let Conversion::Pending(mut job) = svc.ensure_viewable(&src).unwrap() else {
            panic!("expected a conversion");
        };
        let out = drive(&mut job).unwrap();
        assert_eq!(out, dir.path().join("a_converted.jpg"));

        for _ in 0..3 {
            match svc.ensure_viewable(&src).unwrap() {
                Conversion::Ready(p) => assert_eq!(p, out),
                Conversion::Pending(_) => panic!("should not reconvert"),
            }
        }
        assert_eq!(starts.get(), 1);
    }

    #[test]
    fn stale_output_is_reconverted() {
        let dir = tempfile::tempdir().unwrap();
        let src = raw_source(dir.path());
        let (svc, starts) = service(dir.path(), 60 * 1024, true);
        let out = svc.output_path(&src);
        fs::write(&out, vec![0u8; 60 * 1024]).unwrap();
        File::options()
            .write(true)
            .open(&out)
            .unwrap()
            .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000))
            .unwrap();

        assert!(!is_fresh(&src, &out));
        assert!(matches!(svc.ensure_viewable(&src).unwrap(), Conversion::Pending(_)));
        assert_eq!(starts.get(), 1);
    }

    #[test]
    fn nonzero_exit_fails() {
        let dir = tempfile::tempdir().unwrap();
        let src = raw_source(dir.path());
        let (svc, _) = service(dir.path(), 60 * 1024, false);
        let Conversion::Pending(mut job) = svc.ensure_viewable(&src).unwrap() else {
            panic!("expected a conversion");
        };
        assert!(matches!(drive(&mut job), Err(ViewerError::ConversionFailed(_))));
    }

    #[test]
    fn small_output_times_out_after_max_polls() {
        let dir = tempfile::tempdir().unwrap();
        let src = raw_source(dir.path());
        let (svc, _) = service(dir.path(), 1024, true);
        let Conversion::Pending(mut job) = svc.ensure_viewable(&src).unwrap() else {
            panic!("expected a conversion");
        };
        // Two polls while running, then DEFAULT_MAX_POLLS size checks.
        let mut polls = 0;
        let err = loop {
            polls += 1;
            match job.poll() {
                Ok(JobStatus::Pending) => continue,
                Ok(JobStatus::Ready(_)) => panic!("output is too small"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err, ViewerError::ConversionFailed(_)));
        assert_eq!(polls, 2 + DEFAULT_MAX_POLLS);
    }

    #[test]
    fn missing_source_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, starts) = service(dir.path(), 60 * 1024, true);
        let err = svc.ensure_viewable(&dir.path().join("nope.raw")).unwrap_err();
        assert!(matches!(err, ViewerError::NotFound(_)));
        assert_eq!(starts.get(), 0);
    }

    #[test]
    fn run_to_completion_returns_ready_immediately() {
        let (svc, _) = service(Path::new("/tmp"), 0, true);
        let p = svc
            .run_to_completion(Conversion::Ready("/tmp/x.jpg".into()))
            .unwrap();
        assert_eq!(p, PathBuf::from("/tmp/x.jpg"));
    }
}
