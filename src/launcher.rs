//! Secondary viewer processes: launch, deduplicate, terminate.
//!
//! There is no registry of running secondaries. Whether one is alive is
//! answered by matching process command lines, so the check races with
//! processes that are just starting or exiting; a rare duplicate window is
//! accepted over refusing to show the image.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info, warn};
use regex::Regex;

use crate::error::{Result, ViewerError};

pub const APP_NAME: &str = "pairview";
pub const SECONDARY_FLAG: &str = "--secondary";
pub const SECONDARY_ENV: &str = "PAIRVIEW_SECONDARY";

/// A running process as seen by process inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub command_line: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
}

/// OS process capabilities used by the launcher.
pub trait ProcessHost {
    fn list(&self) -> io::Result<Vec<ProcessInfo>>;
    /// Start `cmd` so that it outlives the caller. Returns its pid.
    fn spawn_detached(&self, cmd: &LaunchCommand) -> io::Result<u32>;
    fn terminate(&self, pid: u32) -> io::Result<()>;
}

/// The real process table.
pub struct SystemProcesses;

impl ProcessHost for SystemProcesses {
    #[cfg(target_os = "linux")]
    fn list(&self) -> io::Result<Vec<ProcessInfo>> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir("/proc")? {
            let entry = entry?;
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            // Processes exit while we iterate; skip what we can't read.
            let Ok(raw) = std::fs::read(entry.path().join("cmdline")) else {
                continue;
            };
            let command_line = raw
                .split(|&b| b == 0)
                .filter(|part| !part.is_empty())
                .map(String::from_utf8_lossy)
                .collect::<Vec<_>>()
                .join(" ");
            if !command_line.is_empty() {
                out.push(ProcessInfo { pid, command_line });
            }
        }
        Ok(out)
    }

    #[cfg(not(target_os = "linux"))]
    fn list(&self) -> io::Result<Vec<ProcessInfo>> {
        let output = Command::new("ps").args(["-axo", "pid=,command="]).output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!("ps exited with {}", output.status)));
        }
        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
    }

    fn spawn_detached(&self, cmd: &LaunchCommand) -> io::Result<u32> {
        use std::os::unix::process::CommandExt;

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Own process group: no SIGINT/SIGHUP from our terminal.
            .process_group(0)
            .spawn()?;
        let pid = child.id();
        // Reap it if it exits before we do; dropping the thread handle
        // leaves the child running when we exit first.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let pid = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
    }
}

/// Parse `ps -o pid=,command=` output.
pub fn parse_ps_output(text: &str) -> Vec<ProcessInfo> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (pid, rest) = line.split_once(char::is_whitespace)?;
            Some(ProcessInfo {
                pid: pid.parse().ok()?,
                command_line: rest.trim().to_string(),
            })
        })
        .collect()
}

/// Reuse the running executable when it is the viewer itself, otherwise use
/// the installed copy.
pub fn resolve_binary(current_exe: Option<&Path>, installed: &Path) -> PathBuf {
    match current_exe {
        Some(exe) if exe.file_stem().is_some_and(|s| s == APP_NAME) => exe.to_path_buf(),
        _ => installed.to_path_buf(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Launched(u32),
    AlreadyRunning,
    /// The asset does not exist; nothing to show.
    MissingAsset,
}

pub struct SecondaryLauncher {
    host: Box<dyn ProcessHost>,
    binary: PathBuf,
    wrapper: Vec<String>,
    last_launched: Option<PathBuf>,
    own_pid: u32,
}

impl SecondaryLauncher {
    /// `wrapper` is prepended to the command line (e.g. a terminal emulator
    /// that gives the secondary its own window).
    pub fn new(host: Box<dyn ProcessHost>, binary: PathBuf, wrapper: Vec<String>) -> Self {
        Self {
            host,
            binary,
            wrapper,
            last_launched: None,
            own_pid: std::process::id(),
        }
    }

    pub fn last_launched(&self) -> Option<&Path> {
        self.last_launched.as_deref()
    }

    fn binary_name(&self) -> String {
        self.binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| APP_NAME.into())
    }

    fn secondary_pattern(&self, asset: Option<&Path>) -> Result<Regex> {
        let mut pattern = format!(
            "{}.*{}",
            regex::escape(&self.binary_name()),
            regex::escape(SECONDARY_FLAG)
        );
        if let Some(asset) = asset {
            pattern.push_str(".*");
            pattern.push_str(&regex::escape(&asset.to_string_lossy()));
        }
        Regex::new(&pattern).map_err(|e| ViewerError::ProcessLaunchRace(e.to_string()))
    }

    /// Secondaries (other than this process) whose command line mentions
    /// `asset`, or all secondaries when `asset` is `None`.
    pub fn find_secondaries(&self, asset: Option<&Path>) -> Result<Vec<ProcessInfo>> {
        let re = self.secondary_pattern(asset)?;
        let needle = asset.map(|a| a.to_string_lossy().into_owned());
        let processes = self
            .host
            .list()
            .map_err(|e| ViewerError::ProcessLaunchRace(e.to_string()))?;
        Ok(processes
            .into_iter()
            .filter(|p| p.pid != self.own_pid)
            .filter(|p| re.is_match(&p.command_line))
            .filter(|p| needle.as_ref().is_none_or(|n| p.command_line.contains(n.as_str())))
            .collect())
    }

    pub fn command_for(&self, asset: &Path) -> LaunchCommand {
        let mut parts: Vec<OsString> = self.wrapper.iter().map(OsString::from).collect();
        parts.push(self.binary.clone().into_os_string());
        parts.push(SECONDARY_FLAG.into());
        parts.push(asset.as_os_str().to_owned());
        let program = parts.remove(0);
        LaunchCommand {
            program,
            args: parts,
            env: vec![(SECONDARY_ENV.to_string(), "1".to_string())],
        }
    }

    /// Show `asset` in a secondary viewer unless one is already showing it.
    pub fn launch(&mut self, asset: &Path) -> Result<LaunchOutcome> {
        if !asset.exists() {
            debug!("launcher: {} does not exist, not launching", asset.display());
            return Ok(LaunchOutcome::MissingAsset);
        }
        if self.last_launched.as_deref() == Some(asset) {
            match self.find_secondaries(Some(asset)) {
                Ok(found) if !found.is_empty() => {
                    debug!(
                        "launcher: {} already shown by pid {}",
                        asset.display(),
                        found[0].pid
                    );
                    return Ok(LaunchOutcome::AlreadyRunning);
                }
                Ok(_) => {}
                Err(e) => warn!("launcher: {e}; launching anyway"),
            }
        }
        let cmd = self.command_for(asset);
        info!("launcher: starting {:?} {:?}", cmd.program, cmd.args);
        let pid = self.host.spawn_detached(&cmd)?;
        self.last_launched = Some(asset.to_path_buf());
        Ok(LaunchOutcome::Launched(pid))
    }

    /// Signal every secondary viewer to exit. Best-effort; returns how many
    /// were signalled.
    pub fn terminate_all(&self) -> usize {
        let found = match self.find_secondaries(None) {
            Ok(found) => found,
            Err(e) => {
                warn!("launcher: {e}");
                return 0;
            }
        };
        let mut signalled = 0;
        for p in found {
            match self.host.terminate(p.pid) {
                Ok(()) => {
                    debug!("launcher: sent SIGTERM to {} ({})", p.pid, p.command_line);
                    signalled += 1;
                }
                Err(e) => debug!("launcher: cannot signal {}: {e}", p.pid),
            }
        }
        info!("launcher: terminated {signalled} secondary viewer(s)");
        signalled
    }
}
