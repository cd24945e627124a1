use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;

use crate::convert::{ConversionSettings, DEFAULT_MAX_POLLS, DEFAULT_MIN_OUTPUT_BYTES};
use crate::launcher::APP_NAME;
use crate::sync::Role;

// ---------------------------------------------------------------------------
// ConfigFile: deserialized from TOML (all fields optional)
// ---------------------------------------------------------------------------

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub scratch_dir: Option<PathBuf>,
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub converter: ConverterConfigFile,
    #[serde(default)]
    pub launcher: LauncherConfigFile,
    #[serde(default)]
    pub watcher: WatcherConfigFile,
    #[serde(default)]
    pub viewer: ViewerConfigFile,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ConverterConfigFile {
    pub interpreter: Option<PathBuf>,
    pub script: Option<PathBuf>,
    pub min_output_bytes: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub max_polls: Option<u32>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct LauncherConfigFile {
    pub binary: Option<PathBuf>,
    pub wrapper: Option<Vec<String>>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct WatcherConfigFile {
    pub startup_delay_ms: Option<u64>,
    pub interval_ms: Option<u64>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ViewerConfigFile {
    pub zoom_step: Option<f64>,
    pub zoom_repeat_ms: Option<u64>,
    pub pan_step: Option<u32>,
    pub image_poll_ms: Option<u64>,
    pub max_upload_px: Option<u32>,
}

// ---------------------------------------------------------------------------
// Config: resolved (all fields concrete)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub scratch_dir: PathBuf,
    pub state_dir: PathBuf,
    pub converter: ConverterConfig,
    pub launcher: LauncherConfig,
    pub watcher: WatcherConfig,
    pub viewer: ViewerConfig,
}

#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub interpreter: Option<PathBuf>,
    pub script: PathBuf,
    pub min_output_bytes: u64,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Installed viewer, used when the running executable isn't the viewer.
    pub binary: PathBuf,
    pub wrapper: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub startup_delay: Duration,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub zoom_step: f64,
    pub zoom_repeat: Duration,
    pub pan_step: u32,
    pub image_poll: Duration,
    pub max_upload_px: u32,
}

impl ConfigFile {
    /// Merge CLI values (overwrites non-None fields).
    pub fn merge_cli(&mut self, state_dir: Option<PathBuf>, scratch_dir: Option<PathBuf>) {
        if let Some(ref v) = state_dir {
            debug!("config: CLI override state_dir={}", v.display());
            self.state_dir = state_dir;
        }
        if let Some(ref v) = scratch_dir {
            debug!("config: CLI override scratch_dir={}", v.display());
            self.scratch_dir = scratch_dir;
        }
    }

    /// Resolve to a Config by applying defaults to missing fields.
    pub fn resolve(self) -> Config {
        let state_dir = self.state_dir.unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_NAME)
        });
        let config = Config {
            scratch_dir: self.scratch_dir.unwrap_or_else(std::env::temp_dir),
            state_dir,
            converter: ConverterConfig {
                interpreter: self.converter.interpreter,
                script: self
                    .converter
                    .script
                    .unwrap_or_else(|| PathBuf::from("/usr/local/bin/nef2jpg")),
                min_output_bytes: self
                    .converter
                    .min_output_bytes
                    .unwrap_or(DEFAULT_MIN_OUTPUT_BYTES),
                poll_interval: Duration::from_millis(
                    self.converter.poll_interval_ms.unwrap_or(100),
                ),
                max_polls: self.converter.max_polls.unwrap_or(DEFAULT_MAX_POLLS),
            },
            launcher: LauncherConfig {
                binary: self
                    .launcher
                    .binary
                    .unwrap_or_else(|| PathBuf::from("/usr/local/bin").join(APP_NAME)),
                wrapper: self.launcher.wrapper.unwrap_or_else(|| vec!["kitty".into()]),
            },
            watcher: WatcherConfig {
                startup_delay: Duration::from_millis(
                    self.watcher.startup_delay_ms.unwrap_or(2000),
                ),
                interval: Duration::from_millis(self.watcher.interval_ms.unwrap_or(1500)),
            },
            viewer: ViewerConfig {
                zoom_step: self.viewer.zoom_step.unwrap_or(1.07),
                zoom_repeat: Duration::from_millis(self.viewer.zoom_repeat_ms.unwrap_or(120)),
                pan_step: self.viewer.pan_step.unwrap_or(40),
                image_poll: Duration::from_millis(self.viewer.image_poll_ms.unwrap_or(1000)),
                max_upload_px: self.viewer.max_upload_px.unwrap_or(4096),
            },
        };
        info!(
            "config: resolved state_dir={}, scratch_dir={}, converter={}, \
             launcher={}, wrapper={:?}, zoom_step={}, zoom_repeat={}ms, \
             watcher={}ms/{}ms",
            config.state_dir.display(),
            config.scratch_dir.display(),
            config.converter.script.display(),
            config.launcher.binary.display(),
            config.launcher.wrapper,
            config.viewer.zoom_step,
            config.viewer.zoom_repeat.as_millis(),
            config.watcher.startup_delay.as_millis(),
            config.watcher.interval.as_millis(),
        );
        config
    }
}

impl Config {
    /// Status file owned by an instance of `role`.
    pub fn status_path(&self, role: Role) -> PathBuf {
        match role {
            Role::Master => self.state_dir.join("status.json"),
            Role::Secondary => self.state_dir.join("secondary_status.json"),
        }
    }

    /// Status file through which producers request a secondary display.
    pub fn source_status_path(&self) -> PathBuf {
        self.state_dir.join("original_status.json")
    }

    pub fn conversion_settings(&self) -> ConversionSettings {
        ConversionSettings {
            scratch_dir: self.scratch_dir.clone(),
            min_output_bytes: self.converter.min_output_bytes,
            poll_interval: self.converter.poll_interval,
            max_polls: self.converter.max_polls,
        }
    }
}

/// Resolve the config path for pairview.
fn config_path() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join(APP_NAME).join("config.toml"))
}

/// Load config file. Returns `ConfigFile::default()` if no file exists.
/// Returns an error if the file exists but cannot be parsed.
pub fn load_config() -> anyhow::Result<ConfigFile> {
    let path = match config_path() {
        Some(p) => p,
        None => {
            info!("config: no config directory, using defaults");
            return Ok(ConfigFile::default());
        }
    };
    debug!("config: looking for {}", path.display());
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            info!("config: loaded from {}", path.display());
            let cfg: ConfigFile = toml::from_str(&text)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("config: {} not found, using defaults", path.display());
            Ok(ConfigFile::default())
        }
        Err(e) => Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
    }
}
