//! Per-window application context.
//!
//! One `App` per viewer process. It owns every piece of window state (viewport,
//! published status, the pending conversion, the launcher) and a virtual-time
//! [`Scheduler`] for all periodic work. It performs no terminal I/O: inputs
//! arrive as [`Action`]s, [`WindowMessage`]s and `tick(now)` calls, and the
//! caller carries out the returned [`Effect`]s.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{debug, info, warn};

use crate::config::Config;
use crate::convert::{
    Conversion, ConversionJob, ConversionService, ExternalConverter, JobStatus,
};
use crate::error::ViewerError;
use crate::launcher::{LaunchOutcome, SecondaryLauncher, SystemProcesses, resolve_binary};
use crate::schedule::{Scheduler, TaskId};
use crate::status::{InstanceStatus, StatusStore};
use crate::status_watch::{self, CheckOutcome, OpenRequest, StatusWatcher};
use crate::sync::{Role, SyncMessage, WindowMessage};
use crate::viewport::{DEFAULT_ZOOM_STEP, Point, ViewportController, ZoomDirection};
use crate::watch::ImageWatch;

pub const MESSAGE_DURATION: Duration = Duration::from_secs(2);

pub const WAIT_TEXT: &str = "Waiting for conversion of original…";
pub const CONVERSION_FAILED_TEXT: &str = "Conversion failed!";
pub const EXPORT_FAILED_TEXT: &str = "Could not open the export!";
pub const DETACHED_TEXT: &str = "Detached from master";
pub const ATTACHED_TEXT: &str = "Synchronized with master";

/// User input, already decoded from terminal events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Zoom key pressed. Repeats until [`Action::StopZoom`] when the terminal
    /// reports key releases.
    Zoom(ZoomDirection),
    StopZoom,
    ResetZoom,
    Fit,
    /// Scroll by whole pan steps.
    Pan { dx: f64, dy: f64 },
    OpenSecondary,
    /// Terminate every secondary, then close.
    CloseAll,
    Quit,
    ToggleDetach,
    /// Cursor position in viewport pixels; `None` when it left the image area.
    CursorMoved(Option<Point>),
    /// New viewport size in pixels.
    Resize { width: f64, height: f64 },
}

impl Action {
    /// Whether the "please wait" overlay swallows this action.
    fn blocked_while_converting(&self) -> bool {
        !matches!(
            self,
            Action::StopZoom
                | Action::Quit
                | Action::CloseAll
                | Action::CursorMoved(_)
                | Action::Resize { .. }
        )
    }
}

/// What the window must do after a call into the app.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Redraw,
    /// (Re)decode the image at this path, then call [`App::image_loaded`] or
    /// [`App::image_failed`].
    Reload(PathBuf),
    /// Hand to the relay for the counterpart window.
    Send(SyncMessage),
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    StatusPoll,
    ImagePoll,
    ConversionPoll,
    ZoomRepeat(ZoomDirection),
    HideBanner,
    HideOverlay,
}

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub zoom_step: f64,
    pub zoom_repeat: Duration,
    /// Viewport pixels per pan step.
    pub pan_step: f64,
    pub image_poll: Duration,
    pub watcher_delay: Duration,
    pub watcher_interval: Duration,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            zoom_step: DEFAULT_ZOOM_STEP,
            zoom_repeat: Duration::from_millis(120),
            pan_step: 40.0,
            image_poll: Duration::from_secs(1),
            watcher_delay: status_watch::DEFAULT_STARTUP_DELAY,
            watcher_interval: status_watch::DEFAULT_POLL_INTERVAL,
        }
    }
}

impl AppSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            zoom_step: config.viewer.zoom_step,
            zoom_repeat: config.viewer.zoom_repeat,
            pan_step: config.viewer.pan_step as f64,
            image_poll: config.viewer.image_poll,
            watcher_delay: config.watcher.startup_delay,
            watcher_interval: config.watcher.interval,
        }
    }
}

/// Launcher over the real process table.
pub fn system_launcher(config: &Config) -> SecondaryLauncher {
    let binary = resolve_binary(
        std::env::current_exe().ok().as_deref(),
        &config.launcher.binary,
    );
    SecondaryLauncher::new(
        Box::new(SystemProcesses),
        binary,
        config.launcher.wrapper.clone(),
    )
}

/// Conversion through the configured external script.
pub fn external_conversion(config: &Config) -> ConversionService {
    ConversionService::new(
        Box::new(ExternalConverter {
            interpreter: config.converter.interpreter.clone(),
            program: config.converter.script.clone(),
        }),
        config.conversion_settings(),
    )
}

pub struct App {
    role: Role,
    settings: AppSettings,
    viewport: ViewportController,
    status: InstanceStatus,
    source: StatusStore,
    watcher: Option<StatusWatcher>,
    launcher: SecondaryLauncher,
    conversion: ConversionService,
    pending: Option<ConversionJob>,
    image: Option<PathBuf>,
    image_watch: Option<ImageWatch>,
    overlay: Option<String>,
    banner: Option<String>,
    scheduler: Scheduler<Task>,
    zoom_repeat: Option<(ZoomDirection, TaskId)>,
    banner_task: Option<TaskId>,
    overlay_task: Option<TaskId>,
    repeat_on_hold: bool,
}

impl App {
    /// Only a master watches the source status record.
    pub fn new(
        role: Role,
        settings: AppSettings,
        status: InstanceStatus,
        source: StatusStore,
        launcher: SecondaryLauncher,
        conversion: ConversionService,
        image: Option<PathBuf>,
    ) -> Self {
        let watcher = match role {
            Role::Master => Some(StatusWatcher::new(source.clone(), SystemTime::now())),
            Role::Secondary => None,
        };
        Self {
            role,
            viewport: ViewportController::new(role, settings.zoom_step),
            settings,
            status,
            source,
            watcher,
            launcher,
            conversion,
            pending: None,
            image,
            image_watch: None,
            overlay: None,
            banner: None,
            scheduler: Scheduler::new(),
            zoom_repeat: None,
            banner_task: None,
            overlay_task: None,
            repeat_on_hold: false,
        }
    }

    /// Wire up the real converter, process table and status files.
    pub fn from_config(role: Role, config: &Config, image: Option<PathBuf>) -> Self {
        Self::new(
            role,
            AppSettings::from_config(config),
            InstanceStatus::new(StatusStore::new(config.status_path(role))),
            StatusStore::new(config.source_status_path()),
            system_launcher(config),
            external_conversion(config),
            image,
        )
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    pub fn image(&self) -> Option<&Path> {
        self.image.as_deref()
    }

    pub fn overlay(&self) -> Option<&str> {
        self.overlay.as_deref()
    }

    pub fn banner(&self) -> Option<&str> {
        self.banner.as_deref()
    }

    pub fn is_converting(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_detached(&self) -> bool {
        self.viewport.gate().is_detached()
    }

    pub fn title(&self) -> &'static str {
        match self.role {
            Role::Master => "pairview",
            Role::Secondary => "pairview (original)",
        }
    }

    /// Set when the terminal reports key releases, so a held zoom key can
    /// repeat on a timer and stop on release.
    pub fn set_repeat_on_hold(&mut self, enabled: bool) {
        self.repeat_on_hold = enabled;
    }

    /// Virtual time at which [`tick`](Self::tick) next has work.
    pub fn next_due(&self) -> Option<Duration> {
        self.scheduler.next_due()
    }

    pub fn start(&mut self, now: Duration) -> Vec<Effect> {
        info!("app: starting as {}", self.role);
        if let Err(e) = self.status.announce() {
            warn!("app: cannot write status: {e}");
        }
        if self.watcher.is_some() {
            self.scheduler
                .schedule(now, self.settings.watcher_delay, Task::StatusPoll);
        }
        let Some(path) = self.image.clone() else {
            return vec![Effect::Redraw];
        };
        if let Err(e) = self.status.file_opened(&path) {
            warn!("app: cannot write status: {e}");
        }
        self.image_watch = Some(ImageWatch::new(&path));
        self.scheduler
            .schedule(now, self.settings.image_poll, Task::ImagePoll);
        vec![Effect::Reload(path)]
    }

    /// The image decoded; reset the view to it.
    pub fn image_loaded(&mut self, width: u32, height: u32, now: Duration) -> Vec<Effect> {
        self.viewport.load_image(width, height);
        let mut effects = self.handle_message(WindowMessage::ViewChanged, now);
        effects.extend(self.changed());
        effects
    }

    pub fn image_failed(&mut self) -> Vec<Effect> {
        self.viewport.unload();
        vec![Effect::Redraw]
    }

    pub fn handle_action(&mut self, action: Action, now: Duration) -> Vec<Effect> {
        if self.pending.is_some() && action.blocked_while_converting() {
            debug!("app: {action:?} ignored while converting");
            return Vec::new();
        }
        match action {
            Action::Zoom(direction) => self.start_zoom(direction, now),
            Action::StopZoom => {
                self.stop_zoom();
                return Vec::new();
            }
            Action::ResetZoom => self.viewport.reset_zoom(),
            Action::Fit => self.viewport.fit(),
            Action::Pan { dx, dy } => {
                let step = self.settings.pan_step;
                self.viewport.pan(dx * step, dy * step);
            }
            Action::OpenSecondary => self.open_secondary(now),
            Action::CloseAll => {
                self.launcher.terminate_all();
                return vec![Effect::Exit];
            }
            Action::Quit => return vec![Effect::Exit],
            Action::ToggleDetach => self.toggle_detach(now),
            Action::CursorMoved(position) => {
                self.viewport.cursor_moved(position);
                return Vec::new();
            }
            Action::Resize { width, height } => self.viewport.resize(width, height),
        }
        self.changed()
    }

    pub fn handle_message(&mut self, msg: WindowMessage, now: Duration) -> Vec<Effect> {
        match msg {
            WindowMessage::ViewChanged => {
                if let Err(e) = self.status.file_viewed() {
                    warn!("app: cannot write status: {e}");
                }
                Vec::new()
            }
            WindowMessage::ApplyView(sync) => {
                if self.viewport.apply_sync(&sync) {
                    self.changed()
                } else {
                    Vec::new()
                }
            }
            WindowMessage::ShowWaitOverlay(text) => {
                self.show_overlay(text.unwrap_or_else(|| WAIT_TEXT.to_string()), None, now);
                vec![Effect::Redraw]
            }
            WindowMessage::HideWaitOverlay => {
                self.hide_overlay();
                vec![Effect::Redraw]
            }
        }
    }

    /// Run every task due at `now`.
    pub fn tick(&mut self, now: Duration) -> Vec<Effect> {
        let mut effects = Vec::new();
        let mut redraw = false;
        for task in self.scheduler.take_due(now) {
            match task {
                Task::StatusPoll => {
                    redraw |= self.poll_status(now);
                    self.scheduler
                        .schedule(now, self.settings.watcher_interval, Task::StatusPoll);
                }
                Task::ImagePoll => {
                    if let (Some(watch), Some(path)) = (self.image_watch.as_mut(), &self.image) {
                        if watch.has_changed() {
                            info!("app: {} changed, reloading", path.display());
                            effects.push(Effect::Reload(path.clone()));
                        }
                    }
                    self.scheduler
                        .schedule(now, self.settings.image_poll, Task::ImagePoll);
                }
                Task::ConversionPoll => redraw |= self.poll_conversion(now),
                Task::ZoomRepeat(direction) => {
                    if self.zoom_repeat.is_some_and(|(held, _)| held == direction) {
                        self.viewport.step_zoom(direction);
                        let id = self.scheduler.schedule(
                            now,
                            self.settings.zoom_repeat,
                            Task::ZoomRepeat(direction),
                        );
                        self.zoom_repeat = Some((direction, id));
                        redraw = true;
                    }
                }
                Task::HideBanner => {
                    self.banner = None;
                    self.banner_task = None;
                    redraw = true;
                }
                Task::HideOverlay => {
                    self.overlay_task = None;
                    if self.pending.is_none() {
                        self.overlay = None;
                    }
                    redraw = true;
                }
            }
        }
        if redraw {
            effects.extend(self.changed());
        }
        effects
    }

    /// Cancel all timers and publish the exited status.
    pub fn shutdown(&mut self) {
        self.scheduler.clear();
        self.zoom_repeat = None;
        if let Err(e) = self.status.exited() {
            warn!("app: cannot write status: {e}");
        }
        info!("app: {} shut down", self.role);
    }

    /// Redraw plus whatever the viewport queued for the counterpart.
    fn changed(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::Redraw];
        effects.extend(self.viewport.take_outbound().into_iter().map(Effect::Send));
        effects
    }

    fn start_zoom(&mut self, direction: ZoomDirection, now: Duration) {
        if self.zoom_repeat.is_some_and(|(held, _)| held == direction) {
            return;
        }
        self.stop_zoom();
        self.viewport.step_zoom(direction);
        if self.repeat_on_hold {
            let id = self
                .scheduler
                .schedule(now, self.settings.zoom_repeat, Task::ZoomRepeat(direction));
            self.zoom_repeat = Some((direction, id));
        }
    }

    fn stop_zoom(&mut self) {
        if let Some((_, id)) = self.zoom_repeat.take() {
            self.scheduler.cancel(id);
        }
    }

    fn toggle_detach(&mut self, now: Duration) {
        let Some(detached) = self.viewport.toggle_detach() else {
            return;
        };
        info!("app: detached={detached}");
        self.banner = Some(if detached { DETACHED_TEXT } else { ATTACHED_TEXT }.to_string());
        if let Some(id) = self.banner_task.take() {
            self.scheduler.cancel(id);
        }
        self.banner_task = Some(
            self.scheduler
                .schedule(now, MESSAGE_DURATION, Task::HideBanner),
        );
    }

    fn open_secondary(&mut self, now: Duration) {
        match status_watch::open_request(&self.source, &self.conversion) {
            OpenRequest::Convert { source, output } => {
                match self.conversion.ensure_viewable_to(&source, &output) {
                    Ok(Conversion::Ready(path)) => {
                        self.launch(&path, now);
                    }
                    Ok(Conversion::Pending(job)) => {
                        self.stop_zoom();
                        self.pending = Some(job);
                        self.handle_message(WindowMessage::ShowWaitOverlay(None), now);
                        self.scheduler.schedule(
                            now,
                            self.conversion.settings().poll_interval,
                            Task::ConversionPoll,
                        );
                    }
                    Err(ViewerError::NotFound(path)) => {
                        debug!("app: source {} is gone, nothing to open", path.display());
                    }
                    Err(e) => {
                        warn!("app: {e}");
                        self.show_overlay(CONVERSION_FAILED_TEXT.into(), Some(MESSAGE_DURATION), now);
                    }
                }
            }
            OpenRequest::Launch(path) => {
                self.launch(&path, now);
            }
            OpenRequest::Nothing => debug!("app: no secondary requested"),
        }
    }

    fn poll_conversion(&mut self, now: Duration) -> bool {
        let Some(job) = self.pending.as_mut() else {
            return false;
        };
        match job.poll() {
            Ok(JobStatus::Pending) => {
                self.scheduler.schedule(
                    now,
                    self.conversion.settings().poll_interval,
                    Task::ConversionPoll,
                );
                false
            }
            Ok(JobStatus::Ready(path)) => {
                self.pending = None;
                self.hide_overlay();
                self.launch(&path, now);
                true
            }
            Err(e) => {
                self.pending = None;
                warn!("app: {e}");
                self.show_overlay(CONVERSION_FAILED_TEXT.into(), Some(MESSAGE_DURATION), now);
                true
            }
        }
    }

    fn poll_status(&mut self, now: Duration) -> bool {
        let Some(watcher) = self.watcher.as_mut() else {
            return false;
        };
        match watcher.check() {
            CheckOutcome::Triggered { launch: Some(path) } => self.launch(&path, now),
            CheckOutcome::Triggered { launch: None } | CheckOutcome::Unchanged => false,
        }
    }

    /// Returns true if an error message was put on screen.
    fn launch(&mut self, asset: &Path, now: Duration) -> bool {
        match self.launcher.launch(asset) {
            Ok(LaunchOutcome::Launched(pid)) => {
                info!("app: secondary {pid} shows {}", asset.display());
                false
            }
            Ok(LaunchOutcome::AlreadyRunning) => false,
            Ok(LaunchOutcome::MissingAsset) => {
                self.show_overlay(EXPORT_FAILED_TEXT.into(), Some(MESSAGE_DURATION), now);
                true
            }
            Err(e) => {
                warn!("app: cannot launch secondary: {e}");
                self.show_overlay(EXPORT_FAILED_TEXT.into(), Some(MESSAGE_DURATION), now);
                true
            }
        }
    }

    /// Put `text` in the overlay, hiding it after `lifetime` if given.
    fn show_overlay(&mut self, text: String, lifetime: Option<Duration>, now: Duration) {
        if let Some(id) = self.overlay_task.take() {
            self.scheduler.cancel(id);
        }
        self.overlay = Some(text);
        if let Some(lifetime) = lifetime {
            self.overlay_task = Some(self.scheduler.schedule(now, lifetime, Task::HideOverlay));
        }
    }

    fn hide_overlay(&mut self) {
        if let Some(id) = self.overlay_task.take() {
            self.scheduler.cancel(id);
        }
        self.overlay = None;
    }
}
