//! Terminal image viewer with Kitty Graphics Protocol
//!
//! Layout:
//!   row 0..term_rows-1 : image area (one Kitty image, placed by cell)
//!   row term_rows-1    : status bar
//!
//! The decoded image is uploaded once per (re)load under a fixed ID; zoom and
//! scroll only change the placement's source rectangle and cell extent.
//!
//! Event loop: a single thread sleeps in `event::poll` until the app's next
//! scheduled task, the next sync-socket drain, or input. Inbound sync messages
//! from the counterpart window are drained every `SYNC_POLL` and applied in
//! receipt order.
//!
//! Kitty response suppression:
//!   All Kitty Graphics Protocol commands use `q=2` (suppress all responses).
//!   Without this, error responses are delivered as APC sequences that
//!   crossterm misparses as key events.

mod input;
mod state;
mod terminal;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossterm::{
    event::{self, Event},
    terminal as crossterm_terminal,
};
use log::{debug, info, warn};

use crate::app::{Action, App, Effect};
use crate::config::Config;
use crate::picture::{self, DisplayImage};
use crate::sync::{PairRelay, PeerSocket, Role, SyncSocket, WindowMessage};

use input::{map_key_event, map_mouse_event};
use state::{Layout, compute_layout, kitty_placement, status_line};

const IMAGE_ID: u32 = 1;
const SYNC_POLL: Duration = Duration::from_millis(30);
const NO_IMAGE_TEXT: &str = "No image";

static TERMINATED: AtomicBool = AtomicBool::new(false);

/// SIGTERM (sent by the master's "close all") ends the loop normally, so the
/// terminal is restored and the exited status is written.
fn install_terminate_handler() -> anyhow::Result<()> {
    ctrlc::set_handler(|| TERMINATED.store(true, Ordering::Relaxed))?;
    Ok(())
}

/// Run the terminal viewer.
///
/// `image` is the file to display; without one the window shows "No image"
/// and can still open secondaries.
pub fn run(config: Config, role: Role, image: Option<PathBuf>) -> anyhow::Result<()> {
    terminal::check_tty()?;
    install_terminate_handler()?;

    let winsize = crossterm_terminal::window_size()
        .map_err(|e| anyhow::anyhow!("failed to get terminal size: {e}"))?;
    if winsize.width == 0 || winsize.height == 0 {
        anyhow::bail!(
            "terminal pixel size {}x{} is zero; Kitty graphics requires non-zero pixel dimensions",
            winsize.width,
            winsize.height
        );
    }
    let layout = compute_layout(winsize.columns, winsize.rows, winsize.width, winsize.height);

    // Either socket may be missing (read-only state dir); the window still works alone.
    let socket = match SyncSocket::bind(&config.state_dir, role) {
        Ok(socket) => Some(socket),
        Err(e) => {
            warn!("viewer: sync socket unavailable: {e}");
            None
        }
    };
    let mut relay = PairRelay::new();
    let peer = role.counterpart();
    match PeerSocket::new(&config.state_dir, peer) {
        Ok(sink) => relay.attach(peer, Box::new(sink)),
        Err(e) => warn!("viewer: cannot reach {peer}: {e}"),
    }

    let mut app = App::from_config(role, &config, image);

    let mut guard = terminal::RawGuard::enter()?;
    app.set_repeat_on_hold(guard.reports_releases());
    terminal::set_title(app.title())?;

    let mut window = Window {
        layout,
        shown: None,
        max_upload_px: config.viewer.max_upload_px,
        clock: Instant::now(),
    };
    let result = window.event_loop(&mut app, socket.as_ref(), &relay);

    app.shutdown();
    guard.cleanup();
    result
}

struct Window {
    layout: Layout,
    shown: Option<DisplayImage>,
    max_upload_px: u32,
    clock: Instant,
}

impl Window {
    fn event_loop(
        &mut self,
        app: &mut App,
        socket: Option<&SyncSocket>,
        relay: &PairRelay,
    ) -> anyhow::Result<()> {
        let (width, height) = self.layout.viewport_px();
        let mut queue: VecDeque<Effect> = VecDeque::new();
        queue.extend(app.handle_action(Action::Resize { width, height }, Duration::ZERO));
        queue.extend(app.start(Duration::ZERO));

        loop {
            if TERMINATED.load(Ordering::Relaxed) {
                info!("viewer: terminated by signal");
                return Ok(());
            }

            let now = self.clock.elapsed();
            queue.extend(app.tick(now));
            if let Some(socket) = socket {
                for msg in socket.drain() {
                    debug!("viewer: inbound {msg:?}");
                    queue.extend(app.handle_message(WindowMessage::ApplyView(msg), now));
                }
            }

            let mut dirty = false;
            while let Some(effect) = queue.pop_front() {
                match effect {
                    Effect::Redraw => dirty = true,
                    Effect::Send(msg) => {
                        relay.relay(app.role(), &msg);
                    }
                    Effect::Reload(path) => queue.extend(self.reload(app, &path, now)?),
                    Effect::Exit => return Ok(()),
                }
            }
            if dirty {
                self.redraw(app)?;
            }

            // Capped so the sync socket is drained and SIGTERM noticed promptly.
            let now = self.clock.elapsed();
            let timeout = app
                .next_due()
                .map_or(SYNC_POLL, |due| due.saturating_sub(now))
                .min(SYNC_POLL);

            if event::poll(timeout)? {
                let ev = event::read()?;
                debug!("event: {:?}", ev);
                let now = self.clock.elapsed();
                match ev {
                    Event::Key(key_event) => {
                        if let Some(action) = map_key_event(key_event) {
                            queue.extend(app.handle_action(action, now));
                        }
                    }
                    Event::Mouse(mouse_event) => {
                        if let Some(action) = map_mouse_event(mouse_event, &self.layout) {
                            queue.extend(app.handle_action(action, now));
                        }
                    }
                    Event::Resize(new_cols, new_rows) => {
                        let winsize = crossterm_terminal::window_size()?;
                        self.layout =
                            compute_layout(new_cols, new_rows, winsize.width, winsize.height);
                        debug!("resize: {:?}", self.layout);
                        let (width, height) = self.layout.viewport_px();
                        queue.extend(app.handle_action(Action::Resize { width, height }, now));
                    }
                    _ => {}
                }
            }
        }
    }

    /// Decode and upload `path`, replacing the current image.
    fn reload(&mut self, app: &mut App, path: &Path, now: Duration) -> anyhow::Result<Vec<Effect>> {
        let _ = terminal::delete_image(IMAGE_ID);
        match picture::load(path, self.max_upload_px) {
            Ok(img) => {
                terminal::send_image(&img.png, IMAGE_ID)?;
                let effects = app.image_loaded(img.natural_width, img.natural_height, now);
                self.shown = Some(img);
                Ok(effects)
            }
            Err(e) => {
                warn!("viewer: {e:#}");
                self.shown = None;
                Ok(app.image_failed())
            }
        }
    }

    /// Full redraw: placement + overlay + status bar.
    ///
    /// Ordering: delete placement → clear text → place new.
    fn redraw(&self, app: &App) -> anyhow::Result<()> {
        terminal::delete_placements(IMAGE_ID)?;
        terminal::clear_screen()?;

        let placement = self.shown.as_ref().and_then(|img| {
            let p = app.viewport().placement()?;
            kitty_placement(&p, img.upload_scale(), &self.layout)
        });
        match placement {
            Some(k) => terminal::place_image(IMAGE_ID, &k)?,
            None if self.shown.is_none() => terminal::draw_centered(&self.layout, NO_IMAGE_TEXT)?,
            None => {}
        }
        if let Some(text) = app.overlay() {
            terminal::draw_centered(&self.layout, text)?;
        }
        terminal::draw_status_bar(&self.layout, &status_line(app))?;
        Ok(())
    }
}
