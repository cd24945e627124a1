//! Per-window zoom/scroll state machine.
//!
//! Pure logic, no I/O. Every local change queues an outbound [`SyncMessage`]
//! (subject to the window's [`SyncGate`]); the caller drains them with
//! [`ViewportController::take_outbound`] and hands them to the relay.
//!
//! Coordinates: image space is natural pixels, screen space is viewport pixels
//! relative to the viewport's top-left corner. In manual mode
//! `screen = image * zoom - scroll` along each axis.

use log::debug;

use crate::sync::{Role, SyncGate, SyncMessage};

pub const MIN_ZOOM: f64 = 0.1;
pub const MAX_ZOOM: f64 = 10.0;
pub const DEFAULT_ZOOM_STEP: f64 = 1.07;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomMode {
    /// Fit to window, recomputed whenever the window or image changes.
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub zoom_mode: ZoomMode,
    pub zoom_factor: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub natural_width: u32,
    pub natural_height: u32,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            zoom_mode: ZoomMode::Auto,
            zoom_factor: 1.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
            natural_width: 0,
            natural_height: 0,
        }
    }
}

/// What part of the image lands where on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Source rectangle in natural image pixels.
    pub src_x: f64,
    pub src_y: f64,
    pub src_w: f64,
    pub src_h: f64,
    /// Destination rectangle in viewport pixels.
    pub dst_x: f64,
    pub dst_y: f64,
    pub dst_w: f64,
    pub dst_h: f64,
}

pub fn clamp_zoom(zoom: f64) -> f64 {
    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
}

pub struct ViewportController {
    state: ViewState,
    viewport_w: f64,
    viewport_h: f64,
    cursor: Option<Point>,
    zoom_step: f64,
    gate: SyncGate,
    outbox: Vec<SyncMessage>,
}

impl ViewportController {
    pub fn new(role: Role, zoom_step: f64) -> Self {
        Self {
            state: ViewState::default(),
            viewport_w: 0.0,
            viewport_h: 0.0,
            cursor: None,
            zoom_step,
            gate: SyncGate::new(role),
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn gate(&self) -> &SyncGate {
        &self.gate
    }

    pub fn viewport(&self) -> (f64, f64) {
        (self.viewport_w, self.viewport_h)
    }

    pub fn has_image(&self) -> bool {
        self.state.natural_width > 0 && self.state.natural_height > 0
    }

    /// Toggle detach (secondary only). Returns the new state.
    pub fn toggle_detach(&mut self) -> Option<bool> {
        self.gate.toggle_detach()
    }

    /// Messages produced since the last call, oldest first.
    pub fn take_outbound(&mut self) -> Vec<SyncMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// Ratio that fits the whole image in the viewport.
    pub fn fit_factor(&self) -> f64 {
        if !self.has_image() || self.viewport_w <= 0.0 || self.viewport_h <= 0.0 {
            return 1.0;
        }
        (self.viewport_w / self.state.natural_width as f64)
            .min(self.viewport_h / self.state.natural_height as f64)
    }

    /// Zoom actually used for display.
    pub fn effective_zoom(&self) -> f64 {
        match self.state.zoom_mode {
            ZoomMode::Auto => self.fit_factor(),
            ZoomMode::Manual => self.state.zoom_factor,
        }
    }

    /// A new image (or a reload of the current one) finished decoding.
    pub fn load_image(&mut self, width: u32, height: u32) {
        debug!("viewport: image {width}x{height}");
        self.state = ViewState {
            natural_width: width,
            natural_height: height,
            ..ViewState::default()
        };
        self.emit();
    }

    /// The image is gone or failed to decode. Nothing is published.
    pub fn unload(&mut self) {
        self.state = ViewState::default();
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.viewport_w = width.max(0.0);
        self.viewport_h = height.max(0.0);
        match self.state.zoom_mode {
            ZoomMode::Auto => self.emit(),
            ZoomMode::Manual => self.clamp_scroll(),
        }
    }

    /// Cursor position in screen space, or `None` when it left the window.
    pub fn cursor_moved(&mut self, position: Option<Point>) {
        self.cursor = position;
    }

    /// Image-space point under the cursor, if the cursor is over the image.
    pub fn cursor_image_point(&self) -> Option<Point> {
        let cursor = self.cursor?;
        if !self.has_image() {
            return None;
        }
        let p = self.placement()?;
        let inside = cursor.x >= p.dst_x
            && cursor.x <= p.dst_x + p.dst_w
            && cursor.y >= p.dst_y
            && cursor.y <= p.dst_y + p.dst_h;
        if !inside {
            return None;
        }
        let zoom = self.effective_zoom();
        Some(Point::new(
            p.src_x + (cursor.x - p.dst_x) / zoom,
            p.src_y + (cursor.y - p.dst_y) / zoom,
        ))
    }

    pub fn step_zoom(&mut self, direction: ZoomDirection) {
        let (image_anchor, screen_anchor) = self.anchor();
        if self.state.zoom_mode == ZoomMode::Auto {
            // Seed from the fit ratio so the first step doesn't jump.
            self.state.zoom_factor = self.fit_factor();
            self.state.zoom_mode = ZoomMode::Manual;
        }
        let zoom = match direction {
            ZoomDirection::In => self.state.zoom_factor * self.zoom_step,
            ZoomDirection::Out => self.state.zoom_factor / self.zoom_step,
        };
        self.state.zoom_factor = clamp_zoom(zoom);
        debug!("viewport: zoom {direction:?} -> {:.4}", self.state.zoom_factor);
        self.keep_anchor(image_anchor, screen_anchor);
        self.emit();
    }

    /// Snap to 100%.
    pub fn reset_zoom(&mut self) {
        let (image_anchor, screen_anchor) = self.anchor();
        self.state.zoom_mode = ZoomMode::Manual;
        self.state.zoom_factor = 1.0;
        self.keep_anchor(image_anchor, screen_anchor);
        self.emit();
    }

    pub fn fit(&mut self) {
        self.state.zoom_mode = ZoomMode::Auto;
        self.state.scroll_x = 0.0;
        self.state.scroll_y = 0.0;
        self.emit();
    }

    /// Scroll by a screen-space delta. Ignored in auto mode.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        if self.state.zoom_mode == ZoomMode::Auto {
            return;
        }
        let before = (self.state.scroll_x, self.state.scroll_y);
        self.state.scroll_x += dx;
        self.state.scroll_y += dy;
        self.clamp_scroll();
        if before != (self.state.scroll_x, self.state.scroll_y) {
            self.emit();
        }
    }

    /// Apply the other window's view. Returns false when this window is a
    /// detached secondary and ignored it.
    pub fn apply_sync(&mut self, msg: &SyncMessage) -> bool {
        if !self.gate.allows_inbound() {
            debug!("viewport: detached, ignoring sync from {}", msg.origin);
            return false;
        }
        self.gate.suppress();
        self.state.zoom_mode = ZoomMode::Manual;
        self.state.zoom_factor = clamp_zoom(msg.zoom);
        let zoom = self.state.zoom_factor;
        self.state.scroll_x = msg.x * self.state.natural_width as f64 * zoom;
        self.state.scroll_y = msg.y * self.state.natural_height as f64 * zoom;
        // A larger window than the sender's has less room to scroll.
        self.clamp_scroll();
        self.gate.release();
        true
    }

    /// Current view expressed as a sync message.
    pub fn sync_message(&self) -> SyncMessage {
        let zoom = self.effective_zoom();
        let extent_w = (self.state.natural_width as f64 * zoom).max(1.0);
        let extent_h = (self.state.natural_height as f64 * zoom).max(1.0);
        SyncMessage {
            zoom,
            x: (self.state.scroll_x / extent_w).clamp(0.0, 1.0),
            y: (self.state.scroll_y / extent_h).clamp(0.0, 1.0),
            origin: self.gate.role(),
        }
    }

    pub fn max_scroll(&self) -> (f64, f64) {
        let zoom = self.effective_zoom();
        (
            (self.state.natural_width as f64 * zoom - self.viewport_w).max(0.0),
            (self.state.natural_height as f64 * zoom - self.viewport_h).max(0.0),
        )
    }

    /// Visible part of the image. `None` without an image.
    ///
    /// An axis smaller than the viewport is centered; a larger one is
    /// cropped at the scroll offset.
    pub fn placement(&self) -> Option<Placement> {
        if !self.has_image() {
            return None;
        }
        let zoom = self.effective_zoom();
        let (scroll_x, scroll_y) = match self.state.zoom_mode {
            ZoomMode::Auto => (0.0, 0.0),
            ZoomMode::Manual => (self.state.scroll_x, self.state.scroll_y),
        };
        let (src_x, src_w, dst_x, dst_w) =
            place_axis(self.state.natural_width as f64, zoom, scroll_x, self.viewport_w);
        let (src_y, src_h, dst_y, dst_h) =
            place_axis(self.state.natural_height as f64, zoom, scroll_y, self.viewport_h);
        Some(Placement {
            src_x,
            src_y,
            src_w,
            src_h,
            dst_x,
            dst_y,
            dst_w,
            dst_h,
        })
    }

    /// Image point to keep fixed and where it sits on screen.
    fn anchor(&self) -> (Point, Point) {
        let under_cursor = match self.state.zoom_mode {
            ZoomMode::Manual => self.cursor_image_point(),
            ZoomMode::Auto => None,
        };
        match (under_cursor, self.cursor) {
            (Some(image), Some(screen)) => (image, screen),
            _ => (
                Point::new(
                    self.state.natural_width as f64 / 2.0,
                    self.state.natural_height as f64 / 2.0,
                ),
                Point::new(self.viewport_w / 2.0, self.viewport_h / 2.0),
            ),
        }
    }

    fn keep_anchor(&mut self, image: Point, screen: Point) {
        let zoom = self.state.zoom_factor;
        self.state.scroll_x = image.x * zoom - screen.x;
        self.state.scroll_y = image.y * zoom - screen.y;
        self.clamp_scroll();
    }

    fn clamp_scroll(&mut self) {
        let (max_x, max_y) = self.max_scroll();
        self.state.scroll_x = self.state.scroll_x.clamp(0.0, max_x);
        self.state.scroll_y = self.state.scroll_y.clamp(0.0, max_y);
    }

    fn emit(&mut self) {
        if self.gate.allows_outbound() {
            self.outbox.push(self.sync_message());
        }
    }
}

/// One axis of [`ViewportController::placement`]: (src, src_len, dst, dst_len).
fn place_axis(natural: f64, zoom: f64, scroll: f64, viewport: f64) -> (f64, f64, f64, f64) {
    let scaled = natural * zoom;
    if scaled <= viewport {
        return (0.0, natural, (viewport - scaled) / 2.0, scaled);
    }
    let src = (scroll / zoom).clamp(0.0, natural);
    let src_len = (viewport / zoom).min(natural - src);
    (src, src_len, 0.0, src_len * zoom)
}
