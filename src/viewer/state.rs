//! Screen layout and the pure parts of drawing: cell geometry, Kitty
//! placement parameters, status bar text.

use crate::app::App;
use crate::sync::Role;
use crate::viewport::{Placement, Point, ZoomMode};

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Layout {
    pub cols: u16,
    pub image_rows: u16, // 画像領域の高さ (= term_rows - 1)
    pub status_row: u16, // ステータスバーの行 (= term_rows - 1)
    pub cell_w: u16,     // ピクセル/セル（幅）
    pub cell_h: u16,     // ピクセル/セル（高さ）
}

pub(super) fn compute_layout(term_cols: u16, term_rows: u16, pixel_w: u16, pixel_h: u16) -> Layout {
    let image_rows = term_rows.saturating_sub(1);
    let status_row = term_rows.saturating_sub(1);
    let cell_w = if term_cols > 0 { (pixel_w / term_cols).max(1) } else { 1 };
    let cell_h = if term_rows > 0 { (pixel_h / term_rows).max(1) } else { 1 };
    Layout {
        cols: term_cols,
        image_rows,
        status_row,
        cell_w,
        cell_h,
    }
}

impl Layout {
    /// Image area in pixels.
    pub(super) fn viewport_px(&self) -> (f64, f64) {
        (
            self.cols as f64 * self.cell_w as f64,
            self.image_rows as f64 * self.cell_h as f64,
        )
    }

    /// Center of a cell in viewport pixels; `None` on the status row.
    pub(super) fn cell_center(&self, col: u16, row: u16) -> Option<Point> {
        if row >= self.image_rows || col >= self.cols {
            return None;
        }
        Some(Point::new(
            (col as f64 + 0.5) * self.cell_w as f64,
            (row as f64 + 0.5) * self.cell_h as f64,
        ))
    }
}

// ---------------------------------------------------------------------------
// Kitty placement
// ---------------------------------------------------------------------------

/// Parameters of one `a=p` command. Source values are in uploaded pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct KittyPlacement {
    pub col: u16,
    pub row: u16,
    pub cols: u16,
    pub rows: u16,
    pub src_x: u32,
    pub src_y: u32,
    pub src_w: u32,
    pub src_h: u32,
}

/// Snap a viewport placement to the cell grid.
///
/// `upload_scale` converts natural pixels to uploaded pixels. Returns `None`
/// when nothing of the image is visible.
pub(super) fn kitty_placement(
    p: &Placement,
    upload_scale: f64,
    layout: &Layout,
) -> Option<KittyPlacement> {
    let (cell_w, cell_h) = (layout.cell_w as f64, layout.cell_h as f64);
    let col = ((p.dst_x / cell_w).round() as u16).min(layout.cols);
    let row = ((p.dst_y / cell_h).round() as u16).min(layout.image_rows);
    let cols = ((p.dst_w / cell_w).round() as u16).min(layout.cols - col);
    let rows = ((p.dst_h / cell_h).round() as u16).min(layout.image_rows - row);
    let src_w = (p.src_w * upload_scale).round() as u32;
    let src_h = (p.src_h * upload_scale).round() as u32;
    if cols == 0 || rows == 0 || src_w == 0 || src_h == 0 {
        return None;
    }
    Some(KittyPlacement {
        col,
        row,
        cols,
        rows,
        src_x: (p.src_x * upload_scale).round() as u32,
        src_y: (p.src_y * upload_scale).round() as u32,
        src_w,
        src_h,
    })
}

// ---------------------------------------------------------------------------
// Status bar
// ---------------------------------------------------------------------------

/// Status bar text. A banner replaces the key help.
pub(super) fn status_line(app: &App) -> String {
    let name = app
        .image()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "(no image)".into());
    let viewport = app.viewport();
    let mode = match viewport.state().zoom_mode {
        ZoomMode::Auto => "fit",
        ZoomMode::Manual => "manual",
    };
    let zoom = (viewport.effective_zoom() * 100.0).round();
    let link = match (app.role(), app.is_detached()) {
        (Role::Master, _) => "master",
        (Role::Secondary, false) => "original",
        (Role::Secondary, true) => "original, detached",
    };
    let tail = match app.banner() {
        Some(banner) => banner.to_string(),
        None => {
            let detach = if app.role() == Role::Secondary { " x:detach" } else { "" };
            format!("[+/-:zoom =:1:1 a:fit o:open{detach} Esc:close all q:quit]")
        }
    };
    format!(" {name} | {zoom}% {mode} | {link} | {tail}")
}
