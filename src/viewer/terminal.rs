//! Terminal I/O layer: raw mode, Kitty Graphics Protocol, status bar, overlay.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use crossterm::{
    ExecutableCommand, QueueableCommand, cursor,
    event::{
        DisableMouseCapture, EnableMouseCapture, KeyboardEnhancementFlags,
        PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    style::{self, Stylize},
    terminal,
};
use log::debug;
use std::io::{self, Write, stdout};

use super::state::{KittyPlacement, Layout};

const CHUNK_SIZE: usize = 4096;

// ---------------------------------------------------------------------------
// RawGuard: Drop で raw mode / alternate screen / 画像削除を確実に復元
// ---------------------------------------------------------------------------

pub(super) struct RawGuard {
    cleaned: bool,
    enhanced: bool,
}

impl RawGuard {
    pub(super) fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        let mut out = stdout();
        out.execute(terminal::EnterAlternateScreen)?;
        out.execute(cursor::Hide)?;
        out.execute(EnableMouseCapture)?;
        // Key release events are what stop a held zoom key.
        let enhanced = terminal::supports_keyboard_enhancement().unwrap_or(false);
        if enhanced {
            out.execute(PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::REPORT_EVENT_TYPES,
            ))?;
        }
        debug!("terminal: keyboard enhancement={enhanced}");
        Ok(Self {
            cleaned: false,
            enhanced,
        })
    }

    /// Whether the terminal reports key releases.
    pub(super) fn reports_releases(&self) -> bool {
        self.enhanced
    }

    pub(super) fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        let mut out = stdout();
        let _ = write!(out, "\x1b_Ga=d,d=A,q=2\x1b\\");
        if self.enhanced {
            let _ = out.execute(PopKeyboardEnhancementFlags);
        }
        let _ = out.execute(DisableMouseCapture);
        let _ = out.execute(cursor::Show);
        let _ = out.execute(terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

impl Drop for RawGuard {
    fn drop(&mut self) {
        self.cleanup();
    }
}

// ---------------------------------------------------------------------------
// Kitty protocol helpers
// ---------------------------------------------------------------------------

/// PNG データをチャンク分割して送信（a=t: データ転送のみ、表示なし）
pub(super) fn send_image(png_data: &[u8], image_id: u32) -> io::Result<()> {
    let encoded = BASE64.encode(png_data);
    // base64 is ASCII; the lossy conversion below never substitutes.
    let chunks: Vec<&[u8]> = encoded.as_bytes().chunks(CHUNK_SIZE).collect();

    let mut out = stdout();
    for (i, chunk) in chunks.iter().enumerate() {
        let chunk = String::from_utf8_lossy(chunk);
        let m = if i == chunks.len() - 1 { 0 } else { 1 };
        if i == 0 {
            write!(
                out,
                "\x1b_Ga=t,f=100,i={image_id},t=d,q=2,m={m};{chunk}\x1b\\"
            )?;
        } else {
            write!(out, "\x1b_Gm={m},q=2;{chunk}\x1b\\")?;
        }
    }
    out.flush()
}

/// 画像データ+配置を削除
pub(super) fn delete_image(image_id: u32) -> io::Result<()> {
    let mut out = stdout();
    write!(out, "\x1b_Ga=d,d=I,i={image_id},q=2\x1b\\")?;
    out.flush()
}

/// Delete the placements of an image, keeping its data.
pub(super) fn delete_placements(image_id: u32) -> io::Result<()> {
    let mut out = stdout();
    write!(out, "\x1b_Ga=d,d=i,i={image_id},q=2\x1b\\")?;
    out.flush()
}

/// Clear the text layer
pub(super) fn clear_screen() -> io::Result<()> {
    let mut out = stdout();
    out.queue(terminal::Clear(terminal::ClearType::All))?;
    out.flush()
}

pub(super) fn place_image(image_id: u32, k: &KittyPlacement) -> io::Result<()> {
    let mut out = stdout();
    out.queue(cursor::MoveTo(k.col, k.row))?;
    write!(
        out,
        "\x1b_Ga=p,i={image_id},x={},y={},w={},h={},c={},r={},C=1,q=2\x1b\\",
        k.src_x, k.src_y, k.src_w, k.src_h, k.cols, k.rows,
    )?;
    out.flush()
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// ステータスバーをターミナル最終行に描画。
pub(super) fn draw_status_bar(layout: &Layout, text: &str) -> io::Result<()> {
    let mut out = stdout();
    out.queue(cursor::MoveTo(0, layout.status_row))?;
    let width = layout.cols as usize;
    let text: String = text.chars().take(width).collect();
    let padded = format!("{:<width$}", text);
    write!(out, "{}", padded.on_dark_grey().white())?;
    out.queue(style::ResetColor)?;
    out.flush()
}

/// A boxed message in the middle of the image area.
pub(super) fn draw_centered(layout: &Layout, text: &str) -> io::Result<()> {
    let mut out = stdout();
    let label = format!("  {text}  ");
    let len = label.chars().count() as u16;
    let col = layout.cols.saturating_sub(len) / 2;
    let row = layout.image_rows / 2;
    let blank = " ".repeat(len as usize);
    for (dy, line) in [&blank, &label, &blank].into_iter().enumerate() {
        out.queue(cursor::MoveTo(col, (row + dy as u16).saturating_sub(1)))?;
        write!(out, "{}", line.as_str().on_dark_blue().white().bold())?;
    }
    out.queue(style::ResetColor)?;
    out.flush()
}

pub(super) fn set_title(title: &str) -> io::Result<()> {
    stdout().execute(terminal::SetTitle(title))?;
    Ok(())
}

pub(super) fn check_tty() -> anyhow::Result<()> {
    use std::io::IsTerminal;
    // Only stdout matters. crossterm's `use-dev-tty` reads keyboard from /dev/tty
    // (Unix) or Console API (Windows), so stdin being a pipe is always fine.
    if !io::stdout().is_terminal() {
        anyhow::bail!(
            "pairview requires an interactive terminal.\n\
             \n\
             Supported terminals: Kitty, Ghostty, WezTerm\n\
             To convert without a window, use: pairview convert <SOURCE>"
        );
    }
    Ok(())
}
