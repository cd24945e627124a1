//! Input processing layer: key and mouse mapping.
//!
//! Pure logic, no I/O. All functions are deterministic and testable.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers, MouseEvent, MouseEventKind};

use super::state::Layout;
use crate::app::Action;
use crate::viewport::ZoomDirection;

/// Map a key event to an `Action`.
///
/// Zoom keys report releases (when the terminal sends them) so a held key can
/// repeat on the app's timer; the terminal's own repeat events for them are
/// dropped. Pan keys accept repeats. Returns `None` for unbound keys.
pub(super) fn map_key_event(key: KeyEvent) -> Option<Action> {
    let KeyEvent {
        code,
        modifiers,
        kind,
        ..
    } = key;

    let zoom = match code {
        KeyCode::Char('+') => Some(ZoomDirection::In),
        KeyCode::Char('-') => Some(ZoomDirection::Out),
        _ => None,
    };
    if let Some(direction) = zoom {
        return match kind {
            KeyEventKind::Press => Some(Action::Zoom(direction)),
            KeyEventKind::Release => Some(Action::StopZoom),
            KeyEventKind::Repeat => None,
        };
    }

    let pan = match code {
        KeyCode::Left | KeyCode::Char('h') => Some((-1.0, 0.0)),
        KeyCode::Right | KeyCode::Char('l') => Some((1.0, 0.0)),
        KeyCode::Up | KeyCode::Char('k') => Some((0.0, -1.0)),
        KeyCode::Down | KeyCode::Char('j') => Some((0.0, 1.0)),
        _ => None,
    };
    if let Some((dx, dy)) = pan {
        return match kind {
            KeyEventKind::Release => None,
            _ => Some(Action::Pan { dx, dy }),
        };
    }

    if kind != KeyEventKind::Press {
        return None;
    }
    match (code, modifiers) {
        (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Action::Quit),
        (KeyCode::Char('q'), _) => Some(Action::Quit),
        (KeyCode::Esc, _) => Some(Action::CloseAll),
        (KeyCode::Char('='), _) => Some(Action::ResetZoom),
        (KeyCode::Char('a'), _) => Some(Action::Fit),
        (KeyCode::Char('o'), _) => Some(Action::OpenSecondary),
        (KeyCode::Char('x'), _) => Some(Action::ToggleDetach),
        _ => None,
    }
}

/// Map a mouse event. Motion becomes a cursor position (zoom anchor), the
/// wheel pans.
pub(super) fn map_mouse_event(event: MouseEvent, layout: &Layout) -> Option<Action> {
    match event.kind {
        MouseEventKind::Moved | MouseEventKind::Drag(_) => Some(Action::CursorMoved(
            layout.cell_center(event.column, event.row),
        )),
        MouseEventKind::ScrollUp => Some(Action::Pan { dx: 0.0, dy: -1.0 }),
        MouseEventKind::ScrollDown => Some(Action::Pan { dx: 0.0, dy: 1.0 }),
        MouseEventKind::ScrollLeft => Some(Action::Pan { dx: -1.0, dy: 0.0 }),
        MouseEventKind::ScrollRight => Some(Action::Pan { dx: 1.0, dy: 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::Point;
    use crossterm::event::{KeyEventState, MouseButton};

    fn key_kind(code: KeyCode, modifiers: KeyModifiers, kind: KeyEventKind) -> KeyEvent {
        KeyEvent {
            code,
            modifiers,
            kind,
            state: KeyEventState::NONE,
        }
    }

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        key_kind(code, modifiers, KeyEventKind::Press)
    }

    fn simple_key(code: KeyCode) -> KeyEvent {
        key(code, KeyModifiers::NONE)
    }

    fn mouse(kind: MouseEventKind, column: u16, row: u16) -> MouseEvent {
        MouseEvent {
            kind,
            column,
            row,
            modifiers: KeyModifiers::NONE,
        }
    }

    #[test]
    fn test_zoom_press_and_release() {
        assert_eq!(
            map_key_event(simple_key(KeyCode::Char('+'))),
            Some(Action::Zoom(ZoomDirection::In))
        );
        // '+' usually arrives with SHIFT once event types are reported.
        assert_eq!(
            map_key_event(key(KeyCode::Char('+'), KeyModifiers::SHIFT)),
            Some(Action::Zoom(ZoomDirection::In))
        );
        assert_eq!(
            map_key_event(simple_key(KeyCode::Char('-'))),
            Some(Action::Zoom(ZoomDirection::Out))
        );
        assert_eq!(
            map_key_event(key_kind(
                KeyCode::Char('-'),
                KeyModifiers::NONE,
                KeyEventKind::Release
            )),
            Some(Action::StopZoom)
        );
    }

    #[test]
    fn test_zoom_repeat_events_are_dropped() {
        let ev = key_kind(KeyCode::Char('+'), KeyModifiers::NONE, KeyEventKind::Repeat);
        assert_eq!(map_key_event(ev), None);
    }

    #[test]
    fn test_arrows_pan_and_repeat() {
        assert_eq!(
            map_key_event(simple_key(KeyCode::Left)),
            Some(Action::Pan { dx: -1.0, dy: 0.0 })
        );
        assert_eq!(
            map_key_event(key_kind(KeyCode::Down, KeyModifiers::NONE, KeyEventKind::Repeat)),
            Some(Action::Pan { dx: 0.0, dy: 1.0 })
        );
        assert_eq!(
            map_key_event(key_kind(KeyCode::Down, KeyModifiers::NONE, KeyEventKind::Release)),
            None
        );
    }

    #[test]
    fn test_commands() {
        assert_eq!(map_key_event(simple_key(KeyCode::Char('='))), Some(Action::ResetZoom));
        assert_eq!(map_key_event(simple_key(KeyCode::Char('a'))), Some(Action::Fit));
        assert_eq!(
            map_key_event(simple_key(KeyCode::Char('o'))),
            Some(Action::OpenSecondary)
        );
        assert_eq!(
            map_key_event(simple_key(KeyCode::Char('x'))),
            Some(Action::ToggleDetach)
        );
        assert_eq!(map_key_event(simple_key(KeyCode::Esc)), Some(Action::CloseAll));
    }

    #[test]
    fn test_q_and_ctrl_c_quit() {
        assert_eq!(map_key_event(simple_key(KeyCode::Char('q'))), Some(Action::Quit));
        assert_eq!(
            map_key_event(key(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(Action::Quit)
        );
    }

    #[test]
    fn test_release_of_command_key_is_ignored() {
        let ev = key_kind(KeyCode::Char('o'), KeyModifiers::NONE, KeyEventKind::Release);
        assert_eq!(map_key_event(ev), None);
    }

    #[test]
    fn test_unknown_key_returns_none() {
        assert_eq!(map_key_event(simple_key(KeyCode::Char('z'))), None);
    }

    #[test]
    fn test_mouse() {
        let layout = super::super::state::compute_layout(100, 31, 1000, 620);
        assert_eq!(
            map_mouse_event(mouse(MouseEventKind::Moved, 2, 1), &layout),
            Some(Action::CursorMoved(Some(Point::new(25.0, 30.0))))
        );
        assert_eq!(
            map_mouse_event(mouse(MouseEventKind::Moved, 2, 30), &layout),
            Some(Action::CursorMoved(None))
        );
        assert_eq!(
            map_mouse_event(mouse(MouseEventKind::ScrollDown, 0, 0), &layout),
            Some(Action::Pan { dx: 0.0, dy: 1.0 })
        );
        assert_eq!(
            map_mouse_event(mouse(MouseEventKind::Down(MouseButton::Left), 0, 0), &layout),
            None
        );
    }
}
