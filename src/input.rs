use std::time::Instant;

use anyhow::Result;
use arboard::Clipboard;
use crossterm::event::{Event, KeyCode, KeyEventKind, MouseButton, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use tracing::{debug, warn};

use crate::models::{PopupContent, Position, Viewport};
use crate::page::Page;
use crate::selection::{SelectionController, SelectionSource};
use crate::ui::page_text_area;

/// Feeds one terminal event to the page and the controller. Returns
/// `Ok(false)` when the user asked to quit.
pub fn handle_event(
    event: Event,
    screen: Rect,
    page: &mut Page,
    controller: &mut SelectionController,
    now: Instant,
) -> Result<bool> {
    match event {
        Event::Key(key) if key.kind == KeyEventKind::Press => return handle_key(key.code, screen, page, controller, now),
        Event::Mouse(mouse) => handle_mouse(mouse, screen, page, controller, now),
        Event::Resize(width, height) => {
            controller
                .popups_mut()
                .set_viewport(Viewport::new(width as i32, height as i32));
        }
        _ => {}
    }
    Ok(true)
}

fn handle_key(
    key: KeyCode,
    screen: Rect,
    page: &mut Page,
    controller: &mut SelectionController,
    now: Instant,
) -> Result<bool> {
    match key {
        KeyCode::Char('q') => return Ok(false),
        KeyCode::Char('x') => controller.close_current_popup(now),
        KeyCode::Char('c') => copy_current_explanation(controller),
        KeyCode::Up | KeyCode::Char('k') => page.scroll_up(),
        KeyCode::Down | KeyCode::Char('j') => page.scroll_down(page_text_area(screen).height as usize),
        other => controller.handle_key_up(other, now),
    }
    Ok(true)
}

fn handle_mouse(
    mouse: MouseEvent,
    screen: Rect,
    page: &mut Page,
    controller: &mut SelectionController,
    now: Instant,
) {
    let area = page_text_area(screen);
    let inside = mouse.column >= area.x
        && mouse.row >= area.y
        && mouse.column < area.x + area.width
        && mouse.row < area.y + area.height;
    let pos = if inside {
        page.pos_at(mouse.column - area.x, mouse.row - area.y)
    } else {
        None
    };

    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => {
            page.begin_selection(pos);
            controller.handle_selection_change(&page.selected_text(), now);
        }
        MouseEventKind::Drag(MouseButton::Left) => page.extend_selection(pos),
        MouseEventKind::Up(MouseButton::Left) => {
            page.extend_selection(pos);
            controller.handle_pointer_up(Position::new(mouse.column as i32, mouse.row as i32), now);
        }
        MouseEventKind::ScrollUp => page.scroll_up(),
        MouseEventKind::ScrollDown => page.scroll_down(area.height as usize),
        _ => {}
    }
}

fn copy_current_explanation(controller: &SelectionController) {
    let Some(popup) = controller.current_popup().and_then(|id| controller.popups().get(id)) else {
        return;
    };
    let PopupContent::Explanation(text) = &popup.content else {
        return;
    };
    match Clipboard::new().and_then(|mut cb| cb.set_text(text.clone())) {
        Ok(()) => debug!("explanation copied"),
        Err(e) => warn!(error = %e, "clipboard unavailable"),
    }
}
