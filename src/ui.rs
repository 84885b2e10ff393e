use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Clear, Paragraph, Wrap},
};

use crate::format::{format_explanation, FragmentStyle};
use crate::models::{PopupContent, PopupGeometry};
use crate::page::{Page, TextPos};
use crate::popup::Popup;
use crate::selection::SelectionController;
use crate::theme::Theme;

/// Popup footprint in terminal cells.
pub const TERMINAL_GEOMETRY: PopupGeometry = PopupGeometry {
    width: 44,
    height: 10,
    offset: 1,
    margin: 1,
};

const LOADING_TEXT: &str = "Getting explanation...";

/// Splits the screen into the page block and the footer line.
fn main_layout(area: Rect) -> (Rect, Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(area);
    (chunks[0], chunks[1])
}

/// The area holding the document text, inside the page border.
pub fn page_text_area(area: Rect) -> Rect {
    let (page_area, _) = main_layout(area);
    Block::default().borders(Borders::ALL).inner(page_area)
}

pub fn render(f: &mut Frame, page: &Page, controller: &SelectionController, title: &str, theme: &Theme) {
    let (page_area, footer_area) = main_layout(f.area());

    let block = Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .border_style(theme.page_border);
    let text_area = block.inner(page_area);
    f.render_widget(block, page_area);

    let lines: Vec<Line> = page
        .lines()
        .iter()
        .enumerate()
        .skip(page.scroll())
        .take(text_area.height as usize)
        .map(|(idx, text)| render_page_line(page, idx, text, theme))
        .collect();
    f.render_widget(Paragraph::new(lines), text_area);

    let footer = Paragraph::new("drag to select | Esc/x close popup | c copy | ↑/↓ scroll | q quit")
        .style(theme.footer);
    f.render_widget(footer, footer_area);

    // Oldest first, so the newest popup ends up on top.
    for popup in controller.popups().popups() {
        render_popup(f, popup, controller.popups().geometry(), theme);
    }
}

fn render_page_line(page: &Page, line: usize, text: &str, theme: &Theme) -> Line<'static> {
    let mut spans = Vec::new();
    let mut run = String::new();
    let mut run_selected = false;
    for (col, ch) in text.chars().enumerate() {
        let selected = page.is_selected(TextPos { line, col });
        if selected != run_selected && !run.is_empty() {
            spans.push(styled_run(std::mem::take(&mut run), run_selected, theme));
        }
        run_selected = selected;
        run.push(ch);
    }
    if !run.is_empty() {
        spans.push(styled_run(run, run_selected, theme));
    }
    Line::from(spans)
}

fn styled_run(text: String, selected: bool, theme: &Theme) -> Span<'static> {
    Span::styled(text, if selected { theme.selection } else { theme.text })
}

fn render_popup(f: &mut Frame, popup: &Popup, geometry: PopupGeometry, theme: &Theme) {
    let screen = f.area();
    let area = Rect {
        x: popup.position.x.max(0) as u16,
        y: popup.position.y.max(0) as u16,
        width: geometry.width.max(0) as u16,
        height: geometry.height.max(0) as u16,
    }
    .intersection(screen);
    if area.width < 3 || area.height < 3 {
        return;
    }

    f.render_widget(Clear, area);
    let border = if popup.is_open() { theme.popup_border } else { theme.popup_closing_border };
    let block = Block::default()
        .title(Span::styled(popup.header(), theme.popup_title))
        .title_bottom(Line::from("x close").right_aligned())
        .borders(Borders::ALL)
        .style(border);

    let para = Paragraph::new(popup_lines(&popup.content, theme))
        .block(block)
        .wrap(Wrap { trim: false })
        .style(theme.popup_text);
    f.render_widget(para, area);
}

fn popup_lines(content: &PopupContent, theme: &Theme) -> Vec<Line<'static>> {
    match content {
        PopupContent::Loading => vec![Line::from(Span::styled(LOADING_TEXT, theme.popup_loading))],
        PopupContent::Error(message) => message
            .lines()
            .map(|l| Line::from(Span::styled(l.to_string(), theme.popup_error)))
            .collect(),
        PopupContent::Explanation(text) => format_explanation(text)
            .into_iter()
            .map(|fragments| {
                Line::from(
                    fragments
                        .into_iter()
                        .map(|frag| {
                            let style = match frag.style {
                                FragmentStyle::Plain => theme.popup_text,
                                FragmentStyle::Bold => theme.bold,
                                FragmentStyle::Italic => theme.italic,
                                FragmentStyle::Code => theme.code,
                            };
                            Span::styled(frag.text, style)
                        })
                        .collect::<Vec<_>>(),
                )
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Position, Viewport};
    use crate::popup::PopupManager;
    use crate::selection::SETTLE_DELAY;
    use crate::transport::{Bridge, ExplanationResult, PageMessage};
    use ratatui::backend::TestBackend;
    use std::time::Instant;

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn draws_page_and_popup_states() {
        let (bridge, _port) = Bridge::new();
        let popups = PopupManager::new(3, Viewport::new(80, 24), TERMINAL_GEOMETRY);
        let mut controller = SelectionController::new(popups, bridge.connect_page(), None);
        let page = Page::new("Rust uses RAII for cleanup.");
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        let theme = Theme::default();

        let now = Instant::now();
        controller.handle_pointer_up(Position::new(14, 1), now);
        controller.tick(now + SETTLE_DELAY, "RAII");

        terminal
            .draw(|f| render(f, &page, &controller, "demo", &theme))
            .unwrap();
        let screen = screen_text(&terminal);
        assert!(screen.contains("Rust uses RAII"));
        assert!(screen.contains(LOADING_TEXT));

        controller.handle_message(
            PageMessage::ExplanationResponse(ExplanationResult::ok("Scope-bound **cleanup**.".into())),
            now,
        );
        terminal
            .draw(|f| render(f, &page, &controller, "demo", &theme))
            .unwrap();
        let screen = screen_text(&terminal);
        assert!(screen.contains("Scope-bound cleanup."));
        assert!(!screen.contains("**"));
    }

    #[test]
    fn text_area_sits_inside_border() {
        let area = page_text_area(Rect::new(0, 0, 80, 24));
        assert_eq!(area, Rect::new(1, 1, 78, 21));
    }
}
