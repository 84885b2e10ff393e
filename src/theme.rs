use ratatui::style::{Color, Modifier, Style};

pub struct Theme {
    pub text: Style,
    pub selection: Style,
    pub page_border: Style,
    pub footer: Style,

    pub popup_border: Style,
    pub popup_closing_border: Style,
    pub popup_title: Style,
    pub popup_text: Style,
    pub popup_loading: Style,
    pub popup_error: Style,
    pub bold: Style,
    pub italic: Style,
    pub code: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            text: Style::default().fg(Color::White),
            selection: Style::default().fg(Color::Yellow).bg(Color::DarkGray),
            page_border: Style::default().fg(Color::DarkGray),
            footer: Style::default().fg(Color::Gray).add_modifier(Modifier::DIM),

            popup_border: Style::default().fg(Color::Cyan).bg(Color::Black),
            popup_closing_border: Style::default().fg(Color::DarkGray).bg(Color::Black),
            popup_title: Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            popup_text: Style::default().fg(Color::White),
            popup_loading: Style::default().fg(Color::Gray).add_modifier(Modifier::ITALIC),
            popup_error: Style::default().fg(Color::Red),
            bold: Style::default().add_modifier(Modifier::BOLD),
            italic: Style::default().add_modifier(Modifier::ITALIC),
            code: Style::default().fg(Color::Green).bg(Color::Rgb(30, 30, 30)),
        }
    }
}
