use std::cmp::Ordering;

use crate::selection::SelectionSource;

/// A position in the document: line index and character column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextPos {
    pub line: usize,
    pub col: usize,
}

impl Ord for TextPos {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.line, self.col).cmp(&(other.line, other.col))
    }
}

impl PartialOrd for TextPos {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The text the user reads and selects from, plus the mouse selection.
pub struct Page {
    lines: Vec<String>,
    scroll: usize,
    anchor: Option<TextPos>,
    head: Option<TextPos>,
}

impl Page {
    pub fn new(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            scroll: 0,
            anchor: None,
            head: None,
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn scroll(&self) -> usize {
        self.scroll
    }

    pub fn scroll_up(&mut self) {
        self.scroll = self.scroll.saturating_sub(1);
    }

    pub fn scroll_down(&mut self, visible_lines: usize) {
        let max = self.lines.len().saturating_sub(visible_lines);
        if self.scroll < max {
            self.scroll += 1;
        }
    }

    /// Maps a cell inside the text area (relative to its top-left corner) to
    /// a document position, snapping to the end of short lines.
    pub fn pos_at(&self, col: u16, row: u16) -> Option<TextPos> {
        let line = self.scroll + row as usize;
        let text = self.lines.get(line)?;
        let col = (col as usize).min(text.chars().count());
        Some(TextPos { line, col })
    }

    /// Starts a new selection; the previous one is cleared.
    pub fn begin_selection(&mut self, pos: Option<TextPos>) {
        self.anchor = pos;
        self.head = pos;
    }

    pub fn extend_selection(&mut self, pos: Option<TextPos>) {
        if self.anchor.is_some() {
            if let Some(pos) = pos {
                self.head = Some(pos);
            }
        }
    }

    pub fn clear_selection(&mut self) {
        self.anchor = None;
        self.head = None;
    }

    /// Ordered selection bounds, end exclusive.
    pub fn selection_range(&self) -> Option<(TextPos, TextPos)> {
        let (a, b) = (self.anchor?, self.head?);
        if a == b {
            return None;
        }
        Some(if a < b { (a, b) } else { (b, a) })
    }

    pub fn is_selected(&self, pos: TextPos) -> bool {
        self.selection_range()
            .is_some_and(|(start, end)| start <= pos && pos < end)
    }
}

impl SelectionSource for Page {
    fn selected_text(&self) -> String {
        let Some((start, end)) = self.selection_range() else {
            return String::new();
        };
        let mut out = Vec::new();
        for line in start.line..=end.line {
            let Some(text) = self.lines.get(line) else { break };
            let from = if line == start.line { start.col } else { 0 };
            let to = if line == end.line { end.col } else { text.chars().count() };
            out.push(text.chars().skip(from).take(to.saturating_sub(from)).collect::<String>());
        }
        out.join("\n")
    }
}
