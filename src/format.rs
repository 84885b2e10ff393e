// Display helpers for popup text.

use once_cell::sync::Lazy;
use regex::Regex;

// Bold has to be tried before italic so `**a**` is not read as two italics.
static MARKUP_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*|\*(.*?)\*|`(.*?)`").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentStyle {
    Plain,
    Bold,
    Italic,
    Code,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub style: FragmentStyle,
    pub text: String,
}

impl Fragment {
    fn new(style: FragmentStyle, text: &str) -> Self {
        Self {
            style,
            text: text.to_string(),
        }
    }
}

/// One display line of a formatted explanation.
pub type FormattedLine = Vec<Fragment>;

/// Shortens popup header text to `max_len` characters, ending in `...`.
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Converts the light markdown the model produces into styled fragments.
///
/// `**x**` becomes bold, `*x*` italic, `` `x` `` code, and every `\n` starts
/// a new line.
pub fn format_explanation(text: &str) -> Vec<FormattedLine> {
    text.split('\n').map(format_line).collect()
}

fn format_line(line: &str) -> FormattedLine {
    let mut fragments = Vec::new();
    let mut last = 0;
    for caps in MARKUP_REGEX.captures_iter(line) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            fragments.push(Fragment::new(FragmentStyle::Plain, &line[last..whole.start()]));
        }
        let (style, inner) = if let Some(m) = caps.get(1) {
            (FragmentStyle::Bold, m.as_str())
        } else if let Some(m) = caps.get(2) {
            (FragmentStyle::Italic, m.as_str())
        } else {
            (FragmentStyle::Code, caps.get(3).map(|m| m.as_str()).unwrap_or_default())
        };
        if !inner.is_empty() {
            fragments.push(Fragment::new(style, inner));
        }
        last = whole.end();
    }
    if last < line.len() {
        fragments.push(Fragment::new(FragmentStyle::Plain, &line[last..]));
    }
    fragments
}
