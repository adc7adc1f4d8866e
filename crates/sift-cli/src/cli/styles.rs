//! Terminal styles.
//!
//! Code refers to semantic names only; `console` drops the escapes when the
//! output is not a terminal.

use console::Style;

pub fn header() -> Style {
    Style::new().bold()
}

pub fn id() -> Style {
    Style::new().cyan()
}

pub fn muted() -> Style {
    Style::new().dim()
}

pub fn active() -> Style {
    Style::new().green()
}

pub fn error() -> Style {
    Style::new().red()
}

pub fn hidden() -> Style {
    Style::new().dim().italic()
}
