//! Output formatting. Every function returns the text to print.

use super::styles;
use sift::{ActiveFilter, FilterKind, FilterOption, FilterView, OptionsState, ValueMap};
use unicode_width::UnicodeWidthStr;

const EMPTY: &str = "-";

/// Left-align `text` in a column of `width` display cells.
fn pad(text: &str, width: usize) -> String {
    let fill = width.saturating_sub(text.width());
    format!("{}{}", text, " ".repeat(fill))
}

fn flags(view: &FilterView) -> String {
    let mut flags = Vec::new();
    if !view.visible {
        flags.push("hidden");
    }
    if !view.enabled {
        flags.push("disabled");
    }
    if view.required {
        flags.push("required");
    }
    if view.active {
        flags.push("active");
    }
    flags.join(" ")
}

/// Filter table followed by the active count and the encoded query.
pub fn render_state(views: &[FilterView], active: &[ActiveFilter], query: &str) -> String {
    let rows: Vec<[String; 4]> = views
        .iter()
        .map(|view| {
            let value = view.value.display();
            [
                view.id.clone(),
                view.kind.tag().to_string(),
                if value.is_empty() { EMPTY.to_string() } else { value },
                flags(view),
            ]
        })
        .collect();

    let headers = ["FILTER", "KIND", "VALUE", "FLAGS"];
    let mut widths = headers.map(|h| h.width());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.width());
        }
    }

    let mut out = String::new();
    let header_line: Vec<String> = headers
        .iter()
        .zip(widths)
        .map(|(h, w)| pad(h, w))
        .collect();
    out.push_str(&format!("{}\n", styles::header().apply_to(header_line.join("  ").trim_end())));

    for (view, row) in views.iter().zip(&rows) {
        let id = styles::id().apply_to(pad(&row[0], widths[0]));
        let kind = styles::muted().apply_to(pad(&row[1], widths[1]));
        let value = pad(&row[2], widths[2]);
        let value = if view.visible {
            styles::active().apply_to(value).to_string()
        } else {
            styles::hidden().apply_to(value).to_string()
        };
        out.push_str(&format!("{}  {}  {}  {}", id, kind, value, row[3]).trim_end().to_string());
        out.push('\n');
        if let Some(error) = &view.error {
            out.push_str(&format!("  {}\n", styles::error().apply_to(format!("! {}", error))));
        }
    }

    out.push('\n');
    out.push_str(&format!("{} active\n", active.len()));
    for filter in active {
        out.push_str(&format!("  {}: {}\n", filter.label, filter.display));
    }
    if !query.is_empty() {
        out.push_str(&format!("{} {}\n", styles::muted().apply_to("query:"), query));
    }
    out
}

/// One `id = value` line per decoded filter, skipping empty values.
pub fn render_values(values: &[(String, FilterKind, String)]) -> String {
    if values.is_empty() {
        return format!("{}\n", styles::muted().apply_to("No filter values."));
    }
    let width = values.iter().map(|(id, _, _)| id.width()).max().unwrap_or(0);
    values
        .iter()
        .map(|(id, kind, text)| {
            format!(
                "{} = {} {}\n",
                styles::id().apply_to(pad(id, width)),
                text,
                styles::muted().apply_to(format!("({})", kind))
            )
        })
        .collect()
}

pub fn render_options(state: &OptionsState) -> String {
    if state.options.is_empty() {
        return format!("{}\n", styles::muted().apply_to("No options."));
    }
    let width = state
        .options
        .iter()
        .map(|option| option.value.width())
        .max()
        .unwrap_or(0);
    state
        .options
        .iter()
        .map(|option| render_option(option, width))
        .collect()
}

fn render_option(option: &FilterOption, width: usize) -> String {
    let mut line = format!("{}  {}", styles::id().apply_to(pad(&option.value, width)), option.label);
    if let Some(count) = option.count {
        line.push_str(&format!(" {}", styles::muted().apply_to(format!("({})", count))));
    }
    if option.disabled {
        line.push_str(&format!(" {}", styles::hidden().apply_to("disabled")));
    }
    line.push('\n');
    line
}

pub fn render_json(value: &serde_json::Value) -> anyhow::Result<String> {
    Ok(format!("{}\n", serde_json::to_string_pretty(value)?))
}

/// Non-empty values as display text, in declaration order.
pub fn displayed_values(
    filters: &sift::FilterSet,
    values: &ValueMap,
) -> Vec<(String, FilterKind, String)> {
    filters
        .iter()
        .filter_map(|definition| {
            let value = values.get(&definition.id)?;
            if definition.is_value_empty(value) {
                return None;
            }
            Some((definition.id.clone(), definition.kind, definition.format_value(value)))
        })
        .collect()
}
