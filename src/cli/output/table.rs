//! Table output formatting for CLI commands using comfy-table.

use comfy_table::{presets, Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use std::env;

use crate::domain::models::RunOutcome;

/// Create a borderless list table with bold upper-case headers.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| {
            Cell::new(h.to_uppercase())
                .add_attribute(Attribute::Bold)
                .set_alignment(CellAlignment::Left)
        }));
    table
}

/// Render the table under a count line, or a placeholder when empty.
pub fn render_list(entity_name: &str, table: &Table, total: usize) -> String {
    if total == 0 {
        return format!("No {entity_name}s found.");
    }
    let noun = if total == 1 {
        entity_name.to_string()
    } else {
        format!("{entity_name}s")
    };
    format!("{total} {noun}:\n{table}")
}

pub fn outcome_cell(outcome: RunOutcome) -> Cell {
    let cell = Cell::new(outcome.as_str());
    if !supports_color() {
        return cell;
    }
    match outcome {
        RunOutcome::Completed => cell.fg(Color::Green),
        RunOutcome::Failed => cell.fg(Color::Red),
        RunOutcome::TimedOut => cell.fg(Color::Yellow),
    }
}

pub fn flag_cell(enabled: bool) -> Cell {
    let (text, color) = if enabled {
        ("yes", Color::Green)
    } else {
        ("no", Color::DarkGrey)
    };
    let cell = Cell::new(text);
    if supports_color() {
        cell.fg(color)
    } else {
        cell
    }
}

fn supports_color() -> bool {
    // Respect NO_COLOR environment variable
    if env::var("NO_COLOR").is_ok() {
        return false;
    }

    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_list_counts() {
        let mut table = list_table(&["repository", "status"]);
        assert_eq!(render_list("schedule", &table, 0), "No schedules found.");

        table.add_row(vec!["/srv/repo", "ok"]);
        let rendered = render_list("schedule", &table, 1);
        assert!(rendered.starts_with("1 schedule:"));
        assert!(rendered.contains("REPOSITORY"));
        assert!(rendered.contains("/srv/repo"));
    }
}
