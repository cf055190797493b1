//! Alert rendering

use chrono::{DateTime, Local};
use comfy_table::{presets, CellAlignment, Table};

use super::tracker::{Observation, TrackedSet};

pub const DEFAULT_SUBJECT: &str = "!! Batches in Exception !!";

const PREAMBLE: &str = "Below is a table showing the batches currently in Exception state.";

/// Column headers, named after the observation fields
pub const HEADERS: [&str; 3] = ["count", "state", "project"];

/// Render the tracked set as an ASCII table, one row per group in
/// first-seen order.
pub fn render_table(tracked: &TrackedSet) -> String {
    let mut table = Table::new();
    table
        .load_preset(presets::ASCII_FULL)
        .set_header(HEADERS.to_vec());

    for obs in tracked.iter() {
        table.add_row(vec![
            obs.count.to_string(),
            obs.stage_label.clone(),
            obs.group_key.clone(),
        ]);
    }

    if let Some(column) = table.column_mut(0) {
        column.set_cell_alignment(CellAlignment::Right);
    }

    table.to_string()
}

/// A fully rendered alert, ready for any channel
#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub subject: String,
    pub table: String,
    pub generated_at: DateTime<Local>,
    pub observations: Vec<Observation>,
}

impl AlertMessage {
    pub fn compose(
        subject: impl Into<String>,
        tracked: &TrackedSet,
        generated_at: DateTime<Local>,
    ) -> Self {
        Self {
            subject: subject.into(),
            table: render_table(tracked),
            generated_at,
            observations: tracked.to_vec(),
        }
    }

    /// Plain-text body: preamble, table, generation time
    pub fn body(&self) -> String {
        format!(
            "{}\r\n{}\r\nThis was generated at {}",
            PREAMBLE,
            self.table,
            self.generated_at.format("%a %b %e %H:%M:%S %Y")
        )
    }

    /// Body wrapped in a `<pre>` block for HTML mail clients
    pub fn html_body(&self) -> String {
        format!("<pre>{}</pre>\r\n", escape_html(&self.body()))
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}
