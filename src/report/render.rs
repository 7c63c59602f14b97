use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::types::Value;

use crate::api::pager::{CollectedBatch, Progress};
use crate::database::query::QueryResult;

const BAR_WIDTH: usize = 40;
const CELL_LIMIT: usize = 48;

pub fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    if let Ok(style) = ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}% {msg}") {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

impl Progress for ProgressBar {
    fn update(&self, fraction: f64) {
        self.set_position((fraction.clamp(0.0, 1.0) * 100.0).round() as u64);
    }
}

pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => format!("{:.2}", f),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

fn truncate(cell: String) -> String {
    if cell.chars().count() <= CELL_LIMIT {
        return cell;
    }
    let mut short: String = cell.chars().take(CELL_LIMIT - 1).collect();
    short.push('…');
    short
}

fn render_grid(columns: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &w)| format!("{:<w$}", cell, w = w))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(columns));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|&w| "-".repeat(w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.push('\n');
    for row in rows {
        out.push_str(&line(row.as_slice()));
        out.push('\n');
    }
    out
}

pub fn render_table(result: &QueryResult) -> String {
    if result.columns.is_empty() {
        return format!("{} row(s) affected\n", result.affected);
    }

    let rows: Vec<Vec<String>> = result
        .rows
        .iter()
        .map(|row| row.iter().map(|v| truncate(format_value(v))).collect())
        .collect();

    let mut out = render_grid(&result.columns, &rows);
    out.push_str(&format!("({} rows)\n", result.rows.len()));
    out
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Real(f) => Some(*f),
        _ => None,
    }
}

/// Horizontal bars for a label/value result, scaled to the largest value.
/// Rows whose value is not a number (NULL included) are left out. Returns
/// `None` when the result is not two columns wide or nothing is left to plot.
pub fn render_bar_chart(result: &QueryResult) -> Option<String> {
    if result.columns.len() != 2 {
        return None;
    }

    let points: Vec<(String, f64, &Value)> = result
        .rows
        .iter()
        .filter_map(|row| Some((truncate(format_value(&row[0])), numeric(&row[1])?, &row[1])))
        .collect();
    if points.is_empty() {
        return None;
    }

    let max = points.iter().map(|(_, v, _)| *v).fold(0.0_f64, f64::max);
    let label_width = points.iter().map(|(l, _, _)| l.chars().count()).max().unwrap_or(0);

    let mut out = String::new();
    for (label, value, raw) in &points {
        let len = if max > 0.0 {
            ((value.max(0.0) / max) * BAR_WIDTH as f64).round() as usize
        } else {
            0
        };
        out.push_str(&format!(
            "{:<w$} | {:<bar$} {}\n",
            label,
            "#".repeat(len),
            format_value(raw),
            w = label_width,
            bar = BAR_WIDTH
        ));
    }
    Some(out)
}

/// First `limit` records of a batch as a small table.
pub fn render_preview(batch: &CollectedBatch, limit: usize) -> String {
    let columns: Vec<String> = ["id", "title", "culture", "classification"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let rows: Vec<Vec<String>> = batch
        .records
        .iter()
        .take(limit)
        .map(|record| {
            columns
                .iter()
                .map(|key| match record.get(key.as_str()) {
                    None | Some(serde_json::Value::Null) => "NULL".to_string(),
                    Some(serde_json::Value::String(s)) => truncate(s.clone()),
                    Some(other) => truncate(other.to_string()),
                })
                .collect()
        })
        .collect();

    render_grid(&columns, &rows)
}
