//! Rendering of redirection listings.

use serde::Serialize;

use super::types::Redirection;

const COLUMNS: [&str; 5] = ["repo_path", "type", "target", "source", "state"];

#[derive(Debug, Serialize)]
struct Row {
    repo_path: String,
    #[serde(rename = "type")]
    kind: String,
    target: Option<String>,
    source: String,
    state: String,
}

impl Row {
    fn from_redirection(redir: &Redirection) -> Self {
        Self {
            repo_path: redir.repo_path.to_string_lossy().into_owned(),
            kind: redir.kind.to_string(),
            target: redir.target.as_ref().map(|t| t.to_string_lossy().into_owned()),
            source: redir.source.to_string(),
            state: redir.state.to_string(),
        }
    }

    fn cells(&self) -> [&str; 5] {
        [
            &self.repo_path,
            &self.kind,
            self.target.as_deref().unwrap_or("-"),
            &self.source,
            &self.state,
        ]
    }
}

fn sorted_rows(redirs: &[Redirection]) -> Vec<Row> {
    let mut rows: Vec<Row> = redirs.iter().map(Row::from_redirection).collect();
    rows.sort_by(|a, b| a.repo_path.cmp(&b.repo_path));
    rows
}

/// A JSON array of objects keyed by the column names.
pub fn render_json(redirs: &[Redirection]) -> serde_json::Result<String> {
    serde_json::to_string(&sorted_rows(redirs))
}

/// A left-aligned text table with upper-cased headers.
pub fn render_table(redirs: &[Redirection]) -> String {
    let rows = sorted_rows(redirs);
    let headers = COLUMNS.map(str::to_uppercase);

    let mut widths = headers.each_ref().map(String::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.cells()) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    push_line(&mut out, headers.each_ref().map(String::as_str), &widths);
    for row in &rows {
        push_line(&mut out, row.cells(), &widths);
    }
    out
}

fn push_line(out: &mut String, cells: [&str; 5], widths: &[usize; 5]) {
    let line = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join(" ");
    out.push_str(line.trim_end());
    out.push('\n');
}
