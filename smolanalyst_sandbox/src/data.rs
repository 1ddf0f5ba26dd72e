//! Minimal analysis objects whose export methods are the output entry points
//! guarded by [`crate::surface`].
//!
//! Exports are dispatched through the process-wide surface table, so a scope
//! that has patched the table sees every call.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{LazyLock, Mutex, PoisonError};

use crate::error::SandboxError;
use crate::surface::{CallArgs, CallOutput, Subject, invoke};

/// A table of string cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

/// A single named column.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// A line chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub lines: Vec<Line>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub label: String,
    pub points: Vec<(f64, f64)>,
}

fn default_width() -> u32 {
    640
}

fn default_height() -> u32 {
    480
}

impl Default for Figure {
    fn default() -> Self {
        Self {
            title: String::new(),
            width: default_width(),
            height: default_height(),
            lines: Vec::new(),
        }
    }
}

impl Frame {
    pub fn new(columns: &[&str], rows: Vec<Vec<String>>) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    /// Call the named export method (`to_csv`, `to_json`, ...).
    pub fn export(&self, method: &str, args: &CallArgs) -> Result<CallOutput, SandboxError> {
        invoke(Subject::Frame(self), method, args)
    }

    pub fn to_csv(&self, args: &CallArgs) -> Result<CallOutput, SandboxError> {
        self.export("to_csv", args)
    }

    pub fn to_json(&self, args: &CallArgs) -> Result<CallOutput, SandboxError> {
        self.export("to_json", args)
    }

    pub(crate) fn render_csv(&self, sep: &str, header: bool) -> String {
        let mut out = String::new();
        if header {
            out.push_str(&join_escaped(&self.columns, sep));
            out.push('\n');
        }
        for row in &self.rows {
            out.push_str(&join_escaped(row, sep));
            out.push('\n');
        }
        out
    }

    pub(crate) fn render_json(&self) -> Result<String, serde_json::Error> {
        let records: Vec<serde_json::Map<String, serde_json::Value>> = self
            .rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.clone(), serde_json::Value::String(v.clone())))
                    .collect()
            })
            .collect();
        serde_json::to_string(&records)
    }

    pub(crate) fn render_html(&self) -> String {
        let mut out = String::from("<table>\n  <thead>\n    <tr>");
        for column in &self.columns {
            let _ = write!(out, "<th>{}</th>", html_escape(column));
        }
        out.push_str("</tr>\n  </thead>\n  <tbody>\n");
        for row in &self.rows {
            out.push_str("    <tr>");
            for cell in row {
                let _ = write!(out, "<td>{}</td>", html_escape(cell));
            }
            out.push_str("</tr>\n");
        }
        out.push_str("  </tbody>\n</table>\n");
        out
    }

    pub(crate) fn render_markdown(&self) -> String {
        let mut out = format!("| {} |\n", self.columns.join(" | "));
        out.push_str(&format!("|{}\n", "---|".repeat(self.columns.len())));
        for row in &self.rows {
            out.push_str(&format!("| {} |\n", row.join(" | ")));
        }
        out
    }
}

impl Series {
    pub fn export(&self, method: &str, args: &CallArgs) -> Result<CallOutput, SandboxError> {
        invoke(Subject::Series(self), method, args)
    }

    pub(crate) fn to_frame(&self) -> Frame {
        Frame {
            columns: vec![self.name.clone()],
            rows: self.values.iter().map(|v| vec![v.clone()]).collect(),
        }
    }
}

impl Figure {
    pub fn savefig(&self, args: &CallArgs) -> Result<CallOutput, SandboxError> {
        invoke(Subject::Figure(self), "savefig", args)
    }

    pub(crate) fn render_svg(&self, dpi: i64) -> String {
        let scale = dpi as f64 / 100.0;
        let (w, h) = (self.width as f64 * scale, self.height as f64 * scale);
        let (mut min_x, mut max_x, mut min_y, mut max_y) = (f64::MAX, f64::MIN, f64::MAX, f64::MIN);
        for (x, y) in self.lines.iter().flat_map(|l| l.points.iter().copied()) {
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
        let span_x = if max_x > min_x { max_x - min_x } else { 1.0 };
        let span_y = if max_y > min_y { max_y - min_y } else { 1.0 };

        let mut out = format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{w}\" height=\"{h}\">\n  <title>{}</title>\n",
            html_escape(&self.title)
        );
        for line in &self.lines {
            let points: Vec<String> = line
                .points
                .iter()
                .map(|(x, y)| {
                    let px = (x - min_x) / span_x * w;
                    let py = h - (y - min_y) / span_y * h;
                    format!("{px:.1},{py:.1}")
                })
                .collect();
            let _ = writeln!(
                out,
                "  <polyline fill=\"none\" stroke=\"black\" points=\"{}\"><title>{}</title></polyline>",
                points.join(" "),
                html_escape(&line.label)
            );
        }
        out.push_str("</svg>\n");
        out
    }
}

fn join_escaped(cells: &[String], sep: &str) -> String {
    cells
        .iter()
        .map(|cell| {
            if cell.contains(sep) || cell.contains('"') || cell.contains('\n') {
                format!("\"{}\"", cell.replace('"', "\"\""))
            } else {
                cell.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(sep)
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

static CLIPBOARD: Mutex<String> = Mutex::new(String::new());

static DATABASES: LazyLock<Mutex<BTreeMap<String, BTreeMap<String, Frame>>>> =
    LazyLock::new(|| Mutex::new(BTreeMap::new()));

/// Current contents of the process clipboard.
pub fn clipboard_contents() -> String {
    CLIPBOARD
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

pub(crate) fn set_clipboard(text: String) {
    *CLIPBOARD.lock().unwrap_or_else(PoisonError::into_inner) = text;
}

/// Table `name` stored through connection `connection`, if any.
pub fn database_table(connection: &str, name: &str) -> Option<Frame> {
    DATABASES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(connection)
        .and_then(|tables| tables.get(name))
        .cloned()
}

pub(crate) fn store_table(connection: &str, name: &str, frame: Frame) {
    DATABASES
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(connection.to_string())
        .or_default()
        .insert(name.to_string(), frame);
}
