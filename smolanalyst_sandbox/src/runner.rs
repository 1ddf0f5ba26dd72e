//! # Batch Runner
//!
//! Executes one batch of generated analysis steps. A batch names the data
//! objects it works on and lists the steps to perform; each step goes through
//! the interposed filesystem layer, the analysis surface or the renderer,
//! exactly as generated code would.
//!
//! Execution stops at the first failing step, the way an uncaught error ends
//! a generated script. The report keeps every output produced before that.
//!
//! ```json
//! {
//!   "frames": { "sales": { "columns": ["month", "total"], "rows": [["jan", "10"]] } },
//!   "steps": [
//!     { "op": "export", "target": "sales", "method": "to_csv", "args": { "positional": ["sales.csv"] } },
//!     { "op": "remove", "path": "sales.csv" }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::data::{Figure, Frame, Series};
use crate::error::{ErrorKind, SandboxError};
use crate::fs;
use crate::render::{self, ShowOutcome};
use crate::scope;
use crate::surface::{CallArgs, CallOutput};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Batch {
    pub frames: BTreeMap<String, Frame>,
    pub series: BTreeMap<String, Series>,
    pub figures: BTreeMap<String, Figure>,
    pub steps: Vec<Step>,
}

impl Batch {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read batch file '{}'", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse batch file '{}'", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Write {
        path: PathBuf,
        contents: String,
    },
    Append {
        path: PathBuf,
        contents: String,
    },
    Read {
        path: PathBuf,
    },
    Remove {
        path: PathBuf,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
    },
    Replace {
        from: PathBuf,
        to: PathBuf,
    },
    Mkdir {
        path: PathBuf,
        #[serde(default)]
        parents: bool,
    },
    Rmdir {
        path: PathBuf,
        #[serde(default)]
        recursive: bool,
    },
    Truncate {
        path: PathBuf,
        #[serde(default)]
        len: u64,
    },
    Symlink {
        original: PathBuf,
        link: PathBuf,
    },
    HardLink {
        original: PathBuf,
        link: PathBuf,
    },
    Chmod {
        path: PathBuf,
        readonly: bool,
    },
    /// Call an export method on a named frame or series.
    Export {
        target: String,
        method: String,
        #[serde(default)]
        args: CallArgs,
    },
    Savefig {
        figure: String,
        #[serde(default)]
        args: CallArgs,
    },
    Show,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StepOutput {
    Done,
    Text(String),
    Written(PathBuf),
    Sent,
    Show(ShowOutcome),
}

impl From<CallOutput> for StepOutput {
    fn from(output: CallOutput) -> Self {
        match output {
            CallOutput::Text(text) => StepOutput::Text(text),
            CallOutput::Written(path) => StepOutput::Written(path),
            CallOutput::Sent => StepOutput::Sent,
        }
    }
}

/// The step that ended a batch early.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub index: usize,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub outputs: Vec<StepOutput>,
    pub failure: Option<StepFailure>,
}

impl BatchReport {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Run every step of `batch` in order, stopping at the first error.
///
/// Relative paths are taken relative to the root of the active sandbox
/// scope, or to the working directory when no scope is active.
pub fn execute(batch: &Batch) -> BatchReport {
    execute_in(batch, scope::active_root().as_deref())
}

/// Like [`execute`], resolving relative step paths against `base`.
pub fn execute_in(batch: &Batch, base: Option<&Path>) -> BatchReport {
    let mut report = BatchReport::default();
    for (index, step) in batch.steps.iter().enumerate() {
        match execute_step(batch, step, base) {
            Ok(output) => report.outputs.push(output),
            Err(e) => {
                tracing::warn!(index, "Batch step failed: {e}");
                report.failure = Some(StepFailure {
                    index,
                    kind: e.kind(),
                    message: e.to_string(),
                });
                break;
            }
        }
    }
    report
}

fn execute_step(batch: &Batch, step: &Step, base: Option<&Path>) -> Result<StepOutput, SandboxError> {
    tracing::debug!(?step, "Executing batch step");
    match step {
        Step::Write { path, contents } => {
            let path = at(base, path);
            fs::write(&path, contents).map(|()| StepOutput::Written(path))
        }
        Step::Append { path, contents } => {
            let path = at(base, path);
            fs::append(&path, contents).map(|()| StepOutput::Written(path))
        }
        Step::Read { path } => fs::read_to_string(at(base, path)).map(StepOutput::Text),
        Step::Remove { path } => fs::remove_file(at(base, path)).map(done),
        Step::Rename { from, to } => fs::rename(at(base, from), at(base, to)).map(done),
        Step::Replace { from, to } => fs::replace(at(base, from), at(base, to)).map(done),
        Step::Mkdir { path, parents: true } => fs::create_dir_all(at(base, path)).map(done),
        Step::Mkdir { path, parents: false } => fs::create_dir(at(base, path)).map(done),
        Step::Rmdir { path, recursive: true } => fs::remove_dir_all(at(base, path)).map(done),
        Step::Rmdir { path, recursive: false } => fs::remove_dir(at(base, path)).map(done),
        Step::Truncate { path, len } => fs::truncate(at(base, path), *len).map(done),
        Step::Symlink { original, link } => symlink(original, &at(base, link)).map(done),
        Step::HardLink { original, link } => fs::hard_link(at(base, original), at(base, link)).map(done),
        Step::Chmod { path, readonly } => {
            let path = at(base, path);
            let mut permissions = std::fs::metadata(&path)
                .map_err(|e| SandboxError::io(path.as_path(), e))?
                .permissions();
            permissions.set_readonly(*readonly);
            fs::set_permissions(&path, permissions).map(done)
        }
        Step::Export { target, method, args } => {
            let output = if let Some(frame) = batch.frames.get(target) {
                frame.export(method, args)?
            } else if let Some(series) = batch.series.get(target) {
                series.export(method, args)?
            } else {
                return Err(unknown_object(target));
            };
            Ok(output.into())
        }
        Step::Savefig { figure, args } => {
            let figure = batch.figures.get(figure).ok_or_else(|| unknown_object(figure))?;
            Ok(figure.savefig(args)?.into())
        }
        Step::Show => Ok(StepOutput::Show(render::show())),
    }
}

fn at(base: Option<&Path>, path: &Path) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path.to_path_buf(),
    }
}

fn done(_: ()) -> StepOutput {
    StepOutput::Done
}

fn unknown_object(name: &str) -> SandboxError {
    SandboxError::InvalidArguments {
        entry_point: name.to_string(),
        reason: "no frame, series or figure with this name in the batch".into(),
    }
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> Result<(), SandboxError> {
    fs::symlink(original, link)
}

#[cfg(not(unix))]
fn symlink(_original: &Path, link: &Path) -> Result<(), SandboxError> {
    Err(SandboxError::UnsupportedOperation {
        operation: crate::operation::OperationKind::CreateSymlink.to_string(),
        path: Some(link.to_path_buf()),
    })
}
