//! The fixed registry of output entry points and the process-wide table
//! through which they are dispatched.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use super::args::{ArgLocator, ArgValue, BoundArgs, CallArgs, Param, ParamDefault, bind};
use crate::data::{self, Figure, Frame, Series};
use crate::error::SandboxError;
use crate::fs;
use crate::operation::Disposition;

/// Object types that own output entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Owner {
    DataFrame,
    Series,
    Figure,
}

impl Owner {
    pub fn as_str(self) -> &'static str {
        match self {
            Owner::DataFrame => "DataFrame",
            Owner::Series => "Series",
            Owner::Figure => "Figure",
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The receiver of an entry point call.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'a> {
    Frame(&'a Frame),
    Series(&'a Series),
    Figure(&'a Figure),
}

impl Subject<'_> {
    pub fn owner(&self) -> Owner {
        match self {
            Subject::Frame(_) => Owner::DataFrame,
            Subject::Series(_) => Owner::Series,
            Subject::Figure(_) => Owner::Figure,
        }
    }
}

/// What an export call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutput {
    /// Serialization returned in memory (no path was given).
    Text(String),
    /// Output written to this path.
    Written(PathBuf),
    /// Output sent to a non-file destination.
    Sent,
}

/// An entry point implementation.
pub type EntryFn =
    Arc<dyn Fn(Subject<'_>, &CallArgs) -> Result<CallOutput, SandboxError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryPointId {
    pub owner: Owner,
    pub member: String,
}

impl EntryPointId {
    pub fn new(owner: Owner, member: impl Into<String>) -> Self {
        Self {
            owner,
            member: member.into(),
        }
    }
}

impl fmt::Display for EntryPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.member)
    }
}

type Implementation = fn(Subject<'_>, &BoundArgs) -> Result<CallOutput, SandboxError>;

/// Declarative description of one entry point.
pub struct EntryPointSpec {
    pub owner: Owner,
    pub member: &'static str,
    pub signature: &'static [Param],
    pub locator: ArgLocator,
    pub disposition: Disposition,
    implementation: Implementation,
}

impl EntryPointSpec {
    pub fn id(&self) -> EntryPointId {
        EntryPointId::new(self.owner, self.member)
    }

    /// Name of the parameter carrying the output path.
    pub fn path_param(&self) -> Option<&'static str> {
        self.locator.resolve(self.signature)
    }

    /// Whether a null value for `param` is the declared default, meaning the
    /// entry point returns its serialization instead of writing a file.
    pub fn null_means_in_memory(&self, param: &str) -> bool {
        self.signature
            .iter()
            .any(|p| p.name == param && p.default == ParamDefault::Null)
    }

    /// The unpatched implementation, binding arguments itself.
    fn original(&'static self) -> EntryFn {
        Arc::new(move |subject: Subject<'_>, args: &CallArgs| {
            let bound = bind(&self.id().to_string(), self.signature, args)?;
            (self.implementation)(subject, &bound)
        })
    }
}

impl fmt::Debug for EntryPointSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPointSpec")
            .field("id", &self.id().to_string())
            .field("locator", &self.locator)
            .field("disposition", &self.disposition)
            .finish()
    }
}

const BUF_PARAMS: &[Param] = &[Param::with_default("buf", ParamDefault::Null)];

const FRAME_CSV_PARAMS: &[Param] = &[
    Param::with_default("path_or_buf", ParamDefault::Null),
    Param::with_default("sep", ParamDefault::Text(",")),
    Param::with_default("header", ParamDefault::Bool(true)),
];

const JSON_PARAMS: &[Param] = &[Param::with_default("path_or_buf", ParamDefault::Null)];

const SERIES_CSV_PARAMS: &[Param] = &[
    Param::with_default("path_or_buf", ParamDefault::Null),
    Param::with_default("header", ParamDefault::Bool(true)),
];

const SQL_PARAMS: &[Param] = &[
    Param::required("name"),
    Param::required("con"),
    Param::with_default("if_exists", ParamDefault::Text("fail")),
];

const CLIPBOARD_PARAMS: &[Param] = &[Param::with_default("sep", ParamDefault::Text("\t"))];

const PICKLE_PARAMS: &[Param] = &[Param::required("path")];

const SAVEFIG_PARAMS: &[Param] = &[
    Param::required("fname"),
    Param::with_default("format", ParamDefault::Null),
    Param::with_default("dpi", ParamDefault::Int(100)),
];

/// Every guarded output entry point.
///
/// `to_sql`, `to_clipboard` and both `to_pickle`s are denied outright under a
/// sandbox: a database connection and the clipboard have no path to
/// validate, and binary containers have no sandboxed use.
pub static ENTRY_POINTS: &[EntryPointSpec] = &[
    EntryPointSpec {
        owner: Owner::DataFrame,
        member: "to_csv",
        signature: FRAME_CSV_PARAMS,
        locator: ArgLocator::Positional(0),
        disposition: Disposition::Checked,
        implementation: frame_to_csv,
    },
    EntryPointSpec {
        owner: Owner::DataFrame,
        member: "to_json",
        signature: JSON_PARAMS,
        locator: ArgLocator::Positional(0),
        disposition: Disposition::Checked,
        implementation: frame_to_json,
    },
    EntryPointSpec {
        owner: Owner::DataFrame,
        member: "to_html",
        signature: BUF_PARAMS,
        locator: ArgLocator::Named("buf"),
        disposition: Disposition::Checked,
        implementation: frame_to_html,
    },
    EntryPointSpec {
        owner: Owner::DataFrame,
        member: "to_markdown",
        signature: BUF_PARAMS,
        locator: ArgLocator::Named("buf"),
        disposition: Disposition::Checked,
        implementation: frame_to_markdown,
    },
    EntryPointSpec {
        owner: Owner::DataFrame,
        member: "to_sql",
        signature: SQL_PARAMS,
        locator: ArgLocator::Named("con"),
        disposition: Disposition::AlwaysDeny,
        implementation: frame_to_sql,
    },
    EntryPointSpec {
        owner: Owner::DataFrame,
        member: "to_clipboard",
        signature: CLIPBOARD_PARAMS,
        locator: ArgLocator::Positional(0),
        disposition: Disposition::AlwaysDeny,
        implementation: frame_to_clipboard,
    },
    EntryPointSpec {
        owner: Owner::DataFrame,
        member: "to_pickle",
        signature: PICKLE_PARAMS,
        locator: ArgLocator::Positional(0),
        disposition: Disposition::AlwaysDeny,
        implementation: frame_to_pickle,
    },
    EntryPointSpec {
        owner: Owner::Series,
        member: "to_csv",
        signature: SERIES_CSV_PARAMS,
        locator: ArgLocator::Positional(0),
        disposition: Disposition::Checked,
        implementation: series_to_csv,
    },
    EntryPointSpec {
        owner: Owner::Series,
        member: "to_json",
        signature: JSON_PARAMS,
        locator: ArgLocator::Positional(0),
        disposition: Disposition::Checked,
        implementation: series_to_json,
    },
    EntryPointSpec {
        owner: Owner::Series,
        member: "to_pickle",
        signature: PICKLE_PARAMS,
        locator: ArgLocator::Positional(0),
        disposition: Disposition::AlwaysDeny,
        implementation: series_to_pickle,
    },
    EntryPointSpec {
        owner: Owner::Figure,
        member: "savefig",
        signature: SAVEFIG_PARAMS,
        locator: ArgLocator::Named("fname"),
        disposition: Disposition::Checked,
        implementation: figure_savefig,
    },
];

/// Look up the declarative spec of an entry point.
pub fn spec(id: &EntryPointId) -> Option<&'static EntryPointSpec> {
    ENTRY_POINTS
        .iter()
        .find(|s| s.owner == id.owner && s.member == id.member)
}

static TABLE: LazyLock<RwLock<HashMap<EntryPointId, EntryFn>>> = LazyLock::new(|| {
    RwLock::new(
        ENTRY_POINTS
            .iter()
            .map(|spec| (spec.id(), spec.original()))
            .collect(),
    )
});

/// Current implementation of `id`.
pub fn implementation(id: &EntryPointId) -> Option<EntryFn> {
    TABLE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(id)
        .cloned()
}

/// Install `f` as the implementation of `id`, returning the previous one.
pub fn set_implementation(id: EntryPointId, f: EntryFn) -> Option<EntryFn> {
    TABLE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(id, f)
}

/// Remove `id` from the table, returning its implementation.
pub fn remove_implementation(id: &EntryPointId) -> Option<EntryFn> {
    TABLE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(id)
}

/// Dispatch `subject.member(args)` through the table.
pub fn invoke(subject: Subject<'_>, member: &str, args: &CallArgs) -> Result<CallOutput, SandboxError> {
    let id = EntryPointId::new(subject.owner(), member);
    let f = implementation(&id).ok_or_else(|| SandboxError::UnknownEntryPoint {
        entry_point: id.to_string(),
    })?;
    f(subject, args)
}

fn wrong_subject(member: &str, subject: Subject<'_>) -> SandboxError {
    SandboxError::InvalidArguments {
        entry_point: member.to_string(),
        reason: format!("not callable on {}", subject.owner()),
    }
}

/// Write `contents` to the bound path, or hand them back when it is null.
fn emit(bound: &BoundArgs, param: &str, contents: String) -> Result<CallOutput, SandboxError> {
    match bound.get(param) {
        ArgValue::None => Ok(CallOutput::Text(contents)),
        value => {
            let path = value
                .as_path()
                .ok_or_else(|| {
                    SandboxError::invalid_path(format!(
                        "'{param}' must be a file path, got {}",
                        value.type_name()
                    ))
                })?
                .to_path_buf();
            fs::write(&path, contents)?;
            Ok(CallOutput::Written(path))
        }
    }
}

fn frame_to_csv(subject: Subject<'_>, bound: &BoundArgs) -> Result<CallOutput, SandboxError> {
    let Subject::Frame(frame) = subject else {
        return Err(wrong_subject("to_csv", subject));
    };
    let csv = frame.render_csv(bound.text_or("sep", ","), bound.bool_or("header", true));
    emit(bound, "path_or_buf", csv)
}

fn frame_to_json(subject: Subject<'_>, bound: &BoundArgs) -> Result<CallOutput, SandboxError> {
    let Subject::Frame(frame) = subject else {
        return Err(wrong_subject("to_json", subject));
    };
    let json = frame
        .render_json()
        .map_err(|e| SandboxError::InvalidArguments {
            entry_point: "DataFrame.to_json".into(),
            reason: e.to_string(),
        })?;
    emit(bound, "path_or_buf", json)
}

fn frame_to_html(subject: Subject<'_>, bound: &BoundArgs) -> Result<CallOutput, SandboxError> {
    let Subject::Frame(frame) = subject else {
        return Err(wrong_subject("to_html", subject));
    };
    emit(bound, "buf", frame.render_html())
}

fn frame_to_markdown(subject: Subject<'_>, bound: &BoundArgs) -> Result<CallOutput, SandboxError> {
    let Subject::Frame(frame) = subject else {
        return Err(wrong_subject("to_markdown", subject));
    };
    emit(bound, "buf", frame.render_markdown())
}

fn frame_to_sql(subject: Subject<'_>, bound: &BoundArgs) -> Result<CallOutput, SandboxError> {
    let Subject::Frame(frame) = subject else {
        return Err(wrong_subject("to_sql", subject));
    };
    let invalid = |reason: &str| SandboxError::InvalidArguments {
        entry_point: "DataFrame.to_sql".into(),
        reason: reason.to_string(),
    };
    let name = bound.get("name").as_str().ok_or_else(|| invalid("'name' must be a string"))?;
    let con = bound.get("con").as_str().ok_or_else(|| invalid("'con' must be a connection name"))?;

    let replace = match bound.text_or("if_exists", "fail") {
        "replace" => true,
        "fail" => false,
        other => return Err(invalid(&format!("unsupported if_exists '{other}'"))),
    };
    if !replace && data::database_table(con, name).is_some() {
        return Err(invalid(&format!("table '{name}' already exists")));
    }
    data::store_table(con, name, frame.clone());
    Ok(CallOutput::Sent)
}

fn frame_to_clipboard(subject: Subject<'_>, bound: &BoundArgs) -> Result<CallOutput, SandboxError> {
    let Subject::Frame(frame) = subject else {
        return Err(wrong_subject("to_clipboard", subject));
    };
    data::set_clipboard(frame.render_csv(bound.text_or("sep", "\t"), true));
    Ok(CallOutput::Sent)
}

const PICKLE_MAGIC: &[u8] = b"SAPK\x01";

fn frame_to_pickle(subject: Subject<'_>, bound: &BoundArgs) -> Result<CallOutput, SandboxError> {
    let Subject::Frame(frame) = subject else {
        return Err(wrong_subject("to_pickle", subject));
    };
    write_pickle("DataFrame.to_pickle", frame, bound)
}

fn series_to_pickle(subject: Subject<'_>, bound: &BoundArgs) -> Result<CallOutput, SandboxError> {
    let Subject::Series(series) = subject else {
        return Err(wrong_subject("to_pickle", subject));
    };
    write_pickle("Series.to_pickle", series, bound)
}

fn write_pickle<T: serde::Serialize>(
    entry_point: &str,
    value: &T,
    bound: &BoundArgs,
) -> Result<CallOutput, SandboxError> {
    let path = bound
        .get("path")
        .as_path()
        .ok_or_else(|| SandboxError::invalid_path("'path' must be a file path"))?
        .to_path_buf();
    let mut bytes = PICKLE_MAGIC.to_vec();
    serde_json::to_writer(&mut bytes, value).map_err(|e| SandboxError::InvalidArguments {
        entry_point: entry_point.to_string(),
        reason: e.to_string(),
    })?;
    fs::write(&path, bytes)?;
    Ok(CallOutput::Written(path))
}

fn series_to_csv(subject: Subject<'_>, bound: &BoundArgs) -> Result<CallOutput, SandboxError> {
    let Subject::Series(series) = subject else {
        return Err(wrong_subject("to_csv", subject));
    };
    let csv = series.to_frame().render_csv(",", bound.bool_or("header", true));
    emit(bound, "path_or_buf", csv)
}

fn series_to_json(subject: Subject<'_>, bound: &BoundArgs) -> Result<CallOutput, SandboxError> {
    let Subject::Series(series) = subject else {
        return Err(wrong_subject("to_json", subject));
    };
    let json = serde_json::to_string(&series.values).map_err(|e| SandboxError::InvalidArguments {
        entry_point: "Series.to_json".into(),
        reason: e.to_string(),
    })?;
    emit(bound, "path_or_buf", json)
}

fn figure_savefig(subject: Subject<'_>, bound: &BoundArgs) -> Result<CallOutput, SandboxError> {
    let Subject::Figure(figure) = subject else {
        return Err(wrong_subject("savefig", subject));
    };
    let fname = bound.get("fname");
    let path = fname
        .as_path()
        .ok_or_else(|| {
            SandboxError::invalid_path(format!("'fname' must be a file path, got {}", fname.type_name()))
        })?
        .to_path_buf();

    let format = match bound.get("format").as_str() {
        Some(format) => format.to_ascii_lowercase(),
        None => path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("svg")
            .to_ascii_lowercase(),
    };
    if format != "svg" {
        return Err(SandboxError::InvalidArguments {
            entry_point: "Figure.savefig".into(),
            reason: format!("unsupported image format '{format}' (only svg is available)"),
        });
    }

    let dpi = bound.get("dpi").as_int().unwrap_or(100).max(1);
    fs::write(&path, figure.render_svg(dpi))?;
    Ok(CallOutput::Written(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_ids_are_unique() {
        let mut ids: Vec<_> = ENTRY_POINTS.iter().map(|s| s.id()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), ENTRY_POINTS.len());
    }

    #[test]
    fn test_every_locator_resolves() {
        for spec in ENTRY_POINTS {
            assert!(spec.path_param().is_some(), "{spec:?}");
        }
    }

    #[test]
    fn test_checked_entries_accept_null_only_where_declared() {
        let to_csv = spec(&EntryPointId::new(Owner::DataFrame, "to_csv")).unwrap();
        assert!(to_csv.null_means_in_memory("path_or_buf"));

        let savefig = spec(&EntryPointId::new(Owner::Figure, "savefig")).unwrap();
        assert!(!savefig.null_means_in_memory("fname"));
    }

    #[test]
    fn test_always_deny_entries() {
        let denied: Vec<_> = ENTRY_POINTS
            .iter()
            .filter(|s| s.disposition == Disposition::AlwaysDeny)
            .map(|s| s.id().to_string())
            .collect();
        assert_eq!(
            denied,
            vec![
                "DataFrame.to_sql",
                "DataFrame.to_clipboard",
                "DataFrame.to_pickle",
                "Series.to_pickle"
            ]
        );
    }
}
