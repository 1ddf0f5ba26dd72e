//! Call arguments for output entry points, and binding them against a
//! declared signature the way the entry point itself would.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::SandboxError;

/// A dynamically typed argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Path(PathBuf),
}

impl ArgValue {
    /// The value as a filesystem path, if it is path-like.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            ArgValue::Text(s) if !s.is_empty() => Some(Path::new(s)),
            ArgValue::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArgValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ArgValue::None)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ArgValue::None => "null",
            ArgValue::Bool(_) => "bool",
            ArgValue::Int(_) => "int",
            ArgValue::Float(_) => "float",
            ArgValue::Text(s) if s.is_empty() => "empty string",
            ArgValue::Text(_) => "string",
            ArgValue::Path(_) => "path",
        }
    }
}

impl From<&str> for ArgValue {
    fn from(s: &str) -> Self {
        ArgValue::Text(s.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(s: String) -> Self {
        ArgValue::Text(s)
    }
}

impl From<PathBuf> for ArgValue {
    fn from(p: PathBuf) -> Self {
        ArgValue::Path(p)
    }
}

impl From<&Path> for ArgValue {
    fn from(p: &Path) -> Self {
        ArgValue::Path(p.to_path_buf())
    }
}

impl From<bool> for ArgValue {
    fn from(b: bool) -> Self {
        ArgValue::Bool(b)
    }
}

impl From<i64> for ArgValue {
    fn from(n: i64) -> Self {
        ArgValue::Int(n)
    }
}

/// Positional and keyword arguments exactly as the caller passed them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallArgs {
    pub positional: Vec<ArgValue>,
    pub named: BTreeMap<String, ArgValue>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<ArgValue>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: &str, value: impl Into<ArgValue>) -> Self {
        self.named.insert(name.to_string(), value.into());
        self
    }

    /// Copy of these arguments with parameter `name` set to `value`, placed
    /// where the caller supplied it (positionally or by keyword). A parameter
    /// left at its default is added as a keyword.
    pub fn with_bound_value(&self, signature: &[Param], name: &str, value: ArgValue) -> Self {
        let mut args = self.clone();
        match signature.iter().position(|p| p.name == name) {
            Some(index) if index < args.positional.len() => args.positional[index] = value,
            _ => {
                args.named.insert(name.to_string(), value);
            }
        }
        args
    }
}

/// Default value of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDefault {
    Required,
    Null,
    Bool(bool),
    Int(i64),
    Text(&'static str),
}

impl ParamDefault {
    fn to_value(self) -> Option<ArgValue> {
        match self {
            ParamDefault::Required => None,
            ParamDefault::Null => Some(ArgValue::None),
            ParamDefault::Bool(b) => Some(ArgValue::Bool(b)),
            ParamDefault::Int(n) => Some(ArgValue::Int(n)),
            ParamDefault::Text(s) => Some(ArgValue::Text(s.to_string())),
        }
    }
}

/// One declared parameter of an entry point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Param {
    pub name: &'static str,
    pub default: ParamDefault,
}

impl Param {
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            default: ParamDefault::Required,
        }
    }

    pub const fn with_default(name: &'static str, default: ParamDefault) -> Self {
        Self { name, default }
    }
}

/// Where an entry point receives its output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLocator {
    Positional(usize),
    Named(&'static str),
}

impl ArgLocator {
    /// The parameter name this locator designates in `signature`.
    pub fn resolve(self, signature: &[Param]) -> Option<&'static str> {
        match self {
            ArgLocator::Positional(index) => signature.get(index).map(|p| p.name),
            ArgLocator::Named(name) => signature.iter().find(|p| p.name == name).map(|p| p.name),
        }
    }
}

static NONE: ArgValue = ArgValue::None;

/// Arguments bound to parameter names, defaults filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundArgs {
    values: Vec<(&'static str, ArgValue)>,
}

impl BoundArgs {
    pub fn get(&self, name: &str) -> &ArgValue {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
            .unwrap_or(&NONE)
    }

    pub fn text_or<'a>(&'a self, name: &str, fallback: &'a str) -> &'a str {
        self.get(name).as_str().unwrap_or(fallback)
    }

    pub fn bool_or(&self, name: &str, fallback: bool) -> bool {
        self.get(name).as_bool().unwrap_or(fallback)
    }
}

/// Bind `args` to `signature`: positionals first, then keywords, then
/// defaults for whatever remains.
pub fn bind(entry_point: &str, signature: &[Param], args: &CallArgs) -> Result<BoundArgs, SandboxError> {
    let invalid = |reason: String| SandboxError::InvalidArguments {
        entry_point: entry_point.to_string(),
        reason,
    };

    if args.positional.len() > signature.len() {
        return Err(invalid(format!(
            "takes {} positional arguments but {} were given",
            signature.len(),
            args.positional.len()
        )));
    }

    let mut slots: Vec<Option<ArgValue>> = vec![None; signature.len()];
    for (slot, value) in slots.iter_mut().zip(&args.positional) {
        *slot = Some(value.clone());
    }

    for (name, value) in &args.named {
        let index = signature
            .iter()
            .position(|p| p.name == name.as_str())
            .ok_or_else(|| invalid(format!("unexpected keyword argument '{name}'")))?;
        if slots[index].is_some() {
            return Err(invalid(format!("got multiple values for argument '{name}'")));
        }
        slots[index] = Some(value.clone());
    }

    let mut values = Vec::with_capacity(signature.len());
    for (param, slot) in signature.iter().zip(slots) {
        let value = match slot.or_else(|| param.default.to_value()) {
            Some(value) => value,
            None => {
                return Err(invalid(format!(
                    "missing required argument '{}'",
                    param.name
                )));
            }
        };
        values.push((param.name, value));
    }

    Ok(BoundArgs { values })
}
