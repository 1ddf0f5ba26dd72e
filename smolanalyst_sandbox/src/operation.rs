//! Filesystem operation kinds and their static disposition.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Every filesystem-affecting operation the sandbox knows how to observe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum OperationKind {
    OpenForRead,
    OpenForWrite,
    Replace,
    Delete,
    Rename,
    CreateDir,
    RemoveDir,
    Truncate,
    CreateSymlink,
    CreateHardlink,
    ChangePermissions,
    ChangeOwnership,
}

impl OperationKind {
    pub const ALL: [OperationKind; 12] = [
        OperationKind::OpenForRead,
        OperationKind::OpenForWrite,
        OperationKind::Replace,
        OperationKind::Delete,
        OperationKind::Rename,
        OperationKind::CreateDir,
        OperationKind::RemoveDir,
        OperationKind::Truncate,
        OperationKind::CreateSymlink,
        OperationKind::CreateHardlink,
        OperationKind::ChangePermissions,
        OperationKind::ChangeOwnership,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::OpenForRead => "open_for_read",
            OperationKind::OpenForWrite => "open_for_write",
            OperationKind::Replace => "replace",
            OperationKind::Delete => "delete",
            OperationKind::Rename => "rename",
            OperationKind::CreateDir => "create_dir",
            OperationKind::RemoveDir => "remove_dir",
            OperationKind::Truncate => "truncate",
            OperationKind::CreateSymlink => "create_symlink",
            OperationKind::CreateHardlink => "create_hardlink",
            OperationKind::ChangePermissions => "change_permissions",
            OperationKind::ChangeOwnership => "change_ownership",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the gate does with an operation of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Blocked regardless of the target path.
    AlwaysDeny,
    /// Checked against the path validator when the flags carry write intent.
    Checked,
    /// Allowed without inspection.
    Permit,
}

/// Static classification table.
///
/// Destructive and structural operations have no use inside an analysis
/// sandbox, so they are denied outright instead of being path-checked; this
/// closes renaming a forbidden path onto an allowed one. Exceptions are made
/// per kind only, never per caller.
pub const fn classify(kind: OperationKind) -> Disposition {
    match kind {
        OperationKind::Replace
        | OperationKind::Delete
        | OperationKind::Rename
        | OperationKind::CreateDir
        | OperationKind::RemoveDir
        | OperationKind::Truncate
        | OperationKind::CreateSymlink
        | OperationKind::CreateHardlink
        | OperationKind::ChangePermissions
        | OperationKind::ChangeOwnership => Disposition::AlwaysDeny,
        OperationKind::OpenForWrite => Disposition::Checked,
        OperationKind::OpenForRead => Disposition::Permit,
    }
}

/// Open flags in the shape of `std::fs::OpenOptions`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenIntent {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
}

impl OpenIntent {
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Exclusive creation of a new file.
    pub fn create_new() -> Self {
        Self {
            write: true,
            create_new: true,
            ..Self::default()
        }
    }

    pub fn append() -> Self {
        Self {
            append: true,
            create: true,
            ..Self::default()
        }
    }

    /// Parse a C-style `fopen` mode string (`"r"`, `"w"`, `"a+"`, `"xb"` ...).
    pub fn from_mode(mode: &str) -> Self {
        let mut intent = Self::default();
        for c in mode.chars() {
            match c {
                'r' => intent.read = true,
                'w' => {
                    intent.write = true;
                    intent.create = true;
                    intent.truncate = true;
                }
                'a' => {
                    intent.append = true;
                    intent.create = true;
                }
                'x' => {
                    intent.write = true;
                    intent.create_new = true;
                }
                '+' => {
                    intent.read = true;
                    intent.write = true;
                }
                _ => {}
            }
        }
        intent
    }

    pub fn has_write_intent(&self) -> bool {
        self.write || self.append || self.create || self.create_new || self.truncate
    }

    pub fn to_open_options(self) -> std::fs::OpenOptions {
        let mut options = std::fs::OpenOptions::new();
        options
            .read(self.read)
            .write(self.write)
            .append(self.append)
            .create(self.create)
            .create_new(self.create_new)
            .truncate(self.truncate);
        options
    }
}

/// The flags exactly as the caller supplied them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFlags {
    None,
    Mode(String),
    Bits(i32),
    Intent(OpenIntent),
}

impl RawFlags {
    /// Whether the flags request write, append, create or truncate access.
    pub fn has_write_intent(&self) -> bool {
        match self {
            RawFlags::None => false,
            RawFlags::Mode(mode) => mode.chars().any(|c| matches!(c, 'w' | 'a' | '+' | 'x')),
            RawFlags::Bits(bits) => bits & write_flag_mask() != 0,
            RawFlags::Intent(intent) => intent.has_write_intent(),
        }
    }
}

#[cfg(unix)]
fn write_flag_mask() -> i32 {
    libc::O_WRONLY | libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC | libc::O_APPEND
}

// Portable values of the classic POSIX open flags.
#[cfg(not(unix))]
fn write_flag_mask() -> i32 {
    0o1 | 0o2 | 0o100 | 0o1000 | 0o2000
}

/// A filesystem operation observed at interception time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedEvent {
    pub kind: OperationKind,
    pub target: Option<PathBuf>,
    pub raw_flags: RawFlags,
}

impl InterceptedEvent {
    pub fn new(kind: OperationKind, target: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            target: Some(target.into()),
            raw_flags: RawFlags::None,
        }
    }

    pub fn with_flags(mut self, raw_flags: RawFlags) -> Self {
        self.raw_flags = raw_flags;
        self
    }

    /// The target, or `.` when the operation carries none.
    pub fn target_or_current_dir(&self) -> &Path {
        self.target.as_deref().unwrap_or_else(|| Path::new("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_write_open_is_checked() {
        let checked: Vec<_> = OperationKind::ALL
            .into_iter()
            .filter(|k| classify(*k) == Disposition::Checked)
            .collect();
        assert_eq!(checked, vec![OperationKind::OpenForWrite]);
        assert_eq!(classify(OperationKind::OpenForRead), Disposition::Permit);
    }

    #[test]
    fn test_destructive_kinds_always_denied() {
        let denied = OperationKind::ALL
            .into_iter()
            .filter(|k| classify(*k) == Disposition::AlwaysDeny)
            .count();
        assert_eq!(denied, 10);
    }

    #[test]
    fn test_mode_write_intent() {
        for mode in ["w", "wb", "a", "r+", "x", "ab+"] {
            assert!(RawFlags::Mode(mode.into()).has_write_intent(), "{mode}");
        }
        for mode in ["r", "rb", ""] {
            assert!(!RawFlags::Mode(mode.into()).has_write_intent(), "{mode}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_bits_write_intent() {
        assert!(!RawFlags::Bits(libc::O_RDONLY).has_write_intent());
        assert!(RawFlags::Bits(libc::O_WRONLY | libc::O_CREAT).has_write_intent());
        assert!(RawFlags::Bits(libc::O_RDONLY | libc::O_APPEND).has_write_intent());
    }

    #[test]
    fn test_intent_from_mode() {
        let w = OpenIntent::from_mode("w");
        assert!(w.write && w.create && w.truncate);
        assert_eq!(OpenIntent::from_mode("r"), OpenIntent::read_only());
        assert!(!OpenIntent::read_only().has_write_intent());
        assert!(OpenIntent::append().has_write_intent());
    }

    #[test]
    fn test_names_round_trip_through_serde() {
        for kind in OperationKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_missing_target_uses_current_dir() {
        let event = InterceptedEvent {
            kind: OperationKind::Delete,
            target: None,
            raw_flags: RawFlags::None,
        };
        assert_eq!(event.target_or_current_dir(), Path::new("."));
    }
}
