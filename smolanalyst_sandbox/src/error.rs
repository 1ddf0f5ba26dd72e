use serde::Serialize;
use std::path::PathBuf;

/// Coarse classification of a [`SandboxError`], used in [`crate::Decision`]s
/// and by callers that branch on the reason rather than the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    OutsideSandbox,
    WouldOverwrite,
    UnsupportedOperation,
    InvalidPath,
    AlreadyActive,
    InvalidArguments,
    Io,
    Teardown,
}

/// Errors raised by the sandbox.
///
/// Every denial is raised synchronously at the call site that attempted the
/// operation. The messages carry the offending path so they can be reported
/// back to the model verbatim.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error(
        "Write operation is not permitted outside of the sandbox root '{}' ('{}')",
        .root.display(),
        .path.display()
    )]
    OutsideSandbox { path: PathBuf, root: PathBuf },

    #[error("Can't overwrite existing file ('{}')", .path.display())]
    WouldOverwrite { path: PathBuf },

    #[error("File modification operation '{operation}'{} is not permitted", display_target(.path))]
    UnsupportedOperation {
        operation: String,
        path: Option<PathBuf>,
    },

    #[error("Invalid path argument: {reason}")]
    InvalidPath { reason: String },

    #[error("A sandbox scope is already active (root '{}')", .root.display())]
    AlreadyActive { root: PathBuf },

    #[error("Invalid arguments for '{entry_point}': {reason}")]
    InvalidArguments { entry_point: String, reason: String },

    #[error("Unknown output entry point '{entry_point}'")]
    UnknownEntryPoint { entry_point: String },

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Sandbox teardown incomplete: {}", .failures.join("; "))]
    Teardown { failures: Vec<String> },
}

impl SandboxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SandboxError::OutsideSandbox { .. } => ErrorKind::OutsideSandbox,
            SandboxError::WouldOverwrite { .. } => ErrorKind::WouldOverwrite,
            SandboxError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            SandboxError::InvalidPath { .. } => ErrorKind::InvalidPath,
            SandboxError::AlreadyActive { .. } => ErrorKind::AlreadyActive,
            SandboxError::InvalidArguments { .. } | SandboxError::UnknownEntryPoint { .. } => {
                ErrorKind::InvalidArguments
            }
            SandboxError::Io { .. } => ErrorKind::Io,
            SandboxError::Teardown { .. } => ErrorKind::Teardown,
        }
    }

    /// True for policy denials, as opposed to I/O or lifecycle failures.
    pub fn is_denial(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::OutsideSandbox
                | ErrorKind::WouldOverwrite
                | ErrorKind::UnsupportedOperation
                | ErrorKind::InvalidPath
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SandboxError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_path(reason: impl Into<String>) -> Self {
        SandboxError::InvalidPath {
            reason: reason.into(),
        }
    }
}

fn display_target(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" on '{}'", p.display()),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_operation_message() {
        let err = SandboxError::UnsupportedOperation {
            operation: "delete".into(),
            path: Some(PathBuf::from(".")),
        };
        assert_eq!(
            err.to_string(),
            "File modification operation 'delete' on '.' is not permitted"
        );

        let err = SandboxError::UnsupportedOperation {
            operation: "DataFrame.to_sql".into(),
            path: None,
        };
        assert_eq!(
            err.to_string(),
            "File modification operation 'DataFrame.to_sql' is not permitted"
        );
    }

    #[test]
    fn test_messages_carry_the_offending_path() {
        let err = SandboxError::OutsideSandbox {
            path: PathBuf::from("/etc/passwd"),
            root: PathBuf::from("/work"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/etc/passwd"));
        assert!(msg.contains("/work"));

        let err = SandboxError::WouldOverwrite {
            path: PathBuf::from("/work/out.csv"),
        };
        assert!(err.to_string().contains("/work/out.csv"));
    }

    #[test]
    fn test_denial_classification() {
        assert!(SandboxError::invalid_path("empty").is_denial());
        assert!(
            !SandboxError::AlreadyActive {
                root: PathBuf::from("/work")
            }
            .is_denial()
        );
        assert_eq!(
            SandboxError::UnknownEntryPoint {
                entry_point: "DataFrame.to_foo".into()
            }
            .kind(),
            ErrorKind::InvalidArguments
        );
    }
}
