use std::path::{Path, PathBuf};

use crate::error::SandboxError;

/// The immutable confinement policy of one sandbox scope.
///
/// The root is canonicalized once at construction and never changes
/// afterwards. Overwrites are never allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPolicy {
    root_directory: PathBuf,
    allow_overwrite: bool,
    tmp_exempt: bool,
    tmp_directory: Option<PathBuf>,
}

impl SandboxPolicy {
    /// Build a policy rooted at `root`.
    ///
    /// The root must exist and be a directory. The platform temp dir is
    /// resolved here as well so that validation compares canonical paths
    /// (on macOS `/var/folders/..` resolves to `/private/var/folders/..`).
    pub fn new(root: impl AsRef<Path>, tmp_exempt: bool) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(SandboxError::invalid_path("sandbox root is empty"));
        }

        let root_directory = std::fs::canonicalize(root).map_err(|e| {
            SandboxError::invalid_path(format!(
                "failed to canonicalize sandbox root '{}': {e}",
                root.display()
            ))
        })?;

        if !root_directory.is_dir() {
            return Err(SandboxError::invalid_path(format!(
                "sandbox root '{}' is not a directory",
                root_directory.display()
            )));
        }

        let tmp_directory = std::fs::canonicalize(std::env::temp_dir()).ok();
        if tmp_exempt && tmp_directory.is_none() {
            tracing::warn!("Platform temp directory could not be resolved; tmp exemption disabled");
        }

        Ok(Self {
            root_directory,
            allow_overwrite: false,
            tmp_exempt,
            tmp_directory,
        })
    }

    /// Policy rooted at the process's current working directory.
    pub fn cwd(tmp_exempt: bool) -> Result<Self, SandboxError> {
        let cwd = std::env::current_dir().map_err(|e| SandboxError::io(".", e))?;
        Self::new(cwd, tmp_exempt)
    }

    pub fn root_directory(&self) -> &Path {
        &self.root_directory
    }

    pub fn allow_overwrite(&self) -> bool {
        self.allow_overwrite
    }

    pub fn tmp_exempt(&self) -> bool {
        self.tmp_exempt
    }

    /// The canonical temp directory, when the tmp exemption is in effect.
    pub fn exempt_tmp_directory(&self) -> Option<&Path> {
        if self.tmp_exempt {
            self.tmp_directory.as_deref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_root_is_canonicalized() {
        let temp = tempdir().unwrap();
        let nested = temp.path().join("a");
        std::fs::create_dir(&nested).unwrap();

        let policy = SandboxPolicy::new(nested.join("..").join("a"), true).unwrap();
        assert_eq!(
            policy.root_directory(),
            std::fs::canonicalize(&nested).unwrap()
        );
        assert!(!policy.allow_overwrite());
    }

    #[test]
    fn test_missing_root_is_rejected() {
        let temp = tempdir().unwrap();
        let err = SandboxPolicy::new(temp.path().join("missing"), true).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidPath { .. }));
    }

    #[test]
    fn test_file_root_is_rejected() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        let err = SandboxPolicy::new(&file, true).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidPath { .. }));
    }

    #[test]
    fn test_tmp_exemption_can_be_disabled() {
        let temp = tempdir().unwrap();
        let strict = SandboxPolicy::new(temp.path(), false).unwrap();
        assert!(strict.exempt_tmp_directory().is_none());

        let relaxed = SandboxPolicy::new(temp.path(), true).unwrap();
        assert!(relaxed.exempt_tmp_directory().is_some());
    }
}
