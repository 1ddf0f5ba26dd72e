//! Write-target validation shared by every enforcement layer.
//!
//! A write is permitted only when its resolved absolute path lies beneath the
//! sandbox root (or the platform temp dir, when exempt) and does not name an
//! existing filesystem entry. Resolution is symlink-aware: every existing
//! prefix is canonicalized before the next component is applied, so a link
//! inside the root pointing elsewhere cannot be used to escape.

use std::path::{Component, Path, PathBuf};

use crate::error::SandboxError;
use crate::policy::SandboxPolicy;
use crate::surface::ArgValue;

/// Decide whether `candidate` may be created as a new file.
///
/// Returns the resolved absolute path on success.
pub fn validate(candidate: &Path, policy: &SandboxPolicy) -> Result<PathBuf, SandboxError> {
    if candidate.as_os_str().is_empty() {
        return Err(SandboxError::invalid_path("path is empty"));
    }

    let resolved = resolve(candidate, policy.root_directory())?;

    let in_root = resolved.starts_with(policy.root_directory());
    let in_tmp = policy
        .exempt_tmp_directory()
        .is_some_and(|tmp| resolved.starts_with(tmp));

    if !in_root && !in_tmp {
        tracing::warn!(path = %resolved.display(), "Write outside sandbox root denied");
        return Err(SandboxError::OutsideSandbox {
            path: resolved,
            root: policy.root_directory().to_path_buf(),
        });
    }

    if !policy.allow_overwrite() && std::fs::symlink_metadata(&resolved).is_ok() {
        tracing::warn!(path = %resolved.display(), "Overwrite of existing entry denied");
        return Err(SandboxError::WouldOverwrite { path: resolved });
    }

    tracing::debug!(path = %resolved.display(), in_tmp = !in_root, "Write permitted");
    Ok(resolved)
}

/// Validate an untyped call argument. Only text and path values are
/// path-like; anything else is an [`SandboxError::InvalidPath`].
pub fn validate_arg(candidate: &ArgValue, policy: &SandboxPolicy) -> Result<PathBuf, SandboxError> {
    match candidate.as_path() {
        Some(path) => validate(path, policy),
        None => Err(SandboxError::invalid_path(format!(
            "expected a file path, got {}",
            candidate.type_name()
        ))),
    }
}

/// Resolve `path` to an absolute form, following symlinks wherever the path
/// (or a prefix of it) exists. Relative paths are taken relative to `base`.
///
/// Components are resolved one at a time: each existing prefix is
/// canonicalized before the next component is applied, so a `..` always
/// climbs out of the real directory and never out of a symlink's name.
/// Components that do not exist yet contain no symlinks; a `..` after one of
/// them just drops it again.
///
/// An existing entry that cannot be canonicalized (a dangling or looping
/// symlink) may only be the last component. Traversing one is
/// [`SandboxError::InvalidPath`], since its real location is unknown.
pub fn resolve(path: &Path, base: &Path) -> Result<PathBuf, SandboxError> {
    let full_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut resolved = PathBuf::new();
    // Trailing components of `resolved` that do not exist.
    let mut missing = 0usize;
    let mut unresolvable = false;

    for component in full_path.components() {
        if unresolvable && matches!(component, Component::Normal(_) | Component::ParentDir) {
            return Err(SandboxError::invalid_path(format!(
                "'{}' passes through the unresolvable symlink '{}'",
                full_path.display(),
                resolved.display()
            )));
        }
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component),
            Component::CurDir => {}
            Component::ParentDir => {
                // `resolved` is canonical up to the missing tail, so popping
                // is exact either way.
                resolved.pop();
                missing = missing.saturating_sub(1);
            }
            Component::Normal(name) => {
                resolved.push(name);
                if missing > 0 {
                    missing += 1;
                    continue;
                }
                match std::fs::canonicalize(&resolved) {
                    Ok(canonical) => resolved = canonical,
                    Err(_) if std::fs::symlink_metadata(&resolved).is_ok() => unresolvable = true,
                    Err(_) => missing = 1,
                }
            }
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolve_relative_is_joined_onto_base() {
        let temp = tempdir().unwrap();
        let base = std::fs::canonicalize(temp.path()).unwrap();
        assert_eq!(resolve(Path::new("out.csv"), &base).unwrap(), base.join("out.csv"));
    }

    #[test]
    fn test_resolve_missing_nested_directories() {
        let temp = tempdir().unwrap();
        let base = std::fs::canonicalize(temp.path()).unwrap();
        let resolved = resolve(Path::new("x/y/../z.txt"), &base).unwrap();
        assert_eq!(resolved, base.join("x/z.txt"));
    }

    #[test]
    fn test_resolve_dotdot_escape_is_visible() {
        let temp = tempdir().unwrap();
        let base = std::fs::canonicalize(temp.path()).unwrap();
        let resolved = resolve(Path::new("../escape.txt"), &base).unwrap();
        assert!(!resolved.starts_with(&base));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_follows_symlinked_directory() {
        let temp = tempdir().unwrap();
        let base = std::fs::canonicalize(temp.path()).unwrap();
        let real = base.join("real");
        std::fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, base.join("alias")).unwrap();

        let resolved = resolve(Path::new("alias/new.txt"), &base).unwrap();
        assert_eq!(resolved, real.join("new.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_dotdot_after_missing_component_keeps_symlink_target() {
        let temp = tempdir().unwrap();
        let base = std::fs::canonicalize(temp.path()).unwrap().join("root");
        let elsewhere = base.with_file_name("elsewhere");
        std::fs::create_dir(&base).unwrap();
        std::fs::create_dir(&elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, base.join("alias")).unwrap();

        let resolved = resolve(Path::new("alias/missing/../x.csv"), &base).unwrap();
        assert_eq!(resolved, elsewhere.join("x.csv"));
    }

    #[test]
    fn test_resolve_reenters_existing_directories_after_dotdot() {
        let temp = tempdir().unwrap();
        let base = std::fs::canonicalize(temp.path()).unwrap();
        std::fs::create_dir(base.join("real")).unwrap();

        let resolved = resolve(Path::new("missing/../real/../real/out.csv"), &base).unwrap();
        assert_eq!(resolved, base.join("real/out.csv"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_refuses_to_traverse_dangling_symlink() {
        let temp = tempdir().unwrap();
        let base = std::fs::canonicalize(temp.path()).unwrap();
        std::os::unix::fs::symlink(base.join("nowhere"), base.join("dangling")).unwrap();

        let err = resolve(Path::new("dangling/out.csv"), &base).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidPath { .. }));
        assert_eq!(
            resolve(Path::new("dangling"), &base).unwrap(),
            base.join("dangling")
        );
    }

    #[test]
    fn test_empty_path_is_invalid() {
        let temp = tempdir().unwrap();
        let policy = SandboxPolicy::new(temp.path(), true).unwrap();
        let err = validate(Path::new(""), &policy).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidPath { .. }));
    }

    #[test]
    fn test_non_path_argument_is_invalid() {
        let temp = tempdir().unwrap();
        let policy = SandboxPolicy::new(temp.path(), true).unwrap();
        let err = validate_arg(&ArgValue::Int(3), &policy).unwrap_err();
        assert!(matches!(err, SandboxError::InvalidPath { .. }));
        assert!(validate_arg(&ArgValue::Text("ok.csv".into()), &policy).is_ok());
    }
}
