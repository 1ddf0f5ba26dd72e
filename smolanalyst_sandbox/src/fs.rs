//! Interposed filesystem operations.
//!
//! Each function reports an [`InterceptedEvent`] to the global gate and only
//! then performs the corresponding `std::fs` call. Code executed inside a
//! sandbox scope, and the output entry points of [`crate::surface`], go
//! through this module for every filesystem effect.
//!
//! While a scope is active (or a gate is armed), relative paths are taken
//! relative to the sandbox root, not the working directory. The path the
//! gate checks is therefore always the path that is touched.

use std::fs::{File, Permissions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::SandboxError;
use crate::gate::{self, audit};
use crate::operation::{InterceptedEvent, OpenIntent, OperationKind, RawFlags};
use crate::scope;

/// `path`, joined onto the sandbox root when it is relative.
pub fn anchored(path: &Path) -> PathBuf {
    if path.is_relative()
        && let Some(root) = scope::active_root().or_else(gate::armed_root)
    {
        return root.join(path);
    }
    path.to_path_buf()
}

fn event(kind: OperationKind, path: &Path) -> InterceptedEvent {
    InterceptedEvent::new(kind, path)
}

/// Open `path` with the given intent. Opens carrying write intent are
/// reported as `open_for_write`, everything else as `open_for_read`.
pub fn open(path: impl AsRef<Path>, intent: OpenIntent) -> Result<File, SandboxError> {
    let path = &anchored(path.as_ref());
    let kind = if intent.has_write_intent() {
        OperationKind::OpenForWrite
    } else {
        OperationKind::OpenForRead
    };
    audit(&event(kind, path).with_flags(RawFlags::Intent(intent)))?;
    intent
        .to_open_options()
        .open(path)
        .map_err(|e| SandboxError::io(path, e))
}

/// Open with a C-style mode string such as `"w"` or `"a+"`.
pub fn open_mode(path: impl AsRef<Path>, mode: &str) -> Result<File, SandboxError> {
    let path = &anchored(path.as_ref());
    audit(&event(OperationKind::OpenForWrite, path).with_flags(RawFlags::Mode(mode.to_string())))?;
    OpenIntent::from_mode(mode)
        .to_open_options()
        .open(path)
        .map_err(|e| SandboxError::io(path, e))
}

/// Low-level open with raw `O_*` flag bits. Always reported as
/// `open_for_write`; the gate inspects the bits for write intent.
#[cfg(unix)]
pub fn open_raw(path: impl AsRef<Path>, flags: i32) -> Result<File, SandboxError> {
    use std::os::unix::fs::OpenOptionsExt;

    let path = &anchored(path.as_ref());
    audit(&event(OperationKind::OpenForWrite, path).with_flags(RawFlags::Bits(flags)))?;

    let access = flags & libc::O_ACCMODE;
    let mut options = std::fs::OpenOptions::new();
    options
        .read(access == libc::O_RDONLY || access == libc::O_RDWR)
        .write(access == libc::O_WRONLY || access == libc::O_RDWR)
        .custom_flags(flags & !libc::O_ACCMODE);
    options.open(path).map_err(|e| SandboxError::io(path, e))
}

pub fn read(path: impl AsRef<Path>) -> Result<Vec<u8>, SandboxError> {
    let path = &anchored(path.as_ref());
    audit(&event(OperationKind::OpenForRead, path))?;
    std::fs::read(path).map_err(|e| SandboxError::io(path, e))
}

pub fn read_to_string(path: impl AsRef<Path>) -> Result<String, SandboxError> {
    let path = &anchored(path.as_ref());
    audit(&event(OperationKind::OpenForRead, path))?;
    std::fs::read_to_string(path).map_err(|e| SandboxError::io(path, e))
}

/// Create `path` exclusively and write `contents` to it.
pub fn write_new(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<(), SandboxError> {
    let path = &anchored(path.as_ref());
    let mut file = open(path, OpenIntent::create_new())?;
    file.write_all(contents.as_ref())
        .map_err(|e| SandboxError::io(path, e))
}

/// Create or truncate `path` and write `contents` to it.
pub fn write(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<(), SandboxError> {
    let path = &anchored(path.as_ref());
    let mut file = open(path, OpenIntent::from_mode("w"))?;
    file.write_all(contents.as_ref())
        .map_err(|e| SandboxError::io(path, e))
}

/// Append `contents` to `path`, creating it when missing.
pub fn append(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<(), SandboxError> {
    let path = &anchored(path.as_ref());
    let mut file = open(path, OpenIntent::append())?;
    file.write_all(contents.as_ref())
        .map_err(|e| SandboxError::io(path, e))
}

pub fn remove_file(path: impl AsRef<Path>) -> Result<(), SandboxError> {
    let path = &anchored(path.as_ref());
    audit(&event(OperationKind::Delete, path))?;
    std::fs::remove_file(path).map_err(|e| SandboxError::io(path, e))
}

pub fn rename(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<(), SandboxError> {
    let from = &anchored(from.as_ref());
    audit(&event(OperationKind::Rename, from))?;
    std::fs::rename(from, anchored(to.as_ref())).map_err(|e| SandboxError::io(from, e))
}

/// Rename that silently replaces an existing destination.
pub fn replace(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<(), SandboxError> {
    let from = &anchored(from.as_ref());
    audit(&event(OperationKind::Replace, from))?;
    std::fs::rename(from, anchored(to.as_ref())).map_err(|e| SandboxError::io(from, e))
}

pub fn create_dir(path: impl AsRef<Path>) -> Result<(), SandboxError> {
    let path = &anchored(path.as_ref());
    audit(&event(OperationKind::CreateDir, path))?;
    std::fs::create_dir(path).map_err(|e| SandboxError::io(path, e))
}

pub fn create_dir_all(path: impl AsRef<Path>) -> Result<(), SandboxError> {
    let path = &anchored(path.as_ref());
    audit(&event(OperationKind::CreateDir, path))?;
    std::fs::create_dir_all(path).map_err(|e| SandboxError::io(path, e))
}

pub fn remove_dir(path: impl AsRef<Path>) -> Result<(), SandboxError> {
    let path = &anchored(path.as_ref());
    audit(&event(OperationKind::RemoveDir, path))?;
    std::fs::remove_dir(path).map_err(|e| SandboxError::io(path, e))
}

pub fn remove_dir_all(path: impl AsRef<Path>) -> Result<(), SandboxError> {
    let path = &anchored(path.as_ref());
    audit(&event(OperationKind::RemoveDir, path))?;
    std::fs::remove_dir_all(path).map_err(|e| SandboxError::io(path, e))
}

pub fn truncate(path: impl AsRef<Path>, len: u64) -> Result<(), SandboxError> {
    let path = &anchored(path.as_ref());
    audit(&event(OperationKind::Truncate, path))?;
    std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_len(len))
        .map_err(|e| SandboxError::io(path, e))
}

#[cfg(unix)]
pub fn symlink(original: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<(), SandboxError> {
    let link = &anchored(link.as_ref());
    audit(&event(OperationKind::CreateSymlink, link))?;
    std::os::unix::fs::symlink(original.as_ref(), link).map_err(|e| SandboxError::io(link, e))
}

pub fn hard_link(original: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<(), SandboxError> {
    let link = &anchored(link.as_ref());
    audit(&event(OperationKind::CreateHardlink, link))?;
    std::fs::hard_link(anchored(original.as_ref()), link).map_err(|e| SandboxError::io(link, e))
}

pub fn set_permissions(path: impl AsRef<Path>, permissions: Permissions) -> Result<(), SandboxError> {
    let path = &anchored(path.as_ref());
    audit(&event(OperationKind::ChangePermissions, path))?;
    std::fs::set_permissions(path, permissions).map_err(|e| SandboxError::io(path, e))
}

#[cfg(unix)]
pub fn chown(path: impl AsRef<Path>, uid: Option<u32>, gid: Option<u32>) -> Result<(), SandboxError> {
    let path = &anchored(path.as_ref());
    audit(&event(OperationKind::ChangeOwnership, path))?;
    std::os::unix::fs::chown(path, uid, gid).map_err(|e| SandboxError::io(path, e))
}
