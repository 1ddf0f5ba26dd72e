//! # Global Interception Gate
//!
//! A single process-wide observer consulted synchronously before every
//! filesystem-affecting operation issued through [`crate::fs`], whichever
//! library or caller issued it.
//!
//! The observer slot is registered once and is monotonic: it can be armed with
//! a [`WriteGate`] for the lifetime of a scope and disarmed afterwards, but it
//! cannot be narrowed to a sub-scope. Arming an already armed gate fails with
//! [`SandboxError::AlreadyActive`].
//!
//! The [`WriteGate`] trait is the capability seam: an interpreter can be
//! handed a gate directly instead of relying on the global slot.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::error::{ErrorKind, SandboxError};
use crate::operation::{Disposition, InterceptedEvent, classify};
use crate::path_validator;
use crate::policy::SandboxPolicy;

/// Outcome of checking an event without raising.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Permit,
    Deny { reason: ErrorKind, message: String },
}

impl Decision {
    pub fn is_permit(&self) -> bool {
        matches!(self, Decision::Permit)
    }
}

impl From<Result<(), SandboxError>> for Decision {
    fn from(result: Result<(), SandboxError>) -> Self {
        match result {
            Ok(()) => Decision::Permit,
            Err(e) => Decision::Deny {
                reason: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

/// Capability that decides whether an intercepted operation may proceed.
pub trait WriteGate: Send + Sync + std::fmt::Debug {
    fn check(&self, event: &InterceptedEvent) -> Result<(), SandboxError>;

    fn decide(&self, event: &InterceptedEvent) -> Decision {
        self.check(event).into()
    }

    /// Root directory the gate confines writes to, if it has one.
    fn root(&self) -> Option<&Path> {
        None
    }
}

/// The standard gate: classifier first, path validator for checked writes.
#[derive(Debug, Clone)]
pub struct PolicyGate {
    policy: Arc<SandboxPolicy>,
}

impl PolicyGate {
    pub fn new(policy: Arc<SandboxPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }
}

impl WriteGate for PolicyGate {
    fn check(&self, event: &InterceptedEvent) -> Result<(), SandboxError> {
        match classify(event.kind) {
            Disposition::AlwaysDeny => {
                let path = event.target_or_current_dir().to_path_buf();
                tracing::warn!(operation = %event.kind, path = %path.display(), "Operation denied");
                Err(SandboxError::UnsupportedOperation {
                    operation: event.kind.to_string(),
                    path: Some(path),
                })
            }
            Disposition::Checked => {
                if !event.raw_flags.has_write_intent() {
                    return Ok(());
                }
                path_validator::validate(event.target_or_current_dir(), &self.policy).map(|_| ())
            }
            Disposition::Permit => Ok(()),
        }
    }

    fn root(&self) -> Option<&Path> {
        Some(self.policy.root_directory())
    }
}

#[derive(Debug, Default)]
struct ObserverSlot {
    hook: RwLock<Option<Arc<dyn WriteGate>>>,
}

static OBSERVER: OnceLock<ObserverSlot> = OnceLock::new();

fn observer() -> &'static ObserverSlot {
    OBSERVER.get_or_init(|| {
        tracing::debug!("Registering global interception observer");
        ObserverSlot::default()
    })
}

/// Arm the process-wide observer with `gate`.
pub fn arm(gate: Arc<dyn WriteGate>) -> Result<(), SandboxError> {
    let mut hook = observer()
        .hook
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = hook.as_ref() {
        return Err(SandboxError::AlreadyActive {
            root: existing
                .root()
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
        });
    }
    tracing::debug!(?gate, "Interception gate armed");
    *hook = Some(gate);
    Ok(())
}

/// Disarm the observer. Returns whether a gate was armed.
pub fn disarm() -> bool {
    let previous = observer()
        .hook
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if previous.is_some() {
        tracing::debug!("Interception gate disarmed");
    }
    previous.is_some()
}

pub fn is_armed() -> bool {
    observer()
        .hook
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

/// Root directory of the armed gate, if it has one.
pub fn armed_root() -> Option<PathBuf> {
    observer()
        .hook
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .and_then(|gate| gate.root().map(Path::to_path_buf))
}

/// Report `event` to the observer. Called by every interposed operation
/// before it touches the filesystem; permits everything while disarmed.
pub fn audit(event: &InterceptedEvent) -> Result<(), SandboxError> {
    // Clone the hook out so the lock is not held while the gate runs.
    let hook = observer()
        .hook
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    match hook {
        Some(gate) => gate.check(event),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OpenIntent, OperationKind, RawFlags};
    use tempfile::tempdir;

    fn gate_for(root: &Path) -> PolicyGate {
        PolicyGate::new(Arc::new(SandboxPolicy::new(root, true).unwrap()))
    }

    #[test]
    fn test_always_deny_ignores_path() {
        let temp = tempdir().unwrap();
        let gate = gate_for(temp.path());
        let inside = temp.path().join("fresh.txt");

        for kind in OperationKind::ALL {
            if classify(kind) != Disposition::AlwaysDeny {
                continue;
            }
            let decision = gate.decide(&InterceptedEvent::new(kind, &inside));
            assert!(
                matches!(
                    decision,
                    Decision::Deny {
                        reason: ErrorKind::UnsupportedOperation,
                        ..
                    }
                ),
                "{kind} should be denied"
            );
        }
    }

    #[test]
    fn test_read_only_open_is_never_checked() {
        let temp = tempdir().unwrap();
        let gate = gate_for(temp.path());
        let event = InterceptedEvent::new(OperationKind::OpenForWrite, "/etc/passwd")
            .with_flags(RawFlags::Intent(OpenIntent::read_only()));
        assert!(gate.decide(&event).is_permit());

        let event = InterceptedEvent::new(OperationKind::OpenForRead, "/etc/passwd");
        assert!(gate.decide(&event).is_permit());
    }

    #[test]
    fn test_write_open_is_validated() {
        let temp = tempdir().unwrap();
        let gate = gate_for(temp.path());
        let event = InterceptedEvent::new(OperationKind::OpenForWrite, "/etc/passwd")
            .with_flags(RawFlags::Mode("w".into()));
        assert!(matches!(
            gate.check(&event),
            Err(SandboxError::OutsideSandbox { .. })
        ));
    }

    #[test]
    fn test_missing_target_reports_current_dir() {
        let temp = tempdir().unwrap();
        let gate = gate_for(temp.path());
        let event = InterceptedEvent {
            kind: OperationKind::RemoveDir,
            target: None,
            raw_flags: RawFlags::None,
        };
        match gate.check(&event) {
            Err(SandboxError::UnsupportedOperation { path, .. }) => {
                assert_eq!(path, Some(PathBuf::from(".")));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
