//! # Surface Guard
//!
//! Wraps the known output entry points (table exports, figure saves) so each
//! call has its target path validated before the original implementation
//! runs. The wrapped entry points live in a process-wide table; installing a
//! guard swaps every entry for a wrapper and keeps a [`PatchRecord`] of the
//! original, restoring removes the wrappers again.
//!
//! This layer complements the interception gate: the gate sees every
//! filesystem operation, while the guard rejects bad calls up front with
//! errors attributed to the entry point that was called.

mod args;
mod registry;

pub use args::{ArgLocator, ArgValue, BoundArgs, CallArgs, Param, ParamDefault, bind};
pub use registry::{
    CallOutput, ENTRY_POINTS, EntryFn, EntryPointId, EntryPointSpec, Owner, Subject,
    implementation, invoke, remove_implementation, set_implementation, spec,
};

use smolanalyst_common::state_machine::StateMachine;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::SandboxError;
use crate::operation::Disposition;
use crate::path_validator;
use crate::policy::SandboxPolicy;

/// Bookkeeping for one patched entry point.
pub struct PatchRecord {
    pub entry_point: EntryPointId,
    pub original: EntryFn,
    pub locator: ArgLocator,
    wrapper: EntryFn,
}

impl std::fmt::Debug for PatchRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchRecord")
            .field("entry_point", &self.entry_point.to_string())
            .field("locator", &self.locator)
            .finish()
    }
}

/// Root of the installed guard, if any.
static INSTALLED: StateMachine<Option<PathBuf>> = StateMachine::new(None);

/// The installed set of wrappers. Dropping the guard restores the originals.
#[derive(Debug)]
pub struct SurfaceGuard {
    records: Vec<PatchRecord>,
    installed: bool,
}

impl SurfaceGuard {
    /// Wrap every registry entry point with `policy`.
    ///
    /// Each original is recorded exactly once. Entry points missing from the
    /// table are skipped. Only one guard can be installed at a time; a second
    /// install fails with [`SandboxError::AlreadyActive`] and leaves the
    /// table alone.
    pub fn install(policy: Arc<SandboxPolicy>) -> Result<Self, SandboxError> {
        INSTALLED.transition(|installed| {
            if let Some(root) = installed {
                return Err(SandboxError::AlreadyActive { root: root.clone() });
            }
            *installed = Some(policy.root_directory().to_path_buf());
            Ok(())
        })?;

        let mut records = Vec::with_capacity(ENTRY_POINTS.len());
        for spec in ENTRY_POINTS {
            let id = spec.id();
            let Some(original) = implementation(&id) else {
                tracing::warn!(entry_point = %id, "Entry point missing from table; not guarded");
                continue;
            };
            let wrapper = wrap(spec, original.clone(), policy.clone());
            set_implementation(id.clone(), wrapper.clone());
            records.push(PatchRecord {
                entry_point: id,
                original,
                locator: spec.locator,
                wrapper,
            });
        }
        tracing::debug!(patched = records.len(), "Surface guard installed");
        Ok(Self {
            records,
            installed: true,
        })
    }

    /// Whether a guard is currently installed.
    pub fn is_installed() -> bool {
        INSTALLED.get().is_some()
    }

    pub fn records(&self) -> &[PatchRecord] {
        &self.records
    }

    /// Put every original back.
    ///
    /// All records are restored even if some fail; failures (an entry point
    /// that was replaced by someone else while guarded) are reported together
    /// afterwards.
    pub fn restore(mut self) -> Result<(), SandboxError> {
        self.restore_all()
    }

    fn restore_all(&mut self) -> Result<(), SandboxError> {
        if !self.installed {
            return Ok(());
        }
        self.installed = false;

        let mut failures = Vec::new();
        for record in self.records.drain(..) {
            let current = set_implementation(record.entry_point.clone(), record.original);
            let intact = current
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &record.wrapper));
            if !intact {
                tracing::error!(entry_point = %record.entry_point, "Entry point was modified while guarded");
                failures.push(format!(
                    "entry point '{}' was modified while the sandbox was active",
                    record.entry_point
                ));
            }
        }
        INSTALLED.replace(None);

        if failures.is_empty() {
            tracing::debug!("Surface guard restored");
            Ok(())
        } else {
            Err(SandboxError::Teardown { failures })
        }
    }
}

impl Drop for SurfaceGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore_all() {
            tracing::error!("Surface guard restore on drop: {e}");
        }
    }
}

fn wrap(spec: &'static EntryPointSpec, original: EntryFn, policy: Arc<SandboxPolicy>) -> EntryFn {
    let name = spec.id().to_string();

    let path_param = match (spec.disposition, spec.path_param()) {
        (Disposition::Checked, Some(param)) => param,
        _ => {
            return Arc::new(move |_subject: Subject<'_>, _args: &CallArgs| {
                tracing::warn!(entry_point = %name, "Entry point denied");
                Err(SandboxError::UnsupportedOperation {
                    operation: name.clone(),
                    path: None,
                })
            });
        }
    };
    let in_memory_allowed = spec.null_means_in_memory(path_param);

    Arc::new(move |subject: Subject<'_>, args: &CallArgs| {
        let bound = bind(&name, spec.signature, args)?;
        let target = bound.get(path_param);

        if target.is_none() && in_memory_allowed {
            return original(subject, args);
        }

        let validated = path_validator::validate_arg(target, &policy)?;
        tracing::debug!(entry_point = %name, path = %validated.display(), "Export permitted");
        let args = args.with_bound_value(spec.signature, path_param, ArgValue::Path(validated));
        original(subject, &args)
    })
}
