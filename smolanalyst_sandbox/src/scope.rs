//! # Sandbox Scope
//!
//! Orchestrates one sandboxed execution. Entering a scope installs the
//! interception gate and/or the surface guard and switches rendering to a
//! headless mode; leaving it undoes all three and marks the process inactive
//! again.
//!
//! Leaving is tied to the lifetime of [`ActiveScope`]: it happens on
//! [`ActiveScope::exit`], on an early return with `?`, and while unwinding
//! from a panic.
//!
//! Both enforcement layers mutate process-wide state, so at most one scope is
//! active at a time. The activation flag lives in a mutex-guarded
//! [`StateMachine`], which makes a second `enter` (from this or any other
//! thread) fail with [`SandboxError::AlreadyActive`] instead of racing. Any
//! other concurrent use (for example entering on one thread and exiting on
//! another while a third performs exports) is undefined.

use serde::{Deserialize, Serialize};
use smolanalyst_common::state_machine::StateMachine;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::SandboxConfig;
use crate::error::SandboxError;
use crate::gate::{self, PolicyGate};
use crate::policy::SandboxPolicy;
use crate::render::{HEADLESS_BACKEND, RenderModeSwitch};
use crate::surface::SurfaceGuard;

/// Which enforcement layers a scope installs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Enforcement {
    /// Low-level interception of every filesystem operation only.
    Gate,
    /// Wrapping of the output entry points only.
    Surface,
    #[default]
    Both,
}

impl Enforcement {
    pub fn uses_gate(self) -> bool {
        matches!(self, Enforcement::Gate | Enforcement::Both)
    }

    pub fn uses_surface(self) -> bool {
        matches!(self, Enforcement::Surface | Enforcement::Both)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScopeState {
    Inactive,
    Active { root: PathBuf },
}

static SCOPE_STATE: StateMachine<ScopeState> = StateMachine::new(ScopeState::Inactive);

/// Whether a sandbox scope is currently active anywhere in the process.
pub fn is_active() -> bool {
    active_root().is_some()
}

/// Root directory of the active scope.
pub fn active_root() -> Option<PathBuf> {
    match SCOPE_STATE.get() {
        ScopeState::Active { root } => Some(root),
        ScopeState::Inactive => None,
    }
}

/// A configured, not yet entered, sandbox.
#[derive(Debug, Clone)]
pub struct SandboxScope {
    policy: Arc<SandboxPolicy>,
    enforcement: Enforcement,
    headless_backend: String,
}

impl SandboxScope {
    /// Scope confined to `root`, with the temp directory exempt.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        Ok(Self::from_policy(SandboxPolicy::new(root, true)?))
    }

    /// Scope confined to the process's current working directory.
    pub fn cwd() -> Result<Self, SandboxError> {
        Ok(Self::from_policy(SandboxPolicy::cwd(true)?))
    }

    pub fn from_policy(policy: SandboxPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
            enforcement: Enforcement::default(),
            headless_backend: HEADLESS_BACKEND.to_string(),
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Result<Self, SandboxError> {
        let policy = match &config.root_directory {
            Some(root) => SandboxPolicy::new(root, config.tmp_exempt)?,
            None => SandboxPolicy::cwd(config.tmp_exempt)?,
        };
        Ok(Self::from_policy(policy)
            .with_enforcement(config.enforcement)
            .with_headless_backend(&config.headless_backend))
    }

    pub fn with_enforcement(mut self, enforcement: Enforcement) -> Self {
        self.enforcement = enforcement;
        self
    }

    pub fn with_headless_backend(mut self, backend: &str) -> Self {
        self.headless_backend = backend.to_string();
        self
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    pub fn enforcement(&self) -> Enforcement {
        self.enforcement
    }

    /// Activate the sandbox.
    ///
    /// Fails with `AlreadyActive` when another scope is active; that scope is
    /// left untouched. If installing a layer fails, whatever was already
    /// installed is removed again before the error is returned.
    pub fn enter(&self) -> Result<ActiveScope, SandboxError> {
        let root = self.policy.root_directory().to_path_buf();
        SCOPE_STATE.transition(|state| {
            if let ScopeState::Active { root: active } = &*state {
                tracing::warn!(active = %active.display(), "Sandbox scope is already active");
                return Err(SandboxError::AlreadyActive {
                    root: active.clone(),
                });
            }
            *state = ScopeState::Active { root: root.clone() };
            Ok(())
        })?;

        // From here on dropping `active` undoes the partial setup.
        let mut active = ActiveScope {
            policy: self.policy.clone(),
            gate_armed: false,
            surface: None,
            render: None,
            finished: false,
        };

        if self.enforcement.uses_gate() {
            gate::arm(Arc::new(PolicyGate::new(self.policy.clone())))?;
            active.gate_armed = true;
        }
        if self.enforcement.uses_surface() {
            active.surface = Some(SurfaceGuard::install(self.policy.clone())?);
        }
        active.render = Some(RenderModeSwitch::engage(&self.headless_backend));

        tracing::info!(
            root = %root.display(),
            enforcement = ?self.enforcement,
            tmp_exempt = self.policy.tmp_exempt(),
            "Sandbox scope entered"
        );
        Ok(active)
    }

    /// Enter, run `f`, exit. The scope is left even if `f` panics.
    pub fn run<R>(&self, f: impl FnOnce(&ActiveScope) -> R) -> Result<R, SandboxError> {
        let active = self.enter()?;
        let output = f(&active);
        active.exit()?;
        Ok(output)
    }
}

/// An entered sandbox. Dropping it leaves the scope.
#[derive(Debug)]
pub struct ActiveScope {
    policy: Arc<SandboxPolicy>,
    gate_armed: bool,
    surface: Option<SurfaceGuard>,
    render: Option<RenderModeSwitch>,
    finished: bool,
}

impl ActiveScope {
    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    pub fn root_directory(&self) -> &Path {
        self.policy.root_directory()
    }

    /// A gate bound to this scope's policy, for callers that route writes
    /// through an explicit capability rather than the global observer.
    pub fn write_gate(&self) -> PolicyGate {
        PolicyGate::new(self.policy.clone())
    }

    /// Leave the scope, reporting any restoration failures.
    pub fn exit(mut self) -> Result<(), SandboxError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), SandboxError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        let mut failures = Vec::new();

        if let Some(surface) = self.surface.take() {
            match surface.restore() {
                Ok(()) => {}
                Err(SandboxError::Teardown { failures: f }) => failures.extend(f),
                Err(e) => failures.push(e.to_string()),
            }
        }

        if self.gate_armed {
            self.gate_armed = false;
            if !gate::disarm() {
                failures.push("interception gate was disarmed while the sandbox was active".into());
            }
        }

        if let Some(render) = self.render.take() {
            render.restore();
        }

        SCOPE_STATE.replace(ScopeState::Inactive);

        if failures.is_empty() {
            tracing::info!(root = %self.policy.root_directory().display(), "Sandbox scope exited");
            Ok(())
        } else {
            tracing::error!(count = failures.len(), "Sandbox scope exited with restoration failures");
            Err(SandboxError::Teardown { failures })
        }
    }
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::error!("Sandbox teardown during drop: {e}");
        }
    }
}
