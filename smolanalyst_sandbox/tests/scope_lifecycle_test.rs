//! Scope enter/exit: restoration of global state, re-entrancy, teardown on
//! errors and panics, and partial-failure reporting.

use serial_test::serial;
use smolanalyst_sandbox::gate;
use smolanalyst_sandbox::render::{self, RenderSettings, ShowOutcome};
use smolanalyst_sandbox::scope::{self, Enforcement};
use smolanalyst_sandbox::surface::{
    CallArgs, CallOutput, ENTRY_POINTS, EntryFn, EntryPointId, Owner, Subject, implementation,
    set_implementation,
};
use smolanalyst_sandbox::{
    ErrorKind, PolicyGate, SandboxConfig, SandboxError, SandboxPolicy, SandboxScope, fs,
};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tempfile::{TempDir, tempdir_in};

fn sandbox_root() -> TempDir {
    tempdir_in(env!("CARGO_TARGET_TMPDIR")).unwrap()
}

fn strict_scope(root: &TempDir) -> SandboxScope {
    SandboxScope::from_policy(SandboxPolicy::new(root.path(), false).unwrap())
}

/// Everything a scope touches, compared by identity for entry points.
struct GlobalState {
    entry_points: Vec<(EntryPointId, EntryFn)>,
    render: RenderSettings,
    gate_armed: bool,
    active: bool,
}

impl GlobalState {
    fn capture() -> Self {
        Self {
            entry_points: ENTRY_POINTS
                .iter()
                .map(|spec| (spec.id(), implementation(&spec.id()).unwrap()))
                .collect(),
            render: render::current(),
            gate_armed: gate::is_armed(),
            active: scope::is_active(),
        }
    }

    fn assert_unchanged(&self) {
        let now = Self::capture();
        for ((id, before), (_, after)) in self.entry_points.iter().zip(&now.entry_points) {
            assert!(Arc::ptr_eq(before, after), "{id} differs");
        }
        assert_eq!(self.render, now.render);
        assert_eq!(self.gate_armed, now.gate_armed);
        assert_eq!(self.active, now.active);
    }
}

// ============= Lifecycle Tests =============

#[test]
#[serial]
fn test_exit_restores_pre_entry_state() {
    render::use_backend("qtagg", true);
    render::set_param("figure.dpi", "120");
    let before = GlobalState::capture();

    let root = sandbox_root();
    let active = strict_scope(&root).enter().unwrap();

    assert!(scope::is_active());
    assert!(gate::is_armed());
    let inside = render::current();
    assert_eq!(inside.backend, "agg");
    assert!(!inside.interactive);
    assert_eq!(inside.params.get("figure.dpi").map(String::as_str), Some("120"));
    assert_eq!(render::show(), ShowOutcome::Suppressed);
    for (id, original) in &before.entry_points {
        assert!(!Arc::ptr_eq(&implementation(id).unwrap(), original), "{id} not wrapped");
    }

    active.exit().unwrap();
    before.assert_unchanged();
    assert_eq!(render::show(), ShowOutcome::Displayed);

    render::use_backend(render::DEFAULT_BACKEND, true);
}

#[test]
#[serial]
fn test_second_scope_is_rejected_and_first_left_intact() {
    let root = sandbox_root();
    let other_root = sandbox_root();
    let first = strict_scope(&root).enter().unwrap();
    let inside = GlobalState::capture();

    let err = strict_scope(&other_root).enter().unwrap_err();
    match &err {
        SandboxError::AlreadyActive { root: active } => {
            assert_eq!(active, first.root_directory());
        }
        other => panic!("expected AlreadyActive, got {other:?}"),
    }
    inside.assert_unchanged();
    assert_eq!(scope::active_root().as_deref(), Some(first.root_directory()));

    first.exit().unwrap();
    assert!(!scope::is_active());
}

#[test]
#[serial]
fn test_concurrent_enter_from_another_thread_is_rejected() {
    let root = sandbox_root();
    let scope = strict_scope(&root);
    let active = scope.enter().unwrap();

    let contender = scope.clone();
    let result = std::thread::spawn(move || contender.enter().map(|_| ()))
        .join()
        .unwrap();
    assert_eq!(result.unwrap_err().kind(), ErrorKind::AlreadyActive);

    active.exit().unwrap();
}

#[test]
#[serial]
fn test_error_inside_run_still_restores_state() {
    let before = GlobalState::capture();
    let root = sandbox_root();

    let outcome = strict_scope(&root)
        .run(|_| fs::write("/etc/passwd", "nope"))
        .unwrap();
    assert_eq!(outcome.unwrap_err().kind(), ErrorKind::OutsideSandbox);

    before.assert_unchanged();
}

#[test]
#[serial]
fn test_panic_inside_run_still_restores_state() {
    let before = GlobalState::capture();
    let root = sandbox_root();
    let scope = strict_scope(&root);

    let result = catch_unwind(AssertUnwindSafe(|| {
        scope.run(|_| -> () { panic!("generated code crashed") })
    }));
    assert!(result.is_err());

    before.assert_unchanged();
    assert!(strict_scope(&root).enter().unwrap().exit().is_ok());
}

#[test]
#[serial]
fn test_early_return_drops_scope() {
    fn analysis(scope: &SandboxScope) -> Result<(), SandboxError> {
        let _active = scope.enter()?;
        fs::remove_file("/tmp/anything")?;
        Ok(())
    }

    let before = GlobalState::capture();
    let root = sandbox_root();
    let err = analysis(&strict_scope(&root)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    before.assert_unchanged();
}

// ============= Enforcement Selection Tests =============

#[test]
#[serial]
fn test_surface_only_scope_leaves_gate_disarmed() {
    let root = sandbox_root();
    let active = strict_scope(&root)
        .with_enforcement(Enforcement::Surface)
        .enter()
        .unwrap();
    assert!(!gate::is_armed());
    assert_eq!(render::current().backend, "agg");
    active.exit().unwrap();
}

#[test]
#[serial]
fn test_gate_only_scope_leaves_entry_points_alone() {
    let before = GlobalState::capture();
    let root = sandbox_root();
    let active = strict_scope(&root)
        .with_enforcement(Enforcement::Gate)
        .enter()
        .unwrap();
    for (id, original) in &before.entry_points {
        assert!(Arc::ptr_eq(&implementation(id).unwrap(), original), "{id}");
    }
    active.exit().unwrap();
}

#[test]
#[serial]
fn test_failed_enter_rolls_back() {
    let root = sandbox_root();
    let foreign = Arc::new(PolicyGate::new(Arc::new(
        SandboxPolicy::new(root.path(), false).unwrap(),
    )));
    gate::arm(foreign).unwrap();
    let before = GlobalState::capture();

    let err = strict_scope(&root).enter().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyActive);
    before.assert_unchanged();
    assert!(!scope::is_active());

    assert!(gate::disarm());
}

// ============= Teardown Failure Tests =============

#[test]
#[serial]
fn test_tampering_is_reported_and_state_still_restored() {
    let before = GlobalState::capture();
    let root = sandbox_root();
    let active = strict_scope(&root).enter().unwrap();

    let intruder: EntryFn =
        Arc::new(|_subject: Subject<'_>, _args: &CallArgs| Ok(CallOutput::Sent));
    set_implementation(EntryPointId::new(Owner::Figure, "savefig"), intruder);
    assert!(gate::disarm());

    let err = active.exit().unwrap_err();
    match err {
        SandboxError::Teardown { failures } => {
            assert_eq!(failures.len(), 2, "{failures:?}");
            assert!(failures.iter().any(|f| f.contains("Figure.savefig")));
            assert!(failures.iter().any(|f| f.contains("interception gate")));
        }
        other => panic!("expected Teardown, got {other:?}"),
    }
    before.assert_unchanged();
}

// ============= Configuration Tests =============

#[test]
#[serial]
fn test_scope_from_config() {
    let root = sandbox_root();
    let config = SandboxConfig {
        root_directory: Some(root.path().to_path_buf()),
        tmp_exempt: false,
        enforcement: Enforcement::Gate,
        headless_backend: "svg".into(),
    };
    let scope = SandboxScope::from_config(&config).unwrap();
    assert_eq!(scope.enforcement(), Enforcement::Gate);
    assert!(scope.policy().exempt_tmp_directory().is_none());
    assert_eq!(
        scope.policy().root_directory(),
        std::fs::canonicalize(root.path()).unwrap()
    );

    let active = scope.enter().unwrap();
    assert_eq!(render::current().backend, "svg");
    active.exit().unwrap();
}
