//! Batch execution inside a sandbox scope.

use serial_test::serial;
use smolanalyst_sandbox::render::ShowOutcome;
use smolanalyst_sandbox::runner::{self, Batch, Step, StepOutput};
use smolanalyst_sandbox::{ErrorKind, SandboxPolicy, SandboxScope};
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir_in};

fn sandbox_root() -> TempDir {
    tempdir_in(env!("CARGO_TARGET_TMPDIR")).unwrap()
}

fn demo_batch() -> Batch {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/quarterly_report.json");
    Batch::load_from_file(&path).unwrap()
}

fn run_in(root: &TempDir, batch: &Batch) -> runner::BatchReport {
    SandboxScope::from_policy(SandboxPolicy::new(root.path(), false).unwrap())
        .run(|_| runner::execute(batch))
        .unwrap()
}

#[test]
#[serial]
fn test_demo_batch_runs_to_completion() {
    let root = sandbox_root();
    let report = run_in(&root, &demo_batch());
    assert!(report.succeeded(), "{report:?}");
    assert_eq!(report.outputs.len(), 6);

    let canonical = std::fs::canonicalize(root.path()).unwrap();
    assert_eq!(
        report.outputs[0],
        StepOutput::Written(canonical.join("sales.csv"))
    );
    assert!(matches!(&report.outputs[1], StepOutput::Text(md) if md.starts_with("| region |")));
    assert_eq!(report.outputs[4], StepOutput::Show(ShowOutcome::Suppressed));
    assert!(matches!(&report.outputs[5], StepOutput::Text(csv) if csv.contains("north,Q2,135")));

    assert!(root.path().join("regions.json").is_file());
    assert!(root.path().join("trend.svg").is_file());
}

#[test]
#[serial]
fn test_rerunning_batch_stops_at_overwrite() {
    let root = sandbox_root();
    let batch = demo_batch();
    assert!(run_in(&root, &batch).succeeded());

    let report = run_in(&root, &batch);
    let failure = report.failure.unwrap();
    assert_eq!(failure.index, 0);
    assert_eq!(failure.kind, ErrorKind::WouldOverwrite);
    assert!(failure.message.contains("sales.csv"));
    assert!(report.outputs.is_empty());
}

#[test]
#[serial]
fn test_denied_step_ends_batch() {
    let root = sandbox_root();
    let batch = Batch {
        steps: vec![
            Step::Write {
                path: PathBuf::from("notes.txt"),
                contents: "draft".into(),
            },
            Step::Remove {
                path: PathBuf::from("notes.txt"),
            },
            Step::Write {
                path: PathBuf::from("after.txt"),
                contents: "never written".into(),
            },
        ],
        ..Batch::default()
    };

    let report = run_in(&root, &batch);
    assert_eq!(report.outputs.len(), 1);
    let failure = report.failure.unwrap();
    assert_eq!(failure.index, 1);
    assert_eq!(failure.kind, ErrorKind::UnsupportedOperation);

    assert!(root.path().join("notes.txt").exists());
    assert!(!root.path().join("after.txt").exists());
}

#[test]
#[serial]
fn test_write_outside_root_is_reported() {
    let root = sandbox_root();
    let batch: Batch = serde_json::from_str(
        r#"{"steps": [{"op": "write", "path": "../escape.txt", "contents": "x"}]}"#,
    )
    .unwrap();

    let report = run_in(&root, &batch);
    assert_eq!(report.failure.unwrap().kind, ErrorKind::OutsideSandbox);
    assert!(!root.path().join("../escape.txt").exists());
}
