use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn tandem(root: &Path) -> Command {
    let mut cmd = Command::cargo_bin("tandem").unwrap();
    cmd.current_dir(root);
    cmd
}

fn init(root: &Path) {
    tandem(root).arg("init").assert().success();
}

fn json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

#[test]
fn init_creates_workspace() {
    let dir = tempfile::tempdir().unwrap();
    tandem(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized Tandem workspace"));

    assert!(dir.path().join(".tandem/config.toml").exists());
    assert!(dir.path().join(".tandem/tandem.db").exists());

    // A second init keeps the existing config.
    tandem(dir.path()).arg("init").assert().success();
}

#[test]
fn uninitialized_workspace_exits_with_3() {
    let dir = tempfile::tempdir().unwrap();
    tandem(dir.path())
        .arg("status")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("tandem init"));
}

#[test]
fn second_edit_of_same_file_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    init(dir.path());

    let first = json(tandem(dir.path()).args(["op", "edit", "--agent", "agent-a", "--file", "a.txt"]));
    assert_eq!(first["vertexId"], 1);
    assert_eq!(first["conflicts"].as_array().unwrap().len(), 0);

    let second = json(tandem(dir.path()).args(["op", "edit", "--agent", "agent-b", "--file", "a.txt"]));
    assert_eq!(second["vertexId"], 2);
    let conflicts = second["conflicts"].as_array().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0]["severity"], 3);
    assert_eq!(conflicts[0]["resolutionStrategy"], "manual_resolution");
    assert_eq!(conflicts[0]["conflictingFiles"][0], "a.txt");

    // Re-checking the stored vertex in a fresh process gives the same answer.
    let report = json(tandem(dir.path()).args(["conflicts", "--vertex", "2"]));
    assert_eq!(report["conflicts"].as_array().unwrap().len(), 1);

    let tips = json(tandem(dir.path()).arg("tips"));
    assert_eq!(tips["tips"], serde_json::json!([2]));
}

#[test]
fn proposed_operation_on_disjoint_files_is_clean() {
    let dir = tempfile::tempdir().unwrap();
    init(dir.path());
    tandem(dir.path())
        .args(["op", "edit", "--agent", "agent-a", "--file", "a.txt"])
        .assert()
        .success();

    let report = json(tandem(dir.path()).args([
        "conflicts", "--kind", "edit", "--agent", "agent-b", "--file", "b.txt",
    ]));
    assert_eq!(report["conflicts"].as_array().unwrap().len(), 0);

    // A proposal is never inserted.
    let status = json(tandem(dir.path()).arg("status"));
    assert_eq!(status["stats"]["vertices"], 1);
}

#[test]
fn empty_agent_is_rejected_with_5() {
    let dir = tempfile::tempdir().unwrap();
    init(dir.path());
    tandem(dir.path())
        .args(["op", "edit", "--agent", "", "--file", "a.txt"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("Invalid operation"));
}

#[test]
fn duplicate_agent_exits_with_5() {
    let dir = tempfile::tempdir().unwrap();
    init(dir.path());

    let record = json(tandem(dir.path()).args(["agent", "register", "alpha", "-c", "rust"]));
    assert_eq!(record["agentId"], "alpha");

    // Same capabilities are idempotent.
    tandem(dir.path())
        .args(["agent", "register", "alpha", "-c", "rust"])
        .assert()
        .success();

    tandem(dir.path())
        .args(["agent", "register", "alpha", "-c", "python"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("Duplicate agent"));

    let agents = json(tandem(dir.path()).args(["agent", "list"]));
    assert_eq!(agents.as_array().unwrap().len(), 1);

    let removed = json(tandem(dir.path()).args(["agent", "remove", "alpha"]));
    assert_eq!(removed["removed"], true);
}

#[test]
fn trajectory_flow_across_invocations() {
    let dir = tempfile::tempdir().unwrap();
    init(dir.path());

    let started = json(tandem(dir.path()).args(["trajectory", "start", "build feature X"]));
    assert!(started["trajectoryId"].is_string());

    tandem(dir.path())
        .args(["trajectory", "start", "another task"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("Trajectory already open"));

    for file in ["src/lib.rs", "src/main.rs"] {
        tandem(dir.path())
            .args(["op", "edit", "--agent", "alpha", "--file", file])
            .assert()
            .success();
        tandem(dir.path())
            .args(["trajectory", "add"])
            .assert()
            .success();
    }
    tandem(dir.path())
        .args(["op", "commit", "--agent", "alpha", "--file", "src/lib.rs"])
        .assert()
        .success();
    let step = json(tandem(dir.path()).args(["trajectory", "add"]));
    assert_eq!(step["totalOperations"], 3);

    let finalized = json(tandem(dir.path()).args([
        "trajectory", "finalize", "0.9", "--critique", "smooth run",
    ]));
    assert_eq!(finalized["state"], "closed");

    let stats = json(tandem(dir.path()).arg("learning-stats"));
    assert_eq!(stats["totalTrajectories"], 1);
    assert!(stats["openTrajectory"].is_null());

    let patterns = json(tandem(dir.path()).arg("patterns"));
    let patterns = patterns.as_array().unwrap();
    assert!(!patterns.is_empty());
    assert!(patterns.iter().all(|p| p["observations"] == 1));

    let suggestion = json(tandem(dir.path()).args(["suggest", "build feature Y"]));
    assert_eq!(suggestion["source"], "similar_trajectories");

    let similar = json(tandem(dir.path()).args(["trajectories", "feature X"]));
    assert_eq!(similar.as_array().unwrap().len(), 1);

    let reset = json(tandem(dir.path()).arg("reset-learning"));
    assert_eq!(reset["totalTrajectories"], 0);
    assert_eq!(reset["totalPatterns"], 0);
}

#[test]
fn finalize_without_open_trajectory_exits_with_5() {
    let dir = tempfile::tempdir().unwrap();
    init(dir.path());
    tandem(dir.path())
        .args(["trajectory", "finalize", "0.5"])
        .assert()
        .code(5)
        .stderr(predicate::str::contains("No trajectory is open"));
}
