//! CLI integration tests for infragraph
//!
//! Runs the binary end-to-end against throwaway databases and snapshots.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const AWS_SNAPSHOT: &str = r#"{
  "provider": "aws",
  "resources": [
    {"nativeId": "vpc-1", "resourceType": "vpc", "region": "us-east-1", "accountId": "111",
     "cidrBlock": "10.0.0.0/16"},
    {"nativeId": "i-1", "resourceType": "instance", "region": "us-east-1", "accountId": "111",
     "vpcId": "vpc-1", "state": "running", "costMonthly": 70.0}
  ]
}"#;

const GCP_SNAPSHOT: &str = r#"[
  {"nativeId": "net-1", "resourceType": "network", "projectId": "ml-prod", "ipCidrRange": "10.0.8.0/24"}
]"#;

const VPC_ID: &str = "aws:111:us-east-1:vpc:vpc-1";
const INSTANCE_ID: &str = "aws:111:us-east-1:instance:i-1";

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    fn db(&self) -> PathBuf {
        self.dir.path().join("graph.db")
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Command isolated from the user's config and database
    #[allow(deprecated)]
    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("infragraph").unwrap();
        cmd.env("INFRAGRAPH_CONFIG_DIR", self.dir.path().join("config"));
        cmd.env_remove("RUST_LOG");
        cmd.arg("--db").arg(self.db());
        cmd
    }

    fn sync(&self, pairs: &[(&str, &Path)]) -> assert_cmd::assert::Assert {
        let mut cmd = self.cmd();
        cmd.arg("sync");
        for (provider, snapshot) in pairs {
            cmd.args(["--provider", provider]).arg("--snapshot").arg(snapshot);
        }
        cmd.assert()
    }

    fn synced(&self) -> &Self {
        let aws = self.write("aws.json", AWS_SNAPSHOT);
        let gcp = self.write("gcp.json", GCP_SNAPSHOT);
        self.sync(&[("aws", &aws), ("gcp", &gcp)]).success();
        self
    }
}

fn stdout_json(assert: assert_cmd::assert::Assert) -> serde_json::Value {
    let output = assert.get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

#[test]
fn test_sync_single_provider() {
    let ws = Workspace::new();
    let aws = ws.write("aws.json", AWS_SNAPSHOT);

    ws.sync(&[("aws", &aws)])
        .success()
        .stdout(predicate::str::contains("aws: completed"))
        .stdout(predicate::str::contains("2 created"));

    assert!(ws.db().exists(), "database file should exist");
}

#[test]
fn test_sync_wave_and_cross_cloud_summary() {
    let ws = Workspace::new();
    let aws = ws.write("aws.json", AWS_SNAPSHOT);
    let gcp = ws.write("gcp.json", GCP_SNAPSHOT);

    ws.sync(&[("aws", &aws), ("gcp", &gcp)])
        .success()
        .stdout(predicate::str::contains("aws: completed"))
        .stdout(predicate::str::contains("gcp: completed"));

    ws.cmd()
        .arg("cross-cloud")
        .assert()
        .success()
        .stdout(predicate::str::contains("Cross-cloud edges: 1"))
        .stdout(predicate::str::contains("peers-with"));

    let summary = stdout_json(ws.cmd().args(["cross-cloud", "--format", "json"]).assert().success());
    assert_eq!(summary["totalEdges"], 1);
    assert_eq!(summary["averageConfidence"], 0.5);
}

#[test]
fn test_stats_json() {
    let ws = Workspace::new();
    ws.synced();

    let stats = stdout_json(ws.cmd().args(["stats", "--format", "json"]).assert().success());
    assert_eq!(stats["totalNodes"], 3);
    assert_eq!(stats["totalEdges"], 2);
    assert_eq!(stats["totalCostMonthly"], 70.0);
    assert!(stats["lastSyncAt"].is_string());
}

#[test]
fn test_blast_radius_lists_dependents() {
    let ws = Workspace::new();
    ws.synced();

    ws.cmd()
        .args(["blast-radius", VPC_ID, "--depth", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains(INSTANCE_ID))
        .stdout(predicate::str::contains("runs-in"));
}

#[test]
fn test_neighbors_respects_direction() {
    let ws = Workspace::new();
    ws.synced();

    ws.cmd()
        .args(["neighbors", INSTANCE_ID, "--direction", "upstream"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 nodes, 0 edges"));

    ws.cmd()
        .args(["neighbors", INSTANCE_ID, "--direction", "sideways"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown direction"));
}

#[test]
fn test_unknown_node_fails() {
    let ws = Workspace::new();
    ws.synced();

    ws.cmd()
        .args(["neighbors", "aws:111:us-east-1:instance:ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_timeline_shows_creation() {
    let ws = Workspace::new();
    ws.synced();

    ws.cmd()
        .args(["timeline", INSTANCE_ID])
        .assert()
        .success()
        .stdout(predicate::str::contains("node-created via sync"));
}

#[test]
fn test_unreadable_record_yields_partial_sync() {
    let ws = Workspace::new();
    let snapshot = ws.write(
        "aws.json",
        r#"[{"nativeId": "vpc-1", "resourceType": "vpc"}, {"nativeId": "x-1", "resourceType": "teapot"}]"#,
    );

    ws.sync(&[("aws", &snapshot)])
        .success()
        .stdout(predicate::str::contains("aws: partial"))
        .stdout(predicate::str::contains("teapot"));
}

#[test]
fn test_sync_rejects_unpaired_arguments() {
    let ws = Workspace::new();
    let aws = ws.write("aws.json", AWS_SNAPSHOT);

    ws.cmd()
        .args(["sync", "--provider", "aws", "--provider", "gcp", "--snapshot"])
        .arg(&aws)
        .assert()
        .failure()
        .stderr(predicate::str::contains("one snapshot per provider"));
}

#[test]
fn test_sync_rejects_mismatched_snapshot_provider() {
    let ws = Workspace::new();
    let aws = ws.write("aws.json", AWS_SNAPSHOT);

    ws.sync(&[("azure", &aws)])
        .failure()
        .stderr(predicate::str::contains("declares provider 'aws'"));
}

#[test]
fn test_history_lists_syncs() {
    let ws = Workspace::new();

    ws.cmd()
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("No syncs recorded yet."));

    ws.synced();
    ws.cmd()
        .args(["history", "--provider", "gcp"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gcp: completed"))
        .stdout(predicate::str::contains("aws:").not());
}

#[test]
fn test_config_path_honors_env() {
    let ws = Workspace::new();
    let expected = ws.dir.path().join("config").join("config.toml");

    ws.cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(expected.display().to_string()));
}
