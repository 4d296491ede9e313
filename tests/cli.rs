use assert_cmd::Command;
use chrono::Utc;
use kodegen_cluster_deploy::bundle::checksum::sidecar_line;
use kodegen_cluster_deploy::bundle::{BundleManifest, ImageEntry};
use predicates::prelude::*;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::Path;

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("kodegen_cluster_deploy").unwrap();
    cmd.env_remove("CLUSTER_ADMIN_PASSWORD").env("NO_COLOR", "1");
    cmd
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn write_bundle(dir: &Path) {
    let compose = b"services:\n  indexer-1:\n    image: docker.io/splunk/splunk:9.1.2\n";
    let archive = b"stand-in archive bytes";
    std::fs::write(dir.join("docker-compose.yml"), compose).unwrap();
    std::fs::write(dir.join("images.tar"), archive).unwrap();
    std::fs::write(
        dir.join("images.tar.sha256"),
        sidecar_line(&digest(archive), "images.tar"),
    )
    .unwrap();
    BundleManifest {
        schema_version: 1,
        created_at: Utc::now(),
        runtime_used: "docker".to_string(),
        compose_checksum: digest(compose),
        images: vec![ImageEntry {
            name: "docker.io/splunk/splunk:9.1.2".to_string(),
            digest: "sha256:2222".to_string(),
            image_id: None,
        }],
        files: BTreeMap::from([
            ("docker-compose.yml".to_string(), digest(compose)),
            ("images.tar".to_string(), digest(archive)),
        ]),
    }
    .save(dir)
    .unwrap();
}

#[test]
fn help_lists_every_command() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("deploy")
                .and(predicate::str::contains("teardown"))
                .and(predicate::str::contains("status"))
                .and(predicate::str::contains("detect"))
                .and(predicate::str::contains("logs"))
                .and(predicate::str::contains("bundle")),
        );
}

#[test]
fn unknown_size_class_is_a_usage_error() {
    cli()
        .args(["deploy", "--size", "huge"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unknown size class"));
}

#[test]
fn counts_with_a_fixed_class_are_rejected_before_anything_runs() {
    let project = tempfile::tempdir().unwrap();
    cli()
        .arg("-C")
        .arg(project.path())
        .args(["deploy", "--size", "large", "--indexers", "4"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Conflicting arguments"));
    assert_eq!(std::fs::read_dir(project.path()).unwrap().count(), 0);
}

#[test]
fn malformed_settings_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("cluster.toml");
    std::fs::write(&config, "[cluster]\nsize = \"small\"\nreplicas = 2\n").unwrap();
    cli()
        .arg("--config")
        .arg(&config)
        .args(["bundle", "verify"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("TOML error"));
}

#[test]
fn intact_bundle_verifies() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path());
    cli()
        .args(["bundle", "verify"])
        .arg(dir.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("Bundle verified: 2 files, 1 images"));
}

#[test]
fn tampered_bundle_names_the_file_and_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    write_bundle(dir.path());
    std::fs::write(dir.path().join("images.tar"), b"stand-in archive bytez").unwrap();

    cli()
        .args(["bundle", "verify", "--mirror", "https://mirror.internal/b"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(
            predicate::str::contains("images.tar: checksum mismatch")
                .and(predicate::str::contains("https://mirror.internal/b/images.tar"))
                .and(predicate::str::contains("do not edit manifest.json")),
        );
}

#[test]
fn directory_without_manifest_is_an_integrity_failure() {
    let dir = tempfile::tempdir().unwrap();
    cli()
        .args(["bundle", "verify"])
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no manifest.json"));
}
