//! Exit code and output contract of the `modelgate` binary.

#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const ABC_DIGEST: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

/// `{"size": 2}`, protocol 0.
const SIZE_DICT: &[u8] = b"(dp0\nVsize\np1\nI2\ns.";
/// `os.system("id")`, protocol 0.
const OS_SYSTEM: &[u8] = b"cos\nsystem\n(S'id'\ntR.";

fn modelgate() -> Command {
    let mut cmd = Command::cargo_bin("modelgate").unwrap();
    cmd.env_remove("MODELGATE_ROOT")
        .env_remove("MODELGATE_MANIFEST")
        .env_remove("MODELGATE_STRICT_INTEGRITY")
        .env_remove("MODELGATE_MAX_INPUT_BYTES");
    cmd
}

fn write(root: &Path, relative: &str, content: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn generate_manifest(root: &Path) {
    modelgate()
        .args(["manifest", "generate", "--root"])
        .arg(root)
        .assert()
        .success();
}

#[test]
fn test_hash_prints_digest_and_path() {
    let dir = tempdir().unwrap();
    write(dir.path(), "abc.bin", b"abc");

    modelgate()
        .arg("hash")
        .arg(dir.path().join("abc.bin"))
        .assert()
        .success()
        .stdout(predicate::str::starts_with(format!("{ABC_DIGEST}  ")))
        .stdout(predicate::str::contains("abc.bin"));
}

#[test]
fn test_hash_missing_file_exits_1() {
    modelgate()
        .args(["hash", "/nonexistent/model.pkl"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error: failed to hash"));
}

#[test]
fn test_manifest_generate_tracks_matching_files() {
    let dir = tempdir().unwrap();
    write(dir.path(), "beats/m.pkl", SIZE_DICT);
    write(dir.path(), "notes.txt", b"not a model");

    modelgate()
        .args(["manifest", "generate", "--output", "-", "--root"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"beats/m.pkl\""))
        .stdout(predicate::str::contains("notes.txt").not());

    generate_manifest(dir.path());
    let content = fs::read_to_string(dir.path().join("model_manifest.json")).unwrap();
    let manifest: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(manifest["algorithm"], "sha256");
    assert_eq!(manifest["models"].as_object().unwrap().len(), 1);
}

#[test]
fn test_verify_ok_then_tampered_exits_4() {
    let dir = tempdir().unwrap();
    write(dir.path(), "m.pkl", SIZE_DICT);
    generate_manifest(dir.path());
    let file = dir.path().join("m.pkl");

    modelgate()
        .arg("verify")
        .arg(&file)
        .arg("--root")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::starts_with("OK: verified m.pkl"));

    fs::write(&file, b"(dp0\nVsize\np1\nI3\ns.").unwrap();

    modelgate()
        .arg("verify")
        .arg(&file)
        .arg("--root")
        .arg(dir.path())
        .assert()
        .code(4)
        .stderr(predicate::str::contains("digest mismatch"));
}

#[test]
fn test_verify_json_and_strict_mode() {
    let dir = tempdir().unwrap();
    write(dir.path(), "m.pkl", SIZE_DICT);
    let file = dir.path().join("m.pkl");

    let output = modelgate()
        .args(["verify", "--json", "--root"])
        .arg(dir.path())
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success());
    let verdict: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(verdict["status"], "skipped_no_manifest");

    modelgate()
        .args(["verify", "--strict", "--root"])
        .arg(dir.path())
        .arg(&file)
        .assert()
        .code(4)
        .stderr(predicate::str::contains("cannot verify"));
}

#[test]
fn test_verify_missing_file_exits_1() {
    let dir = tempdir().unwrap();
    modelgate()
        .arg("verify")
        .arg(dir.path().join("missing.pkl"))
        .arg("--root")
        .arg(dir.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("model file not found"));
}

#[test]
fn test_inspect_prints_tree_and_json() {
    let dir = tempdir().unwrap();
    write(dir.path(), "m.pkl", SIZE_DICT);
    generate_manifest(dir.path());
    let file = dir.path().join("m.pkl");

    modelgate()
        .arg("inspect")
        .arg(&file)
        .arg("--root")
        .arg(dir.path())
        .assert()
        .success()
        .stdout("dict (1 entries)\n  size: int 2\n");

    let output = modelgate()
        .args(["inspect", "--json", "--root"])
        .arg(dir.path())
        .arg(&file)
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["type"], "dict");
    assert_eq!(value["value"][0][0]["value"], "size");
    assert_eq!(value["value"][0][1]["value"], 2);
}

#[test]
fn test_inspect_blocks_unsafe_type_exits_3() {
    let dir = tempdir().unwrap();
    write(dir.path(), "evil.pkl", OS_SYSTEM);
    let file = dir.path().join("evil.pkl");

    modelgate()
        .arg("inspect")
        .arg(&file)
        .arg("--root")
        .arg(dir.path())
        .assert()
        .code(3)
        .stderr(predicate::str::contains("blocked unsafe type os.system"));

    modelgate()
        .args(["inspect", "--unsafe", "--root"])
        .arg(dir.path())
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("object os.system"));
}

#[test]
fn test_inspect_reads_config_file() {
    let dir = tempdir().unwrap();
    write(dir.path(), "models/m.pkl", SIZE_DICT);
    let config = dir.path().join("modelgate.yaml");
    fs::write(&config, "root: models\nstrict_integrity: true\n").unwrap();

    modelgate()
        .arg("--config")
        .arg(&config)
        .arg("inspect")
        .arg(dir.path().join("models/m.pkl"))
        .assert()
        .code(4);

    fs::write(&config, "root: models\nunknown_key: 1\n").unwrap();
    modelgate()
        .arg("--config")
        .arg(&config)
        .arg("inspect")
        .arg(dir.path().join("models/m.pkl"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn test_malformed_manifest_exits_2() {
    let dir = tempdir().unwrap();
    write(dir.path(), "m.pkl", SIZE_DICT);
    write(dir.path(), "model_manifest.json", b"{\"models\": []}");

    modelgate()
        .arg("verify")
        .arg(dir.path().join("m.pkl"))
        .arg("--root")
        .arg(dir.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("malformed manifest"));
}
