use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn prints_version() {
    Command::cargo_bin("teamchat-tui")
        .expect("binary built")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn prints_help() {
    Command::cargo_bin("teamchat-tui")
        .expect("binary built")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("teamchat-tui"))
        .stdout(predicate::str::contains("--version"))
        .stdout(predicate::str::contains("--write-config"));
}

#[cfg(target_os = "linux")]
#[test]
fn write_config_creates_file_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("teamchat-tui").join("config.yaml");

    Command::cargo_bin("teamchat-tui")
        .expect("binary built")
        .env("XDG_CONFIG_HOME", dir.path())
        .arg("--write-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("config.yaml"));
    let written = std::fs::read_to_string(&path).expect("config written");
    assert!(written.contains("post_list"));

    Command::cargo_bin("teamchat-tui")
        .expect("binary built")
        .env("XDG_CONFIG_HOME", dir.path())
        .arg("--write-config")
        .assert()
        .failure();
}
