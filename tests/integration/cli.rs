//! Binary-level smoke tests.
use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_describes_the_flags() {
    Command::cargo_bin("bindkit")
        .expect("binary builds")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--minimized"))
        .stdout(predicate::str::contains("--scripts-dir"));
}

#[test]
fn version_prints() {
    Command::cargo_bin("bindkit")
        .expect("binary builds")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("bindkit"));
}

#[test]
fn unknown_flags_are_rejected() {
    Command::cargo_bin("bindkit")
        .expect("binary builds")
        .arg("--definitely-not-a-flag")
        .assert()
        .failure();
}
