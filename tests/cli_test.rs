use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn fe_waf() -> Command {
    Command::cargo_bin("fe-waf").unwrap()
}

fn write_config(extra: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[proxy]").unwrap();
    writeln!(file, "default_upstream = \"http://127.0.0.1:3000\"").unwrap();
    writeln!(file, "{extra}").unwrap();
    file
}

#[test]
fn rules_list_shows_builtin_ruleset() {
    fe_waf()
        .args(["rules", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sqli-union-select"))
        .stdout(predicate::str::contains("8 rule(s)"));
}

#[test]
fn rules_test_flags_script_tag_in_body() {
    fe_waf()
        .args(["rules", "test", "--body", "<script>alert(1)</script>"])
        .assert()
        .success()
        .stdout(predicate::str::contains("xss-script-tag"))
        .stdout(predicate::str::contains("XSS"));
}

#[test]
fn rules_test_passes_clean_request() {
    fe_waf()
        .args(["rules", "test", "--path", "/orders?page=2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No rule matched"));
}

#[test]
fn config_check_accepts_minimal_config() {
    let config = write_config("");
    fe_waf()
        .args(["config", "check", "--config"])
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Checking configuration"));
}

#[test]
fn config_check_rejects_missing_file() {
    fe_waf()
        .args(["config", "check", "--config", "/nonexistent/fe-waf.toml"])
        .assert()
        .failure();
}

#[test]
fn config_check_rejects_config_without_upstream() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[server]\nport = 8080").unwrap();
    fe_waf()
        .args(["config", "check", "--config"])
        .arg(file.path())
        .assert()
        .failure();
}

#[test]
fn detect_requires_a_log_file() {
    let config = write_config("");
    fe_waf()
        .args(["detect", "--config"])
        .arg(config.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("No audit log"));
}

#[test]
fn detect_handles_empty_log() {
    let log = tempfile::NamedTempFile::new().unwrap();
    let config = write_config("");
    fe_waf()
        .args(["detect", "--config"])
        .arg(config.path())
        .arg("--log-file")
        .arg(log.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No anomalies detected"));
}
