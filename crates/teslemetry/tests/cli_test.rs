//! Integration tests for the `teslemetry` CLI binary.
//!
//! Argument parsing, config handling and error exit codes run offline. The
//! remaining tests point the binary at a wiremock server through a
//! temporary config file.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SITE_ID: u64 = 2_252_187_000_000_001;
const TOKEN_KEY: &str = "teslemetry_oauth2_token";

// ── Helpers ─────────────────────────────────────────────────────────

/// `teslemetry` with env isolation: no `TESLEMETRY_*` overrides and a home
/// directory that does not exist.
fn teslemetry_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("teslemetry");
    cmd.env("HOME", "/tmp/teslemetry-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/teslemetry-cli-test-nonexistent")
        .env("XDG_DATA_HOME", "/tmp/teslemetry-cli-test-nonexistent")
        .env_remove("TESLEMETRY_CONFIG")
        .env_remove("TESLEMETRY_OUTPUT")
        .env_remove("TESLEMETRY_API_URL")
        .env_remove("TESLEMETRY_STREAMING")
        .env_remove("TESLEMETRY_TOKEN_STORE")
        .env_remove("TESLEMETRY_SETTINGS_PATH")
        .env_remove("RUST_LOG");
    cmd
}

/// A config file whose settings live next to it and whose endpoints point at
/// `api_url`.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(api_url: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = dir.path().join("settings.json");
        std::fs::write(
            dir.path().join("config.toml"),
            format!(
                "api_url = '{api_url}'\n\
                 streaming = false\n\
                 poll_interval_secs = 3600\n\
                 settings_path = '{}'\n\
                 \n\
                 [oauth]\n\
                 token_url = '{api_url}/oauth/token'\n",
                settings.display()
            ),
        )
        .unwrap();
        Self { dir }
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    fn settings(&self) -> PathBuf {
        self.dir.path().join("settings.json")
    }

    fn store_token(&self) {
        let record = json!({
            TOKEN_KEY: {
                "access_token": "A",
                "refresh_token": "r",
                "token_type": "Bearer",
                "expires_in": 3600,
                "expires_at": "2099-01-01T00:00:00Z"
            }
        });
        std::fs::write(self.settings(), record.to_string()).unwrap();
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = teslemetry_cmd();
        cmd.arg("--config").arg(self.config());
        cmd
    }
}

fn read_json(path: &Path) -> Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

/// Run the binary off the async runtime so the mock server keeps serving.
async fn run(mut cmd: assert_cmd::Command) -> std::process::Output {
    tokio::task::spawn_blocking(move || cmd.output().unwrap())
        .await
        .unwrap()
}

async fn mount_products(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/1/products"))
        .and(header("authorization", "Bearer A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": [
                { "vin": "5YJ3E1EA7KF000001", "display_name": "Roadrunner", "state": "online" },
                { "vin": "5YJSA1E26JF000002", "display_name": "Old Faithful", "state": "asleep" },
                { "energy_site_id": SITE_ID, "site_name": "Home", "resource_type": "battery" },
                { "energy_site_id": 99, "site_name": "Shared", "resource_type": "solar" }
            ]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/1/metadata"))
        .and(header("authorization", "Bearer A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "vehicles": {
                "5YJ3E1EA7KF000001": { "access": true, "fleet_telemetry": "1.0.2" },
                "5YJSA1E26JF000002": { "access": true, "fleet_telemetry": false }
            },
            "energy_sites": { SITE_ID.to_string(): { "access": true }, "99": { "access": false } }
        })))
        .mount(server)
        .await;
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn no_args_shows_usage() {
    let output = teslemetry_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "expected usage text:\n{text}");
}

#[test]
fn help_lists_commands() {
    teslemetry_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("auth")
            .and(predicate::str::contains("products"))
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("set")),
    );
}

#[test]
fn version_flag() {
    teslemetry_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("teslemetry "));
}

#[test]
fn completions_bash() {
    teslemetry_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("teslemetry"));
}

#[test]
fn unknown_subcommand_is_a_usage_error() {
    teslemetry_cmd().arg("frobnicate").assert().code(2);
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn config_show_merges_file_over_defaults() {
    let ws = Workspace::new("https://api.example.com");

    let output = ws.cmd().args(["config", "show", "-o", "json"]).output().unwrap();
    assert!(output.status.success());

    let shown: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["api_url"], "https://api.example.com");
    assert_eq!(shown["streaming"], false);
    assert_eq!(shown["timeout_secs"], 30);
    assert_eq!(shown["token_store"], "file");
    assert_eq!(shown["oauth"]["client_id"], "homey");
    assert_eq!(shown["oauth"]["token_url"], "https://api.example.com/oauth/token");
}

#[test]
fn config_env_overrides_file() {
    let ws = Workspace::new("https://api.example.com");

    let output = ws
        .cmd()
        .env("TESLEMETRY_POLL_INTERVAL_SECS", "90")
        .args(["config", "show", "-o", "json"])
        .output()
        .unwrap();

    let shown: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["poll_interval_secs"], 90);
}

#[test]
fn config_init_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("nested").join("config.toml");

    teslemetry_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "init"])
        .assert()
        .success();
    assert!(config.exists());

    teslemetry_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "init"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("already"));

    teslemetry_cmd()
        .arg("--config")
        .arg(&config)
        .args(["config", "init", "--force"])
        .assert()
        .success();
}

#[test]
fn config_path_reports_settings_location() {
    let ws = Workspace::new("https://api.example.com");

    let output = ws.cmd().args(["config", "path", "-o", "json"]).output().unwrap();
    let paths: Value = serde_json::from_slice(&output.stdout).unwrap();

    assert_eq!(paths["config"], ws.config().display().to_string());
    assert_eq!(paths["settings"], ws.settings().display().to_string());
}

#[test]
fn invalid_config_fails_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "poll_interval_secs = 0\n").unwrap();

    teslemetry_cmd()
        .arg("--config")
        .arg(&config)
        .arg("products")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("poll_interval_secs"));
}

// ── Auth ────────────────────────────────────────────────────────────

#[test]
fn auth_status_without_token() {
    let ws = Workspace::new("https://api.example.com");

    let output = ws.cmd().args(["auth", "status", "-o", "json"]).output().unwrap();
    assert!(output.status.success());

    let status: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["authorized"], false);
    assert_eq!(status["valid"], false);
}

#[test]
fn auth_status_with_stored_token() {
    let ws = Workspace::new("https://api.example.com");
    ws.store_token();

    let output = ws.cmd().args(["auth", "status", "-o", "json"]).output().unwrap();
    let status: Value = serde_json::from_slice(&output.stdout).unwrap();

    assert_eq!(status["authorized"], true);
    assert_eq!(status["valid"], true);
    assert_eq!(status["refreshable"], true);
    assert_eq!(status["expires_at"], "2099-01-01T00:00:00Z");
}

#[test]
fn auth_logout_removes_the_record() {
    let ws = Workspace::new("https://api.example.com");
    ws.store_token();

    ws.cmd().args(["auth", "logout"]).assert().success();

    assert!(read_json(&ws.settings()).get(TOKEN_KEY).is_none());
}

#[test]
fn products_without_token_exits_with_auth_code() {
    let ws = Workspace::new("https://api.example.com");

    ws.cmd()
        .arg("products")
        .assert()
        .code(3)
        .stderr(predicate::str::contains("login"));
}

#[test]
fn unknown_action_fails_before_connecting() {
    let ws = Workspace::new("https://api.example.com");

    ws.cmd()
        .args(["action", "5YJ3E1EA7KF000001", "launch"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("launch"));
}

// ── Against a mocked API ────────────────────────────────────────────

#[tokio::test]
async fn products_lists_the_catalog() {
    let server = MockServer::start().await;
    mount_products(&server).await;
    let ws = Workspace::new(&server.uri());
    ws.store_token();

    let mut cmd = ws.cmd();
    cmd.args(["products", "-o", "json-compact"]);
    let output = run(cmd).await;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let listed: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        listed,
        json!([
            { "kind": "vehicle", "id": "5YJ3E1EA7KF000001", "name": "Roadrunner", "detail": "online" },
            { "kind": "energy_site", "id": SITE_ID.to_string(), "name": "Home", "detail": "battery" }
        ])
    );
}

#[tokio::test]
async fn products_all_includes_unbridgeable() {
    let server = MockServer::start().await;
    mount_products(&server).await;
    let ws = Workspace::new(&server.uri());
    ws.store_token();

    let mut cmd = ws.cmd();
    cmd.args(["products", "--all", "-o", "json-compact"]);
    let output = run(cmd).await;
    assert!(output.status.success());

    let listed: Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<&str> = listed
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["5YJ3E1EA7KF000001", "5YJSA1E26JF000002", "2252187000000001", "99"]);
}

#[tokio::test]
async fn auth_refresh_persists_the_new_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "B",
            "refresh_token": "r2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;
    let ws = Workspace::new(&server.uri());
    ws.store_token();

    let mut cmd = ws.cmd();
    cmd.args(["auth", "refresh"]);
    let output = run(cmd).await;
    assert!(output.status.success());

    let stored = read_json(&ws.settings());
    assert_eq!(stored[TOKEN_KEY]["access_token"], "B");
    assert_eq!(stored[TOKEN_KEY]["refresh_token"], "r2");
}

#[tokio::test]
async fn set_site_backup_reserve_sends_percent() {
    let server = MockServer::start().await;
    mount_products(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("/api/1/energy_sites/{SITE_ID}/site_info")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": {
                "site_name": "Home",
                "backup_reserve_percent": 20,
                "default_real_mode": "self_consumption",
                "components": { "battery": true, "grid": true, "backup": true }
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/1/energy_sites/{SITE_ID}/live_status")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "percentage_charged": 50.0, "grid_status": "Active" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/api/1/energy_sites/{SITE_ID}/backup")))
        .and(body_json(json!({ "backup_reserve_percent": 35 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "code": 201, "message": "Updated" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    let ws = Workspace::new(&server.uri());
    ws.store_token();

    let mut cmd = ws.cmd();
    cmd.args(["--color", "never", "set", "site", &SITE_ID.to_string(), "backup_reserve", "0.35"]);
    let output = run(cmd).await;

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stderr).contains("backup_reserve = 0.35"));
}

#[tokio::test]
async fn set_site_unknown_capability_is_unsupported() {
    let server = MockServer::start().await;
    mount_products(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("/api/1/energy_sites/{SITE_ID}/site_info")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "response": { "site_name": "Home", "components": { "battery": true } }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/1/energy_sites/{SITE_ID}/live_status")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
        .mount(&server)
        .await;
    let ws = Workspace::new(&server.uri());
    ws.store_token();

    let mut cmd = ws.cmd();
    cmd.args(["set", "site", &SITE_ID.to_string(), "measure_power", "1"]);
    let output = run(cmd).await;

    assert_eq!(output.status.code(), Some(5));
}
