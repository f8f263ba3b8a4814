//! The `hotreload` binary driven as the server would drive it.

use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use hotreload_core::paths::{staged_package_path, DIAGNOSTIC_STATUS_ROUTE};
use hotreload_core::Settings;
use hotreload_package::{build_and_stage, compute_digest, InclusionPolicy};

struct Workspace {
    tmp: TempDir,
    config: PathBuf,
}

fn hotreload_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_hotreload"))
}

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    listener.local_addr().expect("local addr").port()
}

fn seed_tree(root: &Path, main_rs: &str) {
    fs::create_dir_all(root.join("src")).expect("create src");
    fs::write(root.join("Cargo.toml"), "[package]\nname = \"svc\"\n").expect("write manifest");
    fs::write(root.join("Cargo.lock"), "version = 3\n").expect("write lock");
    fs::write(root.join("src/main.rs"), main_rs).expect("write main");
    fs::write(root.join("src/lib.rs"), "pub fn v() {}\n").expect("write lib");
}

impl Workspace {
    fn new(diagnostic_port: u16) -> Workspace {
        let tmp = TempDir::new().expect("tempdir");
        seed_tree(&tmp.path().join("source"), "fn main() { /* v2 */ }\n");
        seed_tree(&tmp.path().join("app"), "fn main() { /* v1 */ }\n");

        let config = tmp.path().join("hotreload.yaml");
        fs::write(
            &config,
            format!(
                "app_dir: app\n\
                 state_dir: state\n\
                 host: 127.0.0.1\n\
                 port: {}\n\
                 diagnostic_port: {diagnostic_port}\n\
                 hot_reload:\n  \
                   shutdown_timeout_secs: 1\n  \
                   restart_timeout_secs: 1\n  \
                   diagnostic_grace_ms: 200\n\
                 commands:\n  \
                   install: null\n  \
                   build: null\n  \
                   start: [\"true\"]\n",
                free_port()
            ),
        )
        .expect("write config");
        Workspace { tmp, config }
    }

    fn settings(&self) -> Settings {
        Settings::load_at(&self.config).expect("load settings")
    }

    /// Build from `source/` into the staging slot; returns (package, digest).
    fn stage(&self) -> (PathBuf, String) {
        let settings = self.settings();
        let staged = staged_package_path(&settings.state_dir());
        let built = build_and_stage(
            &self.tmp.path().join("source"),
            &InclusionPolicy::from_settings(&settings.package),
            &staged,
        )
        .expect("stage package");
        (staged, built.digest.as_str().to_string())
    }

    fn log_path(&self) -> PathBuf {
        self.tmp.path().join("state/logs/hot-reload-cli.log")
    }

    fn relaunch(&self, package: &Path, digest: &str) -> Command {
        let log = self.log_path();
        fs::create_dir_all(log.parent().expect("log dir")).expect("create log dir");
        fs::write(&log, "hot reload admitted\n").expect("seed log");
        let mut cmd = hotreload_cmd();
        cmd.arg("relaunch")
            .arg("--config")
            .arg(&self.config)
            .arg("--package")
            .arg(package)
            .arg("--digest")
            .arg(digest)
            .arg("--log")
            .arg(&log);
        cmd
    }

    fn log_text(&self) -> String {
        fs::read_to_string(self.log_path()).expect("read session log")
    }

    fn app_main(&self) -> String {
        fs::read_to_string(self.tmp.path().join("app/src/main.rs")).expect("read app main")
    }
}

fn http_get(port: u16, path: &str) -> Option<(u16, String)> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).ok()?;
    stream.set_read_timeout(Some(Duration::from_secs(2))).ok()?;
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).ok()?;
    let mut raw = String::new();
    stream.read_to_string(&mut raw).ok()?;
    let (head, body) = raw.split_once("\r\n\r\n")?;
    let code = head.split_whitespace().nth(1)?.parse().ok()?;
    Some((code, body.to_string()))
}

fn wait_until<F>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        sleep(Duration::from_millis(100));
    }
    false
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

#[test]
fn missing_package_argument_exits_one_and_logs_fatal() {
    let ws = Workspace::new(0);
    let log = ws.log_path();
    fs::create_dir_all(log.parent().expect("log dir")).expect("create log dir");

    hotreload_cmd()
        .arg("relaunch")
        .arg("--config")
        .arg(&ws.config)
        .arg("--log")
        .arg(&log)
        .assert()
        .code(1);

    let text = ws.log_text();
    assert!(
        text.contains("FATAL relaunch refused: missing required argument --package"),
        "{text}"
    );
}

#[test]
fn relaunch_is_hidden_from_help() {
    hotreload_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("push"))
        .stdout(contains("relaunch").not());
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[test]
fn digest_mismatch_fails_safely_without_touching_the_app() {
    let ws = Workspace::new(0);
    let (package, _) = ws.stage();

    ws.relaunch(&package, "deadbeef").assert().code(1);

    let text = ws.log_text();
    assert!(text.contains("digest mismatch"), "{text}");
    assert!(text.contains("restarting the previous server"), "{text}");
    assert!(text.contains("relaunch supervisor exiting with code 1"), "{text}");
    assert_eq!(ws.app_main(), "fn main() { /* v1 */ }\n");
}

#[test]
fn test_mode_session_writes_nothing_and_exits_zero() {
    let ws = Workspace::new(0);
    let (package, digest) = ws.stage();

    ws.relaunch(&package, &digest).arg("--test").assert().success();

    let text = ws.log_text();
    assert!(text.contains("[test] would write: "), "{text}");
    assert!(text.contains("relaunch supervisor exiting with code 0"), "{text}");
    assert_eq!(ws.app_main(), "fn main() { /* v1 */ }\n");
}

#[test]
fn failed_write_hangs_and_serves_the_log_on_the_diagnostic_port() {
    let port = free_port();
    let ws = Workspace::new(port);
    let (package, digest) = ws.stage();
    let blocked = ws.tmp.path().join("app/src/lib.rs");
    fs::remove_file(&blocked).expect("remove lib.rs");
    fs::create_dir_all(blocked.join("occupied")).expect("block lib.rs");

    let mut child = ws
        .relaunch(&package, &digest)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn relaunch");

    let mut last_body = String::new();
    let held = wait_until(Duration::from_secs(15), || {
        match http_get(port, DIAGNOSTIC_STATUS_ROUTE) {
            Some((200, body)) => {
                last_body = body;
                last_body.contains("FATAL no server will be started")
            }
            _ => false,
        }
    });
    let still_running = matches!(child.try_wait(), Ok(None));
    let other_route = http_get(port, "/api/ping");
    let status = hotreload_cmd()
        .arg("status")
        .arg("--config")
        .arg(&ws.config)
        .arg("--url")
        .arg(format!("http://127.0.0.1:{port}"))
        .env_remove("HOTRELOAD_TOKEN")
        .output()
        .expect("run status");
    let _ = child.kill();
    let _ = child.wait();

    assert!(held, "diagnostic listener never reported the hold: {last_body}");
    assert!(last_body.starts_with("[RELAUNCH]\n"), "{last_body}");
    assert!(last_body.contains(" ERROR write failed:"), "{last_body}");
    assert!(still_running, "supervisor must not exit after modifying the app");
    assert_eq!(other_route.map(|(code, _)| code), Some(503));
    assert_eq!(ws.app_main(), "fn main() { /* v2 */ }\n");

    let printed = String::from_utf8_lossy(&status.stdout);
    assert!(status.status.success(), "{}", String::from_utf8_lossy(&status.stderr));
    assert!(printed.starts_with("[RELAUNCH]\n"), "{printed}");
    assert!(printed.contains("FATAL no server will be started"), "{printed}");
}

#[test]
fn local_status_is_labelled_as_read_from_disk() {
    let ws = Workspace::new(0);
    hotreload_cmd()
        .arg("status")
        .arg("--config")
        .arg(&ws.config)
        .arg("--local")
        .assert()
        .success()
        .stdout(contains("[LOCAL]\nno hot-reload session has run yet"));
}

// ---------------------------------------------------------------------------
// Package builds
// ---------------------------------------------------------------------------

#[test]
fn package_build_stages_and_reports_digest() {
    let ws = Workspace::new(0);
    let assert = hotreload_cmd()
        .arg("package")
        .arg("build")
        .arg("--config")
        .arg(&ws.config)
        .arg("--source")
        .arg(ws.tmp.path().join("source"))
        .arg("--list")
        .assert()
        .success()
        .stdout(contains("src/main.rs"))
        .stdout(contains("Cargo.lock"));
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");

    let staged = staged_package_path(&ws.settings().state_dir());
    let bytes = fs::read(&staged).expect("staged package");
    let digest = compute_digest(&bytes);
    assert!(stdout.contains(digest.as_str()), "{stdout}");
}

#[test]
fn package_build_without_required_file_fails() {
    let ws = Workspace::new(0);
    fs::remove_file(ws.tmp.path().join("source/Cargo.lock")).expect("remove lock");

    hotreload_cmd()
        .arg("package")
        .arg("build")
        .arg("--config")
        .arg(&ws.config)
        .arg("--source")
        .arg(ws.tmp.path().join("source"))
        .assert()
        .failure()
        .stderr(contains("Cargo.lock"));
}
