#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::json;
use serial_test::serial;

struct TestEnv {
    home: PathBuf,
}

static COMMAND_SEQ: AtomicU64 = AtomicU64::new(0);

impl TestEnv {
    fn new(prefix: &str) -> Self {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock failure")
            .as_nanos();
        let home = std::env::temp_dir().join(format!("svcgroup-e2e-{prefix}-{nonce}"));
        fs::create_dir_all(&home).expect("failed to create temporary home");

        Self { home }
    }

    fn run(&self, args: &[&str]) -> Output {
        let command_id = COMMAND_SEQ.fetch_add(1, Ordering::Relaxed);
        let stdout_path = self.home.join(format!("cmd-{command_id}.stdout.log"));
        let stderr_path = self.home.join(format!("cmd-{command_id}.stderr.log"));

        let mut child = self.spawn(args, &stdout_path, &stderr_path);

        let timeout = Duration::from_secs(60);
        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => {
                    let status = child.wait().expect("failed to wait for svcgroup command");
                    return read_command_output(status, &stdout_path, &stderr_path);
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let status = child
                            .wait()
                            .expect("failed to wait for timed out svcgroup command");
                        let output = read_command_output(status, &stdout_path, &stderr_path);
                        panic!(
                            "svcgroup command timed out after {:?}: {:?}\nstdout:\n{}\nstderr:\n{}",
                            timeout,
                            args,
                            String::from_utf8_lossy(&output.stdout),
                            String::from_utf8_lossy(&output.stderr)
                        );
                    }
                    sleep(Duration::from_millis(100));
                }
                Err(err) => {
                    panic!("failed while waiting for svcgroup command {:?}: {err}", args);
                }
            }
        }
    }

    fn spawn(&self, args: &[&str], stdout_path: &Path, stderr_path: &Path) -> Child {
        let bin = env!("CARGO_BIN_EXE_svcgroup");
        let stdout_file = fs::File::create(stdout_path).expect("failed to create stdout capture");
        let stderr_file = fs::File::create(stderr_path).expect("failed to create stderr capture");

        Command::new(bin)
            .args(args)
            .env("SVCGROUP_HOME", &self.home)
            .env("SVCGROUP_STARTUP_TIMEOUT_SECS", "30")
            .env("SVCGROUP_STOP_TIMEOUT_SECS", "2")
            .env("SVCGROUP_WATCH_DELAY_MS", "100")
            .env("SVCGROUP_ENABLE_HARD_STOP", "1")
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .spawn()
            .expect("failed to spawn svcgroup command")
    }

    fn write_group_file(&self, payload: &serde_json::Value) -> PathBuf {
        let path = self.home.join("group.json");
        fs::write(
            &path,
            serde_json::to_string_pretty(payload).expect("failed to serialize group fixture"),
        )
        .expect("failed to write group fixture");
        path
    }

    fn shared_flag(&self, index: usize, flag: &str) -> PathBuf {
        self.home.join("sharedmem").join(index.to_string()).join(flag)
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.home);
    }
}

fn read_command_output(status: ExitStatus, stdout_path: &Path, stderr_path: &Path) -> Output {
    let stdout = fs::read(stdout_path).expect("failed to read captured stdout");
    let stderr = fs::read(stderr_path).expect("failed to read captured stderr");
    let _ = fs::remove_file(stdout_path);
    let _ = fs::remove_file(stderr_path);

    Output {
        status,
        stdout,
        stderr,
    }
}

fn should_run_e2e(test_name: &str) -> bool {
    if std::env::var("SVCGROUP_RUN_E2E").ok().as_deref() == Some("1") {
        true
    } else {
        eprintln!("skipping {test_name} (set SVCGROUP_RUN_E2E=1 to run)");
        false
    }
}

fn wait_until<F>(timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        sleep(Duration::from_millis(150));
    }
    predicate()
}

fn output_contains(output: &Output, needle: &str) -> bool {
    String::from_utf8_lossy(&output.stdout).contains(needle)
        || String::from_utf8_lossy(&output.stderr).contains(needle)
}

/// Service that reports operational and exits cleanly on a stop request.
fn cooperative_command() -> String {
    "sh -c 'd=\"$SVCGROUP_SHARED_DIR/$SVCGROUP_PROCESS_INDEX\"; \
     : > \"$d/operational\"; \
     while [ ! -f \"$d/stop.request\" ]; do sleep 0.05; done; \
     exit 0'"
        .to_string()
}

#[test]
#[serial]
fn e2e_run_stops_on_external_hard_stop_request() {
    if !should_run_e2e("e2e_run_stops_on_external_hard_stop_request") {
        return;
    }

    let env = TestEnv::new("hard-stop");
    env.write_group_file(&json!({
        "processes": [
            { "key": "web", "command": cooperative_command() },
            { "key": "worker", "command": cooperative_command() }
        ]
    }));

    let stdout_path = env.home.join("run.stdout.log");
    let stderr_path = env.home.join("run.stderr.log");
    let mut supervisor = env.spawn(&["run"], &stdout_path, &stderr_path);

    let operational = wait_until(Duration::from_secs(30), || {
        env.shared_flag(1, "operational").exists() && env.shared_flag(2, "operational").exists()
    });
    if !operational {
        let _ = supervisor.kill();
        let _ = supervisor.wait();
        panic!(
            "group never became operational\nstderr:\n{}",
            fs::read_to_string(&stderr_path).unwrap_or_default()
        );
    }

    // the supervisor's own record (index 0) is the hard stop channel
    fs::write(env.shared_flag(0, "stop.request"), b"")
        .expect("failed to raise hard stop request");

    let stopped = wait_until(Duration::from_secs(30), || {
        supervisor
            .try_wait()
            .expect("failed to poll supervisor")
            .is_some()
    });
    if !stopped {
        let _ = supervisor.kill();
        let _ = supervisor.wait();
        panic!(
            "supervisor did not exit after hard stop request\nstderr:\n{}",
            fs::read_to_string(&stderr_path).unwrap_or_default()
        );
    }

    let status = supervisor.wait().expect("failed to wait for supervisor");
    assert!(
        status.success(),
        "supervisor exited with failure: {status:?}\nstderr:\n{}",
        fs::read_to_string(&stderr_path).unwrap_or_default()
    );
}

#[test]
#[serial]
fn e2e_run_fails_when_a_process_cannot_launch() {
    if !should_run_e2e("e2e_run_fails_when_a_process_cannot_launch") {
        return;
    }

    let env = TestEnv::new("broken-launch");
    env.write_group_file(&json!({
        "processes": [
            { "key": "web", "command": cooperative_command() },
            { "key": "ghost", "command": "/nonexistent/svcgroup-e2e-binary" }
        ]
    }));

    let output = env.run(&["run"]);
    assert!(
        !output.status.success(),
        "run unexpectedly succeeded with a broken process"
    );
    assert!(
        output_contains(&output, "ghost"),
        "expected failure output to name the broken process\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
#[serial]
fn e2e_validate_reports_group_summary() {
    if !should_run_e2e("e2e_validate_reports_group_summary") {
        return;
    }

    let env = TestEnv::new("validate");
    let path = env.write_group_file(&json!({
        "processes": [
            { "key": "db", "command": "sh -c 'sleep 1'" },
            { "key": "api", "command": "sh -c 'sleep 1'" }
        ]
    }));

    let output = env.run(&["validate", &path.to_string_lossy()]);
    assert!(
        output.status.success(),
        "validate failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Group definition: OK") && stdout.contains("Processes: 2"),
        "unexpected validate output:\n{stdout}"
    );
    assert!(
        stdout.contains("1. db") && stdout.contains("2. api"),
        "expected ordered process listing:\n{stdout}"
    );
}

#[test]
#[serial]
fn e2e_validate_rejects_duplicate_keys() {
    if !should_run_e2e("e2e_validate_rejects_duplicate_keys") {
        return;
    }

    let env = TestEnv::new("validate-dup");
    let path = env.write_group_file(&json!({
        "processes": [
            { "key": "api", "command": "sh -c 'sleep 1'" },
            { "key": "api", "command": "sh -c 'sleep 1'" }
        ]
    }));

    let output = env.run(&["validate", &path.to_string_lossy()]);
    assert!(
        !output.status.success(),
        "validate unexpectedly succeeded for duplicate keys"
    );
    assert!(
        output_contains(&output, "duplicate"),
        "unexpected validate failure output\nstdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}
