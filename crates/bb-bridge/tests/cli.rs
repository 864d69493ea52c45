mod common;

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use std::time::{Duration, Instant};

use bb_bridge::ORPHAN_EXIT_CODE;
use bb_types::{RunReport, RunState, HANDSHAKE_FILE_NAME};
use common::{config_text, shifted_sphere, spawn_evaluator};

fn optimizer(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bb-optimize"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap()
}

fn write_config(dir: &Path, text: &str) -> String {
    let path = dir.join("opt_config.txt");
    fs::write(&path, text).unwrap();
    path.display().to_string()
}

fn own_pid() -> String {
    std::process::id().to_string()
}

#[test]
fn missing_arguments_print_usage_and_exit_1() {
    let output = optimizer(&[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Usage"));

    let output = optimizer(&["config.txt", "not-a-pid"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn unreadable_config_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.txt");
    let output = optimizer(&[missing.to_str().unwrap(), &own_pid()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn unsupported_algorithm_exits_2_without_touching_handshake_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &config_text(dir.path(), "NelderMead", 10));

    let output = optimizer(&[&config, &own_pid()]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("NelderMead"));
    assert!(!dir.path().join(HANDSHAKE_FILE_NAME).exists());
}

#[test]
fn missing_handshake_directory_exits_2() {
    let dir = tempfile::tempdir().unwrap();
    let gone = dir.path().join("does-not-exist");
    let config = write_config(dir.path(), &config_text(&gone, "RBFopt", 10));

    let output = optimizer(&[&config, &own_pid()]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn full_run_publishes_result_and_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &config_text(dir.path(), "RBFopt", 20));
    let report_path = dir.path().join("report.json");
    let evaluator = spawn_evaluator(
        dir.path().join(HANDSHAKE_FILE_NAME),
        shifted_sphere,
        Duration::from_secs(120),
    );

    let output = optimizer(&[
        &config,
        &own_pid(),
        "--report",
        report_path.to_str().unwrap(),
    ]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let log = evaluator.join().unwrap();
    assert_eq!(log.requests.len(), 20);
    assert!(log.final_content.ends_with("OptiFinish"));

    let report: RunReport = serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report.state, RunState::Completed);
    let result = report.result.unwrap();
    assert_eq!(result.evaluations, 20);
    assert!(result.best_value <= shifted_sphere(&[1.5, 1.5]));
}

#[test]
fn malformed_objective_exits_3() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &config_text(dir.path(), "CMAES", 10));
    let handshake = dir.path().join(HANDSHAKE_FILE_NAME);

    let answer_garbage = std::thread::spawn({
        let handshake = handshake.clone();
        move || {
            use bb_bridge::{Attempt, HandshakeFile, Mailbox, Message, Sentinel, Snapshot};
            let file = HandshakeFile::new(&handshake);
            loop {
                if let Attempt::Ready(content) = file.fetch() {
                    if let Attempt::Ready(snapshot) = Snapshot::parse(&content) {
                        if snapshot.sentinel == Sentinel::DesignVarsWritten {
                            let bad = Message::response(0.0).render().replace('0', "zero");
                            fs::write(&handshake, bad).unwrap();
                            return;
                        }
                    }
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    });

    let output = optimizer(&[&config, &own_pid()]);
    answer_garbage.join().unwrap();
    assert_eq!(output.status.code(), Some(3));
}

#[cfg(unix)]
#[test]
fn optimizer_exits_once_parent_dies() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), &config_text(dir.path(), "RBFopt", 10));
    let mut parent = Command::new("sleep").arg("1").spawn().unwrap();
    let interval = Duration::from_millis(100);

    let parent_pid = parent.id().to_string();
    let interval_ms = interval.as_millis().to_string();

    // No evaluator answers, so only the watchdog can end this run.
    let mut optimizer = Command::new(env!("CARGO_BIN_EXE_bb-optimize"))
        .args([
            config.as_str(),
            parent_pid.as_str(),
            "--watchdog-interval-ms",
            interval_ms.as_str(),
        ])
        .env("RUST_LOG", "warn")
        .spawn()
        .unwrap();

    parent.wait().unwrap();
    let parent_gone = Instant::now();

    let status = loop {
        if let Some(status) = optimizer.try_wait().unwrap() {
            break status;
        }
        if parent_gone.elapsed() > Duration::from_secs(10) {
            optimizer.kill().unwrap();
            panic!("optimizer outlived its parent");
        }
        std::thread::sleep(Duration::from_millis(5));
    };

    assert_eq!(status.code(), Some(ORPHAN_EXIT_CODE));
    // One interval plus scheduling slack.
    assert!(parent_gone.elapsed() < interval * 5, "took {:?}", parent_gone.elapsed());
}
