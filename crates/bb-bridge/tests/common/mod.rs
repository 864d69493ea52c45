//! Evaluator side of the handshake, as an external process would run it.

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bb_bridge::{Attempt, HandshakeFile, Mailbox, Message, Sentinel, Snapshot};

pub fn shifted_sphere(x: &[f64]) -> f64 {
    (x[0] - 1.0).powi(2) + (x[1] - 1.0).powi(2)
}

pub fn config_text(dir: &Path, algorithm: &str, max_evaluations: usize) -> String {
    format!(
        "algorithm_name: {algorithm}\n\
         num_design_vars: 2\n\
         up_bounds: 3.0 3.0\n\
         low_bounds: 0.0 0.0\n\
         max_evaluations: {max_evaluations}\n\
         file_path: {}\n\
         seed: 2024\n",
        dir.display()
    )
}

/// What the evaluator saw before the optimizer published `OptiFinish`.
#[derive(Debug)]
pub struct EvaluatorLog {
    pub requests: Vec<Vec<f64>>,
    pub final_content: String,
}

/// Answer every `DVWritten` request with `objective` until `OptiFinish`.
pub fn spawn_evaluator(
    path: PathBuf,
    objective: fn(&[f64]) -> f64,
    deadline: Duration,
) -> JoinHandle<EvaluatorLog> {
    thread::spawn(move || {
        let file = HandshakeFile::new(path);
        let started = Instant::now();
        let mut requests = Vec::new();

        loop {
            assert!(started.elapsed() < deadline, "evaluator timed out");
            let content = match file.fetch() {
                Attempt::Ready(content) => content,
                Attempt::Retry(_) => {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
            };
            let snapshot = match Snapshot::parse(&content) {
                Attempt::Ready(snapshot) => snapshot,
                Attempt::Retry(_) => {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
            };

            match snapshot.sentinel {
                Sentinel::DesignVarsWritten => {
                    let x = snapshot.values().expect("well-formed request");
                    let reply = Message::response(objective(&x));
                    while !file.post(&reply).is_ready() {
                        thread::sleep(Duration::from_millis(1));
                    }
                    requests.push(x);
                }
                Sentinel::ObjectiveWritten => thread::sleep(Duration::from_millis(1)),
                Sentinel::OptimizationFinished => {
                    return EvaluatorLog {
                        requests,
                        final_content: content,
                    }
                }
            }
        }
    })
}
