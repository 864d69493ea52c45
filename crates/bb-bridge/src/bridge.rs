//! Optimizer side of the file handshake.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, trace};

use bb_optimizer::Objective;
use bb_types::{BbResult, OptimizerSpec, ProtocolError};

use crate::handshake::{parse_response, Attempt, FinalResult, HandshakeFile, Mailbox, Message};

/// Sleep schedule between retries of a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(50),
        }
    }
}

impl PollBackoff {
    /// Retry without sleeping; only yields the thread.
    pub fn immediate() -> Self {
        Self {
            initial: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    fn start(&self) -> Backoff {
        Backoff {
            next: self.initial,
            max: self.max,
        }
    }
}

struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    fn wait(&mut self) {
        if self.next.is_zero() {
            thread::yield_now();
            return;
        }
        thread::sleep(self.next);
        self.next = (self.next * 2).min(self.max);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub handshake_path: PathBuf,
    pub backoff: PollBackoff,
}

impl BridgeConfig {
    pub fn new(handshake_path: impl Into<PathBuf>) -> Self {
        Self {
            handshake_path: handshake_path.into(),
            backoff: PollBackoff::default(),
        }
    }

    pub fn from_spec(spec: &OptimizerSpec) -> Self {
        Self::new(spec.handshake_path())
    }

    pub fn with_backoff(mut self, backoff: PollBackoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Presents an external evaluator as an [`Objective`].
///
/// Each evaluation posts a `DVWritten` request and then polls until the
/// evaluator answers with `ObjWritten`. Transient failures (lock held, file
/// missing, partial content, not our turn) are retried indefinitely; only a
/// non-numeric objective under `ObjWritten` is surfaced as an error.
/// Termination of a stuck wait is left to the parent watchdog.
pub struct BlackboxBridge<M = HandshakeFile> {
    mailbox: M,
    backoff: PollBackoff,
    requests: usize,
}

impl BlackboxBridge<HandshakeFile> {
    pub fn new(config: BridgeConfig) -> Self {
        info!(path = %config.handshake_path.display(), "Using handshake file");
        Self::with_mailbox(HandshakeFile::new(config.handshake_path), config.backoff)
    }
}

impl<M: Mailbox> BlackboxBridge<M> {
    pub fn with_mailbox(mailbox: M, backoff: PollBackoff) -> Self {
        Self {
            mailbox,
            backoff,
            requests: 0,
        }
    }

    pub fn mailbox(&self) -> &M {
        &self.mailbox
    }

    /// Number of requests posted so far.
    pub fn requests(&self) -> usize {
        self.requests
    }

    /// Ask the evaluator for the objective at `vars` and block until it answers.
    pub fn evaluate(&mut self, vars: &[f64]) -> BbResult<f64> {
        self.publish(&Message::request(vars));
        self.requests += 1;
        debug!(request = self.requests, vars = ?vars, "Posted design variables");

        let value = self.await_response()?;
        debug!(request = self.requests, value, "Received objective");
        Ok(value)
    }

    /// Publish the best result with `OptiFinish`. Consumes the bridge, so no
    /// further reads of the file happen afterwards.
    pub fn finalize(self, best: impl Into<FinalResult>) {
        let message = Message::finish(&best.into());
        self.publish(&message);
        info!(payload = message.payload(), "Published final result");
    }

    /// One read of the file, interpreted for a waiting optimizer.
    pub fn poll_response(&self) -> Result<Attempt<f64>, ProtocolError> {
        match self.mailbox.fetch() {
            Attempt::Ready(content) => parse_response(&content),
            Attempt::Retry(reason) => Ok(Attempt::Retry(reason)),
        }
    }

    fn publish(&self, message: &Message) {
        let mut backoff = self.backoff.start();
        loop {
            match self.mailbox.post(message) {
                Attempt::Ready(()) => return,
                Attempt::Retry(reason) => {
                    trace!(?reason, sentinel = %message.sentinel(), "Post deferred");
                    backoff.wait();
                }
            }
        }
    }

    fn await_response(&self) -> BbResult<f64> {
        let mut backoff = self.backoff.start();
        loop {
            match self.poll_response()? {
                Attempt::Ready(value) => return Ok(value),
                Attempt::Retry(reason) => {
                    trace!(?reason, "Waiting for objective");
                    backoff.wait();
                }
            }
        }
    }
}

impl<M: Mailbox> Objective for BlackboxBridge<M> {
    fn evaluate(&mut self, x: &[f64]) -> BbResult<f64> {
        BlackboxBridge::evaluate(self, x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::{Sentinel, Transient};
    use bb_types::BbError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Replays scripted reads and records every posted message.
    #[derive(Default)]
    struct ScriptedMailbox {
        reads: Mutex<VecDeque<Attempt<String>>>,
        posts: Mutex<Vec<String>>,
        fetches: Mutex<usize>,
        refuse_posts: Mutex<usize>,
    }

    impl ScriptedMailbox {
        fn with_reads(reads: impl IntoIterator<Item = Attempt<String>>) -> Self {
            Self {
                reads: Mutex::new(reads.into_iter().collect()),
                ..Default::default()
            }
        }

        fn posts(&self) -> Vec<String> {
            self.posts.lock().clone()
        }
    }

    impl Mailbox for ScriptedMailbox {
        fn post(&self, message: &Message) -> Attempt<()> {
            let mut refuse = self.refuse_posts.lock();
            if *refuse > 0 {
                *refuse -= 1;
                return Attempt::Retry(Transient::Locked);
            }
            self.posts.lock().push(message.render());
            Attempt::Ready(())
        }

        fn fetch(&self) -> Attempt<String> {
            *self.fetches.lock() += 1;
            self.reads
                .lock()
                .pop_front()
                .unwrap_or(Attempt::Retry(Transient::Missing))
        }
    }

    fn ready(text: &str) -> Attempt<String> {
        Attempt::Ready(text.to_string())
    }

    #[test]
    fn evaluate_posts_request_then_reads_objective() {
        let mailbox = ScriptedMailbox::with_reads([ready("3.14159\nObjWritten")]);
        let mut bridge = BlackboxBridge::with_mailbox(&mailbox, PollBackoff::immediate());

        let value = bridge.evaluate(&[0.5, 1.5, -2.0]).unwrap();

        assert_eq!(value, 3.14159);
        assert_eq!(bridge.requests(), 1);
        assert_eq!(mailbox.posts(), vec!["0.5 1.5 -2\nDVWritten".to_string()]);
    }

    #[test]
    fn transient_reads_are_retried_until_answer() {
        let mailbox = ScriptedMailbox::with_reads([
            Attempt::Retry(Transient::Locked),
            Attempt::Retry(Transient::Missing),
            ready(""),
            ready("0.5 1.5\nDVWritten"),
            Attempt::Retry(Transient::Locked),
            ready("42.5\nObjWritten\n"),
        ]);
        let mut bridge = BlackboxBridge::with_mailbox(&mailbox, PollBackoff::immediate());

        assert_eq!(bridge.evaluate(&[0.5, 1.5]).unwrap(), 42.5);
        assert_eq!(*mailbox.fetches.lock(), 6);
    }

    #[test]
    fn refused_posts_are_retried() {
        let mailbox = ScriptedMailbox::with_reads([ready("1\nObjWritten")]);
        *mailbox.refuse_posts.lock() = 4;
        let mut bridge = BlackboxBridge::with_mailbox(&mailbox, PollBackoff::immediate());

        assert_eq!(bridge.evaluate(&[2.0]).unwrap(), 1.0);
        assert_eq!(mailbox.posts().len(), 1);
    }

    #[test]
    fn malformed_objective_is_a_protocol_error() {
        let mailbox = ScriptedMailbox::with_reads([ready("abc\nObjWritten")]);
        let mut bridge = BlackboxBridge::with_mailbox(&mailbox, PollBackoff::immediate());

        let err = bridge.evaluate(&[1.0]).unwrap_err();
        assert!(err.is_protocol_violation());
        assert!(matches!(
            err,
            BbError::Protocol(ProtocolError::MalformedObjective { ref line }) if line == "abc"
        ));
    }

    #[test]
    fn finalize_publishes_vector() {
        let mailbox = ScriptedMailbox::default();
        BlackboxBridge::with_mailbox(&mailbox, PollBackoff::immediate()).finalize(vec![1.5, 2.5]);

        assert_eq!(mailbox.posts(), vec!["1.5 2.5\nOptiFinish".to_string()]);
        assert_eq!(*mailbox.fetches.lock(), 0);
    }

    #[test]
    fn finalize_publishes_scalar() {
        let mailbox = ScriptedMailbox::default();
        BlackboxBridge::with_mailbox(&mailbox, PollBackoff::immediate()).finalize(7.0);

        let posts = mailbox.posts();
        assert_eq!(posts, vec!["7\nOptiFinish".to_string()]);
        assert!(posts[0].ends_with(Sentinel::OptimizationFinished.token()));
    }

    #[test]
    fn bridge_drives_an_optimizer_as_objective() {
        let mailbox = ScriptedMailbox::with_reads([ready("2\nObjWritten"), ready("1\nObjWritten")]);
        let mut bridge = BlackboxBridge::with_mailbox(&mailbox, PollBackoff::immediate());
        let objective: &mut dyn Objective = &mut bridge;

        assert_eq!(objective.evaluate(&[1.0]).unwrap(), 2.0);
        assert_eq!(objective.evaluate(&[0.0]).unwrap(), 1.0);
        assert_eq!(mailbox.posts().len(), 2);
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = PollBackoff {
            initial: Duration::from_micros(10),
            max: Duration::from_micros(35),
        }
        .start();
        backoff.wait();
        assert_eq!(backoff.next, Duration::from_micros(20));
        backoff.wait();
        assert_eq!(backoff.next, Duration::from_micros(35));
        backoff.wait();
        assert_eq!(backoff.next, Duration::from_micros(35));
    }

    #[test]
    fn config_targets_handshake_file_in_spec_dir() {
        let spec = OptimizerSpec::new("RBFopt", vec![0.0], vec![1.0]).with_handshake_dir("/tmp/run");
        let config = BridgeConfig::from_spec(&spec);
        assert_eq!(config.handshake_path, PathBuf::from("/tmp/run/DesignVar_Obj.txt"));
        assert_eq!(config.backoff, PollBackoff::default());
    }
}
