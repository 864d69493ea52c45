//! Wire format of the handshake file and the locked file mailbox.
//!
//! The file always holds payload line(s) followed by exactly one sentinel
//! line naming whose turn it is:
//!
//! | Sentinel     | Payload                          | Owner next  |
//! |--------------|----------------------------------|-------------|
//! | `DVWritten`  | N space-separated design values  | evaluator   |
//! | `ObjWritten` | one objective value              | optimizer   |
//! | `OptiFinish` | best design values (or a scalar) | nobody      |
//!
//! Every mutation happens under an exclusive advisory lock taken *before*
//! the file is truncated; every read happens under a shared lock.

use std::fmt;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::trace;

use bb_types::ProtocolError;

/// Reserved last-line markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentinel {
    /// A request: design variables are waiting for the evaluator.
    DesignVarsWritten,
    /// A response: the objective value is waiting for the optimizer.
    ObjectiveWritten,
    /// The final result; the optimizer will not touch the file again.
    OptimizationFinished,
}

impl Sentinel {
    pub const fn token(self) -> &'static str {
        match self {
            Self::DesignVarsWritten => "DVWritten",
            Self::ObjectiveWritten => "ObjWritten",
            Self::OptimizationFinished => "OptiFinish",
        }
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Sentinel {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::DesignVarsWritten,
            Self::ObjectiveWritten,
            Self::OptimizationFinished,
        ]
        .into_iter()
        .find(|sentinel| sentinel.token() == s)
        .ok_or_else(|| ProtocolError::UnknownSentinel(s.to_string()))
    }
}

/// Why an attempt did not complete. All of these are expected while the
/// other process is working and are retried, never reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transient {
    /// The other side holds the lock.
    Locked,
    /// The file does not exist (yet).
    Missing,
    /// Fewer than two lines: no sentinel plus payload.
    ShortContent { lines: usize },
    /// The last line is not the sentinel we are waiting for.
    AwaitingTurn { last_line: String },
    /// Any other I/O failure while opening, locking, reading or writing.
    Io(io::ErrorKind),
}

impl Transient {
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::Missing,
            io::ErrorKind::WouldBlock | io::ErrorKind::PermissionDenied => Self::Locked,
            kind => Self::Io(kind),
        }
    }
}

/// Outcome of one non-fatal protocol step. Fatal outcomes travel separately
/// as `Err(ProtocolError)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt<T> {
    Ready(T),
    Retry(Transient),
}

impl<T> Attempt<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Attempt::Ready(_))
    }
}

/// Space-joined shortest round-trip decimal representation.
pub fn format_vector(values: &[f64]) -> String {
    values
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse one payload line of space-separated decimals.
pub fn parse_vector(line: &str) -> Result<Vec<f64>, ProtocolError> {
    line.split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|_| ProtocolError::MalformedVector {
                line: line.to_string(),
                token: token.to_string(),
            })
        })
        .collect()
}

/// Best point published by `Finalize`.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalResult {
    Vector(Vec<f64>),
    Scalar(f64),
}

impl From<Vec<f64>> for FinalResult {
    fn from(values: Vec<f64>) -> Self {
        Self::Vector(values)
    }
}

impl From<&[f64]> for FinalResult {
    fn from(values: &[f64]) -> Self {
        Self::Vector(values.to_vec())
    }
}

impl From<f64> for FinalResult {
    fn from(value: f64) -> Self {
        Self::Scalar(value)
    }
}

/// One complete file state: payload plus trailing sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    payload: String,
    sentinel: Sentinel,
}

impl Message {
    pub fn request(vars: &[f64]) -> Self {
        Self {
            payload: format_vector(vars),
            sentinel: Sentinel::DesignVarsWritten,
        }
    }

    pub fn response(value: f64) -> Self {
        Self {
            payload: value.to_string(),
            sentinel: Sentinel::ObjectiveWritten,
        }
    }

    pub fn finish(result: &FinalResult) -> Self {
        let payload = match result {
            FinalResult::Vector(values) => format_vector(values),
            FinalResult::Scalar(value) => value.to_string(),
        };
        Self {
            payload,
            sentinel: Sentinel::OptimizationFinished,
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn sentinel(&self) -> Sentinel {
        self.sentinel
    }

    /// Exact file content, without a trailing newline.
    pub fn render(&self) -> String {
        format!("{}\n{}", self.payload, self.sentinel)
    }
}

/// Trimmed, non-trailing-empty lines of the file content.
fn content_lines(content: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = content.lines().map(str::trim).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

/// Decide what a read of the file means for a waiting optimizer.
///
/// Only the last line is inspected. Anything other than `ObjWritten` over at
/// least one payload line is a reason to retry; a payload that is not a
/// number under `ObjWritten` is a protocol violation.
pub fn parse_response(content: &str) -> Result<Attempt<f64>, ProtocolError> {
    let lines = content_lines(content);
    if lines.len() < 2 {
        return Ok(Attempt::Retry(Transient::ShortContent { lines: lines.len() }));
    }
    let last = lines[lines.len() - 1];
    if last != Sentinel::ObjectiveWritten.token() {
        return Ok(Attempt::Retry(Transient::AwaitingTurn {
            last_line: last.to_string(),
        }));
    }
    let value_line = lines[lines.len() - 2];
    value_line
        .parse::<f64>()
        .map(Attempt::Ready)
        .map_err(|_| ProtocolError::MalformedObjective {
            line: value_line.to_string(),
        })
}

/// Parsed file state as seen by either side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub sentinel: Sentinel,
    /// Payload lines above the sentinel.
    pub payload: Vec<String>,
}

impl Snapshot {
    /// Short content or an unrecognized last line are transient.
    pub fn parse(content: &str) -> Attempt<Snapshot> {
        let lines = content_lines(content);
        let Some((last, payload)) = lines.split_last().filter(|(_, payload)| !payload.is_empty())
        else {
            return Attempt::Retry(Transient::ShortContent { lines: lines.len() });
        };
        match last.parse::<Sentinel>() {
            Ok(sentinel) => Attempt::Ready(Snapshot {
                sentinel,
                payload: payload.iter().map(|line| line.to_string()).collect(),
            }),
            Err(_) => Attempt::Retry(Transient::AwaitingTurn {
                last_line: last.to_string(),
            }),
        }
    }

    /// Values on the line directly above the sentinel.
    pub fn values(&self) -> Result<Vec<f64>, ProtocolError> {
        parse_vector(self.payload.last().map(String::as_str).unwrap_or_default())
    }
}

/// Transport for handshake messages.
///
/// `post` replaces the whole content under exclusive access; `fetch` reads
/// the whole content under shared access. Neither ever fails fatally.
pub trait Mailbox {
    fn post(&self, message: &Message) -> Attempt<()>;
    fn fetch(&self) -> Attempt<String>;
}

impl<M: Mailbox + ?Sized> Mailbox for &M {
    fn post(&self, message: &Message) -> Attempt<()> {
        (**self).post(message)
    }

    fn fetch(&self) -> Attempt<String> {
        (**self).fetch()
    }
}

/// The shared file on disk, guarded by advisory file locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeFile {
    path: PathBuf,
}

impl HandshakeFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate and write while holding the exclusive lock.
    fn write_locked(mut file: &File, text: &str) -> io::Result<()> {
        file.set_len(0)?;
        file.write_all(text.as_bytes())?;
        file.flush()
    }

    fn read_locked(mut file: &File) -> io::Result<String> {
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        Ok(content)
    }

    fn release(file: &File) {
        // Closing the handle releases the lock as well.
        if let Err(e) = file.unlock() {
            trace!("unlock failed: {}", e);
        }
    }
}

fn lock_outcome(result: Result<(), TryLockError>) -> Result<(), Transient> {
    match result {
        Ok(()) => Ok(()),
        Err(TryLockError::WouldBlock) => Err(Transient::Locked),
        Err(TryLockError::Error(e)) => Err(Transient::from_io(&e)),
    }
}

impl Mailbox for HandshakeFile {
    fn post(&self, message: &Message) -> Attempt<()> {
        // No truncate on open: the content may only change once we hold the lock.
        let file = match OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) => return Attempt::Retry(Transient::from_io(&e)),
        };
        if let Err(reason) = lock_outcome(file.try_lock()) {
            return Attempt::Retry(reason);
        }

        let written = Self::write_locked(&file, &message.render());
        Self::release(&file);
        match written {
            Ok(()) => Attempt::Ready(()),
            Err(e) => Attempt::Retry(Transient::from_io(&e)),
        }
    }

    fn fetch(&self) -> Attempt<String> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) => return Attempt::Retry(Transient::from_io(&e)),
        };
        if let Err(reason) = lock_outcome(file.try_lock_shared()) {
            return Attempt::Retry(reason);
        }

        let content = Self::read_locked(&file);
        Self::release(&file);
        match content {
            Ok(content) => Attempt::Ready(content),
            Err(e) => Attempt::Retry(Transient::from_io(&e)),
        }
    }
}
