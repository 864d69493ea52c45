//! # bb-bridge
//!
//! Connects the optimizers in `bb-optimizer` to an external evaluator process
//! through a single shared handshake file, and keeps the optimizer from
//! outliving the process that launched it.

pub mod bridge;
pub mod handshake;
pub mod watchdog;

pub use bridge::{BlackboxBridge, BridgeConfig, PollBackoff};
pub use handshake::{
    format_vector, parse_response, parse_vector, Attempt, FinalResult, HandshakeFile, Mailbox,
    Message, Sentinel, Snapshot, Transient,
};
pub use watchdog::{
    terminate_process, ParentWatchdog, ProcessTable, SystemProcessTable, WatchdogConfig,
    WatchdogError, WatchdogHandle, DEFAULT_WATCHDOG_INTERVAL, ORPHAN_EXIT_CODE,
};
