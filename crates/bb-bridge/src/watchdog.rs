//! Terminates the optimizer once the launching process is gone.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use thiserror::Error;
use tracing::{debug, error, info};

/// Exit status used when the optimizer quits because it was orphaned.
pub const ORPHAN_EXIT_CODE: i32 = 0;

pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum WatchdogError {
    #[error("watchdog interval must be positive")]
    ZeroInterval,

    #[error("failed to start watchdog thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Liveness lookup for a process id.
pub trait ProcessTable: Send + 'static {
    fn is_alive(&mut self, pid: u32) -> bool;
}

/// Process table backed by the operating system.
pub struct SystemProcessTable {
    system: System,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn is_alive(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        // An unreaped parent still has an entry but will never come back.
        self.system.process(pid).is_some_and(|process| {
            !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub parent_pid: u32,
    pub interval: Duration,
}

impl WatchdogConfig {
    pub fn new(parent_pid: u32) -> Self {
        Self {
            parent_pid,
            interval: DEFAULT_WATCHDOG_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Polls the parent's liveness from a background thread.
///
/// The check runs immediately on spawn and then once per interval. When the
/// parent is absent the orphan action runs on the watchdog thread and the
/// thread ends.
pub struct ParentWatchdog<T = SystemProcessTable> {
    config: WatchdogConfig,
    table: T,
}

impl ParentWatchdog<SystemProcessTable> {
    pub fn new(config: WatchdogConfig) -> Self {
        Self::with_table(config, SystemProcessTable::new())
    }
}

impl<T: ProcessTable> ParentWatchdog<T> {
    pub fn with_table(config: WatchdogConfig, table: T) -> Self {
        Self { config, table }
    }

    /// Start watching; `on_orphan` receives the vanished parent pid.
    pub fn spawn<F>(self, on_orphan: F) -> Result<WatchdogHandle, WatchdogError>
    where
        F: FnOnce(u32) + Send + 'static,
    {
        if self.config.interval.is_zero() {
            return Err(WatchdogError::ZeroInterval);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let WatchdogConfig {
            parent_pid,
            interval,
        } = self.config;
        let mut table = self.table;

        let thread = thread::Builder::new()
            .name("parent-watchdog".into())
            .spawn(move || loop {
                if !table.is_alive(parent_pid) {
                    info!(parent_pid, "Parent process is gone");
                    on_orphan(parent_pid);
                    return;
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!(parent_pid, "Watchdog stopped");
                        return;
                    }
                }
            })?;

        info!(parent_pid, interval_ms = interval.as_millis() as u64, "Watching parent process");
        Ok(WatchdogHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Start watching and exit the whole process when the parent disappears.
    pub fn spawn_terminating(self) -> Result<WatchdogHandle, WatchdogError> {
        self.spawn(terminate_process)
    }
}

/// Default orphan action: ends the process at once, without running
/// destructors, atexit handlers or stdio flushing.
pub fn terminate_process(parent_pid: u32) {
    error!(parent_pid, "Parent process exited; shutting down optimizer");
    immediate_exit(ORPHAN_EXIT_CODE)
}

#[cfg(unix)]
fn immediate_exit(code: i32) -> ! {
    // SAFETY: `_exit` only terminates the calling process and never returns.
    unsafe { libc::_exit(code) }
}

#[cfg(not(unix))]
fn immediate_exit(code: i32) -> ! {
    std::process::exit(code)
}

/// Owns the watchdog thread. Dropping the handle stops and joins it.
pub struct WatchdogHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WatchdogHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// True once the thread has ended, either stopped or after an orphan action.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the thread even if it already stopped listening.
        drop(self.stop_tx.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Watchdog thread panicked");
            }
        }
    }
}

impl Drop for WatchdogHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
