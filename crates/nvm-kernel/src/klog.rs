//! Kernel event log
//!
//! Append-only record of process lifecycle events, kept for inspection
//! by the shell and by tests. This is bookkeeping, not the diagnostic
//! channel - human-readable fault reports go to the platform's serial
//! sink.

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use nvm_core::Pid;

/// Maximum number of retained events; later events are counted but dropped.
pub const MAX_LOG_EVENTS: usize = 4096;

/// One recorded kernel event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelEvent {
    /// Monotonic event id
    pub id: u64,
    /// Scheduler tick count when the event was recorded
    pub timestamp: u64,
    /// What happened
    pub kind: EventKind,
}

/// Kernel event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    /// An image was seated into a slot
    ProcessLoaded {
        /// New process
        pid: Pid,
    },
    /// A process terminated by HALT, EXIT or end of image
    ProcessExited {
        /// Terminated process
        pid: Pid,
        /// Its exit code
        code: i32,
    },
    /// A process was terminated by a fatal fault
    ProcessFaulted {
        /// Faulted process
        pid: Pid,
    },
    /// A process was terminated externally
    ProcessKilled {
        /// Killed process
        pid: Pid,
    },
    /// A receive found no message and blocked the process
    ProcessBlocked {
        /// Blocked process
        pid: Pid,
    },
    /// A blocked process was woken
    ProcessWoken {
        /// Woken process
        pid: Pid,
        /// Wakeup reason tag
        reason: u8,
    },
    /// A message was enqueued
    MessageSent {
        /// Sender
        from: Pid,
        /// Recipient
        to: Pid,
    },
    /// A syscall returned a negative result to its caller
    SyscallFailed {
        /// Calling process
        pid: Pid,
        /// Syscall id
        id: u8,
    },
}

/// Bounded append-only event log with monotonic ids.
#[derive(Default)]
pub struct KernelLog {
    events: Vec<KernelEvent>,
    next_id: u64,
    dropped: u64,
}

impl KernelLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            next_id: 0,
            dropped: 0,
        }
    }

    /// Append an event; returns its id.
    pub fn record(&mut self, kind: EventKind, timestamp: u64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        if self.events.len() < MAX_LOG_EVENTS {
            self.events.push(KernelEvent {
                id,
                timestamp,
                kind,
            });
        } else {
            self.dropped += 1;
        }
        id
    }

    /// Retained events, oldest first.
    pub fn events(&self) -> &[KernelEvent] {
        &self.events
    }

    /// Number of events dropped after the log filled.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Whether any retained event matches the predicate.
    pub fn any(&self, mut pred: impl FnMut(&EventKind) -> bool) -> bool {
        self.events.iter().any(|e| pred(&e.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let mut log = KernelLog::new();
        let a = log.record(EventKind::ProcessLoaded { pid: Pid(0) }, 1);
        let b = log.record(
            EventKind::ProcessExited {
                pid: Pid(0),
                code: 0,
            },
            2,
        );
        assert!(b > a);
        assert_eq!(log.events().len(), 2);
        assert_eq!(log.events()[0].timestamp, 1);
    }

    #[test]
    fn test_log_bounds() {
        let mut log = KernelLog::new();
        for i in 0..MAX_LOG_EVENTS as u64 + 10 {
            log.record(EventKind::ProcessLoaded { pid: Pid(0) }, i);
        }
        assert_eq!(log.events().len(), MAX_LOG_EVENTS);
        assert_eq!(log.dropped(), 10);
        // Ids keep advancing even for dropped events
        assert_eq!(log.record(EventKind::ProcessLoaded { pid: Pid(0) }, 0), MAX_LOG_EVENTS as u64 + 10);
    }

    #[test]
    fn test_any_predicate() {
        let mut log = KernelLog::new();
        log.record(EventKind::ProcessBlocked { pid: Pid(3) }, 5);
        assert!(log.any(|k| matches!(k, EventKind::ProcessBlocked { pid } if pid.0 == 3)));
        assert!(!log.any(|k| matches!(k, EventKind::ProcessFaulted { .. })));
    }
}
