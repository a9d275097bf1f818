//! Core NVM types
//!
//! This module contains the fundamental types and limits used throughout
//! the VM core. All types here are pure data.

use serde::{Deserialize, Serialize};

/// Process identifier - the index of the process's slot in the table
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pid(pub u16);

/// Maximum number of process slots in the table
pub const MAX_PROCESSES: usize = 64;

/// Capacity of each process's value stack
pub const STACK_SIZE: usize = 256;

/// Number of local variable cells per process
pub const MAX_LOCALS: usize = 256;

/// Capacity of each process's capability set
pub const MAX_CAPS: usize = 16;

/// Capacity of the message queue
pub const MAX_MESSAGES: usize = 32;

/// Scheduler throttle: interpreter work happens once every `TIME_SLICE` ticks
pub const TIME_SLICE: u64 = 2;

/// Wakeup reason: the process has never been woken
pub const WAKE_NONE: u8 = 0;

/// Wakeup reason: a message arrived for the process
pub const WAKE_MESSAGE: u8 = 1;

/// A queued inter-process message.
///
/// Messages carry a single byte of content. Records preserve insertion
/// order in the queue and are removed by first match on `recipient`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Destination process
    pub recipient: Pid,
    /// Originating process
    pub sender: Pid,
    /// Payload byte
    pub content: u8,
}
