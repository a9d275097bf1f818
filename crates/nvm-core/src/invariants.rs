//! Invariant assertions over the VM state
//!
//! These must hold at every scheduler boundary. They are checked from
//! tests after every tick; a violation means a kernel bug, never a
//! misbehaving image (images can only fault their own process).

use crate::image::Image;
use crate::process::ProcessTable;
use crate::queue::MessageQueue;
use crate::types::{Pid, MAX_MESSAGES, STACK_SIZE};

/// A broken invariant, with enough context to point at the culprit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A stack grew past its capacity
    StackOverrun {
        /// Offending process
        pid: Pid,
        /// Observed live value count
        sp: usize,
    },
    /// An active process's ip left `[4, size]`
    IpOutOfBounds {
        /// Offending process
        pid: Pid,
        /// Observed instruction pointer
        ip: u32,
        /// Image size
        size: u32,
    },
    /// An active process's image lost its magic
    MissingMagic {
        /// Offending process
        pid: Pid,
    },
    /// A blocked slot is not active
    BlockedButInactive {
        /// Offending process
        pid: Pid,
    },
    /// The message queue exceeded its capacity
    QueueOverrun {
        /// Observed queue length
        len: usize,
    },
}

impl core::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InvariantViolation::StackOverrun { pid, sp } => {
                write!(f, "process {} stack overrun (sp={})", pid.0, sp)
            }
            InvariantViolation::IpOutOfBounds { pid, ip, size } => {
                write!(f, "process {} ip {} outside [4, {}]", pid.0, ip, size)
            }
            InvariantViolation::MissingMagic { pid } => {
                write!(f, "process {} image lost its magic", pid.0)
            }
            InvariantViolation::BlockedButInactive { pid } => {
                write!(f, "process {} blocked while inactive", pid.0)
            }
            InvariantViolation::QueueOverrun { len } => {
                write!(f, "message queue overrun (len={})", len)
            }
        }
    }
}

/// Check every process slot and the queue; `Ok` when all invariants hold.
pub fn check_all_invariants(
    table: &ProcessTable,
    queue: &MessageQueue,
) -> Result<(), InvariantViolation> {
    for slot in table.slots() {
        if slot.sp() > STACK_SIZE {
            return Err(InvariantViolation::StackOverrun {
                pid: slot.pid,
                sp: slot.sp(),
            });
        }
        if slot.blocked && !slot.active {
            return Err(InvariantViolation::BlockedButInactive { pid: slot.pid });
        }
        if slot.active {
            if slot.ip < Image::ENTRY || slot.ip > slot.size() {
                return Err(InvariantViolation::IpOutOfBounds {
                    pid: slot.pid,
                    ip: slot.ip,
                    size: slot.size(),
                });
            }
            if !slot.image.has_magic() {
                return Err(InvariantViolation::MissingMagic { pid: slot.pid });
            }
        }
    }
    if queue.len() > MAX_MESSAGES {
        return Err(InvariantViolation::QueueOverrun { len: queue.len() });
    }
    Ok(())
}
