//! NVM kernel runtime
//!
//! This crate wraps the pure VM core (`nvm-core`) with everything that
//! touches the outside world: the scheduler entry point, the syscall
//! gateway, the image loader, the initramfs unpacker and the kernel
//! event log. The platform collaborators (console, serial, ports, the
//! absolute-memory window) are reached through the `Platform` trait
//! from `nvm-hal`.
//!
//! The whole kernel is a single value, [`Nvm`]. `tick()` borrows it
//! mutably, so the cooperative single-threaded execution model is a
//! compile-time property: there is no way to re-enter the scheduler
//! while a process is mid-instruction.

#![no_std]
extern crate alloc;

mod initramfs;
mod klog;
mod loader;
mod syscall;

pub use initramfs::parse_initramfs;
pub use klog::{EventKind, KernelEvent, KernelLog, MAX_LOG_EVENTS};
pub use loader::LoadError;
pub use syscall::{
    SYS_DELETE, SYS_EXIT, SYS_MSG_RECEIVE, SYS_MSG_SEND, SYS_OPEN, SYS_PORT_IN_B, SYS_PORT_OUT_B,
    SYS_PRINT, SYS_READ, SYS_SPAWN, SYS_WRITE,
};

// Re-export the core and collaborator types the embedder needs
pub use nvm_core::{
    check_all_invariants, Cap, CapSet, Fault, Image, InvariantViolation, Message, MessageQueue,
    Pid, ProcessSlot, ProcessTable, StepOutcome,
};
pub use nvm_hal::{HalError, Platform};
pub use nvm_vfs::Vfs;

use alloc::format;
use nvm_core::interp::{self, AbsMemory};

/// Console colour for kernel status lines.
pub const COLOUR_STATUS: u8 = 7;
/// Console colour for kernel warnings.
pub const COLOUR_WARN: u8 = 14;
/// Console colour for process output.
pub const COLOUR_OUTPUT: u8 = 15;

/// Result of one scheduler tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tick {
    /// The time-slice throttle skipped this tick
    Throttled,
    /// No process was runnable
    Idle,
    /// One instruction of this process was executed (or it was reaped)
    Ran(Pid),
}

/// Adapts the platform's absolute-memory window to the interpreter bus.
struct PlatformBus<'a, P: Platform>(&'a P);

impl<P: Platform> AbsMemory for PlatformBus<'_, P> {
    fn load(&self, addr: u32) -> Option<i32> {
        self.0.abs_read(addr).ok()
    }

    fn store(&mut self, addr: u32, value: i32) -> bool {
        self.0.abs_write(addr, value).is_ok()
    }
}

/// The kernel: process table, message queue, VFS, platform and event log.
pub struct Nvm<P: Platform> {
    table: ProcessTable,
    queue: MessageQueue,
    vfs: Vfs,
    platform: P,
    klog: KernelLog,
}

impl<P: Platform> Nvm<P> {
    /// Initialise the kernel over a platform.
    pub fn new(platform: P) -> Self {
        platform.kprint(":: NVM initialized\n", COLOUR_STATUS);
        Self {
            table: ProcessTable::new(),
            queue: MessageQueue::new(),
            vfs: Vfs::new(),
            platform,
            klog: KernelLog::new(),
        }
    }

    /// One scheduler tick: at most one instruction of one process.
    ///
    /// This is the only entry point for forward progress. Every
    /// `TIME_SLICE`-th call selects the next runnable process round-robin
    /// and executes one interpreter step; the other calls only advance
    /// the tick counter.
    pub fn tick(&mut self) -> Tick {
        if !self.table.advance_timer() {
            return Tick::Throttled;
        }
        let pid = match self.table.select_next_runnable() {
            Some(pid) => pid,
            None => return Tick::Idle,
        };

        // A process that ran off the end of its image terminates cleanly.
        let at_end = match self.table.slot(pid) {
            Some(slot) => slot.ip >= slot.size(),
            None => return Tick::Idle,
        };
        if at_end {
            self.report_exit(pid, 0, "end of image");
            return Tick::Ran(pid);
        }

        let outcome = {
            let mut bus = PlatformBus(&self.platform);
            match self.table.slot_mut(pid) {
                Some(slot) => interp::step(slot, &mut bus),
                None => return Tick::Idle,
            }
        };

        match outcome {
            StepOutcome::Stepped => {}
            StepOutcome::Halted => self.report_exit(pid, 0, "halted"),
            StepOutcome::Faulted(fault) => self.fault(pid, fault),
            StepOutcome::Syscall(id) => self.handle_syscall(pid, id),
        }
        Tick::Ran(pid)
    }

    /// Externally terminate a process (controller hook).
    ///
    /// Works on blocked processes too; the slot becomes free. Returns
    /// whether a live process was killed.
    pub fn kill(&mut self, pid: Pid) -> bool {
        let ticks = self.table.timer_ticks;
        match self.table.slot_mut(pid) {
            Some(slot) if slot.active => {
                slot.terminate(-1);
                self.klog.record(EventKind::ProcessKilled { pid }, ticks);
                self.platform
                    .debug_write(&format!("process {}: killed\n", pid.0));
                true
            }
            _ => false,
        }
    }

    /// Whether the slot currently holds a live process.
    pub fn is_process_active(&self, pid: Pid) -> bool {
        self.table.slot(pid).map(|s| s.active).unwrap_or(false)
    }

    /// Exit code of a terminated process; `None` while it is still live.
    pub fn exit_code(&self, pid: Pid) -> Option<i32> {
        let slot = self.table.slot(pid)?;
        if slot.active {
            None
        } else {
            Some(slot.exit_code)
        }
    }

    /// Number of live processes.
    pub fn active_count(&self) -> usize {
        self.table.active_count()
    }

    /// Number of live, unblocked processes.
    pub fn runnable_count(&self) -> usize {
        self.table.runnable_count()
    }

    /// The process table (read-only; used by invariant checks).
    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    /// The message queue (read-only; used by invariant checks).
    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }

    /// The filesystem.
    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// Mutable filesystem access, for boot-time population and the shell.
    pub fn vfs_mut(&mut self) -> &mut Vfs {
        &mut self.vfs
    }

    /// The platform.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// The kernel event log.
    pub fn klog(&self) -> &KernelLog {
        &self.klog
    }

    /// Terminate a process with a fatal fault: exit code -1, diagnostic
    /// on the serial channel, event in the log. Other processes continue.
    pub(crate) fn fault(&mut self, pid: Pid, fault: Fault) {
        let ticks = self.table.timer_ticks;
        if let Some(slot) = self.table.slot_mut(pid) {
            slot.terminate(-1);
        }
        self.klog.record(EventKind::ProcessFaulted { pid }, ticks);
        self.platform
            .debug_write(&format!("process {}: {}\n", pid.0, fault));
    }

    /// Terminate a process cleanly and record the exit.
    pub(crate) fn report_exit(&mut self, pid: Pid, code: i32, why: &str) {
        let ticks = self.table.timer_ticks;
        if let Some(slot) = self.table.slot_mut(pid) {
            slot.terminate(code);
        }
        self.klog
            .record(EventKind::ProcessExited { pid, code }, ticks);
        self.platform
            .debug_write(&format!("process {}: {} (exit {})\n", pid.0, why, code));
    }
}
