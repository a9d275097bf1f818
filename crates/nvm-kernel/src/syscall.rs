//! System-call gateway
//!
//! Dispatch keyed on the 1-byte id fetched by the `SYSCALL` opcode.
//! Handler contracts:
//!
//! - The capability check is the handler's **first** act, before any
//!   pop. Arguments cross the trust boundary on the VM stack; a denial
//!   must leave the caller's stack in a determinate shape. A denial is
//!   fatal to the process.
//! - Stack underflow at handler entry is fatal, like any interpreter
//!   underflow.
//! - Descriptor and filesystem failures are non-fatal: the handler
//!   pushes -1 and the process continues.
//! - A blocked receive rewinds ip over the `SYSCALL id` bytes so the
//!   wakeup re-executes the receive; no message is consumed.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use nvm_core::{Cap, Fault, Message, Pid, ProcessSlot, STACK_SIZE, WAKE_MESSAGE};
use nvm_hal::Platform;
use nvm_vfs::OpenFlags;

use crate::klog::EventKind;
use crate::{Nvm, COLOUR_OUTPUT};

/// Terminate with the popped exit code.
pub const SYS_EXIT: u8 = 0x00;
/// Load a new process from an open descriptor, argv on the stack.
pub const SYS_SPAWN: u8 = 0x01;
/// Read one byte from a descriptor.
pub const SYS_READ: u8 = 0x02;
/// Write one byte to a descriptor; 1 and 2 route to the console.
pub const SYS_WRITE: u8 = 0x03;
/// Open a path on the VFS.
pub const SYS_OPEN: u8 = 0x04;
/// Unlink a path.
pub const SYS_DELETE: u8 = 0x05;
/// Enqueue a one-byte message and wake the recipient.
pub const SYS_MSG_SEND: u8 = 0x09;
/// Dequeue the first message for the caller, or block.
pub const SYS_MSG_RECEIVE: u8 = 0x0A;
/// Raw byte-in from an I/O port.
pub const SYS_PORT_IN_B: u8 = 0x0B;
/// Raw byte-out to an I/O port.
pub const SYS_PORT_OUT_B: u8 = 0x0C;
/// Write one character to the console.
pub const SYS_PRINT: u8 = 0x0D;

/// Fail closed before touching the stack.
fn require_cap(slot: &ProcessSlot, cap: Cap) -> Result<(), Fault> {
    if slot.caps.has(cap) {
        Ok(())
    } else {
        Err(Fault::CapDenied(cap))
    }
}

/// Collect the zero-terminated string below the top of the stack.
///
/// The terminator sits below the character entries; the characters are
/// the byte values of the entries above it. On success the terminator
/// and characters are consumed; when no terminator exists the stack is
/// left untouched and `None` is returned.
fn pop_string(slot: &mut ProcessSlot) -> Option<String> {
    let zero = slot.stack.iter().rposition(|&v| v == 0)?;
    let bytes: Vec<u8> = slot.stack[zero + 1..].iter().map(|&v| v as u8).collect();
    slot.stack.truncate(zero);
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Collect `argc` zero-terminated byte-runs, topmost run first.
///
/// Each run must be non-empty and preceded (below) by its terminator.
/// On success the scanned region including the lowest terminator is
/// consumed; a malformed layout leaves the stack untouched.
fn pop_args(slot: &mut ProcessSlot, argc: usize) -> Option<Vec<Vec<u8>>> {
    let mut args = Vec::with_capacity(argc);
    let mut top = slot.stack.len();
    for _ in 0..argc {
        let zero = slot.stack[..top].iter().rposition(|&v| v == 0)?;
        if zero + 1 >= top {
            return None;
        }
        let run: Vec<u8> = slot.stack[zero + 1..top].iter().map(|&v| v as u8).collect();
        args.push(run);
        top = zero;
    }
    slot.stack.truncate(top);
    Some(args)
}

impl<P: Platform> Nvm<P> {
    /// Dispatch a syscall for the process that just executed `SYSCALL id`.
    pub(crate) fn handle_syscall(&mut self, pid: Pid, id: u8) {
        let result = match id {
            SYS_EXIT => self.sys_exit(pid),
            SYS_SPAWN => self.sys_spawn(pid),
            SYS_READ => self.sys_read(pid),
            SYS_WRITE => self.sys_write(pid),
            SYS_OPEN => self.sys_open(pid),
            SYS_DELETE => self.sys_delete(pid),
            SYS_MSG_SEND => self.sys_msg_send(pid),
            SYS_MSG_RECEIVE => self.sys_msg_receive(pid),
            SYS_PORT_IN_B => self.sys_port_in(pid),
            SYS_PORT_OUT_B => self.sys_port_out(pid),
            SYS_PRINT => self.sys_print(pid),
            _ => {
                let ticks = self.table.timer_ticks;
                self.klog.record(EventKind::ProcessFaulted { pid }, ticks);
                self.platform
                    .debug_write(&format!("process {}: unknown syscall 0x{:02X}\n", pid.0, id));
                if let Some(slot) = self.table.slot_mut(pid) {
                    slot.terminate(-1);
                }
                Ok(())
            }
        };
        if let Err(fault) = result {
            self.fault(pid, fault);
        }
    }

    /// Push a handler result onto the caller's stack.
    fn push_result(&mut self, pid: Pid, value: i32) -> Result<(), Fault> {
        if let Some(slot) = self.table.slot_mut(pid) {
            if !slot.push(value) {
                return Err(Fault::StackOverflow);
            }
        }
        Ok(())
    }

    /// Record a non-fatal negative result in the event log.
    fn note_fail(&mut self, pid: Pid, id: u8) {
        let ticks = self.table.timer_ticks;
        self.klog.record(EventKind::SyscallFailed { pid, id }, ticks);
    }

    /// One character of process output on the console.
    fn kprint_byte(&self, byte: u8) {
        let mut buf = [0u8; 4];
        let s = char::from(byte).encode_utf8(&mut buf);
        self.platform.kprint(s, COLOUR_OUTPUT);
    }

    fn sys_exit(&mut self, pid: Pid) -> Result<(), Fault> {
        let code = match self.table.slot_mut(pid) {
            // An empty stack exits cleanly with code 0
            Some(slot) => slot.pop().unwrap_or(0),
            None => return Ok(()),
        };
        self.report_exit(pid, code, "exited");
        Ok(())
    }

    fn sys_spawn(&mut self, pid: Pid) -> Result<(), Fault> {
        let (fd, argc) = {
            let Some(slot) = self.table.slot_mut(pid) else {
                return Ok(());
            };
            require_cap(slot, Cap::FS_READ)?;
            if slot.sp() < 2 {
                return Err(Fault::StackUnderflow);
            }
            let fd = slot.pop().ok_or(Fault::StackUnderflow)?;
            let argc = slot.pop().ok_or(Fault::StackUnderflow)?;
            (fd, argc)
        };
        if fd < 0 || argc < 0 {
            self.note_fail(pid, SYS_SPAWN);
            return self.push_result(pid, -1);
        }

        let args = {
            let Some(slot) = self.table.slot_mut(pid) else {
                return Ok(());
            };
            pop_args(slot, argc as usize)
        };
        let Some(args) = args else {
            self.platform
                .debug_write(&format!("process {}: malformed spawn argv\n", pid.0));
            self.note_fail(pid, SYS_SPAWN);
            return self.push_result(pid, -1);
        };

        // Read the whole image through the descriptor, one byte at a time.
        let mut bytes = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.vfs.read_fd(fd, &mut byte) {
                Ok(0) => break,
                Ok(_) => bytes.push(byte[0]),
                Err(_) => {
                    self.note_fail(pid, SYS_SPAWN);
                    return self.push_result(pid, -1);
                }
            }
        }

        // Child stack: argv pushed in reverse order as byte-runs with a
        // trailing zero, argc on top, so the child scans its argv in
        // natural order downward.
        let mut initial = Vec::new();
        for arg in args.iter().rev() {
            for &b in arg {
                initial.push(b as i32);
            }
            initial.push(0);
        }
        initial.push(argc);

        let caps = self
            .table
            .slot(pid)
            .map(|s| s.caps.clone())
            .unwrap_or_default();

        let result = match self.seat_image(bytes, caps, initial) {
            Ok(new_pid) => new_pid.0 as i32,
            Err(err) => {
                self.platform
                    .debug_write(&format!("process {}: spawn failed: {}\n", pid.0, err));
                self.note_fail(pid, SYS_SPAWN);
                -1
            }
        };
        self.push_result(pid, result)
    }

    fn sys_read(&mut self, pid: Pid) -> Result<(), Fault> {
        let fd = {
            let Some(slot) = self.table.slot_mut(pid) else {
                return Ok(());
            };
            require_cap(slot, Cap::FS_READ)?;
            slot.pop().ok_or(Fault::StackUnderflow)?
        };
        let result = if fd < 0 {
            -1
        } else {
            let mut byte = [0u8; 1];
            match self.vfs.read_fd(fd, &mut byte) {
                Ok(1) => byte[0] as i32,
                Ok(_) => 0,
                Err(_) => -1,
            }
        };
        if result < 0 {
            self.note_fail(pid, SYS_READ);
        }
        self.push_result(pid, result)
    }

    fn sys_write(&mut self, pid: Pid) -> Result<(), Fault> {
        let (fd, byte) = {
            let Some(slot) = self.table.slot_mut(pid) else {
                return Ok(());
            };
            require_cap(slot, Cap::FS_WRITE)?;
            if slot.sp() < 2 {
                return Err(Fault::StackUnderflow);
            }
            let byte = slot.pop().ok_or(Fault::StackUnderflow)?;
            let fd = slot.pop().ok_or(Fault::StackUnderflow)?;
            (fd, (byte & 0xFF) as u8)
        };
        let result = if fd == 1 || fd == 2 {
            self.kprint_byte(byte);
            1
        } else if fd < 0 {
            -1
        } else {
            match self.vfs.write_fd(fd, &[byte]) {
                Ok(n) => n as i32,
                Err(_) => -1,
            }
        };
        if result < 0 {
            self.note_fail(pid, SYS_WRITE);
        }
        self.push_result(pid, result)
    }

    fn sys_open(&mut self, pid: Pid) -> Result<(), Fault> {
        let path = {
            let Some(slot) = self.table.slot_mut(pid) else {
                return Ok(());
            };
            require_cap(slot, Cap::FS_READ)?;
            pop_string(slot)
        };
        let result = match path {
            Some(path) => match self.vfs.open(&path, OpenFlags::read_write()) {
                Ok(fd) => fd,
                Err(_) => -1,
            },
            None => -1,
        };
        if result < 0 {
            self.note_fail(pid, SYS_OPEN);
        }
        self.push_result(pid, result)
    }

    fn sys_delete(&mut self, pid: Pid) -> Result<(), Fault> {
        let path = {
            let Some(slot) = self.table.slot_mut(pid) else {
                return Ok(());
            };
            require_cap(slot, Cap::FS_DELETE)?;
            pop_string(slot)
        };
        let result = match path {
            Some(path) => match self.vfs.delete(&path) {
                Ok(()) => 0,
                Err(_) => -1,
            },
            None => -1,
        };
        if result < 0 {
            self.note_fail(pid, SYS_DELETE);
        }
        self.push_result(pid, result)
    }

    fn sys_msg_send(&mut self, pid: Pid) -> Result<(), Fault> {
        let (recipient, content) = {
            let Some(slot) = self.table.slot_mut(pid) else {
                return Ok(());
            };
            if slot.sp() < 2 {
                return Err(Fault::StackUnderflow);
            }
            let byte = slot.pop().ok_or(Fault::StackUnderflow)?;
            let recipient = slot.pop().ok_or(Fault::StackUnderflow)?;
            (Pid((recipient & 0xFFFF) as u16), (byte & 0xFF) as u8)
        };
        let ticks = self.table.timer_ticks;
        if self
            .queue
            .send(Message {
                recipient,
                sender: pid,
                content,
            })
            .is_err()
        {
            self.platform
                .debug_write(&format!("process {}: message queue full\n", pid.0));
            self.note_fail(pid, SYS_MSG_SEND);
            return self.push_result(pid, -1);
        }
        self.klog.record(
            EventKind::MessageSent {
                from: pid,
                to: recipient,
            },
            ticks,
        );

        // Wake the recipient if it is parked in a receive.
        let woken = match self.table.slot_mut(recipient) {
            Some(slot) if slot.active && slot.blocked => {
                slot.blocked = false;
                slot.wakeup_reason = WAKE_MESSAGE;
                true
            }
            _ => false,
        };
        if woken {
            self.klog.record(
                EventKind::ProcessWoken {
                    pid: recipient,
                    reason: WAKE_MESSAGE,
                },
                ticks,
            );
            self.platform
                .debug_write(&format!("process {}: woken by message\n", recipient.0));
        }
        Ok(())
    }

    fn sys_msg_receive(&mut self, pid: Pid) -> Result<(), Fault> {
        if !self.queue.has_message_for(pid) {
            let ticks = self.table.timer_ticks;
            if let Some(slot) = self.table.slot_mut(pid) {
                slot.blocked = true;
                // Rewind over `SYSCALL id` so the wakeup re-executes the
                // receive; no message is consumed by a blocked receive.
                slot.ip -= 2;
            }
            self.klog.record(EventKind::ProcessBlocked { pid }, ticks);
            self.platform
                .debug_write(&format!("process {}: no messages, blocking\n", pid.0));
            return Ok(());
        }

        // Room for sender and content is checked before the dequeue so a
        // full stack cannot lose a message.
        {
            let Some(slot) = self.table.slot(pid) else {
                return Ok(());
            };
            if slot.sp() + 2 > STACK_SIZE {
                return Err(Fault::StackOverflow);
            }
        }
        let Some(msg) = self.queue.receive_for(pid) else {
            return Ok(());
        };
        if let Some(slot) = self.table.slot_mut(pid) {
            let _ = slot.push(msg.sender.0 as i32);
            let _ = slot.push(msg.content as i32);
        }
        Ok(())
    }

    fn sys_port_in(&mut self, pid: Pid) -> Result<(), Fault> {
        let port = {
            let Some(slot) = self.table.slot_mut(pid) else {
                return Ok(());
            };
            require_cap(slot, Cap::DRV_ACCESS)?;
            let port = slot.pop().ok_or(Fault::StackUnderflow)?;
            (port & 0xFFFF) as u16
        };
        let result = match self.platform.port_in_b(port) {
            Ok(value) => value as i32,
            Err(_) => -1,
        };
        if result < 0 {
            self.note_fail(pid, SYS_PORT_IN_B);
        }
        self.push_result(pid, result)
    }

    fn sys_port_out(&mut self, pid: Pid) -> Result<(), Fault> {
        let (port, value) = {
            let Some(slot) = self.table.slot_mut(pid) else {
                return Ok(());
            };
            require_cap(slot, Cap::DRV_ACCESS)?;
            if slot.sp() < 2 {
                return Err(Fault::StackUnderflow);
            }
            let value = slot.pop().ok_or(Fault::StackUnderflow)?;
            let port = slot.pop().ok_or(Fault::StackUnderflow)?;
            ((port & 0xFFFF) as u16, (value & 0xFF) as u8)
        };
        if let Err(err) = self.platform.port_out_b(port, value) {
            self.platform
                .debug_write(&format!("process {}: port out failed: {}\n", pid.0, err));
            self.note_fail(pid, SYS_PORT_OUT_B);
        }
        Ok(())
    }

    fn sys_print(&mut self, pid: Pid) -> Result<(), Fault> {
        let byte = {
            let Some(slot) = self.table.slot_mut(pid) else {
                return Ok(());
            };
            let value = slot.pop().ok_or(Fault::StackUnderflow)?;
            (value & 0xFF) as u8
        };
        self.kprint_byte(byte);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use nvm_core::{CapSet, Image, MAGIC};

    fn slot_with_stack(values: &[i32]) -> ProcessSlot {
        let mut slot = ProcessSlot::vacant(Pid(0));
        slot.seat(
            Image::parse(MAGIC.to_vec()).unwrap(),
            CapSet::new(),
            values.to_vec(),
        );
        slot
    }

    // ========================================================================
    // String marshalling
    // ========================================================================

    #[test]
    fn test_pop_string_reads_chars_above_terminator() {
        let mut slot = slot_with_stack(&[7, 0, b'h' as i32, b'i' as i32]);
        assert_eq!(pop_string(&mut slot).as_deref(), Some("hi"));
        // Terminator and characters consumed, the 7 below survives
        assert_eq!(slot.stack, [7]);
    }

    #[test]
    fn test_pop_string_empty_when_zero_on_top() {
        let mut slot = slot_with_stack(&[b'x' as i32, 0]);
        assert_eq!(pop_string(&mut slot).as_deref(), Some(""));
        assert_eq!(slot.stack, [b'x' as i32]);
    }

    #[test]
    fn test_pop_string_without_terminator() {
        let mut slot = slot_with_stack(&[b'h' as i32, b'i' as i32]);
        assert_eq!(pop_string(&mut slot), None);
        // Untouched on failure
        assert_eq!(slot.sp(), 2);
    }

    #[test]
    fn test_pop_string_uses_low_byte() {
        let mut slot = slot_with_stack(&[0, 0x141]); // 0x141 & 0xFF == 'A'
        assert_eq!(pop_string(&mut slot).as_deref(), Some("A"));
    }

    #[test]
    fn test_pop_args_topmost_run_first() {
        // Layout for SPAWN(["echo", "hi"]): argv pushed in reverse, each
        // run preceded (below) by its terminator, argv[0] on top.
        let mut slot = slot_with_stack(&[
            0,
            b'h' as i32,
            b'i' as i32,
            0,
            b'e' as i32,
            b'c' as i32,
            b'h' as i32,
            b'o' as i32,
        ]);
        let args = pop_args(&mut slot, 2).unwrap();
        assert_eq!(args, vec![b"echo".to_vec(), b"hi".to_vec()]);
        assert_eq!(slot.sp(), 0, "both terminators consumed");
    }

    #[test]
    fn test_pop_args_leaves_lower_stack() {
        let mut slot = slot_with_stack(&[42, 0, b'a' as i32]);
        let args = pop_args(&mut slot, 1).unwrap();
        assert_eq!(args, vec![b"a".to_vec()]);
        assert_eq!(slot.stack, [42]);
    }

    #[test]
    fn test_pop_args_rejects_missing_terminator() {
        let mut slot = slot_with_stack(&[0, b'a' as i32, 0, b'b' as i32]);
        // Three args requested but only two runs exist
        assert_eq!(pop_args(&mut slot, 3), None);
        assert_eq!(slot.sp(), 4, "untouched on failure");
    }

    #[test]
    fn test_pop_args_rejects_empty_run() {
        let mut slot = slot_with_stack(&[0, b'a' as i32, 0, 0, b'b' as i32]);
        // The middle run between the two zeros is empty
        assert_eq!(pop_args(&mut slot, 3), None);
    }

    #[test]
    fn test_pop_args_zero_argc() {
        let mut slot = slot_with_stack(&[1, 2, 3]);
        assert_eq!(pop_args(&mut slot, 0), Some(Vec::new()));
        assert_eq!(slot.sp(), 3);
    }

    // ========================================================================
    // Capability helper
    // ========================================================================

    #[test]
    fn test_require_cap_fails_closed() {
        let slot = slot_with_stack(&[]);
        assert_eq!(
            require_cap(&slot, Cap::DRV_ACCESS),
            Err(Fault::CapDenied(Cap::DRV_ACCESS))
        );
    }

    #[test]
    fn test_require_cap_accepts_wildcard() {
        let mut slot = ProcessSlot::vacant(Pid(0));
        slot.seat(
            Image::parse(MAGIC.to_vec()).unwrap(),
            CapSet::from_tokens(&[Cap::ALL]).unwrap(),
            Vec::new(),
        );
        assert_eq!(require_cap(&slot, Cap::DRV_ACCESS), Ok(()));
    }
}
