//! The single-step bytecode interpreter
//!
//! `step` advances exactly one instruction of one process, mutating its
//! stack, locals and instruction pointer. The outcome is a sum type: the
//! process either stepped, halted, requested a syscall, or faulted.
//! Blocking is not decided here - it is a property of the syscall
//! gateway, which the runtime invokes on a `Syscall` outcome.
//!
//! # Decoding contract
//!
//! At entry `4 <= ip < size`. The opcode byte is fetched and ip advances
//! by one; operand bytes (little-endian for multi-byte immediates) are
//! fetched the same way. A fetch that would pass the end of the image is
//! a `TruncatedInstr` fault.
//!
//! # Fault discipline
//!
//! Every instruction's stack precondition is checked before any value is
//! popped or pushed, so a faulting instruction never leaves a partially
//! mutated stack behind. All faults are fatal to the process; the
//! runtime terminates the slot with exit code -1.

use serde::{Deserialize, Serialize};

use crate::caps::Cap;
use crate::image::{Image, Opcode};
use crate::process::ProcessSlot;

/// Access to the whitelisted absolute-memory window.
///
/// The core is platform-free; the runtime adapts its platform to this
/// bus. `None`/`false` mean the address is outside every whitelisted
/// window, which the interpreter reports as a fatal fault.
pub trait AbsMemory {
    /// Read the i32 at `addr`, if the address is whitelisted.
    fn load(&self, addr: u32) -> Option<i32>;

    /// Write an i32 to `addr`; false if the address is not whitelisted.
    fn store(&mut self, addr: u32, value: i32) -> bool;
}

/// A fatal interpreter fault. The owning process terminates with exit
/// code -1 and the fault is reported on the diagnostic channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fault {
    /// Opcode byte not in the instruction table
    InvalidOpcode(u8),
    /// An operand fetch ran past the end of the image
    TruncatedInstr,
    /// An instruction needed more stack values than were live
    StackUnderflow,
    /// A push would exceed the stack capacity
    StackOverflow,
    /// Jump or return target outside `[4, size)`
    BadJumpTarget(u32),
    /// DIV or MOD with a zero divisor
    DivByZero,
    /// Local variable index outside the locals array
    InvalidVarIndex(u8),
    /// Absolute address outside every whitelisted window
    BadAbsAddress(u32),
    /// The instruction pointer left the image
    IpOutOfRange,
    /// A required capability is not held
    CapDenied(Cap),
}

impl core::fmt::Display for Fault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Fault::InvalidOpcode(op) => write!(f, "invalid opcode 0x{:02X}", op),
            Fault::TruncatedInstr => write!(f, "truncated instruction"),
            Fault::StackUnderflow => write!(f, "stack underflow"),
            Fault::StackOverflow => write!(f, "stack overflow"),
            Fault::BadJumpTarget(addr) => write!(f, "bad jump target 0x{:X}", addr),
            Fault::DivByZero => write!(f, "division by zero"),
            Fault::InvalidVarIndex(idx) => write!(f, "invalid variable index {}", idx),
            Fault::BadAbsAddress(addr) => write!(f, "bad absolute address 0x{:X}", addr),
            Fault::IpOutOfRange => write!(f, "instruction pointer out of range"),
            Fault::CapDenied(cap) => write!(f, "capability 0x{:04X} denied", cap.raw()),
        }
    }
}

/// Result of one interpreter step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The instruction completed; the process remains runnable
    Stepped,
    /// HALT: the process terminated with exit code 0
    Halted,
    /// SYSCALL: transfer to the gateway with the fetched id
    Syscall(u8),
    /// A fatal fault; the process terminates with exit code -1
    Faulted(Fault),
}

/// Internal control flow of a successfully decoded instruction.
enum Flow {
    Continue,
    Halt,
    Sys(u8),
}

/// Advance `proc` by exactly one instruction.
pub fn step(proc: &mut ProcessSlot, bus: &mut dyn AbsMemory) -> StepOutcome {
    match exec(proc, bus) {
        Ok(Flow::Continue) => StepOutcome::Stepped,
        Ok(Flow::Halt) => StepOutcome::Halted,
        Ok(Flow::Sys(id)) => StepOutcome::Syscall(id),
        Err(fault) => StepOutcome::Faulted(fault),
    }
}

fn fetch_u8(proc: &mut ProcessSlot) -> Result<u8, Fault> {
    let byte = proc.image.read_u8(proc.ip).ok_or(Fault::TruncatedInstr)?;
    proc.ip += 1;
    Ok(byte)
}

fn fetch_i32(proc: &mut ProcessSlot) -> Result<i32, Fault> {
    let value = proc.image.read_i32_le(proc.ip).ok_or(Fault::TruncatedInstr)?;
    proc.ip += 4;
    Ok(value)
}

fn pop(proc: &mut ProcessSlot) -> Result<i32, Fault> {
    proc.pop().ok_or(Fault::StackUnderflow)
}

/// Pop the top two values as `(second, top)`.
fn pop2(proc: &mut ProcessSlot) -> Result<(i32, i32), Fault> {
    if proc.sp() < 2 {
        return Err(Fault::StackUnderflow);
    }
    let top = proc.pop().ok_or(Fault::StackUnderflow)?;
    let second = proc.pop().ok_or(Fault::StackUnderflow)?;
    Ok((second, top))
}

fn push(proc: &mut ProcessSlot, value: i32) -> Result<(), Fault> {
    if proc.push(value) {
        Ok(())
    } else {
        Err(Fault::StackOverflow)
    }
}

/// Install a validated jump target.
fn jump_to(proc: &mut ProcessSlot, target: u32) -> Result<(), Fault> {
    if target >= Image::ENTRY && target < proc.size() {
        proc.ip = target;
        Ok(())
    } else {
        Err(Fault::BadJumpTarget(target))
    }
}

fn exec(proc: &mut ProcessSlot, bus: &mut dyn AbsMemory) -> Result<Flow, Fault> {
    if proc.ip < Image::ENTRY || proc.ip >= proc.size() {
        return Err(Fault::IpOutOfRange);
    }

    let byte = fetch_u8(proc)?;
    let op = Opcode::from_u8(byte).ok_or(Fault::InvalidOpcode(byte))?;

    match op {
        Opcode::Halt => return Ok(Flow::Halt),
        Opcode::Nop => {}

        Opcode::Push32 => {
            let value = fetch_i32(proc)?;
            push(proc, value)?;
        }
        Opcode::Pop => {
            pop(proc)?;
        }
        Opcode::Dup => {
            let top = proc.peek().ok_or(Fault::StackUnderflow)?;
            push(proc, top)?;
        }
        Opcode::Swap => {
            let (second, top) = pop2(proc)?;
            push(proc, top)?;
            push(proc, second)?;
        }

        // Arithmetic is wrapping two's-complement; operand order is
        // `second OP top`.
        Opcode::Add => {
            let (second, top) = pop2(proc)?;
            push(proc, second.wrapping_add(top))?;
        }
        Opcode::Sub => {
            let (second, top) = pop2(proc)?;
            push(proc, second.wrapping_sub(top))?;
        }
        Opcode::Mul => {
            let (second, top) = pop2(proc)?;
            push(proc, second.wrapping_mul(top))?;
        }
        Opcode::Div => {
            let (second, top) = checked_divisor(proc)?;
            push(proc, second.wrapping_div(top))?;
        }
        Opcode::Mod => {
            let (second, top) = checked_divisor(proc)?;
            push(proc, second.wrapping_rem(top))?;
        }

        Opcode::Cmp => {
            let (second, top) = pop2(proc)?;
            let sign = match second.cmp(&top) {
                core::cmp::Ordering::Less => -1,
                core::cmp::Ordering::Equal => 0,
                core::cmp::Ordering::Greater => 1,
            };
            push(proc, sign)?;
        }
        Opcode::Eq => {
            let (second, top) = pop2(proc)?;
            push(proc, (second == top) as i32)?;
        }
        Opcode::Neq => {
            let (second, top) = pop2(proc)?;
            push(proc, (second != top) as i32)?;
        }
        Opcode::Gt => {
            let (second, top) = pop2(proc)?;
            push(proc, (second > top) as i32)?;
        }
        Opcode::Lt => {
            let (second, top) = pop2(proc)?;
            push(proc, (second < top) as i32)?;
        }

        Opcode::Jmp32 => {
            let target = fetch_i32(proc)? as u32;
            jump_to(proc, target)?;
        }
        Opcode::Jz32 => {
            let target = fetch_i32(proc)? as u32;
            let value = pop(proc)?;
            if value == 0 {
                jump_to(proc, target)?;
            }
        }
        Opcode::Jnz32 => {
            let target = fetch_i32(proc)? as u32;
            let value = pop(proc)?;
            if value != 0 {
                jump_to(proc, target)?;
            }
        }
        Opcode::Call32 => {
            let target = fetch_i32(proc)? as u32;
            // Target and capacity are validated before the return address
            // is pushed, so a failed call leaves the stack untouched.
            if !(Image::ENTRY..proc.size()).contains(&target) {
                return Err(Fault::BadJumpTarget(target));
            }
            push(proc, proc.ip as i32)?;
            proc.ip = target;
        }
        Opcode::Ret => {
            let target = pop(proc)? as u32;
            jump_to(proc, target)?;
        }

        Opcode::Load => {
            let idx = fetch_u8(proc)?;
            let value = *proc
                .locals
                .get(idx as usize)
                .ok_or(Fault::InvalidVarIndex(idx))?;
            push(proc, value)?;
        }
        Opcode::Store => {
            let idx = fetch_u8(proc)?;
            if (idx as usize) >= proc.locals.len() {
                return Err(Fault::InvalidVarIndex(idx));
            }
            if proc.sp() < 1 {
                return Err(Fault::StackUnderflow);
            }
            let value = pop(proc)?;
            proc.locals[idx as usize] = value;
        }

        // Absolute access is gated on the driver capability before any
        // stack value is touched.
        Opcode::LoadAbs => {
            if !proc.caps.has(Cap::DRV_ACCESS) {
                return Err(Fault::CapDenied(Cap::DRV_ACCESS));
            }
            let addr = proc.peek().ok_or(Fault::StackUnderflow)? as u32;
            let value = bus.load(addr).ok_or(Fault::BadAbsAddress(addr))?;
            if let Some(top) = proc.stack.last_mut() {
                *top = value;
            }
        }
        Opcode::StoreAbs => {
            if !proc.caps.has(Cap::DRV_ACCESS) {
                return Err(Fault::CapDenied(Cap::DRV_ACCESS));
            }
            let sp = proc.sp();
            if sp < 2 {
                return Err(Fault::StackUnderflow);
            }
            let value = proc.stack[sp - 1];
            let addr = proc.stack[sp - 2] as u32;
            if !bus.store(addr, value) {
                return Err(Fault::BadAbsAddress(addr));
            }
            proc.stack.truncate(sp - 2);
        }

        Opcode::Syscall => {
            let id = fetch_u8(proc)?;
            return Ok(Flow::Sys(id));
        }
        Opcode::Break => {
            // Debug trap: advances ip only.
        }
    }

    Ok(Flow::Continue)
}

/// Stack and divisor preconditions for DIV/MOD, checked before any pop.
fn checked_divisor(proc: &mut ProcessSlot) -> Result<(i32, i32), Fault> {
    if proc.sp() < 2 {
        return Err(Fault::StackUnderflow);
    }
    if proc.peek() == Some(0) {
        return Err(Fault::DivByZero);
    }
    pop2(proc)
}
