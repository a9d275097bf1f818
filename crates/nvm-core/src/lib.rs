//! NVM core - pure state machine for the in-kernel bytecode VM
//!
//! This crate contains the **pure, platform-free** heart of the NVM: the
//! process table, the capability store, the message queue, the bytecode
//! image format and the single-step interpreter. All platform behaviour
//! (console, ports, the absolute-memory window) lives behind narrow seams
//! and is provided by the runtime wrapper (`nvm-kernel`).
//!
//! # Design Principles
//!
//! 1. **No platform dependency**: effectful opcodes reach hardware only
//!    through the [`interp::AbsMemory`] bus trait
//! 2. **Deterministic**: one instruction in, one state transition out
//! 3. **Fail closed**: capability checks run before any stack mutation
//! 4. **Single owner**: every slot's stack and locals are exclusively
//!    owned by that slot; the scheduler hands out one `&mut` at a time
//!
//! # Module Organization
//!
//! - `types` - process ids, message records, core limits
//! - `caps` - capability tokens and the per-process capability set
//! - `image` - bytecode image format, magic validation, opcode table
//! - `process` - process slots and the round-robin process table
//! - `queue` - the bounded synchronous message queue
//! - `interp` - the single-step interpreter (`step`)
//! - `invariants` - invariant assertions checked by tests
//! - `testing` - bytecode assembler for building test images

#![no_std]
extern crate alloc;

pub mod caps;
pub mod image;
pub mod interp;
pub mod invariants;
pub mod process;
pub mod queue;
pub mod testing;
pub mod types;

// Re-export all public types for convenient access
pub use caps::{Cap, CapSet, CapsExhausted};
pub use image::{Image, InvalidMagic, Opcode, MAGIC};
pub use interp::{step, AbsMemory, Fault, StepOutcome};
pub use invariants::{check_all_invariants, InvariantViolation};
pub use process::{ProcessSlot, ProcessTable};
pub use queue::{MessageQueue, QueueFull};
pub use types::{
    Message, Pid, MAX_CAPS, MAX_LOCALS, MAX_MESSAGES, MAX_PROCESSES, STACK_SIZE, TIME_SLICE,
    WAKE_MESSAGE, WAKE_NONE,
};
