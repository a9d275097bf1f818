//! Test support: a tiny bytecode assembler
//!
//! Builds well-formed images for unit and integration tests without
//! hand-counting byte offsets. Forward references are patched at
//! `build` time. This module panics on misuse (unknown labels); it is
//! test tooling, not part of the VM.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::string::ToString;
use alloc::vec::Vec;

use crate::image::{Opcode, MAGIC};

/// Builder for bytecode images.
///
/// ```
/// use nvm_core::testing::Asm;
/// use nvm_core::Opcode;
///
/// let image = Asm::new()
///     .push32(15)
///     .push32(27)
///     .op(Opcode::Add)
///     .syscall(0x00)
///     .build();
/// assert_eq!(&image[..4], b"NVM0");
/// ```
pub struct Asm {
    bytes: Vec<u8>,
    labels: BTreeMap<String, u32>,
    fixups: Vec<(usize, String)>,
}

impl Asm {
    /// Start a new image; the magic header is already emitted.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            bytes: MAGIC.to_vec(),
            labels: BTreeMap::new(),
            fixups: Vec::new(),
        }
    }

    /// Emit a bare opcode.
    pub fn op(mut self, op: Opcode) -> Self {
        self.bytes.push(op as u8);
        self
    }

    /// Emit raw bytes verbatim.
    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// PUSH32 with a little-endian immediate.
    pub fn push32(mut self, value: i32) -> Self {
        self.bytes.push(Opcode::Push32 as u8);
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// HALT.
    pub fn halt(self) -> Self {
        self.op(Opcode::Halt)
    }

    /// LOAD from a local.
    pub fn load(mut self, idx: u8) -> Self {
        self.bytes.push(Opcode::Load as u8);
        self.bytes.push(idx);
        self
    }

    /// STORE into a local.
    pub fn store(mut self, idx: u8) -> Self {
        self.bytes.push(Opcode::Store as u8);
        self.bytes.push(idx);
        self
    }

    /// SYSCALL with an id byte.
    pub fn syscall(mut self, id: u8) -> Self {
        self.bytes.push(Opcode::Syscall as u8);
        self.bytes.push(id);
        self
    }

    /// Bind `name` to the current offset.
    pub fn label(mut self, name: &str) -> Self {
        self.labels.insert(name.to_string(), self.bytes.len() as u32);
        self
    }

    /// JMP32 to a label.
    pub fn jmp(self, target: &str) -> Self {
        self.branch(Opcode::Jmp32, target)
    }

    /// JZ32 to a label.
    pub fn jz(self, target: &str) -> Self {
        self.branch(Opcode::Jz32, target)
    }

    /// JNZ32 to a label.
    pub fn jnz(self, target: &str) -> Self {
        self.branch(Opcode::Jnz32, target)
    }

    /// CALL32 to a label.
    pub fn call(self, target: &str) -> Self {
        self.branch(Opcode::Call32, target)
    }

    /// JMP32 with a literal address, for bad-target tests.
    pub fn jmp_raw(mut self, target: u32) -> Self {
        self.bytes.push(Opcode::Jmp32 as u8);
        self.bytes.extend_from_slice(&target.to_le_bytes());
        self
    }

    fn branch(mut self, op: Opcode, target: &str) -> Self {
        self.bytes.push(op as u8);
        self.fixups.push((self.bytes.len(), target.to_string()));
        self.bytes.extend_from_slice(&[0; 4]);
        self
    }

    /// Current offset, where the next byte will land.
    pub fn here(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Resolve forward references and return the image bytes.
    ///
    /// # Panics
    ///
    /// Panics when a branch references a label that was never bound.
    pub fn build(mut self) -> Vec<u8> {
        for (at, name) in &self.fixups {
            let target = *self
                .labels
                .get(name)
                .unwrap_or_else(|| panic!("unbound label '{}'", name));
            self.bytes[*at..*at + 4].copy_from_slice(&target.to_le_bytes());
        }
        self.bytes
    }
}
