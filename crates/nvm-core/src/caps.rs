//! Capability-based access control
//!
//! This module implements the per-process capability store:
//! - 16-bit capability tokens with an `ALL` wildcard
//! - The per-process ordered capability set with a fixed capacity
//!
//! # Security Properties
//!
//! 1. **Fail Closed**: `has` returns false for anything not granted
//! 2. **No Rights Escalation**: the set only ever holds tokens that were
//!    explicitly added or copied from another process
//! 3. **Check Before Mutation**: every gated syscall and opcode consults
//!    `has` before popping or mutating any stack state

use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use crate::types::MAX_CAPS;

/// A capability token - proof of authority over a syscall category.
///
/// Tokens are 16-bit on the wire. The named constants below are the set
/// recognised by the syscall gateway; the driver group tokens are
/// reserved and currently gate nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cap(pub u16);

impl Cap {
    /// The empty token; grants nothing
    pub const NONE: Cap = Cap(0x0000);
    /// Open and read files, required to spawn
    pub const FS_READ: Cap = Cap(0x0001);
    /// Write to files and descriptors
    pub const FS_WRITE: Cap = Cap(0x0002);
    /// Create files
    pub const FS_CREATE: Cap = Cap(0x0003);
    /// Unlink files
    pub const FS_DELETE: Cap = Cap(0x0004);
    /// Memory-manager operations
    pub const MEM_MGMT: Cap = Cap(0x0005);
    /// Raw port I/O and absolute memory access
    pub const DRV_ACCESS: Cap = Cap(0x0006);
    /// Process management
    pub const PROC_MGMT: Cap = Cap(0x0007);
    /// Capability management
    pub const CAPS_MGMT: Cap = Cap(0x0008);
    /// Storage driver group (reserved)
    pub const DRV_STORAGE: Cap = Cap(0x0100);
    /// Video driver group (reserved)
    pub const DRV_VIDEO: Cap = Cap(0x0200);
    /// Network driver group (reserved)
    pub const DRV_NETWORK: Cap = Cap(0x0400);
    /// Wildcard: matches every check
    pub const ALL: Cap = Cap(0xFFFF);

    /// Raw wire value of this token.
    pub fn raw(self) -> u16 {
        self.0
    }
}

/// Error: the capability set is at capacity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapsExhausted;

impl core::fmt::Display for CapsExhausted {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "capability set is full")
    }
}

/// Per-process ordered capability set.
///
/// Holds up to [`MAX_CAPS`] tokens in insertion order. A set containing
/// [`Cap::ALL`] satisfies every check.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapSet {
    caps: Vec<Cap>,
}

impl CapSet {
    /// Create an empty capability set.
    pub fn new() -> Self {
        Self { caps: Vec::new() }
    }

    /// Create a set from an initial token list.
    ///
    /// Tokens beyond [`MAX_CAPS`] are rejected.
    pub fn from_tokens(tokens: &[Cap]) -> Result<Self, CapsExhausted> {
        let mut set = Self::new();
        for &cap in tokens {
            set.add(cap)?;
        }
        Ok(set)
    }

    /// Check whether the set grants `cap`.
    ///
    /// True if any held token equals `cap` or equals [`Cap::ALL`].
    pub fn has(&self, cap: Cap) -> bool {
        self.caps.iter().any(|&c| c == Cap::ALL || c == cap)
    }

    /// Add a token.
    ///
    /// A no-op if the set already grants `cap`; fails when the set is at
    /// capacity.
    pub fn add(&mut self, cap: Cap) -> Result<(), CapsExhausted> {
        if self.has(cap) {
            return Ok(());
        }
        if self.caps.len() >= MAX_CAPS {
            return Err(CapsExhausted);
        }
        self.caps.push(cap);
        Ok(())
    }

    /// Remove the first token equal to `cap`, compacting the tail.
    ///
    /// Returns whether a token was removed. Only exact matches are
    /// removed; the wildcard is a distinct token.
    pub fn remove(&mut self, cap: Cap) -> bool {
        if let Some(pos) = self.caps.iter().position(|&c| c == cap) {
            self.caps.remove(pos);
            true
        } else {
            false
        }
    }

    /// Empty the set.
    pub fn clear(&mut self) {
        self.caps.clear();
    }

    /// Replace this set with a copy of `src`.
    pub fn copy_from(&mut self, src: &CapSet) {
        self.caps.clear();
        self.caps.extend_from_slice(&src.caps);
    }

    /// Held tokens in insertion order.
    pub fn tokens(&self) -> &[Cap] {
        &self.caps
    }

    /// Number of held tokens.
    pub fn len(&self) -> usize {
        self.caps.len()
    }

    /// Whether the set holds no tokens.
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }
}
