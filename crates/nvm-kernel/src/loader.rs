//! Image loader
//!
//! Validates the magic header, finds a free slot and seats the image
//! with its initial capability list. Spawned children arrive with a
//! pre-built argv stack; plain loads start with an empty one.

use alloc::format;
use alloc::vec::Vec;

use nvm_core::{Cap, CapSet, Image, Pid, STACK_SIZE};
use nvm_hal::Platform;

use crate::klog::EventKind;
use crate::Nvm;

/// Reasons an image cannot be loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadError {
    /// The buffer does not start with the image magic
    InvalidMagic,
    /// Every process slot is occupied
    NoFreeSlot,
    /// The seeded initial stack exceeds the stack capacity
    StackTooLarge,
    /// The initial capability list exceeds the set capacity
    TooManyCaps,
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            LoadError::InvalidMagic => "invalid image magic",
            LoadError::NoFreeSlot => "no free process slot",
            LoadError::StackTooLarge => "initial stack too large",
            LoadError::TooManyCaps => "too many initial capabilities",
        };
        write!(f, "{}", msg)
    }
}

impl<P: Platform> Nvm<P> {
    /// Load an image with an initial capability list; returns the pid.
    pub fn load_image(&mut self, bytes: Vec<u8>, caps: &[Cap]) -> Result<Pid, LoadError> {
        let caps = CapSet::from_tokens(caps).map_err(|_| LoadError::TooManyCaps)?;
        self.seat_image(bytes, caps, Vec::new())
    }

    /// Load an image with a pre-built initial stack (used by spawn).
    pub fn load_image_with_stack(
        &mut self,
        bytes: Vec<u8>,
        caps: &[Cap],
        initial_stack: Vec<i32>,
    ) -> Result<Pid, LoadError> {
        let caps = CapSet::from_tokens(caps).map_err(|_| LoadError::TooManyCaps)?;
        self.seat_image(bytes, caps, initial_stack)
    }

    /// Validate, find a slot and seat. The capability set is taken as a
    /// whole so spawn can hand over a copy of the parent's.
    pub(crate) fn seat_image(
        &mut self,
        bytes: Vec<u8>,
        caps: CapSet,
        initial_stack: Vec<i32>,
    ) -> Result<Pid, LoadError> {
        let image = Image::parse(bytes).map_err(|_| LoadError::InvalidMagic)?;
        if initial_stack.len() > STACK_SIZE {
            return Err(LoadError::StackTooLarge);
        }
        let pid = self.table.find_free().ok_or(LoadError::NoFreeSlot)?;
        let ticks = self.table.timer_ticks;
        if let Some(slot) = self.table.slot_mut(pid) {
            slot.seat(image, caps, initial_stack);
        }
        self.klog.record(EventKind::ProcessLoaded { pid }, ticks);
        self.platform
            .debug_write(&format!("process created with pid {}\n", pid.0));
        Ok(pid)
    }
}
