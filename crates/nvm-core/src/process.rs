//! Process slots and the round-robin process table
//!
//! The process table is a fixed-capacity array of slots; the slot index
//! is the process id. A slot is seated by the loader, mutated only by
//! the interpreter while its process is scheduled, and released on
//! termination (the exit code stays readable until the slot is reused).

use alloc::vec;
use alloc::vec::Vec;

use crate::caps::CapSet;
use crate::image::Image;
use crate::types::{Pid, MAX_LOCALS, MAX_PROCESSES, STACK_SIZE, TIME_SLICE, WAKE_NONE};

/// One process-table entry.
pub struct ProcessSlot {
    /// Process id == slot index
    pub pid: Pid,
    /// The bytecode image, exclusively owned by this slot while active
    pub image: Image,
    /// Next-instruction offset into the image
    pub ip: u32,
    /// Value stack; the live count is the stack pointer
    pub stack: Vec<i32>,
    /// Local variable cells, zero-initialised at load
    pub locals: Vec<i32>,
    /// Capability set installed by the loader
    pub caps: CapSet,
    /// Whether the slot holds a live process
    pub active: bool,
    /// Set when a syscall cannot complete now; cleared on wakeup
    pub blocked: bool,
    /// Tag recorded by the waker; informational only
    pub wakeup_reason: u8,
    /// Exit code, valid once the process has terminated
    pub exit_code: i32,
}

impl ProcessSlot {
    /// A vacant slot, eligible for the loader.
    pub fn vacant(pid: Pid) -> Self {
        Self {
            pid,
            image: Image::vacant(),
            ip: 0,
            stack: Vec::new(),
            locals: Vec::new(),
            caps: CapSet::new(),
            active: false,
            blocked: false,
            wakeup_reason: WAKE_NONE,
            exit_code: 0,
        }
    }

    /// Seat a new process in this slot.
    ///
    /// Sets ip to the entry point, installs the initial stack (empty for
    /// plain loads, argv-seeded for spawn), zeroes the locals and marks
    /// the slot active. The caller has already validated the image and
    /// checked that the slot is free.
    pub fn seat(&mut self, image: Image, caps: CapSet, initial_stack: Vec<i32>) {
        debug_assert!(!self.active);
        debug_assert!(initial_stack.len() <= STACK_SIZE);
        self.image = image;
        self.ip = Image::ENTRY;
        self.stack = initial_stack;
        self.stack.reserve(STACK_SIZE - self.stack.len());
        self.locals = vec![0; MAX_LOCALS];
        self.caps = caps;
        self.active = true;
        self.blocked = false;
        self.wakeup_reason = WAKE_NONE;
        self.exit_code = 0;
    }

    /// Terminate the process, releasing the slot for reuse.
    ///
    /// The exit code stays readable until the slot is reseated.
    pub fn terminate(&mut self, code: i32) {
        self.exit_code = code;
        self.active = false;
        self.blocked = false;
    }

    /// Image length in bytes.
    pub fn size(&self) -> u32 {
        self.image.size()
    }

    /// Live stack value count.
    pub fn sp(&self) -> usize {
        self.stack.len()
    }

    /// Whether the scheduler may run this slot.
    pub fn runnable(&self) -> bool {
        self.active && !self.blocked
    }

    /// Push a value; false on overflow.
    #[must_use]
    pub fn push(&mut self, value: i32) -> bool {
        if self.stack.len() >= STACK_SIZE {
            return false;
        }
        self.stack.push(value);
        true
    }

    /// Pop the top value, if any.
    pub fn pop(&mut self) -> Option<i32> {
        self.stack.pop()
    }

    /// The top value without popping.
    pub fn peek(&self) -> Option<i32> {
        self.stack.last().copied()
    }
}

/// Fixed-capacity process table with a round-robin scheduler cursor.
pub struct ProcessTable {
    slots: Vec<ProcessSlot>,
    /// Scheduler cursor: index of the last slot handed out
    current: usize,
    /// Tick counter driving the time-slice throttle
    pub timer_ticks: u64,
}

impl ProcessTable {
    /// Create a table with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(MAX_PROCESSES)
    }

    /// Create a table with an explicit slot count.
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| ProcessSlot::vacant(Pid(i as u16)))
            .collect();
        Self {
            slots,
            current: 0,
            timer_ticks: 0,
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Borrow a slot.
    pub fn slot(&self, pid: Pid) -> Option<&ProcessSlot> {
        self.slots.get(pid.0 as usize)
    }

    /// Mutably borrow a slot.
    pub fn slot_mut(&mut self, pid: Pid) -> Option<&mut ProcessSlot> {
        self.slots.get_mut(pid.0 as usize)
    }

    /// All slots, for invariant checks and wakeup scans.
    pub fn slots(&self) -> &[ProcessSlot] {
        &self.slots
    }

    /// Mutable access to all slots (wakeup scan).
    pub fn slots_mut(&mut self) -> &mut [ProcessSlot] {
        &mut self.slots
    }

    /// First vacant slot, if any.
    pub fn find_free(&self) -> Option<Pid> {
        self.slots.iter().find(|s| !s.active).map(|s| s.pid)
    }

    /// Number of live processes.
    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }

    /// Number of live, unblocked processes.
    pub fn runnable_count(&self) -> usize {
        self.slots.iter().filter(|s| s.runnable()).count()
    }

    /// Advance the tick counter; true when this tick does interpreter work.
    ///
    /// The throttle shapes VM progress against the polling cadence of the
    /// shell's input loop and is observable only as latency.
    pub fn advance_timer(&mut self) -> bool {
        self.timer_ticks = self.timer_ticks.wrapping_add(1);
        self.timer_ticks % TIME_SLICE == 0
    }

    /// Round-robin selection of the next runnable slot.
    ///
    /// Advances the cursor to `(current + 1) mod N`, skipping slots that
    /// are inactive or blocked. With exactly one runnable slot that slot
    /// runs every time. When nothing is runnable the cursor is left where
    /// it was and `None` is returned.
    pub fn select_next_runnable(&mut self) -> Option<Pid> {
        let n = self.slots.len();
        for step in 1..=n {
            let idx = (self.current + step) % n;
            if self.slots[idx].runnable() {
                self.current = idx;
                return Some(self.slots[idx].pid);
            }
        }
        None
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::{Cap, CapSet};
    use crate::image::MAGIC;

    fn test_image() -> Image {
        Image::parse(MAGIC.to_vec()).unwrap()
    }

    fn seat_at(table: &mut ProcessTable, pid: Pid) {
        let caps = CapSet::from_tokens(&[Cap::ALL]).unwrap();
        table
            .slot_mut(pid)
            .unwrap()
            .seat(test_image(), caps, Vec::new());
    }

    // ========================================================================
    // Slot lifecycle tests
    // ========================================================================

    #[test]
    fn test_vacant_slot_is_not_runnable() {
        let slot = ProcessSlot::vacant(Pid(0));
        assert!(!slot.active);
        assert!(!slot.runnable());
        assert!(slot.image.is_vacant());
    }

    #[test]
    fn test_seat_initialises_slot() {
        let mut slot = ProcessSlot::vacant(Pid(3));
        let caps = CapSet::from_tokens(&[Cap::FS_READ]).unwrap();
        slot.seat(test_image(), caps, Vec::new());

        assert!(slot.active);
        assert!(!slot.blocked);
        assert_eq!(slot.ip, Image::ENTRY);
        assert_eq!(slot.sp(), 0);
        assert_eq!(slot.locals.len(), MAX_LOCALS);
        assert!(slot.locals.iter().all(|&v| v == 0));
        assert!(slot.caps.has(Cap::FS_READ));
    }

    #[test]
    fn test_seat_with_initial_stack() {
        let mut slot = ProcessSlot::vacant(Pid(0));
        slot.seat(test_image(), CapSet::new(), vec![104, 105, 0, 2]);
        assert_eq!(slot.sp(), 4);
        assert_eq!(slot.peek(), Some(2));
    }

    #[test]
    fn test_terminate_keeps_exit_code() {
        let mut slot = ProcessSlot::vacant(Pid(0));
        slot.seat(test_image(), CapSet::new(), Vec::new());
        slot.blocked = true;

        slot.terminate(42);
        assert!(!slot.active);
        assert!(!slot.blocked, "termination clears the blocked flag");
        assert_eq!(slot.exit_code, 42);
    }

    #[test]
    fn test_push_refuses_overflow() {
        let mut slot = ProcessSlot::vacant(Pid(0));
        slot.seat(test_image(), CapSet::new(), Vec::new());
        for i in 0..STACK_SIZE as i32 {
            assert!(slot.push(i));
        }
        assert!(!slot.push(0));
        assert_eq!(slot.sp(), STACK_SIZE);
    }

    // ========================================================================
    // Table tests
    // ========================================================================

    #[test]
    fn test_find_free_scans_in_order() {
        let mut table = ProcessTable::with_capacity(4);
        assert_eq!(table.find_free(), Some(Pid(0)));

        seat_at(&mut table, Pid(0));
        assert_eq!(table.find_free(), Some(Pid(1)));

        seat_at(&mut table, Pid(1));
        seat_at(&mut table, Pid(2));
        seat_at(&mut table, Pid(3));
        assert_eq!(table.find_free(), None);
    }

    #[test]
    fn test_terminated_slot_is_free_again() {
        let mut table = ProcessTable::with_capacity(2);
        seat_at(&mut table, Pid(0));
        seat_at(&mut table, Pid(1));
        assert_eq!(table.find_free(), None);

        table.slot_mut(Pid(0)).unwrap().terminate(0);
        assert_eq!(table.find_free(), Some(Pid(0)));
    }

    #[test]
    fn test_round_robin_alternates() {
        let mut table = ProcessTable::with_capacity(4);
        seat_at(&mut table, Pid(0));
        seat_at(&mut table, Pid(2));

        assert_eq!(table.select_next_runnable(), Some(Pid(2)));
        assert_eq!(table.select_next_runnable(), Some(Pid(0)));
        assert_eq!(table.select_next_runnable(), Some(Pid(2)));
        assert_eq!(table.select_next_runnable(), Some(Pid(0)));
    }

    #[test]
    fn test_single_runnable_slot_runs_every_time() {
        let mut table = ProcessTable::with_capacity(4);
        seat_at(&mut table, Pid(1));

        assert_eq!(table.select_next_runnable(), Some(Pid(1)));
        assert_eq!(table.select_next_runnable(), Some(Pid(1)));
    }

    #[test]
    fn test_selection_skips_blocked() {
        let mut table = ProcessTable::with_capacity(4);
        seat_at(&mut table, Pid(0));
        seat_at(&mut table, Pid(1));
        table.slot_mut(Pid(1)).unwrap().blocked = true;

        assert_eq!(table.select_next_runnable(), Some(Pid(0)));
        assert_eq!(table.select_next_runnable(), Some(Pid(0)));
    }

    #[test]
    fn test_selection_idle_leaves_cursor() {
        let mut table = ProcessTable::with_capacity(4);
        seat_at(&mut table, Pid(2));
        assert_eq!(table.select_next_runnable(), Some(Pid(2)));

        table.slot_mut(Pid(2)).unwrap().blocked = true;
        assert_eq!(table.select_next_runnable(), None);

        // Wakeup resumes from the unchanged cursor
        table.slot_mut(Pid(2)).unwrap().blocked = false;
        assert_eq!(table.select_next_runnable(), Some(Pid(2)));
    }

    #[test]
    fn test_advance_timer_throttles() {
        let mut table = ProcessTable::new();
        let mut work = 0;
        for _ in 0..10 {
            if table.advance_timer() {
                work += 1;
            }
        }
        assert_eq!(work as u64, 10 / TIME_SLICE);
    }

    #[test]
    fn test_counts() {
        let mut table = ProcessTable::with_capacity(8);
        seat_at(&mut table, Pid(0));
        seat_at(&mut table, Pid(1));
        seat_at(&mut table, Pid(2));
        table.slot_mut(Pid(1)).unwrap().blocked = true;

        assert_eq!(table.active_count(), 3);
        assert_eq!(table.runnable_count(), 2);
    }
}
