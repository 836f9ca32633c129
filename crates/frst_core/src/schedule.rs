//! Cycle ordered queue of deferred callbacks.
//!
//! Peripherals use this to inject timed effects into the instruction stream:
//! an event is an absolute cycle deadline paired with a callback, and the
//! queue is drained one callback at a time at block boundaries. The timing
//! guarantee is deliberately coarse: a callback runs at the first block
//! boundary at or after its deadline, never mid-instruction, so it always
//! observes a consistent machine state.

use crate::cpu::Cpu;
use crate::Cycle;

use std::sync::Mutex;

/// Callback invoked when a scheduled event comes due. The function pointer
/// is also the event's identity: ['Schedule::cancel'] removes every entry
/// with a matching pointer.
pub type EventFn = fn(&mut Cpu);

struct Entry {
    timeout: Cycle,
    callback: EventFn,
}

/// True if cycle `a` comes strictly before cycle `b`.
///
/// The cycle counter is monotonic but unbounded, so deadlines must be
/// compared by wrapping distance rather than magnitude: `a` is earlier
/// exactly when the wrapping difference `a - b` lands in the upper half of
/// the counter range.
fn comes_before(a: Cycle, b: Cycle) -> bool {
    a.wrapping_sub(b) > Cycle::MAX / 2
}

/// Handles events and the timing of the machine in general.
pub struct Schedule {
    /// The absolute cycle number: the number of cycles the machine has
    /// executed since startup.
    cycle: Cycle,
    /// The cycle the head of the queue comes due. When the queue is empty
    /// this holds an already elapsed cycle, so the due check degenerates to
    /// "always due" until something is scheduled.
    next_event: Cycle,
    /// Pending events, sorted ascending by timeout. Events with equal
    /// timeouts keep their insertion order.
    ///
    /// The queue carries its own lock: it is the one piece of machine state
    /// that a reset from the control thread touches directly, and a pumped
    /// callback must be able to re-enter ['Schedule::schedule_at'] while the
    /// pump holds no lock.
    queue: Mutex<Vec<Entry>>,
}

impl Schedule {
    pub fn new() -> Self {
        Self {
            cycle: 0,
            next_event: 0u64.wrapping_sub(1),
            queue: Mutex::new(Vec::with_capacity(16)),
        }
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    /// Move a given amount of cycles forward.
    pub fn tick(&mut self, cycles: Cycle) {
        self.cycle = self.cycle.wrapping_add(cycles);
    }

    /// Schedule `callback` to run at the absolute cycle `timeout`.
    pub fn schedule_at(&mut self, timeout: Cycle, callback: EventFn) {
        let mut queue = self.queue.lock().unwrap();
        let at = queue
            .iter()
            .position(|entry| comes_before(timeout, entry.timeout))
            .unwrap_or(queue.len());
        queue.insert(at, Entry { timeout, callback });
        self.next_event = queue[0].timeout;
    }

    /// Schedule `callback` to run in a given number of cycles from now.
    pub fn schedule_in(&mut self, cycles: Cycle, callback: EventFn) {
        self.schedule_at(self.cycle.wrapping_add(cycles), callback);
    }

    /// Remove every queued event with a matching callback.
    pub fn cancel(&mut self, callback: EventFn) {
        let mut queue = self.queue.lock().unwrap();
        queue.retain(|entry| entry.callback != callback);
        self.next_event = match queue.first() {
            Some(entry) => entry.timeout,
            None => self.cycle.wrapping_sub(1),
        };
    }

    /// Drain the queue.
    pub fn cancel_all(&mut self) {
        let mut queue = self.queue.lock().unwrap();
        queue.clear();
        self.next_event = self.cycle.wrapping_sub(1);
    }

    /// Pop the head of the queue if its timeout has elapsed.
    ///
    /// The caller invokes the returned callback with the queue unlocked and
    /// then calls ['Schedule::update_next_event'], since the callback may
    /// itself have scheduled or cancelled events.
    pub(crate) fn pop_ready(&mut self) -> Option<EventFn> {
        if comes_before(self.cycle, self.next_event) {
            return None;
        }
        let mut queue = self.queue.lock().unwrap();
        if queue.is_empty() {
            self.next_event = self.cycle.wrapping_sub(1);
            None
        } else {
            Some(queue.remove(0).callback)
        }
    }

    /// Recompute the externally visible due cycle after a callback has run.
    pub(crate) fn update_next_event(&mut self) {
        let queue = self.queue.lock().unwrap();
        self.next_event = match queue.first() {
            Some(entry) => entry.timeout,
            None => self.cycle.wrapping_sub(1),
        };
    }
}
