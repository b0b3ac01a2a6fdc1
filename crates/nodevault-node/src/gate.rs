//! Process-wide gate for multi-part upload coordination.
//!
//! Callers are admitted strictly in arrival order: each `acquire` takes a
//! ticket and waits until that ticket is being served. Dropping the permit
//! advances to the next ticket, so exactly the next waiter proceeds.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    serving: u64,
}

#[derive(Debug, Default)]
pub struct PartGate {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

impl PartGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the gate is ours.
    pub fn acquire(&self) -> PartPermit<'_> {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != ticket {
            self.turn.wait(&mut tickets);
        }
        PartPermit { gate: self }
    }

    pub fn is_held(&self) -> bool {
        let tickets = self.tickets.lock();
        tickets.next != tickets.serving
    }

    fn release(&self) {
        let mut tickets = self.tickets.lock();
        tickets.serving += 1;
        // Waiters check their own ticket; wake all so the right one runs.
        self.turn.notify_all();
    }
}

/// Held while a part operation runs; releases the gate on drop.
#[must_use = "the gate is released as soon as the permit is dropped"]
pub struct PartPermit<'a> {
    gate: &'a PartGate,
}

impl Drop for PartPermit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
