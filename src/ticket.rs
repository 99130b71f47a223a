//! The rewire ticket: admission control that lets a controller quiesce
//! pipeline traffic while it changes the topology.
//!
//! Pipeline threads are readers. Every admitted call holds a ticket
//! ([`Ticket::acquire`]) for its duration; threads that hold a ticket for a
//! long time yield it at safe points with [`Ticket::checkpoint`]. The
//! controller is the single writer: [`Ticket::revoke`] blocks new admissions
//! and waits until every outstanding ticket is returned or yielded, and
//! [`Ticket::issue`] resumes traffic.
//!
//! Tickets are re-entrant per thread, and the revoking thread is never
//! blocked by its own quiescence, so a controller can drive ports (including
//! other proxies sharing the same ticket) while traffic is stopped.
//!
//! `revoke` has no timeout: it completes once in-flight calls finish. A
//! forwarded call that never returns stalls the controller.
//!
//! # Example
//!
//! ```rust
//! use interpose::ticket::Ticket;
//!
//! let ticket = Ticket::new();
//!
//! {
//!     let _admitted = ticket.acquire();
//!     // forwarded pipeline call
//! }
//!
//! let quiesced = ticket.quiesce();
//! assert!(ticket.is_revoked());
//! drop(quiesced);
//! assert!(!ticket.is_revoked());
//! ```

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use std::time::Duration;

/// Shared admission ticket for a pipeline.
#[derive(Debug, Default)]
pub struct Ticket {
    state: Mutex<TicketState>,
    /// Signalled when a revocation ends.
    issued: Condvar,
    /// Signalled when outstanding tickets drop to zero during a revocation.
    drained: Condvar,
    rewiring: Mutex<bool>,
    rewiring_released: Condvar,
}

#[derive(Debug, Default)]
struct TicketState {
    /// Tickets currently granted, across all threads.
    granted: usize,
    /// Tickets held per thread.
    holders: HashMap<ThreadId, usize>,
    /// Thread that revoked the ticket, while revoked.
    revoker: Option<ThreadId>,
    /// Nested revocations by the revoker.
    depth: usize,
    /// Completed revocations.
    revocations: u64,
}

impl TicketState {
    fn held_by(&self, thread: ThreadId) -> usize {
        self.holders.get(&thread).copied().unwrap_or(0)
    }

    fn blocks(&self, thread: ThreadId) -> bool {
        matches!(self.revoker, Some(revoker) if revoker != thread)
    }

    /// Tickets the revoker is waiting for.
    fn outstanding(&self) -> usize {
        match self.revoker {
            Some(revoker) => self.granted - self.held_by(revoker),
            None => self.granted,
        }
    }

    fn grant(&mut self, thread: ThreadId, count: usize) {
        *self.holders.entry(thread).or_insert(0) += count;
        self.granted += count;
    }
}

impl Ticket {
    /// Create a ticket in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a ticket, blocking while another thread has it revoked.
    ///
    /// A thread that already holds a ticket is admitted immediately.
    pub fn acquire(&self) -> TicketGuard<'_> {
        let me = thread::current().id();
        let mut state = self.lock_state();

        if state.held_by(me) == 0 {
            while state.blocks(me) {
                state = self.issued.wait(state).unwrap();
            }
        }
        state.grant(me, 1);

        TicketGuard {
            ticket: self,
            _not_send: PhantomData,
        }
    }

    /// Acquire a ticket without blocking.
    ///
    /// Returns `None` if another thread has the ticket revoked.
    pub fn try_acquire(&self) -> Option<TicketGuard<'_>> {
        let me = thread::current().id();
        let mut state = self.lock_state();

        if state.held_by(me) == 0 && state.blocks(me) {
            return None;
        }
        state.grant(me, 1);

        Some(TicketGuard {
            ticket: self,
            _not_send: PhantomData,
        })
    }

    /// Yield every ticket held by this thread until the revocation ends.
    ///
    /// Returns immediately when the ticket is not revoked by another thread.
    pub fn renew(&self) {
        let me = thread::current().id();
        let state = self.lock_state();
        if state.blocks(me) {
            drop(self.yield_until_issued(state, me));
        }
    }

    /// Admission check performed at the start of `open` and `get_frame`.
    ///
    /// Equivalent to [`renew`](Self::renew); kept separate so call sites read
    /// as the rewire safe point they are.
    #[inline]
    pub fn checkpoint(&self) {
        self.renew();
    }

    fn yield_until_issued<'a>(
        &'a self,
        mut state: MutexGuard<'a, TicketState>,
        me: ThreadId,
    ) -> MutexGuard<'a, TicketState> {
        let held = state.holders.remove(&me).unwrap_or(0);
        state.granted -= held;
        if state.revoker.is_some() && state.outstanding() == 0 {
            self.drained.notify_all();
        }

        while state.blocks(me) {
            state = self.issued.wait(state).unwrap();
        }

        if held > 0 {
            state.grant(me, held);
        }
        state
    }

    /// Stop admitting other threads and wait until their tickets drain.
    ///
    /// Blocks while another thread holds a revocation. Revocations by the
    /// same thread nest; each needs its own [`issue`](Self::issue).
    pub fn revoke(&self) {
        let me = thread::current().id();
        let mut state = self.lock_state();

        while state.blocks(me) {
            state = self.issued.wait(state).unwrap();
        }

        state.revoker = Some(me);
        state.depth += 1;

        while state.outstanding() > 0 {
            state = self.drained.wait(state).unwrap();
        }
        state.revocations += 1;

        tracing::trace!(granted = state.granted, depth = state.depth, "ticket revoked");
    }

    /// End a revocation started by this thread and wake waiting readers.
    pub fn issue(&self) {
        let me = thread::current().id();
        let mut state = self.lock_state();

        if state.revoker != Some(me) {
            tracing::error!("ticket issued by a thread that did not revoke it");
            debug_assert!(false, "ticket issued by a thread that did not revoke it");
            return;
        }

        state.depth -= 1;
        if state.depth == 0 {
            state.revoker = None;
            self.issued.notify_all();
            tracing::trace!("ticket issued");
        }
    }

    /// Revoke the ticket and issue it again when the guard drops.
    pub fn quiesce(&self) -> Quiescence<'_> {
        self.revoke();
        Quiescence {
            ticket: self,
            _not_send: PhantomData,
        }
    }

    /// Take the exclusion that serializes rewiring operations.
    ///
    /// `None` waits indefinitely.
    pub fn lock_rewiring(&self, timeout: Option<Duration>) -> Result<RewiringGuard<'_>> {
        let mut busy = self.rewiring.lock().unwrap();

        match timeout {
            None => {
                while *busy {
                    busy = self.rewiring_released.wait(busy).unwrap();
                }
            }
            Some(timeout) => {
                let (guard, result) = self
                    .rewiring_released
                    .wait_timeout_while(busy, timeout, |busy| *busy)
                    .unwrap();
                busy = guard;
                if result.timed_out() && *busy {
                    return Err(Error::RewireLockTimeout(timeout));
                }
            }
        }

        *busy = true;
        Ok(RewiringGuard { ticket: self })
    }

    /// Whether some thread currently has the ticket revoked.
    pub fn is_revoked(&self) -> bool {
        self.lock_state().revoker.is_some()
    }

    /// Tickets currently granted.
    pub fn granted(&self) -> usize {
        self.lock_state().granted
    }

    /// Revocations completed so far.
    pub fn revocations(&self) -> u64 {
        self.lock_state().revocations
    }

    fn lock_state(&self) -> MutexGuard<'_, TicketState> {
        self.state.lock().unwrap()
    }

    fn release(&self) {
        let me = thread::current().id();
        let mut state = self.lock_state();

        match state.holders.get_mut(&me) {
            Some(held) => {
                *held -= 1;
                if *held == 0 {
                    state.holders.remove(&me);
                }
            }
            None => {
                tracing::error!("ticket released by a thread that never took it");
                debug_assert!(false, "ticket released by a thread that never took it");
                return;
            }
        }

        state.granted -= 1;
        if state.revoker.is_some() && state.outstanding() == 0 {
            self.drained.notify_all();
        }
    }

    fn unlock_rewiring(&self) {
        *self.rewiring.lock().unwrap() = false;
        self.rewiring_released.notify_one();
    }
}

/// A granted ticket; returned on drop.
///
/// Tickets are tracked per thread, so the guard cannot move across threads.
#[must_use = "the ticket is returned as soon as the guard drops"]
#[derive(Debug)]
pub struct TicketGuard<'a> {
    ticket: &'a Ticket,
    _not_send: PhantomData<*const ()>,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        self.ticket.release();
    }
}

/// A revocation held by the current thread; issued on drop.
#[must_use = "the ticket is issued again as soon as the guard drops"]
#[derive(Debug)]
pub struct Quiescence<'a> {
    ticket: &'a Ticket,
    _not_send: PhantomData<*const ()>,
}

impl Drop for Quiescence<'_> {
    fn drop(&mut self) {
        self.ticket.issue();
    }
}

/// Holds the rewiring exclusion; released on drop.
#[must_use = "the rewiring lock is released as soon as the guard drops"]
#[derive(Debug)]
pub struct RewiringGuard<'a> {
    ticket: &'a Ticket,
}

impl Drop for RewiringGuard<'_> {
    fn drop(&mut self) {
        self.ticket.unlock_rewiring();
    }
}
