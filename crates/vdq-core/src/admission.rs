//! Global admission control: at most `capacity` jobs hold a ticket at once.
//!
//! Requests beyond capacity wait in strict FIFO order of `enqueue` calls.
//! The order is fixed synchronously under the lock, not by task wake-up
//! order, so a queue position reported to a requester stays truthful.
//! A released slot is handed straight to the oldest live waiter.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::{AdmissionError, InternalError};
use crate::registry::JobId;

pub type TicketId = u64;

/// Proof that a job holds one of the global slots. Not cloneable; hand it
/// back with [`AdmissionController::release`] exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct AdmissionTicket {
    id: TicketId,
    job_id: JobId,
}

impl AdmissionTicket {
    pub fn id(&self) -> TicketId {
        self.id
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }
}

struct Waiter {
    id: u64,
    job_id: JobId,
    tx: oneshot::Sender<AdmissionTicket>,
}

#[derive(Default)]
struct State {
    issued: HashMap<TicketId, JobId>,
    waiters: VecDeque<Waiter>,
    closed: bool,
}

pub struct AdmissionController {
    capacity: usize,
    queue_limit: Option<usize>,
    state: Mutex<State>,
    next_ticket: AtomicU64,
    next_waiter: AtomicU64,
}

impl AdmissionController {
    /// `capacity` is clamped to at least 1. `queue_limit` of None means the
    /// waiting queue is unbounded.
    pub fn new(capacity: usize, queue_limit: Option<usize>) -> Self {
        Self {
            capacity: capacity.max(1),
            queue_limit,
            state: Mutex::new(State::default()),
            next_ticket: AtomicU64::new(1),
            next_waiter: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn issue(&self, state: &mut State, job_id: JobId) -> AdmissionTicket {
        let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        state.issued.insert(id, job_id);
        AdmissionTicket { id, job_id }
    }

    /// Take a place in line for `job_id`.
    ///
    /// Issues a ticket right away when a slot is free and nobody is waiting;
    /// otherwise appends to the queue. Fails with `QueueOverflow` when the
    /// queue is at its limit.
    pub fn enqueue(self: &Arc<Self>, job_id: JobId) -> Result<PendingAdmission, AdmissionError> {
        let mut state = self.lock();
        if state.closed {
            return Err(AdmissionError::Closed);
        }
        if state.issued.len() < self.capacity && state.waiters.is_empty() {
            let ticket = self.issue(&mut state, job_id);
            tracing::debug!(job_id, ticket = ticket.id, "admitted immediately");
            return Ok(PendingAdmission {
                controller: Arc::clone(self),
                ready: Some(ticket),
                waiting: None,
                position: 0,
            });
        }
        if let Some(limit) = self.queue_limit {
            if state.waiters.len() >= limit {
                tracing::info!(job_id, limit, "admission queue full");
                return Err(AdmissionError::QueueOverflow { limit });
            }
        }
        let (tx, rx) = oneshot::channel();
        let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        state.waiters.push_back(Waiter { id, job_id, tx });
        let position = state.waiters.len();
        tracing::debug!(job_id, position, "queued for admission");
        Ok(PendingAdmission {
            controller: Arc::clone(self),
            ready: None,
            waiting: Some((id, rx)),
            position,
        })
    }

    /// Enqueue and wait for a ticket.
    pub async fn admit(self: &Arc<Self>, job_id: JobId) -> Result<AdmissionTicket, AdmissionError> {
        self.enqueue(job_id)?.wait().await
    }

    /// Return a slot. Releasing a ticket that is not currently issued is a
    /// contract violation and leaves the slot count untouched.
    pub fn release(&self, ticket: &AdmissionTicket) -> Result<(), InternalError> {
        let mut state = self.lock();
        if state.issued.remove(&ticket.id).is_none() {
            tracing::error!(
                ticket = ticket.id,
                job_id = ticket.job_id,
                "admission ticket released twice"
            );
            return Err(InternalError::DoubleRelease { ticket: ticket.id });
        }
        tracing::debug!(ticket = ticket.id, job_id = ticket.job_id, "admission released");
        self.hand_off(&mut state);
        Ok(())
    }

    /// Give free slots to the oldest waiters whose receivers are still alive.
    fn hand_off(&self, state: &mut State) {
        while state.issued.len() < self.capacity {
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };
            let ticket = self.issue(state, waiter.job_id);
            let ticket_id = ticket.id;
            match waiter.tx.send(ticket) {
                Ok(()) => {
                    tracing::debug!(job_id = waiter.job_id, ticket = ticket_id, "admitted from queue")
                }
                Err(unclaimed) => {
                    state.issued.remove(&unclaimed.id);
                }
            }
        }
    }

    fn abandon(&self, waiter_id: u64) {
        let mut state = self.lock();
        state.waiters.retain(|w| w.id != waiter_id);
    }

    /// Refuse new requests and fail everyone still waiting with `Closed`.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.waiters.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tickets currently issued.
    pub fn in_use(&self) -> usize {
        self.lock().issued.len()
    }

    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.in_use())
    }

    /// Requests waiting for a slot.
    pub fn queued(&self) -> usize {
        self.lock().waiters.len()
    }
}

/// A place in the admission line. Dropping it before a ticket is taken
/// gives up the place; a ticket that arrived in the meantime is returned.
pub struct PendingAdmission {
    controller: Arc<AdmissionController>,
    ready: Option<AdmissionTicket>,
    waiting: Option<(u64, oneshot::Receiver<AdmissionTicket>)>,
    position: usize,
}

impl PendingAdmission {
    /// 0 when admitted immediately, otherwise the 1-based queue position at
    /// enqueue time.
    pub fn position(&self) -> usize {
        self.position
    }

    pub async fn wait(mut self) -> Result<AdmissionTicket, AdmissionError> {
        if let Some(ticket) = self.ready.take() {
            return Ok(ticket);
        }
        let Some((_, rx)) = self.waiting.as_mut() else {
            return Err(AdmissionError::Closed);
        };
        let ticket = rx.await.map_err(|_| AdmissionError::Closed)?;
        self.waiting = None;
        Ok(ticket)
    }
}

impl Drop for PendingAdmission {
    fn drop(&mut self) {
        if let Some(ticket) = self.ready.take() {
            let _ = self.controller.release(&ticket);
        }
        if let Some((waiter_id, mut rx)) = self.waiting.take() {
            self.controller.abandon(waiter_id);
            rx.close();
            if let Ok(ticket) = rx.try_recv() {
                let _ = self.controller.release(&ticket);
            }
        }
    }
}

/// Releases its ticket when dropped, so every exit path of a job gives the
/// slot back exactly once.
pub struct TicketGuard {
    controller: Arc<AdmissionController>,
    ticket: Option<AdmissionTicket>,
}

impl TicketGuard {
    pub fn new(controller: Arc<AdmissionController>, ticket: AdmissionTicket) -> Self {
        Self {
            controller,
            ticket: Some(ticket),
        }
    }

    pub fn release(mut self) -> Result<(), InternalError> {
        match self.ticket.take() {
            Some(ticket) => self.controller.release(&ticket),
            None => Ok(()),
        }
    }
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            let _ = self.controller.release(&ticket);
        }
    }
}
