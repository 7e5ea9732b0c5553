//! Reentrant shared/exclusive lock for coordinating access to persistent
//! objects across threads.
//!
//! # Semantics
//!
//! - The exclusive owner may re-acquire shared or exclusive without blocking;
//!   each acquisition deepens the hold and needs its own release.
//! - A thread holding shared may re-acquire shared without queueing.
//! - A thread holding shared cannot upgrade to exclusive: it gets
//!   [`LockError::UpgradeNotSupported`] instead of waiting on itself.
//! - Waiters are served strictly in arrival order. A queued exclusive request
//!   blocks later shared requests even while the lock is only shared.
//! - When the lock frees up, the queue head is granted. An exclusive head is
//!   granted alone; a shared head is granted together with every shared
//!   request directly behind it.
//!
//! Each waiter holds a ticket in the FIFO queue. Grants are made by the
//! releasing thread on the waiter's behalf, so a woken waiter only has to
//! notice that its ticket was granted.

use std::collections::{HashMap, HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct WaitTicket {
    id: u64,
    thread: ThreadId,
    mode: LockMode,
}

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    /// Hold depth of the exclusive owner, shared re-acquisitions included.
    writers: usize,
    /// Shared holds per thread.
    readers: HashMap<ThreadId, usize>,
    queue: VecDeque<WaitTicket>,
    /// Tickets granted but not yet picked up by their waiter.
    granted: HashSet<u64>,
    next_ticket: u64,
}

impl LockState {
    fn is_free(&self) -> bool {
        self.writers == 0 && self.readers.is_empty()
    }

    /// Grant the queue head, and any shared requests right behind a shared
    /// head. Returns whether anything was granted.
    fn grant_waiters(&mut self) -> bool {
        let mut granted_any = false;
        while let Some(head) = self.queue.front() {
            match head.mode {
                LockMode::Exclusive => {
                    if !self.is_free() {
                        break;
                    }
                    if let Some(ticket) = self.queue.pop_front() {
                        self.owner = Some(ticket.thread);
                        self.writers = 1;
                        self.granted.insert(ticket.id);
                        granted_any = true;
                    }
                    break;
                }
                LockMode::Shared => {
                    if self.writers > 0 {
                        break;
                    }
                    let Some(ticket) = self.queue.pop_front() else {
                        break;
                    };
                    *self.readers.entry(ticket.thread).or_insert(0) += 1;
                    self.granted.insert(ticket.id);
                    granted_any = true;
                }
            }
        }
        granted_any
    }
}

/// Observable state of a [`ResourceLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Free,
    /// Total shared holds across all reader threads.
    Shared { readers: usize },
    Exclusive { depth: usize },
}

/// Reentrant FIFO reader/writer lock.
#[derive(Debug, Default)]
pub struct ResourceLock {
    state: Mutex<LockState>,
    wakeup: Condvar,
}

impl ResourceLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until a shared hold is acquired.
    pub fn acquire_shared(&self) -> Result<(), LockError> {
        self.acquire(LockMode::Shared, None)
    }

    /// Block until an exclusive hold is acquired.
    pub fn acquire_exclusive(&self) -> Result<(), LockError> {
        self.acquire(LockMode::Exclusive, None)
    }

    /// Acquire shared, giving up with [`LockError::Timeout`] after `timeout`.
    pub fn try_acquire_shared_for(&self, timeout: Duration) -> Result<(), LockError> {
        self.acquire(LockMode::Shared, Some(timeout))
    }

    /// Acquire exclusive, giving up with [`LockError::Timeout`] after
    /// `timeout`.
    pub fn try_acquire_exclusive_for(&self, timeout: Duration) -> Result<(), LockError> {
        self.acquire(LockMode::Exclusive, Some(timeout))
    }

    /// Release one hold of the calling thread.
    pub fn release(&self) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut state = self.lock_state();

        if state.owner == Some(me) {
            state.writers -= 1;
            if state.writers == 0 {
                state.owner = None;
            }
        } else if let Some(holds) = state.readers.get_mut(&me) {
            *holds -= 1;
            if *holds == 0 {
                state.readers.remove(&me);
            }
        } else {
            return Err(LockError::Protocol(format!(
                "{me:?} released a lock it does not hold"
            )));
        }

        if state.grant_waiters() {
            drop(state);
            self.wakeup.notify_all();
        }
        Ok(())
    }

    /// Acquire shared and release it when the guard drops.
    pub fn shared(&self) -> Result<LockGuard<'_>, LockError> {
        self.acquire_shared()?;
        Ok(LockGuard::new(self))
    }

    /// Acquire exclusive and release it when the guard drops.
    pub fn exclusive(&self) -> Result<LockGuard<'_>, LockError> {
        self.acquire_exclusive()?;
        Ok(LockGuard::new(self))
    }

    pub fn shared_for(&self, timeout: Duration) -> Result<LockGuard<'_>, LockError> {
        self.try_acquire_shared_for(timeout)?;
        Ok(LockGuard::new(self))
    }

    pub fn exclusive_for(&self, timeout: Duration) -> Result<LockGuard<'_>, LockError> {
        self.try_acquire_exclusive_for(timeout)?;
        Ok(LockGuard::new(self))
    }

    #[must_use]
    pub fn status(&self) -> LockStatus {
        let state = self.lock_state();
        if state.writers > 0 {
            LockStatus::Exclusive {
                depth: state.writers,
            }
        } else if state.readers.is_empty() {
            LockStatus::Free
        } else {
            LockStatus::Shared {
                readers: state.readers.values().sum(),
            }
        }
    }

    /// Number of waiting requests.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.lock_state().queue.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire(&self, mode: LockMode, timeout: Option<Duration>) -> Result<(), LockError> {
        let me = thread::current().id();
        let start = Instant::now();
        let mut state = self.lock_state();

        if state.owner == Some(me) {
            state.writers += 1;
            return Ok(());
        }
        match mode {
            LockMode::Shared => {
                if let Some(holds) = state.readers.get_mut(&me) {
                    *holds += 1;
                    return Ok(());
                }
                if state.writers == 0 && state.queue.is_empty() {
                    state.readers.insert(me, 1);
                    return Ok(());
                }
            }
            LockMode::Exclusive => {
                if state.readers.contains_key(&me) {
                    return Err(LockError::UpgradeNotSupported);
                }
                if state.is_free() && state.queue.is_empty() {
                    state.owner = Some(me);
                    state.writers = 1;
                    return Ok(());
                }
            }
        }

        let id = state.next_ticket;
        state.next_ticket += 1;
        state.queue.push_back(WaitTicket {
            id,
            thread: me,
            mode,
        });
        let deadline = timeout.map(|t| start + t);

        loop {
            if state.granted.remove(&id) {
                return Ok(());
            }
            match deadline {
                None => {
                    state = self
                        .wakeup
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        state.queue.retain(|ticket| ticket.id != id);
                        // Leaving may unblock requests that queued behind us.
                        if state.grant_waiters() {
                            drop(state);
                            self.wakeup.notify_all();
                        }
                        let waited = start.elapsed();
                        tracing::debug!("{:?} lock request timed out after {:?}", mode, waited);
                        return Err(LockError::Timeout { waited });
                    }
                    state = self
                        .wakeup
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}

/// Releases one hold of a [`ResourceLock`] when dropped.
///
/// Holds belong to threads, so the guard cannot be sent to another thread.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    lock: &'a ResourceLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> LockGuard<'a> {
    const fn new(lock: &'a ResourceLock) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            tracing::error!("failed to release lock on guard drop: {}", e);
        }
    }
}

/// Errors that can occur when acquiring or releasing a [`ResourceLock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// A bounded wait expired; the request was withdrawn from the queue.
    Timeout { waited: Duration },
    /// The lock was used incorrectly, e.g. released without being held.
    Protocol(String),
    /// A shared holder asked for exclusive access.
    UpgradeNotSupported,
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { waited } => write!(f, "lock not acquired after {waited:?}"),
            Self::Protocol(msg) => write!(f, "lock protocol violation: {msg}"),
            Self::UpgradeNotSupported => {
                write!(f, "cannot upgrade a shared hold to exclusive")
            }
        }
    }
}

impl std::error::Error for LockError {}
