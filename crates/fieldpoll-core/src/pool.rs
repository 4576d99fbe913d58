// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Bounded session pool.
//!
//! ```text
//!            acquire()                               release()
//!   idle? ── yes ──▶ session                 waiter? ── yes ──▶ hand over
//!     │                                         │
//!     no                                        no
//!     ▼                                         ▼
//!   live < max? ── yes ──▶ connect()          push to idle
//!     │
//!     no
//!     ▼
//!   FIFO waiter queue ──▶ (session | slot | closed | timeout)
//! ```
//!
//! The state lock is held only for list operations, never across a connect
//! or any other await point. A discarded session frees its slot, which is
//! passed to the oldest waiter so it can open a replacement.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::PoolError;
use crate::session::Connector;

// =============================================================================
// Pooled session
// =============================================================================

/// A session checked out of a pool.
#[derive(Debug)]
pub struct Pooled<S> {
    id: u64,
    session: S,
}

impl<S> Pooled<S> {
    /// Pool-unique identifier of the underlying session.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<S> Deref for Pooled<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S> DerefMut for Pooled<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

/// What a waiter is handed.
enum Grant<S> {
    /// An existing session.
    Session(Pooled<S>),
    /// Permission to open a new session.
    Slot,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Pool bound.
    pub max: usize,
    /// Sessions that exist or are being opened.
    pub live: usize,
    /// Sessions sitting idle.
    pub idle: usize,
    /// Queued waiters.
    pub waiting: usize,
    /// Whether the pool has been destroyed.
    pub closed: bool,
}

struct PoolState<S> {
    idle: Vec<Pooled<S>>,
    waiters: VecDeque<oneshot::Sender<Grant<S>>>,
    live: usize,
    closed: bool,
}

// =============================================================================
// Pool
// =============================================================================

/// A bounded pool of sessions opened through a [`Connector`].
pub struct Pool<C: Connector> {
    connector: Arc<C>,
    max: usize,
    state: Mutex<PoolState<C::Session>>,
    next_id: AtomicU64,
}

impl<C: Connector> Pool<C> {
    /// Creates an empty pool. Sessions are opened on first use.
    pub fn new(connector: C, max: usize) -> Self {
        Self {
            connector: Arc::new(connector),
            max: max.max(1),
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                waiters: VecDeque::new(),
                live: 0,
                closed: false,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Returns the current counters.
    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            max: self.max,
            live: state.live,
            idle: state.idle.len(),
            waiting: state.waiters.len(),
            closed: state.closed,
        }
    }

    /// Returns true once [`destroy`](Self::destroy) has run.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Checks out a session, waiting at most `wait` for one to free up.
    ///
    /// Dropping the returned future cancels the wait; a session handed over
    /// concurrently goes back to the pool.
    pub async fn acquire(&self, wait: Duration) -> Result<Pooled<C::Session>, PoolError> {
        let rx = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(session) = state.idle.pop() {
                return Ok(session);
            }
            if state.live < self.max {
                state.live += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            }
        };

        let Some(rx) = rx else {
            return self.open().await;
        };

        let mut waiter = Waiter { rx, pool: self };
        match tokio::time::timeout(wait, &mut waiter.rx).await {
            Ok(Ok(Grant::Session(session))) => Ok(session),
            Ok(Ok(Grant::Slot)) => self.open().await,
            Ok(Err(_)) => Err(PoolError::Closed),
            Err(_) => {
                tracing::debug!(
                    target = %self.connector.target(),
                    waited = ?wait,
                    "Timed out waiting for a session"
                );
                Err(PoolError::Timeout { waited: wait })
            }
        }
    }

    /// Returns a healthy session.
    ///
    /// The oldest live waiter receives it; otherwise it becomes idle. After
    /// destroy the session is closed instead.
    pub fn release(&self, session: Pooled<C::Session>) {
        let mut state = self.state.lock();
        if state.closed {
            state.live = state.live.saturating_sub(1);
            drop(state);
            self.connector.close(session.session);
            return;
        }
        if let Some(Grant::Session(session)) =
            hand_off(&mut state.waiters, Grant::Session(session))
        {
            state.idle.push(session);
        }
    }

    /// Closes a broken session and frees its slot.
    pub fn discard(&self, session: Pooled<C::Session>) {
        tracing::debug!(
            target = %self.connector.target(),
            session = session.id,
            "Discarding session"
        );
        self.connector.close(session.session);
        self.release_slot();
    }

    /// Closes idle sessions and fails every waiter with [`PoolError::Closed`].
    ///
    /// Checked-out sessions are closed as they come back. Calling this more
    /// than once has no further effect.
    pub fn destroy(&self) {
        let idle = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.waiters.clear();
            let idle = std::mem::take(&mut state.idle);
            state.live = state.live.saturating_sub(idle.len());
            idle
        };

        tracing::debug!(
            target = %self.connector.target(),
            closed = idle.len(),
            "Connection pool destroyed"
        );
        for session in idle {
            self.connector.close(session.session);
        }
    }

    /// Opens a session on a slot the caller already holds.
    async fn open(&self) -> Result<Pooled<C::Session>, PoolError> {
        let slot = SlotGuard {
            pool: self,
            armed: true,
        };
        let session = self.connector.connect().await?;
        slot.disarm();

        let mut state = self.state.lock();
        if state.closed {
            state.live = state.live.saturating_sub(1);
            drop(state);
            self.connector.close(session);
            return Err(PoolError::Closed);
        }
        drop(state);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(target = %self.connector.target(), session = id, "Session opened");
        Ok(Pooled { id, session })
    }

    /// Gives a free slot to the oldest waiter, or shrinks the live count.
    fn release_slot(&self) {
        let mut state = self.state.lock();
        if state.closed {
            state.live = state.live.saturating_sub(1);
            return;
        }
        if hand_off(&mut state.waiters, Grant::Slot).is_some() {
            state.live = state.live.saturating_sub(1);
        }
    }

    fn return_grant(&self, grant: Grant<C::Session>) {
        match grant {
            Grant::Session(session) => self.release(session),
            Grant::Slot => self.release_slot(),
        }
    }
}

impl<C: Connector> std::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("target", &self.connector.target())
            .field("status", &self.status())
            .finish()
    }
}

/// Sends `grant` to the first waiter still listening. Returns it if none is.
fn hand_off<S>(
    waiters: &mut VecDeque<oneshot::Sender<Grant<S>>>,
    mut grant: Grant<S>,
) -> Option<Grant<S>> {
    while let Some(tx) = waiters.pop_front() {
        match tx.send(grant) {
            Ok(()) => return None,
            Err(returned) => grant = returned,
        }
    }
    Some(grant)
}

// =============================================================================
// Guards
// =============================================================================

/// Returns a grant that arrived after the waiter gave up.
struct Waiter<'a, C: Connector> {
    rx: oneshot::Receiver<Grant<C::Session>>,
    pool: &'a Pool<C>,
}

impl<C: Connector> Drop for Waiter<'_, C> {
    fn drop(&mut self) {
        self.rx.close();
        let late = self.rx.try_recv().ok();

        // a timed out or cancelled waiter leaves no sender behind
        self.pool
            .state
            .lock()
            .waiters
            .retain(|tx| !tx.is_closed());

        if let Some(grant) = late {
            self.pool.return_grant(grant);
        }
    }
}

/// Frees a reserved slot if the connect fails or is cancelled.
struct SlotGuard<'a, C: Connector> {
    pool: &'a Pool<C>,
    armed: bool,
}

impl<C: Connector> SlotGuard<'_, C> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<C: Connector> Drop for SlotGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.release_slot();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
