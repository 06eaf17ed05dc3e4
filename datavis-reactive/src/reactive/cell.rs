//! Cell Implementation
//!
//! A Cell is a single-assignment slot: it starts pending and is completed at
//! most once. Stages subscribe to the cells they read and are scheduled when
//! those cells complete.
//!
//! # Ownership
//!
//! A cell produced by a stage holds that stage strongly (its "owner") until it
//! is completed. The stage only holds its output weakly. Whoever keeps the
//! cell therefore keeps the computation alive, and dropping every handle to a
//! pending cell cancels the stage and releases it, together with its inputs.
//!
//! # Thread Safety
//!
//! The value lives in a `OnceLock` and is read without locking once set. The
//! subscriber list and the owner share one mutex, which also serialises the
//! ready check in `subscribe` against `complete`: a subscriber added while
//! another thread completes the cell is either in the list drained by
//! `complete`, or sees the value and schedules itself. It is never missed and
//! never notified twice.

use std::fmt::{self, Debug};
use std::pin::pin;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::Notify;
use tracing::{debug, trace};

use super::subscriber::{schedule, Subscriber};

/// A single-assignment value shared between the graph and its clients.
///
/// Cloning a `Cell` produces another handle to the same slot.
pub struct Cell<T> {
    inner: Arc<CellInner<T>>,
}

/// Non-owning handle held by the stage that completes a cell.
pub(crate) struct WeakCell<T> {
    inner: Weak<CellInner<T>>,
}

struct CellInner<T> {
    value: OnceLock<T>,
    slot: Mutex<Slot>,
    /// Wakes async waiters; see [`Cell::wait`].
    ready: Notify,
}

#[derive(Default)]
struct Slot {
    /// Stages waiting for this value. Weak, so an abandoned downstream stage
    /// is not kept alive by its inputs.
    subscribers: SmallVec<[Weak<dyn Subscriber>; 2]>,
    /// The stage that will complete this cell. Released on completion.
    owner: Option<Arc<dyn Subscriber>>,
}

/// Wrap an already known value as a ready cell.
pub fn value<T>(value: T) -> Cell<T>
where
    T: Send + Sync + 'static,
{
    Cell::from_value(value)
}

impl<T> Cell<T>
where
    T: Send + Sync + 'static,
{
    /// Create a pending cell with no producing stage.
    ///
    /// The caller completes it with [`Cell::complete`]. This is how values
    /// that originate outside the graph, such as user input, are fed in.
    pub fn pending() -> Self {
        Self::with_value(OnceLock::new())
    }

    /// Create a cell that is ready from the start.
    pub fn from_value(value: T) -> Self {
        Self::with_value(OnceLock::from(value))
    }

    fn with_value(value: OnceLock<T>) -> Self {
        Self {
            inner: Arc::new(CellInner {
                value,
                slot: Mutex::new(Slot::default()),
                ready: Notify::new(),
            }),
        }
    }

    /// Whether the value is available.
    pub fn is_ready(&self) -> bool {
        self.inner.value.get().is_some()
    }

    /// The value, if the cell is ready.
    pub fn try_get(&self) -> Option<&T> {
        self.inner.value.get()
    }

    /// The value.
    ///
    /// # Panics
    ///
    /// If the cell is not ready. Reading a pending cell is a bug in the graph
    /// construction, not a runtime condition.
    pub fn get(&self) -> &T {
        match self.inner.value.get() {
            Some(value) => value,
            None => panic!("Cell::get called on a cell that is not ready"),
        }
    }

    /// Store the value and notify every subscriber.
    ///
    /// # Panics
    ///
    /// If the cell was already completed.
    pub fn complete(&self, value: T) {
        if self.try_complete(value).is_err() {
            panic!("Cell::complete called on a cell that already holds a value");
        }
    }

    /// Store the value and notify every subscriber, handing the value back if
    /// the cell was already completed.
    pub fn try_complete(&self, value: T) -> Result<(), T> {
        let (subscribers, owner) = {
            let mut slot = self.inner.slot.lock();
            self.inner.value.set(value)?;
            (std::mem::take(&mut slot.subscribers), slot.owner.take())
        };

        self.inner.ready.notify_waiters();
        trace!(subscribers = subscribers.len(), "cell completed");

        for subscriber in subscribers {
            if let Some(subscriber) = subscriber.upgrade() {
                schedule(subscriber);
            }
        }

        if let Some(owner) = owner {
            release_owner(owner);
        }
        Ok(())
    }

    /// Ask the producing stage to stop.
    ///
    /// Has no effect on cells without a producing stage or on cells that are
    /// already complete.
    pub fn cancel(&self) {
        let slot = self.inner.slot.lock();
        if let Some(owner) = &slot.owner {
            debug!(stage = %owner.id(), "cancellation requested");
            owner.cancel();
        }
    }

    /// Whether the producing stage has been asked to stop.
    pub fn is_cancelled(&self) -> bool {
        let slot = self.inner.slot.lock();
        slot.owner
            .as_ref()
            .is_some_and(|owner| owner.token().is_cancelled())
    }

    /// Progress reported by the producing stage, `1.0` once ready.
    pub fn progress(&self) -> f32 {
        if self.is_ready() {
            return 1.0;
        }
        let slot = self.inner.slot.lock();
        slot.owner
            .as_ref()
            .map_or(0.0, |owner| owner.token().progress())
    }

    /// Wait for the value from async code without blocking a thread.
    pub async fn wait(&self) -> &T {
        loop {
            let mut notified = pin!(self.inner.ready.notified());
            // Register before checking, so a completion in between still wakes us.
            notified.as_mut().enable();
            if let Some(value) = self.inner.value.get() {
                return value;
            }
            notified.await;
        }
    }

    /// Number of live subscribers still waiting on this cell.
    pub fn subscriber_count(&self) -> usize {
        let slot = self.inner.slot.lock();
        slot.subscribers
            .iter()
            .filter(|subscriber| subscriber.strong_count() > 0)
            .count()
    }

    /// Whether two handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register `subscriber` to be scheduled once this cell is ready.
    ///
    /// If the cell is ready already, the subscriber is scheduled right away.
    pub(crate) fn subscribe(&self, subscriber: &Weak<dyn Subscriber>) {
        let ready_now = {
            let mut slot = self.inner.slot.lock();
            if self.inner.value.get().is_some() {
                true
            } else {
                slot.subscribers.retain(|existing| existing.strong_count() > 0);
                slot.subscribers.push(Weak::clone(subscriber));
                false
            }
        };

        if ready_now {
            if let Some(subscriber) = subscriber.upgrade() {
                schedule(subscriber);
            }
        }
    }

    pub(crate) fn set_owner(&self, owner: Arc<dyn Subscriber>) {
        let mut slot = self.inner.slot.lock();
        debug_assert!(slot.owner.is_none(), "cell already has a producing stage");
        slot.owner = Some(owner);
    }

    pub(crate) fn downgrade(&self) -> WeakCell<T> {
        WeakCell {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<T> WeakCell<T> {
    pub(crate) fn upgrade(&self) -> Option<Cell<T>> {
        self.inner.upgrade().map(|inner| Cell { inner })
    }
}

/// Drop a stage on its own context when that is not the current thread.
fn release_owner(owner: Arc<dyn Subscriber>) {
    match owner.target().context() {
        Some(context) => context.release(owner),
        None => drop(owner),
    }
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        let Some(owner) = self.slot.get_mut().owner.take() else {
            return;
        };
        if self.value.get().is_none() {
            debug!(stage = %owner.id(), "result abandoned, cancelling stage");
            owner.cancel();
        }
        release_owner(owner);
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Cell<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("Cell")
            .field("value", &self.inner.value.get())
            .field("subscribers", &slot.subscribers.len())
            .field("has_owner", &slot.owner.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
