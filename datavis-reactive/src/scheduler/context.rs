//! Dispatch Context
//!
//! A context is a single-threaded cooperative queue. Stages are "scheduled"
//! by posting a notification into their context; the thread that owns the
//! context pops notifications one at a time, in arrival order, and runs them
//! to completion.
//!
//! # Ambient context
//!
//! Each thread tracks two things in thread-local storage:
//!
//! - a stack of contexts it is currently dispatching (normally zero or one
//!   entry; more only when one thread owns several contexts and pumps one
//!   from inside another), and
//! - the context bound to it, if any. A manual context is bound to the thread
//!   that created it, a worker context to its dispatch thread.
//!
//! [`Context::current`] returns the innermost dispatching context, falling
//! back to the bound one. This is what stages built without an explicit
//! context inherit.
//!
//! # Deferred release
//!
//! Objects that belong to a context must be dropped on that context's thread.
//! [`Context::release`] hands such an object to the owning thread through the
//! same queue, so it is dropped there after every notification that was
//! posted before it.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::ContextError;
use crate::reactive::{apply1, Cell, Subscriber};

thread_local! {
    static DISPATCH_STACK: RefCell<Vec<Context>> = const { RefCell::new(Vec::new()) };
    static BOUND: RefCell<Option<WeakContext>> = const { RefCell::new(None) };
}

/// Unique identifier for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContextId(u64);

impl ContextId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

/// An item in a context's queue.
pub(crate) enum Notification {
    /// An input of this stage became ready.
    Ready(Arc<dyn Subscriber>),
    /// Drop this object on the owning thread.
    Release(Box<dyn Send>),
    /// Unblock an idle dispatch loop so it can observe `close`.
    Wake,
}

/// Counters describing the traffic through one context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContextStats {
    /// Notifications accepted by `post`.
    pub posted: u64,
    /// Ready notifications that were dispatched.
    pub dispatched: u64,
    /// Objects dropped through deferred release.
    pub released: u64,
    /// Ready notifications thrown away at shutdown.
    pub discarded: u64,
}

#[derive(Default)]
struct Counters {
    posted: AtomicU64,
    dispatched: AtomicU64,
    released: AtomicU64,
    discarded: AtomicU64,
}

struct ContextInner {
    id: ContextId,
    name: String,
    /// The only thread allowed to dispatch this context.
    owner: OnceLock<ThreadId>,
    closed: AtomicBool,
    /// Held shared by `post` across its closed check and send, exclusively by
    /// `close`. Every accepted notification is queued before the final `Wake`.
    gate: RwLock<()>,
    sender: Sender<Notification>,
    receiver: Receiver<Notification>,
    counters: Counters,
}

/// Handle to a cooperative dispatch queue. Cloning shares the queue.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

/// Non-owning handle to a context.
#[derive(Clone)]
pub struct WeakContext {
    inner: Weak<ContextInner>,
}

impl Context {
    /// Create a context owned by the calling thread and bind it as that
    /// thread's ambient context.
    ///
    /// The thread drives it with [`drain`](Self::drain),
    /// [`process_until`](Self::process_until) or
    /// [`wait_ready`](Self::wait_ready).
    pub fn new(name: impl Into<String>) -> Self {
        let context = Self::detached(name);
        context.bind_current_thread();
        context
    }

    /// Create a context no thread owns yet. The dispatch thread claims it
    /// with `bind_current_thread`.
    pub(crate) fn detached(name: impl Into<String>) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let context = Self {
            inner: Arc::new(ContextInner {
                id: ContextId::new(),
                name: name.into(),
                owner: OnceLock::new(),
                closed: AtomicBool::new(false),
                gate: RwLock::new(()),
                sender,
                receiver,
                counters: Counters::default(),
            }),
        };
        debug!(context = %context.name(), id = %context.id(), "context created");
        context
    }

    /// Claim this context for the calling thread and make it the thread's
    /// ambient context.
    pub(crate) fn bind_current_thread(&self) {
        let current = thread::current().id();
        let owner = *self.inner.owner.get_or_init(|| current);
        debug_assert_eq!(owner, current, "context bound to two threads");
        BOUND.with(|bound| *bound.borrow_mut() = Some(self.downgrade()));
    }

    /// The context dispatching on this thread, else the one bound to it.
    pub fn current() -> Option<Context> {
        DISPATCH_STACK
            .with(|stack| stack.borrow().last().cloned())
            .or_else(|| {
                BOUND.with(|bound| bound.borrow().as_ref().and_then(WeakContext::upgrade))
            })
    }

    /// Unique id of this context.
    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Name given at creation, also the worker thread's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the calling thread owns this context.
    pub fn is_owner_thread(&self) -> bool {
        self.inner.owner.get() == Some(&thread::current().id())
    }

    /// Whether the context has stopped accepting notifications.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop accepting notifications. Already queued ones stay queued.
    pub fn close(&self) {
        let _gate = self.inner.gate.write();
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(context = %self.name(), "context closed");
            // The receiver lives as long as `inner`, so this cannot fail.
            let _ = self.inner.sender.send(Notification::Wake);
        }
    }

    /// Number of queued notifications.
    pub fn pending(&self) -> usize {
        self.inner.receiver.len()
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> ContextStats {
        let counters = &self.inner.counters;
        ContextStats {
            posted: counters.posted.load(Ordering::Relaxed),
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            released: counters.released.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
        }
    }

    /// A handle that does not keep the context alive.
    pub fn downgrade(&self) -> WeakContext {
        WeakContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Drop `value` on this context's thread.
    ///
    /// Dropped immediately when called on the owning thread, or when the
    /// context is closed and nothing will dispatch it any more.
    pub fn release<T>(&self, value: T)
    where
        T: Send + 'static,
    {
        if self.is_owner_thread() || self.is_closed() {
            drop(value);
            return;
        }
        trace!(context = %self.name(), "deferring release to owning thread");
        if let Err(err) = self.post(Notification::Release(Box::new(value))) {
            debug!(context = %self.name(), %err, "released in place");
        }
    }

    /// Enqueue a notification. Thread-safe; wakes the context if it is idle.
    pub(crate) fn post(&self, notification: Notification) -> Result<(), ContextError> {
        let _gate = self.inner.gate.read();
        if self.is_closed() {
            return Err(ContextError::Closed(self.inner.name.clone()));
        }
        self.inner
            .sender
            .send(notification)
            .map_err(|_| ContextError::Closed(self.inner.name.clone()))?;
        self.inner.counters.posted.fetch_add(1, Ordering::Relaxed);
        trace!(context = %self.name(), "notification posted");
        Ok(())
    }

    /// Dispatch queued notifications until the queue is empty, including
    /// those posted while draining. Returns how many ran.
    pub fn drain(&self) -> Result<usize, ContextError> {
        self.check_dispatchable()?;
        let _guard = DispatchGuard::enter(self);

        let mut count = 0;
        while let Ok(notification) = self.inner.receiver.try_recv() {
            if self.dispatch(notification) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Dispatch notifications as they arrive until `done` returns true.
    ///
    /// Blocks the owning thread between notifications. Fails with
    /// [`ContextError::Timeout`] if `done` still does not hold after
    /// `timeout`.
    pub fn process_until<F>(&self, mut done: F, timeout: Duration) -> Result<(), ContextError>
    where
        F: FnMut() -> bool,
    {
        self.check_dispatchable()?;
        let deadline = Instant::now() + timeout;
        let _guard = DispatchGuard::enter(self);

        loop {
            while let Ok(notification) = self.inner.receiver.try_recv() {
                self.dispatch(notification);
            }
            if done() {
                return Ok(());
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ContextError::Timeout {
                    name: self.inner.name.clone(),
                    timeout,
                });
            }
            match self.inner.receiver.recv_timeout(remaining) {
                Ok(notification) => {
                    self.dispatch(notification);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ContextError::Closed(self.inner.name.clone()));
                }
            }
        }
    }

    /// Dispatch this context until `cell` is ready and return its value.
    ///
    /// This is the "run the event loop until the result arrives" pattern for
    /// the thread that owns the context, typically the UI thread.
    pub fn wait_ready<'c, T>(
        &self,
        cell: &'c Cell<T>,
        timeout: Duration,
    ) -> Result<&'c T, ContextError>
    where
        T: Send + Sync + 'static,
    {
        if let Some(value) = cell.try_get() {
            return Ok(value);
        }
        // A no-op stage on this context, so the completion lands in our queue
        // and wakes us even if the cell is produced elsewhere.
        let marker = apply1(Some(self), cell, |_, _| ());
        self.process_until(|| marker.is_ready(), timeout)?;
        Ok(cell.get())
    }

    /// Block until a notification arrives, returning `None` once the context
    /// is closed.
    pub(crate) fn next_blocking(&self) -> Option<Notification> {
        match self.inner.receiver.recv() {
            Ok(notification) if !self.is_closed() => Some(notification),
            Ok(notification) => {
                self.discard(notification);
                None
            }
            Err(_) => None,
        }
    }

    /// Throw away everything still queued. Stages are cancelled; deferred
    /// releases still run here, on the owning thread.
    pub(crate) fn discard_remaining(&self) {
        while let Ok(notification) = self.inner.receiver.try_recv() {
            self.discard(notification);
        }
    }

    fn discard(&self, notification: Notification) {
        match notification {
            Notification::Ready(subscriber) => {
                debug!(context = %self.name(), stage = %subscriber.id(), "discarding scheduled stage");
                subscriber.cancel();
                self.inner.counters.discarded.fetch_add(1, Ordering::Relaxed);
            }
            Notification::Release(object) => {
                drop(object);
                self.inner.counters.released.fetch_add(1, Ordering::Relaxed);
            }
            Notification::Wake => {}
        }
    }

    /// Run one notification. Returns whether it was a stage notification.
    pub(crate) fn dispatch(&self, notification: Notification) -> bool {
        match notification {
            Notification::Ready(subscriber) => {
                trace!(context = %self.name(), stage = %subscriber.id(), "dispatching");
                subscriber.on_input_ready();
                self.inner.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                true
            }
            Notification::Release(object) => {
                drop(object);
                self.inner.counters.released.fetch_add(1, Ordering::Relaxed);
                false
            }
            Notification::Wake => false,
        }
    }

    fn check_dispatchable(&self) -> Result<(), ContextError> {
        if !self.is_owner_thread() {
            warn!(context = %self.name(), "dispatch attempted from a foreign thread");
            return Err(ContextError::WrongThread(self.inner.name.clone()));
        }
        let nested = DISPATCH_STACK.with(|stack| {
            stack.borrow().iter().any(|context| context.id() == self.id())
        });
        if nested {
            return Err(ContextError::Reentrant(self.inner.name.clone()));
        }
        Ok(())
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Context {}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .field("pending", &self.pending())
            .finish()
    }
}

impl WeakContext {
    /// The context, if any strong handle to it is still alive.
    pub fn upgrade(&self) -> Option<Context> {
        self.inner.upgrade().map(|inner| Context { inner })
    }
}

impl fmt::Debug for WeakContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(context) => write!(f, "WeakContext({})", context.name()),
            None => f.write_str("WeakContext(<dropped>)"),
        }
    }
}

/// Marks a context as dispatching on this thread for the guard's lifetime.
///
/// Pops the entry when dropped, so the stack stays balanced even if a stage
/// function panics.
pub(crate) struct DispatchGuard {
    id: ContextId,
}

impl DispatchGuard {
    pub(crate) fn enter(context: &Context) -> Self {
        DISPATCH_STACK.with(|stack| stack.borrow_mut().push(context.clone()));
        Self { id: context.id() }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCH_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(context) = popped {
                debug_assert_eq!(
                    context.id(),
                    self.id,
                    "DispatchGuard mismatch: expected {}, got {}",
                    self.id,
                    context.id()
                );
            }
        });
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
