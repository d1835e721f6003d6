//! Pool core: FIFO wait queue, LIFO idle stack, grow/create/destroy,
//! release, close, and the time-based sweep.
//!
//! Concurrency model: one `parking_lot::Mutex` guards all pool state, in
//! the same shape `PoolInner` in the resource crate this is descended
//! from guards its state beside a semaphore. The lock is never held
//! across an `.await` — `Factory::create`/`destroy` run outside it, in
//! spawned tasks, and their results are folded back in under a fresh
//! lock acquisition.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::error::{Action, Error, Result};
use crate::events::{ErrorBus, ErrorEvent};
use crate::factory::Factory;
use crate::guard::Guard;
use crate::options::{OptionsPatch, PoolOptions};
use crate::promise::{self, Resolver};

/// A checked-out item. Returned to the pool automatically when dropped,
/// or explicitly via [`Pool::release`].
///
/// Derefs straight through to `T` (not `Arc<T>`) — the `Arc` is an
/// implementation detail that lets the pool keep its own clone of
/// in-use items for `close`'s `on_active` callback.
pub struct Pooled<T> {
    guard: Guard<Arc<T>>,
}

impl<T> std::ops::Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &**self.guard
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled").field("item", &**self.guard).finish()
    }
}

const SWEEP_CAP: Duration = Duration::from_secs(600);
const CREATE_FAILURE_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpiryKind {
    Lifetime,
    IdleTime,
}

struct Element<T> {
    id: u64,
    item: Arc<T>,
    created_at: Instant,
    idled_at: Option<Instant>,
}

impl<T> Element<T> {
    fn is_expired(&self, options: &PoolOptions, now: Instant) -> Option<ExpiryKind> {
        if options.lifetime_bounded() {
            let max = Duration::from_millis(options.max_lifetime_ms as u64);
            if now.saturating_duration_since(self.created_at) > max {
                return Some(ExpiryKind::Lifetime);
            }
        }
        if options.idle_time_bounded() {
            if let Some(idled_at) = self.idled_at {
                let max = Duration::from_millis(options.max_idle_time_ms as u64);
                if now.saturating_duration_since(idled_at) > max {
                    return Some(ExpiryKind::IdleTime);
                }
            }
        }
        None
    }

    /// Smaller of the remaining lifetime/idle-time budgets, or `None` if
    /// both caps are off.
    fn ttl(&self, options: &PoolOptions, now: Instant) -> Option<Duration> {
        let mut budget: Option<Duration> = None;
        if options.lifetime_bounded() {
            let max = Duration::from_millis(options.max_lifetime_ms as u64);
            let age = now.saturating_duration_since(self.created_at);
            let remaining = max.saturating_sub(age);
            budget = Some(budget.map_or(remaining, |b| b.min(remaining)));
        }
        if options.idle_time_bounded() {
            if let Some(idled_at) = self.idled_at {
                let max = Duration::from_millis(options.max_idle_time_ms as u64);
                let idle_for = now.saturating_duration_since(idled_at);
                let remaining = max.saturating_sub(idle_for);
                budget = Some(budget.map_or(remaining, |b| b.min(remaining)));
            }
        }
        budget
    }
}

struct Waiter<T> {
    id: u64,
    resolver: Resolver<(u64, Arc<T>)>,
}

struct SweepState {
    deadline: Instant,
    handle: tokio::task::JoinHandle<()>,
}

#[derive(Default, Clone, Copy)]
struct StatsInner {
    wait_duration: Duration,
    max_idle_closed: u64,
    max_idle_time_closed: u64,
    max_lifetime_closed: u64,
}

struct PoolState<T> {
    idle: Vec<Element<T>>,
    active: HashMap<u64, Element<T>>,
    wait_queue: VecDeque<Waiter<T>>,
    creating: u32,
    destroying: u32,
    create_failures: u32,
    growing: bool,
    closing: bool,
    closed: bool,
    sweep: Option<SweepState>,
    stats: StatsInner,
    options: PoolOptions,
    next_element_id: u64,
    next_waiter_id: u64,
}

/// A point-in-time snapshot of pool state and cumulative counters.
#[derive(Debug, Clone, Copy)]
pub struct Stats {
    /// Current `max_open_count` option.
    pub max_open_count: i64,
    /// Current `max_lifetime_ms` option.
    pub max_lifetime_ms: i64,
    /// Current `max_idle_time_ms` option.
    pub max_idle_time_ms: i64,
    /// Current `max_idle_count` option.
    pub max_idle_count: i64,
    /// `active + idle`.
    pub count: usize,
    /// Items currently lent out.
    pub in_use_count: usize,
    /// Items currently pooled.
    pub idle_count: usize,
    /// Callers currently queued in `get`.
    pub wait_count: usize,
    /// Cumulative time spent waiting, across completed waits.
    pub wait_duration: Duration,
    /// Idle elements destroyed for capacity/excess reasons.
    pub max_idle_closed: u64,
    /// Idle elements destroyed for exceeding `max_idle_time_ms`.
    pub max_idle_time_closed: u64,
    /// Elements destroyed for exceeding `max_lifetime_ms`.
    pub max_lifetime_closed: u64,
}

struct Inner<F: Factory> {
    factory: F,
    state: Mutex<PoolState<F::Item>>,
    events: ErrorBus,
    close_notify: tokio::sync::Notify,
}

/// A generic asynchronous resource pool.
///
/// Multiplexes a bounded set of `F::Item`s, created and destroyed
/// through `F`, among many concurrent callers of [`Pool::get`]. See the
/// crate documentation for the full lifecycle model.
pub struct Pool<F: Factory> {
    inner: Arc<Inner<F>>,
}

impl<F: Factory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: Factory> std::fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("stats", &self.stats()).finish()
    }
}

enum GetOutcome<T> {
    Ready(u64, Arc<T>),
    Pending {
        fut: promise::Promise<(u64, Arc<T>)>,
        resolver: Resolver<(u64, Arc<T>)>,
        waiter_id: u64,
        enqueued_at: Instant,
    },
}

impl<F: Factory> Pool<F> {
    /// Create a pool with default options (all caps unlimited,
    /// `parallel_create = true`).
    #[must_use]
    pub fn new(factory: F) -> Self {
        Self::with_options(factory, PoolOptions::default())
            .expect("default pool options are always valid")
    }

    /// Create a pool with explicit options.
    ///
    /// # Errors
    /// Returns `Error::OptionInvalid` if `options` disallows a value
    /// (see [`PoolOptions::validate`]).
    pub fn with_options(factory: F, options: PoolOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                factory,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    active: HashMap::new(),
                    wait_queue: VecDeque::new(),
                    creating: 0,
                    destroying: 0,
                    create_failures: 0,
                    growing: false,
                    closing: false,
                    closed: false,
                    sweep: None,
                    stats: StatsInner::default(),
                    options,
                    next_element_id: 0,
                    next_waiter_id: 0,
                }),
                events: ErrorBus::default(),
                close_notify: tokio::sync::Notify::new(),
            }),
        })
    }

    /// Borrow an item from the pool, creating one if needed.
    ///
    /// If `token` is given and is (or becomes) cancelled before an item
    /// is available, the returned future resolves to a `Canceled` error
    /// and the pending request is removed from the wait queue. Popping
    /// an idle item never rechecks its expiry — that is purely a
    /// sweep/release concern.
    ///
    /// # Errors
    /// `Closed` if the pool has finished closing, `Closing` if it is in
    /// the process of closing, or a tagged cancellation error.
    pub async fn get(&self, token: Option<&CancelToken>) -> Result<Pooled<F::Item>> {
        let outcome = {
            let mut state = self.inner.state.lock();
            self.try_get_locked(&mut state, token)?
        };

        self.spawn_grow();

        match outcome {
            GetOutcome::Ready(id, item) => Ok(self.make_pooled(id, item)),
            GetOutcome::Pending {
                fut,
                resolver,
                waiter_id,
                enqueued_at,
            } => {
                // Registered after the pool lock from try_get_locked is
                // dropped: an already-cancelled token fires its callback
                // inline from on_cancel, and that callback re-locks the
                // pool to splice the waiter out.
                if let Some(token) = token {
                    let pool = self.clone();
                    let cancel_token = token.clone();
                    token.on_cancel(move || {
                        pool.remove_waiter(waiter_id);
                        resolver.reject(cancel_token.cancel_error());
                    });
                }

                let result = fut.await;
                {
                    let mut state = self.inner.state.lock();
                    state.stats.wait_duration += enqueued_at.elapsed();
                }
                let (id, item) = result?;
                Ok(self.make_pooled(id, item))
            }
        }
    }

    fn try_get_locked(
        &self,
        state: &mut PoolState<F::Item>,
        token: Option<&CancelToken>,
    ) -> Result<GetOutcome<F::Item>> {
        if state.closed {
            return Err(Error::Closed);
        }
        if state.closing {
            return Err(Error::Closing);
        }
        if let Some(token) = token {
            if token.is_canceled() {
                return Err(token.cancel_error());
            }
        }

        if let Some(mut element) = state.idle.pop() {
            element.idled_at = None;
            let id = element.id;
            let item = Arc::clone(&element.item);
            state.active.insert(id, element);
            return Ok(GetOutcome::Ready(id, item));
        }

        let waiter_id = state.next_waiter_id;
        state.next_waiter_id += 1;

        let (resolver, fut) = promise::promise::<(u64, Arc<F::Item>)>();
        state.wait_queue.push_back(Waiter {
            id: waiter_id,
            resolver: resolver.clone(),
        });

        Ok(GetOutcome::Pending {
            fut,
            resolver,
            waiter_id,
            enqueued_at: Instant::now(),
        })
    }

    fn remove_waiter(&self, waiter_id: u64) {
        let mut state = self.inner.state.lock();
        state.wait_queue.retain(|w| w.id != waiter_id);
    }

    fn make_pooled(&self, id: u64, item: Arc<F::Item>) -> Pooled<F::Item> {
        let pool = self.clone();
        let guard = Guard::new(item, move |item| {
            pool.release_by_id(id, item);
        });
        Pooled { guard }
    }

    /// Return a previously checked-out item to the pool. Equivalent to
    /// dropping it — provided for symmetry with the external interface.
    pub fn release(&self, pooled: Pooled<F::Item>) {
        drop(pooled);
    }

    fn release_by_id(&self, id: u64, caller_item: Arc<F::Item>) {
        let element = {
            let mut state = self.inner.state.lock();
            state.active.remove(&id)
        };
        drop(caller_item);

        let Some(Element { item, created_at, .. }) = element else {
            return;
        };

        let mut owned = match Arc::try_unwrap(item) {
            Ok(owned) => owned,
            Err(_) => return,
        };

        if let Err(err) = self.inner.factory.reset(&mut owned) {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %err, element_id = id, "factory reset rejected item, destroying it");
            self.emit_error(Action::Reset, &err);
            self.spawn_destroy(owned);
            return;
        }

        self.offer_available(id, owned, created_at);
    }

    /// Decide whether a just-released (or just-created) item gets
    /// destroyed, handed straight to the oldest waiter, or pooled.
    fn offer_available(&self, id: u64, item: F::Item, created_at: Instant) {
        enum Decision<T> {
            Destroy(T),
            Handoff(Resolver<(u64, Arc<T>)>, Arc<T>),
            Pooled(Option<Duration>),
        }

        let now = Instant::now();
        let decision = {
            let mut state = self.inner.state.lock();

            let lifetime_expired = state.options.lifetime_bounded()
                && now.saturating_duration_since(created_at)
                    > Duration::from_millis(state.options.max_lifetime_ms as u64);
            let at_capacity = !state.options.open_count_unlimited()
                && (state.active.len() + state.idle.len()) as i64 >= state.options.max_open_count;

            if state.closing || lifetime_expired || at_capacity {
                if lifetime_expired {
                    state.stats.max_lifetime_closed += 1;
                } else if at_capacity && !state.closing {
                    state.stats.max_idle_closed += 1;
                }
                Decision::Destroy(item)
            } else if let Some(waiter) = state.wait_queue.pop_front() {
                let item = Arc::new(item);
                state.active.insert(
                    id,
                    Element {
                        id,
                        item: Arc::clone(&item),
                        created_at,
                        idled_at: None,
                    },
                );
                Decision::Handoff(waiter.resolver, item)
            } else if state.options.idle_count_unlimited()
                || (state.idle.len() as i64) < state.options.max_idle_count
            {
                let element = Element {
                    id,
                    item: Arc::new(item),
                    created_at,
                    idled_at: Some(now),
                };
                let ttl = element.ttl(&state.options, now);
                state.idle.push(element);
                Decision::Pooled(ttl)
            } else {
                state.stats.max_idle_closed += 1;
                Decision::Destroy(item)
            }
        };

        match decision {
            Decision::Destroy(item) => self.spawn_destroy(item),
            Decision::Handoff(resolver, item) => {
                resolver.resolve((id, item));
            }
            Decision::Pooled(Some(ttl)) => self.push_sweep(ttl),
            Decision::Pooled(None) => {}
        }
    }

    /// Re-entrancy-guarded background routine that tops creation up to
    /// satisfy queued waiters.
    async fn grow(&self) {
        let (needed, parallel_create) = {
            let mut state = self.inner.state.lock();
            if state.growing || state.closing {
                return;
            }
            state.growing = true;

            let mut needed = state.wait_queue.len() as i64;
            if !state.options.open_count_unlimited() {
                needed = needed.min(state.options.max_open_count - state.active.len() as i64);
            }
            needed -= state.creating as i64;
            (needed.max(0), state.options.parallel_create)
        };

        if parallel_create {
            for _ in 0..needed {
                self.spawn_create();
            }
        } else if needed > 0 {
            self.create().await;
        }

        let reschedule = {
            let mut state = self.inner.state.lock();
            state.growing = false;
            !state.closing && !state.wait_queue.is_empty() && state.creating == 0
        };

        if reschedule {
            self.spawn_grow();
        }

        self.flush();
    }

    fn spawn_grow(&self) {
        let pool = self.clone();
        tokio::spawn(async move {
            pool.grow().await;
        });
    }

    fn spawn_create(&self) {
        let pool = self.clone();
        tokio::spawn(async move {
            pool.create().await;
        });
    }

    async fn create(&self) {
        {
            let mut state = self.inner.state.lock();
            state.creating += 1;
        }

        match self.inner.factory.create().await {
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "factory create failed");
                self.emit_error(Action::Create, &err);
                let should_close = {
                    let mut state = self.inner.state.lock();
                    state.creating -= 1;
                    state.create_failures += 1;
                    state.create_failures >= CREATE_FAILURE_LIMIT
                };
                if should_close {
                    self.close(None).await.ok();
                }
            }
            Ok(item) => {
                let (closing_now, id) = {
                    let mut state = self.inner.state.lock();
                    state.create_failures = 0;
                    state.creating -= 1;
                    let id = state.next_element_id;
                    state.next_element_id += 1;
                    (state.closing, id)
                };
                #[cfg(feature = "tracing")]
                tracing::debug!(element_id = id, "factory create succeeded");
                if closing_now {
                    self.spawn_destroy(item);
                    return;
                }
                self.offer_available(id, item, Instant::now());
            }
        }
    }

    fn spawn_destroy(&self, item: F::Item) {
        let pool = self.clone();
        tokio::spawn(async move {
            pool.destroy(item).await;
        });
    }

    fn spawn_destroy_element(&self, element: Element<F::Item>) {
        let id = element.id;
        let owned = Arc::try_unwrap(element.item).unwrap_or_else(|_| {
            unreachable!("element {id} destroyed while a stray Arc clone is still held")
        });
        self.spawn_destroy(owned);
    }

    async fn destroy(&self, item: F::Item) {
        {
            let mut state = self.inner.state.lock();
            state.destroying += 1;
        }

        if let Err(err) = self.inner.factory.destroy(item).await {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %err, "factory destroy failed");
            self.emit_error(Action::Destroy, &err);
        }

        let should_flush = {
            let mut state = self.inner.state.lock();
            state.destroying -= 1;
            state.destroying == 0
        };
        if should_flush {
            self.flush();
        }
    }

    /// Schedule (or keep) a sweep timer. An earlier-deadlined existing
    /// timer is left alone; otherwise the old one is cancelled.
    fn push_sweep(&self, ttl: Duration) {
        let deadline = Instant::now() + ttl;
        let mut state = self.inner.state.lock();
        if let Some(existing) = &state.sweep {
            if existing.deadline <= deadline {
                return;
            }
            existing.handle.abort();
        }
        let pool = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            pool.run_sweep();
        });
        state.sweep = Some(SweepState { deadline, handle });
    }

    fn run_sweep(&self) {
        let now = Instant::now();
        let (to_destroy, reschedule) = {
            let mut state = self.inner.state.lock();
            // Clear before scanning so an in-handler reschedule wins.
            state.sweep = None;

            let mut to_destroy = Vec::new();
            let mut next_ttl: Option<Duration> = None;
            let mut i = state.idle.len();
            while i > 0 {
                i -= 1;
                if let Some(kind) = state.idle[i].is_expired(&state.options, now) {
                    let element = state.idle.remove(i);
                    match kind {
                        ExpiryKind::Lifetime => state.stats.max_lifetime_closed += 1,
                        ExpiryKind::IdleTime => state.stats.max_idle_time_closed += 1,
                    }
                    to_destroy.push(element);
                } else if let Some(ttl) = state.idle[i].ttl(&state.options, now) {
                    next_ttl = Some(next_ttl.map_or(ttl, |cur| cur.min(ttl)));
                }
            }

            let reschedule = if state.idle.is_empty() {
                None
            } else {
                next_ttl.map(|t| t.min(SWEEP_CAP))
            };
            (to_destroy, reschedule)
        };

        #[cfg(feature = "tracing")]
        if !to_destroy.is_empty() {
            tracing::debug!(count = to_destroy.len(), "sweep destroying expired idle items");
        }

        if let Some(ttl) = reschedule {
            self.push_sweep(ttl);
        }
        for element in to_destroy {
            self.spawn_destroy_element(element);
        }
    }

    /// Begin graceful shutdown. Idempotent: a second call while closing
    /// returns the same eventual completion, and a call after closing
    /// returns immediately.
    ///
    /// `on_active`, if given, is invoked once per in-use item; the
    /// contract is that it will eventually cause that item's `release`
    /// to run (immediately, or via the caller's own shutdown path) — if
    /// it never does, `close` never resolves.
    pub async fn close(&self, on_active: Option<Box<dyn Fn(&F::Item) + Send>>) -> Result<()> {
        let should_process = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Ok(());
            }
            if state.closing {
                false
            } else {
                state.closing = true;
                if let Some(sweep) = state.sweep.take() {
                    sweep.handle.abort();
                }
                true
            }
        };

        if should_process {
            #[cfg(feature = "tracing")]
            tracing::info!("pool closing");
            self.process_close(on_active);
        }

        loop {
            let notified = self.inner.close_notify.notified();
            if self.inner.state.lock().closed {
                return Ok(());
            }
            notified.await;
        }
    }

    fn process_close(&self, on_active: Option<Box<dyn Fn(&F::Item) + Send>>) {
        let (waiters, idle, active_items) = {
            let mut state = self.inner.state.lock();
            let waiters: Vec<_> = state.wait_queue.drain(..).collect();
            let idle: Vec<_> = state.idle.drain(..).collect();
            let active_items: Vec<Arc<F::Item>> =
                state.active.values().map(|e| Arc::clone(&e.item)).collect();
            (waiters, idle, active_items)
        };

        for waiter in waiters {
            waiter.resolver.reject(Error::Closing);
        }

        for element in idle {
            self.spawn_destroy_element(element);
        }

        if let Some(on_active) = on_active {
            for item in &active_items {
                on_active(item);
            }
        }

        self.flush();
    }

    /// Transition `closing -> closed` once every create/destroy has
    /// quiesced and no items remain active.
    fn flush(&self) {
        let did_close = {
            let mut state = self.inner.state.lock();
            if state.closing
                && !state.closed
                && state.destroying == 0
                && state.creating == 0
                && state.active.is_empty()
            {
                state.closed = true;
                true
            } else {
                false
            }
        };
        if did_close {
            #[cfg(feature = "tracing")]
            tracing::info!("pool closed");
            self.inner.close_notify.notify_waiters();
        }
    }

    /// Change pool options. Validates the whole resulting configuration
    /// before committing; on rejection, nothing changes.
    ///
    /// # Errors
    /// `Error::OptionInvalid` if the patch would set a disallowed value.
    pub fn set_options(&self, patch: OptionsPatch) -> Result<()> {
        let (idle_to_destroy, grow_needed, sweep_reaction) = {
            let mut state = self.inner.state.lock();
            let diff = state.options.apply(patch)?;

            let mut idle_to_destroy = Vec::new();
            if diff.open_count_changed && !state.options.open_count_unlimited() {
                while (state.active.len() + state.idle.len()) as i64 > state.options.max_open_count
                    && !state.idle.is_empty()
                {
                    idle_to_destroy.push(state.idle.remove(0));
                    state.stats.max_idle_closed += 1;
                }
            }
            if diff.idle_count_changed && !state.options.idle_count_unlimited() {
                while (state.idle.len() as i64) > state.options.max_idle_count {
                    idle_to_destroy.push(state.idle.remove(0));
                    state.stats.max_idle_closed += 1;
                }
            }

            let grow_needed = diff.open_count_changed && !state.wait_queue.is_empty();

            let bounded = state.options.lifetime_bounded() || state.options.idle_time_bounded();
            let sweep_reaction = if diff.sweep_affecting() {
                if bounded && !state.idle.is_empty() {
                    Some(true) // schedule immediate sweep
                } else if !bounded {
                    Some(false) // clear pending sweep
                } else {
                    None
                }
            } else {
                None
            };

            (idle_to_destroy, grow_needed, sweep_reaction)
        };

        for element in idle_to_destroy {
            self.spawn_destroy_element(element);
        }

        match sweep_reaction {
            Some(true) => self.push_sweep(Duration::ZERO),
            Some(false) => {
                let mut state = self.inner.state.lock();
                if let Some(sweep) = state.sweep.take() {
                    sweep.handle.abort();
                }
            }
            _ => {}
        }

        if grow_needed {
            self.spawn_grow();
        }

        Ok(())
    }

    /// Snapshot current counters and option values.
    #[must_use]
    pub fn stats(&self) -> Stats {
        let state = self.inner.state.lock();
        Stats {
            max_open_count: state.options.max_open_count,
            max_lifetime_ms: state.options.max_lifetime_ms,
            max_idle_time_ms: state.options.max_idle_time_ms,
            max_idle_count: state.options.max_idle_count,
            count: state.active.len() + state.idle.len(),
            in_use_count: state.active.len(),
            idle_count: state.idle.len(),
            wait_count: state.wait_queue.len(),
            wait_duration: state.stats.wait_duration,
            max_idle_closed: state.stats.max_idle_closed,
            max_idle_time_closed: state.stats.max_idle_time_closed,
            max_lifetime_closed: state.stats.max_lifetime_closed,
        }
    }

    fn emit_error(&self, action: Action, err: &Error) {
        self.inner.events.emit(action, err);
    }

    /// Subscribe to the pool's `error` event (factory failures during
    /// `create`/`destroy`/`reset`). Unsubscribing is just dropping the
    /// receiver.
    #[must_use]
    pub fn subscribe_errors(&self) -> tokio::sync::broadcast::Receiver<ErrorEvent> {
        self.inner.events.subscribe()
    }
}
