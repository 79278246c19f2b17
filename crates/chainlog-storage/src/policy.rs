//! Segment Roll Policies
//!
//! A roll policy decides when the writer seals its in-memory buffer into a
//! segment. The policy observes the live buffer through three events -
//! bytes written (post-compression), block processed, segment flushed - and
//! answers `should_roll`. `reset` is called right after each flush.
//!
//! Policies compose: [`CompositeRollPolicy`] ORs several together, and
//! [`WrappedRollPolicy`] piggy-backs a hook onto every flush (the
//! writer-with-indexer uses this to flush indexes before a segment seals,
//! keeping indexes and catalog aligned).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Observes writer activity and signals when to seal the current segment.
///
/// Events use `&self`: a policy is shared between the writer and its byte
/// pipeline, so state lives behind atomics or a mutex.
#[async_trait(?Send)]
pub trait RollPolicy: Send + Sync {
    /// Bytes hit the segment buffer (after encoding and compression).
    fn on_write(&self, _bytes: usize) {}

    /// A block finished encoding.
    fn on_block(&self, _block_num: u64) {}

    /// The buffer is being sealed into a segment.
    async fn on_flush(&self) {}

    fn should_roll(&self) -> bool;

    /// Called after each flush, before the next segment starts.
    fn reset(&self);
}

/// Invoked by [`WrappedRollPolicy`] on every flush.
#[async_trait(?Send)]
pub trait RollHook: Send + Sync {
    async fn on_roll(&self);
}

// ---------------------------------------------------------------------------
// Size
// ---------------------------------------------------------------------------

/// Roll once the segment buffer reaches `max_size` bytes.
pub struct SizeRollPolicy {
    max_size: u64,
    written: AtomicU64,
}

impl SizeRollPolicy {
    pub fn new(max_size: u64) -> Self {
        Self {
            max_size,
            written: AtomicU64::new(0),
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

#[async_trait(?Send)]
impl RollPolicy for SizeRollPolicy {
    fn on_write(&self, bytes: usize) {
        self.written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn should_roll(&self) -> bool {
        self.written.load(Ordering::Relaxed) >= self.max_size
    }

    fn reset(&self) {
        self.written.store(0, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Block interval
// ---------------------------------------------------------------------------

/// Roll on block-height boundaries: after block `n` where `n % interval == 0`.
pub struct BlockIntervalRollPolicy {
    interval: u64,
    last_block: AtomicU64,
}

impl BlockIntervalRollPolicy {
    pub fn new(interval: u64) -> Self {
        Self {
            interval,
            last_block: AtomicU64::new(0),
        }
    }
}

#[async_trait(?Send)]
impl RollPolicy for BlockIntervalRollPolicy {
    fn on_block(&self, block_num: u64) {
        self.last_block.store(block_num, Ordering::Relaxed);
    }

    fn should_roll(&self) -> bool {
        let last = self.last_block.load(Ordering::Relaxed);
        last != 0 && last % self.interval == 0
    }

    fn reset(&self) {
        self.last_block.store(0, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Roll once the current segment is older than `interval`.
pub struct TimeRollPolicy {
    interval: Duration,
    last_rolled: Mutex<Instant>,
}

impl TimeRollPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_rolled: Mutex::new(Instant::now()),
        }
    }

    fn last_rolled(&self) -> Instant {
        match self.last_rolled.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[async_trait(?Send)]
impl RollPolicy for TimeRollPolicy {
    fn should_roll(&self) -> bool {
        self.last_rolled().elapsed() >= self.interval
    }

    fn reset(&self) {
        let now = Instant::now();
        match self.last_rolled.lock() {
            Ok(mut guard) => *guard = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }
}

// ---------------------------------------------------------------------------
// Composite (OR)
// ---------------------------------------------------------------------------

/// Rolls when any member policy would.
pub struct CompositeRollPolicy {
    policies: Vec<Arc<dyn RollPolicy>>,
}

impl CompositeRollPolicy {
    pub fn new(policies: Vec<Arc<dyn RollPolicy>>) -> Self {
        Self { policies }
    }
}

#[async_trait(?Send)]
impl RollPolicy for CompositeRollPolicy {
    fn on_write(&self, bytes: usize) {
        for policy in &self.policies {
            policy.on_write(bytes);
        }
    }

    fn on_block(&self, block_num: u64) {
        for policy in &self.policies {
            policy.on_block(block_num);
        }
    }

    async fn on_flush(&self) {
        for policy in &self.policies {
            policy.on_flush().await;
        }
    }

    fn should_roll(&self) -> bool {
        self.policies.iter().any(|p| p.should_roll())
    }

    fn reset(&self) {
        for policy in &self.policies {
            policy.reset();
        }
    }
}

// ---------------------------------------------------------------------------
// Wrapped (flush hook)
// ---------------------------------------------------------------------------

/// Delegates to an inner policy and fires a hook on every flush, before the
/// inner policy observes it.
pub struct WrappedRollPolicy {
    inner: Arc<dyn RollPolicy>,
    hook: Arc<dyn RollHook>,
}

impl WrappedRollPolicy {
    pub fn new(inner: Arc<dyn RollPolicy>, hook: Arc<dyn RollHook>) -> Self {
        Self { inner, hook }
    }
}

#[async_trait(?Send)]
impl RollPolicy for WrappedRollPolicy {
    fn on_write(&self, bytes: usize) {
        self.inner.on_write(bytes);
    }

    fn on_block(&self, block_num: u64) {
        self.inner.on_block(block_num);
    }

    async fn on_flush(&self) {
        self.hook.on_roll().await;
        self.inner.on_flush().await;
    }

    fn should_roll(&self) -> bool {
        self.inner.should_roll()
    }

    fn reset(&self) {
        self.inner.reset();
    }
}
