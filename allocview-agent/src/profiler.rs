//! In-process allocation profiler
//!
//! [`ProfilingAllocator`] wraps a [`GlobalAlloc`] and reports every
//! allocation and free to the process-wide [`AllocProfiler`]. The profiler
//! keeps one bucket per distinct call stack with cumulative counters.
//!
//! ## Two-stage counters
//!
//! Hooks only touch a bucket's *recent* counters. [`AllocProfiler::refresh`]
//! folds recent into *published*, and [`AllocProfiler::fill`] copies only
//! published values. A snapshot therefore reflects a single refresh point
//! even while other threads keep allocating.
//!
//! ## Reentrancy
//!
//! The profiler allocates (table inserts, stack unwinding). A thread-local
//! flag marks "inside a hook" so those allocations pass straight through.

#![allow(unsafe_code)] // GlobalAlloc is an unsafe trait

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

use allocview_common::{Record, Stack, MAX_STACK_DEPTH};
use dashmap::DashMap;

/// Frames belonging to the profiler itself at the top of every capture.
const STACK_SKIP: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counters {
    alloc_bytes: i64,
    free_bytes: i64,
    alloc_objects: i64,
    free_objects: i64,
}

impl Counters {
    fn absorb(&mut self, other: &mut Counters) {
        self.alloc_bytes += other.alloc_bytes;
        self.free_bytes += other.free_bytes;
        self.alloc_objects += other.alloc_objects;
        self.free_objects += other.free_objects;
        *other = Counters::default();
    }
}

#[derive(Debug, Default)]
struct Bucket {
    recent: Counters,
    published: Counters,
}

#[derive(Clone, Copy)]
struct Allocation {
    stack: Stack,
    weighted_bytes: i64,
    weighted_objects: i64,
}

/// Result of copying published buckets into a caller buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fill {
    /// Buckets available. When `complete` is false this is the size the
    /// buffer needs to be.
    pub count: usize,
    pub complete: bool,
}

/// Per-stack allocation counters for the whole process.
pub struct AllocProfiler {
    sample_rate: AtomicU64,
    sequence: AtomicU64,
    live: DashMap<usize, Allocation>,
    buckets: DashMap<Stack, Bucket>,
}

impl AllocProfiler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sample_rate: AtomicU64::new(1),
            sequence: AtomicU64::new(0),
            live: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Record every `rate`th allocation; counters are scaled by `rate`.
    pub fn set_sample_rate(&self, rate: u64) {
        self.sample_rate.store(rate.max(1), Ordering::Relaxed);
    }

    fn should_sample(&self, rate: u64) -> bool {
        rate <= 1 || self.sequence.fetch_add(1, Ordering::Relaxed) % rate == 0
    }

    /// Account an allocation of `size` bytes at `ptr` to `stack`.
    pub fn record_alloc(&self, ptr: usize, size: usize, stack: Stack) {
        let rate = self.sample_rate.load(Ordering::Relaxed).max(1);
        if !self.should_sample(rate) {
            return;
        }
        let rate = i64::try_from(rate).unwrap_or(i64::MAX);
        let allocation = Allocation {
            stack,
            weighted_bytes: i64::try_from(size).unwrap_or(i64::MAX).saturating_mul(rate),
            weighted_objects: rate,
        };

        // An address can come back from the allocator while a stale entry is
        // still present if its free was missed.
        self.record_free(ptr);
        self.live.insert(ptr, allocation);

        let mut bucket = self.buckets.entry(stack).or_default();
        bucket.recent.alloc_bytes += allocation.weighted_bytes;
        bucket.recent.alloc_objects += allocation.weighted_objects;
    }

    /// Account a free of `ptr` to the bucket that allocated it. Untracked
    /// pointers are ignored.
    pub fn record_free(&self, ptr: usize) {
        let Some((_, allocation)) = self.live.remove(&ptr) else {
            return;
        };
        if let Some(mut bucket) = self.buckets.get_mut(&allocation.stack) {
            bucket.recent.free_bytes += allocation.weighted_bytes;
            bucket.recent.free_objects += allocation.weighted_objects;
        }
    }

    /// Fold recent counters into the published ones.
    pub fn refresh(&self) {
        let _guard = ReentryGuard::enter();
        for mut bucket in self.buckets.iter_mut() {
            let Bucket { recent, published } = &mut *bucket;
            published.absorb(recent);
        }
    }

    /// Copy published buckets into `out`.
    ///
    /// Buckets that were created after the last refresh and therefore have
    /// nothing published yet are skipped.
    pub fn fill(&self, out: &mut [Record]) -> Fill {
        let _guard = ReentryGuard::enter();
        let mut count = 0;
        for entry in &self.buckets {
            let c = entry.value().published;
            if c == Counters::default() {
                continue;
            }
            if let Some(slot) = out.get_mut(count) {
                *slot = Record {
                    alloc_bytes: c.alloc_bytes,
                    free_bytes: c.free_bytes,
                    alloc_objects: c.alloc_objects,
                    free_objects: c.free_objects,
                    stack: *entry.key(),
                };
            }
            count += 1;
        }
        Fill { count, complete: count <= out.len() }
    }

    fn capture_stack() -> Stack {
        let mut stack = Stack::EMPTY;
        let mut depth = 0;
        let mut skip = STACK_SKIP;
        // SAFETY: only the current thread is walked and nothing is
        // symbolized while tracing.
        unsafe {
            backtrace::trace_unsynchronized(|frame| {
                let ip = frame.ip() as u64;
                if ip == 0 {
                    return true;
                }
                if skip > 0 {
                    skip -= 1;
                    return true;
                }
                stack.set(depth, ip);
                depth += 1;
                depth < MAX_STACK_DEPTH
            });
        }
        stack
    }

    fn on_alloc(&self, ptr: *mut u8, size: usize) {
        if ptr.is_null() {
            return;
        }
        self.record_alloc(ptr as usize, size, Self::capture_stack());
    }

    fn on_dealloc(&self, ptr: *mut u8) {
        if !ptr.is_null() {
            self.record_free(ptr as usize);
        }
    }
}

impl Default for AllocProfiler {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as inside the profiler.
struct ReentryGuard;

impl ReentryGuard {
    /// `None` if already inside, or if thread-local storage is gone (thread
    /// teardown frees after TLS destruction).
    fn enter() -> Option<Self> {
        IN_HOOK
            .try_with(|flag| {
                if flag.get() {
                    None
                } else {
                    flag.set(true);
                    Some(Self)
                }
            })
            .ok()
            .flatten()
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        let _ = IN_HOOK.try_with(|flag| flag.set(false));
    }
}

/// Permanently exclude the calling thread from profiling. The agent thread
/// calls this so its own buffers do not show up in the data it sends.
pub(crate) fn exclude_current_thread() {
    std::mem::forget(ReentryGuard::enter());
}

static PROFILER: OnceLock<AllocProfiler> = OnceLock::new();
static ENABLED: AtomicBool = AtomicBool::new(false);

/// The process-wide profiler, created on first use.
pub fn global() -> &'static AllocProfiler {
    PROFILER.get_or_init(AllocProfiler::new)
}

/// Start recording allocations made through [`ProfilingAllocator`].
pub fn enable(sample_rate: u64) {
    let _guard = ReentryGuard::enter();
    global().set_sample_rate(sample_rate);
    ENABLED.store(true, Ordering::Release);
}

#[must_use]
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

/// Runs `f` against the global profiler unless profiling is off or the
/// thread is already inside a hook.
#[inline]
fn with_profiler(f: impl FnOnce(&AllocProfiler)) {
    if !is_enabled() {
        return;
    }
    let Some(_guard) = ReentryGuard::enter() else {
        return;
    };
    f(global());
}

/// Global allocator wrapper feeding [`AllocProfiler`].
///
/// ```ignore
/// #[global_allocator]
/// static ALLOC: allocview_agent::ProfilingAllocator = allocview_agent::ProfilingAllocator::system();
/// ```
pub struct ProfilingAllocator<A = System> {
    inner: A,
}

impl<A> ProfilingAllocator<A> {
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }
}

impl ProfilingAllocator<System> {
    #[must_use]
    pub const fn system() -> Self {
        Self::new(System)
    }
}

unsafe impl<A: GlobalAlloc> GlobalAlloc for ProfilingAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        with_profiler(|p| p.on_alloc(ptr, layout.size()));
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc_zeroed(layout);
        with_profiler(|p| p.on_alloc(ptr, layout.size()));
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        with_profiler(|p| p.on_dealloc(ptr));
        self.inner.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = self.inner.realloc(ptr, layout, new_size);
        if !new_ptr.is_null() {
            with_profiler(|p| {
                p.on_dealloc(ptr);
                p.on_alloc(new_ptr, new_size);
            });
        }
        new_ptr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(frames: &[u64]) -> Stack {
        Stack::from_frames(frames)
    }

    #[test]
    fn test_counters_hidden_until_refresh() {
        let p = AllocProfiler::new();
        p.record_alloc(0x1000, 64, stack(&[0xa, 0xb]));

        let mut out = [Record::default(); 4];
        assert_eq!(p.fill(&mut out), Fill { count: 0, complete: true });

        p.refresh();
        assert_eq!(p.fill(&mut out), Fill { count: 1, complete: true });
        assert_eq!(out[0].alloc_bytes, 64);
        assert_eq!(out[0].alloc_objects, 1);
        assert_eq!(out[0].stack, stack(&[0xa, 0xb]));
    }

    #[test]
    fn test_free_attributed_to_allocating_stack() {
        let p = AllocProfiler::new();
        p.record_alloc(0x1000, 100, stack(&[0xa]));
        p.record_alloc(0x2000, 30, stack(&[0xb]));
        p.record_free(0x1000);
        p.record_free(0x9999);
        p.refresh();

        let mut out = [Record::default(); 4];
        let fill = p.fill(&mut out);
        assert_eq!(fill.count, 2);
        let a = out[..2].iter().find(|r| r.stack == stack(&[0xa])).unwrap();
        assert_eq!((a.alloc_bytes, a.free_bytes, a.free_objects), (100, 100, 1));
        let b = out[..2].iter().find(|r| r.stack == stack(&[0xb])).unwrap();
        assert_eq!(b.in_use_bytes(), 30);
    }

    #[test]
    fn test_published_counters_are_cumulative() {
        let p = AllocProfiler::new();
        p.record_alloc(0x1000, 10, stack(&[0xa]));
        p.refresh();
        p.record_alloc(0x2000, 5, stack(&[0xa]));
        p.refresh();
        p.refresh();

        let mut out = [Record::default(); 1];
        p.fill(&mut out);
        assert_eq!(out[0].alloc_bytes, 15);
        assert_eq!(out[0].alloc_objects, 2);
    }

    #[test]
    fn test_fill_reports_required_size() {
        let p = AllocProfiler::new();
        for i in 0..5u64 {
            p.record_alloc(0x1000 + i as usize, 8, stack(&[i + 1]));
        }
        p.refresh();

        let mut small = [Record::default(); 2];
        assert_eq!(p.fill(&mut small), Fill { count: 5, complete: false });
        let mut big = vec![Record::default(); 5];
        assert_eq!(p.fill(&mut big), Fill { count: 5, complete: true });
    }

    #[test]
    fn test_sample_rate_scales_counters() {
        let p = AllocProfiler::new();
        p.set_sample_rate(4);
        for i in 0..8 {
            p.record_alloc(0x1000 + i, 16, stack(&[0xa]));
        }
        p.refresh();

        let mut out = [Record::default(); 1];
        p.fill(&mut out);
        // 2 of 8 recorded, each weighted by 4.
        assert_eq!(out[0].alloc_objects, 8);
        assert_eq!(out[0].alloc_bytes, 128);
    }

    #[test]
    fn test_capture_stack_has_frames() {
        let captured = AllocProfiler::capture_stack();
        assert!(captured.depth() > 0);
    }
}
