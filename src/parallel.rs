// src/parallel.rs
//
// Fixed worker pool with a two-phase barrier rendezvous.
//
// The master publishes one operation (a borrowed closure over `[start, end)`), releases the
// workers through the dispatch barrier and then blocks on the completion barrier. Each
// worker strides through its chunks and, for reductions, leaves one partial sum in its own
// cache line. Nothing is heap-allocated per dispatch.
//
// Inputs of at most `min_chunk` elements, or a pool of one thread, never touch the workers.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default minimum number of elements per chunk.
pub const MIN_CHUNK: usize = 8192;

/// Bounded wait for each worker during teardown.
const JOIN_TIMEOUT: Duration = Duration::from_millis(100);

type ApplyFn = dyn Fn(usize, usize) + Sync;
type ReduceFn = dyn Fn(usize, usize) -> f64 + Sync;

#[derive(Clone, Copy)]
enum Op {
    Apply(*const ApplyFn),
    Reduce(*const ReduceFn),
}

#[derive(Clone, Copy)]
struct Job {
    op: Op,
    len: usize,
    chunk: usize,
}

// SAFETY: the closure behind `op` is only dereferenced by workers between the dispatch and
// completion barriers, while the dispatching frame that owns the borrow is blocked.
unsafe impl Send for Job {}

#[repr(align(64))]
struct PaddedSum(AtomicU64);

struct Shared {
    barrier: Barrier,
    job: Mutex<Option<Job>>,
    /// `None` until every worker is spawned, then whether the pool goes live.
    start: Mutex<Option<bool>>,
    start_cv: Condvar,
    terminate: AtomicBool,
    panicked: AtomicBool,
    partials: Box<[PaddedSum]>,
}

struct Pool {
    threads: usize,
    shared: Option<Arc<Shared>>,
    workers: Vec<JoinHandle<()>>,
}

/// Explicitly owned worker pool used by every parallel kernel in the crate.
///
/// Dispatches from different threads are serialized; reinitialization is expected not to
/// race with in-flight work.
pub struct ParallelExecutor {
    pool: Mutex<Pool>,
    min_chunk: usize,
}

impl fmt::Debug for ParallelExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelExecutor")
            .field("threads", &self.threads())
            .field("min_chunk", &self.min_chunk)
            .finish()
    }
}

/// `0` means one thread per available core.
pub fn resolve_threads(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl ParallelExecutor {
    /// Start a pool of `num_threads` workers (`0` = autodetect).
    pub fn new(num_threads: usize) -> Self {
        Self::with_min_chunk(num_threads, MIN_CHUNK)
    }

    /// Same as [`ParallelExecutor::new`] with a custom synchronous-bypass threshold.
    pub fn with_min_chunk(num_threads: usize, min_chunk: usize) -> Self {
        let exec = Self {
            pool: Mutex::new(Pool {
                threads: 1,
                shared: None,
                workers: Vec::new(),
            }),
            min_chunk: min_chunk.max(1),
        };
        exec.init(num_threads);
        exec
    }

    /// Single-threaded executor; every call runs inline.
    pub fn sequential() -> Self {
        Self::new(1)
    }

    /// Tear down any running pool and start a new one with `num_threads` workers.
    pub fn init(&self, num_threads: usize) {
        let threads = resolve_threads(num_threads);
        let mut pool = self.lock_pool();
        pool.teardown();
        if threads > 1 {
            pool.spawn(threads);
        }
        log::debug!(
            "parallel executor: {} thread(s), min chunk {}",
            pool.threads,
            self.min_chunk
        );
    }

    /// Stop all workers. Later calls run sequentially until `init` is called again.
    pub fn shutdown(&self) {
        self.lock_pool().teardown();
    }

    pub fn threads(&self) -> usize {
        self.lock_pool().threads
    }

    pub fn min_chunk(&self) -> usize {
        self.min_chunk
    }

    /// Run `op(start, end)` over disjoint ranges covering `[0, len)`.
    pub fn execute_contiguous<F>(&self, len: usize, op: &F)
    where
        F: Fn(usize, usize) + Sync,
    {
        if len == 0 {
            return;
        }
        let pool = self.lock_pool();
        if len <= self.min_chunk || pool.shared.is_none() {
            drop(pool);
            op(0, len);
            return;
        }
        let op: &(dyn Fn(usize, usize) + Sync) = op;
        pool.run(Op::Apply(erase_apply(op)), len, self.min_chunk);
    }

    /// Sum of `op(start, end)` over disjoint ranges covering `[0, len)`.
    pub fn reduce_contiguous<F>(&self, len: usize, op: &F) -> f64
    where
        F: Fn(usize, usize) -> f64 + Sync,
    {
        if len == 0 {
            return 0.0;
        }
        let pool = self.lock_pool();
        if len <= self.min_chunk || pool.shared.is_none() {
            drop(pool);
            return op(0, len);
        }
        let op: &(dyn Fn(usize, usize) -> f64 + Sync) = op;
        pool.run(Op::Reduce(erase_reduce(op)), len, self.min_chunk)
    }

    /// Split `data` into `data.len() / unit` blocks of `unit` elements and hand each worker
    /// a mutable view of its block range: `op(first_block, blocks)`.
    pub fn execute_split_mut<F>(&self, data: &mut [f64], unit: usize, op: &F)
    where
        F: Fn(usize, &mut [f64]) + Sync,
    {
        debug_assert!(unit > 0 && data.len() % unit == 0);
        let count = data.len() / unit;
        let base = SyncPtr(data.as_mut_ptr());
        let body = |start: usize, end: usize| {
            // SAFETY: ranges handed out by the executor are disjoint and lie in [0, count).
            let blocks = unsafe {
                std::slice::from_raw_parts_mut(base.get().add(start * unit), (end - start) * unit)
            };
            op(start, blocks);
        };
        self.execute_contiguous(count, &body);
    }

    fn lock_pool(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ParallelExecutor {
    fn drop(&mut self) {
        self.pool
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .teardown();
    }
}

#[derive(Clone, Copy)]
struct SyncPtr(*mut f64);

impl SyncPtr {
    #[inline]
    fn get(self) -> *mut f64 {
        self.0
    }
}

// SAFETY: only used to derive disjoint sub-slices, see `execute_split_mut`.
unsafe impl Send for SyncPtr {}
unsafe impl Sync for SyncPtr {}

fn erase_apply<'a>(op: &'a (dyn Fn(usize, usize) + Sync + 'a)) -> *const ApplyFn {
    let ptr: *const (dyn Fn(usize, usize) + Sync + 'a) = op;
    // SAFETY: only the trait-object lifetime bound changes; see `Job`.
    unsafe { std::mem::transmute::<*const (dyn Fn(usize, usize) + Sync + 'a), *const ApplyFn>(ptr) }
}

fn erase_reduce<'a>(op: &'a (dyn Fn(usize, usize) -> f64 + Sync + 'a)) -> *const ReduceFn {
    let ptr: *const (dyn Fn(usize, usize) -> f64 + Sync + 'a) = op;
    // SAFETY: as in `erase_apply`.
    unsafe {
        std::mem::transmute::<*const (dyn Fn(usize, usize) -> f64 + Sync + 'a), *const ReduceFn>(
            ptr,
        )
    }
}

type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

fn spawn_named(id: usize, body: WorkerBody) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("pde-worker-{id}"))
        .spawn(body)
}

impl Pool {
    fn spawn(&mut self, threads: usize) {
        self.spawn_with(threads, spawn_named);
    }

    /// Workers wait on the start gate before touching the barrier, so a failed spawn can
    /// still release and join the ones already running.
    fn spawn_with<S>(&mut self, threads: usize, mut spawn_worker: S)
    where
        S: FnMut(usize, WorkerBody) -> std::io::Result<JoinHandle<()>>,
    {
        let shared = Arc::new(Shared {
            barrier: Barrier::new(threads + 1),
            job: Mutex::new(None),
            start: Mutex::new(None),
            start_cv: Condvar::new(),
            terminate: AtomicBool::new(false),
            panicked: AtomicBool::new(false),
            partials: (0..threads).map(|_| PaddedSum(AtomicU64::new(0))).collect(),
        });

        for id in 0..threads {
            let worker_shared = Arc::clone(&shared);
            let body: WorkerBody = Box::new(move || {
                if wait_for_start(&worker_shared) {
                    worker_loop(id, threads, &worker_shared);
                }
            });
            match spawn_worker(id, body) {
                Ok(handle) => self.workers.push(handle),
                Err(e) => {
                    log::error!("failed to spawn worker {id}: {e}; running sequentially");
                    open_start_gate(&shared, false);
                    for handle in self.workers.drain(..) {
                        join_with_timeout(handle, JOIN_TIMEOUT);
                    }
                    self.threads = 1;
                    return;
                }
            }
        }

        open_start_gate(&shared, true);
        self.threads = threads;
        self.shared = Some(shared);
    }

    fn run(&self, op: Op, len: usize, min_chunk: usize) -> f64 {
        let Some(shared) = self.shared.as_ref() else {
            return 0.0;
        };
        let threads = self.threads;
        let chunk = len.div_ceil(threads * 4).max(1).max(min_chunk);

        *shared.job.lock().unwrap_or_else(PoisonError::into_inner) = Some(Job { op, len, chunk });

        // dispatch
        shared.barrier.wait();
        // completion
        shared.barrier.wait();

        *shared.job.lock().unwrap_or_else(PoisonError::into_inner) = None;

        if shared.panicked.swap(false, Ordering::AcqRel) {
            panic!("parallel worker panicked while running a dispatched operation");
        }

        match op {
            Op::Apply(_) => 0.0,
            Op::Reduce(_) => shared
                .partials
                .iter()
                .map(|p| f64::from_bits(p.0.load(Ordering::Relaxed)))
                .sum(),
        }
    }

    fn teardown(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.terminate.store(true, Ordering::Release);
            // Workers are parked on the dispatch barrier; joining it releases them.
            shared.barrier.wait();
            for handle in self.workers.drain(..) {
                join_with_timeout(handle, JOIN_TIMEOUT);
            }
        }
        self.workers.clear();
        self.threads = 1;
    }
}

fn open_start_gate(shared: &Shared, go: bool) {
    *shared.start.lock().unwrap_or_else(PoisonError::into_inner) = Some(go);
    shared.start_cv.notify_all();
}

fn wait_for_start(shared: &Shared) -> bool {
    let mut gate = shared.start.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        if let Some(go) = *gate {
            return go;
        }
        gate = shared
            .start_cv
            .wait(gate)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

fn worker_loop(id: usize, threads: usize, shared: &Shared) {
    loop {
        shared.barrier.wait();
        if shared.terminate.load(Ordering::Acquire) {
            break;
        }

        let job = *shared.job.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(job) = job {
            match panic::catch_unwind(AssertUnwindSafe(|| run_chunks(id, threads, &job))) {
                Ok(sum) => shared.partials[id].0.store(sum.to_bits(), Ordering::Relaxed),
                Err(_) => {
                    shared.partials[id].0.store(0.0f64.to_bits(), Ordering::Relaxed);
                    shared.panicked.store(true, Ordering::Release);
                }
            }
        }

        shared.barrier.wait();
    }
}

fn run_chunks(id: usize, threads: usize, job: &Job) -> f64 {
    let stride = threads * job.chunk;
    let mut start = id * job.chunk;
    let mut sum = 0.0;
    while start < job.len {
        let end = (start + job.chunk).min(job.len);
        // SAFETY: see `Job`.
        match job.op {
            Op::Apply(f) => unsafe { (*f)(start, end) },
            Op::Reduce(f) => sum += unsafe { (*f)(start, end) },
        }
        start += stride;
    }
    sum
}

fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!(
                "worker {} did not exit within {:?}; detaching",
                handle.thread().name().unwrap_or("?"),
                timeout
            );
            return;
        }
        thread::yield_now();
    }
    let _ = handle.join();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn parallel_fill_covers_every_element() {
        let exec = ParallelExecutor::with_min_chunk(4, 8);
        let mut data = vec![0.0; 100];
        exec.execute_split_mut(&mut data, 1, &|start, block: &mut [f64]| {
            for (k, v) in block.iter_mut().enumerate() {
                *v = (start + k) as f64;
            }
        });
        for (k, v) in data.iter().enumerate() {
            assert_eq!(*v, k as f64);
        }
    }

    #[test]
    fn parallel_reduce_matches_serial_sum() {
        let exec = ParallelExecutor::with_min_chunk(4, 8);
        let data: Vec<f64> = (0..1000).map(|k| k as f64).collect();
        let s = exec.reduce_contiguous(data.len(), &|a, b| data[a..b].iter().sum());
        assert_eq!(s, 999.0 * 1000.0 / 2.0);
    }

    #[test]
    fn every_range_is_visited_exactly_once() {
        let exec = ParallelExecutor::with_min_chunk(3, 5);
        let hits: Vec<AtomicUsize> = (0..257).map(|_| AtomicUsize::new(0)).collect();
        exec.execute_contiguous(hits.len(), &|a, b| {
            for h in &hits[a..b] {
                h.fetch_add(1, Ordering::Relaxed);
            }
        });
        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn small_inputs_run_inline() {
        let exec = ParallelExecutor::new(4);
        let caller = thread::current().id();
        exec.execute_contiguous(16, &|_, _| {
            assert_eq!(thread::current().id(), caller);
        });
    }

    #[test]
    fn reinit_and_shutdown_keep_working() {
        let exec = ParallelExecutor::with_min_chunk(2, 4);
        assert_eq!(exec.threads(), 2);
        exec.init(3);
        assert_eq!(exec.threads(), 3);
        let s = exec.reduce_contiguous(64, &|a, b| (b - a) as f64);
        assert_eq!(s, 64.0);

        exec.shutdown();
        assert_eq!(exec.threads(), 1);
        let s = exec.reduce_contiguous(64, &|a, b| (b - a) as f64);
        assert_eq!(s, 64.0);
    }

    #[test]
    fn failed_spawn_releases_started_workers() {
        let exited = Arc::new(AtomicUsize::new(0));
        let mut pool = Pool {
            threads: 1,
            shared: None,
            workers: Vec::new(),
        };
        let counter = Arc::clone(&exited);
        pool.spawn_with(4, move |id, body| {
            if id == 2 {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "no threads left"));
            }
            let counter = Arc::clone(&counter);
            Ok(thread::spawn(move || {
                body();
                counter.fetch_add(1, Ordering::SeqCst);
            }))
        });

        assert_eq!(pool.threads, 1);
        assert!(pool.shared.is_none());
        assert!(pool.workers.is_empty());
        assert_eq!(exited.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[should_panic(expected = "parallel worker panicked")]
    fn worker_panic_reaches_the_caller() {
        let exec = ParallelExecutor::with_min_chunk(2, 4);
        exec.execute_contiguous(64, &|a, _| {
            if a == 0 {
                panic!("boom");
            }
        });
    }
}
