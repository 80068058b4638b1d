//! The hierarchical path-lock manager (§4.1), the core of this crate.
//!
//! [`FairRwLock`] is a write-preferring, FIFO-ish read/write lock built on
//! `parking_lot::{Mutex, Condvar}`, in the style of the VFS lock manager
//! this crate is descended from: a single mutex serializes every state
//! transition (no TOCTOU window between "check conflict" and "record
//! holder"), and a condvar wakes every waiter on release so they can
//! re-check. Unlike that manager this one hands back typed RAII guards
//! instead of opaque handles, and per-path locks are allocated lazily and
//! reclaimed eagerly in a concurrent map rather than living forever in a
//! flat table.
//!
//! [`PathLockManager`] layers the ancestor-chain algorithm and the two
//! independent lock maps (path-locks, data-locks) on top of `FairRwLock`.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::path::CanonPath;

// ---------------------------------------------------------------------
// FairRwLock
// ---------------------------------------------------------------------

#[derive(Debug, Default)]
struct RwState {
    readers: u32,
    writer: bool,
    waiting_writers: u32,
}

impl RwState {
    fn is_idle(&self) -> bool {
        self.readers == 0 && !self.writer && self.waiting_writers == 0
    }
}

/// A write-preferring read/write lock.
///
/// New readers are blocked whenever a writer is waiting, so a writer can
/// never be starved by a continuous stream of readers (§4.1 "Fairness",
/// testable property 5). This is not strict FIFO queueing across readers
/// and writers alike, but it is enough to guarantee the one thing the
/// spec's S2/S3 scenarios and the no-writer-starvation property need.
#[derive(Debug, Default)]
pub struct FairRwLock {
    state: Mutex<RwState>,
    cond: Condvar,
}

impl FairRwLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_read(&self) {
        let mut state = self.state.lock();
        while state.writer || state.waiting_writers > 0 {
            self.cond.wait(&mut state);
        }
        state.readers += 1;
    }

    pub fn unlock_read(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.readers > 0, "unlock_read on a lock with no readers");
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            self.cond.notify_all();
        }
    }

    pub fn lock_write(&self) {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            self.cond.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = true;
    }

    pub fn unlock_write(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.writer, "unlock_write on a lock with no writer");
        state.writer = false;
        self.cond.notify_all();
    }

    /// Non-blocking: true if the lock is currently idle (no holders, no
    /// queued waiters). Used for reclamation (§4.1 "Lock allocation and
    /// reclamation"), inspecting state under the same mutex that
    /// serializes lock/unlock is equivalent to the spec's "atomically
    /// acquire the write-side with a non-blocking try" since both are
    /// just exclusive access to the same state.
    fn is_idle(&self) -> bool {
        self.state.lock().is_idle()
    }
}

/// RAII guard kind recorded on the acquisition stack so release can
/// invoke the matching unlock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

/// A held path-lock, covering the target path and read-locks on every
/// ancestor. Dropping it releases leaf-to-root, the mirror of the
/// root-to-leaf acquisition order, and attempts reclamation at each step.
pub struct PathLockGuard<'m> {
    manager: &'m PathLockManager,
    // Root-to-leaf order; released back-to-front (leaf-to-root).
    stack: Vec<(String, Arc<FairRwLock>, Mode)>,
}

impl<'m> PathLockGuard<'m> {
    /// The path this guard locks (the leaf of the acquisition chain).
    pub fn path(&self) -> &str {
        &self.stack.last().expect("guard always holds at least the target path").0
    }
}

impl Drop for PathLockGuard<'_> {
    fn drop(&mut self) {
        while let Some((key, lock, mode)) = self.stack.pop() {
            match mode {
                Mode::Read => lock.unlock_read(),
                Mode::Write => lock.unlock_write(),
            }
            drop(lock);
            self.manager.reclaim_path_lock(&key);
        }
    }
}

/// A held data-lock on a single path (§3: "A data-lock is only acquired
/// while the caller holds a path-lock on the same path", enforced here
/// by requiring a live [`PathLockGuard`] reference as proof).
pub struct DataLockGuard<'m> {
    manager: &'m PathLockManager,
    key: String,
    lock: Option<Arc<FairRwLock>>,
    mode: Mode,
}

impl Drop for DataLockGuard<'_> {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            match self.mode {
                Mode::Read => lock.unlock_read(),
                Mode::Write => lock.unlock_write(),
            }
            drop(lock);
            self.manager.reclaim_data_lock(&self.key);
        }
    }
}

// ---------------------------------------------------------------------
// PathLockManager
// ---------------------------------------------------------------------

/// Concurrent map from canonical path to fair read/write lock, with two
/// independent maps (§3): name-space relationships (`path_locks`) and
/// byte-content (`data_locks`).
#[derive(Debug, Default)]
pub struct PathLockManager {
    path_locks: DashMap<String, Arc<FairRwLock>>,
    data_locks: DashMap<String, Arc<FairRwLock>>,
}

impl PathLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn path_lock_for(&self, key: &str) -> Arc<FairRwLock> {
        self.path_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(FairRwLock::new()))
            .clone()
    }

    fn data_lock_for(&self, key: &str) -> Arc<FairRwLock> {
        self.data_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(FairRwLock::new()))
            .clone()
    }

    /// Atomically remove the map entry for `key` if it is provably idle:
    /// no other `Arc` clone is outstanding (so no thread is mid-acquire
    /// or still holding it) and the lock itself reports no holders or
    /// waiters. Both conditions are checked under the map shard's own
    /// lock via `remove_if`, closing the race window called out in §9
    /// ("Reclamation race").
    fn reclaim_path_lock(&self, key: &str) {
        self.path_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1 && lock.is_idle());
    }

    fn reclaim_data_lock(&self, key: &str) {
        self.data_locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1 && lock.is_idle());
    }

    fn acquire_path(&self, path: &CanonPath, mode: Mode) -> PathLockGuard<'_> {
        let mut stack = Vec::with_capacity(path.components().len() + 1);
        // Root-to-leaf: every proper ancestor gets a read-lock first.
        for ancestor in path.ancestors() {
            let key = ancestor.key();
            let lock = self.path_lock_for(&key);
            lock.lock_read();
            stack.push((key, lock, Mode::Read));
        }
        let key = path.key();
        let lock = self.path_lock_for(&key);
        match mode {
            Mode::Read => lock.lock_read(),
            Mode::Write => lock.lock_write(),
        }
        stack.push((key, lock, mode));
        PathLockGuard { manager: self, stack }
    }

    /// `lockPathForReading(P)` (§4.1).
    pub fn lock_path_for_reading(&self, path: &CanonPath) -> PathLockGuard<'_> {
        self.acquire_path(path, Mode::Read)
    }

    /// `lockPathForWriting(P)` (§4.1).
    pub fn lock_path_for_writing(&self, path: &CanonPath) -> PathLockGuard<'_> {
        self.acquire_path(path, Mode::Write)
    }

    /// Lock `child` given a guard already holding its parent (§4.2 "write
    /// on parent, then read on target").
    ///
    /// `acquire_path` would otherwise re-walk `child`'s full ancestor
    /// chain, re-locking `parent` from the same thread, a guaranteed
    /// self-deadlock since `FairRwLock` is not reentrant. Every ancestor
    /// of `child` up to and including `parent` is provably already held
    /// by `parent_guard`, so this locks only `child` itself and appends it
    /// to the same guard's release stack, extending the existing
    /// acquisition rather than starting a new one.
    fn lock_child(&self, parent_guard: &mut PathLockGuard<'_>, child: &CanonPath, mode: Mode) {
        debug_assert_eq!(
            child.parent().as_ref().map(CanonPath::key).as_deref(),
            Some(parent_guard.path()),
            "lock_child requires a guard holding child's immediate parent"
        );
        let key = child.key();
        let lock = self.path_lock_for(&key);
        match mode {
            Mode::Read => lock.lock_read(),
            Mode::Write => lock.lock_write(),
        }
        parent_guard.stack.push((key, lock, mode));
    }

    /// Read-lock `child` given a guard already holding its immediate
    /// parent, the mode §4.2's table specifies for
    /// create/mkdir/unlink/rmdir's target once the parent is write-locked.
    pub fn lock_child_for_reading(&self, parent_guard: &mut PathLockGuard<'_>, child: &CanonPath) {
        self.lock_child(parent_guard, child, Mode::Read);
    }

    /// `lockDataForReading(P)` (§4.1). `held` proves the caller already
    /// holds a path-lock on the same path.
    pub fn lock_data_for_reading<'m>(&'m self, held: &PathLockGuard<'m>) -> DataLockGuard<'m> {
        let key = held.path().to_string();
        let lock = self.data_lock_for(&key);
        lock.lock_read();
        DataLockGuard { manager: self, key, lock: Some(lock), mode: Mode::Read }
    }

    /// `lockDataForWriting(P)` (§4.1).
    pub fn lock_data_for_writing<'m>(&'m self, held: &PathLockGuard<'m>) -> DataLockGuard<'m> {
        let key = held.path().to_string();
        let lock = self.data_lock_for(&key);
        lock.lock_write();
        DataLockGuard { manager: self, key, lock: Some(lock), mode: Mode::Write }
    }

    /// Acquire write locks on two distinct paths in the total order
    /// required for rename (§4.2, §5): lexicographic component-sequence
    /// order across all threads, so any two concurrent renames agree on
    /// which path to lock first.
    pub fn lock_two_paths_for_writing<'m>(
        &'m self,
        a: &CanonPath,
        b: &CanonPath,
    ) -> (PathLockGuard<'m>, PathLockGuard<'m>) {
        if a <= b {
            let first = self.lock_path_for_writing(a);
            let second = self.lock_path_for_writing(b);
            (first, second)
        } else {
            let second = self.lock_path_for_writing(b);
            let first = self.lock_path_for_writing(a);
            (first, second)
        }
    }

    /// Testable property 4 support: true if `path` currently has a live
    /// entry in the path-lock map (held or waited-on).
    pub fn is_path_locked(&self, path: &CanonPath) -> bool {
        self.path_locks.contains_key(&path.key())
    }

    /// Number of live entries across both maps, used by reclamation
    /// tests to assert the map returns to its pre-test size after
    /// quiescing.
    pub fn live_lock_count(&self) -> usize {
        self.path_locks.len() + self.data_locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::time::{Duration, Instant};

    fn p(s: &str) -> CanonPath {
        CanonPath::parse(s)
    }

    #[test]
    fn ancestor_read_locks_are_held_while_path_is_locked() {
        let mgr = PathLockManager::new();
        let _guard = mgr.lock_path_for_reading(&p("/a/b"));
        assert!(mgr.is_path_locked(&p("/a")));
        assert!(mgr.is_path_locked(&p("/")));
        assert!(mgr.is_path_locked(&p("/a/b")));
    }

    #[test]
    fn reclamation_returns_map_to_empty_after_release() {
        let mgr = PathLockManager::new();
        {
            let _guard = mgr.lock_path_for_reading(&p("/a/b/c"));
        }
        assert!(!mgr.is_path_locked(&p("/a/b/c")));
        assert_eq!(mgr.live_lock_count(), 0);
    }

    #[test]
    fn lock_child_for_reading_extends_an_already_held_parent_guard() {
        let mgr = PathLockManager::new();
        let mut guard = mgr.lock_path_for_writing(&p("/a"));
        mgr.lock_child_for_reading(&mut guard, &p("/a/b"));
        assert_eq!(guard.path(), "/a/b");
        assert!(mgr.is_path_locked(&p("/a/b")));
        assert!(mgr.is_path_locked(&p("/a")));
    }

    #[test]
    fn lock_child_for_reading_never_re_locks_the_held_parent() {
        // Regression for the self-deadlock this primitive exists to avoid:
        // acquiring a write-lock on the parent and then reading the child
        // through `lock_child_for_reading` must complete without ever
        // walking back up to `parent` through `acquire_path`.
        let mgr = Arc::new(PathLockManager::new());
        let (tx, rx) = std::sync::mpsc::channel();
        let mgr2 = mgr.clone();
        std::thread::spawn(move || {
            let mut guard = mgr2.lock_path_for_writing(&p("/a"));
            mgr2.lock_child_for_reading(&mut guard, &p("/a/b"));
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(2))
            .expect("lock_child_for_reading must not deadlock against its own parent guard");
    }

    #[test]
    fn data_lock_requires_a_held_path_guard() {
        let mgr = PathLockManager::new();
        let guard = mgr.lock_path_for_reading(&p("/a"));
        let _data = mgr.lock_data_for_writing(&guard);
        // Compiles only because `_data` borrows from `guard`'s lifetime;
        // this is the compile-time half of the "path currently
        // path-locked by this thread" precondition.
    }

    // S1: concurrent reads on disjoint paths never block each other.
    #[test]
    fn s1_concurrent_reads_on_disjoint_paths_do_not_block() {
        let mgr = Arc::new(PathLockManager::new());
        let barrier = Arc::new(Barrier::new(2));

        let mgr_a = mgr.clone();
        let barrier_a = barrier.clone();
        let a = std::thread::spawn(move || {
            barrier_a.wait();
            let start = Instant::now();
            let _g = mgr_a.lock_path_for_reading(&p("/a/b"));
            std::thread::sleep(Duration::from_millis(50));
            start.elapsed()
        });

        let mgr_b = mgr.clone();
        let barrier_b = barrier.clone();
        let b = std::thread::spawn(move || {
            barrier_b.wait();
            let start = Instant::now();
            let _g = mgr_b.lock_path_for_reading(&p("/x/y"));
            std::thread::sleep(Duration::from_millis(50));
            start.elapsed()
        });

        let ea = a.join().unwrap();
        let eb = b.join().unwrap();
        // Neither thread should have waited meaningfully on the other;
        // both should finish close to the 50ms hold time, not 100ms.
        assert!(ea < Duration::from_millis(90));
        assert!(eb < Duration::from_millis(90));
    }

    // S2: a writer on P blocks until a reader on P releases.
    #[test]
    fn s2_read_write_exclusion_on_same_path() {
        let mgr = Arc::new(PathLockManager::new());
        let reader_ready = Arc::new(Barrier::new(2));
        let writer_done = Arc::new(AtomicBool::new(false));

        let mgr_r = mgr.clone();
        let ready_r = reader_ready.clone();
        let reader = std::thread::spawn(move || {
            let _g = mgr_r.lock_path_for_reading(&p("/a/b"));
            ready_r.wait();
            std::thread::sleep(Duration::from_millis(80));
        });

        reader_ready.wait();
        let mgr_w = mgr.clone();
        let done_w = writer_done.clone();
        let writer = std::thread::spawn(move || {
            let _g = mgr_w.lock_path_for_writing(&p("/a/b"));
            done_w.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(20));
        assert!(!writer_done.load(Ordering::SeqCst), "writer must block while reader holds the lock");

        reader.join().unwrap();
        writer.join().unwrap();
        assert!(writer_done.load(Ordering::SeqCst));
    }

    // S3: a writer on a parent excludes a reader on a child.
    #[test]
    fn s3_parent_write_excludes_child_read() {
        let mgr = Arc::new(PathLockManager::new());
        let writer_ready = Arc::new(Barrier::new(2));
        let reader_done = Arc::new(AtomicBool::new(false));

        let mgr_w = mgr.clone();
        let ready_w = writer_ready.clone();
        let writer = std::thread::spawn(move || {
            let _g = mgr_w.lock_path_for_writing(&p("/a"));
            ready_w.wait();
            std::thread::sleep(Duration::from_millis(80));
        });

        writer_ready.wait();
        let mgr_r = mgr.clone();
        let done_r = reader_done.clone();
        let reader = std::thread::spawn(move || {
            let _g = mgr_r.lock_path_for_reading(&p("/a/b"));
            done_r.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(20));
        assert!(!reader_done.load(Ordering::SeqCst), "child read must block while parent is write-locked");

        writer.join().unwrap();
        reader.join().unwrap();
        assert!(reader_done.load(Ordering::SeqCst));
    }

    // S4: two threads renaming in opposite directions never deadlock, and
    // exactly one completes first (the other blocks, then completes).
    #[test]
    fn s4_rename_deadlock_freedom() {
        let mgr = Arc::new(PathLockManager::new());
        let completions = Arc::new(AtomicUsize::new(0));

        let mgr_a = mgr.clone();
        let completions_a = completions.clone();
        let a = std::thread::spawn(move || {
            let (_g1, _g2) = mgr_a.lock_two_paths_for_writing(&p("/a/x"), &p("/b/y"));
            completions_a.fetch_add(1, Ordering::SeqCst);
        });

        let mgr_b = mgr.clone();
        let completions_b = completions.clone();
        let b = std::thread::spawn(move || {
            let (_g1, _g2) = mgr_b.lock_two_paths_for_writing(&p("/b/y"), &p("/a/x"));
            completions_b.fetch_add(1, Ordering::SeqCst);
        });

        a.join().unwrap();
        b.join().unwrap();
        assert_eq!(completions.load(Ordering::SeqCst), 2, "both renames must eventually complete");
    }

    // S5: reclamation after quiescing.
    #[test]
    fn s5_reclamation_after_quiescing() {
        let mgr = PathLockManager::new();
        let before = mgr.live_lock_count();
        {
            let _g = mgr.lock_path_for_reading(&p("/a/b/c"));
            assert!(mgr.is_path_locked(&p("/a/b/c")));
        }
        assert!(!mgr.is_path_locked(&p("/a/b/c")));
        assert_eq!(mgr.live_lock_count(), before);
    }

    // Property 5 / design-notes fairness: a writer waiting on P is not
    // overtaken by a reader that arrives after it started waiting.
    #[test]
    fn writer_is_not_starved_by_late_arriving_readers() {
        let mgr = Arc::new(PathLockManager::new());
        let first_reader_ready = Arc::new(Barrier::new(2));
        let writer_waiting = Arc::new(AtomicBool::new(false));
        let writer_done = Arc::new(AtomicBool::new(false));

        let mgr1 = mgr.clone();
        let ready1 = first_reader_ready.clone();
        let r1 = std::thread::spawn(move || {
            let _g = mgr1.lock_path_for_reading(&p("/a"));
            ready1.wait();
            std::thread::sleep(Duration::from_millis(60));
        });

        first_reader_ready.wait();

        let mgr_w = mgr.clone();
        let waiting_w = writer_waiting.clone();
        let done_w = writer_done.clone();
        let writer = std::thread::spawn(move || {
            waiting_w.store(true, Ordering::SeqCst);
            let _g = mgr_w.lock_path_for_writing(&p("/a"));
            done_w.store(true, Ordering::SeqCst);
        });

        while !writer_waiting.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
        std::thread::sleep(Duration::from_millis(10));

        // A reader arriving after the writer is queued must not jump
        // ahead of it.
        let mgr2 = mgr.clone();
        let done_w2 = writer_done.clone();
        let late_reader = std::thread::spawn(move || {
            let _g = mgr2.lock_path_for_reading(&p("/a"));
            assert!(done_w2.load(Ordering::SeqCst), "late reader must not overtake the waiting writer");
        });

        r1.join().unwrap();
        writer.join().unwrap();
        late_reader.join().unwrap();
        assert!(writer_done.load(Ordering::SeqCst));
    }
}
