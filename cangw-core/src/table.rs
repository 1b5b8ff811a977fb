//! The job table: the gateway's single piece of genuinely shared state.
//!
//! Dispatch (the hot path, invoked from delivery-subsystem callback threads)
//! only ever needs a consistent snapshot of "jobs active right now" and never
//! blocks on a writer. Control-plane operations (create/delete) are
//! comparatively rare and may take a lock.
//!
//! Reads: `ArcSwap<Vec<Arc<JobRecord>>>::load()`, wait-free.
//! Writes: serialized behind a `parking_lot::Mutex` guarding the rebuild of
//! that vector; the old vector is swapped out and kept on a retired list
//! until nothing outside the table still references it, mirroring the
//! memory-reclamation role an epoch or hazard-pointer scheme would play, but
//! built from ordinary `Arc` strong counts instead of unsafe pointer
//! bookkeeping.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::job::JobRecord;

type Jobs = Vec<Arc<JobRecord>>;

pub struct JobTable {
    active: ArcSwap<Jobs>,
    /// Serializes writers; the `Jobs` it wraps is the list of formerly-active
    /// snapshots waiting for their last reader to drop.
    writer: Mutex<Retired>,
}

#[derive(Default)]
struct Retired {
    generations: Vec<Arc<Jobs>>,
}

impl Default for JobTable {
    fn default() -> Self {
        JobTable::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        JobTable {
            active: ArcSwap::from_pointee(Vec::new()),
            writer: Mutex::new(Retired::default()),
        }
    }

    /// Wait-free read path: a cheap `Arc` clone of the current snapshot.
    /// Uses `load_full` rather than `load` so the returned `Arc`'s strong
    /// count is a real, unambiguous reference the retirement barrier can
    /// count on — `load`'s guard defers its refcount update and would make
    /// `barrier` racy.
    pub fn snapshot(&self) -> Arc<Jobs> {
        self.active.load_full()
    }

    pub fn len(&self) -> usize {
        self.active.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&self, job: Arc<JobRecord>) {
        let mut writer = self.writer.lock();
        let current = self.active.load();
        let mut next: Jobs = Vec::with_capacity(current.len() + 1);
        next.extend(current.iter().cloned());
        next.push(job);
        self.swap_in(&mut writer, next);
    }

    /// Remove the first job whose id matches (spec semantics: delete by
    /// installed-rule identity). Returns the removed record so the caller
    /// can unregister it from the delivery subsystem.
    pub fn remove(&self, job_id: u64) -> Option<Arc<JobRecord>> {
        let mut writer = self.writer.lock();
        let current = self.active.load();
        let pos = current.iter().position(|j| j.id == job_id)?;
        let removed = current[pos].clone();
        let mut next: Jobs = Vec::with_capacity(current.len() - 1);
        next.extend(current.iter().enumerate().filter(|(i, _)| *i != pos).map(|(_, j)| j.clone()));
        self.swap_in(&mut writer, next);
        Some(removed)
    }

    /// Remove the first job for which `predicate` returns true, same
    /// first-match-only semantics as `remove`. Backs the control plane's
    /// byte-equality delete (`(flags, mod, match_key)`), where the caller
    /// builds `predicate` from its template rather than an id.
    pub fn remove_first_match(&self, predicate: impl Fn(&JobRecord) -> bool) -> Option<Arc<JobRecord>> {
        let mut writer = self.writer.lock();
        let current = self.active.load();
        let pos = current.iter().position(|j| predicate(j))?;
        let removed = current[pos].clone();
        let mut next: Jobs = Vec::with_capacity(current.len() - 1);
        next.extend(current.iter().enumerate().filter(|(i, _)| *i != pos).map(|(_, j)| j.clone()));
        self.swap_in(&mut writer, next);
        Some(removed)
    }

    /// Empty the table, returning every job that was in it so the caller can
    /// unregister each from the delivery subsystem. Idempotent: calling this
    /// again on an already-empty table returns an empty vec and leaves the
    /// table unchanged.
    pub fn remove_all(&self) -> Vec<Arc<JobRecord>> {
        let mut writer = self.writer.lock();
        let current = self.active.load();
        if current.is_empty() {
            return Vec::new();
        }
        let removed: Jobs = current.iter().cloned().collect();
        self.swap_in(&mut writer, Vec::new());
        removed
    }

    /// Remove every job whose source *or* destination device is
    /// `device_index`, returning them so the caller can unregister each
    /// from the delivery subsystem. Used when a device is unplugged: a job
    /// referencing the device either way holds a reference that must be
    /// released before its refcount is expected to drop to zero.
    pub fn remove_by_device(&self, device_index: u32) -> Vec<Arc<JobRecord>> {
        let mut writer = self.writer.lock();
        let current = self.active.load();
        let (removed, kept): (Jobs, Jobs) = current.iter().cloned().partition(|j| {
            j.match_key.src_index == device_index || j.dst_index == device_index
        });
        if removed.is_empty() {
            return Vec::new();
        }
        self.swap_in(&mut writer, kept);
        removed
    }

    fn swap_in(&self, writer: &mut Retired, next: Jobs) {
        let previous = self.active.swap(Arc::new(next));
        writer.generations.push(previous);
        writer.generations.retain(|g| Arc::strong_count(g) > 1);
    }

    /// Block until every snapshot retired before this call has no readers
    /// left outstanding. A control-plane operation (e.g. delete) calls this
    /// after swapping a job out, before returning "deleted" to its caller,
    /// so a concurrent dispatch already holding the old snapshot finishes
    /// before the job's backing resources (device, registration) are torn
    /// down. Bounded by `timeout`; returns whether the barrier was clean.
    pub fn barrier(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let writer = self.writer.lock();
                if writer.generations.iter().all(|g| Arc::strong_count(g) <= 1) {
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::yield_now();
        }
    }
}
