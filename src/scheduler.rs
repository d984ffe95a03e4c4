//! The two-phase scheduler: `batch`, `atomic`/`transaction`, and `flush`.
//!
//! Grounded on `sycamore-reactive3::scope::Root::propagate_updates`, but the
//! propagation strategy itself is a deliberate departure (see `DESIGN.md`):
//! the teacher recomputes eagerly in topological order as part of a single
//! DFS: this spec instead wants the pull-based staleness cascade of §4.3
//! stabilised by an explicit two-phase `flush` (§4.5), so `Computed` stays
//! lazy between ticks and only `flush` forces the derived layer to
//! stability before effects run.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

use crate::error::KernelError;
use crate::node::{NodeId, NodeKind};
use crate::root::Root;

/// Safety valve matching spec §4.5: more than this many drain iterations in
/// one `flush` raises `InfiniteUpdateLoop` without clearing the queues, so a
/// debugger can inspect what kept re-scheduling.
const MAX_FLUSH_ITERATIONS: u32 = 10_000;

impl Root {
    /// `scheduleJob`: drops the job if disposed or muted, otherwise queues it
    /// by kind and arms a flush if nothing is currently batching.
    ///
    /// There is no real microtask queue to hook into outside a browser-like
    /// event loop, so "arming a flush" here means running it synchronously
    /// once the outermost `batch`/`atomic` frame closes (see `DESIGN.md`,
    /// open question 1 in spec §9 assumes this is fine since all contention
    /// is single-threaded anyway).
    pub(crate) fn schedule_job(&self, id: NodeId, kind: NodeKind) {
        if self.muted.get() > 0 {
            return;
        }
        let disposed = {
            let nodes = self.nodes.borrow();
            match nodes.get(id) {
                None => return,
                Some(n) => match kind {
                    NodeKind::Effect => n.as_effect().map(|e| e.disposed.get()).unwrap_or(true),
                    NodeKind::Computed => false,
                    NodeKind::Signal => return,
                },
            }
        };
        if disposed {
            return;
        }
        match kind {
            NodeKind::Computed => {
                let nodes = self.nodes.borrow();
                if let Some(c) = nodes.get(id).and_then(|n| n.as_computed()) {
                    if c.queued.get() {
                        return;
                    }
                    c.queued.set(true);
                }
                drop(nodes);
                self.compute_queue.borrow_mut().push(id);
            }
            NodeKind::Effect => {
                let nodes = self.nodes.borrow();
                if let Some(e) = nodes.get(id).and_then(|n| n.as_effect()) {
                    if e.queued.get() {
                        return;
                    }
                    e.queued.set(true);
                }
                drop(nodes);
                self.effect_queue.borrow_mut().push(id);
            }
            NodeKind::Signal => {}
        }
        if !self.scheduled.get() && self.batch_depth.get() == 0 {
            self.scheduled.set(true);
            // No reentrant flush: if we are already mid-flush (a job
            // scheduled while running an effect/recompute), the outer flush
            // loop will simply pick this job up on its next iteration.
            if !self.flushing.get() {
                self.flush().unwrap_or_else(|e| panic!("{e}"));
            }
        }
    }

    /// Runs the two-phase flush to completion: Phase A drains `compute_queue`
    /// to stability, Phase B runs one priority-sorted wave of `effect_queue`,
    /// and the outer loop repeats until both queues are empty.
    pub(crate) fn flush(&self) -> Result<(), KernelError> {
        self.scheduled.set(false);
        if self.flushing.get() {
            // Reentered from inside a running effect/compute; the active
            // flush call will drain whatever we just queued.
            return Ok(());
        }
        self.flushing.set(true);
        let result = self.flush_inner();
        self.flushing.set(false);
        result
    }

    fn flush_inner(&self) -> Result<(), KernelError> {
        let mut iterations: u32 = 0;
        while !self.compute_queue.borrow().is_empty() || !self.effect_queue.borrow().is_empty() {
            iterations += 1;
            if iterations > MAX_FLUSH_ITERATIONS {
                #[cfg(feature = "trace")]
                tracing::debug!("flush: exceeded iteration budget, queues left intact");
                return Err(KernelError::InfiniteUpdateLoop);
            }

            // Phase A: drain compute_queue to stability. Additional jobs
            // scheduled while draining are picked up by the `while` below
            // before we move on to Phase B.
            while !self.compute_queue.borrow().is_empty() {
                let batch: Vec<NodeId> = self.compute_queue.borrow_mut().drain(..).collect();
                for id in batch {
                    let nodes = self.nodes.borrow();
                    let Some(c) = nodes.get(id).and_then(|n| n.as_computed()) else {
                        continue;
                    };
                    c.queued.set(false);
                    drop(nodes);
                    // Forcing recomputation here is just "pull it now"; the
                    // lazy path (`Computed::get`) is identical.
                    crate::computed::force_recompute(self, id)?;
                }
            }

            // Phase B: one priority-sorted wave of effects.
            if !self.effect_queue.borrow().is_empty() {
                let mut batch: Vec<NodeId> = self.effect_queue.borrow_mut().drain(..).collect();
                let nodes = self.nodes.borrow();
                let priority_of = |id: &NodeId| -> i32 {
                    nodes
                        .get(*id)
                        .and_then(|n| n.as_effect())
                        .map(|e| e.priority.get())
                        .unwrap_or(0)
                };
                // Stable sort preserves insertion order for ties.
                batch.sort_by_key(priority_of);
                drop(nodes);
                for id in batch {
                    let nodes = self.nodes.borrow();
                    let Some(e) = nodes.get(id).and_then(|n| n.as_effect()) else {
                        continue;
                    };
                    e.queued.set(false);
                    drop(nodes);
                    crate::effect::run_effect(self, id);
                }
            }
        }
        Ok(())
    }

    /// `flushSync`: if anything is pending, run `flush` immediately. Exists
    /// for tests and synchronous embedding.
    pub fn flush_sync(&self) -> Result<(), KernelError> {
        if !self.compute_queue.borrow().is_empty() || !self.effect_queue.borrow().is_empty() {
            self.flush()
        } else {
            Ok(())
        }
    }

    /// `batch(f)`: reentrant via `batch_depth`. Runs `f`, and flushes
    /// synchronously once the outermost frame closes. A panic inside `f`
    /// propagates after the depth is decremented; the flush that would have
    /// followed a normal return is skipped since the batched state may be
    /// inconsistent.
    pub(crate) fn batch<T>(&self, f: impl FnOnce() -> T) -> T {
        self.batch_depth.set(self.batch_depth.get() + 1);
        let result = catch_unwind(AssertUnwindSafe(f));
        let depth = self.batch_depth.get() - 1;
        self.batch_depth.set(depth);
        match result {
            Ok(value) => {
                if depth == 0 {
                    self.flush().unwrap_or_else(|e| panic!("{e}"));
                }
                value
            }
            Err(payload) => resume_unwind(payload),
        }
    }

    /// `atomic`/`transaction`: pushes a fresh write log, runs `f`, and
    /// commits on normal return or rolls back on panic.
    pub(crate) fn atomic<T>(&self, f: impl FnOnce() -> T) -> T {
        self.batch_depth.set(self.batch_depth.get() + 1);
        self.atomic_depth.set(self.atomic_depth.get() + 1);
        self.atomic_logs.borrow_mut().push(HashMap::new());

        let result = catch_unwind(AssertUnwindSafe(f));
        match result {
            Ok(value) => {
                self.commit_atomic();
                value
            }
            Err(payload) => {
                self.rollback_atomic();
                resume_unwind(payload);
            }
        }
    }

    fn commit_atomic(&self) {
        let log = self.atomic_logs.borrow_mut().pop().unwrap_or_default();
        self.atomic_depth.set(self.atomic_depth.get() - 1);
        if let Some(parent) = self.atomic_logs.borrow_mut().last_mut() {
            // Outer wins: only merge entries the parent doesn't already have.
            for (node, prev) in log {
                parent.entry(node).or_insert(prev);
            }
        }
        let depth = self.batch_depth.get() - 1;
        self.batch_depth.set(depth);
        if depth == 0 {
            self.flush().unwrap_or_else(|e| panic!("{e}"));
        }
    }

    fn rollback_atomic(&self) {
        let log = self.atomic_logs.borrow_mut().pop().unwrap_or_default();
        self.atomic_depth.set(self.atomic_depth.get() - 1);
        self.muted.set(self.muted.get() + 1);
        for (node, prev) in log {
            self.restore_signal_value(node, prev);
        }
        self.compute_queue.borrow_mut().clear();
        self.effect_queue.borrow_mut().clear();
        self.scheduled.set(false);
        self.muted.set(self.muted.get() - 1);
        self.batch_depth.set(self.batch_depth.get() - 1);
    }

    fn restore_signal_value(&self, node: NodeId, prev: Box<dyn Any>) {
        let nodes = self.nodes.borrow();
        let Some(n) = nodes.get(node) else { return };
        let Some(sig) = n.as_signal() else { return };
        *sig.value.borrow_mut() = prev;
        let subs = n.subs.borrow().clone();
        drop(nodes);
        for sub in subs {
            crate::computed::mark_stale_for_rollback(self, sub);
        }
    }

    /// Records the pre-write value of `node` in the innermost atomic log, the
    /// first time it is written to within that frame. No-op outside an
    /// atomic section.
    pub(crate) fn record_atomic_write(&self, node: NodeId, prev: Box<dyn Any>) {
        if self.atomic_depth.get() == 0 {
            return;
        }
        let mut logs = self.atomic_logs.borrow_mut();
        if let Some(innermost) = logs.last_mut() {
            innermost.entry(node).or_insert(prev);
        }
    }
}
