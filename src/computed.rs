//! Lazy, memoised derivations.
//!
//! Grounded on `sycamore-reactive3::memos::create_memo`, but pull-based
//! instead of the teacher's eager push model (see `DESIGN.md`): a computed
//! only actually re-runs its closure when something calls `get`/`peek` while
//! it is `stale`, or when the scheduler's Phase A forces it to stability
//! ahead of the next effect wave.

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;

use crate::error::KernelError;
use crate::node::{ComputedData, Node, NodeId, NodeKind};
use crate::root::Root;

/// A lazily memoised derivation. Created with [`crate::computed`] or
/// [`crate::computed_with_eq`].
pub struct Computed<T: 'static> {
    pub(crate) id: NodeId,
    _marker: PhantomData<T>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Computed<T> {}

pub(crate) fn default_equals<T: PartialEq + 'static>() -> crate::node::EqFn {
    Box::new(|a: &dyn Any, b: &dyn Any| {
        let a = a.downcast_ref::<T>().expect("computed value type mismatch");
        let b = b.downcast_ref::<T>().expect("computed value type mismatch");
        a == b
    })
}

/// Creates a new [`Computed`] backed by `f`, using `T`'s [`PartialEq`] to
/// gate propagation when the recomputed value is unchanged.
pub fn computed<T, F>(f: F) -> Computed<T>
where
    T: PartialEq + 'static,
    F: FnMut() -> T + 'static,
{
    computed_with_eq(f, PartialEq::eq)
}

/// Like [`computed`], but with a caller-supplied equality comparator instead
/// of `T: PartialEq`. Mirrors the teacher's `create_selector_with`.
pub fn computed_with_eq<T, F, E>(mut f: F, eq: E) -> Computed<T>
where
    T: 'static,
    F: FnMut() -> T + 'static,
    E: Fn(&T, &T) -> bool + 'static,
{
    let equals: crate::node::EqFn = Box::new(move |a, b| {
        eq(
            a.downcast_ref::<T>().expect("computed value type mismatch"),
            b.downcast_ref::<T>().expect("computed value type mismatch"),
        )
    });
    let compute: RefCell<Box<dyn FnMut() -> Box<dyn Any>>> =
        RefCell::new(Box::new(move || Box::new(f()) as Box<dyn Any>));
    let id = Root::with(|root| {
        let data = ComputedData {
            value: RefCell::new(None),
            compute,
            equals,
            stale: std::cell::Cell::new(true),
            has_value: std::cell::Cell::new(false),
            computing: std::cell::Cell::new(false),
            queued: std::cell::Cell::new(false),
        };
        root.nodes.borrow_mut().insert(Node::computed(data))
    });
    Computed {
        id,
        _marker: PhantomData,
    }
}

impl<T: Clone + 'static> Computed<T> {
    /// Registers a dependency on the active observer, then returns the
    /// cached value, recomputing first if stale (spec §4.3).
    pub fn get(self) -> T {
        self.try_get()
            .unwrap_or_else(|e| panic!("{e}"))
    }

    /// Like [`Computed::get`], but surfaces `CycleDetected` instead of
    /// panicking.
    pub fn try_get(self) -> Result<T, KernelError> {
        Root::with(|root| {
            root.track(self.id);
            force_recompute(root, self.id)?;
            let nodes = root.nodes.borrow();
            let data = nodes
                .get(self.id)
                .and_then(|n| n.as_computed())
                .ok_or(KernelError::Disposed)?;
            let value = data.value.borrow();
            Ok(value
                .as_ref()
                .expect("computed has no value after recompute")
                .downcast_ref::<T>()
                .expect("computed value type mismatch")
                .clone())
        })
    }

    /// Returns the cached value without registering a dependency. Still
    /// recomputes if stale.
    pub fn peek(self) -> T {
        Root::with(|root| {
            force_recompute(root, self.id).unwrap_or_else(|e| panic!("{e}"));
            let nodes = root.nodes.borrow();
            let data = nodes
                .get(self.id)
                .and_then(|n| n.as_computed())
                .expect("computed is disposed");
            data.value
                .borrow()
                .as_ref()
                .expect("computed has no value after recompute")
                .downcast_ref::<T>()
                .expect("computed value type mismatch")
                .clone()
        })
    }

    /// Detaches all incident edges and clears the cached value. Subsequent
    /// `get`/`peek` calls re-evaluate as if new.
    pub fn dispose(self) {
        Root::with(|root| {
            root.detach_all(self.id);
            if let Some(c) = root.nodes.borrow().get(self.id).and_then(|n| n.as_computed()) {
                c.value.borrow_mut().take();
                c.has_value.set(false);
                c.stale.set(true);
            }
        });
    }
}

/// Forces `id` (which must be a computed) to be up to date: recomputes if
/// `stale || !has_value`, otherwise is a no-op. Shared by the lazy `get` path
/// and the scheduler's Phase A.
pub(crate) fn force_recompute(root: &Root, id: NodeId) -> Result<(), KernelError> {
    let needs_recompute = {
        let nodes = root.nodes.borrow();
        match nodes.get(id).and_then(|n| n.as_computed()) {
            Some(c) => c.stale.get() || !c.has_value.get(),
            None => return Ok(()),
        }
    };
    if !needs_recompute {
        return Ok(());
    }

    {
        let nodes = root.nodes.borrow();
        let c = nodes.get(id).and_then(|n| n.as_computed()).unwrap();
        if c.computing.get() {
            return Err(KernelError::CycleDetected);
        }
        c.computing.set(true);
    }

    root.detach_deps(id);

    // If `compute()` unwinds (the self-referential-cycle case: the inner
    // `force_recompute` call returns `CycleDetected`, which `Computed::get`
    // turns into a panic), this guard still resets `computing` so the node
    // isn't stuck "mid-recompute" forever — spec §7 item 2 requires a later
    // retry to be possible. `stale` is left `true` (it's never cleared below
    // this point), matching the spec's "computing=false and stale=true"
    // recovery state.
    struct ResetComputingOnUnwind<'a> {
        root: &'a Root,
        id: NodeId,
        completed: bool,
    }
    impl Drop for ResetComputingOnUnwind<'_> {
        fn drop(&mut self) {
            if !self.completed {
                if let Some(c) = self.root.nodes.borrow().get(self.id).and_then(|n| n.as_computed()) {
                    c.computing.set(false);
                }
            }
        }
    }
    let mut guard = ResetComputingOnUnwind {
        root,
        id,
        completed: false,
    };

    let next = root.with_observer(Some(id), || {
        let nodes = root.nodes.borrow();
        let c = nodes.get(id).and_then(|n| n.as_computed()).unwrap();
        let mut compute = c.compute.borrow_mut();
        drop(nodes);
        compute()
    });
    guard.completed = true;

    let nodes = root.nodes.borrow();
    let Some(c) = nodes.get(id).and_then(|n| n.as_computed()) else {
        return Ok(());
    };
    let changed = {
        let current = c.value.borrow();
        !c.has_value.get()
            || !(c.equals)(
                current.as_ref().expect("has_value set without a value"),
                next.as_ref(),
            )
    };
    if changed || !c.has_value.get() {
        *c.value.borrow_mut() = Some(next);
        c.has_value.set(true);
    }
    c.stale.set(false);
    c.computing.set(false);
    Ok(())
}

/// `markStale`: idempotent cascade from a changed signal/computed through
/// every transitively dependent computed, enqueueing effects as it goes, and
/// also enqueueing the computed itself so Phase A forces it to stability
/// ahead of the next effect wave (see `DESIGN.md`'s note on why this spec
/// departs from the teacher's eager recompute).
pub(crate) fn mark_stale(root: &Root, id: NodeId) {
    let (kind, subs) = {
        let nodes = root.nodes.borrow();
        let Some(node) = nodes.get(id) else { return };
        (node.kind, node.subs.borrow().clone())
    };
    match kind {
        NodeKind::Computed => {
            let already_stale = {
                let nodes = root.nodes.borrow();
                let c = nodes.get(id).and_then(|n| n.as_computed()).unwrap();
                let was = c.stale.get();
                c.stale.set(true);
                was
            };
            if already_stale {
                return;
            }
            root.schedule_job(id, NodeKind::Computed);
            for sub in subs {
                mark_stale(root, sub);
            }
        }
        NodeKind::Effect => {
            root.schedule_job(id, NodeKind::Effect);
        }
        NodeKind::Signal => {
            // Unreachable in practice: signals are leaves and are never the
            // target of `mark_stale` themselves. `Signal::set` iterates its
            // own `subs` and calls `mark_stale` on each of *those* instead.
        }
    }
}

/// Variant used by atomic rollback (spec §4.5): restores staleness on
/// computed subscribers of a rolled-back signal without scheduling effects
/// (the queues are cleared immediately after anyway, and `muted` is already
/// raised so `schedule_job` would drop them regardless).
pub(crate) fn mark_stale_for_rollback(root: &Root, id: NodeId) {
    mark_stale(root, id);
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;

    #[test]
    fn cycle_is_retryable_once_the_self_reference_is_removed() {
        // spec §7 item 2: a `CycleDetected` recompute must leave
        // `computing=false`/`stale=true` so a later `get()` (after the
        // self-reference is gone) recomputes cleanly instead of re-raising
        // `CycleDetected` forever.
        let self_ref: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let read_self = Rc::new(Cell::new(true));

        let self_ref_in_closure = self_ref.clone();
        let read_self_in_closure = read_self.clone();
        let c = computed(move || {
            if read_self_in_closure.get() {
                match self_ref_in_closure.borrow().as_ref() {
                    Some(c) => c.get() + 1,
                    None => 0,
                }
            } else {
                42
            }
        });
        *self_ref.borrow_mut() = Some(c);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| c.get()));
        assert!(result.is_err());

        // Remove the self-reference and retry: this must succeed, not
        // re-raise `CycleDetected` because `computing` got stuck `true`.
        read_self.set(false);
        assert_eq!(c.get(), 42);
    }
}
