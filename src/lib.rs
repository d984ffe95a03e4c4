//! A fine-grained reactive runtime kernel.
//!
//! Three primitives sit on top of a single-threaded dependency graph:
//! [`signal`] (a leaf mutable cell), [`computed`] (a lazily memoised
//! derivation), and [`create_effect`] (a tracked side effect). Writes batch
//! and schedule through a two-phase scheduler — [`batch`] coalesces, and
//! [`atomic`] adds commit/rollback — and an async overlay
//! ([`from_promise`]/[`create_resource`]) lifts cancellable futures into the
//! same graph.
//!
//! ```rust
//! use signal_kernel::*;
//!
//! let count = signal(1);
//! let doubled = computed(move || count.get() * 2);
//! assert_eq!(doubled.get(), 2);
//!
//! count.set(5);
//! assert_eq!(doubled.get(), 10);
//! ```
//!
//! Effects run once synchronously at creation, then again whenever a signal
//! or computed they read changes:
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use signal_kernel::*;
//!
//! let count = signal(0);
//! let seen = Rc::new(Cell::new(0));
//! let seen_in_effect = seen.clone();
//! create_effect(move || seen_in_effect.set(count.get()));
//! count.set(9);
//! assert_eq!(seen.get(), 9);
//! ```

mod async_cell;
mod computed;
mod effect;
mod error;
mod graph;
mod node;
mod resource;
mod root;
mod scheduler;
mod signal;

pub use async_cell::{from_promise, AsyncCell, AsyncCellOptions, AsyncContext, AsyncEvent, AsyncStatus};
pub use computed::{computed, computed_with_eq, Computed};
pub use effect::{create_effect, create_effect_with_priority, on_cleanup, EffectHandle};
pub use error::KernelError;
pub use node::NodeId;
pub use resource::{create_resource, Resource};
pub use signal::{f64_nan_safe_equals, signal, signal_with_eq, Signal};

use root::Root;

/// Coalesces every write performed inside `f` into a single scheduler flush,
/// run once `f` returns (or immediately, if this call isn't nested inside an
/// outer `batch`/`atomic`). Reentrant: nested calls just extend the
/// outermost one.
pub fn batch<T>(f: impl FnOnce() -> T) -> T {
    Root::with(|root| root.batch(f))
}

/// Like [`batch`], but also gives `f` rollback semantics: if `f` panics, every
/// signal written during the call is restored to its pre-call value and no
/// effect scheduled during the call runs. Also known as `transaction`.
/// Reentrant via a depth counter; an inner `atomic`'s rollback only undoes
/// writes made since *that* frame opened, merging into the parent's log on
/// commit (outer wins on conflicting entries).
pub fn atomic<T>(f: impl FnOnce() -> T) -> T {
    Root::with(|root| root.atomic(f))
}

/// `transaction` is an alias for [`atomic`] — same operation, the name the
/// spec's external-interfaces table uses interchangeably.
pub fn transaction<T>(f: impl FnOnce() -> T) -> T {
    atomic(f)
}

/// Runs the scheduler to completion if anything is pending. Exists for tests
/// and synchronous embedding; `batch`/`atomic`/signal writes all flush on
/// their own once their outermost frame closes.
pub fn flush_sync() -> Result<(), KernelError> {
    Root::with(|root| root.flush_sync())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diamond_dependency_stabilises_before_effect_runs() {
        let a = signal(1);
        let b = computed(move || a.get() + 1);
        let c = computed(move || a.get() * 10);
        let d = computed(move || b.get() + c.get());
        assert_eq!(d.get(), 12);
        a.set(2);
        assert_eq!(d.get(), 23);
    }

    #[test]
    fn batch_coalesces_multiple_writes_into_one_effect_run() {
        use std::cell::Cell;
        use std::rc::Rc;

        let a = signal(1);
        let b = signal(10);
        let runs = Rc::new(Cell::new(0));
        let runs_in_effect = runs.clone();
        create_effect(move || {
            let _ = a.get() + b.get();
            runs_in_effect.set(runs_in_effect.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        batch(|| {
            a.set(2);
            b.set(20);
        });
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn atomic_rolls_back_every_write_on_panic() {
        let a = signal(1);
        let b = signal(2);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            atomic(|| {
                a.set(100);
                b.set(200);
                panic!("abort the transaction");
            });
        }));
        assert!(result.is_err());
        assert_eq!(a.peek(), 1);
        assert_eq!(b.peek(), 2);
    }

    #[test]
    fn computed_cycle_is_reported_not_a_stack_overflow() {
        // A computed that (indirectly) reads itself during its own
        // recomputation must surface `CycleDetected`, not blow the stack.
        use std::cell::RefCell;
        use std::rc::Rc;

        let slot: Rc<RefCell<Option<Computed<i32>>>> = Rc::new(RefCell::new(None));
        let slot_in_closure = slot.clone();
        let c = computed(move || match slot_in_closure.borrow().as_ref() {
            Some(c) => c.get() + 1,
            None => 0,
        });
        *slot.borrow_mut() = Some(c);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| c.get()));
        assert!(result.is_err());
    }
}
