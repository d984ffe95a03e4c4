//! Leaf mutable cells.
//!
//! Grounded on `sycamore-reactive3::signals::{create_signal, Signal,
//! ReadSignal}`, with the default-equality semantics of spec §3 (NaN-safe:
//! two NaNs compare equal; +0/-0 are distinguished) layered on top of the
//! teacher's plain identity-equality default.

use std::any::{Any, TypeId};
use std::marker::PhantomData;

use crate::node::{Node, NodeId, SignalData};
use crate::root::Root;

/// A reactive leaf cell. Created with [`crate::signal`].
pub struct Signal<T: 'static> {
    pub(crate) id: NodeId,
    _marker: PhantomData<T>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Signal<T> {}

/// Default comparator used by [`signal`] when no `equals` is supplied:
/// identity-equality with NaN-safe semantics for `f64` specifically (two
/// NaNs are treated as equal, so a NaN write doesn't propagate endlessly; +0
/// and -0 are distinguished, matching `f64`'s bit pattern rather than its
/// `PartialEq`), and plain `T::eq` for everything else. Spec §3 describes
/// this NaN-safe rule as the *default* comparator's behavior, not an
/// opt-in, so `f64` is special-cased here via a `TypeId` check rather than
/// left to `PartialEq::eq` (which disagrees with the spec on both points:
/// `NaN != NaN` and `+0.0 == -0.0`).
pub fn default_signal_equals<T: PartialEq + 'static>(a: &T, b: &T) -> bool {
    if TypeId::of::<T>() == TypeId::of::<f64>() {
        let a = (a as &dyn Any)
            .downcast_ref::<f64>()
            .expect("TypeId matched f64");
        let b = (b as &dyn Any)
            .downcast_ref::<f64>()
            .expect("TypeId matched f64");
        return f64_nan_safe_equals(a, b);
    }
    a == b
}

/// NaN-safe, sign-of-zero-distinguishing comparator for `f64`. Used directly
/// by [`default_signal_equals`] for `T = f64`; also usable as the `equals`
/// argument to [`signal_with_eq`] for types that wrap or derive from `f64`.
pub fn f64_nan_safe_equals(a: &f64, b: &f64) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    a.to_bits() == b.to_bits()
}

/// Creates a new [`Signal`] with the given initial value and, optionally, a
/// custom equality comparator (defaults to [`default_signal_equals`]: plain
/// `T::eq`, except for `f64`, where it's NaN-safe and sign-of-zero-aware).
pub fn signal<T: PartialEq + 'static>(initial: T) -> Signal<T> {
    signal_with_eq(initial, default_signal_equals)
}

/// Like [`signal`], but with a caller-supplied equality comparator instead of
/// `T: PartialEq`.
pub fn signal_with_eq<T, E>(initial: T, eq: E) -> Signal<T>
where
    T: 'static,
    E: Fn(&T, &T) -> bool + 'static,
{
    let equals: crate::node::EqFn = Box::new(move |a, b| {
        eq(
            a.downcast_ref::<T>().expect("signal value type mismatch"),
            b.downcast_ref::<T>().expect("signal value type mismatch"),
        )
    });
    let id = Root::with(|root| {
        let data = SignalData {
            value: std::cell::RefCell::new(Box::new(initial)),
            equals,
        };
        root.nodes.borrow_mut().insert(Node::signal(data))
    });
    Signal {
        id,
        _marker: PhantomData,
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Registers a dependency on the active observer and returns the stored
    /// value.
    pub fn get(self) -> T {
        Root::with(|root| root.track(self.id));
        self.peek()
    }

    /// Returns the stored value without tracking a dependency.
    pub fn peek(self) -> T {
        Root::with(|root| {
            let nodes = root.nodes.borrow();
            let data = nodes
                .get(self.id)
                .and_then(|n| n.as_signal())
                .expect("signal is disposed");
            data.value
                .borrow()
                .downcast_ref::<T>()
                .expect("signal value type mismatch")
                .clone()
        })
    }

    /// Sets the signal to `next`. If `equals(prev, next)` holds, this is a
    /// no-op (no write-log entry, no propagation) — spec §4.2 and the
    /// "equal writes under `muted` don't propagate anyway" open question in
    /// §9.
    pub fn set(self, next: T) {
        self.set_with(move |_| next);
    }

    /// Computes the next value from the current one via `updater`, then
    /// applies the same equality-gated write/propagate logic as [`set`].
    pub fn set_with(self, updater: impl FnOnce(&T) -> T) {
        Root::with(|root| {
            let subs = {
                let nodes = root.nodes.borrow();
                let data = nodes
                    .get(self.id)
                    .and_then(|n| n.as_signal())
                    .expect("signal is disposed");
                let (prev, next) = {
                    let current = data.value.borrow();
                    let current_ref = current
                        .downcast_ref::<T>()
                        .expect("signal value type mismatch");
                    let next = updater(current_ref);
                    (current_ref.clone(), next)
                };
                let unchanged = (data.equals)(&prev as &dyn Any, &next as &dyn Any);
                if unchanged {
                    return;
                }
                root.record_atomic_write(self.id, Box::new(prev));
                *data.value.borrow_mut() = Box::new(next);
                nodes
                    .get(self.id)
                    .expect("signal is disposed")
                    .subs
                    .borrow()
                    .clone()
            };
            for sub in subs {
                crate::computed::mark_stale(root, sub);
            }
        });
    }

    /// Explicit edge creation for external integrations: registers `observer`
    /// as a dependent of this signal and returns a detach closure.
    pub fn subscribe(self, observer: NodeId) -> impl FnOnce() {
        Root::with(|root| root.link(observer, self.id));
        let id = self.id;
        move || {
            Root::with(|root| root.unlink(observer, id));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::effect::create_effect;

    #[test]
    fn plain_signal_default_is_nan_safe_and_zero_sign_aware() {
        let n = signal(f64::NAN);
        let runs = Rc::new(Cell::new(0));
        let runs_in_effect = runs.clone();
        create_effect(move || {
            let _ = n.get();
            runs_in_effect.set(runs_in_effect.get() + 1);
        });
        assert_eq!(runs.get(), 1);

        // Writing NaN again must be gated as "equal" by default, not
        // propagate on every write the way `f64::partial_cmp`/`PartialEq`
        // would (NaN != NaN under `PartialEq`).
        n.set(f64::NAN);
        assert_eq!(runs.get(), 1);

        // +0.0 and -0.0 compare equal under `PartialEq` but must be
        // distinguished by the default comparator.
        let z = signal(0.0_f64);
        let runs2 = Rc::new(Cell::new(0));
        let runs2_in_effect = runs2.clone();
        create_effect(move || {
            let _ = z.get();
            runs2_in_effect.set(runs2_in_effect.get() + 1);
        });
        assert_eq!(runs2.get(), 1);
        z.set(-0.0_f64);
        assert_eq!(runs2.get(), 2);
    }

    #[test]
    fn non_float_default_still_uses_plain_partial_eq() {
        let s = signal(1_i32);
        let runs = Rc::new(Cell::new(0));
        let runs_in_effect = runs.clone();
        create_effect(move || {
            let _ = s.get();
            runs_in_effect.set(runs_in_effect.get() + 1);
        });
        assert_eq!(runs.get(), 1);
        s.set(1);
        assert_eq!(runs.get(), 1);
        s.set(2);
        assert_eq!(runs.get(), 2);
    }
}
