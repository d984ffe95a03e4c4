//! Tracked side effects.
//!
//! Grounded on `sycamore-reactive3::effects::create_effect` +
//! `scope::on_cleanup`, generalized with the explicit cleanup list, dispose
//! handle, and priority field spec §4.4/§4.5 require.

use std::cell::Cell;

use crate::node::{EffectData, Node, NodeId};
use crate::root::Root;

/// A handle to a running effect. Dropping it does **not** dispose the
/// effect (spec gives effects no implicit lifetime); call [`EffectHandle::dispose`]
/// explicitly.
#[derive(Clone, Copy)]
pub struct EffectHandle {
    pub(crate) id: NodeId,
}

/// Creates an effect that runs `f` once synchronously, then again every time
/// a signal/computed it reads changes. Returns a handle used to dispose it.
pub fn create_effect(f: impl FnMut() + 'static) -> EffectHandle {
    create_effect_with_priority(f, 0)
}

/// Like [`create_effect`], but with an explicit scheduler priority (lower
/// numbers run first within a wave; ties preserve insertion order). Default
/// priority is `0`.
pub fn create_effect_with_priority(f: impl FnMut() + 'static, priority: i32) -> EffectHandle {
    let id = Root::with(|root| {
        let data = EffectData {
            run: std::cell::RefCell::new(Some(Box::new(f))),
            cleanups: std::cell::RefCell::new(Vec::new()),
            disposed: Cell::new(false),
            priority: Cell::new(priority),
            queued: Cell::new(false),
        };
        root.nodes.borrow_mut().insert(Node::effect(data))
    });
    Root::with(|root| run_effect(root, id));
    EffectHandle { id }
}

impl EffectHandle {
    /// Marks the effect disposed, runs its pending cleanups, and detaches all
    /// of its dependencies. Idempotent.
    pub fn dispose(self) {
        Root::with(|root| {
            let already_disposed = {
                let nodes = root.nodes.borrow();
                let Some(e) = nodes.get(self.id).and_then(|n| n.as_effect()) else {
                    return;
                };
                let was = e.disposed.get();
                e.disposed.set(true);
                was
            };
            if already_disposed {
                return;
            }
            run_cleanups(root, self.id);
            root.detach_all(self.id);
        });
    }
}

/// Appends `cb` to the currently-running effect's cleanup list. A no-op
/// outside an effect run.
pub fn on_cleanup(cb: impl FnOnce() + 'static) {
    Root::with(|root| {
        if let Some(id) = root.active_effect.get() {
            let nodes = root.nodes.borrow();
            if let Some(e) = nodes.get(id).and_then(|n| n.as_effect()) {
                e.cleanups.borrow_mut().push(Box::new(cb));
            }
        }
    });
}

fn run_cleanups(root: &Root, id: NodeId) {
    let cleanups = {
        let nodes = root.nodes.borrow();
        match nodes.get(id).and_then(|n| n.as_effect()) {
            Some(e) => std::mem::take(&mut *e.cleanups.borrow_mut()),
            None => return,
        }
    };
    // LIFO order; a panicking cleanup is swallowed-and-reported so the rest
    // still run (spec §7, CleanupFailure).
    for cb in cleanups.into_iter().rev() {
        if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(cb)) {
            report_cleanup_failure(&payload);
        }
    }
}

fn report_cleanup_failure(payload: &(dyn std::any::Any + Send)) {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    #[cfg(feature = "trace")]
    tracing::warn!(error = %message, "effect cleanup panicked; swallowed, remaining cleanups still ran");
    #[cfg(not(feature = "trace"))]
    {
        let _ = message;
    }
}

/// Runs one effect: cleanups, detach deps, install as observer, run the
/// closure, collect any cleanup it registered via `on_cleanup`. Shared by
/// effect creation and the scheduler's Phase B.
pub(crate) fn run_effect(root: &Root, id: NodeId) {
    let disposed = {
        let nodes = root.nodes.borrow();
        match nodes.get(id).and_then(|n| n.as_effect()) {
            Some(e) => e.disposed.get(),
            None => return,
        }
    };
    if disposed {
        return;
    }

    run_cleanups(root, id);
    root.detach_deps(id);

    struct RestoreActiveEffect<'a> {
        root: &'a Root,
        prev: Option<NodeId>,
    }
    impl Drop for RestoreActiveEffect<'_> {
        fn drop(&mut self) {
            self.root.active_effect.set(self.prev);
        }
    }
    let prev_active = root.active_effect.replace(Some(id));
    let _restore = RestoreActiveEffect {
        root,
        prev: prev_active,
    };

    root.with_observer(Some(id), || {
        let mut run = {
            let nodes = root.nodes.borrow();
            let e = nodes.get(id).and_then(|n| n.as_effect()).unwrap();
            e.run.borrow_mut().take()
        };
        if let Some(f) = &mut run {
            f();
        }
        let nodes = root.nodes.borrow();
        if let Some(e) = nodes.get(id).and_then(|n| n.as_effect()) {
            *e.run.borrow_mut() = run;
        }
    });
}
