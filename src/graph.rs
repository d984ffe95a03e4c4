//! The dependency graph: the current-observer stack and `track`/`link`/
//! `unlink`.
//!
//! Grounded on `sycamore-reactive3::scope::Root::tracked_scope` and
//! `DependencyTracker`, generalized from "record which signals an update
//! callback touched, then link them all at once afterwards" into the
//! immediate, per-read `link` spec §4.1 wants (a computed or effect links to
//! each dependency the instant it reads it, not in a batch after the fact).

use crate::error::KernelError;
use crate::node::{NodeId, NodeKind};
use crate::root::Root;

impl Root {
    /// Installs `obs` as the current observer for the duration of `f`,
    /// restoring the previous observer on every exit path, including panics.
    ///
    /// Fails (panics with [`KernelError::InvalidTopology`]) if `obs` names a
    /// signal: signals are leaves and must never be installed as an
    /// observer.
    pub(crate) fn with_observer<R>(&self, obs: Option<NodeId>, f: impl FnOnce() -> R) -> R {
        if let Some(id) = obs {
            let kind = self.nodes.borrow()[id].kind;
            if kind == NodeKind::Signal {
                panic!("{}", KernelError::InvalidTopology);
            }
        }
        struct Restore<'a> {
            root: &'a Root,
            prev: Option<NodeId>,
        }
        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                self.root.current_observer.set(self.prev);
            }
        }
        let prev = self.current_observer.replace(obs);
        let _restore = Restore { root: self, prev };
        f()
    }

    /// `track(dep)`: a no-op outside a tracked section; otherwise links
    /// `current_observer -> dep` (idempotent).
    pub(crate) fn track(&self, dep: NodeId) {
        if let Some(obs) = self.current_observer.get() {
            self.link(obs, dep);
        }
    }

    /// Creates the edge `observer -> dep`, maintaining the dual edge-set
    /// invariant `dep in observer.deps <=> observer in dep.subs`. Idempotent.
    pub(crate) fn link(&self, observer: NodeId, dep: NodeId) {
        let nodes = self.nodes.borrow();
        let Some(observer_node) = nodes.get(observer) else {
            return;
        };
        if observer_node.kind == NodeKind::Signal {
            drop(nodes);
            panic!("{}", KernelError::InvalidTopology);
        }
        {
            let mut deps = observer_node.deps.borrow_mut();
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        if let Some(dep_node) = nodes.get(dep) {
            let mut subs = dep_node.subs.borrow_mut();
            if !subs.contains(&observer) {
                subs.push(observer);
            }
        }
    }

    /// Severs the edge `observer -> dep` in both directions.
    pub(crate) fn unlink(&self, observer: NodeId, dep: NodeId) {
        let nodes = self.nodes.borrow();
        if let Some(o) = nodes.get(observer) {
            o.deps.borrow_mut().retain(|&d| d != dep);
        }
        if let Some(d) = nodes.get(dep) {
            d.subs.borrow_mut().retain(|&o| o != observer);
        }
    }

    /// Detaches every dependency currently held by `node` (used before a
    /// computed/effect re-runs, so stale edges from a previous run don't
    /// linger).
    pub(crate) fn detach_deps(&self, node: NodeId) {
        let deps = {
            let nodes = self.nodes.borrow();
            match nodes.get(node) {
                Some(n) => std::mem::take(&mut *n.deps.borrow_mut()),
                None => return,
            }
        };
        for dep in deps {
            let nodes = self.nodes.borrow();
            if let Some(d) = nodes.get(dep) {
                d.subs.borrow_mut().retain(|&o| o != node);
            }
        }
    }

    /// Detaches every incident edge (both deps and subs) of `node`. Used by
    /// `dispose`.
    pub(crate) fn detach_all(&self, node: NodeId) {
        self.detach_deps(node);
        let subs = {
            let nodes = self.nodes.borrow();
            match nodes.get(node) {
                Some(n) => std::mem::take(&mut *n.subs.borrow_mut()),
                None => return,
            }
        };
        for sub in subs {
            let nodes = self.nodes.borrow();
            if let Some(s) = nodes.get(sub) {
                s.deps.borrow_mut().retain(|&d| d != node);
            }
        }
    }
}
