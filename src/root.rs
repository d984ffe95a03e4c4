//! The process-wide runtime singleton: arenas and scheduler state.
//!
//! Grounded on `sycamore-reactive3::scope::Root` and its `GLOBAL_ROOT`
//! thread-local — generalized from a scope-tree-owned arena to a flat arena
//! of `{Signal, Computed, Effect}` nodes with no scope tree at all (spec has
//! no notion of scopes; node lifetime is either external, explicit-dispose,
//! or tied to the runtime itself, per spec §9).

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use slotmap::SlotMap;

use crate::node::{Node, NodeId};

thread_local! {
    static ROOT: Root = Root::new();
}

/// Per-transaction write log entry: the value a signal held before the first
/// write to it inside the innermost atomic frame.
pub(crate) type WriteLog = HashMap<NodeId, Box<dyn Any>>;

pub(crate) struct Root {
    pub(crate) nodes: RefCell<SlotMap<NodeId, Node>>,
    pub(crate) current_observer: Cell<Option<NodeId>>,
    pub(crate) active_effect: Cell<Option<NodeId>>,
    pub(crate) compute_queue: RefCell<Vec<NodeId>>,
    pub(crate) effect_queue: RefCell<Vec<NodeId>>,
    pub(crate) scheduled: Cell<bool>,
    pub(crate) batch_depth: Cell<u32>,
    pub(crate) atomic_depth: Cell<u32>,
    pub(crate) atomic_logs: RefCell<Vec<WriteLog>>,
    pub(crate) muted: Cell<u32>,
    pub(crate) flushing: Cell<bool>,
}

impl Root {
    fn new() -> Self {
        Root {
            nodes: RefCell::new(SlotMap::with_key()),
            current_observer: Cell::new(None),
            active_effect: Cell::new(None),
            compute_queue: RefCell::new(Vec::new()),
            effect_queue: RefCell::new(Vec::new()),
            scheduled: Cell::new(false),
            batch_depth: Cell::new(0),
            atomic_depth: Cell::new(0),
            atomic_logs: RefCell::new(Vec::new()),
            muted: Cell::new(0),
            flushing: Cell::new(false),
        }
    }

    /// Runs `f` against the current thread's runtime instance. There is
    /// exactly one runtime per thread (spec §9: "no design need for
    /// lock-free structures because all contention is avoided by the
    /// single-thread model").
    pub(crate) fn with<R>(f: impl FnOnce(&Root) -> R) -> R {
        ROOT.with(f)
    }
}
