//! Node storage: the tagged variant over `{Signal, Computed, Effect}` and the
//! dep/sub edge sets every node carries.
//!
//! Grounded on `sycamore-reactive3`'s `SignalState`/`EffectState` (one arena
//! entry per kind), generalized here into a single tagged `Node` so that dep
//! and sub edges are tracked uniformly across all three kinds instead of only
//! for signals.

use std::any::Any;
use std::cell::{Cell, RefCell};

use slotmap::new_key_type;

new_key_type! {
    /// Stable, arena-relative identity of a node. Never reused across
    /// `dispose`/recreate — slotmap's generational keys take care of that.
    pub struct NodeId;
}

/// Which of the three node kinds this is. Signals are always leaves: they
/// must never appear as `current_observer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Signal,
    Computed,
    Effect,
}

/// Type-erased equality comparator for a signal or computed's value.
pub(crate) type EqFn = Box<dyn Fn(&dyn Any, &dyn Any) -> bool>;

pub(crate) struct SignalData {
    pub value: RefCell<Box<dyn Any>>,
    pub equals: EqFn,
}

pub(crate) struct ComputedData {
    pub value: RefCell<Option<Box<dyn Any>>>,
    pub compute: RefCell<Box<dyn FnMut() -> Box<dyn Any>>>,
    pub equals: EqFn,
    pub stale: Cell<bool>,
    pub has_value: Cell<bool>,
    pub computing: Cell<bool>,
    /// Already sitting in the scheduler's compute queue; avoids duplicate
    /// enqueueing during a single cascade.
    pub queued: Cell<bool>,
}

pub(crate) struct EffectData {
    pub run: RefCell<Option<Box<dyn FnMut()>>>,
    pub cleanups: RefCell<Vec<Box<dyn FnOnce()>>>,
    pub disposed: Cell<bool>,
    pub priority: Cell<i32>,
    pub queued: Cell<bool>,
}

pub(crate) enum NodeData {
    Signal(SignalData),
    Computed(ComputedData),
    Effect(EffectData),
}

/// One vertex in the reactive graph.
///
/// `deps` is the set of nodes this node observes (reads from); `subs` is the
/// set of nodes observing this one. Every edge `A -> B` is mirrored:
/// `B in A.deps <=> A in B.subs` (spec invariant, §3).
pub(crate) struct Node {
    pub kind: NodeKind,
    pub deps: RefCell<Vec<NodeId>>,
    pub subs: RefCell<Vec<NodeId>>,
    pub data: NodeData,
}

impl Node {
    pub fn signal(data: SignalData) -> Self {
        Node {
            kind: NodeKind::Signal,
            deps: RefCell::new(Vec::new()),
            subs: RefCell::new(Vec::new()),
            data: NodeData::Signal(data),
        }
    }

    pub fn computed(data: ComputedData) -> Self {
        Node {
            kind: NodeKind::Computed,
            deps: RefCell::new(Vec::new()),
            subs: RefCell::new(Vec::new()),
            data: NodeData::Computed(data),
        }
    }

    pub fn effect(data: EffectData) -> Self {
        Node {
            kind: NodeKind::Effect,
            deps: RefCell::new(Vec::new()),
            subs: RefCell::new(Vec::new()),
            data: NodeData::Effect(data),
        }
    }

    pub fn as_signal(&self) -> Option<&SignalData> {
        match &self.data {
            NodeData::Signal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_computed(&self) -> Option<&ComputedData> {
        match &self.data {
            NodeData::Computed(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_effect(&self) -> Option<&EffectData> {
        match &self.data {
            NodeData::Effect(e) => Some(e),
            _ => None,
        }
    }
}
