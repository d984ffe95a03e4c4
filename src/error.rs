//! The kernel's error taxonomy.
//!
//! Most of these are invariant violations rather than recoverable data
//! errors, so the public surface (`Signal::get`, `Computed::get`, ...) panics
//! with the `Display` message of the matching variant; the `try_*` methods
//! scattered through this crate return these directly for tests and for
//! embedders that want to handle them without unwinding.

use thiserror::Error;

/// Everything that can go wrong inside the reactive graph or scheduler.
///
/// This does not cover `fromPromise`/`createResource` producer failures:
/// those are surfaced through `AsyncStatus::Error` and `onError`, not through
/// this enum, per the async overlay's own state machine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// A signal was asked to observe another node, or a node that can never
    /// be an observer (a signal) was installed as the current observer.
    #[error("invalid topology: a signal cannot observe another node")]
    InvalidTopology,

    /// A computed re-entered its own recomputation.
    #[error("cycle detected: a computed re-entered its own recomputation")]
    CycleDetected,

    /// The scheduler's flush safety counter was exceeded (more than 10,000
    /// drain iterations in one tick).
    #[error("infinite update loop: flush exceeded its iteration budget")]
    InfiniteUpdateLoop,

    /// Operation attempted on a node that has already been disposed.
    #[error("node has been disposed")]
    Disposed,
}
