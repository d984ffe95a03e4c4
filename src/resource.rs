//! Source-tracked async cell: `createResource`.
//!
//! Grounded on `sycamore-futures`'s suspense-counting effect (an effect that
//! re-reads a tracked source and drives async work on every change),
//! generalized into the full switch-latest `AsyncCell` composition spec
//! §4.7 describes: an effect that tracks `source()`, and on every run after
//! the first, cancels the in-flight fetch before reloading with the new
//! source value.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::future::LocalBoxFuture;

use crate::async_cell::{from_promise, AsyncCell, AsyncCellOptions, AsyncContext, AsyncStatus};
use crate::effect::{create_effect, EffectHandle};
use crate::signal::Signal;

/// A source-tracked [`AsyncCell`]: refetches whenever the source function's
/// tracked reads change, cancelling any fetch still in flight first (§4.7's
/// switch-latest semantics).
pub struct Resource<T: 'static, E: 'static> {
    cell: AsyncCell<T, E>,
    effect: EffectHandle,
}

impl<T, E> Resource<T, E>
where
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
{
    pub fn value(&self) -> Signal<Option<T>> {
        self.cell.value()
    }

    pub fn status(&self) -> Signal<AsyncStatus> {
        self.cell.status()
    }

    pub fn error(&self) -> Signal<Option<E>> {
        self.cell.error()
    }

    /// Manually reruns the fetcher against the last-observed source value,
    /// bypassing the tracked-source cancel-then-reload sequence.
    pub fn reload(&self) {
        self.cell.reload();
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        self.cell.cancel(reason);
    }

    /// Disposes the tracking effect and its dependency edges. The
    /// underlying cell, if other clones of it are held, continues to exist.
    pub fn dispose(self) {
        self.effect.dispose();
    }
}

/// Composes a source function with a fetcher into a [`Resource`]: an
/// [`AsyncCell`] with `eager = false`, driven by an effect that tracks
/// `source()` and reloads on every change.
pub fn create_resource<S, T, E>(
    mut source: impl FnMut() -> S + 'static,
    mut fetcher: impl FnMut(S, AsyncContext) -> Result<LocalBoxFuture<'static, Result<T, E>>, E> + 'static,
    opts: AsyncCellOptions<T, E>,
) -> Resource<T, E>
where
    S: Clone + 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
{
    let last_source: Rc<RefCell<Option<S>>> = Rc::new(RefCell::new(None));
    let last_source_for_fetcher = last_source.clone();

    let cell = from_promise(
        move |ctx: AsyncContext| {
            let s = last_source_for_fetcher
                .borrow()
                .clone()
                .expect("resource fetcher invoked before the tracking effect recorded a source");
            fetcher(s, ctx)
        },
        AsyncCellOptions {
            eager: false,
            ..opts
        },
    );

    let cell_for_effect = cell.clone();
    let first_run = Rc::new(Cell::new(true));
    let effect = create_effect(move || {
        let s = source();
        *last_source.borrow_mut() = Some(s);
        if first_run.get() {
            first_run.set(false);
            cell_for_effect.reload();
        } else {
            cell_for_effect.cancel("source-changed");
            cell_for_effect.reload();
        }
    });

    Resource { cell, effect }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::signal::signal;
    use futures::FutureExt;

    #[tokio::test(flavor = "current_thread")]
    async fn reload_runs_on_first_tick_with_the_current_source() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let source_signal = signal(1i32);
                let resource = create_resource::<i32, i32, String>(
                    move || source_signal.get(),
                    |s, _ctx| Ok(futures::future::ready(Ok(s * 10)).boxed_local()),
                    AsyncCellOptions::default(),
                );
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                assert_eq!(resource.status().get(), AsyncStatus::Success);
                assert_eq!(resource.value().get(), Some(10));
            })
            .await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn source_change_cancels_in_flight_fetch_before_reloading() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let source_signal = signal(1i32);
                let resource = create_resource::<i32, i32, String>(
                    move || source_signal.get(),
                    |s, ctx| {
                        Ok(async move {
                            // Slow enough that a source change supersedes it
                            // before it resolves.
                            tokio::task::yield_now().await;
                            tokio::task::yield_now().await;
                            Ok(s * 10 + ctx.token() as i32)
                        }
                        .boxed_local())
                    },
                    AsyncCellOptions::default(),
                );
                tokio::task::yield_now().await;
                source_signal.set(2);
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                tokio::task::yield_now().await;
                assert_eq!(resource.status().get(), AsyncStatus::Success);
                assert_eq!(resource.value().get(), Some(22));
            })
            .await;
    }
}
