// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::{future::poll_fn, future::Future, panic, pin::pin};

use futures::{stream::Stream, FutureExt};
use tokio::task::JoinSet;

/// Extension trait introducing `try_collect_spawned` to all streams.
pub trait TrySpawnStreamExt: Stream {
    /// Runs the provided asynchronous closure on each element of the stream, each as its own
    /// tokio task, and collects their outputs in completion order.
    ///
    /// The first argument is an optional limit on the number of tasks in flight at once. Values
    /// of `0` and `None` are interpreted as no limit.
    ///
    /// The first error returned by a task stops new elements from being taken off the stream.
    /// Tasks already in flight are allowed to finish (their outputs are discarded), and then the
    /// error is returned. Panics in tasks are propagated.
    fn try_collect_spawned<Fut, F, T, E>(
        self,
        limit: impl Into<Option<usize>>,
        f: F,
    ) -> impl Future<Output = Result<Vec<T>, E>>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        F: FnMut(Self::Item) -> Fut,
        T: Send + 'static,
        E: Send + 'static;
}

impl<S: Stream + Sized + 'static> TrySpawnStreamExt for S {
    async fn try_collect_spawned<Fut, F, T, E>(
        self,
        limit: impl Into<Option<usize>>,
        mut f: F,
    ) -> Result<Vec<T>, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        F: FnMut(Self::Item) -> Fut,
        T: Send + 'static,
        E: Send + 'static,
    {
        // Maximum number of tasks to spawn concurrently.
        let limit = match limit.into() {
            Some(0) | None => usize::MAX,
            Some(n) => n,
        };

        // Number of permits to spawn tasks left.
        let mut permits = limit;
        // Handles for already spawned tasks.
        let mut join_set = JoinSet::new();
        // Whether the pool has stopped accepting new items and is draining.
        let mut draining = false;
        // First error produced by a task, returned once the pool has drained.
        let mut error = None;
        let mut outputs = Vec::new();

        let mut stream = pin!(self);

        loop {
            // Spawn eagerly while items are immediately available.
            while !draining && permits > 0 {
                match poll_fn(|cx| stream.as_mut().poll_next(cx)).now_or_never() {
                    Some(Some(item)) => {
                        permits -= 1;
                        join_set.spawn(f(item));
                    }
                    Some(None) => draining = true,
                    None => break,
                }
            }

            tokio::select! {
                biased;

                Some(res) = join_set.join_next() => {
                    permits += 1;
                    match res {
                        Ok(Ok(output)) if error.is_none() => outputs.push(output),
                        Ok(Ok(_)) => {}

                        Ok(Err(e)) => {
                            if error.is_none() {
                                error = Some(e);
                            }
                            draining = true;
                        }

                        Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),

                        // Only possible if the runtime is shutting down.
                        Err(e) => {
                            assert!(e.is_cancelled());
                            draining = true;
                        }
                    }
                }

                next = poll_fn(|cx| stream.as_mut().poll_next(cx)),
                    if !draining && permits > 0 => {
                    if let Some(item) = next {
                        permits -= 1;
                        join_set.spawn(f(item));
                    } else {
                        draining = true;
                    }
                }

                else => {
                    if permits == limit && draining {
                        break;
                    }
                }
            }
        }

        if let Some(e) = error {
            Err(e)
        } else {
            Ok(outputs)
        }
    }
}
