// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// How many times to try an operation and how long to wait in between.
///
/// Delays grow exponentially from `initial_interval` without jitter, so the `n`th retry waits
/// `initial_interval * multiplier^(n-1)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub attempts: usize,
    #[serde(with = "duration_serde")]
    pub initial_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_interval: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> BoundedBackoff {
        BoundedBackoff {
            inner: ExponentialBackoff {
                initial_interval: self.initial_interval,
                current_interval: self.initial_interval,
                randomization_factor: 0.0,
                multiplier: self.multiplier,
                max_interval: Duration::from_secs(60),
                max_elapsed_time: None,
                ..Default::default()
            },
            retries: self.attempts.saturating_sub(1),
            remaining: self.attempts.saturating_sub(1),
        }
    }
}

/// Stops an exponential backoff after a fixed number of retries.
struct BoundedBackoff {
    inner: ExponentialBackoff,
    retries: usize,
    remaining: usize,
}

impl Backoff for BoundedBackoff {
    fn reset(&mut self) {
        self.inner.reset();
        self.remaining = self.retries;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.inner.next_backoff()
    }
}

/// Every error seen while retrying an operation, in the order the attempts were made.
#[derive(Debug)]
pub struct RetryError<E> {
    pub errors: Vec<E>,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} attempts failed", self.errors.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            write!(f, "; attempt {}: {error}", i + 1)?;
        }
        Ok(())
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Runs `op` until it succeeds or the policy runs out of attempts.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let errors = Mutex::new(Vec::new());

    let result = backoff::future::retry(policy.backoff(), || {
        let attempt = op();
        let errors = &errors;
        async move {
            attempt.await.map_err(|e| {
                errors.lock().push(e);
                backoff::Error::transient(())
            })
        }
    })
    .await;

    result.map_err(|()| RetryError {
        errors: errors.into_inner(),
    })
}

pub(crate) mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
