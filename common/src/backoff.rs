// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module providing utilities for retrying operations with exponential backoff.

use std::time::Duration;

pub use ::backoff::future::{retry, retry_notify};
pub use ::backoff::Error as BackoffError;
pub use ::backoff::{backoff::Backoff, ExponentialBackoff, Notify};

/// Return a backoff policy for querying local services (the instance metadata
/// service, a freshly started agent) which are expected to answer within a
/// few seconds.
///
/// Callers are expected to classify errors as permanent where retrying is
/// pointless; transient errors are retried for at most two minutes.
pub fn local_service_policy() -> ::backoff::ExponentialBackoff {
    const INITIAL_INTERVAL: Duration = Duration::from_millis(50);
    const MAX_INTERVAL: Duration = Duration::from_secs(1);
    const MAX_ELAPSED: Duration = Duration::from_secs(120);
    policy_with_max(INITIAL_INTERVAL, MAX_INTERVAL, Some(MAX_ELAPSED))
}

/// Return a bounded backoff policy for waiting on an external identity (e.g.,
/// a managed-instance id) to be assigned.
///
/// The policy stops producing intervals once `max_elapsed` has passed, at
/// which point the operation's last error is surfaced to the caller.
pub fn registration_policy(
    max_elapsed: Duration,
) -> ::backoff::ExponentialBackoff {
    const INITIAL_INTERVAL: Duration = Duration::from_millis(250);
    const MAX_INTERVAL: Duration = Duration::from_secs(10);
    policy_with_max(INITIAL_INTERVAL, MAX_INTERVAL, Some(max_elapsed))
}

fn policy_with_max(
    initial_interval: Duration,
    max_interval: Duration,
    max_elapsed_time: Option<Duration>,
) -> ::backoff::ExponentialBackoff {
    let current_interval = initial_interval;
    ::backoff::ExponentialBackoff {
        current_interval,
        initial_interval,
        multiplier: 2.0,
        max_interval,
        max_elapsed_time,
        ..backoff::ExponentialBackoff::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_registration_policy_is_bounded() {
        let mut policy = registration_policy(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(policy.next_backoff(), None);
    }

    #[test]
    fn test_local_service_policy_is_short() {
        let policy = local_service_policy();
        assert_eq!(policy.max_elapsed_time, Some(Duration::from_secs(120)));
        assert_eq!(policy.max_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_bound() {
        let counter = AtomicUsize::new(0);
        let attempts = &counter;
        let result: Result<(), &str> = retry_notify(
            registration_policy(Duration::from_millis(100)),
            || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(BackoffError::transient("not yet"))
            },
            |_err: &str, _delay: Duration| {},
        )
        .await;
        assert_eq!(result, Err("not yet"));
        assert!(counter.load(Ordering::SeqCst) >= 1);
    }
}
