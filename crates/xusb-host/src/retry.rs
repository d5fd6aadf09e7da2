//! Bounded busy-wait combinators.
//!
//! Every wait in the driver goes through one of these two helpers so that no loop can spin
//! forever on a wedged controller or device.

use crate::platform::Delay;

/// Attempt count and inter-attempt delay for [`retry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_us: u32,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay_us: u32) -> Self {
        Self {
            max_attempts,
            delay_us,
        }
    }

    /// A single attempt with no delay.
    pub const fn once() -> Self {
        Self::new(1, 0)
    }
}

/// Outcome of one attempt inside [`retry`].
#[derive(Debug, PartialEq, Eq)]
pub enum Attempt<T, E> {
    /// Stop retrying and return this result.
    Done(Result<T, E>),
    /// The attempt failed transiently; try again if the budget allows.
    Again(E),
}

impl<T, E> Attempt<T, E> {
    /// Classifies `result` with `retryable`, keeping successes and non-retryable errors terminal.
    pub fn from_result(result: Result<T, E>, retryable: impl FnOnce(&E) -> bool) -> Self {
        match result {
            Err(e) if retryable(&e) => Attempt::Again(e),
            other => Attempt::Done(other),
        }
    }
}

/// Runs `op` until it returns [`Attempt::Done`] or `policy.max_attempts` attempts have been made.
///
/// `op` receives the context and the zero-based attempt index. The delay is only inserted between
/// attempts, never after the last one. When the budget is exhausted the error of the last attempt
/// is returned.
pub fn retry<C, T, E>(
    ctx: &mut C,
    policy: RetryPolicy,
    mut op: impl FnMut(&mut C, u32) -> Attempt<T, E>,
) -> Result<T, E>
where
    C: Delay + ?Sized,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op(ctx, attempt) {
            Attempt::Done(result) => return result,
            Attempt::Again(err) => {
                attempt += 1;
                if attempt >= attempts {
                    tracing::warn!(attempts, "retry budget exhausted");
                    return Err(err);
                }
                if policy.delay_us != 0 {
                    ctx.delay_us(policy.delay_us);
                }
            }
        }
    }
}

/// Polls `probe` up to `polls` times, sleeping `step_us` after each miss.
///
/// Returns the first `Some` produced by `probe`, or `None` when the budget runs out.
pub fn poll_until<C, T>(
    ctx: &mut C,
    polls: u32,
    step_us: u32,
    mut probe: impl FnMut(&mut C) -> Option<T>,
) -> Option<T>
where
    C: Delay + ?Sized,
{
    for _ in 0..polls {
        if let Some(v) = probe(ctx) {
            return Some(v);
        }
        ctx.delay_us(step_us);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Default)]
    struct CountingDelay {
        total_us: u64,
        calls: u32,
    }

    impl Delay for CountingDelay {
        fn delay_us(&mut self, us: u32) {
            self.total_us += u64::from(us);
            self.calls += 1;
        }
    }

    #[test]
    fn retry_returns_first_success() {
        let mut d = CountingDelay::default();
        let out: Result<u32, &str> = retry(&mut d, RetryPolicy::new(3, 1000), |_, n| {
            if n == 1 {
                Attempt::Done(Ok(7))
            } else {
                Attempt::Again("busy")
            }
        });
        assert_eq!(out, Ok(7));
        assert_eq!(d.calls, 1);
        assert_eq!(d.total_us, 1000);
    }

    #[test]
    fn terminal_error_is_not_retried() {
        let mut d = CountingDelay::default();
        let mut calls = 0;
        let out: Result<(), &str> = retry(&mut d, RetryPolicy::new(3, 10), |_, _| {
            calls += 1;
            Attempt::Done(Err("stall"))
        });
        assert_eq!(out, Err("stall"));
        assert_eq!(calls, 1);
        assert_eq!(d.calls, 0);
    }

    #[test]
    fn zero_attempt_policy_still_runs_once() {
        let mut d = CountingDelay::default();
        let mut calls = 0;
        let out: Result<(), u32> = retry(&mut d, RetryPolicy::new(0, 10), |_, n| {
            calls += 1;
            Attempt::Again(n)
        });
        assert_eq!(out, Err(0));
        assert_eq!(calls, 1);
    }

    #[test]
    fn poll_until_gives_up_after_budget() {
        let mut d = CountingDelay::default();
        let mut probes = 0;
        let out: Option<()> = poll_until(&mut d, 5, 10, |_| {
            probes += 1;
            None
        });
        assert_eq!(out, None);
        assert_eq!(probes, 5);
        assert_eq!(d.total_us, 50);
    }

    proptest! {
        #[test]
        fn retry_makes_exactly_max_attempts_and_returns_last_error(max in 1u32..16) {
            let mut d = CountingDelay::default();
            let mut calls = 0u32;
            let out: Result<(), u32> = retry(&mut d, RetryPolicy::new(max, 1000), |_, n| {
                calls += 1;
                Attempt::Again(n)
            });
            prop_assert_eq!(calls, max);
            prop_assert_eq!(out, Err(max - 1));
            prop_assert_eq!(d.calls, max - 1);
        }
    }
}
