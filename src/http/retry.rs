//! Attempt budgeting for configuration fetches.

// self
use crate::{_prelude::*, cache::state::deadline_after, config::RetryPolicy};

/// Result of budgeting an attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptBudget {
	/// Another attempt may run within `timeout`.
	Granted {
		/// Time allotted to the attempt.
		timeout: Duration,
	},
	/// The overall deadline has passed.
	Exhausted,
}

/// Tracks retries and the overall deadline of one fetch.
#[derive(Debug)]
pub struct RetryExecutor<'a> {
	policy: &'a RetryPolicy,
	deadline: Instant,
	retries_used: u32,
}
impl<'a> RetryExecutor<'a> {
	/// Start a retry sequence now.
	pub fn new(policy: &'a RetryPolicy) -> Self {
		let deadline = deadline_after(Instant::now(), policy.deadline);

		Self { policy, deadline, retries_used: 0 }
	}

	/// Budget the next attempt: the per-attempt timeout, shortened to the remaining deadline.
	pub fn attempt_budget(&self) -> AttemptBudget {
		let timeout = self.remaining_budget().min(self.policy.attempt_timeout);

		if timeout.is_zero() { AttemptBudget::Exhausted } else { AttemptBudget::Granted { timeout } }
	}

	/// Remaining time before the overall deadline.
	pub fn remaining_budget(&self) -> Duration {
		self.deadline.saturating_duration_since(Instant::now())
	}

	/// Number of retries consumed so far.
	pub fn retries_used(&self) -> u32 {
		self.retries_used
	}

	/// Consume a retry and return its delay, or `None` when the policy is exhausted.
	pub fn next_backoff(&mut self) -> Option<Duration> {
		if self.retries_used >= self.policy.max_retries {
			tracing::debug!(retries = self.retries_used, "retry budget exhausted");

			return None;
		}

		let attempt = self.retries_used;

		self.retries_used += 1;

		let delay = self.policy.compute_backoff(attempt).min(self.remaining_budget());

		tracing::debug!(attempt = attempt + 1, ?delay, "retry backoff computed");

		Some(delay)
	}
}
