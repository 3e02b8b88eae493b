//! Work request polling

use crate::client::CloudApiClient;
use crate::error::{ReconcileError, Result};
use crate::retry::{BackoffPolicy, retry_transient_until};
use crate::work_request::{WorkRequest, WorkRequestStatus};
use std::time::Duration;
use tokio::time::{Instant, sleep};

/// Time budget and cadence for one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollOptions {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Read `work_request_id` until it reaches a terminal status.
///
/// Each read goes through `policy`; between reads the task sleeps
/// `options.interval`. Neither those sleeps nor retry backoff run past the
/// deadline. Reaching the deadline with a non-terminal status fails with
/// [`ReconcileError::PollTimeout`].
pub async fn poll_work_request<C>(
    client: &C,
    work_request_id: &str,
    options: PollOptions,
    policy: &BackoffPolicy,
) -> Result<WorkRequest>
where
    C: CloudApiClient + ?Sized,
{
    let started = Instant::now();
    let deadline = started + options.timeout;
    let mut reads = 0u32;
    let mut last_status: Option<WorkRequestStatus> = None;

    loop {
        let work_request =
            retry_transient_until(policy, "get_work_request", Some(deadline), || {
                client.get_work_request(work_request_id)
            })
            .await?;
        reads += 1;

        if let Some(previous) = last_status {
            if !previous.can_transition_to(work_request.status) {
                tracing::warn!(
                    work_request_id = %work_request_id,
                    from = %previous,
                    to = %work_request.status,
                    "Unexpected work request status transition"
                );
            }
        }

        tracing::debug!(
            work_request_id = %work_request_id,
            status = %work_request.status,
            percent_complete = work_request.percent_complete,
            reads = reads,
            "Polled work request"
        );

        if work_request.is_terminal() {
            tracing::info!(
                work_request_id = %work_request_id,
                status = %work_request.status,
                reads = reads,
                "Work request reached terminal state"
            );
            return Ok(work_request);
        }
        last_status = Some(work_request.status);

        let elapsed = started.elapsed();
        if elapsed >= options.timeout {
            tracing::warn!(
                work_request_id = %work_request_id,
                status = %work_request.status,
                reads = reads,
                "Work request polling timed out"
            );
            return Err(ReconcileError::PollTimeout {
                work_request_id: work_request_id.to_string(),
                last_status: work_request.status,
                timeout: options.timeout,
                reads,
            });
        }

        sleep(options.interval.min(options.timeout - elapsed)).await;
    }
}
