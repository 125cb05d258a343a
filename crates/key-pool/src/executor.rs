//! Bounded retry loop over the key pool

use std::sync::Arc;

use tracing::{debug, instrument, warn};
use upstream::{Transport, UpstreamRequest, UpstreamResponse, inject_credentials};

use crate::error::{Error, Result};
use crate::policy::{AttemptOutcome, RotateReason, RotationMode, RotationPolicy};
use crate::pool::{KeyLease, KeyPool};

/// Runs one logical upstream call, rotating keys until it succeeds, hits a
/// fatal response, or spends its attempt budget.
pub struct RetryExecutor {
    pool: Arc<KeyPool>,
    policy: RotationPolicy,
    transport: Arc<dyn Transport>,
    upstream_host: String,
}

impl RetryExecutor {
    /// `upstream_host` is sent as `X-RapidAPI-Host` on every attempt.
    pub fn new(
        pool: Arc<KeyPool>,
        policy: RotationPolicy,
        transport: Arc<dyn Transport>,
        upstream_host: impl Into<String>,
    ) -> Self {
        Self {
            pool,
            policy,
            transport,
            upstream_host: upstream_host.into(),
        }
    }

    pub fn pool(&self) -> &Arc<KeyPool> {
        &self.pool
    }

    pub fn policy(&self) -> &RotationPolicy {
        &self.policy
    }

    async fn select_key(&self) -> KeyLease {
        match self.policy.mode() {
            RotationMode::UsageCount {
                max_requests_per_key,
            } => {
                let (lease, skipped) = self
                    .pool
                    .advance_past_saturated(*max_requests_per_key)
                    .await;
                if skipped > 0 {
                    metrics::counter!("key_pool_rotations_total", "reason" => "usage-threshold")
                        .increment(skipped as u64);
                }
                lease
            }
            RotationMode::SignalDriven { .. } => self.pool.current().await,
        }
    }

    async fn rotate_after(&self, lease: &KeyLease, reason: &'static str) {
        let next = self.pool.rotate_past(lease.index).await;
        metrics::counter!("key_pool_rotations_total", "reason" => reason).increment(1);
        debug!(
            from_index = lease.index,
            to_index = next.index,
            reason,
            "rotated key"
        );
    }

    /// Execute `template` with credential headers for the active key.
    ///
    /// Makes at most `policy.attempt_bound(pool.len())` outbound calls.
    #[instrument(skip_all, fields(url = %template.url, transport = self.transport.id()))]
    pub async fn execute(&self, template: &UpstreamRequest) -> Result<UpstreamResponse> {
        if let Some(remaining) = self.pool.cooldown_remaining().await {
            return Err(Error::CoolingDown {
                retry_after_secs: remaining.as_secs().max(1),
            });
        }

        let max_attempts = self.policy.attempt_bound(self.pool.len());
        let mut attempts = 0usize;

        while attempts < max_attempts {
            let lease = self.select_key().await;

            let mut request = template.clone();
            inject_credentials(&mut request.headers, lease.key.expose(), &self.upstream_host)
                .map_err(|e| Error::InvalidCredential(format!("key #{}: {e}", lease.index)))?;

            let result = self.transport.send(request).await;
            if let Err(ref e) = result {
                warn!(
                    key_index = lease.index,
                    key = %lease.key.hint(),
                    error = %e,
                    "upstream transport error"
                );
            }

            match self.policy.classify(result) {
                AttemptOutcome::Success {
                    response,
                    rotate_next,
                } => {
                    self.pool.record_usage(lease.index).await;
                    if rotate_next {
                        warn!(
                            key_index = lease.index,
                            "low remaining requests for key, rotating for next call"
                        );
                        self.rotate_after(&lease, "low-remaining").await;
                    }
                    debug!(
                        key_index = lease.index,
                        attempts = attempts + 1,
                        "upstream call succeeded"
                    );
                    return Ok(response);
                }
                AttemptOutcome::RotateAndRetry(reason) => {
                    log_rotation(&lease, reason, attempts + 1, max_attempts);
                    self.rotate_after(&lease, reason.label()).await;
                    attempts += 1;
                }
                AttemptOutcome::FatalError { status, body } => {
                    warn!(key_index = lease.index, status, "upstream returned fatal status");
                    return Err(Error::UpstreamHttp { status, body });
                }
            }
        }

        if matches!(self.policy.mode(), RotationMode::UsageCount { .. }) {
            self.pool.reset_usage().await;
        }
        if let Some(cooldown) = self.policy.exhaustion_cooldown() {
            self.pool.begin_cooldown(cooldown).await;
        }
        warn!(attempts, "all keys failed within attempt bound");
        Err(Error::AllKeysExhausted { attempts })
    }
}

fn log_rotation(lease: &KeyLease, reason: RotateReason, attempt: usize, max_attempts: usize) {
    match reason {
        RotateReason::QuotaExceeded => warn!(
            key_index = lease.index,
            attempt, max_attempts, "key exceeded daily quota, rotating"
        ),
        RotateReason::RateLimited => warn!(
            key_index = lease.index,
            attempt, max_attempts, "rate limit hit for key, rotating"
        ),
        RotateReason::Transport => warn!(
            key_index = lease.index,
            attempt, max_attempts, "request failed for key, rotating"
        ),
    }
}
