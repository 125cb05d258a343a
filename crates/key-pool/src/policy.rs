//! Rotation policy: turn one upstream result into a retry decision
//!
//! Two modes share the same failure handling (transport errors, 429/403 and
//! the provider's quota message all rotate). They differ in how healthy keys
//! are retired:
//! - usage-count: rotate before the attempt once a key has served
//!   `max_requests_per_key` successful requests
//! - signal-driven: rotate after a success whose remaining-budget header is at
//!   or below `low_water_mark`

use std::time::Duration;

use upstream::{REMAINING_REQUESTS_HEADER, TransportError, UpstreamResponse};

/// Message the provider returns once a key has spent its daily allowance.
pub const DEFAULT_QUOTA_MARKER: &str =
    "You have exceeded the DAILY quota for Requests on your current plan";

pub const DEFAULT_LOW_WATER_MARK: i64 = 10;

pub const DEFAULT_MAX_REQUESTS_PER_KEY: u64 = 450;

/// Attempt bound for usage-count mode when none is configured.
pub const DEFAULT_USAGE_COUNT_ATTEMPTS: usize = 3;

/// Upper bound on the upstream body echoed into a fatal error.
const MAX_ERROR_BODY_CHARS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationMode {
    UsageCount { max_requests_per_key: u64 },
    SignalDriven { low_water_mark: i64 },
}

/// Why an attempt rotated to the next key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateReason {
    Transport,
    RateLimited,
    QuotaExceeded,
}

impl RotateReason {
    pub fn label(&self) -> &'static str {
        match self {
            RotateReason::Transport => "transport",
            RotateReason::RateLimited => "rate-limited",
            RotateReason::QuotaExceeded => "quota-exceeded",
        }
    }
}

/// Classification of a single attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Return this response. `rotate_next` asks the executor to move off the
    /// key for subsequent calls because its remaining budget is low.
    Success {
        response: UpstreamResponse,
        rotate_next: bool,
    },
    RotateAndRetry(RotateReason),
    /// Terminal for the whole call; no further attempts.
    FatalError { status: u16, body: String },
}

/// Rotation configuration shared by every call through one executor.
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    mode: RotationMode,
    max_attempts: Option<usize>,
    quota_marker: String,
    exhaustion_cooldown: Option<Duration>,
}

impl RotationPolicy {
    pub fn new(mode: RotationMode) -> Self {
        Self {
            mode,
            max_attempts: None,
            quota_marker: DEFAULT_QUOTA_MARKER.to_string(),
            exhaustion_cooldown: None,
        }
    }

    pub fn signal_driven() -> Self {
        Self::new(RotationMode::SignalDriven {
            low_water_mark: DEFAULT_LOW_WATER_MARK,
        })
    }

    pub fn usage_count(max_requests_per_key: u64) -> Self {
        Self::new(RotationMode::UsageCount {
            max_requests_per_key,
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_quota_marker(mut self, marker: impl Into<String>) -> Self {
        self.quota_marker = marker.into();
        self
    }

    /// After a full failed pass, refuse calls for `cooldown` instead of
    /// letting the next call retry the same keys straight away.
    pub fn with_exhaustion_cooldown(mut self, cooldown: Duration) -> Self {
        self.exhaustion_cooldown = if cooldown.is_zero() {
            None
        } else {
            Some(cooldown)
        };
        self
    }

    pub fn mode(&self) -> &RotationMode {
        &self.mode
    }

    pub fn exhaustion_cooldown(&self) -> Option<Duration> {
        self.exhaustion_cooldown
    }

    /// Attempts allowed per call: the configured bound, else one pass over
    /// the pool (signal-driven) or `DEFAULT_USAGE_COUNT_ATTEMPTS` (usage-count).
    pub fn attempt_bound(&self, pool_size: usize) -> usize {
        match (self.max_attempts, &self.mode) {
            (Some(n), _) => n,
            (None, RotationMode::SignalDriven { .. }) => pool_size,
            (None, RotationMode::UsageCount { .. }) => DEFAULT_USAGE_COUNT_ATTEMPTS,
        }
    }

    /// Classify the result of one attempt.
    ///
    /// Order: transport failure, 429/403, quota marker in a non-2xx body,
    /// other non-2xx (fatal), then 2xx with the optional low-budget check.
    pub fn classify(
        &self,
        result: std::result::Result<UpstreamResponse, TransportError>,
    ) -> AttemptOutcome {
        let response = match result {
            Ok(r) => r,
            Err(_) => return AttemptOutcome::RotateAndRetry(RotateReason::Transport),
        };

        if !response.is_success() {
            if matches!(response.status, 429 | 403) {
                return AttemptOutcome::RotateAndRetry(RotateReason::RateLimited);
            }
            let body = response.text();
            if !self.quota_marker.is_empty() && body.contains(self.quota_marker.as_str()) {
                return AttemptOutcome::RotateAndRetry(RotateReason::QuotaExceeded);
            }
            return AttemptOutcome::FatalError {
                status: response.status,
                body: truncate(&body, MAX_ERROR_BODY_CHARS),
            };
        }

        let rotate_next = match self.mode {
            RotationMode::SignalDriven { low_water_mark } => response
                .header_i64(REMAINING_REQUESTS_HEADER)
                .is_some_and(|remaining| remaining <= low_water_mark),
            RotationMode::UsageCount { .. } => false,
        };

        AttemptOutcome::Success {
            response,
            rotate_next,
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
