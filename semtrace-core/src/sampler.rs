//! Tail-based sampler (C5).
//!
//! The retention decision is made after the trace record is fully
//! assembled, so it can account for latency, status, and errors that were
//! unknown when the request started.

use rand::Rng as _;

use crate::config::SamplingConfig;
use crate::ids::CorrelationId;
use crate::record::ActionExecution;

/// Stable label used for metrics and test assertions; each variant names
/// the rule that produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleReason {
    SamplingDisabled,
    HeadSamplingRejected,
    ErrorDetected,
    SlowTrace,
    CriticalActionType,
    CriticalObjectType,
    StatusMatch,
    BaseRateSampling,
    BaseRateRejected,
}

impl SampleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SamplingDisabled => "sampling_disabled",
            Self::HeadSamplingRejected => "head_sampling_rejected",
            Self::ErrorDetected => "error_detected",
            Self::SlowTrace => "slow_trace",
            Self::CriticalActionType => "critical_action_type",
            Self::CriticalObjectType => "critical_object_type",
            Self::StatusMatch => "status_match",
            Self::BaseRateSampling => "base_rate_sampling",
            Self::BaseRateRejected => "base_rate_rejected",
        }
    }
}

/// Result of evaluating the sampler for one trace record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleDecision {
    pub should_sample: bool,
    pub reason: SampleReason,
    pub rate: f64,
}

/// FNV-1a, used so the same correlation ID always hashes to the same value
/// across services without sharing any state.
fn fnv1a_hash(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    bytes.iter().fold(OFFSET_BASIS, |hash, &b| (hash ^ b as u64).wrapping_mul(PRIME))
}

/// Map a correlation ID deterministically into `[0, 1)`.
fn deterministic_unit_interval(correlation_id: &CorrelationId) -> f64 {
    let hash = fnv1a_hash(correlation_id.as_str().as_bytes());
    (hash as f64) / (u64::MAX as f64)
}

fn probabilistic_draw(rate: f64, deterministic: bool, correlation_id: &CorrelationId) -> bool {
    if deterministic {
        deterministic_unit_interval(correlation_id) < rate
    } else {
        rand::rng().random::<f64>() < rate
    }
}

/// Evaluate the sampler for a fully assembled trace record.
pub fn evaluate(record: &ActionExecution, config: &SamplingConfig, correlation_id: &CorrelationId) -> SampleDecision {
    if !config.enabled {
        return SampleDecision { should_sample: true, reason: SampleReason::SamplingDisabled, rate: 1.0 };
    }

    if let Some(head_rate) = config.head_sampling_rate {
        if !probabilistic_draw(head_rate, config.deterministic_sampling, correlation_id) {
            return SampleDecision {
                should_sample: false,
                reason: SampleReason::HeadSamplingRejected,
                rate: head_rate,
            };
        }
    }

    if config.always_sample_errors && record.error_message.is_some() {
        return SampleDecision { should_sample: true, reason: SampleReason::ErrorDetected, rate: 1.0 };
    }

    if config.always_sample_slow && record.duration_ms > config.slow_threshold_ms as i64 {
        return SampleDecision { should_sample: true, reason: SampleReason::SlowTrace, rate: 1.0 };
    }

    if config.always_keep_action_types.iter().any(|t| t == &record.action_type) {
        return SampleDecision { should_sample: true, reason: SampleReason::CriticalActionType, rate: 1.0 };
    }

    if config.always_keep_object_types.iter().any(|t| t == &record.object_type) {
        return SampleDecision { should_sample: true, reason: SampleReason::CriticalObjectType, rate: 1.0 };
    }

    if config.always_keep_statuses.iter().any(|s| s == &record.action_status) {
        return SampleDecision { should_sample: true, reason: SampleReason::StatusMatch, rate: 1.0 };
    }

    let kept = probabilistic_draw(config.base_rate, config.deterministic_sampling, correlation_id);
    SampleDecision {
        should_sample: kept,
        reason: if kept { SampleReason::BaseRateSampling } else { SampleReason::BaseRateRejected },
        rate: config.base_rate,
    }
}
