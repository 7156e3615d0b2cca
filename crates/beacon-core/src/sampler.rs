// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The trace sampling decision.
//!
//! Only root spans are ever sampled; descendants inherit the root's
//! decision untouched. The per-trace `sample_rand` is drawn once at root
//! creation, so re-evaluating a decision can never flip it.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;
use tracing::warn;

/// Inputs handed to a user-supplied sampling callback.
pub struct SamplingContext<'a> {
    pub name: &'a str,
    pub op: &'a str,
    pub attributes: &'a BTreeMap<String, Value>,
    /// Sampling flag of a remote parent, when continuing a trace whose
    /// head made no decision.
    pub parent_sampled: Option<bool>,
}

/// User-supplied sampling callback, returning the sample rate to apply.
pub type TracesSampler = dyn Fn(&SamplingContext<'_>) -> f64 + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingDecision {
    pub sampled: bool,
    /// The rate the decision was made with, recorded for downstream
    /// consumers. `None` when no valid rate applied.
    pub sample_rate: Option<f64>,
}

impl SamplingDecision {
    pub fn unsampled() -> Self {
        SamplingDecision {
            sampled: false,
            sample_rate: None,
        }
    }
}

/// Resolves a root-span sampling decision.
///
/// Precedence: explicit per-call override, then the user callback, then
/// the fixed rate. A panicking callback counts as rate 0 (fail closed,
/// never into the caller); rates outside [0, 1] are an error and leave
/// the trace unsampled.
pub(crate) fn decide(
    explicit: Option<bool>,
    sampler: Option<&TracesSampler>,
    fixed_rate: Option<f64>,
    ctx: &SamplingContext<'_>,
    sample_rand: f64,
) -> SamplingDecision {
    if let Some(sampled) = explicit {
        return SamplingDecision {
            sampled,
            sample_rate: Some(if sampled { 1.0 } else { 0.0 }),
        };
    }

    if let Some(sampler) = sampler {
        let rate = match catch_unwind(AssertUnwindSafe(|| sampler(ctx))) {
            Ok(rate) => rate,
            Err(_) => {
                warn!("traces sampler panicked, treating the trace as unsampled");
                0.0
            }
        };
        return decision_from_rate(rate, sample_rand);
    }

    match fixed_rate {
        Some(rate) => decision_from_rate(rate, sample_rand),
        None => SamplingDecision::unsampled(),
    }
}

fn decision_from_rate(rate: f64, sample_rand: f64) -> SamplingDecision {
    if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
        warn!("sample rate {rate} is outside [0, 1], treating the trace as unsampled");
        return SamplingDecision::unsampled();
    }
    SamplingDecision {
        sampled: sample_rand < rate,
        sample_rate: Some(rate),
    }
}
