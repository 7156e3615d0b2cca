// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Store-and-forward transport for the beacon telemetry client: bounded
//! concurrent envelope delivery, per-category rate-limit backoff and drop
//! accounting.

pub mod outcomes;
pub mod rate_limit;
pub mod report_flusher;
pub mod transport;

pub use outcomes::OutcomeRecorder;
pub use rate_limit::{RateLimiter, DEFAULT_RETRY_AFTER, RATE_LIMITS_HEADER};
pub use report_flusher::ReportFlusher;
pub use transport::{Transport, TransportConfig, TransportError, AUTH_HEADER, ENVELOPE_CONTENT_TYPE};
