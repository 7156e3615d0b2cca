// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire-level types for the beacon telemetry client: identifiers, DSNs,
//! payload structs and the envelope container format. Everything in this
//! crate is pure data and codecs; transport and policy live elsewhere.

pub mod category;
pub mod client_report;
pub mod dsc;
pub mod dsn;
pub mod envelope;
pub mod event;
pub mod ids;
pub mod metric;
pub mod session;
pub mod span;

pub use category::{Category, DiscardReason};
pub use client_report::{ClientReport, DiscardedItem};
pub use dsc::{DynamicSamplingContext, TraceHeader, BAGGAGE_HEADER, TRACE_HEADER};
pub use dsn::{Dsn, DsnParseError};
pub use envelope::{Envelope, EnvelopeHeader, EnvelopeItem, ItemHeader, ItemType, ParseError};
pub use event::{Breadcrumb, Event, Exception, Frame, Level, Stacktrace, TraceContext, User};
pub use ids::{EventId, SpanId, TraceId};
pub use metric::{Metric, MetricBatch, MetricKind};
pub use session::{Session, SessionAggregates, SessionBucket, SessionStatus};
pub use span::{SpanData, SpanLink, SpanStatus};

/// Current unix time as float seconds, the timestamp format used by all
/// event and span payloads.
pub fn unix_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
