// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process telemetry client: capture errors, messages and trace spans,
//! sample them, enrich them with scoped context and ship them to a
//! collector as envelopes.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use beacon_core::{Client, ClientOptions, Hub, SpanOptions};
//!
//! # async fn run() -> Result<(), beacon_core::ClientError> {
//! let mut options = ClientOptions::from_env();
//! options.traces_sample_rate = Some(0.2);
//! let client = Client::new(options)?;
//! let hub = Hub::new(Arc::clone(&client));
//!
//! hub.with_isolation_scope(|hub| {
//!     hub.configure_scope(|scope| scope.set_tag("endpoint", "/users"));
//!     hub.start_span(SpanOptions::new("GET /users", "http.server"), |hub, _span| {
//!         if let Err(err) = handle_request() {
//!             hub.capture_error(&*err);
//!         }
//!     });
//! });
//!
//! hub.end_session();
//! client.close(Duration::from_secs(2)).await;
//! # Ok(())
//! # }
//! # fn handle_request() -> Result<(), Box<dyn std::error::Error>> { Ok(()) }
//! ```

pub mod client;
pub mod hub;
pub mod options;
pub mod pipeline;
pub mod sampler;
pub mod scope;
mod sessions;
pub mod span;

pub use client::{Client, ClientError};
pub use hub::{event_from_error, Hub};
pub use options::{ClientOptions, USER_AGENT};
pub use pipeline::{Attachment, EventProcessor, Hint};
pub use sampler::{SamplingContext, SamplingDecision, TracesSampler};
pub use scope::Scope;
pub use span::{RemoteContext, Span, SpanOptions};

pub use beacon_protocol::{
    Breadcrumb, Event, EventId, Exception, Frame, Level, Metric, MetricBatch, MetricKind,
    SessionStatus, SpanId, SpanStatus, Stacktrace, TraceId, User,
};
