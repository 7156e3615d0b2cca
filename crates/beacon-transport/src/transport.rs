// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The outbound HTTP transport.
//!
//! Envelopes are checked against the rate-limit map, admitted against a
//! bounded in-flight counter and dispatched on detached tokio tasks, so
//! sends may complete out of order. There is no retry of a failed send;
//! the only recovery path is rate-limit expiry unblocking future sends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use beacon_protocol::{Category, DiscardReason, Dsn, Envelope};

use crate::outcomes::OutcomeRecorder;
use crate::rate_limit::{RateLimiter, DEFAULT_RETRY_AFTER, RATE_LIMITS_HEADER};

/// Request header carrying the client auth derived from the DSN.
pub const AUTH_HEADER: &str = "X-Beacon-Auth";
/// Content type of an encoded envelope body.
pub const ENVELOPE_CONTENT_TYPE: &str = "application/x-beacon-envelope";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to build http client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

pub struct TransportConfig {
    pub dsn: Dsn,
    /// Per-request timeout.
    pub timeout: Duration,
    pub https_proxy: Option<String>,
    /// Maximum number of concurrently outstanding requests.
    pub max_in_flight: usize,
    /// Client identifier reported in the auth header.
    pub user_agent: String,
}

pub struct Transport {
    client: reqwest::Client,
    url: String,
    auth: String,
    limits: Arc<Mutex<RateLimiter>>,
    outcomes: OutcomeRecorder,
    in_flight: Arc<Semaphore>,
    max_in_flight: usize,
    closed: AtomicBool,
}

impl Transport {
    pub fn new(config: TransportConfig, outcomes: OutcomeRecorder) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder().timeout(config.timeout);
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(reqwest::Proxy::https(proxy)?);
        }
        let client = builder.build()?;
        let max_in_flight = config.max_in_flight.max(1);

        Ok(Transport {
            client,
            url: config.dsn.envelope_url(),
            auth: config.dsn.auth_header(&config.user_agent),
            limits: Arc::new(Mutex::new(RateLimiter::new())),
            outcomes,
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            closed: AtomicBool::new(false),
        })
    }

    /// Hands an envelope to the network. Returns immediately; delivery
    /// and failure accounting happen on a detached task.
    pub fn send(&self, mut envelope: Envelope) {
        if self.closed.load(Ordering::SeqCst) {
            debug!("transport closed, dropping envelope");
            self.record_items(&envelope, DiscardReason::QueueOverflow);
            return;
        }

        {
            #[allow(clippy::expect_used)]
            let limits = self.limits.lock().expect("lock poisoned");
            let now = Instant::now();
            let outcomes = &self.outcomes;
            envelope.items.retain(|item| {
                let limited = limits.is_limited_at(item.category(), now);
                if limited {
                    outcomes.record(DiscardReason::RatelimitBackoff, item.category());
                }
                !limited
            });
        }
        if envelope.is_empty() {
            debug!("every envelope item is rate limited, skipping send");
            return;
        }

        let permit = match Arc::clone(&self.in_flight).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                warn!("transport at capacity, dropping envelope");
                self.record_items(&envelope, DiscardReason::QueueOverflow);
                return;
            }
        };

        let body = match envelope.to_bytes() {
            Ok(body) => body,
            Err(err) => {
                error!("failed to encode envelope: {err}");
                self.record_items(&envelope, DiscardReason::InternalSdkError);
                return;
            }
        };
        let categories: Vec<Category> = envelope.items.iter().map(|item| item.category()).collect();

        let request = self
            .client
            .post(&self.url)
            .header(AUTH_HEADER, &self.auth)
            .header(CONTENT_TYPE, ENVELOPE_CONTENT_TYPE)
            .body(body);
        let limits = Arc::clone(&self.limits);
        let outcomes = self.outcomes.clone();

        tokio::spawn(async move {
            let _permit = permit;
            match request.send().await {
                Ok(response) => handle_response(response, &categories, &limits, &outcomes),
                Err(err) => {
                    warn!("envelope send failed: {err}");
                    for category in categories {
                        outcomes.record(DiscardReason::NetworkError, category);
                    }
                }
            }
        });
    }

    /// Waits for every outstanding send to resolve. Never aborts an
    /// in-flight request; returns false if the deadline passed first.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let drained = Arc::clone(&self.in_flight).acquire_many_owned(self.max_in_flight as u32);
        matches!(tokio::time::timeout(timeout, drained).await, Ok(Ok(_)))
    }

    /// Flushes, then permanently rejects new sends. Safe to call more
    /// than once; later calls just flush again.
    pub async fn close(&self, timeout: Duration) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        self.flush(timeout).await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record_items(&self, envelope: &Envelope, reason: DiscardReason) {
        for item in &envelope.items {
            self.outcomes.record(reason, item.category());
        }
    }
}

fn handle_response(
    response: reqwest::Response,
    categories: &[Category],
    limits: &Mutex<RateLimiter>,
    outcomes: &OutcomeRecorder,
) {
    let status = response.status();
    let rate_limit_header = response
        .headers()
        .get(RATE_LIMITS_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    if let Some(header) = &rate_limit_header {
        #[allow(clippy::expect_used)]
        limits
            .lock()
            .expect("lock poisoned")
            .update_from_header(header, Instant::now());
    }

    if status.is_success() {
        debug!("envelope accepted by collector");
        return;
    }

    if status == StatusCode::TOO_MANY_REQUESTS || rate_limit_header.is_some() {
        if rate_limit_header.is_none() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<f64>().ok())
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            #[allow(clippy::expect_used)]
            limits
                .lock()
                .expect("lock poisoned")
                .update_from_retry_after(retry_after, Instant::now());
        }
        warn!("collector rate limited the envelope: {status}");
        for category in categories {
            outcomes.record(DiscardReason::RatelimitBackoff, *category);
        }
        return;
    }

    warn!("collector rejected envelope: {status}");
    for category in categories {
        outcomes.record(DiscardReason::NetworkError, *category);
    }
}
