// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Session aggregation: one record per isolation context, rolled up into
//! started-minute buckets and flushed on a timer as a single envelope
//! item.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use beacon_protocol::{
    Envelope, EnvelopeHeader, EnvelopeItem, Session, SessionAggregates, SessionBucket,
    SessionStatus,
};
use beacon_transport::Transport;

fn minute_bucket(started: DateTime<Utc>) -> DateTime<Utc> {
    let ts = started.timestamp();
    DateTime::from_timestamp(ts - ts.rem_euclid(60), 0).unwrap_or(started)
}

/// Shared rollup of ended sessions.
#[derive(Clone, Default)]
pub(crate) struct SessionAggregator {
    buckets: Arc<Mutex<BTreeMap<DateTime<Utc>, SessionBucket>>>,
}

impl SessionAggregator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Folds one ended session into its started-minute bucket.
    pub(crate) fn record(&self, session: &Session) {
        let started = minute_bucket(session.started);
        #[allow(clippy::expect_used)]
        let mut buckets = self.buckets.lock().expect("lock poisoned");
        let bucket = buckets.entry(started).or_insert_with(|| SessionBucket {
            started,
            ..Default::default()
        });
        if session.status == SessionStatus::Crashed {
            bucket.crashed += 1;
        } else if session.errors > 0 || session.status == SessionStatus::Errored {
            bucket.errored += 1;
        } else {
            bucket.exited += 1;
        }
    }

    /// Drains all buckets. `None` when nothing was recorded.
    pub(crate) fn take_aggregates(&self) -> Option<SessionAggregates> {
        let drained = {
            #[allow(clippy::expect_used)]
            let mut buckets = self.buckets.lock().expect("lock poisoned");
            std::mem::take(&mut *buckets)
        };
        if drained.is_empty() {
            return None;
        }
        Some(SessionAggregates {
            aggregates: drained.into_values().collect(),
        })
    }
}

/// Background loop shipping session aggregates through the transport.
pub(crate) struct SessionFlusher {
    aggregator: SessionAggregator,
    transport: Arc<Transport>,
    interval: Duration,
    cancel: CancellationToken,
}

impl SessionFlusher {
    pub(crate) fn new(
        aggregator: SessionAggregator,
        transport: Arc<Transport>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        SessionFlusher {
            aggregator,
            transport,
            interval,
            cancel,
        }
    }

    pub(crate) async fn spin(&self) {
        debug!("session flusher started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => self.flush_now(),
                _ = self.cancel.cancelled() => {
                    self.flush_now();
                    break;
                }
            }
        }
        debug!("session flusher stopped");
    }

    pub(crate) fn flush_now(&self) {
        let Some(aggregates) = self.aggregator.take_aggregates() else {
            return;
        };
        let item = match EnvelopeItem::from_sessions(&aggregates) {
            Ok(item) => item,
            Err(err) => {
                error!("failed to serialize session aggregates: {err}");
                return;
            }
        };
        let mut envelope = Envelope::new(EnvelopeHeader::new());
        envelope.add_item(item);
        self.transport.send(envelope);
    }
}
