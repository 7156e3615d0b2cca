// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background loop shipping accumulated drop counters as client reports.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use beacon_protocol::{Envelope, EnvelopeHeader, EnvelopeItem};

use crate::outcomes::OutcomeRecorder;
use crate::transport::Transport;

pub struct ReportFlusher {
    transport: Arc<Transport>,
    outcomes: OutcomeRecorder,
    interval: Duration,
    cancel: CancellationToken,
}

impl ReportFlusher {
    pub fn new(
        transport: Arc<Transport>,
        outcomes: OutcomeRecorder,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        ReportFlusher {
            transport,
            outcomes,
            interval,
            cancel,
        }
    }

    /// Runs until the cancellation token fires, flushing one report per
    /// interval. A final flush happens on the way out.
    pub async fn spin(&self) {
        debug!("client report flusher started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => self.flush_now(),
                _ = self.cancel.cancelled() => {
                    self.flush_now();
                    break;
                }
            }
        }
        debug!("client report flusher stopped");
    }

    /// Builds and submits one report from the current counters. The
    /// counters are already reset when the send starts, so a report that
    /// fails to deliver is simply lost.
    pub fn flush_now(&self) {
        let Some(report) = self.outcomes.take_report() else {
            return;
        };
        let item = match EnvelopeItem::from_client_report(&report) {
            Ok(item) => item,
            Err(err) => {
                error!("failed to serialize client report: {err}");
                return;
            }
        };
        let mut envelope = Envelope::new(EnvelopeHeader::new());
        envelope.add_item(item);
        self.transport.send(envelope);
    }
}
