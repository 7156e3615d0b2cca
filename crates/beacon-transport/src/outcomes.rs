// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Drop accounting. Every stage that discards an item records it here;
//! the counters drain into a client report on each flush.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use beacon_protocol::{unix_timestamp, Category, ClientReport, DiscardReason, DiscardedItem};

/// Shared `(reason, category)` counters. Cloning shares the underlying
/// counters; recording never blocks on I/O and never fails.
#[derive(Debug, Clone, Default)]
pub struct OutcomeRecorder {
    counters: Arc<Mutex<BTreeMap<(DiscardReason, Category), u32>>>,
}

impl OutcomeRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, reason: DiscardReason, category: Category) {
        self.record_many(reason, category, 1);
    }

    pub fn record_many(&self, reason: DiscardReason, category: Category, quantity: u32) {
        if quantity == 0 {
            return;
        }
        debug!("discarding {quantity} {category} item(s): {reason}");
        #[allow(clippy::expect_used)]
        let mut counters = self.counters.lock().expect("lock poisoned");
        *counters.entry((reason, category)).or_insert(0) += quantity;
    }

    /// Drains the counters into a report. The counters are reset before
    /// the report is handed out, so a report lost in transit stays lost.
    pub fn take_report(&self) -> Option<ClientReport> {
        let drained = {
            #[allow(clippy::expect_used)]
            let mut counters = self.counters.lock().expect("lock poisoned");
            std::mem::take(&mut *counters)
        };
        if drained.is_empty() {
            return None;
        }
        Some(ClientReport {
            timestamp: unix_timestamp(),
            discarded_events: drained
                .into_iter()
                .map(|((reason, category), quantity)| DiscardedItem {
                    reason,
                    category,
                    quantity,
                })
                .collect(),
        })
    }
}
