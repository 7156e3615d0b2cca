// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client reports: locally dropped telemetry, itself shipped as telemetry.

use serde::{Deserialize, Serialize};

use crate::category::{Category, DiscardReason};

/// One `(reason, category)` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscardedItem {
    pub reason: DiscardReason,
    pub category: Category,
    pub quantity: u32,
}

/// The `client_report` envelope item payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientReport {
    pub timestamp: f64,
    pub discarded_events: Vec<DiscardedItem>,
}

impl ClientReport {
    pub fn is_empty(&self) -> bool {
        self.discarded_events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_wire_shape() {
        let report = ClientReport {
            timestamp: 1700000000.0,
            discarded_events: vec![DiscardedItem {
                reason: DiscardReason::RatelimitBackoff,
                category: Category::Transaction,
                quantity: 7,
            }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["discarded_events"][0]["reason"], "ratelimit_backoff");
        assert_eq!(json["discarded_events"][0]["category"], "transaction");
        assert_eq!(json["discarded_events"][0]["quantity"], 7);
    }
}
