// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric batch payloads: pre-aggregated counters, gauges and
//! distributions shipped as one envelope item.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Distribution,
}

/// One aggregated metric sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
    /// Counter and gauge values carry one entry; distributions carry
    /// every recorded value.
    pub values: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    pub timestamp: f64,
}

/// The `metric_batch` envelope item payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricBatch {
    pub metrics: Vec<Metric>,
}

impl MetricBatch {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_batch_roundtrip() {
        let batch = MetricBatch {
            metrics: vec![
                Metric {
                    name: "requests".to_string(),
                    kind: MetricKind::Counter,
                    values: vec![12.0],
                    unit: None,
                    tags: BTreeMap::from([("route".to_string(), "/users".to_string())]),
                    timestamp: 1700000000.0,
                },
                Metric {
                    name: "latency".to_string(),
                    kind: MetricKind::Distribution,
                    values: vec![0.8, 1.5, 0.2],
                    unit: Some("second".to_string()),
                    tags: BTreeMap::new(),
                    timestamp: 1700000000.0,
                },
            ],
        };
        let json = serde_json::to_string(&batch).unwrap();
        let back: MetricBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, batch);
    }

    #[test]
    fn test_kind_wire_strings() {
        assert_eq!(
            serde_json::to_string(&MetricKind::Distribution).unwrap(),
            "\"distribution\""
        );
    }
}
