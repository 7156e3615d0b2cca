// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Wire representation of finished spans.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{SpanId, TraceId};

/// Final status of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Cancelled,
    Aborted,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    PermissionDenied,
    ResourceExhausted,
    Unavailable,
    InternalError,
    UnknownError,
}

/// Pointer from one span to another span context, with optional
/// attributes. Links are kept in insertion order and may repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanLink {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampled: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

/// A finished span as embedded in a transaction payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanData {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub op: String,
    pub start_timestamp: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SpanStatus>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<SpanLink>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_data_roundtrip() {
        let span = SpanData {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            parent_span_id: Some(SpanId::random()),
            name: "GET /users".to_string(),
            op: "http.server".to_string(),
            start_timestamp: 1700000000.0,
            end_timestamp: Some(1700000000.25),
            status: Some(SpanStatus::Ok),
            attributes: BTreeMap::from([("http.status_code".to_string(), 200.into())]),
            links: vec![SpanLink {
                trace_id: TraceId::random(),
                span_id: SpanId::random(),
                sampled: Some(true),
                attributes: BTreeMap::new(),
            }],
        };
        let json = serde_json::to_string(&span).unwrap();
        let back: SpanData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, span);
    }

    #[test]
    fn test_status_wire_string() {
        assert_eq!(
            serde_json::to_string(&SpanStatus::DeadlineExceeded).unwrap(),
            "\"deadline_exceeded\""
        );
    }
}
