// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Dynamic sampling context and trace propagation headers.
//!
//! The DSC is a frozen summary of the root span's sampling decision. It
//! travels on outgoing requests as a `baggage`-style header and inside
//! envelope headers, so downstream services can apply consistent sampling
//! for the whole trace. The compact trace header
//! (`{trace_id}-{span_id}[-{0|1}]`) carries the ids and sampled flag.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::{SpanId, TraceId};

/// Header carrying the trace id, parent span id and sampled flag.
pub const TRACE_HEADER: &str = "beacon-trace";
/// Header carrying the serialized dynamic sampling context.
pub const BAGGAGE_HEADER: &str = "baggage";

const BAGGAGE_KEY_PREFIX: &str = "beacon-";

/// Immutable summary of a trace's sampling decision, frozen at the root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicSamplingContext {
    pub trace_id: Option<TraceId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rand: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
}

impl DynamicSamplingContext {
    /// Serializes to the prefixed key/value baggage format. Values are
    /// percent-free; commas and equals signs inside values are not
    /// supported by the format and are stripped.
    pub fn to_baggage(&self) -> String {
        let mut entries: Vec<(&str, String)> = Vec::new();
        if let Some(trace_id) = &self.trace_id {
            entries.push(("trace_id", trace_id.to_string()));
        }
        if let Some(public_key) = &self.public_key {
            entries.push(("public_key", public_key.clone()));
        }
        if let Some(rate) = self.sample_rate {
            entries.push(("sample_rate", format_float(rate)));
        }
        if let Some(rand) = self.sample_rand {
            entries.push(("sample_rand", format_float(rand)));
        }
        if let Some(sampled) = self.sampled {
            entries.push(("sampled", sampled.to_string()));
        }
        if let Some(release) = &self.release {
            entries.push(("release", release.clone()));
        }
        if let Some(environment) = &self.environment {
            entries.push(("environment", environment.clone()));
        }
        if let Some(transaction) = &self.transaction {
            entries.push(("transaction", transaction.clone()));
        }
        entries
            .into_iter()
            .map(|(key, value)| {
                let clean: String = value.chars().filter(|c| *c != ',' && *c != '=').collect();
                format!("{BAGGAGE_KEY_PREFIX}{key}={clean}")
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parses the prefixed entries out of a baggage header, ignoring
    /// third-party entries and malformed pairs. Returns `None` when no
    /// prefixed entry is present at all.
    pub fn from_baggage(header: &str) -> Option<Self> {
        let mut dsc = DynamicSamplingContext::default();
        let mut any = false;
        for entry in header.split(',') {
            let Some((key, value)) = entry.trim().split_once('=') else {
                continue;
            };
            let Some(key) = key.strip_prefix(BAGGAGE_KEY_PREFIX) else {
                continue;
            };
            any = true;
            match key {
                "trace_id" => dsc.trace_id = value.parse().ok(),
                "public_key" => dsc.public_key = Some(value.to_string()),
                "sample_rate" => dsc.sample_rate = value.parse().ok(),
                "sample_rand" => dsc.sample_rand = value.parse().ok(),
                "sampled" => dsc.sampled = value.parse().ok(),
                "release" => dsc.release = Some(value.to_string()),
                "environment" => dsc.environment = Some(value.to_string()),
                "transaction" => dsc.transaction = Some(value.to_string()),
                _ => {}
            }
        }
        any.then_some(dsc)
    }
}

fn format_float(value: f64) -> String {
    // keep integral rates readable ("1" not "1.0" is wrong here: parsers
    // on other platforms expect a decimal point)
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid trace propagation header: {0:?}")]
pub struct ParseTraceHeaderError(String);

/// Parsed compact trace header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceHeader {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: Option<bool>,
}

impl fmt::Display for TraceHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.trace_id, self.span_id)?;
        match self.sampled {
            Some(true) => write!(f, "-1"),
            Some(false) => write!(f, "-0"),
            None => Ok(()),
        }
    }
}

impl FromStr for TraceHeader {
    type Err = ParseTraceHeaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTraceHeaderError(s.to_string());
        let mut parts = s.trim().splitn(3, '-');
        let trace_id = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let span_id = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let sampled = match parts.next() {
            Some("1") => Some(true),
            Some("0") => Some(false),
            Some(_) => return Err(err()),
            None => None,
        };
        Ok(TraceHeader {
            trace_id,
            span_id,
            sampled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baggage_roundtrip() {
        let dsc = DynamicSamplingContext {
            trace_id: Some(TraceId::random()),
            public_key: Some("abc123".to_string()),
            sample_rate: Some(0.25),
            sample_rand: Some(0.118212),
            sampled: Some(true),
            release: Some("backend@1.2.3".to_string()),
            environment: Some("production".to_string()),
            transaction: Some("GET /users".to_string()),
        };
        let baggage = dsc.to_baggage();
        assert_eq!(DynamicSamplingContext::from_baggage(&baggage), Some(dsc));
    }

    #[test]
    fn test_baggage_ignores_third_party_entries() {
        let header = "other-vendor=1,beacon-sample_rate=1.0, beacon-sampled=false";
        let dsc = DynamicSamplingContext::from_baggage(header).unwrap();
        assert_eq!(dsc.sample_rate, Some(1.0));
        assert_eq!(dsc.sampled, Some(false));
        assert_eq!(dsc.trace_id, None);
    }

    #[test]
    fn test_baggage_without_beacon_entries() {
        assert_eq!(
            DynamicSamplingContext::from_baggage("vendor=x,foo=bar"),
            None
        );
        assert_eq!(DynamicSamplingContext::from_baggage(""), None);
    }

    #[test]
    fn test_integral_rate_keeps_decimal_point() {
        let dsc = DynamicSamplingContext {
            sample_rate: Some(1.0),
            ..Default::default()
        };
        assert!(dsc.to_baggage().contains("beacon-sample_rate=1.0"));
    }

    #[test]
    fn test_trace_header_roundtrip() {
        let header = TraceHeader {
            trace_id: TraceId::random(),
            span_id: SpanId::random(),
            sampled: Some(false),
        };
        let s = header.to_string();
        assert!(s.ends_with("-0"));
        assert_eq!(s.parse::<TraceHeader>().unwrap(), header);

        let no_flag = TraceHeader {
            sampled: None,
            ..header
        };
        assert_eq!(no_flag.to_string().parse::<TraceHeader>().unwrap(), no_flag);
    }

    #[test]
    fn test_trace_header_rejects_garbage() {
        assert!("".parse::<TraceHeader>().is_err());
        assert!("abc".parse::<TraceHeader>().is_err());
        assert!("00000000000000000000000000000000".parse::<TraceHeader>().is_err());
        let valid = format!("{}-{}-2", TraceId::random(), SpanId::random());
        assert!(valid.parse::<TraceHeader>().is_err());
    }
}
