// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Data categories and discard reasons used for rate limiting and drop
//! accounting.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Payload class throttled independently by the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Error,
    Transaction,
    Session,
    Attachment,
    Default,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Error => "error",
            Category::Transaction => "transaction",
            Category::Session => "session",
            Category::Attachment => "attachment",
            Category::Default => "default",
        }
    }

    /// Parses a category token from a rate-limit header. Unknown tokens
    /// return `None` and are skipped by the caller.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "error" => Some(Category::Error),
            "transaction" => Some(Category::Transaction),
            "session" => Some(Category::Session),
            "attachment" => Some(Category::Attachment),
            "default" => Some(Category::Default),
            _ => None,
        }
    }

    pub fn all() -> [Category; 5] {
        [
            Category::Error,
            Category::Transaction,
            Category::Session,
            Category::Attachment,
            Category::Default,
        ]
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an item was dropped locally instead of reaching the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    SampleRate,
    BeforeSend,
    Duplicate,
    Filtered,
    RatelimitBackoff,
    NetworkError,
    QueueOverflow,
    InternalSdkError,
}

impl DiscardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscardReason::SampleRate => "sample_rate",
            DiscardReason::BeforeSend => "before_send",
            DiscardReason::Duplicate => "duplicate",
            DiscardReason::Filtered => "filtered",
            DiscardReason::RatelimitBackoff => "ratelimit_backoff",
            DiscardReason::NetworkError => "network_error",
            DiscardReason::QueueOverflow => "queue_overflow",
            DiscardReason::InternalSdkError => "internal_sdk_error",
        }
    }
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_tokens_roundtrip() {
        for category in Category::all() {
            assert_eq!(Category::parse(category.as_str()), Some(category));
        }
        assert_eq!(Category::parse("profile"), None);
        assert_eq!(Category::parse(""), None);
    }

    #[test]
    fn test_discard_reason_wire_strings() {
        assert_eq!(
            serde_json::to_string(&DiscardReason::RatelimitBackoff).unwrap(),
            "\"ratelimit_backoff\""
        );
        assert_eq!(
            serde_json::to_string(&DiscardReason::SampleRate).unwrap(),
            "\"sample_rate\""
        );
        assert_eq!(serde_json::to_string(&Category::Error).unwrap(), "\"error\"");
    }
}
