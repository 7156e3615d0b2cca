// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-category rate-limit state, fed from collector response headers.
//!
//! Header format: comma-separated `retry_after_secs:cat1;cat2:scope`
//! tuples. An empty category list applies the window to every category.
//! When windows conflict for one category, the longest deadline wins.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use beacon_protocol::Category;

/// Response header carrying rate-limit tuples.
pub const RATE_LIMITS_HEADER: &str = "x-beacon-rate-limits";

/// Fallback window applied when a 429 carries no parseable header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub struct RateLimiter {
    all: Option<Instant>,
    per_category: HashMap<Category, Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_limited(&self, category: Category) -> bool {
        self.is_limited_at(category, Instant::now())
    }

    pub fn is_limited_at(&self, category: Category, now: Instant) -> bool {
        if self.all.is_some_and(|deadline| now < deadline) {
            return true;
        }
        self.per_category
            .get(&category)
            .is_some_and(|deadline| now < *deadline)
    }

    /// Parses a rate-limits header value. Malformed tuples and unknown
    /// category tokens are skipped.
    pub fn update_from_header(&mut self, value: &str, now: Instant) {
        for tuple in value.split(',') {
            let tuple = tuple.trim();
            if tuple.is_empty() {
                continue;
            }
            let mut fields = tuple.split(':');
            let Some(retry_after) = fields.next().and_then(|v| v.trim().parse::<f64>().ok())
            else {
                debug!("skipping malformed rate-limit tuple: {tuple:?}");
                continue;
            };
            if !retry_after.is_finite() || retry_after < 0.0 {
                debug!("skipping malformed rate-limit tuple: {tuple:?}");
                continue;
            }
            let deadline = now + Duration::from_secs_f64(retry_after);

            let categories = fields.next().unwrap_or("");
            if categories.is_empty() {
                self.limit_all(deadline);
                continue;
            }
            for token in categories.split(';') {
                match Category::parse(token.trim()) {
                    Some(category) => self.limit_category(category, deadline),
                    None => debug!("skipping unknown rate-limit category: {token:?}"),
                }
            }
        }
    }

    /// Applies a bare `Retry-After` window to every category.
    pub fn update_from_retry_after(&mut self, retry_after: Duration, now: Instant) {
        self.limit_all(now + retry_after);
    }

    fn limit_all(&mut self, deadline: Instant) {
        self.all = Some(match self.all {
            Some(existing) => existing.max(deadline),
            None => deadline,
        });
    }

    fn limit_category(&mut self, category: Category, deadline: Instant) {
        self.per_category
            .entry(category)
            .and_modify(|existing| *existing = (*existing).max(deadline))
            .or_insert(deadline);
    }
}
