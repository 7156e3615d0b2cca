// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One context layer: tags, user, attributes, breadcrumbs and the active
//! span for a logical unit of work.
//!
//! Three layers exist at any point (global, isolation, current); reads
//! merge them key-by-key with the later layer winning. A fork deep-clones
//! every owned collection, so mutating a fork never leaks into the
//! parent. The active span is a shared reference by design.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde_json::Value;

use beacon_protocol::{Breadcrumb, Event, TraceContext, User};

use crate::span::Span;

#[derive(Debug, Clone)]
pub struct Scope {
    tags: BTreeMap<String, String>,
    user: Option<User>,
    attributes: BTreeMap<String, Value>,
    extras: BTreeMap<String, Value>,
    breadcrumbs: VecDeque<Breadcrumb>,
    max_breadcrumbs: usize,
    span: Option<Arc<Span>>,
}

impl Scope {
    pub fn new(max_breadcrumbs: usize) -> Self {
        Scope {
            tags: BTreeMap::new(),
            user: None,
            attributes: BTreeMap::new(),
            extras: BTreeMap::new(),
            breadcrumbs: VecDeque::new(),
            max_breadcrumbs,
            span: None,
        }
    }

    /// Deep clone sharing nothing mutable with this layer.
    pub fn fork(&self) -> Scope {
        self.clone()
    }

    pub fn set_tag(&mut self, key: &str, value: &str) {
        self.tags.insert(key.to_string(), value.to_string());
    }

    pub fn remove_tag(&mut self, key: &str) {
        self.tags.remove(key);
    }

    pub fn set_user(&mut self, user: Option<User>) {
        self.user = user;
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn set_attribute(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_string(), value);
    }

    pub fn set_extra(&mut self, key: &str, value: Value) {
        self.extras.insert(key.to_string(), value);
    }

    /// Appends a breadcrumb, evicting the oldest entry at capacity.
    pub fn add_breadcrumb(&mut self, breadcrumb: Breadcrumb) {
        if self.max_breadcrumbs == 0 {
            return;
        }
        if self.breadcrumbs.len() == self.max_breadcrumbs {
            self.breadcrumbs.pop_front();
        }
        self.breadcrumbs.push_back(breadcrumb);
    }

    pub fn breadcrumbs(&self) -> impl Iterator<Item = &Breadcrumb> {
        self.breadcrumbs.iter()
    }

    pub fn set_span(&mut self, span: Option<Arc<Span>>) {
        self.span = span;
    }

    pub fn span(&self) -> Option<&Arc<Span>> {
        self.span.as_ref()
    }

    /// Overlays `other` onto this layer, key by key. `other` wins on
    /// conflicts; breadcrumbs concatenate in layer order.
    pub(crate) fn merge_from(&mut self, other: &Scope) {
        self.tags
            .extend(other.tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        if other.user.is_some() {
            self.user = other.user.clone();
        }
        self.attributes
            .extend(other.attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.extras
            .extend(other.extras.iter().map(|(k, v)| (k.clone(), v.clone())));
        for breadcrumb in &other.breadcrumbs {
            self.add_breadcrumb(breadcrumb.clone());
        }
        if other.span.is_some() {
            self.span = other.span.clone();
        }
    }

    /// Merges layers lowest-precedence first.
    pub(crate) fn merged<'a>(layers: impl IntoIterator<Item = &'a Scope>, max_breadcrumbs: usize) -> Scope {
        let mut merged = Scope::new(max_breadcrumbs);
        for layer in layers {
            merged.merge_from(layer);
        }
        merged
    }

    /// Copies scope state into an event. Values already present on the
    /// event win over scope values.
    pub(crate) fn apply_to_event(&self, event: &mut Event) {
        for (key, value) in &self.tags {
            event
                .tags
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        for (key, value) in &self.attributes {
            event
                .attributes
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        for (key, value) in &self.extras {
            event
                .extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        if event.user.is_none() {
            event.user = self.user.clone();
        }
        if event.breadcrumbs.is_empty() {
            event.breadcrumbs = self.breadcrumbs.iter().cloned().collect();
        }
        if event.trace.is_none() {
            if let Some(span) = &self.span {
                event.trace = Some(TraceContext {
                    trace_id: span.trace_id(),
                    span_id: span.span_id(),
                    parent_span_id: span.parent_span_id(),
                    op: Some(span.op().to_string()),
                    status: None,
                });
            }
        }
    }
}
