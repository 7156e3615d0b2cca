// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Span creation, parent/child links and trace-level sampling state.
//!
//! Each trace carries one shared [`TraceState`]: the sampling decision is
//! made exactly once, at root creation, and every descendant reads it
//! from there. Finished child spans accumulate on the trace; finishing
//! the root turns them into one transaction event.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use serde_json::Value;
use tracing::debug;

use beacon_protocol::{
    unix_timestamp, DynamicSamplingContext, Event, EventId, Level, SpanData, SpanId, SpanLink,
    SpanStatus, TraceContext, TraceHeader, TraceId, BAGGAGE_HEADER, TRACE_HEADER,
};

use crate::client::Client;
use crate::scope::Scope;

/// Options for starting a span.
#[derive(Debug, Default)]
pub struct SpanOptions {
    pub name: String,
    pub op: String,
    pub attributes: BTreeMap<String, Value>,
    /// Explicit sampling override, consulted only for new roots.
    pub sampled: Option<bool>,
    /// Remote parent to continue a distributed trace from.
    pub remote_parent: Option<RemoteContext>,
}

impl SpanOptions {
    pub fn new(name: &str, op: &str) -> Self {
        SpanOptions {
            name: name.to_string(),
            op: op.to_string(),
            ..Default::default()
        }
    }
}

/// Parent context received from an upstream service.
#[derive(Debug, Clone)]
pub struct RemoteContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: Option<bool>,
    pub dsc: Option<DynamicSamplingContext>,
}

impl RemoteContext {
    /// Builds a remote parent from incoming propagation headers. Returns
    /// `None` when the trace header does not parse.
    pub fn from_headers(trace_header: &str, baggage: Option<&str>) -> Option<Self> {
        let header: TraceHeader = trace_header.parse().ok()?;
        Some(RemoteContext {
            trace_id: header.trace_id,
            span_id: header.span_id,
            sampled: header.sampled,
            dsc: baggage.and_then(DynamicSamplingContext::from_baggage),
        })
    }
}

/// Per-trace shared state. The sampling fields never change after
/// construction; the DSC freezes on first use.
#[derive(Debug)]
pub(crate) struct TraceState {
    pub(crate) trace_id: TraceId,
    pub(crate) sampled: bool,
    pub(crate) sample_rate: Option<f64>,
    pub(crate) sample_rand: f64,
    transaction: String,
    public_key: Option<String>,
    release: Option<String>,
    environment: Option<String>,
    dsc: OnceLock<DynamicSamplingContext>,
    finished: Mutex<Vec<SpanData>>,
}

impl TraceState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        trace_id: TraceId,
        sampled: bool,
        sample_rate: Option<f64>,
        sample_rand: f64,
        transaction: String,
        public_key: Option<String>,
        release: Option<String>,
        environment: Option<String>,
    ) -> Self {
        TraceState {
            trace_id,
            sampled,
            sample_rate,
            sample_rand,
            transaction,
            public_key,
            release,
            environment,
            dsc: OnceLock::new(),
            finished: Mutex::new(Vec::new()),
        }
    }

    /// Pre-freezes the DSC with one inherited from upstream.
    pub(crate) fn with_frozen_dsc(self, dsc: DynamicSamplingContext) -> Self {
        let _ = self.dsc.set(dsc);
        self
    }

    /// Returns the DSC, freezing it on first use.
    pub(crate) fn dsc(&self) -> DynamicSamplingContext {
        self.dsc
            .get_or_init(|| DynamicSamplingContext {
                trace_id: Some(self.trace_id),
                public_key: self.public_key.clone(),
                sample_rate: self.sample_rate,
                sample_rand: Some(self.sample_rand),
                sampled: Some(self.sampled),
                release: self.release.clone(),
                environment: self.environment.clone(),
                transaction: Some(self.transaction.clone()),
            })
            .clone()
    }
}

#[derive(Debug, Default)]
struct SpanState {
    end_timestamp: Option<f64>,
    status: Option<SpanStatus>,
    attributes: BTreeMap<String, Value>,
    links: Vec<SpanLink>,
}

/// A timed operation within a trace.
///
/// Spans are mutated through `&self` (status, attributes, links) until
/// [`Span::finish`] seals them; finishing twice is a logged no-op.
#[derive(Debug)]
pub struct Span {
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    is_root: bool,
    name: String,
    op: String,
    start_timestamp: f64,
    trace: Arc<TraceState>,
    state: Mutex<SpanState>,
    open_children: Arc<AtomicU32>,
    parent_open: Option<Arc<AtomicU32>>,
    client: Weak<Client>,
    /// Merged scope captured at root creation, applied to the
    /// transaction event at finish.
    scope_snapshot: Option<Box<Scope>>,
}

impl Span {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start(
        trace: Arc<TraceState>,
        name: String,
        op: String,
        attributes: BTreeMap<String, Value>,
        parent_span_id: Option<SpanId>,
        parent_open: Option<Arc<AtomicU32>>,
        is_root: bool,
        client: Weak<Client>,
        scope_snapshot: Option<Box<Scope>>,
    ) -> Arc<Span> {
        Arc::new(Span {
            span_id: SpanId::random(),
            parent_span_id,
            is_root,
            name,
            op,
            start_timestamp: unix_timestamp(),
            trace,
            state: Mutex::new(SpanState {
                attributes,
                ..Default::default()
            }),
            open_children: Arc::new(AtomicU32::new(0)),
            parent_open,
            client,
            scope_snapshot,
        })
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace.trace_id
    }

    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn is_root(&self) -> bool {
        self.is_root
    }

    pub fn is_sampled(&self) -> bool {
        self.trace.sampled
    }

    pub fn sample_rate(&self) -> Option<f64> {
        self.trace.sample_rate
    }

    pub fn is_finished(&self) -> bool {
        self.lock_state().end_timestamp.is_some()
    }

    pub fn set_status(&self, status: SpanStatus) {
        self.lock_state().status = Some(status);
    }

    pub fn set_attribute(&self, key: &str, value: Value) {
        self.lock_state().attributes.insert(key.to_string(), value);
    }

    /// Appends a link to another span context. Insertion order is kept;
    /// duplicates are allowed.
    pub fn add_link(
        &self,
        trace_id: TraceId,
        span_id: SpanId,
        sampled: Option<bool>,
        attributes: BTreeMap<String, Value>,
    ) {
        self.lock_state().links.push(SpanLink {
            trace_id,
            span_id,
            sampled,
            attributes,
        });
    }

    /// Starts a child span. The child inherits the trace's sampling
    /// decision unconditionally; creating it freezes the root's DSC.
    pub fn child(self: &Arc<Self>, name: &str, op: &str) -> Arc<Span> {
        let _ = self.trace.dsc();
        self.open_children.fetch_add(1, Ordering::Relaxed);
        Span::start(
            Arc::clone(&self.trace),
            name.to_string(),
            op.to_string(),
            BTreeMap::new(),
            Some(self.span_id),
            Some(Arc::clone(&self.open_children)),
            false,
            self.client.clone(),
            None,
        )
    }

    /// The frozen dynamic sampling context of this span's trace.
    pub fn dsc(&self) -> DynamicSamplingContext {
        self.trace.dsc()
    }

    /// Headers to attach to an outgoing request so the next service can
    /// continue this trace. Freezes the DSC.
    pub fn propagation_headers(&self) -> [(&'static str, String); 2] {
        let trace_header = TraceHeader {
            trace_id: self.trace.trace_id,
            span_id: self.span_id,
            sampled: Some(self.trace.sampled),
        };
        [
            (TRACE_HEADER, trace_header.to_string()),
            (BAGGAGE_HEADER, self.trace.dsc().to_baggage()),
        ]
    }

    /// Seals the span. Children still open stay open (and are logged);
    /// for a root span this emits the transaction event.
    pub fn finish(&self) {
        let data = {
            let mut state = self.lock_state();
            if state.end_timestamp.is_some() {
                debug!("span {:?} already finished", self.name);
                return;
            }
            let end = unix_timestamp();
            state.end_timestamp = Some(end);
            self.span_data(&state)
        };

        let open = self.open_children.load(Ordering::Relaxed);
        if open > 0 {
            debug!("span {:?} finished with {open} open child span(s)", self.name);
        }
        if let Some(parent_open) = &self.parent_open {
            parent_open.fetch_sub(1, Ordering::Relaxed);
        }

        if !self.trace.sampled {
            if self.is_root {
                if let Some(client) = self.client.upgrade() {
                    client.record_unsampled_transaction();
                }
            }
            return;
        }

        if self.is_root {
            #[allow(clippy::expect_used)]
            let spans = std::mem::take(
                &mut *self.trace.finished.lock().expect("lock poisoned"),
            );
            let event = self.transaction_event(&data, spans);
            match self.client.upgrade() {
                Some(client) => {
                    let scope = self
                        .scope_snapshot
                        .as_deref()
                        .cloned()
                        .unwrap_or_else(|| Scope::new(0));
                    client.capture_transaction(event, &scope, self.trace.dsc());
                }
                None => debug!("client dropped before the transaction was captured"),
            }
        } else {
            #[allow(clippy::expect_used)]
            self.trace
                .finished
                .lock()
                .expect("lock poisoned")
                .push(data);
        }
    }

    fn span_data(&self, state: &SpanState) -> SpanData {
        SpanData {
            trace_id: self.trace.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            name: self.name.clone(),
            op: self.op.clone(),
            start_timestamp: self.start_timestamp,
            end_timestamp: state.end_timestamp,
            status: state.status,
            attributes: state.attributes.clone(),
            links: state.links.clone(),
        }
    }

    fn transaction_event(&self, root: &SpanData, spans: Vec<SpanData>) -> Event {
        let mut event = Event::new(root.end_timestamp.unwrap_or(self.start_timestamp));
        event.event_id = EventId::random();
        event.level = Level::Info;
        event.transaction = Some(self.name.clone());
        event.start_timestamp = Some(self.start_timestamp);
        event.attributes = root.attributes.clone();
        event.trace = Some(TraceContext {
            trace_id: self.trace.trace_id,
            span_id: self.span_id,
            parent_span_id: self.parent_span_id,
            op: Some(self.op.clone()),
            status: root.status,
        });
        event.spans = spans;
        event
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SpanState> {
        #[allow(clippy::expect_used)]
        let state = self.state.lock().expect("lock poisoned");
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn root_trace(sampled: bool) -> Arc<TraceState> {
        Arc::new(TraceState::new(
            TraceId::random(),
            sampled,
            Some(0.5),
            0.3,
            "GET /users".to_string(),
            Some("key".to_string()),
            Some("backend@1.0.0".to_string()),
            None,
        ))
    }

    fn root_span(sampled: bool) -> Arc<Span> {
        Span::start(
            root_trace(sampled),
            "GET /users".to_string(),
            "http.server".to_string(),
            BTreeMap::new(),
            None,
            None,
            true,
            Weak::new(),
            None,
        )
    }

    #[test]
    fn test_children_inherit_sampling_unmodified() {
        let root = root_span(true);
        let child = root.child("SELECT users", "db.query");
        let grandchild = child.child("parse rows", "serialize");

        for span in [&child, &grandchild] {
            assert_eq!(span.trace_id(), root.trace_id());
            assert!(span.is_sampled());
            assert_eq!(span.sample_rate(), Some(0.5));
            assert!(!span.is_root());
        }
        assert_eq!(child.parent_span_id(), Some(root.span_id()));
        assert_eq!(grandchild.parent_span_id(), Some(child.span_id()));
    }

    #[test]
    fn test_finish_is_idempotent() {
        let span = root_span(true);
        span.finish();
        let finished_at = span.lock_state().end_timestamp;
        span.finish();
        assert_eq!(span.lock_state().end_timestamp, finished_at);
    }

    #[test]
    fn test_parent_may_finish_before_children() {
        let root = root_span(true);
        let child = root.child("slow", "task");
        root.finish();
        assert!(root.is_finished());
        assert!(!child.is_finished());
        child.finish();
        assert!(child.is_finished());
    }

    #[test]
    fn test_finished_children_collect_on_trace() {
        let root = root_span(true);
        root.child("a", "task").finish();
        root.child("b", "task").finish();
        let collected = root.trace.finished.lock().unwrap().len();
        assert_eq!(collected, 2);
    }

    #[test]
    fn test_unsampled_trace_collects_nothing() {
        let root = root_span(false);
        root.child("a", "task").finish();
        assert!(root.trace.finished.lock().unwrap().is_empty());
    }

    #[test]
    fn test_links_keep_insertion_order_and_duplicates() {
        let span = root_span(true);
        let other_trace = TraceId::random();
        let other_span = SpanId::random();
        span.add_link(other_trace, other_span, Some(true), BTreeMap::new());
        span.add_link(other_trace, other_span, Some(true), BTreeMap::new());

        let state = span.lock_state();
        assert_eq!(state.links.len(), 2);
        assert_eq!(state.links[0], state.links[1]);
    }

    #[test]
    fn test_dsc_freezes_at_first_child() {
        let root = root_span(true);
        let _child = root.child("a", "task");
        let dsc = root.dsc();
        assert_eq!(dsc.trace_id, Some(root.trace_id()));
        assert_eq!(dsc.sample_rate, Some(0.5));
        assert_eq!(dsc.sample_rand, Some(0.3));
        assert_eq!(dsc.sampled, Some(true));
        assert_eq!(dsc.transaction.as_deref(), Some("GET /users"));
        // frozen: identical on every read
        assert_eq!(root.dsc(), dsc);
    }

    #[test]
    fn test_propagation_headers_carry_trace_and_baggage() {
        let root = root_span(true);
        let [(trace_name, trace_value), (baggage_name, baggage_value)] =
            root.propagation_headers();
        assert_eq!(trace_name, TRACE_HEADER);
        assert_eq!(baggage_name, BAGGAGE_HEADER);

        let parsed: TraceHeader = trace_value.parse().unwrap();
        assert_eq!(parsed.trace_id, root.trace_id());
        assert_eq!(parsed.span_id, root.span_id());
        assert_eq!(parsed.sampled, Some(true));

        let dsc = DynamicSamplingContext::from_baggage(&baggage_value).unwrap();
        assert_eq!(dsc.trace_id, Some(root.trace_id()));
    }

    proptest! {
        #[test]
        fn prop_every_span_in_a_tree_shares_the_root_decision(
            parents in prop::collection::vec(0usize..64, 1..24),
            rate in 0.0f64..=1.0,
            sample_rand in 0.0f64..1.0,
        ) {
            let sampled = sample_rand < rate;
            let trace = Arc::new(TraceState::new(
                TraceId::random(),
                sampled,
                Some(rate),
                sample_rand,
                "root".to_string(),
                None,
                None,
                None,
            ));
            let root = Span::start(
                trace,
                "root".to_string(),
                "task".to_string(),
                BTreeMap::new(),
                None,
                None,
                true,
                Weak::new(),
                None,
            );

            let mut spans = vec![root];
            for (index, parent) in parents.into_iter().enumerate() {
                let child = spans[parent % spans.len()].child(&format!("span {index}"), "task");
                spans.push(child);
            }

            // finish in an arbitrary interleaving: every other span first,
            // then the rest (parents may end before their children)
            for span in spans.iter().step_by(2) {
                span.finish();
            }
            for span in spans.iter() {
                span.finish();
            }

            let trace_id = spans[0].trace_id();
            for span in &spans {
                prop_assert_eq!(span.is_sampled(), sampled);
                prop_assert_eq!(span.sample_rate(), Some(rate));
                prop_assert_eq!(span.trace_id(), trace_id);
            }
        }
    }

    #[test]
    fn test_remote_context_from_headers() {
        let root = root_span(true);
        let [(_, trace_value), (_, baggage_value)] = root.propagation_headers();
        let remote = RemoteContext::from_headers(&trace_value, Some(&baggage_value)).unwrap();
        assert_eq!(remote.trace_id, root.trace_id());
        assert_eq!(remote.span_id, root.span_id());
        assert_eq!(remote.sampled, Some(true));
        assert_eq!(remote.dsc.unwrap().sample_rand, Some(0.3));

        assert!(RemoteContext::from_headers("garbage", None).is_none());
    }
}
