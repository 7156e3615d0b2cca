// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hubs bind a client to the three context layers (global, isolation,
//! current) and expose the capture API.
//!
//! Context travels by explicit handle: clones of one hub share the same
//! layers, `fork` branches the current layer for a concurrent task, and
//! `isolated` opens a fresh isolation layer (one logical unit of work).
//! `with_scope` restores the previous current layer on every exit path,
//! including panics, so nesting survives any control flow.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rand::Rng;
use tracing::debug;

use beacon_protocol::{
    unix_timestamp, Breadcrumb, Event, EventId, Exception, Level, Session, SessionStatus, TraceId,
};

use crate::client::Client;
use crate::pipeline::Hint;
use crate::sampler::{self, SamplingContext};
use crate::scope::Scope;
use crate::span::{Span, SpanOptions, TraceState};

#[derive(Clone)]
pub struct Hub {
    client: Arc<Client>,
    isolation: Arc<Mutex<Scope>>,
    stack: Arc<Mutex<Vec<Scope>>>,
    session: Arc<Mutex<Option<Session>>>,
}

impl Hub {
    /// Creates the root hub for a client. Starts a session when session
    /// tracking is on.
    pub fn new(client: Arc<Client>) -> Hub {
        let max_breadcrumbs = client.options().max_breadcrumbs;
        let hub = Hub {
            isolation: Arc::new(Mutex::new(Scope::new(max_breadcrumbs))),
            stack: Arc::new(Mutex::new(vec![Scope::new(max_breadcrumbs)])),
            session: Arc::new(Mutex::new(None)),
            client,
        };
        if hub.client.options().auto_session_tracking {
            hub.start_session();
        }
        hub
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Branches the current layer for a concurrent task. The new hub
    /// shares the isolation and global layers; its current-layer stack
    /// is its own.
    pub fn fork(&self) -> Hub {
        let top = self.current_layer();
        Hub {
            client: Arc::clone(&self.client),
            isolation: Arc::clone(&self.isolation),
            stack: Arc::new(Mutex::new(vec![top])),
            session: Arc::clone(&self.session),
        }
    }

    /// Opens a new isolation layer (one incoming request, one job run).
    /// The isolation scope forks from the current one; a new session
    /// starts when session tracking is on.
    pub fn isolated(&self) -> Hub {
        let isolation = lock(&self.isolation).fork();
        let hub = Hub {
            client: Arc::clone(&self.client),
            isolation: Arc::new(Mutex::new(isolation)),
            stack: Arc::new(Mutex::new(vec![self.current_layer()])),
            session: Arc::new(Mutex::new(None)),
        };
        if hub.client.options().auto_session_tracking {
            hub.start_session();
        }
        hub
    }

    /// Runs `f` inside a new isolation layer and ends its session
    /// afterwards, on every exit path.
    pub fn with_isolation_scope<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Hub) -> R,
    {
        let hub = self.isolated();
        let _guard = EndSessionGuard { hub: &hub };
        f(&hub)
    }

    /// Pushes a fork of the current layer for the duration of `f`. The
    /// previous layer is restored even when `f` panics.
    pub fn with_scope<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Hub) -> R,
    {
        {
            let mut stack = lock(&self.stack);
            let fork = match stack.last() {
                Some(top) => top.fork(),
                None => Scope::new(self.client.options().max_breadcrumbs),
            };
            stack.push(fork);
        }
        let _guard = PopScopeGuard { hub: self };
        f(self)
    }

    /// Async variant of [`Hub::with_scope`]: the future owns a branched
    /// hub, so suspension and resumption cannot disturb this hub's
    /// current layer.
    pub async fn with_scope_async<F, Fut, R>(&self, f: F) -> R
    where
        F: FnOnce(Hub) -> Fut,
        Fut: Future<Output = R>,
    {
        let hub = self.fork();
        {
            let mut stack = lock(&hub.stack);
            let fork = match stack.last() {
                Some(top) => top.fork(),
                None => Scope::new(self.client.options().max_breadcrumbs),
            };
            stack.push(fork);
        }
        f(hub).await
    }

    /// Mutates the current layer.
    pub fn configure_scope<F: FnOnce(&mut Scope)>(&self, f: F) {
        let mut stack = lock(&self.stack);
        if let Some(scope) = stack.last_mut() {
            f(scope);
        }
    }

    /// Records a breadcrumb on the isolation layer, so it survives
    /// nested `with_scope` blocks within the same unit of work.
    pub fn add_breadcrumb(&self, breadcrumb: Breadcrumb) {
        lock(&self.isolation).add_breadcrumb(breadcrumb);
    }

    /// The span of the nearest enclosing layer, if any.
    pub fn active_span(&self) -> Option<Arc<Span>> {
        if let Some(span) = lock(&self.stack).last().and_then(|scope| scope.span().cloned()) {
            return Some(span);
        }
        lock(&self.isolation).span().cloned()
    }

    fn current_layer(&self) -> Scope {
        match lock(&self.stack).last() {
            Some(top) => top.fork(),
            None => Scope::new(self.client.options().max_breadcrumbs),
        }
    }

    /// Global, isolation and current layers merged, later layers
    /// winning key by key.
    pub(crate) fn merged_scope(&self) -> Scope {
        let max_breadcrumbs = self.client.options().max_breadcrumbs;
        let global = self.client.global_scope_snapshot();
        let isolation = lock(&self.isolation).clone();
        let current = self.current_layer();
        Scope::merged([&global, &isolation, &current], max_breadcrumbs)
    }

    // --- capture API ---

    pub fn capture_event(&self, event: Event) -> EventId {
        self.capture_event_with_hint(event, Hint::default())
    }

    pub fn capture_event_with_hint(&self, event: Event, hint: Hint) -> EventId {
        let scope = self.merged_scope();
        if !event.is_transaction() && event.level >= Level::Error {
            self.record_session_error(event.level == Level::Fatal);
        }
        let dsc = scope
            .span()
            .filter(|span| span.is_sampled())
            .map(|span| span.dsc());
        self.client.capture_event(event, &scope, &hint, dsc)
    }

    pub fn capture_error<E: std::error::Error + ?Sized>(&self, error: &E) -> EventId {
        self.capture_event(event_from_error(error))
    }

    pub fn capture_message(&self, message: &str, level: Level) -> EventId {
        let mut event = Event::new(unix_timestamp());
        event.level = level;
        event.message = Some(message.to_string());
        self.capture_event(event)
    }

    // --- sessions ---

    /// Starts a fresh session for this hub's isolation context.
    pub fn start_session(&self) {
        if !self.client.is_enabled() {
            return;
        }
        let distinct_id = self
            .merged_scope()
            .user()
            .and_then(|user| user.id.clone().or_else(|| user.email.clone()));
        *lock(&self.session) = Some(Session::new(Utc::now(), distinct_id));
    }

    /// Ends the current session as cleanly exited.
    pub fn end_session(&self) {
        self.end_session_with_status(SessionStatus::Exited);
    }

    pub fn end_session_with_status(&self, status: SessionStatus) {
        if let Some(mut session) = lock(&self.session).take() {
            session.close(status, Utc::now());
            self.client.sessions().record(&session);
        }
    }

    fn record_session_error(&self, fatal: bool) {
        let mut guard = lock(&self.session);
        if fatal {
            // a fatal event ends the session right away, so the crash is
            // not lost if the process never reaches a clean shutdown
            if let Some(mut session) = guard.take() {
                session.record_error();
                session.close(SessionStatus::Crashed, Utc::now());
                self.client.sessions().record(&session);
            }
        } else if let Some(session) = guard.as_mut() {
            session.record_error();
        }
    }

    // --- spans ---

    /// Starts a span without binding it to the current layer. Parent
    /// resolution: an explicit remote parent, else the active span,
    /// else a new root (which is where sampling is decided).
    pub fn start_inactive_span(&self, opts: SpanOptions) -> Arc<Span> {
        let options = self.client.options();
        let client = Arc::downgrade(&self.client);

        if let Some(remote) = opts.remote_parent.clone() {
            let sample_rand = remote
                .dsc
                .as_ref()
                .and_then(|dsc| dsc.sample_rand)
                .filter(|rand| (0.0..1.0).contains(rand))
                .unwrap_or_else(random_unit);
            let (sampled, sample_rate) = match remote.sampled {
                Some(flag) => (flag, remote.dsc.as_ref().and_then(|dsc| dsc.sample_rate)),
                None => {
                    let ctx = SamplingContext {
                        name: &opts.name,
                        op: &opts.op,
                        attributes: &opts.attributes,
                        parent_sampled: None,
                    };
                    let decision = sampler::decide(
                        opts.sampled,
                        options.traces_sampler.as_deref(),
                        options.traces_sample_rate,
                        &ctx,
                        sample_rand,
                    );
                    (decision.sampled, decision.sample_rate)
                }
            };
            let mut trace = TraceState::new(
                remote.trace_id,
                sampled,
                sample_rate,
                sample_rand,
                opts.name.clone(),
                options.dsn.as_ref().map(|dsn| dsn.public_key().to_string()),
                options.release.clone(),
                options.environment.clone(),
            );
            if let Some(dsc) = remote.dsc {
                trace = trace.with_frozen_dsc(dsc);
            }
            debug!("continuing remote trace {}", remote.trace_id);
            return Span::start(
                Arc::new(trace),
                opts.name,
                opts.op,
                opts.attributes,
                Some(remote.span_id),
                None,
                true,
                client,
                Some(Box::new(self.root_scope_snapshot())),
            );
        }

        if let Some(parent) = self.active_span() {
            let child = parent.child(&opts.name, &opts.op);
            for (key, value) in opts.attributes {
                child.set_attribute(&key, value);
            }
            return child;
        }

        let trace_id = TraceId::random();
        let sample_rand = random_unit();
        let ctx = SamplingContext {
            name: &opts.name,
            op: &opts.op,
            attributes: &opts.attributes,
            parent_sampled: None,
        };
        let decision = sampler::decide(
            opts.sampled,
            options.traces_sampler.as_deref(),
            options.traces_sample_rate,
            &ctx,
            sample_rand,
        );
        let trace = TraceState::new(
            trace_id,
            decision.sampled,
            decision.sample_rate,
            sample_rand,
            opts.name.clone(),
            options.dsn.as_ref().map(|dsn| dsn.public_key().to_string()),
            options.release.clone(),
            options.environment.clone(),
        );
        Span::start(
            Arc::new(trace),
            opts.name,
            opts.op,
            opts.attributes,
            None,
            None,
            true,
            client,
            Some(Box::new(self.root_scope_snapshot())),
        )
    }

    /// Runs `f` with the span active in a forked current layer and
    /// finishes the span afterwards, on every exit path.
    pub fn start_span<F, R>(&self, opts: SpanOptions, f: F) -> R
    where
        F: FnOnce(&Hub, &Arc<Span>) -> R,
    {
        let span = self.start_inactive_span(opts);
        let _finish = FinishGuard(Arc::clone(&span));
        self.with_scope(|hub| {
            hub.configure_scope(|scope| scope.set_span(Some(Arc::clone(&span))));
            f(hub, &span)
        })
    }

    fn root_scope_snapshot(&self) -> Scope {
        let mut scope = self.merged_scope();
        scope.set_span(None);
        scope
    }
}

fn random_unit() -> f64 {
    rand::rng().random()
}

/// Scope-layer access keeps working through a poisoning panic; the data
/// itself stays consistent because mutations are single assignments.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PopScopeGuard<'a> {
    hub: &'a Hub,
}

impl Drop for PopScopeGuard<'_> {
    fn drop(&mut self) {
        let mut stack = lock(&self.hub.stack);
        if stack.len() > 1 {
            stack.pop();
        }
    }
}

struct EndSessionGuard<'a> {
    hub: &'a Hub,
}

impl Drop for EndSessionGuard<'_> {
    fn drop(&mut self) {
        self.hub.end_session();
    }
}

struct FinishGuard(Arc<Span>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Builds an error event from an error and its source chain, root cause
/// first.
pub fn event_from_error<E: std::error::Error + ?Sized>(error: &E) -> Event {
    let mut exceptions = vec![exception_from_parts(format!("{error:?}"), error.to_string())];
    let mut source = error.source();
    while let Some(err) = source {
        exceptions.push(exception_from_parts(format!("{err:?}"), err.to_string()));
        source = err.source();
    }
    exceptions.reverse();

    let mut event = Event::new(unix_timestamp());
    event.level = Level::Error;
    event.exceptions = exceptions;
    event
}

/// Derives an exception type name from the error's Debug rendering,
/// which for derived impls starts with the type name.
fn exception_from_parts(debug_repr: String, value: String) -> Exception {
    let ty = debug_repr
        .split(['(', '{', ' ', '\n'])
        .next()
        .filter(|name| {
            !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == ':' || c == '_')
        })
        .unwrap_or("Error")
        .to_string();
    Exception {
        ty,
        value: Some(value),
        module: None,
        stacktrace: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ClientOptions;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn disabled_hub(configure: impl FnOnce(&mut ClientOptions)) -> Hub {
        let mut options = ClientOptions::default();
        configure(&mut options);
        let client = Client::new(options).expect("failed to build client");
        Hub::new(client)
    }

    #[test]
    fn test_with_scope_restores_previous_layer() {
        let hub = disabled_hub(|_| {});
        hub.configure_scope(|scope| scope.set_tag("outer", "1"));

        hub.with_scope(|hub| {
            hub.configure_scope(|scope| scope.set_tag("inner", "1"));
            let merged = hub.merged_scope();
            let mut event = Event::new(0.0);
            merged.apply_to_event(&mut event);
            assert!(event.tags.contains_key("outer"));
            assert!(event.tags.contains_key("inner"));
        });

        let merged = hub.merged_scope();
        let mut event = Event::new(0.0);
        merged.apply_to_event(&mut event);
        assert!(event.tags.contains_key("outer"));
        assert!(!event.tags.contains_key("inner"));
    }

    #[test]
    fn test_with_scope_restores_on_panic() {
        let hub = disabled_hub(|_| {});
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            hub.with_scope(|hub| {
                hub.configure_scope(|scope| scope.set_tag("doomed", "1"));
                panic!("boom");
            })
        }));
        assert!(result.is_err());

        let merged = hub.merged_scope();
        let mut event = Event::new(0.0);
        merged.apply_to_event(&mut event);
        assert!(!event.tags.contains_key("doomed"));
    }

    #[test]
    fn test_fork_does_not_leak_into_parent() {
        let hub = disabled_hub(|_| {});
        let fork = hub.fork();
        fork.configure_scope(|scope| scope.set_tag("forked", "1"));

        let mut event = Event::new(0.0);
        hub.merged_scope().apply_to_event(&mut event);
        assert!(!event.tags.contains_key("forked"));
    }

    #[test]
    fn test_breadcrumbs_survive_nested_scopes() {
        let hub = disabled_hub(|_| {});
        hub.with_scope(|hub| {
            hub.add_breadcrumb(Breadcrumb {
                timestamp: 1.0,
                level: Level::Info,
                category: None,
                message: Some("from inner scope".to_string()),
                data: Default::default(),
            });
        });
        assert_eq!(hub.merged_scope().breadcrumbs().count(), 1);
    }

    #[test]
    fn test_root_sampling_decided_once_children_inherit() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let sampler: Arc<crate::sampler::TracesSampler> =
            Arc::new(move |_: &SamplingContext<'_>| {
                counted.fetch_add(1, Ordering::SeqCst);
                1.0
            });
        let hub = disabled_hub(move |options| {
            options.traces_sampler = Some(sampler);
        });

        let root = hub.start_inactive_span(SpanOptions::new("GET /users", "http.server"));
        assert!(root.is_sampled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let child = root.child("SELECT", "db.query");
        let grandchild = child.child("encode", "serialize");
        assert!(child.is_sampled());
        assert!(grandchild.is_sampled());
        assert_eq!(child.sample_rate(), root.sample_rate());
        assert_eq!(grandchild.sample_rate(), root.sample_rate());
        // still exactly one sampler invocation for the whole trace
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_span_binds_and_restores_active_span() {
        let hub = disabled_hub(|options| {
            options.traces_sample_rate = Some(1.0);
        });
        assert!(hub.active_span().is_none());

        hub.start_span(SpanOptions::new("outer", "task"), |hub, outer| {
            let active = hub.active_span().expect("outer span must be active");
            assert_eq!(active.span_id(), outer.span_id());

            hub.start_span(SpanOptions::new("inner", "task"), |hub, inner| {
                let active = hub.active_span().expect("inner span must be active");
                assert_eq!(active.span_id(), inner.span_id());
                assert_eq!(inner.parent_span_id(), Some(outer.span_id()));
            });

            let active = hub.active_span().expect("outer span must be active again");
            assert_eq!(active.span_id(), outer.span_id());
        });

        assert!(hub.active_span().is_none());
    }

    #[test]
    fn test_start_span_finishes_even_on_panic() {
        let hub = disabled_hub(|options| {
            options.traces_sample_rate = Some(1.0);
        });
        let escaped = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&escaped);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            hub.start_span(SpanOptions::new("doomed", "task"), |_, span| {
                *slot.lock().unwrap() = Some(Arc::clone(span));
                panic!("boom");
            })
        }));
        assert!(result.is_err());
        let span = escaped.lock().unwrap().take().unwrap();
        assert!(span.is_finished());
    }

    #[test]
    fn test_remote_parent_inherits_decision() {
        use crate::span::RemoteContext;
        use beacon_protocol::{DynamicSamplingContext, SpanId};

        let hub = disabled_hub(|options| {
            // local configuration would say "never sample"
            options.traces_sample_rate = Some(0.0);
        });

        let remote_trace = TraceId::random();
        let mut opts = SpanOptions::new("POST /orders", "http.server");
        opts.remote_parent = Some(RemoteContext {
            trace_id: remote_trace,
            span_id: SpanId::random(),
            sampled: Some(true),
            dsc: Some(DynamicSamplingContext {
                trace_id: Some(remote_trace),
                sample_rate: Some(0.25),
                sample_rand: Some(0.1),
                sampled: Some(true),
                ..Default::default()
            }),
        });

        let span = hub.start_inactive_span(opts);
        assert_eq!(span.trace_id(), remote_trace);
        assert!(span.is_sampled());
        assert_eq!(span.sample_rate(), Some(0.25));
        // inherited DSC is frozen as-is
        assert_eq!(span.dsc().sample_rand, Some(0.1));
    }

    #[test]
    fn test_event_from_error_chains_root_cause_first() {
        #[derive(Debug, thiserror::Error)]
        #[error("outer failed")]
        struct Outer {
            #[source]
            inner: Inner,
        }

        #[derive(Debug, thiserror::Error)]
        #[error("inner failed")]
        struct Inner;

        let event = event_from_error(&Outer { inner: Inner });
        assert_eq!(event.exceptions.len(), 2);
        assert_eq!(event.exceptions[0].ty, "Inner");
        assert_eq!(event.exceptions[0].value.as_deref(), Some("inner failed"));
        assert_eq!(event.exceptions[1].ty, "Outer");
        assert_eq!(event.level, Level::Error);
    }
}
