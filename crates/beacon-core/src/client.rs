// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The client ties the pipeline, aggregators and transport together.
//!
//! A client is constructed explicitly and injected into every hub that
//! captures through it; there is no ambient global instance. Without a
//! DSN the client runs disabled and silently discards everything.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use beacon_protocol::{
    Category, DiscardReason, DynamicSamplingContext, Envelope, EnvelopeHeader, EnvelopeItem,
    Event, EventId, MetricBatch,
};
use beacon_transport::{
    OutcomeRecorder, ReportFlusher, Transport, TransportConfig, TransportError,
};

use crate::options::{ClientOptions, USER_AGENT};
use crate::pipeline::{EventPipeline, EventProcessor, Hint};
use crate::scope::Scope;
use crate::sessions::{SessionAggregator, SessionFlusher};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to initialize transport: {0}")]
    Transport(#[from] TransportError),
}

pub struct Client {
    options: ClientOptions,
    transport: Option<Arc<Transport>>,
    outcomes: OutcomeRecorder,
    pipeline: EventPipeline,
    sessions: SessionAggregator,
    report_flusher: Option<Arc<ReportFlusher>>,
    session_flusher: Option<Arc<SessionFlusher>>,
    global_scope: Mutex<Scope>,
    cancel: CancellationToken,
}

impl Client {
    /// Builds a client and starts its background flush loops. Must run
    /// inside a tokio runtime when a DSN is configured.
    pub fn new(options: ClientOptions) -> Result<Arc<Client>, ClientError> {
        let outcomes = OutcomeRecorder::new();
        let transport = match &options.dsn {
            Some(dsn) => Some(Arc::new(Transport::new(
                TransportConfig {
                    dsn: dsn.clone(),
                    timeout: options.http_timeout,
                    https_proxy: options.https_proxy.clone(),
                    max_in_flight: options.max_in_flight,
                    user_agent: USER_AGENT.to_string(),
                },
                outcomes.clone(),
            )?)),
            None => {
                debug!("no DSN configured, telemetry will be discarded");
                None
            }
        };

        let cancel = CancellationToken::new();
        let sessions = SessionAggregator::new();
        let (report_flusher, session_flusher) = match &transport {
            Some(transport) => {
                let report_flusher = Arc::new(ReportFlusher::new(
                    Arc::clone(transport),
                    outcomes.clone(),
                    options.report_flush_interval,
                    cancel.clone(),
                ));
                let session_flusher = Arc::new(SessionFlusher::new(
                    sessions.clone(),
                    Arc::clone(transport),
                    options.session_flush_interval,
                    cancel.clone(),
                ));
                tokio::spawn({
                    let flusher = Arc::clone(&report_flusher);
                    async move { flusher.spin().await }
                });
                tokio::spawn({
                    let flusher = Arc::clone(&session_flusher);
                    async move { flusher.spin().await }
                });
                (Some(report_flusher), Some(session_flusher))
            }
            None => (None, None),
        };

        let pipeline = EventPipeline::new(options.deny_urls.clone(), outcomes.clone());
        let global_scope = Mutex::new(Scope::new(options.max_breadcrumbs));

        Ok(Arc::new(Client {
            options,
            transport,
            outcomes,
            pipeline,
            sessions,
            report_flusher,
            session_flusher,
            global_scope,
            cancel,
        }))
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Registers an event processor at the end of the chain.
    pub fn add_event_processor(&self, processor: Arc<dyn EventProcessor>) {
        self.pipeline.add_processor(processor);
    }

    /// Mutates the process-wide scope layer.
    pub fn configure_global_scope<F: FnOnce(&mut Scope)>(&self, f: F) {
        #[allow(clippy::expect_used)]
        let mut scope = self.global_scope.lock().expect("lock poisoned");
        f(&mut scope);
    }

    pub(crate) fn global_scope_snapshot(&self) -> Scope {
        #[allow(clippy::expect_used)]
        let scope = self.global_scope.lock().expect("lock poisoned");
        scope.clone()
    }

    pub(crate) fn sessions(&self) -> &SessionAggregator {
        &self.sessions
    }

    /// Runs an event through the pipeline and submits it. The returned
    /// id is assigned even when the event is dropped on the way.
    pub(crate) fn capture_event(
        &self,
        mut event: Event,
        scope: &Scope,
        hint: &Hint,
        dsc: Option<DynamicSamplingContext>,
    ) -> EventId {
        let event_id = event.event_id;
        if self.transport.is_none() {
            return event_id;
        }

        if event.release.is_none() {
            event.release = self.options.release.clone();
        }
        if event.environment.is_none() {
            event.environment = self.options.environment.clone();
        }

        if !event.is_transaction() && self.options.sample_rate < 1.0 {
            let roll: f64 = rand::Rng::random(&mut rand::rng());
            if roll >= self.options.sample_rate {
                self.outcomes
                    .record(DiscardReason::SampleRate, Category::Error);
                return event_id;
            }
        }

        let Some(event) = self.pipeline.process(event, scope, hint) else {
            return event_id;
        };
        self.submit(event, hint, dsc);
        event_id
    }

    /// Submits a finished transaction produced by a root span.
    pub(crate) fn capture_transaction(
        &self,
        event: Event,
        scope: &Scope,
        dsc: DynamicSamplingContext,
    ) {
        if self.transport.is_none() {
            return;
        }
        let hint = Hint::default();
        let mut event = event;
        if event.release.is_none() {
            event.release = self.options.release.clone();
        }
        if event.environment.is_none() {
            event.environment = self.options.environment.clone();
        }
        let Some(event) = self.pipeline.process(event, scope, &hint) else {
            return;
        };
        self.submit(event, &hint, Some(dsc));
    }

    /// Ships a pre-aggregated metric batch.
    pub fn capture_metrics(&self, batch: MetricBatch) {
        let Some(transport) = &self.transport else {
            return;
        };
        if batch.is_empty() {
            return;
        }
        match EnvelopeItem::from_metrics(&batch) {
            Ok(item) => {
                let mut envelope = Envelope::new(EnvelopeHeader::new());
                envelope.add_item(item);
                transport.send(envelope);
            }
            Err(err) => {
                error!("failed to serialize metric batch: {err}");
                self.outcomes
                    .record(DiscardReason::InternalSdkError, Category::Default);
            }
        }
    }

    pub(crate) fn record_unsampled_transaction(&self) {
        self.outcomes
            .record(DiscardReason::SampleRate, Category::Transaction);
    }

    fn submit(&self, event: Event, hint: &Hint, dsc: Option<DynamicSamplingContext>) {
        let Some(transport) = &self.transport else {
            return;
        };
        let category = if event.is_transaction() {
            Category::Transaction
        } else {
            Category::Error
        };
        let item = match EnvelopeItem::from_event(&event) {
            Ok(item) => item,
            Err(err) => {
                error!("failed to serialize event {}: {err}", event.event_id);
                self.outcomes
                    .record(DiscardReason::InternalSdkError, category);
                return;
            }
        };

        let mut header = EnvelopeHeader::new();
        header.event_id = Some(event.event_id);
        header.dsn = self.options.dsn.as_ref().map(|dsn| dsn.to_string());
        header.trace = dsc;

        let mut envelope = Envelope::new(header);
        envelope.add_item(item);
        for attachment in &hint.attachments {
            envelope.add_item(EnvelopeItem::attachment(
                &attachment.filename,
                attachment.content_type.as_deref(),
                attachment.bytes.clone(),
            ));
        }
        transport.send(envelope);
    }

    fn flush_aggregates(&self) {
        if let Some(flusher) = &self.session_flusher {
            flusher.flush_now();
        }
        if let Some(flusher) = &self.report_flusher {
            flusher.flush_now();
        }
    }

    /// Flushes aggregates and waits for the transport to drain.
    pub async fn flush(&self, timeout: Duration) -> bool {
        self.flush_aggregates();
        match &self.transport {
            Some(transport) => transport.flush(timeout).await,
            None => true,
        }
    }

    /// Stops the background loops, flushes, and rejects all further
    /// sends. Returns false if the transport did not drain in time.
    pub async fn close(&self, timeout: Duration) -> bool {
        self.cancel.cancel();
        self.flush_aggregates();
        match &self.transport {
            Some(transport) => transport.close(timeout).await,
            None => true,
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
