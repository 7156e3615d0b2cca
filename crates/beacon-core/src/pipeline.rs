// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The deterministic event pipeline: scope merge, dedupe, inbound
//! filters, then user processors. Every drop is accounted before the
//! pipeline returns.
//!
//! Dedupe remembers exactly one signature, the most recently processed
//! error. Captures of other payload types leave that memory untouched.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, warn};

use beacon_protocol::{Category, DiscardReason, Event, Exception};
use beacon_transport::OutcomeRecorder;

use crate::scope::Scope;

/// Side data handed through capture alongside an event.
#[derive(Default)]
pub struct Hint {
    pub attachments: Vec<Attachment>,
}

/// Binary payload shipped in the same envelope as its event.
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Chain-of-responsibility hook over finished events. Returning `None`
/// vetoes the event.
pub trait EventProcessor: Send + Sync {
    fn process(&self, event: Event, hint: &Hint) -> Option<Event>;
}

impl<F> EventProcessor for F
where
    F: Fn(Event, &Hint) -> Option<Event> + Send + Sync,
{
    fn process(&self, event: Event, hint: &Hint) -> Option<Event> {
        self(event, hint)
    }
}

/// Signature of the most recently processed error, for window-1 dedupe.
#[derive(Debug, PartialEq)]
struct DedupeSignature {
    ty: String,
    value: Option<String>,
    frames: Vec<(Option<String>, Option<String>, Option<u32>)>,
}

const DEDUPE_FRAME_COUNT: usize = 3;

impl DedupeSignature {
    fn from_exception(exception: &Exception) -> Self {
        let frames = exception
            .stacktrace
            .as_ref()
            .map(|stacktrace| {
                stacktrace
                    .frames
                    .iter()
                    .rev()
                    .take(DEDUPE_FRAME_COUNT)
                    .map(|frame| (frame.module.clone(), frame.function.clone(), frame.lineno))
                    .collect()
            })
            .unwrap_or_default();
        DedupeSignature {
            ty: exception.ty.clone(),
            value: exception.value.clone(),
            frames,
        }
    }
}

pub(crate) struct EventPipeline {
    deny_urls: Vec<String>,
    last_error: Mutex<Option<DedupeSignature>>,
    processors: RwLock<Vec<Arc<dyn EventProcessor>>>,
    outcomes: OutcomeRecorder,
}

impl EventPipeline {
    pub(crate) fn new(deny_urls: Vec<String>, outcomes: OutcomeRecorder) -> Self {
        EventPipeline {
            deny_urls,
            last_error: Mutex::new(None),
            processors: RwLock::new(Vec::new()),
            outcomes,
        }
    }

    pub(crate) fn add_processor(&self, processor: Arc<dyn EventProcessor>) {
        #[allow(clippy::expect_used)]
        self.processors
            .write()
            .expect("lock poisoned")
            .push(processor);
    }

    /// Runs the staged pipeline. `None` means the event was dropped and
    /// the drop has been recorded.
    pub(crate) fn process(&self, mut event: Event, scope: &Scope, hint: &Hint) -> Option<Event> {
        let category = if event.is_transaction() {
            Category::Transaction
        } else {
            Category::Error
        };

        scope.apply_to_event(&mut event);

        if category == Category::Error {
            if self.is_duplicate(&event) {
                debug!("dropping event {}: duplicate of the previous error", event.event_id);
                self.outcomes.record(DiscardReason::Duplicate, category);
                return None;
            }
            if self.is_filtered(&event) {
                debug!("dropping event {}: matched an inbound filter", event.event_id);
                self.outcomes.record(DiscardReason::Filtered, category);
                return None;
            }
        }

        #[allow(clippy::expect_used)]
        let processors = self.processors.read().expect("lock poisoned").clone();
        for processor in processors {
            let backup = event.clone();
            match catch_unwind(AssertUnwindSafe(|| processor.process(event, hint))) {
                Ok(Some(next)) => event = next,
                Ok(None) => {
                    debug!("dropping event {}: vetoed by a processor", backup.event_id);
                    self.outcomes.record(DiscardReason::BeforeSend, category);
                    return None;
                }
                Err(_) => {
                    warn!("event processor panicked, passing the event through unchanged");
                    event = backup;
                }
            }
        }

        Some(event)
    }

    /// Window-1 dedupe: compares against the single most recent error
    /// signature and remembers the new one.
    fn is_duplicate(&self, event: &Event) -> bool {
        let Some(exception) = event.exceptions.first() else {
            return false;
        };
        let signature = DedupeSignature::from_exception(exception);
        #[allow(clippy::expect_used)]
        let mut last = self.last_error.lock().expect("lock poisoned");
        if last.as_ref() == Some(&signature) {
            return true;
        }
        *last = Some(signature);
        false
    }

    fn is_filtered(&self, event: &Event) -> bool {
        if self.matches_deny_list(event) {
            return true;
        }
        is_internal_sdk_error(event)
    }

    fn matches_deny_list(&self, event: &Event) -> bool {
        if self.deny_urls.is_empty() {
            return false;
        }
        event.exceptions.iter().any(|exception| {
            exception
                .stacktrace
                .iter()
                .flat_map(|stacktrace| &stacktrace.frames)
                .any(|frame| {
                    let paths = [frame.filename.as_deref(), frame.abs_path.as_deref()];
                    paths.into_iter().flatten().any(|path| {
                        self.deny_urls.iter().any(|deny| path.contains(deny))
                    })
                })
        })
    }
}

/// Errors raised from the client's own capture path must not loop back
/// through it.
fn is_internal_sdk_error(event: &Event) -> bool {
    let Some(frame) = event
        .exceptions
        .first()
        .and_then(|exception| exception.stacktrace.as_ref())
        .and_then(|stacktrace| stacktrace.frames.last())
    else {
        return false;
    };
    let module = frame.module.as_deref().unwrap_or("");
    let function = frame.function.as_deref().unwrap_or("");
    module.starts_with("beacon_core") || function.starts_with("beacon_core::")
}
