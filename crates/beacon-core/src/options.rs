// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client configuration.
//!
//! Options are plain data the host constructs and hands to
//! [`Client::new`](crate::Client::new); `from_env` layers the `BEACON_*`
//! environment variables over the defaults.

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use beacon_protocol::Dsn;

use crate::sampler::TracesSampler;

/// Client identifier reported to the collector.
pub const USER_AGENT: &str = concat!("beacon-rust/", env!("CARGO_PKG_VERSION"));

const DEFAULT_MAX_BREADCRUMBS: usize = 100;
const DEFAULT_MAX_IN_FLIGHT: usize = 8;

#[derive(Clone)]
pub struct ClientOptions {
    /// Collector address. Without one the client runs in disabled mode
    /// and discards everything.
    pub dsn: Option<Dsn>,
    pub release: Option<String>,
    pub environment: Option<String>,
    pub debug: bool,
    /// Sample rate applied to error events, in [0, 1].
    pub sample_rate: f64,
    /// Fixed rate for trace sampling. `None` disables tracing.
    pub traces_sample_rate: Option<f64>,
    /// Callback deciding the trace sample rate per root span. Takes
    /// precedence over `traces_sample_rate`.
    pub traces_sampler: Option<Arc<TracesSampler>>,
    /// Capacity of each scope's breadcrumb ring buffer.
    pub max_breadcrumbs: usize,
    /// Substrings matched against exception frame paths; matching events
    /// are dropped as filtered.
    pub deny_urls: Vec<String>,
    /// Track one session per isolation scope.
    pub auto_session_tracking: bool,
    pub session_flush_interval: Duration,
    pub report_flush_interval: Duration,
    /// Maximum concurrently outstanding transport requests.
    pub max_in_flight: usize,
    pub http_timeout: Duration,
    pub https_proxy: Option<String>,
    /// How long `close` waits for the transport to drain.
    pub shutdown_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            dsn: None,
            release: None,
            environment: None,
            debug: false,
            sample_rate: 1.0,
            traces_sample_rate: None,
            traces_sampler: None,
            max_breadcrumbs: DEFAULT_MAX_BREADCRUMBS,
            deny_urls: Vec::new(),
            auto_session_tracking: true,
            session_flush_interval: Duration::from_secs(60),
            report_flush_interval: Duration::from_secs(60),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            http_timeout: Duration::from_secs(30),
            https_proxy: None,
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

impl ClientOptions {
    /// Defaults with `BEACON_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut options = ClientOptions::default();

        if let Ok(raw) = env::var("BEACON_DSN") {
            match raw.parse::<Dsn>() {
                Ok(dsn) => options.dsn = Some(dsn),
                Err(err) => warn!("ignoring invalid BEACON_DSN: {err}"),
            }
        }
        if let Ok(release) = env::var("BEACON_RELEASE") {
            options.release = Some(release);
        }
        if let Ok(environment) = env::var("BEACON_ENVIRONMENT") {
            options.environment = Some(environment);
        }
        if let Ok(raw) = env::var("BEACON_TRACES_SAMPLE_RATE") {
            match raw.parse::<f64>() {
                Ok(rate) => options.traces_sample_rate = Some(rate),
                Err(_) => warn!("ignoring non-numeric BEACON_TRACES_SAMPLE_RATE: {raw:?}"),
            }
        }
        if let Ok(raw) = env::var("BEACON_DEBUG") {
            options.debug = raw == "1" || raw.eq_ignore_ascii_case("true");
        }
        options.https_proxy = env::var("BEACON_HTTPS_PROXY")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();

        options
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("dsn", &self.dsn)
            .field("release", &self.release)
            .field("environment", &self.environment)
            .field("debug", &self.debug)
            .field("sample_rate", &self.sample_rate)
            .field("traces_sample_rate", &self.traces_sample_rate)
            .field(
                "traces_sampler",
                &self.traces_sampler.as_ref().map(|_| "<callback>"),
            )
            .field("max_breadcrumbs", &self.max_breadcrumbs)
            .field("deny_urls", &self.deny_urls)
            .field("auto_session_tracking", &self.auto_session_tracking)
            .field("session_flush_interval", &self.session_flush_interval)
            .field("report_flush_interval", &self.report_flush_interval)
            .field("max_in_flight", &self.max_in_flight)
            .field("http_timeout", &self.http_timeout)
            .field("https_proxy", &self.https_proxy)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}
