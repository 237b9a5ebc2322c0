/*!
 * Tracing
 * Subscriber setup and per-occurrence spans for delayed signals
 */

use crate::signals::Signal;
use std::time::{Duration, Instant};
use tracing::{debug, span, warn, Level, Span};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

/// Occurrences held longer than this are reported as warnings
const SLOW_DELAY: Duration = Duration::from_secs(5);

/// Initialize structured tracing on stderr
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - SIGDELAY_TRACE_JSON: Enable JSON output (default: false)
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var("SIGDELAY_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        debug!(json = use_json, "Tracing initialized");
    }
}

/// Span covering one occurrence of a delayed signal, from observation to
/// delivery or drop
pub struct OccurrenceSpan {
    span: Span,
    start: Instant,
    signal: Signal,
}

impl OccurrenceSpan {
    pub fn new(signal: Signal, voters: usize) -> Self {
        let trace_id = Uuid::new_v4();
        let span = span!(
            Level::DEBUG,
            "occurrence",
            trace_id = %trace_id,
            signal = %signal,
            voters,
            allowed = tracing::field::Empty,
            duration_us = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
            signal,
        }
    }

    /// Record the consensus
    pub fn record_outcome(&self, allowed: bool) {
        self.span.record("allowed", allowed);
    }

    /// Enter the span context
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for OccurrenceSpan {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_us", duration.as_micros() as u64);

        let _entered = self.span.enter();
        if duration > SLOW_DELAY {
            warn!(
                signal = %self.signal,
                duration_ms = duration.as_millis() as u64,
                "Delayed signal was held for a long time"
            );
        }
    }
}
