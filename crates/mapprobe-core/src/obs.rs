//! Structured observability hooks for poll and probe lifecycles.
//!
//! This module provides:
//! - Check-scoped tracing spans via [`check_span`]
//! - Emission functions for poll and probe lifecycle events
//!
//! Events are emitted at `info!` level, per-attempt details at `debug!`.
//! Use `RUST_LOG=mapprobe_core=debug` to see every attempt.

use std::time::Duration;

use tracing::{debug, info, warn};

/// Span tagging every event of one end-to-end check.
///
/// # Example
///
/// ```ignore
/// check.run().instrument(check_span("DomainMappingWithWebsocket")).await
/// ```
pub fn check_span(check: &str) -> tracing::Span {
    tracing::info_span!("mapprobe.check", check = %check)
}

/// Emit event: poll started for a target.
pub fn emit_poll_started(target: &str, interval: Duration, timeout: Duration) {
    info!(
        event = "poll.started",
        subject = %target,
        interval_ms = interval.as_millis() as u64,
        timeout_ms = timeout.as_millis() as u64,
    );
}

/// Emit event: one predicate evaluation returned "not yet".
pub fn emit_poll_pending(target: &str, evaluation: u32, observed: Option<&str>) {
    debug!(
        event = "poll.pending",
        subject = %target,
        evaluation = evaluation,
        observed = observed.unwrap_or("-"),
    );
}

/// Emit event: poll finished, successfully or not.
pub fn emit_poll_finished(target: &str, evaluations: u32, elapsed: Duration, ready: bool) {
    if ready {
        info!(
            event = "poll.finished",
            subject = %target,
            evaluations = evaluations,
            elapsed_ms = elapsed.as_millis() as u64,
            ready = ready,
        );
    } else {
        warn!(
            event = "poll.finished",
            subject = %target,
            evaluations = evaluations,
            elapsed_ms = elapsed.as_millis() as u64,
            ready = ready,
        );
    }
}

/// Emit event: a probe attempt failed and will be retried after `delay`.
pub fn emit_probe_retry(label: &str, target: &str, attempt: u32, reason: &str, delay: Duration) {
    warn!(
        event = "probe.retry",
        label = %label,
        subject = %target,
        attempt = attempt,
        reason = %reason,
        delay_ms = delay.as_millis() as u64,
    );
}

/// Emit event: probe finished with the number of attempts used.
pub fn emit_probe_finished(label: &str, target: &str, attempts: u32, elapsed: Duration, matched: bool) {
    if matched {
        info!(
            event = "probe.finished",
            label = %label,
            subject = %target,
            attempts = attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            matched = matched,
        );
    } else {
        warn!(
            event = "probe.finished",
            label = %label,
            subject = %target,
            attempts = attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            matched = matched,
        );
    }
}
