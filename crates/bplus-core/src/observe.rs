//! Optional metrics instrumentation.
//!
//! When the `observe` feature is enabled, dispatch operations emit counters,
//! histograms, and gauges via the [`metrics`] crate. A downstream application
//! must install a metrics recorder to collect the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

/// Record a finished task (counter + engine-call latency).
///
/// - `bplus.task.completed_total` – counter with `op` and `outcome` labels
/// - `bplus.task.duration_seconds` – histogram with `op` label
#[inline]
pub fn record_task(op: &'static str, duration: std::time::Duration, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("bplus.task.completed_total", "op" => op, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("bplus.task.duration_seconds", "op" => op)
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (op, duration, success);
    }
}

/// Set the number of tasks currently in flight.
///
/// - `bplus.task.in_flight` – gauge
#[inline]
pub fn set_in_flight(count: usize) {
    #[cfg(feature = "observe")]
    {
        metrics::gauge!("bplus.task.in_flight").set(count as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = count;
    }
}

/// Record time spent waiting for the write gate.
///
/// - `bplus.write_gate.wait_duration_seconds` – histogram
#[inline]
pub fn record_gate_wait(duration: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!("bplus.write_gate.wait_duration_seconds")
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = duration;
    }
}

/// Record a finished range stream.
///
/// - `bplus.stream.records_total` – counter
/// - `bplus.stream.completed_total` – counter with `outcome` label
#[inline]
pub fn record_stream(records: u64, outcome: &'static str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("bplus.stream.records_total").increment(records);
        metrics::counter!("bplus.stream.completed_total", "outcome" => outcome).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (records, outcome);
    }
}

/// Record a decision answered across the worker/consumer rendezvous.
///
/// - `bplus.rendezvous.decisions_total` – counter with `decision` label
#[inline]
pub fn record_decision(accepted: bool) {
    #[cfg(feature = "observe")]
    {
        let decision = if accepted { "accept" } else { "reject" };
        metrics::counter!("bplus.rendezvous.decisions_total", "decision" => decision)
            .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = accepted;
    }
}
