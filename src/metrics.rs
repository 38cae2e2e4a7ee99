//! Prometheus metrics for the gateway and the executor
//!
//! All collectors live in one registry and are exposed as text on
//! `GET /metrics` by both services.
//!
//! ```text
//! gateway:  agent_turns_total, agent_rounds, agent_tool_calls_total,
//!           llm_call_duration_seconds, memory_threads_active
//! executor: sandbox_executions_total, sandbox_execution_duration_seconds
//! both:     http_requests_in_flight, errors_total
//! ```

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Turns handled, by outcome (success, tool_loop_exceeded, model_error)
    pub static ref AGENT_TURNS: IntCounterVec = register(IntCounterVec::new(
        Opts::new("agent_turns_total", "Agent turns by outcome"),
        &["status"],
    ));

    /// Model rounds needed per turn
    pub static ref AGENT_ROUNDS: Histogram = register(Histogram::with_opts(
        HistogramOpts::new("agent_rounds", "Model rounds per turn")
            .buckets(vec![1.0, 2.0, 3.0, 4.0, 6.0, 8.0, 10.0, 16.0]),
    ));

    /// Tool dispatches, by tool and outcome (success, failure, error)
    pub static ref AGENT_TOOL_CALLS: IntCounterVec = register(IntCounterVec::new(
        Opts::new("agent_tool_calls_total", "Tool calls by tool and outcome"),
        &["tool", "status"],
    ));

    pub static ref LLM_CALL_DURATION: HistogramVec = register(HistogramVec::new(
        HistogramOpts::new("llm_call_duration_seconds", "Model call latency")
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["model"],
    ));

    pub static ref MEMORY_THREADS_ACTIVE: IntGauge = register(IntGauge::new(
        "memory_threads_active",
        "Threads currently held by the memory store",
    ));

    /// Sandbox executions by outcome (success, error, timeout, crashed)
    pub static ref SANDBOX_EXECUTIONS: IntCounterVec = register(IntCounterVec::new(
        Opts::new("sandbox_executions_total", "Sandbox executions by outcome"),
        &["status"],
    ));

    pub static ref SANDBOX_DURATION: Histogram = register(Histogram::with_opts(
        HistogramOpts::new("sandbox_execution_duration_seconds", "Wall time per execution")
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    ));

    pub static ref HTTP_REQUESTS_IN_FLIGHT: IntGaugeVec = register(IntGaugeVec::new(
        Opts::new("http_requests_in_flight", "Requests currently being served"),
        &["route"],
    ));

    /// Errors by kind (bad_request, rate_limited, model, tool, sandbox)
    pub static ref ERRORS_TOTAL: IntCounterVec = register(IntCounterVec::new(
        Opts::new("errors_total", "Errors by kind"),
        &["kind"],
    ));
}

/// Register a collector, panicking only on programmer error
/// (duplicate or malformed metric definitions).
fn register<C>(collector: Result<C, prometheus::Error>) -> C
where
    C: prometheus::core::Collector + Clone + 'static,
{
    let collector = collector.expect("invalid metric definition");
    REGISTRY
        .register(Box::new(collector.clone()))
        .expect("metric registered twice");
    collector
}

/// Render every registered metric in the text exposition format
pub fn encode_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Decrements an in-flight gauge when dropped, so cancelled requests
/// are accounted for too
pub struct InFlightGuard {
    route: &'static str,
}

impl InFlightGuard {
    pub fn new(route: &'static str) -> Self {
        HTTP_REQUESTS_IN_FLIGHT.with_label_values(&[route]).inc();
        Self { route }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        HTTP_REQUESTS_IN_FLIGHT.with_label_values(&[self.route]).dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_metrics() {
        AGENT_TURNS.with_label_values(&["success"]).inc();
        SANDBOX_EXECUTIONS.with_label_values(&["success"]).inc();

        let text = encode_metrics();
        assert!(text.contains("agent_turns_total"));
        assert!(text.contains("sandbox_executions_total"));
    }

    #[test]
    fn test_in_flight_guard_balances() {
        let gauge = HTTP_REQUESTS_IN_FLIGHT.with_label_values(&["test_route"]);
        let before = gauge.get();
        {
            let _guard = InFlightGuard::new("test_route");
            assert_eq!(gauge.get(), before + 1);
        }
        assert_eq!(gauge.get(), before);
    }
}
