//! Metric families and the recording facade
//!
//! Two parallel Prometheus schemas exist: the default one and a legacy one
//! kept for compatibility with older dashboards. An interceptor is built
//! against exactly one of them; the families are never co-written for a
//! single call.

use lazy_static::lazy_static;
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use tonic::Code;

use crate::classify::CallDescriptor;
use crate::error::Error;

lazy_static! {
    /// Process-wide default registry, exposed by the exporter.
    pub static ref REGISTRY_INSTANCE: Registry = Registry::new();
}

const CALL_LABELS: &[&str] = &["grpc_type", "grpc_service", "grpc_method"];
const HANDLED_LABELS: &[&str] = &["grpc_type", "grpc_service", "grpc_method", "code"];

/// Recording facade driven by the interception core.
///
/// Implementations are write-only and must be safe for concurrent use from
/// any number of in-flight calls.
pub trait CallMetrics: Send + Sync {
    /// One call began (non-streaming-request shapes only).
    fn started(&self, desc: &CallDescriptor);

    /// One streamed message was received from the client.
    fn stream_received(&self, desc: &CallDescriptor);

    /// One streamed message was sent to the client.
    fn stream_sent(&self, desc: &CallDescriptor);

    /// One call completed with the given status code.
    fn handled(&self, desc: &CallDescriptor, code: Code);

    /// Handling latency of one completed call, in seconds.
    ///
    /// The implementation decides whether the observation is kept; callers
    /// invoke this unconditionally on every non-streaming-response exit.
    fn observe_latency(&self, desc: &CallDescriptor, seconds: f64);
}

/// Status code label values, matching the gRPC status names.
pub fn code_name(code: Code) -> &'static str {
    match code {
        Code::Ok => "OK",
        Code::Cancelled => "CANCELLED",
        Code::Unknown => "UNKNOWN",
        Code::InvalidArgument => "INVALID_ARGUMENT",
        Code::DeadlineExceeded => "DEADLINE_EXCEEDED",
        Code::NotFound => "NOT_FOUND",
        Code::AlreadyExists => "ALREADY_EXISTS",
        Code::PermissionDenied => "PERMISSION_DENIED",
        Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
        Code::FailedPrecondition => "FAILED_PRECONDITION",
        Code::Aborted => "ABORTED",
        Code::OutOfRange => "OUT_OF_RANGE",
        Code::Unimplemented => "UNIMPLEMENTED",
        Code::Internal => "INTERNAL",
        Code::Unavailable => "UNAVAILABLE",
        Code::DataLoss => "DATA_LOSS",
        Code::Unauthenticated => "UNAUTHENTICATED",
    }
}

/// Default schema, mirroring the grpc-ecosystem server metric names.
pub struct DefaultMetrics {
    started: CounterVec,
    msg_received: CounterVec,
    msg_sent: CounterVec,
    handled: CounterVec,
    handling_seconds: HistogramVec,
    enable_handling_time_histogram: bool,
}

impl DefaultMetrics {
    pub fn new(registry: &Registry, enable_handling_time_histogram: bool) -> Result<Self, Error> {
        let started = CounterVec::new(
            Opts::new(
                "grpc_server_started_total",
                "Total number of RPCs started on the server.",
            ),
            CALL_LABELS,
        )?;
        let msg_received = CounterVec::new(
            Opts::new(
                "grpc_server_msg_received_total",
                "Total number of stream messages received from the client.",
            ),
            CALL_LABELS,
        )?;
        let msg_sent = CounterVec::new(
            Opts::new(
                "grpc_server_msg_sent_total",
                "Total number of stream messages sent by the server.",
            ),
            CALL_LABELS,
        )?;
        let handled = CounterVec::new(
            Opts::new(
                "grpc_server_handled_total",
                "Total number of RPCs completed on the server, regardless of success or failure.",
            ),
            HANDLED_LABELS,
        )?;
        let handling_seconds = HistogramVec::new(
            HistogramOpts::new(
                "grpc_server_handling_seconds",
                "Histogram of response latency (seconds) of gRPC that had been \
                 application-level handled by the server.",
            ),
            CALL_LABELS,
        )?;
        registry.register(Box::new(started.clone()))?;
        registry.register(Box::new(msg_received.clone()))?;
        registry.register(Box::new(msg_sent.clone()))?;
        registry.register(Box::new(handled.clone()))?;
        registry.register(Box::new(handling_seconds.clone()))?;
        Ok(DefaultMetrics {
            started,
            msg_received,
            msg_sent,
            handled,
            handling_seconds,
            enable_handling_time_histogram,
        })
    }
}

impl CallMetrics for DefaultMetrics {
    fn started(&self, desc: &CallDescriptor) {
        self.started.with_label_values(&desc.label_values()).inc();
    }

    fn stream_received(&self, desc: &CallDescriptor) {
        self.msg_received
            .with_label_values(&desc.label_values())
            .inc();
    }

    fn stream_sent(&self, desc: &CallDescriptor) {
        self.msg_sent.with_label_values(&desc.label_values()).inc();
    }

    fn handled(&self, desc: &CallDescriptor, code: Code) {
        let [grpc_type, service, method] = desc.label_values();
        self.handled
            .with_label_values(&[grpc_type, service, method, code_name(code)])
            .inc();
    }

    fn observe_latency(&self, desc: &CallDescriptor, seconds: f64) {
        if self.enable_handling_time_histogram {
            self.handling_seconds
                .with_label_values(&desc.label_values())
                .observe(seconds);
        }
    }
}

/// Legacy schema, kept wire-compatible with pre-0.3 metric consumers.
///
/// Latency is always observed here; the histogram feature flag only gates
/// the default schema.
pub struct LegacyMetrics {
    started: CounterVec,
    msg_received: CounterVec,
    msg_sent: CounterVec,
    handled: CounterVec,
    handled_latency: HistogramVec,
}

impl LegacyMetrics {
    pub fn new(registry: &Registry) -> Result<Self, Error> {
        let started = CounterVec::new(
            Opts::new(
                "grpc_server_started_counter",
                "Total number of RPCs started on the server.",
            ),
            CALL_LABELS,
        )?;
        let msg_received = CounterVec::new(
            Opts::new(
                "grpc_server_msg_received_counter",
                "Total number of stream messages received from the client.",
            ),
            CALL_LABELS,
        )?;
        let msg_sent = CounterVec::new(
            Opts::new(
                "grpc_server_msg_sent_counter",
                "Total number of stream messages sent by the server.",
            ),
            CALL_LABELS,
        )?;
        let handled = CounterVec::new(
            Opts::new(
                "grpc_server_handled_counter",
                "Total number of RPCs completed on the server, regardless of success or failure.",
            ),
            HANDLED_LABELS,
        )?;
        let handled_latency = HistogramVec::new(
            HistogramOpts::new(
                "grpc_server_handled_latency_seconds",
                "Histogram of response latency (seconds) of gRPC that had been \
                 application-level handled by the server.",
            ),
            CALL_LABELS,
        )?;
        registry.register(Box::new(started.clone()))?;
        registry.register(Box::new(msg_received.clone()))?;
        registry.register(Box::new(msg_sent.clone()))?;
        registry.register(Box::new(handled.clone()))?;
        registry.register(Box::new(handled_latency.clone()))?;
        Ok(LegacyMetrics {
            started,
            msg_received,
            msg_sent,
            handled,
            handled_latency,
        })
    }
}

impl CallMetrics for LegacyMetrics {
    fn started(&self, desc: &CallDescriptor) {
        self.started.with_label_values(&desc.label_values()).inc();
    }

    fn stream_received(&self, desc: &CallDescriptor) {
        self.msg_received
            .with_label_values(&desc.label_values())
            .inc();
    }

    fn stream_sent(&self, desc: &CallDescriptor) {
        self.msg_sent.with_label_values(&desc.label_values()).inc();
    }

    fn handled(&self, desc: &CallDescriptor, code: Code) {
        let [grpc_type, service, method] = desc.label_values();
        self.handled
            .with_label_values(&[grpc_type, service, method, code_name(code)])
            .inc();
    }

    fn observe_latency(&self, desc: &CallDescriptor, seconds: f64) {
        self.handled_latency
            .with_label_values(&desc.label_values())
            .observe(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;

    fn descriptor() -> CallDescriptor {
        classify(false, false, "/helloworld.Greeter/SayHello").unwrap()
    }

    fn counter_value(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> f64 {
        sample_value(registry, name, labels, false)
    }

    fn histogram_count(registry: &Registry, name: &str, labels: &[(&str, &str)]) -> f64 {
        sample_value(registry, name, labels, true)
    }

    fn sample_value(
        registry: &Registry,
        name: &str,
        labels: &[(&str, &str)],
        histogram: bool,
    ) -> f64 {
        for family in registry.gather() {
            if family.get_name() != name {
                continue;
            }
            'metric: for metric in family.get_metric() {
                for (key, value) in labels {
                    let matched = metric
                        .get_label()
                        .iter()
                        .any(|l| l.get_name() == *key && l.get_value() == *value);
                    if !matched {
                        continue 'metric;
                    }
                }
                return if histogram {
                    metric.get_histogram().get_sample_count() as f64
                } else {
                    metric.get_counter().get_value()
                };
            }
        }
        0.0
    }

    #[test]
    fn test_default_family_names_registered() {
        let registry = Registry::new();
        let metrics = DefaultMetrics::new(&registry, true).unwrap();
        let desc = descriptor();
        metrics.started(&desc);
        metrics.handled(&desc, Code::Ok);
        metrics.observe_latency(&desc, 0.01);

        assert_eq!(
            counter_value(
                &registry,
                "grpc_server_started_total",
                &[("grpc_service", "helloworld.Greeter"), ("grpc_method", "SayHello")]
            ),
            1.0
        );
        assert_eq!(
            counter_value(&registry, "grpc_server_handled_total", &[("code", "OK")]),
            1.0
        );
        assert_eq!(
            histogram_count(&registry, "grpc_server_handling_seconds", &[]),
            1.0
        );
    }

    #[test]
    fn test_default_latency_gated_by_flag() {
        let registry = Registry::new();
        let metrics = DefaultMetrics::new(&registry, false).unwrap();
        metrics.observe_latency(&descriptor(), 0.5);
        assert_eq!(
            histogram_count(&registry, "grpc_server_handling_seconds", &[]),
            0.0
        );
    }

    #[test]
    fn test_legacy_family_names_registered() {
        let registry = Registry::new();
        let metrics = LegacyMetrics::new(&registry).unwrap();
        let desc = descriptor();
        metrics.started(&desc);
        metrics.handled(&desc, Code::NotFound);
        metrics.observe_latency(&desc, 0.01);

        assert_eq!(
            counter_value(&registry, "grpc_server_started_counter", &[]),
            1.0
        );
        assert_eq!(
            counter_value(
                &registry,
                "grpc_server_handled_counter",
                &[("code", "NOT_FOUND")]
            ),
            1.0
        );
        // Legacy latency records regardless of the histogram flag.
        assert_eq!(
            histogram_count(&registry, "grpc_server_handled_latency_seconds", &[]),
            1.0
        );
        // The default family is never registered alongside.
        assert!(registry
            .gather()
            .iter()
            .all(|f| !f.get_name().ends_with("_total")));
    }

    #[test]
    fn test_code_names() {
        assert_eq!(code_name(Code::Ok), "OK");
        assert_eq!(code_name(Code::Cancelled), "CANCELLED");
        assert_eq!(code_name(Code::NotFound), "NOT_FOUND");
        assert_eq!(code_name(Code::Unknown), "UNKNOWN");
    }
}
