//! Prometheus instrumentation for gRPC servers
//!
//! This crate wraps the method handlers of a gRPC server runtime so that
//! every call, unary or streaming, produces standardized operational
//! metrics: call counts, completion counts by status code, per-message
//! stream counts and handling-latency histograms. The wrapped handlers keep
//! their exact external contract; everything this crate does is a
//! write-only side channel into a Prometheus registry.

pub mod classify;
pub mod config;
pub mod error;
pub mod exporter;
pub mod handler;
pub mod interceptor;
pub mod metrics;
pub mod stream;

pub use classify::{classify, CallDescriptor, GrpcType};
pub use config::RuntimeConfig;
pub use error::Error;
pub use handler::{
    resolve_status, Behavior, CallContext, CallDetails, MessageStream, MethodHandler,
};
pub use interceptor::PromServerInterceptor;
pub use metrics::{CallMetrics, DefaultMetrics, LegacyMetrics, REGISTRY_INSTANCE};
pub use stream::{CountingStream, MsgDirection};
