use thiserror::Error;

/// Errors surfaced by the interceptor itself.
///
/// Handler errors are never wrapped here; they stay `tonic::Status` and are
/// re-raised to the transport unchanged.
#[derive(Debug, Error)]
pub enum Error {
    /// The call path could not be split into a service and a method.
    ///
    /// A call that failed basic routing should never reach the interceptor,
    /// so this is a configuration error, not a runtime condition.
    #[error("malformed method path: {path:?}")]
    MalformedPath { path: String },

    /// Metric registration with the Prometheus registry failed.
    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}
