//! Call classification
//!
//! Derives a normalized call-type tag and (service, method) label pair from
//! a handler's streaming shape and the call's slash-delimited method path.

use crate::error::Error;

/// The four gRPC calling shapes.
///
/// Closed set: a new shape is a compile error everywhere it is matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrpcType {
    Unary,
    ClientStream,
    ServerStream,
    BidiStream,
}

impl GrpcType {
    /// Maps the (request-streaming, response-streaming) pair to a call type.
    pub fn from_streaming(request_streaming: bool, response_streaming: bool) -> Self {
        match (request_streaming, response_streaming) {
            (false, false) => GrpcType::Unary,
            (true, false) => GrpcType::ClientStream,
            (false, true) => GrpcType::ServerStream,
            (true, true) => GrpcType::BidiStream,
        }
    }

    /// Label value written to the `grpc_type` metric dimension.
    pub fn as_str(&self) -> &'static str {
        match self {
            GrpcType::Unary => "UNARY",
            GrpcType::ClientStream => "CLIENT_STREAMING",
            GrpcType::ServerStream => "SERVER_STREAMING",
            GrpcType::BidiStream => "BIDI_STREAMING",
        }
    }
}

/// Immutable per-call identity, derived once when the call is intercepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallDescriptor {
    pub service: String,
    pub method: String,
    pub grpc_type: GrpcType,
}

impl CallDescriptor {
    /// Label values in `grpc_type`, `grpc_service`, `grpc_method` order.
    pub fn label_values(&self) -> [&str; 3] {
        [self.grpc_type.as_str(), &self.service, &self.method]
    }
}

/// Splits a `/package.Service/Method` path into its two segments.
///
/// The leading slash is optional; both segments must be non-empty.
pub fn split_method_path(path: &str) -> Result<(&str, &str), Error> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    match trimmed.split_once('/') {
        Some((service, method)) if !service.is_empty() && !method.is_empty() => {
            Ok((service, method))
        }
        _ => Err(Error::MalformedPath {
            path: path.to_string(),
        }),
    }
}

/// Builds the call descriptor for one invocation.
pub fn classify(
    request_streaming: bool,
    response_streaming: bool,
    path: &str,
) -> Result<CallDescriptor, Error> {
    let (service, method) = split_method_path(path)?;
    Ok(CallDescriptor {
        service: service.to_string(),
        method: method.to_string(),
        grpc_type: GrpcType::from_streaming(request_streaming, response_streaming),
    })
}
