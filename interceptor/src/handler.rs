//! Handler model shared with the RPC runtime
//!
//! The runtime hands the interceptor an opaque method handler with one of
//! four calling shapes; the interceptor returns a handler of the identical
//! shape, with the same (de)serializers, whose behavior is wrapped with
//! metric bookkeeping.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use tonic::{Code, Status};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A lazy, single-pass sequence of serialized messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Bytes, Status>> + Send + 'static>>;

/// Transport-provided per-call state, shared with the handler body.
pub type Context = Arc<dyn CallContext>;

/// Serializer or deserializer carried through interception unchanged.
pub type MessageCodec = Arc<dyn Fn(Bytes) -> Result<Bytes, Status> + Send + Sync>;

pub type UnaryBehavior =
    Arc<dyn Fn(Bytes, Context) -> BoxFuture<Result<Bytes, Status>> + Send + Sync>;
pub type ClientStreamBehavior =
    Arc<dyn Fn(MessageStream, Context) -> BoxFuture<Result<Bytes, Status>> + Send + Sync>;
pub type ServerStreamBehavior =
    Arc<dyn Fn(Bytes, Context) -> BoxFuture<Result<MessageStream, Status>> + Send + Sync>;
pub type BidiStreamBehavior =
    Arc<dyn Fn(MessageStream, Context) -> BoxFuture<Result<MessageStream, Status>> + Send + Sync>;

/// Terminal call state the RPC runtime must expose.
///
/// The runtime, not the interceptor, owns this state; the interceptor only
/// reads it once the handler body has returned.
pub trait CallContext: Send + Sync {
    /// Whether the peer cancelled the call.
    fn peer_cancelled(&self) -> bool;

    /// The status explicitly set on the call, if any.
    fn status_code(&self) -> Option<Code>;
}

/// Resolves the terminal status of a successfully returned call.
///
/// Cancellation wins over any explicitly set status; a call that set no
/// status completed with `OK`.
pub fn resolve_status(ctx: &dyn CallContext) -> Code {
    if ctx.peer_cancelled() {
        return Code::Cancelled;
    }
    ctx.status_code().unwrap_or(Code::Ok)
}

/// The four handler shapes, resolved statically per method.
#[derive(Clone)]
pub enum Behavior {
    Unary(UnaryBehavior),
    ClientStream(ClientStreamBehavior),
    ServerStream(ServerStreamBehavior),
    BidiStream(BidiStreamBehavior),
}

/// One registered RPC method as the runtime sees it.
#[derive(Clone)]
pub struct MethodHandler {
    pub behavior: Behavior,
    pub request_deserializer: Option<MessageCodec>,
    pub response_serializer: Option<MessageCodec>,
}

impl MethodHandler {
    pub fn unary(behavior: UnaryBehavior) -> Self {
        MethodHandler {
            behavior: Behavior::Unary(behavior),
            request_deserializer: None,
            response_serializer: None,
        }
    }

    pub fn client_stream(behavior: ClientStreamBehavior) -> Self {
        MethodHandler {
            behavior: Behavior::ClientStream(behavior),
            request_deserializer: None,
            response_serializer: None,
        }
    }

    pub fn server_stream(behavior: ServerStreamBehavior) -> Self {
        MethodHandler {
            behavior: Behavior::ServerStream(behavior),
            request_deserializer: None,
            response_serializer: None,
        }
    }

    pub fn bidi_stream(behavior: BidiStreamBehavior) -> Self {
        MethodHandler {
            behavior: Behavior::BidiStream(behavior),
            request_deserializer: None,
            response_serializer: None,
        }
    }

    pub fn with_codecs(
        mut self,
        request_deserializer: Option<MessageCodec>,
        response_serializer: Option<MessageCodec>,
    ) -> Self {
        self.request_deserializer = request_deserializer;
        self.response_serializer = response_serializer;
        self
    }

    pub fn request_streaming(&self) -> bool {
        matches!(
            self.behavior,
            Behavior::ClientStream(_) | Behavior::BidiStream(_)
        )
    }

    pub fn response_streaming(&self) -> bool {
        matches!(
            self.behavior,
            Behavior::ServerStream(_) | Behavior::BidiStream(_)
        )
    }
}

/// Call details handed to the interception hook by the runtime.
#[derive(Debug, Clone)]
pub struct CallDetails {
    /// Slash-delimited method path, e.g. `/helloworld.Greeter/SayHello`.
    pub method: String,
}

impl CallDetails {
    pub fn new(method: impl Into<String>) -> Self {
        CallDetails {
            method: method.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeContext {
        cancelled: bool,
        code: Option<Code>,
    }

    impl CallContext for FakeContext {
        fn peer_cancelled(&self) -> bool {
            self.cancelled
        }
        fn status_code(&self) -> Option<Code> {
            self.code
        }
    }

    #[test]
    fn test_resolve_status_defaults_to_ok() {
        let ctx = FakeContext {
            cancelled: false,
            code: None,
        };
        assert_eq!(resolve_status(&ctx), Code::Ok);
    }

    #[test]
    fn test_resolve_status_prefers_cancellation() {
        let ctx = FakeContext {
            cancelled: true,
            code: Some(Code::Internal),
        };
        assert_eq!(resolve_status(&ctx), Code::Cancelled);
    }

    #[test]
    fn test_resolve_status_uses_explicit_code() {
        let ctx = FakeContext {
            cancelled: false,
            code: Some(Code::AlreadyExists),
        };
        assert_eq!(resolve_status(&ctx), Code::AlreadyExists);
    }

    #[test]
    fn test_streaming_shape_flags() {
        let unary = MethodHandler::unary(Arc::new(|req, _ctx| {
            Box::pin(async move { Ok(req) })
        }));
        assert!(!unary.request_streaming());
        assert!(!unary.response_streaming());

        let bidi = MethodHandler::bidi_stream(Arc::new(|stream, _ctx| {
            Box::pin(async move { Ok(stream) })
        }));
        assert!(bidi.request_streaming());
        assert!(bidi.response_streaming());
    }
}
