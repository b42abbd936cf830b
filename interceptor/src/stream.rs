//! Counting stream adapter
//!
//! Wraps a message stream so that each successfully produced element bumps
//! one counter immediately before it is yielded downstream. The adapter is
//! otherwise invisible: elements, ordering, termination and errors all pass
//! through untouched, and no element is ever read ahead or buffered.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tonic::Status;

use crate::classify::CallDescriptor;
use crate::handler::MessageStream;
use crate::metrics::CallMetrics;

/// Which message counter the adapter drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgDirection {
    Received,
    Sent,
}

pub struct CountingStream<S> {
    inner: S,
    metrics: Arc<dyn CallMetrics>,
    descriptor: CallDescriptor,
    direction: MsgDirection,
}

impl<S> CountingStream<S> {
    pub fn new(
        inner: S,
        metrics: Arc<dyn CallMetrics>,
        descriptor: CallDescriptor,
        direction: MsgDirection,
    ) -> Self {
        CountingStream {
            inner,
            metrics,
            descriptor,
            direction,
        }
    }
}

impl<S> Stream for CountingStream<S>
where
    S: Stream<Item = Result<Bytes, Status>> + Unpin,
{
    type Item = Result<Bytes, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(_))) = &polled {
            match this.direction {
                MsgDirection::Received => this.metrics.stream_received(&this.descriptor),
                MsgDirection::Sent => this.metrics.stream_sent(&this.descriptor),
            }
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Boxes a counting wrapper around an already-boxed message stream.
pub fn wrap(
    source: MessageStream,
    metrics: Arc<dyn CallMetrics>,
    descriptor: CallDescriptor,
    direction: MsgDirection,
) -> MessageStream {
    Box::pin(CountingStream::new(source, metrics, descriptor, direction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tonic::Code;

    #[derive(Default)]
    struct CountingRecorder {
        received: AtomicU64,
        sent: AtomicU64,
    }

    impl CallMetrics for CountingRecorder {
        fn started(&self, _desc: &CallDescriptor) {}
        fn stream_received(&self, _desc: &CallDescriptor) {
            self.received.fetch_add(1, Ordering::SeqCst);
        }
        fn stream_sent(&self, _desc: &CallDescriptor) {
            self.sent.fetch_add(1, Ordering::SeqCst);
        }
        fn handled(&self, _desc: &CallDescriptor, _code: Code) {}
        fn observe_latency(&self, _desc: &CallDescriptor, _seconds: f64) {}
    }

    fn descriptor() -> CallDescriptor {
        classify(true, true, "/echo.Echo/Chat").unwrap()
    }

    #[tokio::test]
    async fn test_counts_each_element_once() {
        let recorder = Arc::new(CountingRecorder::default());
        let source: MessageStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Ok(Bytes::from_static(b"b")),
            Ok(Bytes::from_static(b"c")),
        ]));
        let mut wrapped = wrap(source, recorder.clone(), descriptor(), MsgDirection::Sent);

        let mut collected = Vec::new();
        while let Some(item) = wrapped.next().await {
            collected.push(item.unwrap());
        }
        assert_eq!(collected, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b"), Bytes::from_static(b"c")]);
        assert_eq!(recorder.sent.load(Ordering::SeqCst), 3);
        assert_eq!(recorder.received.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_terminates_without_counting() {
        let recorder = Arc::new(CountingRecorder::default());
        let source: MessageStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Err(Status::internal("boom")),
        ]));
        let mut wrapped = wrap(
            source,
            recorder.clone(),
            descriptor(),
            MsgDirection::Received,
        );

        assert!(wrapped.next().await.unwrap().is_ok());
        let err = wrapped.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert!(wrapped.next().await.is_none());
        // Only the successful element was counted.
        assert_eq!(recorder.received.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nested_wrapping_counts_both_directions() {
        let recorder = Arc::new(CountingRecorder::default());
        let source: MessageStream =
            Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(b"a")), Ok(Bytes::from_static(b"b"))]));
        let inner = wrap(
            source,
            recorder.clone(),
            descriptor(),
            MsgDirection::Received,
        );
        let mut outer = wrap(inner, recorder.clone(), descriptor(), MsgDirection::Sent);

        while let Some(item) = outer.next().await {
            item.unwrap();
        }
        assert_eq!(recorder.received.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.sent.load(Ordering::SeqCst), 2);
    }
}
