//! Response body that accounts streamed bytes.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use undertow_core::registry::ServingMeter;
use undertow_core::{ByteStream, ConnectionGuard};

/// Engine byte stream wrapped for an HTTP body.
///
/// Chunks are read from the engine only when the body is polled, so a slow
/// client holds back reading. The request's connection guard lives here and
/// is released when the body finishes or the client goes away.
pub struct CountingStream {
    inner: ByteStream,
    meter: ServingMeter,
    _guard: ConnectionGuard,
}

impl CountingStream {
    pub fn new(inner: ByteStream, meter: ServingMeter, guard: ConnectionGuard) -> Self {
        Self {
            inner,
            meter,
            _guard: guard,
        }
    }
}

impl Stream for CountingStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &polled {
            self.meter.record(chunk.len() as u64);
        }
        polled
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
