use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use tokio::fs::File;
use tokio::io;
use tokio_util::io::ReaderStream;

use crate::storage::lock::LockGuard;

/// Boxed byte stream accepted by `put`.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Wraps an in-memory buffer as a single-chunk [`ByteStream`].
pub fn byte_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Read stream over a stored file that owns the read lock of its location.
///
/// The lock is released exactly once: when the stream reaches its end, when [`close`] is called,
/// or when the stream is dropped, so an abandoned download never keeps the lock.
///
/// [`close`]: ScopedByteStream::close
pub struct ScopedByteStream {
    inner: ReaderStream<File>,
    guard: Option<LockGuard>,
    content_length: u64,
    content_type: String,
}

impl ScopedByteStream {
    pub(crate) fn new(
        file: File,
        guard: LockGuard,
        content_length: u64,
        content_type: String,
    ) -> Self {
        Self {
            inner: ReaderStream::new(file),
            guard: Some(guard),
            content_length,
            content_type,
        }
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Whether the stream still holds the read lock of its location.
    pub fn holds_lock(&self) -> bool {
        self.guard.is_some()
    }

    /// Closes the file and releases the read lock.
    pub fn close(mut self) {
        self.release();
    }

    /// Reads the remaining content into memory, releasing the lock afterwards.
    pub async fn into_bytes(self) -> io::Result<Vec<u8>> {
        let capacity = usize::try_from(self.content_length).unwrap_or_default();
        self.try_fold(Vec::with_capacity(capacity), |mut buf, chunk| async move {
            buf.extend_from_slice(&chunk);
            Ok(buf)
        })
        .await
    }

    fn release(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.release();
        }
    }
}

impl Stream for ScopedByteStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(None) = polled {
            self.release();
        }
        polled
    }
}

impl std::fmt::Debug for ScopedByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedByteStream")
            .field("content_length", &self.content_length)
            .field("content_type", &self.content_type)
            .field("holds_lock", &self.holds_lock())
            .finish()
    }
}
