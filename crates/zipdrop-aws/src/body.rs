//! Sized streaming request body for archive entries.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use tokio::sync::mpsc;

/// [`Body`] over the chunk channel of a streamed archive entry.
///
/// The length is declared up front so the upload can carry a
/// `Content-Length`. A stream that ends early or yields more than declared
/// fails the request instead of storing a truncated object.
#[derive(Debug)]
pub struct EntryBody {
    chunks: mpsc::Receiver<io::Result<Bytes>>,
    remaining: u64,
}

impl EntryBody {
    /// Wrap a chunk channel that yields exactly `len` bytes.
    #[must_use]
    pub fn new(chunks: mpsc::Receiver<io::Result<Bytes>>, len: u64) -> Self {
        Self {
            chunks,
            remaining: len,
        }
    }
}

impl Body for EntryBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let frame = match ready!(this.chunks.poll_recv(cx)) {
            Some(Ok(chunk)) => {
                let len = chunk.len() as u64;
                if len > this.remaining {
                    this.remaining = 0;
                    Some(Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "entry produced more bytes than its declared size",
                    )))
                } else {
                    this.remaining -= len;
                    Some(Ok(Frame::data(chunk)))
                }
            }
            Some(Err(e)) => Some(Err(e)),
            None if this.remaining > 0 => {
                let missing = this.remaining;
                this.remaining = 0;
                Some(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("entry ended {missing} bytes short of its declared size"),
                )))
            }
            None => None,
        };
        Poll::Ready(frame)
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.remaining)
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;

    use super::*;

    async fn next_frame(body: &mut EntryBody) -> Option<io::Result<Frame<Bytes>>> {
        poll_fn(|cx| Pin::new(&mut *body).poll_frame(cx)).await
    }

    #[tokio::test]
    async fn test_should_yield_chunks_and_track_size() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"abc"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"de"))).await.unwrap();
        drop(tx);

        let mut body = EntryBody::new(rx, 5);
        assert_eq!(body.size_hint().exact(), Some(5));

        let first = next_frame(&mut body).await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap().as_ref(), b"abc");
        assert_eq!(body.size_hint().exact(), Some(2));

        let second = next_frame(&mut body).await.unwrap().unwrap();
        assert_eq!(second.into_data().unwrap().as_ref(), b"de");
        assert!(next_frame(&mut body).await.is_none());
    }

    #[tokio::test]
    async fn test_should_fail_on_short_stream() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(Ok(Bytes::from_static(b"ab"))).await.unwrap();
        drop(tx);

        let mut body = EntryBody::new(rx, 10);
        assert!(next_frame(&mut body).await.unwrap().is_ok());
        let err = next_frame(&mut body).await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_should_fail_on_oversized_stream() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(Ok(Bytes::from_static(b"abcdef"))).await.unwrap();
        drop(tx);

        let mut body = EntryBody::new(rx, 3);
        let err = next_frame(&mut body).await.unwrap().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_should_forward_decoder_error() {
        let (tx, rx) = mpsc::channel(1);
        tx.send(Err(io::Error::other("invalid checksum"))).await.unwrap();
        drop(tx);

        let mut body = EntryBody::new(rx, 3);
        let err = next_frame(&mut body).await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "invalid checksum");
    }
}
