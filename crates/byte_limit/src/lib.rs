//! A streaming transform that fails the first time cumulative bytes exceed a
//! configured cap (§4.D). Wrapped around every external upload, so that a
//! 413 is raised on the first byte past the cap rather than at end of stream.

use std::{
    pin::Pin,
    task::{
        Context,
        Poll,
    },
};

use bytes::Bytes;
use errors::ErrorMetadata;
use futures::Stream;
use pin_project::pin_project;

#[pin_project]
pub struct ByteLimitStream<S> {
    #[pin]
    inner: S,
    cap: u64,
    seen: u64,
    failed: bool,
}

impl<S> ByteLimitStream<S> {
    pub fn new(inner: S, cap: u64) -> Self {
        Self {
            inner,
            cap,
            seen: 0,
            failed: false,
        }
    }

    pub fn bytes_seen(&self) -> u64 {
        self.seen
    }
}

impl<S, E> Stream for ByteLimitStream<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<anyhow::Error>,
{
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.failed {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                *this.seen += chunk.len() as u64;
                if *this.seen > *this.cap {
                    *this.failed = true;
                    return Poll::Ready(Some(Err(anyhow::Error::new(ErrorMetadata::entity_too_large(
                        format!("stream exceeded the {} byte cap", this.cap),
                    )))));
                }
                Poll::Ready(Some(Ok(chunk)))
            },
            Poll::Ready(Some(Err(e))) => {
                *this.failed = true;
                Poll::Ready(Some(Err(e.into())))
            },
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use tokio_stream::wrappers::ReceiverStream;

    use super::*;

    async fn collect_owned(
        chunks: Vec<Bytes>,
        cap: u64,
    ) -> (Vec<anyhow::Result<Bytes>>, u64) {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(chunks.len() + 1);
        for chunk in chunks {
            tx.send(Ok(chunk)).await.unwrap();
        }
        drop(tx);
        let stream = ByteLimitStream::new(ReceiverStream::new(rx), cap);
        let results: Vec<_> = stream.collect().await;
        (results, cap)
    }

    #[tokio::test]
    async fn passes_through_under_cap() {
        let (results, _) = collect_owned(vec![Bytes::from_static(b"hello")], 10).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }

    #[tokio::test]
    async fn fails_on_first_byte_past_cap_not_at_end_of_stream() {
        let (results, _) = collect_owned(
            vec![Bytes::from_static(b"aaaaa"), Bytes::from_static(b"bbbbb")],
            7,
        )
        .await;
        // First chunk (5 bytes) passes; second chunk pushes to 10 > 7 and fails
        // immediately - the stream does not keep draining further chunks.
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[1]
            .as_ref()
            .unwrap_err()
            .downcast_ref::<ErrorMetadata>()
            .unwrap()
            .is_code(errors::ErrorCode::EntityTooLarge));
    }
}
