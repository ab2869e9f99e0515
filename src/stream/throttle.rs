//! Latest-wins stream throttling

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// Extension trait to add throttling to any Stream
pub trait ThrottleExt: Stream {
    /// Emit at most one item per `duration`.
    ///
    /// Items arriving within one interval replace each other; only the most
    /// recent is emitted when the interval elapses.
    fn throttle(self, duration: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, duration)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// A stream combinator that throttles emission rate
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<S::Item>,
        done: bool,
    }
}

impl<S: Stream> Throttle<S> {
    pub fn new(stream: S, duration: Duration) -> Self {
        let mut interval = interval(duration);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { stream, interval, pending: None, done: false }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(this.pending.take());
        }

        ready!(this.interval.poll_tick(cx));

        loop {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => *this.pending = Some(item),
                Poll::Ready(None) => {
                    *this.done = true;
                    return Poll::Ready(this.pending.take());
                }
                Poll::Pending => {
                    return match this.pending.take() {
                        Some(item) => Poll::Ready(Some(item)),
                        None => {
                            // Nothing arrived this interval; wait for the
                            // inner stream, then for the next tick.
                            this.interval.reset_immediately();
                            Poll::Pending
                        }
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::stream;

    #[tokio::test]
    async fn burst_collapses_to_latest() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let mut throttled = tokio_stream::wrappers::UnboundedReceiverStream::new(rx)
            .throttle(Duration::from_millis(20));

        for i in 0..5 {
            tx.send(i).expect("send");
        }
        assert_eq!(throttled.next().await, Some(4));

        tx.send(5).expect("send");
        tx.send(6).expect("send");
        assert_eq!(throttled.next().await, Some(6));

        drop(tx);
        assert_eq!(throttled.next().await, None);
    }

    #[tokio::test]
    async fn ended_stream_flushes_pending_then_stops() {
        let mut throttled = stream::iter([1, 2, 3]).throttle(Duration::from_millis(5));
        assert_eq!(throttled.next().await, Some(3));
        assert_eq!(throttled.next().await, None);
        assert_eq!(throttled.next().await, None);
    }
}
