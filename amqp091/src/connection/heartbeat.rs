//! Implements an asynchronous heartbeat

use std::task::Poll;
use std::time::Duration;

use futures_util::Stream;
use pin_project_lite::pin_project;
use tokio::time::Interval;

pin_project! {
    /// A stream that ticks at half the negotiated heartbeat period, or
    /// never when heartbeats are disabled
    #[derive(Debug)]
    pub struct HeartBeat {
        interval: Option<Interval>,
    }
}

impl HeartBeat {
    /// A [`HeartBeat`] that will never yield `Poll::Ready(_)`
    pub fn never() -> Self {
        Self { interval: None }
    }

    /// A [`HeartBeat`] ticking per the given period
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        // the first tick of a tokio interval completes immediately
        interval.reset();
        Self {
            interval: Some(interval),
        }
    }
}

impl Stream for HeartBeat {
    type Item = ();

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.interval.as_mut() {
            Some(interval) => match interval.poll_tick(cx) {
                Poll::Ready(_instant) => Poll::Ready(Some(())),
                Poll::Pending => Poll::Pending,
            },
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_at_the_configured_period() {
        let mut heartbeat = HeartBeat::new(Duration::from_secs(30));
        let start = tokio::time::Instant::now();
        heartbeat.next().await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_heartbeat_never_ticks() {
        let mut heartbeat = HeartBeat::never();
        let tick = tokio::time::timeout(Duration::from_secs(600), heartbeat.next()).await;
        assert!(tick.is_err());
    }
}
