//! Publication of the most recent Sample to display consumers
//!
//! One writer (the poller) replaces the published snapshot wholesale; any
//! number of readers take a cheap `Arc` clone of whichever snapshot is
//! current. A reader therefore always sees one complete Sample.
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::Sample;

/// What a consumer gets from [`ReadingHandle::latest`]
#[derive(Debug, Clone, Default)]
pub enum LatestReading {
    /// Nothing has been published yet
    #[default]
    Pending,
    Ready(Arc<Sample>),
}

impl LatestReading {
    pub fn sample(&self) -> Option<&Sample> {
        match self {
            LatestReading::Pending => None,
            LatestReading::Ready(sample) => Some(sample),
        }
    }
}

/// Writer side, owned by the poller
#[derive(Debug)]
pub struct ReadingPublisher {
    tx: watch::Sender<LatestReading>,
}

/// Reader side, cloned freely into consumer tasks
#[derive(Debug, Clone)]
pub struct ReadingHandle {
    rx: watch::Receiver<LatestReading>,
}

impl ReadingPublisher {
    pub fn new() -> (Self, ReadingHandle) {
        let (tx, rx) = watch::channel(LatestReading::Pending);
        (Self { tx }, ReadingHandle { rx })
    }

    /// Replace the published Sample
    ///
    /// Succeeds whether or not any consumer is attached.
    pub fn publish(&self, sample: Arc<Sample>) {
        self.tx.send_replace(LatestReading::Ready(sample));
    }
}

impl ReadingHandle {
    /// Most recently published Sample, or `Pending` before the first one
    pub fn latest(&self) -> LatestReading {
        self.rx.borrow().clone()
    }

    /// Wait until a new Sample is published
    ///
    /// Returns `false` once the publisher has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SunTimes;
    use time::macros::time;
    use time::OffsetDateTime;

    /// Sample whose every numeric field is `n`, so mixing two is detectable
    fn uniform_sample(n: u32) -> Sample {
        let v = n as f32;
        let mut sample = Sample::unavailable(
            OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(n as i64),
            SunTimes {
                sunrise: time!(06:00),
                sunset: time!(18:00),
            },
        );
        sample.temperature = Some(v);
        sample.humidity = Some(v);
        sample.dew_point = Some(v);
        sample.pressure = Some(v);
        sample.wind_speed = Some(v);
        sample.pm2_5 = Some(v);
        sample.rain_today = Some(v);
        sample
    }

    fn assert_consistent(sample: &Sample) {
        let n = (sample.timestamp - OffsetDateTime::UNIX_EPOCH).whole_seconds() as f32;
        for field in [
            sample.temperature,
            sample.humidity,
            sample.dew_point,
            sample.pressure,
            sample.wind_speed,
            sample.pm2_5,
            sample.rain_today,
        ] {
            assert_eq!(field, Some(n), "torn sample observed: {:?}", sample);
        }
    }

    #[test]
    fn pending_before_first_publish() {
        let (_publisher, handle) = ReadingPublisher::new();
        assert!(matches!(handle.latest(), LatestReading::Pending));
        assert!(handle.latest().sample().is_none());
    }

    #[test]
    fn latest_returns_last_published() {
        let (publisher, handle) = ReadingPublisher::new();
        publisher.publish(Arc::new(uniform_sample(1)));
        publisher.publish(Arc::new(uniform_sample(2)));
        assert_eq!(handle.latest().sample(), Some(&uniform_sample(2)));
        assert_eq!(handle.clone().latest().sample(), Some(&uniform_sample(2)));
    }

    #[test]
    fn latest_survives_publisher_drop() {
        let (publisher, handle) = ReadingPublisher::new();
        publisher.publish(Arc::new(uniform_sample(7)));
        drop(publisher);
        assert_eq!(handle.latest().sample(), Some(&uniform_sample(7)));
    }

    #[tokio::test]
    async fn changed_wakes_on_publish() {
        let (publisher, mut handle) = ReadingPublisher::new();
        let waiter = tokio::spawn(async move {
            assert!(handle.changed().await);
            handle.latest()
        });
        publisher.publish(Arc::new(uniform_sample(3)));
        let seen = waiter.await.unwrap();
        assert_eq!(seen.sample(), Some(&uniform_sample(3)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_never_see_torn_samples() {
        const READERS: usize = 8;
        const PUBLISHES: u32 = 2_000;

        let (publisher, handle) = ReadingPublisher::new();
        let mut readers = Vec::new();
        for _ in 0..READERS {
            let handle = handle.clone();
            readers.push(tokio::spawn(async move {
                let mut last_seen = 0.0f32;
                let mut observed = 0usize;
                loop {
                    if let LatestReading::Ready(sample) = handle.latest() {
                        assert_consistent(&sample);
                        let n = sample.temperature.unwrap_or_default();
                        // Publications are observed in order
                        assert!(n >= last_seen);
                        last_seen = n;
                        observed += 1;
                        if n as u32 == PUBLISHES {
                            return observed;
                        }
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }

        let writer = tokio::spawn(async move {
            for n in 1..=PUBLISHES {
                publisher.publish(Arc::new(uniform_sample(n)));
                if n % 64 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            publisher
        });

        let _publisher = writer.await.unwrap();
        for reader in readers {
            assert!(reader.await.unwrap() > 0);
        }
    }
}
