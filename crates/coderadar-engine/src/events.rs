//! Broadcast-backed event channel.
//!
//! One `tokio::sync::broadcast` sender per topic. Publishing never blocks:
//! with no subscribers the event is dropped, and subscribers that fall more
//! than `capacity` events behind receive a lag notice instead.

use async_trait::async_trait;
use coderadar_core::{AnalysisEvent, Delivery, EventChannel, Result};
use dashmap::DashMap;
use futures::stream::{BoxStream, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

struct Topic {
    tx: broadcast::Sender<AnalysisEvent>,
    seq: AtomicU64,
}

#[derive(Clone)]
pub struct BroadcastEventChannel {
    topics: Arc<DashMap<String, Arc<Topic>>>,
    capacity: usize,
}

impl BroadcastEventChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn topic(&self, name: &str) -> Arc<Topic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                Arc::new(Topic {
                    tx,
                    seq: AtomicU64::new(0),
                })
            })
            .clone()
    }
}

impl Default for BroadcastEventChannel {
    fn default() -> Self {
        Self::new(coderadar_core::EventsConfig::default().channel_capacity)
    }
}

#[async_trait]
impl EventChannel for BroadcastEventChannel {
    async fn publish(&self, topic: &str, mut event: AnalysisEvent) -> Result<usize> {
        let topic = self.topic(topic);
        event.seq = topic.seq.fetch_add(1, Ordering::SeqCst) + 1;
        // SendError only means nobody is listening.
        Ok(topic.tx.send(event).unwrap_or(0))
    }

    fn subscribe(&self, topic: &str) -> BoxStream<'static, Delivery> {
        let rx = self.topic(topic).tx.subscribe();
        BroadcastStream::new(rx)
            .map(|item| match item {
                Ok(event) => Delivery::Event(event),
                Err(BroadcastStreamRecvError::Lagged(n)) => Delivery::Lagged(n),
            })
            .boxed()
    }

    async fn close(&self, topic: &str) {
        // Dropping the sender ends every subscriber stream once drained.
        self.topics.remove(topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coderadar_core::EventKind;

    fn failed(message: &str) -> AnalysisEvent {
        AnalysisEvent::new(
            "j1",
            EventKind::Failed {
                message: message.into(),
            },
        )
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let channel = BroadcastEventChannel::new(8);
        assert_eq!(channel.publish("analysis.j1", failed("x")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn subscribers_see_sequenced_events() {
        let channel = BroadcastEventChannel::new(8);
        let mut a = channel.subscribe("analysis.j1");
        let mut b = channel.subscribe("analysis.j1");
        let mut other = channel.subscribe("analysis.j2");

        channel.publish("analysis.j1", failed("one")).await.unwrap();
        channel.publish("analysis.j1", failed("two")).await.unwrap();
        channel.close("analysis.j1").await;

        for stream in [&mut a, &mut b] {
            let seqs: Vec<u64> = stream
                .by_ref()
                .filter_map(|d| async move {
                    match d {
                        Delivery::Event(e) => Some(e.seq),
                        Delivery::Lagged(_) => None,
                    }
                })
                .collect()
                .await;
            assert_eq!(seqs, vec![1, 2]);
        }

        channel.close("analysis.j2").await;
        assert!(other.next().await.is_none());
        assert!(channel.topics.is_empty());
    }

    #[tokio::test]
    async fn slow_subscribers_get_lag_notice() {
        let channel = BroadcastEventChannel::new(2);
        let mut rx = channel.subscribe("t");
        for i in 0..5 {
            channel.publish("t", failed(&i.to_string())).await.unwrap();
        }
        assert!(matches!(rx.next().await, Some(Delivery::Lagged(3))));
    }
}
