use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, RwLock};
use tunecrab_schema::BusMessage;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum Topic {
    MessageAccepted,
    JobStarted,
    JobFinished,
    TaskFailed,
}

impl Topic {
    pub fn from_message(msg: &BusMessage) -> Self {
        match msg {
            BusMessage::MessageAccepted { .. } => Topic::MessageAccepted,
            BusMessage::JobStarted { .. } => Topic::JobStarted,
            BusMessage::JobFinished { .. } => Topic::JobFinished,
            BusMessage::TaskFailed { .. } => Topic::TaskFailed,
        }
    }
}

type Subscriber = mpsc::Sender<BusMessage>;
type Subscribers = Arc<RwLock<HashMap<Topic, Vec<Subscriber>>>>;

pub struct EventBus {
    subscribers: Subscribers,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    pub async fn subscribe(&self, topic: Topic) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut subs = self.subscribers.write().await;
        subs.entry(topic).or_default().push(tx);
        rx
    }

    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        fan_out(&self.subscribers, msg).await
    }

    pub fn publisher(&self) -> BusPublisher {
        BusPublisher {
            subscribers: self.subscribers.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BusPublisher {
    subscribers: Subscribers,
}

impl BusPublisher {
    pub async fn publish(&self, msg: BusMessage) -> Result<()> {
        fan_out(&self.subscribers, msg).await
    }
}

async fn fan_out(subscribers: &Subscribers, msg: BusMessage) -> Result<()> {
    let topic = Topic::from_message(&msg);
    let mut subs = subscribers.write().await;
    if let Some(list) = subs.get_mut(&topic) {
        // Receivers that went away are pruned; full ones just miss the event.
        list.retain(|tx| !tx.is_closed());
        for tx in list.iter() {
            if tx.try_send(msg.clone()).is_err() {
                tracing::debug!(?topic, "bus subscriber lagging, event dropped");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};
    use tunecrab_schema::{JobKind, JobState};
    use uuid::Uuid;

    fn job_finished() -> BusMessage {
        BusMessage::JobFinished {
            job_id: Uuid::new_v4(),
            conversation: "telegram:tg_main:chat:1".into(),
            kind: JobKind::MusicFetch,
            state: JobState::Succeeded,
            elapsed_ms: 10,
        }
    }

    #[tokio::test]
    async fn publish_to_no_subscribers_succeeds() {
        let bus = EventBus::new(8);
        let msg = BusMessage::MessageAccepted {
            trace_id: Uuid::new_v4(),
        };
        assert!(bus.publish(msg).await.is_ok());
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe(Topic::JobFinished).await;

        bus.publish(job_finished()).await.unwrap();

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(received, BusMessage::JobFinished { .. }));
    }

    #[tokio::test]
    async fn different_topics_no_crosstalk() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe(Topic::JobFinished).await;

        bus.publish(BusMessage::TaskFailed {
            trace_id: Uuid::new_v4(),
            error: "boom".into(),
        })
        .await
        .unwrap();

        let received = timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn publisher_clone_reaches_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe(Topic::JobStarted).await;
        let publisher = bus.publisher().clone();

        publisher
            .publish(BusMessage::JobStarted {
                job_id: Uuid::new_v4(),
                conversation: "c".into(),
                kind: JobKind::VideoFetch,
            })
            .await
            .unwrap();

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(received, BusMessage::JobStarted { .. }));
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let bus = EventBus::new(1);
        let mut rx = bus.subscribe(Topic::JobFinished).await;

        bus.publish(job_finished()).await.unwrap();
        bus.publish(job_finished()).await.unwrap();

        assert!(timeout(Duration::from_millis(100), rx.recv()).await.is_ok());
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn dropped_receivers_are_pruned() {
        let bus = EventBus::new(4);
        let rx = bus.subscribe(Topic::TaskFailed).await;
        drop(rx);

        bus.publish(BusMessage::TaskFailed {
            trace_id: Uuid::new_v4(),
            error: "x".into(),
        })
        .await
        .unwrap();

        let subs = bus.subscribers.read().await;
        assert!(subs.get(&Topic::TaskFailed).unwrap().is_empty());
    }
}
