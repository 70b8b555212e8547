//! Label-based demultiplexer between the transport inbox and topic
//! subscribers.
//!
//! The first body byte of every application message is its topic label.
//! The mux strips it and forwards the rest of the envelope to the channel
//! registered for that label. Routing is synchronous per envelope, so
//! back-pressure on one subscriber stalls delivery to all topics; a slow
//! subscriber throttles the whole pipeline rather than silently dropping
//! other topics' traffic.

use crate::transport::Envelope;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

pub struct Mux {
    inbox: mpsc::Receiver<Envelope>,
    topics: HashMap<u8, mpsc::Sender<Envelope>>,
    running: AtomicBool,
}

impl Mux {
    pub fn new(inbox: mpsc::Receiver<Envelope>) -> Self {
        Self {
            inbox,
            topics: HashMap::new(),
            running: AtomicBool::new(false),
        }
    }

    /// Registers the output channel for `label` and returns its receive
    /// end. The routing table is not safe to mutate concurrently with
    /// routing, so subscribing after [`Mux::run`] has started is a
    /// programming error.
    ///
    /// # Panics
    ///
    /// Panics if called while the mux is running.
    pub fn subscribe(&mut self, label: u8, capacity: usize) -> mpsc::Receiver<Envelope> {
        assert!(
            !self.running.load(Ordering::SeqCst),
            "mux: cannot subscribe to labels while running"
        );

        let (tx, rx) = mpsc::channel(capacity);
        self.topics.insert(label, tx);
        rx
    }

    /// Consumes the transport inbox until it closes, routing every
    /// envelope to its label's topic. Unroutable envelopes are dropped
    /// with a warning.
    pub async fn run(&mut self) {
        self.running.store(true, Ordering::SeqCst);

        while let Some(mut envelope) = self.inbox.recv().await {
            if envelope.message.body.is_empty() {
                warn!(
                    "message from {} too short to carry a label",
                    envelope.sender
                );
                continue;
            }

            let label = envelope.message.body[0];
            envelope.message.body = envelope.message.body.split_off(1);

            let Some(topic) = self.topics.get(&label) else {
                warn!(
                    "dropping message from {}: no topic for label {:#04x}",
                    envelope.sender, label
                );
                continue;
            };

            let sender = envelope.sender;
            if topic.send(envelope).await.is_err() {
                warn!(
                    "dropping message from {}: subscriber for label {:#04x} is gone",
                    sender, label
                );
                continue;
            }
            debug!("routed message from {} to label {:#04x}", sender, label);
        }

        self.running.store(false, Ordering::SeqCst);
    }

    /// Closes every registered topic channel. Does not close the
    /// underlying transport; socket ownership stays with it.
    pub fn close(&mut self) {
        self.topics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Message;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn envelope(body: Vec<u8>) -> Envelope {
        Envelope {
            sender: test_addr(),
            message: Message::new(body),
        }
    }

    fn test_addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_routes_by_label_and_strips_it() {
        let (tx, rx) = mpsc::channel(8);
        let mut mux = Mux::new(rx);
        let mut topic = mux.subscribe(0x01, 8);
        let mux_task = tokio::spawn(async move { mux.run().await });

        tx.send(envelope(vec![0x01, 10, 20])).await.unwrap();

        let routed = tokio::time::timeout(Duration::from_secs(1), topic.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(routed.sender, test_addr());
        assert_eq!(routed.message.body, vec![10, 20]);

        drop(tx);
        mux_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unroutable_envelopes_are_dropped() {
        let (tx, rx) = mpsc::channel(8);
        let mut mux = Mux::new(rx);
        let mut topic = mux.subscribe(0x01, 8);
        let mux_task = tokio::spawn(async move { mux.run().await });

        // No subscriber for 0x02, and an empty body has nothing to route
        // on; neither may disturb delivery on 0x01.
        tx.send(envelope(vec![0x02, 1])).await.unwrap();
        tx.send(envelope(Vec::new())).await.unwrap();
        tx.send(envelope(vec![0x01, 77])).await.unwrap();

        let routed = tokio::time::timeout(Duration::from_secs(1), topic.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(routed.message.body, vec![77]);

        drop(tx);
        mux_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_inbox_close_ends_run_and_topics() {
        let (tx, rx) = mpsc::channel(8);
        let mut mux = Mux::new(rx);
        let mut topic = mux.subscribe(0x01, 8);
        let mux_task = tokio::spawn(async move {
            mux.run().await;
            mux.close();
        });

        drop(tx);
        mux_task.await.unwrap();

        let ended = tokio::time::timeout(Duration::from_secs(1), topic.recv()).await;
        assert!(ended.unwrap().is_none());
    }

    #[test]
    fn test_subscribe_while_running_panics() {
        let (_tx, rx) = mpsc::channel::<Envelope>(1);
        let mut mux = Mux::new(rx);
        mux.running.store(true, Ordering::SeqCst);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            mux.subscribe(0x01, 1);
        }));
        assert!(result.is_err());
    }
}
