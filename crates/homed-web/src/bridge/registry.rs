//! Connected dashboard clients and their subscription sets.

use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::debug;

/// One connected dashboard client: its outbound frame queue and the set
/// of subtopics it asked for.
#[derive(Debug)]
struct Client {
    sender: mpsc::Sender<String>,
    topics: HashSet<String>,
}

/// All connected clients, keyed by connection id.
///
/// Owned exclusively by the dispatcher task, so there is no locking here;
/// connection tasks only ever hold the receiving end of a client's queue.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<u64, Client>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u64, sender: mpsc::Sender<String>) {
        self.clients.insert(
            id,
            Client {
                sender,
                topics: HashSet::new(),
            },
        );
    }

    pub fn remove(&mut self, id: u64) {
        self.clients.remove(&id);
    }

    /// Drop every client; their connection tasks observe the closed queue
    /// and shut the socket down.
    pub fn clear(&mut self) {
        self.clients.clear();
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn subscribe(&mut self, id: u64, topic: &str) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.topics.insert(topic.to_string());
        }
    }

    pub fn unsubscribe(&mut self, id: u64, topic: &str) {
        if let Some(client) = self.clients.get_mut(&id) {
            client.topics.remove(topic);
        }
    }

    /// Union of every client's subscriptions, for bus resubscription.
    pub fn all_topics(&self) -> HashSet<&str> {
        self.clients
            .values()
            .flat_map(|client| client.topics.iter().map(String::as_str))
            .collect()
    }

    /// Queue a frame for one client. Best-effort: a full or closed queue
    /// drops the frame.
    pub fn send_to(&self, id: u64, frame: String) {
        if let Some(client) = self.clients.get(&id) {
            if client.sender.try_send(frame).is_err() {
                debug!(client = id, "client queue full or closed, frame dropped");
            }
        }
    }

    /// Queue a frame for every client subscribed to `topic`.
    pub fn fan_out(&self, topic: &str, frame: &str) {
        for (id, client) in &self.clients {
            if !client.topics.contains(topic) {
                continue;
            }
            if client.sender.try_send(frame.to_string()).is_err() {
                debug!(client = id, "client queue full or closed, frame dropped");
            }
        }
    }
}
