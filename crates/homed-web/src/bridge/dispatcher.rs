//! The bridge dispatcher: one task owning all routing state.
//!
//! Connection tasks, the MQTT link, and the auth gate all feed
//! `BridgeEvent`s into the dispatcher; it alone touches the client
//! registry and retained cache, which keeps bus-order delivery per topic
//! without any locking.

use super::{BridgeEvent, BusCommand, ClientRegistry, RetainedCache};
use crate::store::Store;
use homed_core::messages::{decode_payload, ClientAction, ClientEnvelope, TopicUpdate};
use homed_core::topic::COMMAND_TOPIC;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub struct Dispatcher {
    registry: ClientRegistry,
    retained: RetainedCache,
    store: Store,
    commands: mpsc::UnboundedSender<BusCommand>,
}

impl Dispatcher {
    pub fn new(
        retained_prefixes: impl IntoIterator<Item = String>,
        store: Store,
        commands: mpsc::UnboundedSender<BusCommand>,
    ) -> Self {
        Self {
            registry: ClientRegistry::new(),
            retained: RetainedCache::new(retained_prefixes),
            store,
            commands,
        }
    }

    /// Run until every event sender is gone.
    pub async fn run(mut self, mut events: mpsc::Receiver<BridgeEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        debug!("bridge event channel closed");
    }

    async fn handle(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::ClientConnected { id, sender } => {
                self.registry.insert(id, sender);
                info!(client = id, clients = self.registry.len(), "client connected");
            }
            BridgeEvent::ClientDisconnected { id } => {
                self.registry.remove(id);
                info!(client = id, clients = self.registry.len(), "client disconnected");
            }
            BridgeEvent::ClientMessage { id, text } => self.client_message(id, &text),
            BridgeEvent::BusConnected => self.bus_connected().await,
            BridgeEvent::BusMessage { topic, payload } => {
                self.bus_message(&topic, &payload).await
            }
            BridgeEvent::DisconnectAll => {
                info!(clients = self.registry.len(), "disconnecting all clients");
                self.registry.clear();
            }
        }
    }

    fn client_message(&mut self, id: u64, text: &str) {
        let Some(envelope) = ClientEnvelope::parse(text) else {
            debug!(client = id, "ignoring malformed client message");
            return;
        };
        if envelope.topic.is_empty() {
            return;
        }

        match envelope.action {
            ClientAction::Subscribe => {
                debug!(client = id, topic = %envelope.topic, "subscribe");
                self.registry.subscribe(id, &envelope.topic);
                if let Some(message) = self.retained.get(&envelope.topic) {
                    let update = TopicUpdate {
                        topic: &envelope.topic,
                        message,
                    };
                    self.registry.send_to(id, update.to_json());
                }
                let _ = self.commands.send(BusCommand::Subscribe(envelope.topic));
            }
            ClientAction::Publish => {
                debug!(client = id, topic = %envelope.topic, "publish");
                let _ = self.commands.send(BusCommand::Publish {
                    topic: envelope.topic,
                    payload: envelope.message.unwrap_or_else(|| json!({})),
                    retain: false,
                });
            }
            ClientAction::Unsubscribe => {
                debug!(client = id, topic = %envelope.topic, "unsubscribe");
                self.registry.unsubscribe(id, &envelope.topic);
            }
        }
    }

    /// On every (re)connect the bus forgets our subscriptions, so rebuild
    /// them: the control topic plus everything clients currently want.
    async fn bus_connected(&mut self) {
        let topics = self.registry.all_topics();
        info!(topics = topics.len(), "bus connected, resubscribing");
        let _ = self
            .commands
            .send(BusCommand::Subscribe(COMMAND_TOPIC.to_string()));
        for topic in topics {
            let _ = self.commands.send(BusCommand::Subscribe(topic.to_string()));
        }
        self.store.store().await;
    }

    async fn bus_message(&mut self, topic: &str, payload: &[u8]) {
        let message = decode_payload(payload);

        if topic == COMMAND_TOPIC
            && message.get("action").and_then(Value::as_str) == Some("updateDashboards")
        {
            info!("dashboards updated from the bus");
            let data = message
                .get("data")
                .cloned()
                .filter(Value::is_array)
                .unwrap_or_else(|| json!([]));
            self.store.set_dashboards(data).await;
            self.store.store().await;
            return;
        }

        self.retained.update(topic, &message);
        let update = TopicUpdate { topic, message: &message };
        self.registry.fan_out(topic, &update.to_json());
    }
}
