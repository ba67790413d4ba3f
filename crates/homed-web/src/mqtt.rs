//! MQTT side of the bridge.
//!
//! One task owns the broker connection: dispatcher commands (subscribe,
//! publish) go out, incoming publishes come back as bridge events with
//! the deployment prefix stripped. Reconnects are the event loop's own;
//! resubscription happens upstream when the dispatcher sees the
//! connection come back.

use crate::bridge::{BridgeEvent, BusCommand};
use crate::config::MqttConfig;
use homed_core::topic::{TopicRoot, STATUS_TOPIC};
use rand::Rng;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Pause between reconnect attempts once the event loop errors out.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long shutdown waits for the final publishes to reach the broker.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

/// Retained marker left behind when the gateway goes away, cleanly or not.
const OFFLINE_PAYLOAD: &str = r#"{"status":"offline"}"#;

/// The gateway's connection to the message bus.
pub struct BusLink {
    client: AsyncClient,
    eventloop: EventLoop,
    root: TopicRoot,
    events: mpsc::Sender<BridgeEvent>,
    commands: mpsc::UnboundedReceiver<BusCommand>,
    backlog: VecDeque<Pending>,
}

/// A command resolved to its full topic, parked while the client's
/// request queue is full. Only `poll` drains that queue.
enum Pending {
    Subscribe(String),
    Publish {
        topic: String,
        payload: String,
        retain: bool,
    },
}

impl BusLink {
    pub fn new(
        config: &MqttConfig,
        events: mpsc::Sender<BridgeEvent>,
        commands: mpsc::UnboundedReceiver<BusCommand>,
    ) -> Self {
        let (client, eventloop) = AsyncClient::new(build_options(config), 10);
        Self {
            client,
            eventloop,
            root: TopicRoot::new(config.prefix.clone()),
            events,
            commands,
            backlog: VecDeque::new(),
        }
    }

    /// Drive the connection until the command channel closes or a
    /// shutdown command arrives.
    ///
    /// Forwarding never awaits the client: its request queue is drained
    /// by `poll` alone, so a blocking send here would park the loop that
    /// does the draining. A full queue parks commands in the backlog,
    /// flushed again after each poll.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                // Commands never block; poll may sleep on reconnect.
                biased;

                command = self.commands.recv() => match command {
                    Some(BusCommand::Subscribe(subtopic)) => {
                        let topic = self.root.resolve(&subtopic);
                        debug!(topic = %topic, "subscribing");
                        self.backlog.push_back(Pending::Subscribe(topic));
                        self.flush_backlog();
                    }
                    Some(BusCommand::Publish { topic, payload, retain }) => {
                        let topic = self.root.resolve(&topic);
                        debug!(topic = %topic, retain, "publishing");
                        self.backlog.push_back(Pending::Publish {
                            topic,
                            payload: payload.to_string(),
                            retain,
                        });
                        self.flush_backlog();
                    }
                    Some(BusCommand::Shutdown) | None => {
                        self.close().await;
                        return;
                    }
                },
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("bus connected");
                        self.flush_backlog();
                        if self.events.send(BridgeEvent::BusConnected).await.is_err() {
                            return;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let forwarded = BridgeEvent::BusMessage {
                            topic: self.root.strip(&publish.topic).to_string(),
                            payload: publish.payload,
                        };
                        if self.events.send(forwarded).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => self.flush_backlog(),
                    Err(e) => {
                        warn!(error = %e, "bus connection lost, retrying");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                },
            }
        }
    }

    /// Hand parked commands to the client until it reports a full queue.
    fn flush_backlog(&mut self) {
        while let Some(request) = self.backlog.front() {
            let accepted = match request {
                Pending::Subscribe(topic) => self
                    .client
                    .try_subscribe(topic.as_str(), QoS::AtMostOnce)
                    .is_ok(),
                Pending::Publish {
                    topic,
                    payload,
                    retain,
                } => self
                    .client
                    .try_publish(topic.as_str(), QoS::AtMostOnce, *retain, payload.as_bytes())
                    .is_ok(),
            };
            if !accepted {
                break;
            }
            self.backlog.pop_front();
        }
    }

    /// A clean disconnect discards the will, so the offline marker goes
    /// out explicitly before hanging up. Sends stay non-blocking here
    /// too: with the broker gone, the request queue may already be full.
    async fn close(&mut self) {
        self.flush_backlog();
        if !self.backlog.is_empty() {
            debug!(dropped = self.backlog.len(), "unsent bus commands discarded");
        }
        let status = self.root.resolve(STATUS_TOPIC);
        if self
            .client
            .try_publish(status, QoS::AtMostOnce, true, OFFLINE_PAYLOAD)
            .is_err()
        {
            warn!("bus queue full, offline marker not sent");
        }
        let _ = self.client.try_disconnect();

        let drain = async {
            while let Ok(event) = self.eventloop.poll().await {
                if matches!(event, Event::Outgoing(Outgoing::Disconnect)) {
                    break;
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_DRAIN, drain).await.is_err() {
            debug!("bus drain timed out during shutdown");
        }
        info!("bus link closed");
    }
}

fn build_options(config: &MqttConfig) -> MqttOptions {
    // Random suffix keeps parallel gateway instances from kicking each
    // other off the broker.
    let suffix: u32 = rand::thread_rng().gen();
    let mut options = MqttOptions::new(
        format!("homed-web-{suffix:08x}"),
        config.host.clone(),
        config.port,
    );
    if let Some((username, password)) = config.username.clone().zip(config.password.clone()) {
        options.set_credentials(username, password);
    }
    let will_topic = TopicRoot::new(config.prefix.clone()).resolve(STATUS_TOPIC);
    options.set_last_will(LastWill::new(
        will_topic,
        OFFLINE_PAYLOAD,
        QoS::AtMostOnce,
        true,
    ));
    options
}
