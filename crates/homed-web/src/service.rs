//! Gateway assembly: channels, tasks, accept loop.

use crate::auth::AuthGate;
use crate::bridge::{BridgeEvent, BusCommand, Dispatcher};
use crate::config::GatewayConfig;
use crate::connection::{self, ConnectionContext};
use crate::mqtt::BusLink;
use crate::store::Store;
use homed_core::HomedResult;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Capacity of the dispatcher's inbound event queue.
const EVENT_CHANNEL_CAPACITY: usize = 256;

pub struct GatewayService {
    config: GatewayConfig,
}

impl GatewayService {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// Bind the configured port and serve until `shutdown` completes.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> HomedResult<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        info!(addr = %listener.local_addr()?, "gateway listening");
        self.serve(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` completes.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> HomedResult<()> {
        let (events, event_rx) = mpsc::channel::<BridgeEvent>(EVENT_CHANNEL_CAPACITY);
        let (commands, command_rx) = mpsc::unbounded_channel::<BusCommand>();

        let store = Store::load(self.config.database.clone(), commands.clone()).await;
        let gate = AuthGate::new(
            self.config.username.clone(),
            self.config.password.clone(),
            self.config.cookie_max_age,
            store.clone(),
        );

        let dispatcher = Dispatcher::new(
            self.config.mqtt.retained.clone(),
            store.clone(),
            commands.clone(),
        );
        tokio::spawn(dispatcher.run(event_rx));
        let bus = tokio::spawn(BusLink::new(&self.config.mqtt, events.clone(), command_rx).run());

        let ctx = Arc::new(ConnectionContext {
            frontend: self.config.frontend.clone(),
            gate,
            store: store.clone(),
            events: events.clone(),
            next_client: AtomicU64::new(1),
        });

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let ctx = Arc::clone(&ctx);
                        tokio::spawn(async move {
                            if let Err(e) = connection::handle(ctx, stream, remote).await {
                                warn!(remote = %remote, error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                },
                _ = &mut shutdown => {
                    info!("received shutdown signal");
                    break;
                }
            }
        }

        // Final snapshot, then the clients, then the link: the snapshot's
        // status publish rides out ahead of the disconnect.
        store.store().await;
        let _ = events.send(BridgeEvent::DisconnectAll).await;
        let _ = commands.send(BusCommand::Shutdown);
        let _ = bus.await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::Message;

    async fn start_gateway(auth: bool) -> (SocketAddr, tempfile::TempDir, oneshot::Sender<()>) {
        let dir = tempfile::tempdir().expect("tempdir");
        tokio::fs::write(dir.path().join("index.html"), "<html>v%1 %2</html>")
            .await
            .expect("index fixture");
        tokio::fs::write(dir.path().join("login.html"), "<form>")
            .await
            .expect("login fixture");

        let frontend = dir.path().to_string_lossy().into_owned();
        let database = dir.path().join("web.json").to_string_lossy().into_owned();
        let mut config = GatewayConfig::load(None, None, Some(&frontend), Some(&database))
            .expect("config");
        config.username = auth.then(|| "admin".to_string());
        config.password = auth.then(|| "secret".to_string());
        // Point the bus at a dead port; the gateway serves without it.
        config.mqtt.port = 1;

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(GatewayService::new(config).serve(listener, async {
            let _ = shutdown_rx.await;
        }));
        (addr, dir, shutdown_tx)
    }

    async fn raw_request(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream.write_all(request.as_bytes()).await.expect("send");
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.expect("read");
        String::from_utf8_lossy(&response).into_owned()
    }

    fn extract_token(response: &str) -> String {
        let needle = "homed-auth-token=";
        let start = response.find(needle).expect("cookie in response") + needle.len();
        response[start..start + 64].to_string()
    }

    #[tokio::test]
    async fn serves_index_over_tcp() {
        let (addr, _dir, _shutdown) = start_gateway(false).await;
        let response = raw_request(addr, "GET / HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains(&format!("v{}", env!("CARGO_PKG_VERSION"))));
    }

    #[tokio::test]
    async fn missing_file_is_404() {
        let (addr, _dir, _shutdown) = start_gateway(false).await;
        let response = raw_request(addr, "GET /nope.js HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"));
    }

    #[tokio::test]
    async fn login_then_authenticated_index() {
        let (addr, _dir, _shutdown) = start_gateway(true).await;

        let anonymous = raw_request(addr, "GET / HTTP/1.1\r\n\r\n").await;
        assert!(anonymous.ends_with("<form>"));

        let login = raw_request(
            addr,
            "POST / HTTP/1.1\r\nContent-Length: 30\r\n\r\nusername=admin&password=secret",
        )
        .await;
        assert!(login.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
        let token = extract_token(&login);

        let request = format!("GET / HTTP/1.1\r\nCookie: homed-auth-token={token}\r\n\r\n");
        let authenticated = raw_request(addr, &request).await;
        assert!(authenticated.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(authenticated.contains("logout"));
    }

    #[tokio::test]
    async fn bulk_logout_closes_websocket_clients() {
        let (addr, _dir, _shutdown) = start_gateway(true).await;

        let login = raw_request(
            addr,
            "POST / HTTP/1.1\r\nContent-Length: 30\r\n\r\nusername=admin&password=secret",
        )
        .await;
        let token = extract_token(&login);

        // tungstenite's client handshake writes extra headers lowercase
        // (`cookie:`), which the gateway's case-sensitive parser ignores;
        // send the browser-style upgrade bytes ourselves and wrap the
        // socket once the server has switched protocols.
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let key = tokio_tungstenite::tungstenite::handshake::client::generate_key();
        let upgrade = format!(
            "GET / HTTP/1.1\r\nHost: gateway\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
             Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: {key}\r\n\
             Cookie: homed-auth-token={token}\r\n\r\n"
        );
        stream.write_all(upgrade.as_bytes()).await.expect("send upgrade");

        let mut head = Vec::new();
        while !head.ends_with(b"\r\n\r\n") {
            let mut byte = [0u8; 1];
            stream.read_exact(&mut byte).await.expect("handshake response");
            head.push(byte[0]);
        }
        assert!(
            head.starts_with(b"HTTP/1.1 101"),
            "expected upgrade, got: {}",
            String::from_utf8_lossy(&head)
        );
        let mut ws = tokio_tungstenite::WebSocketStream::from_raw_socket(
            stream,
            tokio_tungstenite::tungstenite::protocol::Role::Client,
            None,
        )
        .await;

        // A pong back means the session already enqueued its registration;
        // the logout's disconnect lands behind it in the same queue.
        ws.send(Message::Ping(b"hi".to_vec())).await.expect("ping");
        match ws.next().await {
            Some(Ok(Message::Pong(payload))) => assert_eq!(payload, b"hi"),
            other => panic!("unexpected frame: {other:?}"),
        }

        let request = format!(
            "GET /logout?session=all HTTP/1.1\r\nCookie: homed-auth-token={token}\r\n\r\n"
        );
        let logout = raw_request(addr, &request).await;
        assert!(logout.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));

        match ws.next().await {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {}
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn websocket_subscribe_reaches_the_bridge() {
        let (addr, _dir, _shutdown) = start_gateway(false).await;

        let stream = TcpStream::connect(addr).await.expect("connect");
        let (mut ws, _response) = tokio_tungstenite::client_async("ws://gateway/", stream)
            .await
            .expect("handshake");

        ws.send(Message::Text(
            r#"{"action":"subscribe","topic":"status/zigbee"}"#.to_string(),
        ))
        .await
        .expect("subscribe");

        // The dispatcher handles the frame and the session stays healthy.
        ws.send(Message::Ping(Vec::new())).await.expect("ping");
        match ws.next().await {
            Some(Ok(Message::Pong(_))) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
        let _ = ws.close(None).await;
    }

    #[tokio::test]
    async fn accept_loop_survives_connection_churn() {
        let (addr, _dir, _shutdown) = start_gateway(false).await;

        // Sockets opened and dropped without ever sending a request.
        for _ in 0..5 {
            let stream = TcpStream::connect(addr).await.expect("connect");
            drop(stream);
        }

        let response = raw_request(addr, "GET / HTTP/1.1\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn shutdown_writes_the_database_and_closes_clients() {
        let (addr, dir, shutdown) = start_gateway(false).await;

        let stream = TcpStream::connect(addr).await.expect("connect");
        let (mut ws, _response) = tokio_tungstenite::client_async("ws://gateway/", stream)
            .await
            .expect("handshake");
        ws.send(Message::Ping(Vec::new())).await.expect("ping");
        match ws.next().await {
            Some(Ok(Message::Pong(_))) => {}
            other => panic!("unexpected frame: {other:?}"),
        }

        shutdown.send(()).expect("signal");

        // The disconnect is sent after the final store, so once the close
        // frame arrives the database file is already on disk.
        let closed = tokio::time::timeout(Duration::from_secs(5), ws.next());
        match closed.await.expect("frame before timeout") {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {}
            other => panic!("expected close, got {other:?}"),
        }

        let database = tokio::fs::read(dir.path().join("web.json"))
            .await
            .expect("database written at shutdown");
        assert!(serde_json::from_slice::<serde_json::Value>(&database).is_ok());
    }
}
