//! Per-socket request handling.
//!
//! Each accepted socket gets one task and serves exactly one request:
//! buffer bytes until the request is complete, run it through the auth
//! gate, then either answer over HTTP (static file, login, logout) or
//! upgrade to WebSocket and stay as that client's session loop. Closing
//! the socket ends the request either way.

use crate::auth::{AuthDecision, AuthGate, CLEAR_COOKIE};
use crate::bridge::{BridgeEvent, CLIENT_CHANNEL_CAPACITY};
use crate::http::{request, response, Request};
use crate::store::Store;
use futures_util::{SinkExt, StreamExt};
use homed_core::token::AUTH_COOKIE;
use homed_core::{HomedError, HomedResult};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Upper bound on one buffered request, head and body together.
const MAX_REQUEST_SIZE: usize = 1_048_576;

/// Everything a connection task needs, shared across all of them.
pub struct ConnectionContext {
    pub frontend: PathBuf,
    pub gate: AuthGate,
    pub store: Store,
    pub events: mpsc::Sender<BridgeEvent>,
    pub next_client: AtomicU64,
}

/// Drive one accepted socket through the request pipeline.
pub async fn handle<S>(
    ctx: Arc<ConnectionContext>,
    mut stream: S,
    remote: SocketAddr,
) -> HomedResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some((buffer, req)) = read_request(&mut stream).await? else {
        // Peer went away before completing a request; nothing to answer.
        return Ok(());
    };

    debug!(remote = %remote, method = %req.method, target = %req.target, "request");

    let authenticated = match ctx.gate.authorize(&req).await {
        AuthDecision::Granted { authenticated } => authenticated,
        AuthDecision::LoginPage => {
            return response::write_file(&mut stream, &ctx.frontend, "/login.html", false).await;
        }
        AuthDecision::LoginRedirect { cookie } => {
            let location = ingress_location(&req);
            let headers = [
                ("Location", location.as_str()),
                ("Cache-Control", "no-cache, no-store"),
                ("Set-Cookie", cookie.as_str()),
            ];
            return response::write_response(&mut stream, 301, &headers, b"").await;
        }
    };

    if req.path() == "/logout" {
        return logout(&ctx, &req, &mut stream).await;
    }

    if req.method != "GET" {
        return response::write_response(&mut stream, 405, &[], b"").await;
    }

    if req.is_upgrade() {
        return client_session(ctx, PrefixedStream::new(buffer, stream)).await;
    }

    let file = if req.path() == "/" {
        "/index.html"
    } else {
        req.path()
    };
    response::write_file(&mut stream, &ctx.frontend, file, authenticated).await
}

/// Redirects land back on the dashboard root, honoring a reverse proxy's
/// `X-Ingress-Path` if one is in front of us.
fn ingress_location(req: &Request) -> String {
    format!("{}/", req.header("X-Ingress-Path"))
}

async fn logout<S>(ctx: &ConnectionContext, req: &Request, stream: &mut S) -> HomedResult<()>
where
    S: AsyncWrite + Unpin,
{
    if req.param("session") == "all" {
        debug!("bulk logout, clearing all sessions");
        ctx.store.clear_tokens().await;
        let _ = ctx.events.send(BridgeEvent::DisconnectAll).await;
    } else {
        ctx.store.remove_token(req.cookie(AUTH_COOKIE)).await;
    }
    // Persisted before the redirect, like the login path.
    ctx.store.store().await;

    let location = ingress_location(req);
    let headers = [
        ("Location", location.as_str()),
        ("Cache-Control", "no-cache, no-store"),
        ("Set-Cookie", CLEAR_COOKIE),
    ];
    response::write_response(stream, 301, &headers, b"").await
}

/// Buffer until the head boundary and, for POST, the declared body have
/// arrived. `None` means the peer disconnected (or overflowed the cap)
/// before completing a request.
async fn read_request<S>(stream: &mut S) -> HomedResult<Option<(Vec<u8>, Request)>>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.len() > MAX_REQUEST_SIZE {
            debug!(bytes = buffer.len(), "request exceeds buffer cap, closing");
            return Ok(None);
        }

        if request::head_end(&buffer).is_none() {
            continue;
        }

        let req = Request::parse(&buffer);
        if req.method == "POST" && !req.has_full_body() {
            // The documented blocking point: wait for the body tail.
            continue;
        }
        return Ok(Some((buffer, req)));
    }
}

/// Complete the WebSocket handshake and run the client's session loop:
/// queued frames out, client actions in, until either side ends it.
async fn client_session<S>(
    ctx: Arc<ConnectionContext>,
    stream: PrefixedStream<S>,
) -> HomedResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| HomedError::Transport(format!("websocket handshake failed: {e}")))?;
    let (mut ws_sender, mut ws_receiver) = ws.split();

    let id = ctx.next_client.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::channel(CLIENT_CHANNEL_CAPACITY);
    if ctx
        .events
        .send(BridgeEvent::ClientConnected { id, sender: tx })
        .await
        .is_err()
    {
        // Dispatcher already gone; we are shutting down.
        return Ok(());
    }

    loop {
        tokio::select! {
            queued = rx.recv() => match queued {
                Some(frame) => {
                    if ws_sender.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                None => {
                    // The dispatcher dropped us (bulk logout or shutdown).
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if ctx
                        .events
                        .send(BridgeEvent::ClientMessage { id, text })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = ws_sender.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // Binary and pong frames are not part of the protocol.
                }
                Some(Err(e)) => {
                    debug!(client = id, error = %e, "websocket receive failed");
                    break;
                }
            },
        }
    }

    let _ = ctx
        .events
        .send(BridgeEvent::ClientDisconnected { id })
        .await;
    Ok(())
}

/// Replays the already-buffered request bytes ahead of the live socket,
/// so the WebSocket handshake sees the upgrade request it expects.
pub struct PrefixedStream<S> {
    prefix: Vec<u8>,
    offset: usize,
    inner: S,
}

impl<S> PrefixedStream<S> {
    pub fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            offset: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.offset < this.prefix.len() {
            let remaining = &this.prefix[this.offset..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            this.offset += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
