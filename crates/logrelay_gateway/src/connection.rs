//! One WebSocket client connection.
//!
//! After the handshake a connection is registered under the `client_id`
//! query parameter and runs two pumps: the writer drains the outbound queue
//! into text frames, the reader only watches for the peer going away.

use crate::feed::ClientFeed;
use crate::registry::{RegistryError, RegistryHandle};
use crate::results::ResultConsumer;
use async_tungstenite::tokio::accept_hdr_async;
use async_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use async_tungstenite::tungstenite::http::Uri;
use async_tungstenite::tungstenite::{Error as WsError, Message};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use logrelay_broker::{Broker, BrokerError, CancellationToken};
use logrelay_protocol::TopicConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const CLIENT_ID_PARAM: &str = "client_id";

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Shared by every connection task.
pub struct ConnectionContext {
    pub broker: Arc<dyn Broker>,
    pub topics: TopicConfig,
    pub registry: RegistryHandle,
    pub consumer: Arc<ResultConsumer>,
}

/// `client_id` from the request query string, if present.
pub fn client_id_from_uri(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == CLIENT_ID_PARAM)
        .map(|(_, value)| value.into_owned())
}

/// Join `first` and everything already queued behind it into one frame.
pub fn coalesce(first: String, outbound: &mut mpsc::Receiver<String>) -> String {
    let mut frame = first;
    while let Ok(next) = outbound.try_recv() {
        frame.push('\n');
        frame.push_str(&next);
    }
    frame
}

/// Drain `outbound` into `sink` until the queue closes or `closed` fires,
/// then send a Close frame. Returns the number of text frames written.
pub async fn write_pump<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<String>,
    closed: CancellationToken,
) -> Result<usize, S::Error>
where
    S: Sink<Message> + Unpin,
{
    let mut frames = 0usize;
    loop {
        let first = tokio::select! {
            biased;
            _ = closed.cancelled() => None,
            msg = outbound.recv() => msg,
        };
        let Some(first) = first else {
            break;
        };
        sink.send(Message::Text(coalesce(first, &mut outbound))).await?;
        frames += 1;
    }

    // Peer may already be gone.
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
    Ok(frames)
}

/// Consume inbound frames until the peer closes, errors, or `closed` fires.
/// Client payloads carry no meaning here.
pub async fn read_pump<St>(mut stream: St, closed: CancellationToken)
where
    St: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "Read error, treating as disconnect");
                break;
            }
        }
    }
}

/// Run one client connection from handshake to teardown.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ConnectionContext>,
) -> Result<(), ConnectionError> {
    let mut requested_id = None;
    let mut ws = accept_hdr_async(stream, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        requested_id = client_id_from_uri(req.uri());
        Ok(resp)
    })
    .await?;

    let Some(client_id) = requested_id.filter(|id| !id.is_empty()) else {
        warn!(%peer, "Rejecting connection without client id");
        let _ = ws.send(Message::Close(None)).await;
        return Ok(());
    };

    let registration = ctx.registry.register(&client_id).await?;
    let sub = match ctx
        .broker
        .subscribe(&[ctx.topics.progress.clone(), ctx.topics.result.clone()])
        .await
    {
        Ok(sub) => sub,
        Err(e) => {
            ctx.registry
                .unregister(&registration.id, registration.generation)
                .await;
            let _ = ws.send(Message::Close(None)).await;
            return Err(e.into());
        }
    };

    let id = registration.id;
    let generation = registration.generation;
    let closed = registration.closed;
    info!(client_id = %id, %peer, "Client connected");

    let feed = ClientFeed {
        client_id: id.clone(),
        topics: ctx.topics.clone(),
        registry: ctx.registry.clone(),
        consumer: ctx.consumer.clone(),
    };
    let feed_task = tokio::spawn(feed.run(sub, closed.clone()));

    let (sink, stream) = ws.split();
    let writer = tokio::spawn(write_pump(sink, registration.outbound, closed.clone()));
    read_pump(stream, closed.clone()).await;

    closed.cancel();
    ctx.registry.unregister(&id, generation).await;

    match writer.await {
        Ok(Ok(frames)) => debug!(client_id = %id, frames, "Writer finished"),
        Ok(Err(e)) => debug!(client_id = %id, error = %e, "Writer stopped on error"),
        Err(e) => warn!(client_id = %id, error = %e, "Writer task failed"),
    }
    if let Err(e) = feed_task.await {
        warn!(client_id = %id, error = %e, "Feed task failed");
    }

    info!(client_id = %id, %peer, "Client disconnected");
    Ok(())
}
