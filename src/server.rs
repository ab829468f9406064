//! Async TCP front end. Each connection is framed with a 4-byte
//! length-delimited codec (`tokio_util::codec::LengthDelimitedCodec`) around
//! the raw tag=value wire bytes — the FIX messages themselves are
//! self-describing once complete, but a length prefix keeps connection
//! handling simple and avoids scanning the stream for the trailing
//! `CheckSum` field to find frame boundaries.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::facade::FacadeConfig;
use crate::state::{self, Handle};

/// Binds `port` and serves connections until `shutdown` is cancelled.
pub async fn run(port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
    let handle = state::spawn_serializer(FacadeConfig::default(), 256);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "order book server listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                let handle = handle.clone();
                let conn_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    info!(%peer, "connection accepted");
                    if let Err(e) = handle_connection(socket, handle, conn_shutdown).await {
                        warn!(%peer, error = %e, "connection ended with error");
                    }
                    info!(%peer, "connection closed");
                });
            }
        }
    }
    Ok(())
}

async fn handle_connection(
    socket: tokio::net::TcpStream,
    handle: Handle,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            frame = framed.next() => {
                let Some(frame) = frame else { return Ok(()) };
                let raw = frame?.to_vec();
                let Some(responses) = handle.submit(raw).await else {
                    error!("serializer task is gone, closing connection");
                    return Ok(());
                };
                for response in responses {
                    framed.send(response.into()).await?;
                }
            }
        }
    }
}
