//! TCP front end: one task per connection, requests handled in order.
//!
//! Each connection gets a fresh [`SessionId`] and a cancellation token that is
//! a child of the server's shutdown token. The token fires when the peer goes
//! away or pipelines past the request backlog, which aborts any blocking
//! command the connection is running; once both halves of the connection are
//! done its reservations are restored.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::app::{ReaperLoop, RequestContext, Runtime};
use crate::domain::{SessionId, SessionIdAllocator};
use crate::error::Result;
use crate::protocol::{Frame, FrameCodec};

/// Requests a connection may have decoded but not yet executed. A peer that
/// pipelines past this is disconnected.
const REQUEST_BACKLOG: usize = 128;

const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

pub struct Server {
    listener: TcpListener,
    runtime: Arc<Runtime>,
    sessions: SessionIdAllocator,
}

impl Server {
    /// Bind the configured listen address. Failure here is fatal for startup.
    pub async fn bind(runtime: Runtime) -> Result<Self> {
        let addr = runtime.services().config.socket_addr()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "hopper listening");
        Ok(Self {
            listener,
            runtime: Arc::new(runtime),
            sessions: SessionIdAllocator::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires (externally or via `StopServer`).
    ///
    /// On the way out: stop accepting, cancel every connection, wait for them
    /// to restore their reservations, wake all cache waiters, stop the reaper.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Self {
            listener,
            runtime,
            sessions,
        } = self;
        let services = Arc::clone(runtime.services());

        let reaper_token = CancellationToken::new();
        let reaper = ReaperLoop::new(Arc::clone(&services), services.config.gc_interval())
            .spawn(reaper_token.clone());

        let mut connections = JoinSet::new();
        let mut backoff = Duration::ZERO;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        backoff = Duration::ZERO;
                        let session = sessions.allocate();
                        connections.spawn(serve_connection(
                            Arc::clone(&runtime),
                            stream,
                            peer,
                            session,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        backoff = (backoff * 2).clamp(Duration::from_millis(5), MAX_ACCEPT_BACKOFF);
                        tracing::warn!(error = %e, retry_in = ?backoff, "accept failed");
                        tokio::time::sleep(backoff).await;
                    }
                },
            }
            while connections.try_join_next().is_some() {}
        }

        drop(listener);
        tracing::info!(open = connections.len(), "shutting down");
        while connections.join_next().await.is_some() {}

        let woken = services.cache.clear_all().await;
        if woken > 0 {
            tracing::debug!(woken, "woke cache waiters on shutdown");
        }
        reaper_token.cancel();
        if let Err(e) = reaper.await {
            tracing::warn!(error = %e, "reaper task failed");
        }

        tracing::info!("hopper stopped");
        Ok(())
    }
}

async fn serve_connection(
    runtime: Arc<Runtime>,
    stream: TcpStream,
    peer: SocketAddr,
    session: SessionId,
    shutdown: CancellationToken,
) {
    tracing::debug!(%session, %peer, "connection opened");
    let cancel = shutdown.child_token();
    let codec = FrameCodec::new(runtime.services().config.max_frame_bytes);

    let (read_half, write_half) = stream.into_split();
    let mut frames = FramedRead::new(read_half, codec.clone());
    let mut replies = FramedWrite::new(write_half, codec);
    let (tx, mut rx) = mpsc::channel::<Frame>(REQUEST_BACKLOG);

    // The reader owns the cancellation: EOF, a framing error or an overflowing
    // backlog ends the connection, so in-flight waits are aborted right away.
    // It must keep polling the socket to notice the peer closing, so it never
    // waits for room in the channel.
    let reader = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = frames.next() => match next {
                        Some(Ok(frame)) => match tx.try_send(frame) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                tracing::warn!(
                                    %session,
                                    backlog = REQUEST_BACKLOG,
                                    "dropping connection with too many pipelined requests"
                                );
                                break;
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        },
                        Some(Err(e)) => {
                            tracing::warn!(%session, error = %e, "dropping connection on bad frame");
                            break;
                        }
                        None => break,
                    },
                }
            }
            cancel.cancel();
        }
    });

    let ctx = RequestContext {
        session,
        cancel: cancel.clone(),
        shutdown,
    };
    while let Some(frame) = rx.recv().await {
        if frame.is_empty() {
            continue;
        }
        let Some(reply) = runtime.dispatch(&ctx, &frame).await else {
            continue;
        };
        // A peer that stops reading must not hold up shutdown or recovery.
        tokio::select! {
            biased;
            sent = replies.send(reply.into_frame()) => if let Err(e) = sent {
                tracing::debug!(%session, error = %e, "write failed");
                break;
            },
            _ = cancel.cancelled() => {
                tracing::debug!(%session, "abandoning reply to closed connection");
                break;
            }
        }
    }

    cancel.cancel();
    drop(rx);
    if let Err(e) = reader.await {
        tracing::warn!(%session, error = %e, "reader task failed");
    }

    let restored = runtime.services().jobs.restore_all(session).await;
    if restored > 0 {
        tracing::info!(%session, restored, "restored jobs from closed connection");
    }
    tracing::debug!(%session, %peer, "connection closed");
}
