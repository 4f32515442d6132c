//! Minimal async client, used by the CLI and the integration tests.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;

use crate::app::commands;
use crate::domain::ReservedJob;
use crate::error::{HopperError, Result};
use crate::observability::BrokerCounts;
use crate::protocol::{Frame, FrameCodec, Reply, StatusCode};

/// Result of a `GetReturn` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetReturnOutcome {
    Value(Bytes),
    /// Job is neither pending nor has a stored result.
    Missing,
    TimedOut,
}

pub struct Client {
    framed: Framed<TcpStream, FrameCodec>,
}

fn arg(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

fn unexpected(reply: &Reply) -> HopperError {
    HopperError::UnexpectedReply(format!("{} {}", reply.status, reply.message))
}

fn text(element: &Bytes) -> Result<String> {
    String::from_utf8(element.to_vec())
        .map_err(|_| HopperError::UnexpectedReply("non UTF-8 id in reply".into()))
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                HopperError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "connect timed out",
                ))
            })??;
        stream.set_nodelay(true)?;
        Ok(Self {
            framed: Framed::new(stream, FrameCodec::default()),
        })
    }

    /// Send one request and read one reply.
    pub async fn request(&mut self, argv: Frame) -> Result<Reply> {
        self.framed.send(argv).await?;
        match self.framed.next().await {
            Some(frame) => Reply::from_frame(frame?),
            None => Err(HopperError::UnexpectedReply(
                "connection closed before reply".into(),
            )),
        }
    }

    /// Returns the generated job id.
    pub async fn add_job(&mut self, tube: &str, payload: impl Into<Bytes>) -> Result<String> {
        let reply = self
            .request(vec![arg(commands::ADD_JOB), arg(tube), payload.into()])
            .await?;
        match (reply.status, reply.payload.first()) {
            (StatusCode::Ok, Some(id)) => text(id),
            _ => Err(unexpected(&reply)),
        }
    }

    pub async fn get_job(&mut self, tube: &str) -> Result<Option<ReservedJob>> {
        let reply = self.request(vec![arg(commands::GET_JOB), arg(tube)]).await?;
        match (reply.status, reply.payload.as_slice()) {
            (StatusCode::Ok, [key, payload, ..]) => Ok(Some(ReservedJob {
                key: text(key)?,
                payload: payload.clone(),
            })),
            (StatusCode::Empty, _) => Ok(None),
            _ => Err(unexpected(&reply)),
        }
    }

    /// `false` when the broker does not know `id` as a reserved job.
    pub async fn set_return(&mut self, id: &str, value: impl Into<Bytes>) -> Result<bool> {
        let reply = self
            .request(vec![arg(commands::SET_RETURN), arg(id), value.into()])
            .await?;
        match reply.status {
            StatusCode::Ok => Ok(true),
            StatusCode::NotFound => Ok(false),
            _ => Err(unexpected(&reply)),
        }
    }

    /// `timeout` of `None` uses the server's default wait.
    pub async fn get_return(
        &mut self,
        id: &str,
        timeout: Option<Duration>,
    ) -> Result<GetReturnOutcome> {
        let mut argv = vec![arg(commands::GET_RETURN), arg(id)];
        if let Some(timeout) = timeout {
            argv.push(Bytes::from(timeout.as_secs().to_string()));
        }
        let reply = self.request(argv).await?;
        match (reply.status, reply.payload.first()) {
            (StatusCode::Ok, Some(value)) => Ok(GetReturnOutcome::Value(value.clone())),
            (StatusCode::Empty, _) => Ok(GetReturnOutcome::Missing),
            (StatusCode::Timeout, _) => Ok(GetReturnOutcome::TimedOut),
            _ => Err(unexpected(&reply)),
        }
    }

    /// Wait for `tube` to have a job. `Some(false)` if woken but already
    /// drained, `None` on timeout.
    pub async fn usr1(&mut self, tube: &str, timeout: Option<Duration>) -> Result<Option<bool>> {
        let mut argv = vec![arg(commands::USR1), arg(tube)];
        if let Some(timeout) = timeout {
            argv.push(Bytes::from(timeout.as_secs().to_string()));
        }
        let reply = self.request(argv).await?;
        match reply.status {
            StatusCode::Ok => Ok(Some(true)),
            StatusCode::Empty => Ok(Some(false)),
            StatusCode::Timeout => Ok(None),
            _ => Err(unexpected(&reply)),
        }
    }

    pub async fn status(&mut self) -> Result<BrokerCounts> {
        let reply = self.request(vec![arg(commands::STATUS)]).await?;
        match (reply.status, reply.payload.first()) {
            (StatusCode::Ok, Some(counts)) => Ok(serde_json::from_slice(counts)?),
            _ => Err(unexpected(&reply)),
        }
    }

    pub async fn stop_server(&mut self) -> Result<()> {
        let reply = self.request(vec![arg(commands::STOP_SERVER)]).await?;
        if reply.is_ok() {
            Ok(())
        } else {
            Err(unexpected(&reply))
        }
    }
}
