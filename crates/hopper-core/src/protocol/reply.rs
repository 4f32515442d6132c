use std::fmt;

use bytes::Bytes;

use super::Frame;
use crate::error::{HopperError, Result};

/// First element of every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    /// Nothing there: empty tube, unknown result.
    Empty,
    /// Unknown job id or command.
    NotFound,
    BadArguments,
    Timeout,
    Internal,
}

impl StatusCode {
    pub fn code(self) -> i32 {
        match self {
            StatusCode::Ok => 1,
            StatusCode::Empty => 0,
            StatusCode::NotFound => 404,
            StatusCode::BadArguments => 405,
            StatusCode::Timeout => 408,
            StatusCode::Internal => -1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => StatusCode::Ok,
            0 => StatusCode::Empty,
            404 => StatusCode::NotFound,
            405 => StatusCode::BadArguments,
            408 => StatusCode::Timeout,
            -1 => StatusCode::Internal,
            _ => return None,
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A decoded or to-be-encoded reply: `status, message, payload...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub message: String,
    pub payload: Vec<Bytes>,
}

impl Reply {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            payload: Vec::new(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Ok, message)
    }

    pub fn empty(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Empty, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, message)
    }

    pub fn bad_arguments(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BadArguments, message)
    }

    pub fn timeout() -> Self {
        Self::new(StatusCode::Timeout, "timeout")
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::Internal, "internal error")
    }

    pub fn with_payload(mut self, element: impl Into<Bytes>) -> Self {
        self.payload.push(element.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }

    pub fn into_frame(self) -> Frame {
        let mut frame = Vec::with_capacity(2 + self.payload.len());
        frame.push(Bytes::from(self.status.code().to_string()));
        frame.push(Bytes::from(self.message));
        frame.extend(self.payload);
        frame
    }

    /// Interpret a frame read back from the server.
    pub fn from_frame(frame: Frame) -> Result<Self> {
        let mut elements = frame.into_iter();
        let status = elements
            .next()
            .ok_or_else(|| HopperError::UnexpectedReply("empty reply".into()))?;
        let status = std::str::from_utf8(&status)
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
            .and_then(StatusCode::from_code)
            .ok_or_else(|| {
                HopperError::UnexpectedReply(format!(
                    "unknown status {:?}",
                    String::from_utf8_lossy(&status)
                ))
            })?;
        let message = elements
            .next()
            .map(|m| String::from_utf8_lossy(&m).into_owned())
            .unwrap_or_default();
        Ok(Self {
            status,
            message,
            payload: elements.collect(),
        })
    }
}
