use thiserror::Error;

/// Crate-wide error type.
///
/// Store operations never return this for "absent": a missing job or cache
/// key is a normal outcome and is reported through `bool` / `Option`.
#[derive(Debug, Error)]
pub enum HopperError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("config error: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate handler for command={0}")]
    DuplicateHandler(String),

    #[error("invalid command name: {0:?}")]
    InvalidCommandName(String),

    #[error("missing handlers for commands: {0:?}")]
    MissingHandlers(Vec<String>),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("{0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, HopperError>;

/// Why a blocking wait ended without a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    /// The deadline elapsed first.
    #[error("wait timed out")]
    Timeout,

    /// The connection that owns the wait went away.
    #[error("wait cancelled")]
    Cancelled,
}

/// Malformed wire framing. Always fatal for the connection that produced it.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("bad length line: {0:?}")]
    BadLength(String),

    #[error("length {len} exceeds limit {max}")]
    TooLarge { len: usize, max: usize },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
