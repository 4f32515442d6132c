//! Wire protocol - multi-bulk framing と返信フォーマット
//!
//! A frame is `*<argc>\n` followed by `argc` elements, each `$<len>\n<bytes>\n`.
//! Requests and replies use the same framing; a reply's elements are
//! `status, message, payload...`.

mod codec;
mod reply;

pub use codec::{Frame, FrameCodec};
pub use reply::{Reply, StatusCode};
