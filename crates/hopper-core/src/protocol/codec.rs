use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::DEFAULT_MAX_FRAME_BYTES;
use crate::error::FrameError;

/// One request or reply: the raw elements of a multi-bulk frame.
pub type Frame = Vec<Bytes>;

/// Length lines longer than this can't hold a valid count.
const MAX_LENGTH_LINE: usize = 24;

#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

enum Step<T> {
    Done(T),
    Incomplete,
}

/// Read a `\n` (or `\r\n`) terminated decimal starting at `pos`.
/// Returns the value and the position just past the newline.
fn read_length(src: &[u8], pos: usize) -> Result<Step<(usize, usize)>, FrameError> {
    let rest = &src[pos..];
    let Some(nl) = rest.iter().position(|&b| b == b'\n') else {
        if rest.len() > MAX_LENGTH_LINE {
            return Err(FrameError::BadLength(
                String::from_utf8_lossy(&rest[..MAX_LENGTH_LINE]).into_owned(),
            ));
        }
        return Ok(Step::Incomplete);
    };

    let mut line = &rest[..nl];
    if let [head @ .., b'\r'] = line {
        line = head;
    }
    let text = std::str::from_utf8(line)
        .map_err(|_| FrameError::BadLength(String::from_utf8_lossy(line).into_owned()))?;
    let value = text
        .trim()
        .parse::<usize>()
        .map_err(|_| FrameError::BadLength(text.to_string()))?;
    Ok(Step::Done((value, pos + nl + 1)))
}

impl FrameCodec {
    /// Parse one frame from the start of `src` without consuming it.
    /// Returns the frame and how many bytes it occupied.
    fn parse(&self, src: &[u8]) -> Result<Step<(Frame, usize)>, FrameError> {
        // src[0] is '*'.
        let (argc, mut pos) = match read_length(src, 1)? {
            Step::Done(v) => v,
            Step::Incomplete => return Ok(Step::Incomplete),
        };
        if argc > self.max_frame_bytes {
            return Err(FrameError::TooLarge {
                len: argc,
                max: self.max_frame_bytes,
            });
        }

        let mut frame = Vec::with_capacity(argc.min(16));
        let mut total = 0usize;
        for _ in 0..argc {
            // Anything before the '$' (the previous element's newline) is skipped.
            let Some(offset) = src[pos..].iter().position(|&b| b == b'$') else {
                return Ok(Step::Incomplete);
            };
            let (len, start) = match read_length(src, pos + offset + 1)? {
                Step::Done(v) => v,
                Step::Incomplete => return Ok(Step::Incomplete),
            };

            total = total.saturating_add(len);
            if total > self.max_frame_bytes {
                return Err(FrameError::TooLarge {
                    len: total,
                    max: self.max_frame_bytes,
                });
            }

            let end = start + len;
            if src.len() < end {
                return Ok(Step::Incomplete);
            }
            frame.push(Bytes::copy_from_slice(&src[start..end]));
            pos = end;
        }

        Ok(Step::Done((frame, pos)))
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        // Drop everything before the next frame start, including the
        // trailing newline of the previous frame.
        match src.iter().position(|&b| b == b'*') {
            Some(start) => src.advance(start),
            None => {
                src.clear();
                return Ok(None);
            }
        }

        match self.parse(src)? {
            Step::Done((frame, used)) => {
                src.advance(used);
                Ok(Some(frame))
            }
            Step::Incomplete => Ok(None),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let body: usize = frame.iter().map(|b| b.len() + 24).sum();
        dst.reserve(body + 24);

        dst.put_slice(format!("*{}\n", frame.len()).as_bytes());
        for element in frame {
            dst.put_slice(format!("${}\n", element.len()).as_bytes());
            dst.put_slice(&element);
            dst.put_u8(b'\n');
        }
        Ok(())
    }
}
