//! Sentinel framing for the connection byte stream.
//!
//! A frame is everything up to the next [`END_FLAG`]; the sentinel itself is
//! stripped on decode and appended on encode. Content that contains the
//! sentinel cannot be carried.

use bytes::{Buf, BufMut, BytesMut};
use memchr::memmem;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::DriveError;
use crate::protocol::END_FLAG;

#[derive(Debug, Clone)]
pub struct SentinelCodec {
    max_frame_len: usize,
    /// Bytes already searched without finding the sentinel.
    scanned: usize,
}

impl SentinelCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len,
            scanned: 0,
        }
    }
}

impl Decoder for SentinelCodec {
    type Item = BytesMut;
    type Error = DriveError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, DriveError> {
        // Resume a little before the previous end so a sentinel split across
        // reads is still found.
        let start = self.scanned.saturating_sub(END_FLAG.len() - 1);
        match memmem::find(&src[start..], END_FLAG) {
            Some(offset) => {
                let frame = src.split_to(start + offset);
                src.advance(END_FLAG.len());
                self.scanned = 0;
                Ok(Some(frame))
            }
            None => {
                if src.len() > self.max_frame_len {
                    return Err(DriveError::FrameTooLarge {
                        limit: self.max_frame_len,
                    });
                }
                self.scanned = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>, DriveError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(DriveError::Transport(format!(
                "connection closed with {} unterminated bytes",
                src.len()
            ))),
        }
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for SentinelCodec {
    type Error = DriveError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), DriveError> {
        let item = item.as_ref();
        dst.reserve(item.len() + END_FLAG.len());
        dst.put_slice(item);
        dst.put_slice(END_FLAG);
        Ok(())
    }
}
