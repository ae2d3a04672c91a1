//! Framed codec for the display link.
//!
//! Binary framing over any AsyncRead/AsyncWrite (serial device, socket,
//! in-memory duplex in tests). Decoding is incremental: `decode` returns
//! `Ok(None)` until the buffer holds one complete frame, so partial reads
//! from a slow link are handled by the framed reader's buffering.
//!
//! Wire layouts (after the control byte):
//!
//! ```text
//! 0x01 image:   name_len:u8  name  payload_len:u32be  payload
//! 0x02 state:   name_len:u8  name
//! 0x03 swipe:   len:u8       'L' / 'R' bytes
//! 0x04 gesture: len:u8       payload
//! ```
//!
//! The image payload length prefix is 4 bytes big-endian. Earlier link
//! peers disagreed on this width; 4 bytes is canonical here and the only
//! width this codec accepts.

use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::frame::{
    CTRL_GESTURE, CTRL_IMAGE, CTRL_STATE, CTRL_SWIPE, DEFAULT_MAX_IMAGE_BYTES, Frame, FramingError,
    MAX_NAME_BYTES, SwipeSet,
};

/// Codec for [`Frame`] over the display link.
#[derive(Debug, Clone)]
pub struct LinkCodec {
    max_image_bytes: usize,
}

impl Default for LinkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkCodec {
    pub fn new() -> Self {
        Self {
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
        }
    }

    /// Override the image payload cap (tests, small deployments).
    pub fn with_max_image_bytes(mut self, max: usize) -> Self {
        self.max_image_bytes = max;
        self
    }

    fn decode_image(&self, src: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        if src.len() < 2 {
            return Ok(None);
        }
        let name_len = src[1] as usize;
        let name_end = 2 + name_len;
        if src.len() < name_end + 4 {
            return Ok(None);
        }
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&src[name_end..name_end + 4]);
        let payload_len = u32::from_be_bytes(len_bytes) as usize;
        if payload_len > self.max_image_bytes {
            return Err(FramingError::PayloadTooLarge {
                size: payload_len,
                max: self.max_image_bytes,
            });
        }
        if src.len() < name_end + 4 + payload_len {
            return Ok(None);
        }

        let name = std::str::from_utf8(&src[2..name_end])?.to_string();
        src.advance(name_end + 4);
        let payload = src.split_to(payload_len).freeze();
        Ok(Some(Frame::ImageTransfer { name, payload }))
    }

    fn decode_state(&self, src: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        if src.len() < 2 {
            return Ok(None);
        }
        let name_len = src[1] as usize;
        if src.len() < 2 + name_len {
            return Ok(None);
        }
        let name = std::str::from_utf8(&src[2..2 + name_len])?.to_string();
        src.advance(2 + name_len);
        Ok(Some(Frame::StateChange { name }))
    }

    fn decode_swipe(&self, src: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        if src.len() < 2 {
            return Ok(None);
        }
        let len = src[1] as usize;
        if src.len() < 2 + len {
            return Ok(None);
        }
        let mut directions = SwipeSet::default();
        for &byte in &src[2..2 + len] {
            match byte {
                b'L' => directions.left = true,
                b'R' => directions.right = true,
                other => return Err(FramingError::InvalidDirection(other)),
            }
        }
        src.advance(2 + len);
        Ok(Some(Frame::Swipe { directions }))
    }

    fn decode_gesture(&self, src: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        if src.len() < 2 {
            return Ok(None);
        }
        let len = src[1] as usize;
        if src.len() < 2 + len {
            return Ok(None);
        }
        src.advance(2);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame::Gesture { payload }))
    }
}

impl Decoder for LinkCodec {
    type Item = Frame;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        let Some(&control) = src.first() else {
            return Ok(None);
        };
        match control {
            CTRL_IMAGE => self.decode_image(src),
            CTRL_STATE => self.decode_state(src),
            CTRL_SWIPE => self.decode_swipe(src),
            CTRL_GESTURE => self.decode_gesture(src),
            other => Err(FramingError::UnknownControl(other)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            // The link ended with a partial frame buffered; no more bytes
            // can ever complete it.
            None => Err(FramingError::Truncated),
        }
    }
}

impl Encoder<Frame> for LinkCodec {
    type Error = FramingError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FramingError> {
        match frame {
            Frame::ImageTransfer { name, payload } => {
                let name = name.as_bytes();
                if name.len() > MAX_NAME_BYTES {
                    return Err(FramingError::FieldTooLong { len: name.len() });
                }
                if payload.len() > self.max_image_bytes {
                    return Err(FramingError::PayloadTooLarge {
                        size: payload.len(),
                        max: self.max_image_bytes,
                    });
                }
                dst.reserve(2 + name.len() + 4 + payload.len());
                dst.put_u8(CTRL_IMAGE);
                dst.put_u8(name.len() as u8);
                dst.put_slice(name);
                dst.put_u32(payload.len() as u32);
                dst.put_slice(&payload);
            }
            Frame::StateChange { name } => {
                let name = name.as_bytes();
                if name.len() > MAX_NAME_BYTES {
                    return Err(FramingError::FieldTooLong { len: name.len() });
                }
                dst.reserve(2 + name.len());
                dst.put_u8(CTRL_STATE);
                dst.put_u8(name.len() as u8);
                dst.put_slice(name);
            }
            Frame::Swipe { directions } => {
                if directions.is_empty() {
                    return Err(FramingError::EmptySwipe);
                }
                let bytes = directions.to_bytes();
                dst.reserve(2 + bytes.len());
                dst.put_u8(CTRL_SWIPE);
                dst.put_u8(bytes.len() as u8);
                dst.put_slice(&bytes);
            }
            Frame::Gesture { payload } => {
                if payload.len() > MAX_NAME_BYTES {
                    return Err(FramingError::FieldTooLong { len: payload.len() });
                }
                dst.reserve(2 + payload.len());
                dst.put_u8(CTRL_GESTURE);
                dst.put_u8(payload.len() as u8);
                dst.put_slice(&payload);
            }
        }
        Ok(())
    }
}
