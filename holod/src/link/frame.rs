//! Wire protocol types for the display link.
//!
//! Every frame starts with one control byte selecting the message kind.
//! Strings and payloads are length-prefixed: names carry a 1-byte length
//! (so a name can never exceed 255 bytes), image payloads a 4-byte
//! big-endian length.

use tokio_util::bytes::Bytes;

/// Control byte: image file transfer.
pub const CTRL_IMAGE: u8 = 0x01;
/// Control byte: animation state change request.
pub const CTRL_STATE: u8 = 0x02;
/// Control byte: debounced swipe directions.
pub const CTRL_SWIPE: u8 = 0x03;
/// Control byte: raw gesture payload (reserved).
pub const CTRL_GESTURE: u8 = 0x04;

/// Maximum length of a name field (bounded by its 1-byte length prefix).
pub const MAX_NAME_BYTES: usize = u8::MAX as usize;

/// Default cap on a single image payload.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 8 * 1024 * 1024;

/// One complete message decoded from the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One image file pushed into the store.
    ImageTransfer { name: String, payload: Bytes },

    /// Request to make the named animation the visible one.
    StateChange { name: String },

    /// Swipe directions detected on the sending side.
    Swipe { directions: SwipeSet },

    /// Reserved gesture channel. Decodable, forwarded, never interpreted.
    Gesture { payload: Bytes },
}

impl Frame {
    /// The control byte this frame is encoded with.
    pub fn control(&self) -> u8 {
        match self {
            Frame::ImageTransfer { .. } => CTRL_IMAGE,
            Frame::StateChange { .. } => CTRL_STATE,
            Frame::Swipe { .. } => CTRL_SWIPE,
            Frame::Gesture { .. } => CTRL_GESTURE,
        }
    }
}

/// A single swipe direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwipeDirection {
    Left,
    Right,
}

impl SwipeDirection {
    /// The ASCII byte used on the wire.
    pub fn as_byte(&self) -> u8 {
        match self {
            SwipeDirection::Left => b'L',
            SwipeDirection::Right => b'R',
        }
    }
}

/// Set of directions carried by one swipe frame.
///
/// Encoded as at most one `L` and one `R`, `L` first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwipeSet {
    pub left: bool,
    pub right: bool,
}

impl SwipeSet {
    pub fn left() -> Self {
        Self {
            left: true,
            right: false,
        }
    }

    pub fn right() -> Self {
        Self {
            left: false,
            right: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.left && !self.right
    }

    /// Canonical wire bytes for this set.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2);
        if self.left {
            out.push(b'L');
        }
        if self.right {
            out.push(b'R');
        }
        out
    }
}

impl std::fmt::Display for SwipeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.left, self.right) {
            (true, true) => write!(f, "left+right"),
            (true, false) => write!(f, "left"),
            (false, true) => write!(f, "right"),
            (false, false) => write!(f, "none"),
        }
    }
}

/// Errors raised while encoding or decoding link frames.
///
/// Decode-side errors are recoverable: the dispatcher logs them, discards
/// buffered bytes, and waits for the next control byte. Encode-side errors
/// (`FieldTooLong`, `PayloadTooLarge`, `EmptySwipe`) are contract violations
/// by the caller.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// The control byte does not select any known frame kind.
    #[error("unknown control byte 0x{0:02x}")]
    UnknownControl(u8),

    /// The stream ended while a frame was still incomplete.
    #[error("link closed mid-frame")]
    Truncated,

    /// A name field is not valid UTF-8.
    #[error("name field is not valid UTF-8: {0}")]
    InvalidName(#[from] std::str::Utf8Error),

    /// A swipe payload byte is neither `L` nor `R`.
    #[error("invalid swipe direction byte 0x{0:02x}")]
    InvalidDirection(u8),

    /// A declared image payload length exceeds the configured cap.
    #[error("image payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A name or gesture payload exceeds its 1-byte length prefix.
    #[error("field is {len} bytes, max 255")]
    FieldTooLong { len: usize },

    /// A swipe frame must carry at least one direction.
    #[error("cannot encode an empty swipe")]
    EmptySwipe,

    /// Underlying link I/O failure.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FramingError {
    /// Whether the dispatcher can recover by resynchronizing, as opposed to
    /// a dead transport.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, FramingError::Io(_))
    }
}
