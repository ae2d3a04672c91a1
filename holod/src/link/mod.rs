//! Serial link protocol for the hologram display.
//!
//! One byte stream multiplexes three concerns, distinguished by a leading
//! control byte per frame:
//!
//! - **frame**: message types ([`Frame`]) and the framing error taxonomy
//! - **codec**: length-prefixed binary codec for AsyncRead/AsyncWrite
//! - **transport**: opening the serial device and link tuning knobs

pub mod codec;
pub mod frame;
pub mod transport;

pub use codec::LinkCodec;
pub use frame::{Frame, FramingError, SwipeDirection, SwipeSet};
pub use transport::{ByteLink, LinkConfig, open_serial};
