//! Opening the display link and tuning its timing.
//!
//! The codec works over any async byte stream; this module only knows how
//! to open the serial device node and which timeouts the dispatcher should
//! apply. The device is expected to be configured at the deployment's fixed
//! line rate already (115200 on the deployed panel wiring); termios setup
//! belongs to the host image, not this process.

use std::io;
use std::path::Path;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite};

/// Any async byte stream usable as the display link.
pub trait ByteLink: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteLink for T {}

/// Default bound on one framed read before the dispatcher treats a partial
/// frame as lost. Matches the serial timeout the link peers were built with.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Default cadence of the periodic renderer liveness sweep.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(5);

/// Timing knobs for the dispatcher loop.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// A read that exceeds this while a partial frame is buffered counts as
    /// a truncated frame and triggers resynchronization.
    pub read_timeout: Duration,
    /// How often the renderer pool is swept for exited engines.
    pub liveness_interval: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
        }
    }
}

impl LinkConfig {
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }
}

/// Open the serial device read/write without truncating it.
pub async fn open_serial(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path).await
}
