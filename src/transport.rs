//! Unix-domain-socket transport to the baseband daemon.
//!
//! The daemon owns the socket (conventionally `/dev/socket/rild`); this
//! side connects. At boot the socket appears some time after the daemon
//! process does, so [`connect_with_retry`] polls until it is there.

use std::path::Path;
use std::time::Duration;

use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::error::{Error, Result};

/// Interval between connection attempts while the socket is absent.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Connected socket to the baseband daemon.
pub struct Transport {
    stream: UnixStream,
}

impl Transport {
    /// Connect once. Fails immediately if the socket is absent or refuses.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        Ok(Self { stream })
    }

    /// Connect, retrying every [`RETRY_INTERVAL`] up to `attempts` times.
    pub async fn connect_with_retry(path: impl AsRef<Path>, attempts: u32) -> Result<Self> {
        let path = path.as_ref();
        let mut last_err = None;
        for attempt in 0..attempts {
            match UnixStream::connect(path).await {
                Ok(stream) => return Ok(Self { stream }),
                Err(err) => {
                    tracing::debug!(
                        path = %path.display(),
                        attempt,
                        error = %err,
                        "socket not ready"
                    );
                    last_err = Some(err);
                }
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
        Err(last_err.map(Error::Io).unwrap_or(Error::ConnectionClosed))
    }

    /// Split into read and write halves for the read loop and writer task.
    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}
