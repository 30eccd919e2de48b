//! Socket read loop around the driver.
//!
//! [`Connection`] owns one [`Driver`] and the two socket halves: bytes
//! read from the socket go through [`Driver::process`], and frames the
//! driver queues go to the writer task. Callers that only consume events
//! hand the connection to [`Connection::run`]; callers that issue requests
//! interleave [`Connection::driver_mut`] and [`Connection::step`] in their
//! own loop.
//!
//! # Example
//!
//! ```no_run
//! use modemwire::{Connection, EventBus};
//!
//! # async fn demo() -> modemwire::Result<()> {
//! let (bus, mut events) = EventBus::new();
//! let mut conn = Connection::connect("/dev/socket/rild", bus).await?;
//!
//! conn.driver_mut().radio_power(true);
//! conn.flush().await?;
//!
//! tokio::spawn(conn.run());
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

use tokio::io::AsyncReadExt;
use tokio::net::unix::OwnedReadHalf;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::driver::Driver;
use crate::error::Result;
use crate::transport::Transport;
use crate::writer::{spawn_writer_task, WriterHandle};

/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 16 * 1024;

pub struct Connection {
    driver: Driver,
    reader: OwnedReadHalf,
    writer: WriterHandle,
    read_buf: Vec<u8>,
    _writer_task: JoinHandle<Result<()>>,
}

impl Connection {
    /// Connect to the daemon socket and set up the writer task.
    pub async fn connect(path: impl AsRef<std::path::Path>, bus: EventBus) -> Result<Self> {
        let transport = Transport::connect(path).await?;
        Ok(Self::from_transport(transport, bus))
    }

    /// Wrap an already connected transport.
    pub fn from_transport(transport: Transport, bus: EventBus) -> Self {
        let (reader, write_half) = transport.into_split();
        let (writer, writer_task) = spawn_writer_task(write_half);
        Self {
            driver: Driver::new(bus),
            reader,
            writer,
            read_buf: vec![0u8; READ_BUFFER_SIZE],
            _writer_task: writer_task,
        }
    }

    #[inline]
    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    #[inline]
    pub fn driver_mut(&mut self) -> &mut Driver {
        &mut self.driver
    }

    /// Hand every frame the driver has queued to the writer task.
    pub async fn flush(&mut self) -> Result<()> {
        for frame in self.driver.take_outbound() {
            self.writer.send(frame).await?;
        }
        Ok(())
    }

    /// One read-process-flush round. Returns `false` on clean EOF.
    pub async fn step(&mut self) -> Result<bool> {
        let n = self.reader.read(&mut self.read_buf).await?;
        if n == 0 {
            return Ok(false);
        }
        let (driver, buf) = (&mut self.driver, &self.read_buf[..n]);
        driver.process(buf);
        self.flush().await?;
        Ok(true)
    }

    /// Read until the daemon closes the socket.
    pub async fn run(mut self) -> Result<()> {
        while self.step().await? {}
        tracing::info!("daemon closed the channel");
        Ok(())
    }
}
