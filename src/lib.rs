//! # modemwire
//!
//! Protocol driver for a baseband (modem) daemon speaking the binary
//! token-correlated channel over a Unix domain socket.
//!
//! The crate turns the raw byte stream into typed state and events:
//! frames are deframed from a circular buffer, responses are routed back
//! to their originating request by token, and a session state machine
//! tracks radio power, the SIM and its records, calls, data contexts,
//! network registration, SMS PDUs, and proactive card commands.
//!
//! ## Architecture
//!
//! - **Transport** (Unix socket): read loop plus a dedicated writer task
//! - **Protocol**: length-prefixed frames, little-endian payload fields
//! - **Driver**: synchronous engine, bytes in / events and frames out
//!
//! ## Example
//!
//! ```no_run
//! use modemwire::{Connection, EventBus, ModemEvent};
//!
//! #[tokio::main]
//! async fn main() -> modemwire::Result<()> {
//!     let (bus, mut events) = EventBus::new();
//!     let mut conn = Connection::connect("/dev/socket/rild", bus).await?;
//!
//!     conn.driver_mut().radio_power(true);
//!     conn.flush().await?;
//!     tokio::spawn(conn.run());
//!
//!     while let Some(event) = events.recv().await {
//!         if let ModemEvent::SmsReceived { message } = &event {
//!             println!("{}: {}", message.sender, message.body);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod router;
pub mod session;
pub mod transport;
pub mod writer;

mod assembler;
mod connection;
mod driver;

pub use assembler::Assembler;
pub use bus::{EventBus, ModemEvent};
pub use connection::Connection;
pub use driver::Driver;
pub use error::{Error, Result};
