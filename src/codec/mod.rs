//! Codec module - the wire's primitive encodings.
//!
//! Stateless encode/decode functions for everything the baseband protocol
//! carries inside frame fields and PDU blobs:
//!
//! - [`bcd`] - swapped-nibble BCD dialing numbers and hex-string transport
//! - [`gsm7`] - GSM 7-bit default alphabet, packed septets and unpacked bytes
//! - [`ucs2`] - fixed-width UTF-16BE text
//! - [`Cursor`] - a bounds-checked read cursor over a contiguous byte slice
//!
//! # Design
//!
//! Every `encode` has a `decode` that is its exact inverse on well-formed
//! input. Malformed input (nibble out of range, truncated field, unpaired
//! surrogate) yields [`Error::Decode`](crate::error::Error::Decode), never a
//! panic.
//!
//! # Example
//!
//! ```
//! use modemwire::codec::bcd;
//!
//! let wire = bcd::encode("15551234567").unwrap();
//! assert_eq!(bcd::decode(&wire).unwrap(), "15551234567");
//! ```

pub mod bcd;
pub mod gsm7;
pub mod ucs2;

mod cursor;

pub use cursor::Cursor;
