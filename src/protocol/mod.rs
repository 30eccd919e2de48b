//! Protocol module - wire format, framing, and frame codes.
//!
//! This module implements the binary framing layer of the baseband channel:
//! - numeric request/event/error code tables
//! - the incoming circular frame buffer with in-place frame readers
//! - the outbound frame builder with retroactive length stamping

mod codes;
mod frame_buffer;
mod frame_writer;

pub use codes::{
    EventCode, RemoteError, RequestCode, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE, RESPONSE_SOLICITED,
    RESPONSE_UNSOLICITED,
};
pub use frame_buffer::{FrameBuffer, FrameReader};
pub use frame_writer::FrameWriter;
