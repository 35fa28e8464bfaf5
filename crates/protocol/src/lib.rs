//! netwatch protocol - shared types for the file change subscription stream.
//!
//! This crate provides:
//! - [`ChangeEvent`], the message sent for every detected change
//! - [`encode`] and [`FrameDecoder`] for newline-delimited framing
//! - the [`greeting`] line sent when a subscriber connects
//! - port helpers via [`get_port`]
//!
//! # Wire Format
//!
//! The stream is UTF-8 text, one message per line. The first line is a
//! free-form greeting naming the watched file. Each following line is a JSON
//! object `{"type":"changed","timestamp":<epoch millis>}` terminated by `\n`.
//!
//! # Example
//!
//! ```rust
//! use netwatch_protocol::{ChangeEvent, FrameDecoder, encode};
//!
//! let bytes = encode(&ChangeEvent::changed(1525549135)).unwrap();
//!
//! // The transport may deliver the frame in pieces.
//! let (head, tail) = bytes.split_at(29);
//! let mut decoder = FrameDecoder::new();
//! assert!(decoder.decode(head).unwrap().is_empty());
//! let frames = decoder.decode(tail).unwrap();
//! assert_eq!(frames[0].to_event().unwrap(), ChangeEvent::changed(1525549135));
//! ```

mod addr;
mod codec;
mod event;

// Re-export main types at crate root
pub use addr::{DEFAULT_HOST, DEFAULT_PORT, PORT_ENV_VAR, get_port, local_server_addr};
pub use codec::{
    DEFAULT_MAX_FRAME_LEN, FRAME_TERMINATOR, Frame, FrameDecoder, ProtocolError, decode, encode,
};
pub use event::{ChangeEvent, EventKind, epoch_millis, greeting};
