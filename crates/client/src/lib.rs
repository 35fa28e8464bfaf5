//! netwatch client - the subscriber side of the change stream.
//!
//! [`Subscriber`] reads the greeting and then one [`ChangeEvent`] per line,
//! reassembling lines that the network delivers in pieces. The [`demo`]
//! module runs a server that deliberately splits a message in two to show
//! why that reassembly is needed.

pub mod demo;
mod subscriber;

pub use netwatch_protocol::ChangeEvent;
pub use subscriber::{ClientError, Subscriber};
