//! `lineio`: small IO helpers for line-oriented TCP protocols.
//!
//! - [`line::LineFramer`] turns arbitrary byte chunks into CR / LF / CRLF terminated lines
//!   without copying (`BytesMut::split_to(..).freeze()`),
//! - [`line::LineReader`] drives a framer from any `AsyncRead`.

pub mod line;

pub use line::{FramingMode, LineFramer, LineReader};
