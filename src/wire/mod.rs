//! Wire-level frame handling.

pub mod frame;

pub use frame::{Frame, FrameError, FrameType, HEADER_LEN};
