//! RESP2/RESP3 value model and wire codec (components A and B).
pub mod codec;
pub mod constants;
pub mod value;

pub use codec::{read_frame, write_command, CorkHint};
pub use value::Value;
