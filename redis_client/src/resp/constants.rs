//! Byte tags of the RESP2/RESP3 alphabet, and sizing constants for the
//! codec's internal buffers.

pub const SIMPLE_STRING: u8 = b'+';
pub const ERROR: u8 = b'-';
pub const INTEGER: u8 = b':';
pub const BULK_STRING: u8 = b'$';
pub const ARRAY: u8 = b'*';
pub const NULL: u8 = b'_';
pub const BOOLEAN: u8 = b'#';
pub const DOUBLE: u8 = b',';
pub const BIG_NUMBER: u8 = b'(';
pub const BLOB_ERROR: u8 = b'!';
pub const VERBATIM_STRING: u8 = b'=';
pub const MAP: u8 = b'%';
pub const SET: u8 = b'~';
pub const PUSH: u8 = b'>';
pub const ATTRIBUTE: u8 = b'|';
pub const CONTINUED: u8 = b';';

pub const CRLF: &[u8] = b"\r\n";

/// Minimum size of the command buffer the codec must use before flushing.
pub const MIN_CMD_BUF_SIZE: usize = 8 * 1024;
/// Minimum size of the line buffer used to read a `\r\n`-terminated token.
pub const MIN_LINE_BUF_SIZE: usize = 256;
