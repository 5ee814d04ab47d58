//! RESP2/RESP3 wire codec: serializing argument vectors into unified
//! request arrays, and parsing frames back into [`Value`] trees (component
//! B of the design).
use std::io::{self, BufRead, Write};

use super::constants::*;
use super::value::Value;
use crate::error::{ClientError, ClientErrorKind, ClientResult};

/// A writer that can hint the OS that more data is coming right behind the
/// current write, so the kernel can coalesce small writes into fewer
/// packets (`TCP_CORK`/`MSG_MORE`) instead of flushing every argument as its
/// own segment. Implemented for the concrete connection transports;
/// plain `Write` implementors get a no-op default via [`write_command`]'s
/// bound relaxation below.
pub trait CorkHint {
    /// Hints that more writes belong to the same logical record. `cork(true)`
    /// precedes a batch of small writes; `cork(false)` is called before the
    /// final chunk so it goes out promptly.
    fn set_cork(&mut self, corked: bool) -> io::Result<()> {
        let _ = corked;
        Ok(())
    }
}

/// Serializes a command as a RESP array of bulk strings and writes it to
/// `stream`, buffering arguments into a fixed-size command buffer and
/// flushing whenever the next argument would overflow it. Arguments larger
/// than the buffer are streamed directly without ever being copied in full.
pub fn write_command<W, A>(stream: &mut W, args: &[A]) -> io::Result<()>
where
    W: Write + CorkHint,
    A: AsRef<[u8]>,
{
    let mut buf = Vec::with_capacity(MIN_CMD_BUF_SIZE);
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());

    stream.set_cork(true)?;

    for (i, arg) in args.iter().enumerate() {
        let arg = arg.as_ref();
        let header = format!("${}\r\n", arg.len());
        let needed = header.len() + arg.len() + CRLF.len();

        if buf.len() + needed > buf.capacity() && !buf.is_empty() {
            stream.write_all(&buf)?;
            buf.clear();
        }

        if needed > buf.capacity() {
            // Argument alone would not fit the command buffer: flush what
            // we have and stream header+body+CRLF directly.
            if !buf.is_empty() {
                stream.write_all(&buf)?;
                buf.clear();
            }
            let last = i == args.len() - 1;
            if last {
                stream.set_cork(false)?;
            }
            stream.write_all(header.as_bytes())?;
            stream.write_all(arg)?;
            stream.write_all(CRLF)?;
            continue;
        }

        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(arg);
        buf.extend_from_slice(CRLF);
    }

    stream.set_cork(false)?;
    if !buf.is_empty() {
        stream.write_all(&buf)?;
    }
    stream.flush()
}

/// Reads one `\r\n`-terminated token (tag byte + payload), not including the
/// terminator.
fn read_token(reader: &mut impl BufRead) -> ClientResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(MIN_LINE_BUF_SIZE);
    let n = reader.read_until(b'\n', &mut buf).map_err(ClientError::from_transfer_io)?;
    if n == 0 {
        return Err(ClientError::new(
            ClientErrorKind::NoService,
            "connection closed before a full frame was received",
        ));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(ClientError::new(
            ClientErrorKind::IncompleteTransfer,
            "frame is missing its CRLF terminator",
        ));
    }
    buf.truncate(buf.len() - 2);
    Ok(buf)
}

fn parse_i64(bytes: &[u8]) -> ClientResult<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ClientError::new(ClientErrorKind::ParseError, "invalid integer size or value"))
}

fn parse_f64(bytes: &[u8]) -> ClientResult<f64> {
    match bytes {
        b"inf" | b"+inf" => Ok(f64::INFINITY),
        b"-inf" => Ok(f64::NEG_INFINITY),
        b"nan" => Ok(f64::NAN),
        other => std::str::from_utf8(other)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| ClientError::new(ClientErrorKind::ParseError, "invalid double value")),
    }
}

fn read_exact_body(reader: &mut impl BufRead, n: usize) -> ClientResult<Vec<u8>> {
    let mut body = vec![0u8; n];
    reader.read_exact(&mut body).map_err(ClientError::from_transfer_io)?;
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).map_err(ClientError::from_transfer_io)?;
    if crlf != *b"\r\n" {
        return Err(ClientError::new(
            ClientErrorKind::IncompleteTransfer,
            "bulk payload is missing its CRLF terminator",
        ));
    }
    Ok(body)
}

/// Reads and fully assembles one frame, including recursively reading
/// aggregate children and consolidating streamed (`?`-sized) aggregates.
///
/// This is the only entry point consumers need; it returns the frame
/// exactly as received, including `Push` and `Attribute` frames — the
/// caller (the connection layer) is responsible for dispatching those
/// out-of-band per §4.B step 5.
pub fn read_frame(reader: &mut impl BufRead) -> ClientResult<Value> {
    let line = read_token(reader)?;
    let (&tag, rest) = line.split_first().ok_or_else(|| {
        ClientError::new(ClientErrorKind::ParseError, "empty frame header")
    })?;
    parse_body(reader, tag, rest)
}

fn parse_body(reader: &mut impl BufRead, tag: u8, rest: &[u8]) -> ClientResult<Value> {
    match tag {
        INTEGER => Ok(Value::Integer(parse_i64(rest)?)),
        DOUBLE => Ok(Value::Double(parse_f64(rest)?)),
        BOOLEAN => match rest {
            b"t" => Ok(Value::Boolean(true)),
            b"f" => Ok(Value::Boolean(false)),
            _ => Err(ClientError::new(ClientErrorKind::ParseError, "invalid boolean value")),
        },
        NULL => Ok(Value::Null),
        SIMPLE_STRING => Ok(Value::SimpleString(rest.to_vec())),
        ERROR => Ok(Value::Error(rest.to_vec())),
        BIG_NUMBER => Ok(Value::BigNumber(rest.to_vec())),
        BULK_STRING | VERBATIM_STRING | BLOB_ERROR => {
            let bytes = read_string_body(reader, rest)?;
            Ok(match tag {
                BULK_STRING => Value::BulkString(bytes),
                VERBATIM_STRING => Value::VerbatimString(bytes),
                _ => Value::BlobError(bytes),
            })
        }
        ARRAY | SET | PUSH => {
            let items = if rest == b"?" {
                parse_streamed_items(reader)?
            } else {
                let n = parse_i64(rest)?;
                parse_n_items(reader, n)?
            };
            Ok(match tag {
                ARRAY => Value::Array(items),
                SET => Value::Set(items),
                _ => Value::Push(items),
            })
        }
        MAP | ATTRIBUTE => {
            let items = if rest == b"?" {
                parse_streamed_items(reader)?
            } else {
                let n = parse_i64(rest)?;
                parse_n_items(reader, n.saturating_mul(2))?
            };
            let pairs = pair_up(items)?;
            Ok(match tag {
                MAP => Value::Map(pairs),
                _ => Value::Attribute(pairs),
            })
        }
        CONTINUED => Err(ClientError::new(
            ClientErrorKind::UnexpectedResp,
            "unexpected continuation marker outside of a streamed aggregate",
        )),
        other => Err(ClientError::new(
            ClientErrorKind::UnexpectedResp,
            format!("unknown RESP type tag '{}'", other as char),
        )),
    }
}

fn read_string_body(reader: &mut impl BufRead, rest: &[u8]) -> ClientResult<Vec<u8>> {
    if rest == b"?" {
        let mut out = Vec::new();
        loop {
            let line = read_token(reader)?;
            let (&chunk_tag, chunk_rest) = line.split_first().ok_or_else(|| {
                ClientError::new(ClientErrorKind::ParseError, "empty streamed chunk header")
            })?;
            if chunk_tag != CONTINUED {
                return Err(ClientError::new(
                    ClientErrorKind::UnexpectedResp,
                    "streamed string chunk missing its continuation marker",
                ));
            }
            let n = parse_i64(chunk_rest)?;
            if n < 0 {
                return Err(ClientError::new(ClientErrorKind::ParseError, "negative chunk size"));
            }
            if n == 0 {
                break;
            }
            out.extend(read_exact_body(reader, n as usize)?);
        }
        Ok(out)
    } else {
        let n = parse_i64(rest)?;
        if n < 0 {
            return Err(ClientError::new(ClientErrorKind::ParseError, "negative bulk length"));
        }
        read_exact_body(reader, n as usize)
    }
}

fn parse_n_items(reader: &mut impl BufRead, n: i64) -> ClientResult<Vec<Value>> {
    if n < 0 {
        return Err(ClientError::new(ClientErrorKind::ParseError, "negative aggregate size"));
    }
    let mut items = Vec::with_capacity(n as usize);
    for _ in 0..n {
        items.push(read_frame(reader)?);
    }
    Ok(items)
}

/// Reads elements of a streamed (`?`-sized) aggregate until a `;0`
/// terminator. A nonzero continuation marker `;N` declares that the `N`
/// frames immediately following belong to this chunk; those are read and
/// appended in order, just like elements that arrive with no marker at all.
fn parse_streamed_items(reader: &mut impl BufRead) -> ClientResult<Vec<Value>> {
    let mut items = Vec::new();
    loop {
        let line = read_token(reader)?;
        let (&tag, rest) = line.split_first().ok_or_else(|| {
            ClientError::new(ClientErrorKind::ParseError, "empty frame header")
        })?;
        if tag == CONTINUED {
            let n = parse_i64(rest)?;
            if n == 0 {
                break;
            }
            for _ in 0..n {
                items.push(read_frame(reader)?);
            }
        } else {
            items.push(parse_body(reader, tag, rest)?);
        }
    }
    Ok(items)
}

fn pair_up(items: Vec<Value>) -> ClientResult<Vec<(Value, Value)>> {
    if items.len() % 2 != 0 {
        return Err(ClientError::new(
            ClientErrorKind::UnexpectedArraySize,
            "map/attribute frame had an odd number of elements",
        ));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut it = items.into_iter();
    while let (Some(k), Some(v)) = (it.next(), it.next()) {
        pairs.push((k, v));
    }
    Ok(pairs)
}
