//! Framing for the in-process server
//!
//! Requests arrive as arrays of bulk strings and decode into [`Cmd`]s; replies
//! are written as RESP2 values.

use bytes::{Buf, BufMut, BytesMut};
use redrate::{Cmd, Value};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

const MAX_ARGS: usize = 1024 * 1024;
const MAX_ARG_LEN: usize = 512 * 1024 * 1024;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

#[derive(Debug, Default)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = Cmd;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<Cmd>> {
        // An incomplete request is scanned again from its first byte on the
        // next read; test batches are small enough for that to stay cheap.
        let Some((count, mut pos)) = header(src, 0, b'*', MAX_ARGS)? else {
            return Ok(None);
        };
        if count == 0 {
            return Err(invalid("empty command"));
        }

        let mut args = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let Some((len, start)) = header(src, pos, b'$', MAX_ARG_LEN)? else {
                return Ok(None);
            };
            let end = start + len;
            if src.len() < end + 2 {
                return Ok(None);
            }
            if &src[end..end + 2] != b"\r\n" {
                return Err(invalid("bulk string not terminated by CRLF"));
            }
            let arg = std::str::from_utf8(&src[start..end])
                .map_err(|e| invalid(format!("argument is not UTF-8: {e}")))?;
            args.push(arg.to_string());
            pos = end + 2;
        }

        src.advance(pos);
        Ok(Some(Cmd::from_args(args)))
    }
}

/// `<marker><n>\r\n` starting at `at`: the length and the offset past the line
fn header(src: &[u8], at: usize, marker: u8, max: usize) -> io::Result<Option<(usize, usize)>> {
    let rest = &src[at..];
    match rest.first() {
        None => return Ok(None),
        Some(&b) if b != marker => {
            return Err(invalid(format!(
                "expected {:?}, got {:?}",
                marker as char, b as char
            )));
        }
        Some(_) => {}
    }
    let Some(end) = rest.windows(2).position(|w| w == b"\r\n") else {
        return Ok(None);
    };
    let n = std::str::from_utf8(&rest[1..end])
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n <= max)
        .ok_or_else(|| invalid("invalid length"))?;
    Ok(Some((n, at + end + 2)))
}

impl Encoder<Value> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, value: Value, dst: &mut BytesMut) -> io::Result<()> {
        put_value(&value, dst);
        Ok(())
    }
}

fn put_value(value: &Value, dst: &mut BytesMut) {
    match value {
        Value::Nil => dst.put_slice(b"$-1\r\n"),
        Value::Int(n) => put_line(dst, b':', &n.to_string()),
        Value::Status(s) => put_line(dst, b'+', s),
        Value::Error(s) => put_line(dst, b'-', s),
        Value::Data(s) => {
            put_line(dst, b'$', &s.len().to_string());
            dst.put_slice(s.as_bytes());
            dst.put_slice(b"\r\n");
        }
        Value::Array(items) => {
            put_line(dst, b'*', &items.len().to_string());
            for item in items {
                put_value(item, dst);
            }
        }
    }
}

fn put_line(dst: &mut BytesMut, marker: u8, line: &str) {
    dst.put_u8(marker);
    dst.put_slice(line.as_bytes());
    dst.put_slice(b"\r\n");
}
