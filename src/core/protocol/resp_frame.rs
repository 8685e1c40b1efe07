// src/core/protocol/resp_frame.rs

//! Implements the RESP (REdis Serialization Protocol) frame structure and the
//! corresponding `Encoder` and `Decoder` used to talk to the backing store.

use crate::core::GeoCacheError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF sequence used to terminate lines in RESP.
const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Limits on what a store reply may claim, so a corrupt stream cannot make us
// allocate unbounded memory or recurse without end.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024;
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024;
const MAX_RECURSION_DEPTH: usize = 32;

/// A single frame in the RESP protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    Null,
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Builds a command frame (an array of bulk strings) from its arguments.
    pub fn command<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Bytes>,
    {
        RespFrame::Array(
            args.into_iter()
                .map(|arg| RespFrame::BulkString(arg.into()))
                .collect(),
        )
    }

    /// Returns the textual payload of a simple or bulk string frame.
    pub fn into_text(self) -> Result<Option<String>, GeoCacheError> {
        match self {
            RespFrame::SimpleString(s) => Ok(Some(s)),
            RespFrame::BulkString(b) => Ok(Some(String::from_utf8(b.to_vec())?)),
            RespFrame::Null => Ok(None),
            RespFrame::Error(e) => Err(GeoCacheError::StoreReply(e)),
            other => Err(GeoCacheError::Protocol(format!(
                "expected a string reply, got {other:?}"
            ))),
        }
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespFrame`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespFrameCodec;

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = GeoCacheError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            RespFrame::SimpleString(s) => write_line(dst, b'+', s.as_bytes()),
            RespFrame::Error(s) => write_line(dst, b'-', s.as_bytes()),
            RespFrame::Integer(i) => write_line(dst, b':', i.to_string().as_bytes()),
            RespFrame::BulkString(b) => {
                write_line(dst, b'$', b.len().to_string().as_bytes());
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => dst.extend_from_slice(b"$-1\r\n"),
            RespFrame::NullArray => dst.extend_from_slice(b"*-1\r\n"),
            RespFrame::Array(arr) => {
                write_line(dst, b'*', arr.len().to_string().as_bytes());
                for frame in arr {
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

fn write_line(dst: &mut BytesMut, prefix: u8, body: &[u8]) {
    dst.reserve(body.len() + 3);
    dst.extend_from_slice(&[prefix]);
    dst.extend_from_slice(body);
    dst.extend_from_slice(CRLF);
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = GeoCacheError;

    /// Decodes one frame, leaving `src` untouched when the frame is not complete yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut cursor = &src[..];
        match decode_frame(&mut cursor, 0) {
            Ok(frame) => {
                let consumed = src.len() - cursor.len();
                src.advance(consumed);
                Ok(Some(frame))
            }
            Err(GeoCacheError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn decode_frame(bytes: &mut &[u8], depth: usize) -> Result<RespFrame, GeoCacheError> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(GeoCacheError::Protocol(
            "RESP recursion depth limit exceeded".to_string(),
        ));
    }
    let Some((&prefix, rest)) = bytes.split_first() else {
        return Err(GeoCacheError::IncompleteData);
    };
    *bytes = rest;

    match prefix {
        b'+' => Ok(RespFrame::SimpleString(lossy(take_line(bytes)?))),
        b'-' => Ok(RespFrame::Error(lossy(take_line(bytes)?))),
        b':' => Ok(RespFrame::Integer(parse_number(take_line(bytes)?)?)),
        b'$' => {
            let len = parse_number(take_line(bytes)?)?;
            if len == -1 {
                return Ok(RespFrame::Null);
            }
            let len = checked_len(len, MAX_BULK_STRING_SIZE)?;
            if bytes.len() < len + CRLF_LEN {
                return Err(GeoCacheError::IncompleteData);
            }
            if &bytes[len..len + CRLF_LEN] != CRLF {
                return Err(GeoCacheError::SyntaxError);
            }
            let data = Bytes::copy_from_slice(&bytes[..len]);
            *bytes = &bytes[len + CRLF_LEN..];
            Ok(RespFrame::BulkString(data))
        }
        b'*' => {
            let len = parse_number(take_line(bytes)?)?;
            if len == -1 {
                return Ok(RespFrame::NullArray);
            }
            let len = checked_len(len, MAX_FRAME_ELEMENTS)?;
            let mut frames = Vec::with_capacity(len.min(64));
            for _ in 0..len {
                frames.push(decode_frame(bytes, depth + 1)?);
            }
            Ok(RespFrame::Array(frames))
        }
        _ => Err(GeoCacheError::SyntaxError),
    }
}

/// Splits off the next CRLF-terminated line, advancing past the terminator.
fn take_line<'a>(bytes: &mut &'a [u8]) -> Result<&'a [u8], GeoCacheError> {
    let pos = bytes
        .windows(CRLF_LEN)
        .position(|window| window == CRLF)
        .ok_or(GeoCacheError::IncompleteData)?;
    let line = &bytes[..pos];
    *bytes = &bytes[pos + CRLF_LEN..];
    Ok(line)
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).into_owned()
}

fn parse_number(line: &[u8]) -> Result<i64, GeoCacheError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(GeoCacheError::SyntaxError)
}

fn checked_len(len: i64, max: usize) -> Result<usize, GeoCacheError> {
    usize::try_from(len)
        .ok()
        .filter(|len| *len <= max)
        .ok_or(GeoCacheError::SyntaxError)
}
