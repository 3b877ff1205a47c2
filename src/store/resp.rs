//! RESP2 values, parser and encoder.
//!
//! The parser is incremental: `Ok(None)` means the buffer does not yet hold
//! a complete frame and more bytes should be read. Frames past the limits
//! below are refused before they are buffered.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::Reply;

/// Largest bulk string accepted, as Redis' default `proto-max-bulk-len`.
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Largest element count of one array.
pub const MAX_ARRAY_LEN: i64 = 1024 * 1024;
/// Deepest array nesting accepted.
pub const MAX_DEPTH: usize = 32;
/// Longest header or simple line; Redis caps inline requests the same way.
pub const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Option<Vec<u8>>),
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn nil() -> Self {
        RespValue::BulkString(None)
    }

    pub fn err(message: impl Into<String>) -> Self {
        RespValue::Error(message.into())
    }

    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    /// Command frame: array of bulk strings.
    pub fn command<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Vec<u8>>,
    {
        RespValue::Array(Some(args.into_iter().map(RespValue::bulk).collect()))
    }
}

impl From<RespValue> for Reply {
    fn from(value: RespValue) -> Self {
        match value {
            RespValue::SimpleString(s) if s == "OK" => Reply::Ok,
            RespValue::SimpleString(s) => Reply::Bulk(s.into_bytes()),
            RespValue::Error(e) => Reply::Error(e),
            RespValue::Integer(i) => Reply::Int(i),
            RespValue::BulkString(None) | RespValue::Array(None) => Reply::Nil,
            RespValue::BulkString(Some(b)) => Reply::Bulk(b),
            RespValue::Array(Some(items)) => {
                Reply::Array(items.into_iter().map(Reply::from).collect())
            }
        }
    }
}

impl From<Reply> for RespValue {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Nil => RespValue::nil(),
            Reply::Ok => RespValue::ok(),
            Reply::Int(i) => RespValue::Integer(i),
            Reply::Bulk(b) => RespValue::BulkString(Some(b)),
            Reply::Array(items) => {
                RespValue::Array(Some(items.into_iter().map(RespValue::from).collect()))
            }
            Reply::Error(e) => RespValue::Error(e),
        }
    }
}

pub struct RespParser;

impl RespParser {
    /// Parse one frame from the start of `input`, returning it with the
    /// number of bytes consumed.
    pub fn parse(input: &[u8]) -> Result<Option<(RespValue, usize)>, String> {
        Self::parse_at(input, 0)
    }

    fn parse_at(input: &[u8], depth: usize) -> Result<Option<(RespValue, usize)>, String> {
        if input.is_empty() {
            return Ok(None);
        }

        match input[0] {
            b'+' => Ok(Self::parse_line(input)?
                .map(|(line, n)| (RespValue::SimpleString(line), n))),
            b'-' => Ok(Self::parse_line(input)?.map(|(line, n)| (RespValue::Error(line), n))),
            b':' => match Self::parse_line(input)? {
                Some((line, n)) => {
                    let i = line
                        .parse::<i64>()
                        .map_err(|e| format!("invalid integer {:?}: {}", line, e))?;
                    Ok(Some((RespValue::Integer(i), n)))
                }
                None => Ok(None),
            },
            b'$' => Self::parse_bulk_string(input),
            b'*' => Self::parse_array(input, depth),
            other => Err(format!("Unknown RESP type: {}", other as char)),
        }
    }

    fn parse_line(input: &[u8]) -> Result<Option<(String, usize)>, String> {
        match Self::find_crlf(input) {
            Some(pos) => {
                let line = std::str::from_utf8(&input[1..pos])
                    .map_err(|e| e.to_string())?
                    .to_string();
                Ok(Some((line, pos + 2)))
            }
            None if input.len() > MAX_LINE_LEN => {
                Err(format!("line longer than {} bytes", MAX_LINE_LEN))
            }
            None => Ok(None),
        }
    }

    fn parse_length(input: &[u8]) -> Result<Option<(i64, usize)>, String> {
        match Self::parse_line(input)? {
            Some((line, n)) => {
                let len = line
                    .parse::<i64>()
                    .map_err(|e| format!("invalid length {:?}: {}", line, e))?;
                if len < -1 {
                    return Err(format!("invalid length {}", len));
                }
                Ok(Some((len, n)))
            }
            None => Ok(None),
        }
    }

    fn parse_bulk_string(input: &[u8]) -> Result<Option<(RespValue, usize)>, String> {
        let Some((len, header)) = Self::parse_length(input)? else {
            return Ok(None);
        };
        if len == -1 {
            return Ok(Some((RespValue::BulkString(None), header)));
        }
        if len > MAX_BULK_LEN {
            return Err(format!("bulk length {} exceeds {}", len, MAX_BULK_LEN));
        }

        let end = header + len as usize;
        if end + 2 > input.len() {
            return Ok(None);
        }
        if &input[end..end + 2] != b"\r\n" {
            return Err("bulk string not terminated by CRLF".to_string());
        }
        let data = input[header..end].to_vec();
        Ok(Some((RespValue::BulkString(Some(data)), end + 2)))
    }

    fn parse_array(input: &[u8], depth: usize) -> Result<Option<(RespValue, usize)>, String> {
        if depth >= MAX_DEPTH {
            return Err(format!("arrays nested deeper than {}", MAX_DEPTH));
        }
        let Some((len, header)) = Self::parse_length(input)? else {
            return Ok(None);
        };
        if len == -1 {
            return Ok(Some((RespValue::Array(None), header)));
        }
        if len > MAX_ARRAY_LEN {
            return Err(format!("array length {} exceeds {}", len, MAX_ARRAY_LEN));
        }

        let mut elements = Vec::with_capacity((len as usize).min(1024));
        let mut offset = header;
        for _ in 0..len {
            match Self::parse_at(&input[offset..], depth + 1)? {
                Some((value, consumed)) => {
                    elements.push(value);
                    offset += consumed;
                }
                None => return Ok(None),
            }
        }
        Ok(Some((RespValue::Array(Some(elements)), offset)))
    }

    fn find_crlf(input: &[u8]) -> Option<usize> {
        let mut from = 0;
        while let Some(pos) = memchr::memchr(b'\r', &input[from..]) {
            let pos = from + pos;
            if input.get(pos + 1) == Some(&b'\n') {
                return Some(pos);
            }
            from = pos + 1;
        }
        None
    }

    pub fn encode(value: &RespValue) -> Vec<u8> {
        let mut out = Vec::new();
        Self::encode_into(value, &mut out);
        out
    }

    pub fn encode_into(value: &RespValue, out: &mut Vec<u8>) {
        match value {
            RespValue::SimpleString(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(n) => out.extend_from_slice(format!(":{}\r\n", n).as_bytes()),
            RespValue::BulkString(None) => out.extend_from_slice(b"$-1\r\n"),
            RespValue::BulkString(Some(data)) => {
                out.extend_from_slice(format!("${}\r\n", data.len()).as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            RespValue::Array(Some(elements)) => {
                out.extend_from_slice(format!("*{}\r\n", elements.len()).as_bytes());
                for element in elements {
                    Self::encode_into(element, out);
                }
            }
        }
    }
}

/// Frame codec for the server side of a connection.
#[derive(Debug, Default)]
pub struct RespCodec;

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RespValue>, Self::Error> {
        match RespParser::parse(src) {
            Ok(Some((value, consumed))) => {
                src.advance(consumed);
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        }
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: RespValue, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&RespParser::encode(&item));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_types() {
        assert_eq!(
            RespParser::parse(b"+OK\r\n").unwrap(),
            Some((RespValue::ok(), 5))
        );
        assert_eq!(
            RespParser::parse(b"-ERR bad\r\n").unwrap(),
            Some((RespValue::err("ERR bad"), 10))
        );
        assert_eq!(
            RespParser::parse(b":-12\r\n").unwrap(),
            Some((RespValue::Integer(-12), 6))
        );
        assert_eq!(
            RespParser::parse(b"$-1\r\n").unwrap(),
            Some((RespValue::nil(), 5))
        );
    }

    #[test]
    fn test_parse_incomplete() {
        assert_eq!(RespParser::parse(b"").unwrap(), None);
        assert_eq!(RespParser::parse(b"+OK").unwrap(), None);
        assert_eq!(RespParser::parse(b"$5\r\nhel").unwrap(), None);
        assert_eq!(RespParser::parse(b"*2\r\n$1\r\na\r\n").unwrap(), None);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(RespParser::parse(b"?x\r\n").is_err());
        assert!(RespParser::parse(b":abc\r\n").is_err());
        assert!(RespParser::parse(b"$2\r\nabcd\r\n").is_err());
    }

    #[test]
    fn test_oversized_lengths_refused_before_buffering() {
        // Header alone, no payload yet: must fail now, not wait for 1 GB
        let err = RespParser::parse(b"$1073741824\r\n").unwrap_err();
        assert!(err.contains("bulk length"), "{}", err);
        assert!(RespParser::parse(b"*2000000\r\n").is_err());

        let at_limit = format!("${}\r\n", MAX_BULK_LEN);
        assert_eq!(RespParser::parse(at_limit.as_bytes()).unwrap(), None);
    }

    #[test]
    fn test_nesting_depth_is_capped() {
        let nested = |depth: usize| {
            let mut frame = b"*1\r\n".repeat(depth);
            frame.extend_from_slice(b":1\r\n");
            frame
        };
        let ok = nested(MAX_DEPTH);
        assert_eq!(RespParser::parse(&ok).unwrap().map(|(_, n)| n), Some(ok.len()));

        let err = RespParser::parse(&nested(MAX_DEPTH + 1)).unwrap_err();
        assert!(err.contains("nested"), "{}", err);
        // Far past the cap stays an error rather than a stack overflow
        assert!(RespParser::parse(&nested(100_000)).is_err());
    }

    #[test]
    fn test_unterminated_line_is_capped() {
        let mut line = vec![b'+'];
        line.extend(std::iter::repeat(b'a').take(MAX_LINE_LEN));
        assert!(RespParser::parse(&line[..MAX_LINE_LEN]).unwrap().is_none());
        assert!(RespParser::parse(&line).is_err());
    }

    #[test]
    fn test_bulk_with_embedded_crlf() {
        let frame = RespParser::encode(&RespValue::bulk(&b"a\r\nb"[..]));
        assert_eq!(frame, b"$4\r\na\r\nb\r\n");
        assert_eq!(
            RespParser::parse(&frame).unwrap(),
            Some((RespValue::bulk(&b"a\r\nb"[..]), frame.len()))
        );
    }

    #[test]
    fn test_command_frame() {
        let cmd = RespValue::command(["SET", "k", "v"]);
        assert_eq!(
            RespParser::encode(&cmd),
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n"
        );
    }

    #[test]
    fn test_reply_conversion() {
        assert_eq!(Reply::from(RespValue::ok()), Reply::Ok);
        assert_eq!(Reply::from(RespValue::Array(None)), Reply::Nil);
        assert_eq!(
            Reply::from(RespValue::Array(Some(vec![RespValue::Integer(1)]))),
            Reply::Array(vec![Reply::Int(1)])
        );
    }

    #[test]
    fn test_codec_decodes_pipelined_frames() {
        let mut codec = RespCodec;
        let mut buf = BytesMut::from(&b"+A\r\n+B\r\n+C"[..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(RespValue::SimpleString("A".into()))
        );
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(RespValue::SimpleString("B".into()))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"+C");
    }
}
