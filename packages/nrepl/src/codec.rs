//! Bencode framing for nREPL messages.
//!
//! A TCP stream carries bencode values back to back with no length header,
//! so [`read_frame`] walks the structure just far enough to find where one
//! value ends, copying its bytes as it goes. The complete frame is then
//! handed to `serde_bencode`. Frames are bounded in size and nesting depth,
//! and a string's declared length is checked against the remaining budget
//! before any of it is read.

use std::io::{self, BufRead, Read};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Deepest list and dictionary nesting accepted from a peer.
pub const MAX_DEPTH: usize = 64;

/// Longest integer or length prefix, including its terminator.
const MAX_NUMBER_LEN: u64 = 24;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("stream ended inside a message")]
    UnexpectedEof,

    #[error("unexpected byte {byte:#04x} in message")]
    UnexpectedByte { byte: u8 },

    #[error("invalid number {text:?}")]
    InvalidNumber { text: String },

    #[error("message exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("message nested deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_bencode::Error),
}

impl From<CodecError> for trench_client::Error {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Io(e) => trench_client::Error::Io(e),
            other => trench_client::Error::protocol(other.to_string()),
        }
    }
}

/// Serialize one message.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_bencode::to_bytes(msg)?)
}

/// Read and deserialize the next message. `Ok(None)` means the stream ended
/// cleanly between messages.
pub fn decode<T, R>(reader: &mut R) -> Result<Option<T>, CodecError>
where
    T: DeserializeOwned,
    R: BufRead,
{
    match read_frame(reader)? {
        Some(frame) => Ok(Some(serde_bencode::from_bytes(&frame)?)),
        None => Ok(None),
    }
}

/// Read the raw bytes of the next complete bencode value.
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>, CodecError> {
    let mut frame = Vec::new();
    let mut depth = 0usize;

    loop {
        let Some(byte) = next_byte(reader)? else {
            if frame.is_empty() {
                return Ok(None);
            }
            return Err(CodecError::UnexpectedEof);
        };
        frame.push(byte);

        match byte {
            b'd' | b'l' => {
                depth += 1;
                if depth > MAX_DEPTH {
                    return Err(CodecError::TooDeep { limit: MAX_DEPTH });
                }
            }
            b'e' if depth > 0 => depth -= 1,
            b'i' => {
                read_number(reader, &mut frame, b'e')?;
            }
            b'0'..=b'9' => {
                let len = read_number(reader, &mut frame, b':')?;
                let len = parse_len(byte, &len)?;
                if len > MAX_FRAME_LEN.saturating_sub(frame.len()) {
                    return Err(CodecError::FrameTooLarge {
                        limit: MAX_FRAME_LEN,
                    });
                }
                let copied = reader.by_ref().take(len as u64).read_to_end(&mut frame)?;
                if copied != len {
                    return Err(CodecError::UnexpectedEof);
                }
            }
            byte => return Err(CodecError::UnexpectedByte { byte }),
        }

        if frame.len() > MAX_FRAME_LEN {
            return Err(CodecError::FrameTooLarge {
                limit: MAX_FRAME_LEN,
            });
        }
        if depth == 0 {
            return Ok(Some(frame));
        }
    }
}

fn next_byte<R: BufRead>(reader: &mut R) -> io::Result<Option<u8>> {
    let byte = match reader.fill_buf()?.first() {
        Some(&byte) => byte,
        None => return Ok(None),
    };
    reader.consume(1);
    Ok(Some(byte))
}

/// Copy bytes up to and including `terminator` into `frame`, returning the
/// bytes before the terminator.
fn read_number<R: BufRead>(
    reader: &mut R,
    frame: &mut Vec<u8>,
    terminator: u8,
) -> Result<Vec<u8>, CodecError> {
    let mut text = Vec::new();
    reader
        .by_ref()
        .take(MAX_NUMBER_LEN)
        .read_until(terminator, &mut text)?;
    match text.pop() {
        Some(last) if last == terminator => {}
        Some(_) if text.len() + 1 >= MAX_NUMBER_LEN as usize => {
            return Err(CodecError::InvalidNumber {
                text: String::from_utf8_lossy(&text).into_owned(),
            })
        }
        _ => return Err(CodecError::UnexpectedEof),
    }
    frame.extend_from_slice(&text);
    frame.push(terminator);
    Ok(text)
}

/// The length prefix of a byte string whose first digit is `first`.
fn parse_len(first: u8, rest: &[u8]) -> Result<usize, CodecError> {
    let mut text = String::with_capacity(rest.len() + 1);
    text.push(first as char);
    text.push_str(&String::from_utf8_lossy(rest));
    text.parse()
        .map_err(|_| CodecError::InvalidNumber { text })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Request, Response};
    use std::io::Cursor;

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn test_request_encodes_kebab_case_keys_and_skips_unset_fields() {
        let request = Request {
            id: "7".into(),
            interrupt_id: Some("6".into()),
            ..Request::new("interrupt")
        };

        let bytes = encode(&request).unwrap();

        assert!(contains(&bytes, b"12:interrupt-id1:6"));
        assert!(contains(&bytes, b"2:op9:interrupt"));
        assert!(!contains(&bytes, b"session"));
        assert!(!contains(&bytes, b"code"));
    }

    #[test]
    fn test_response_ignores_unknown_keys() {
        let mut input = Cursor::new(
            b"d2:ex9:Throwable2:id1:35:value3:nil6:statusl10:eval-error4:doneee".to_vec(),
        );

        let response: Response = decode(&mut input).unwrap().unwrap();

        assert_eq!(response.id.as_deref(), Some("3"));
        assert_eq!(response.value.as_deref(), Some("nil"));
        assert!(response.is_done());
        assert!(response.has_status("eval-error"));
    }

    #[test]
    fn test_consecutive_messages_from_one_stream() {
        let mut stream = Cursor::new(b"d3:out3:hi\ned6:statusl4:doneee".to_vec());

        let first: Response = decode(&mut stream).unwrap().unwrap();
        let second: Response = decode(&mut stream).unwrap().unwrap();
        let end: Option<Response> = decode(&mut stream).unwrap();

        assert_eq!(first.out.as_deref(), Some("hi\n"));
        assert!(second.is_done());
        assert!(end.is_none());
    }

    #[test]
    fn test_truncated_message_is_an_error() {
        let mut input = Cursor::new(b"d3:out5:hi".to_vec());

        let err = read_frame(&mut input).unwrap_err();

        assert!(matches!(err, CodecError::UnexpectedEof));
    }

    #[test]
    fn test_oversized_length_prefix_is_rejected_before_reading() {
        let mut input = Cursor::new(b"99999999999999999:x".to_vec());

        let err = read_frame(&mut input).unwrap_err();

        assert!(matches!(err, CodecError::FrameTooLarge { .. }));
    }

    #[test]
    fn test_length_prefix_overflowing_usize_is_invalid() {
        let mut input = Cursor::new(b"99999999999999999999999:x".to_vec());

        let err = read_frame(&mut input).unwrap_err();

        assert!(matches!(err, CodecError::InvalidNumber { .. }));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let mut input = Cursor::new(vec![b'l'; MAX_DEPTH + 1]);

        let err = read_frame(&mut input).unwrap_err();

        assert!(matches!(err, CodecError::TooDeep { .. }));
    }

    #[test]
    fn test_garbage_byte_is_rejected() {
        let mut input = Cursor::new(b"HTTP/1.1 200 OK\r\n".to_vec());

        let err = read_frame(&mut input).unwrap_err();

        assert!(matches!(err, CodecError::UnexpectedByte { byte: b'H' }));
    }

    #[test]
    fn test_frame_that_is_not_a_message_is_malformed() {
        let mut input = Cursor::new(b"li1ei2ee".to_vec());

        let err = decode::<Response, _>(&mut input).unwrap_err();

        assert!(matches!(err, CodecError::Malformed(_)));
    }
}
