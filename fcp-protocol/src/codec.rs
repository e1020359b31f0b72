//! Encoder and decoder for the line-oriented FCP framing.

use crate::error::ProtocolError;
use crate::message::{Message, DATA_LENGTH};
use bytes::{Buf, Bytes, BytesMut};

/// Encodes messages into their wire form.
pub struct Encoder;

impl Encoder {
    /// Serializes a message, validating its framing invariants.
    pub fn encode(message: &Message) -> Result<BytesMut, ProtocolError> {
        message.encode()
    }
}

/// Incremental decoder over an accumulation buffer.
///
/// Feed socket reads in with [`extend`](Self::extend) and call
/// [`decode`](Self::decode) until it returns `Ok(None)`. Nothing is consumed
/// from the buffer until a complete message, including any payload bytes, is
/// available.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Attempts to decode the next message from the buffer.
    ///
    /// Lines are `\n`-terminated; a `\r` before the `\n` is tolerated. Both
    /// `End` and `EndMessage` close a payload-less message (the node emits
    /// the short form in list contexts). A `Data` terminator consumes exactly
    /// `DataLength` payload bytes.
    pub fn decode(&mut self) -> Result<Option<Message>, ProtocolError> {
        // the header line first; the terminator branches below are only
        // reachable with it bound
        let Some((header, mut pos)) = next_line(&self.buffer, 0)? else {
            return Ok(None);
        };
        if header.is_empty() {
            return Err(ProtocolError::EmptyHeader);
        }

        let mut fields: Vec<(String, String)> = Vec::new();
        loop {
            let Some((line, next)) = next_line(&self.buffer, pos)? else {
                return Ok(None);
            };
            if line == "End" || line == "EndMessage" {
                let message = Message::from_parts(header, fields, None);
                self.buffer.advance(next);
                return Ok(Some(message));
            }
            if line == "Data" {
                let declared = fields
                    .iter()
                    .find(|(k, _)| k == DATA_LENGTH)
                    .map(|(_, v)| v.clone())
                    .ok_or(ProtocolError::MissingDataLength)?;
                let len: usize = declared
                    .parse()
                    .map_err(|_| ProtocolError::InvalidDataLength(declared))?;
                if self.buffer.len() < next + len {
                    return Ok(None);
                }
                self.buffer.advance(next);
                let payload: Bytes = self.buffer.split_to(len).freeze();
                let message = Message::from_parts(header, fields, Some(payload));
                return Ok(Some(message));
            }
            match line.split_once('=') {
                Some((key, value)) => fields.push((key.to_string(), value.to_string())),
                None => return Err(ProtocolError::MalformedField(line)),
            }
            pos = next;
        }
    }
}

/// Extracts the `\n`-terminated line starting at `start`, stripping an
/// optional `\r`. Returns the line and the offset just past its terminator,
/// or `None` when the line is still incomplete.
fn next_line(buf: &[u8], start: usize) -> Result<Option<(String, usize)>, ProtocolError> {
    let rest = &buf[start..];
    let Some(nl) = rest.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    let mut line = &rest[..nl];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    let line = std::str::from_utf8(line)
        .map_err(|_| ProtocolError::InvalidUtf8)?
        .to_string();
    Ok(Some((line, start + nl + 1)))
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(wire: &[u8]) -> Vec<Message> {
        let mut decoder = Decoder::new();
        decoder.extend(wire);
        let mut out = Vec::new();
        while let Some(m) = decoder.decode().unwrap() {
            out.push(m);
        }
        assert_eq!(decoder.buffered(), 0);
        out
    }

    #[test]
    fn test_decode_simple_message() {
        let msgs = decode_all(b"NodeHello\nFCPVersion=2.0\nNode=Fred\nEndMessage\n");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].header(), "NodeHello");
        assert_eq!(msgs[0].field("FCPVersion"), Some("2.0"));
        assert_eq!(msgs[0].field("Node"), Some("Fred"));
        assert!(msgs[0].payload().is_none());
    }

    #[test]
    fn test_decode_short_end_terminator() {
        let msgs = decode_all(b"Peer\nNodeIdentifier=x\nEnd\n");
        assert_eq!(msgs[0].header(), "Peer");
        assert_eq!(msgs[0].field("NodeIdentifier"), Some("x"));
    }

    #[test]
    fn test_decode_tolerates_crlf() {
        let msgs = decode_all(b"NodeHello\r\nFCPVersion=2.0\r\nEndMessage\r\n");
        assert_eq!(msgs[0].field("FCPVersion"), Some("2.0"));
    }

    #[test]
    fn test_decode_payload() {
        let msgs = decode_all(b"AllData\nIdentifier=get1\nDataLength=5\nData\nhello");
        assert_eq!(msgs[0].header(), "AllData");
        assert_eq!(msgs[0].payload().unwrap().as_ref(), b"hello");
    }

    #[test]
    fn test_partial_input_returns_none() {
        let mut decoder = Decoder::new();
        decoder.extend(b"NodeHello\nFCPVer");
        assert!(decoder.decode().unwrap().is_none());
        decoder.extend(b"sion=2.0\nEndMessage\n");
        let m = decoder.decode().unwrap().unwrap();
        assert_eq!(m.field("FCPVersion"), Some("2.0"));
    }

    #[test]
    fn test_payload_split_across_feeds() {
        let mut decoder = Decoder::new();
        decoder.extend(b"AllData\nDataLength=5\nData\nhel");
        assert!(decoder.decode().unwrap().is_none());
        decoder.extend(b"lo");
        let m = decoder.decode().unwrap().unwrap();
        assert_eq!(m.payload().unwrap().as_ref(), b"hello");
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_messages_in_buffer() {
        let msgs = decode_all(b"Peer\nNodeIdentifier=a\nEnd\nPeer\nNodeIdentifier=b\nEnd\nEndListPeers\nEndMessage\n");
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].field("NodeIdentifier"), Some("a"));
        assert_eq!(msgs[1].field("NodeIdentifier"), Some("b"));
        assert_eq!(msgs[2].header(), "EndListPeers");
    }

    #[test]
    fn test_missing_data_length_is_malformed() {
        let mut decoder = Decoder::new();
        decoder.extend(b"AllData\nIdentifier=get1\nData\nhello");
        assert!(matches!(
            decoder.decode(),
            Err(ProtocolError::MissingDataLength)
        ));
    }

    #[test]
    fn test_garbage_data_length_is_malformed() {
        let mut decoder = Decoder::new();
        decoder.extend(b"AllData\nDataLength=lots\nData\nhello");
        assert!(matches!(
            decoder.decode(),
            Err(ProtocolError::InvalidDataLength(_))
        ));
    }

    #[test]
    fn test_field_line_without_equals_is_malformed() {
        let mut decoder = Decoder::new();
        decoder.extend(b"NodeHello\nFCPVersion\nEndMessage\n");
        assert!(matches!(
            decoder.decode(),
            Err(ProtocolError::MalformedField(_))
        ));
    }

    #[test]
    fn test_roundtrip_without_payload() {
        let m = Message::new("GetConfig")
            .with_field("WithCurrent", "true")
            .with_field("WithDefault", "true");
        let wire = Encoder::encode(&m).unwrap();
        let decoded = decode_all(&wire);
        assert_eq!(decoded[0], m);
    }

    #[test]
    fn test_roundtrip_with_payload() {
        let m = Message::new("ClientPut")
            .with_field("URI", "CHK@")
            .with_field("Identifier", "p1")
            .with_payload(&b"\x00\x01\x02binary\nbytes"[..]);
        let wire = Encoder::encode(&m).unwrap();
        let decoded = decode_all(&wire);
        assert_eq!(decoded[0], m);
    }
}
