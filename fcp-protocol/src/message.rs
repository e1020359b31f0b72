//! FCP message representation and its wire form.
//!
//! A message is a header line, an ordered sequence of `key=value` fields
//! (duplicates allowed, wire order preserved), and an optional binary
//! payload. A message without payload is terminated by `EndMessage`; a
//! message with payload carries a `DataLength` field and is terminated by
//! `Data` followed by exactly that many bytes.

use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Field key that declares the payload length.
pub const DATA_LENGTH: &str = "DataLength";

/// Field key that correlates requests and responses.
pub const IDENTIFIER: &str = "Identifier";

/// A single FCP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    header: String,
    fields: Vec<(String, String)>,
    payload: Option<Bytes>,
}

impl Message {
    /// Creates a message with the given header and no fields.
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            fields: Vec::new(),
            payload: None,
        }
    }

    pub(crate) fn from_parts(
        header: String,
        fields: Vec<(String, String)>,
        payload: Option<Bytes>,
    ) -> Self {
        Self {
            header,
            fields,
            payload,
        }
    }

    /// The command or reply name, e.g. `ClientHello` or `PutSuccessful`.
    pub fn header(&self) -> &str {
        &self.header
    }

    /// Appends a field, keeping wire order.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    /// Builder form of [`set_field`](Self::set_field).
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_field(key, value);
        self
    }

    /// Returns the value of the first field with the given key.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All fields in wire order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// The `Identifier` field, if present.
    pub fn identifier(&self) -> Option<&str> {
        self.field(IDENTIFIER)
    }

    /// Attaches a payload and records its length in the `DataLength` field.
    ///
    /// Any previously set `DataLength` field is replaced.
    pub fn set_payload(&mut self, payload: impl Into<Bytes>) {
        let payload = payload.into();
        self.fields.retain(|(k, _)| k != DATA_LENGTH);
        self.fields
            .push((DATA_LENGTH.to_string(), payload.len().to_string()));
        self.payload = Some(payload);
    }

    /// Builder form of [`set_payload`](Self::set_payload).
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.set_payload(payload);
        self
    }

    /// The trailing payload, if any.
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// The declared `DataLength`, when present and a valid decimal.
    pub fn data_length(&self) -> Option<u64> {
        self.field(DATA_LENGTH).and_then(|v| v.parse().ok())
    }

    /// Serializes the message into its wire form.
    ///
    /// Fails if the header is empty, a field contains a newline, or the
    /// declared `DataLength` disagrees with the attached payload.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        if self.header.is_empty() {
            return Err(ProtocolError::EmptyHeader);
        }
        if self.header.contains('\n') {
            return Err(ProtocolError::FieldContainsNewline(self.header.clone()));
        }
        for (key, value) in &self.fields {
            if key.contains('\n') || value.contains('\n') {
                return Err(ProtocolError::FieldContainsNewline(format!("{key}={value}")));
            }
        }

        let payload_len = self.payload.as_ref().map(Bytes::len).unwrap_or(0);
        let mut buf = BytesMut::with_capacity(self.header.len() + 64 + payload_len);
        buf.put_slice(self.header.as_bytes());
        buf.put_u8(b'\n');
        for (key, value) in &self.fields {
            buf.put_slice(key.as_bytes());
            buf.put_u8(b'=');
            buf.put_slice(value.as_bytes());
            buf.put_u8(b'\n');
        }
        match &self.payload {
            Some(payload) => {
                let declared = self.data_length().ok_or(ProtocolError::MissingDataLength)?;
                if declared != payload.len() as u64 {
                    return Err(ProtocolError::PayloadLengthMismatch {
                        declared,
                        actual: payload.len(),
                    });
                }
                buf.put_slice(b"Data\n");
                buf.put_slice(payload);
            }
            None => buf.put_slice(b"EndMessage\n"),
        }
        Ok(buf)
    }
}

impl fmt::Display for Message {
    /// Header and fields only; payload bytes are elided.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.header)?;
        for (key, value) in &self.fields {
            write!(f, " {key}={value}")?;
        }
        if let Some(payload) = &self.payload {
            write!(f, " <{} payload bytes>", payload.len())?;
        }
        Ok(())
    }
}
