//! Packet stream framing
//!
//! The RPC layer above a box stream exchanges packets with a 9-byte header:
//!
//! ```text
//! flags:u8 ‖ length:u32be ‖ request:i32be
//! flags = stream << 3 | end_or_error << 2 | body_type
//! ```
//!
//! Requests carry a positive request number; responses carry the negated
//! number of the request they answer. A header of nine zero bytes ends the
//! packet stream.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

use crate::box_stream::{BoxStream, BoxStreamReader, BoxStreamWriter};
use crate::error::{BoxStreamError, PacketError};
use crate::identity::FeedId;

pub const HEADER_LEN: usize = 9;
/// Bodies above this size are refused before any of them is read
pub const MAX_BODY_LEN: u32 = 8 * 1024 * 1024;

const GOODBYE: [u8; HEADER_LEN] = [0u8; HEADER_LEN];
const FLAG_STREAM: u8 = 0b1000;
const FLAG_END_OR_ERROR: u8 = 0b0100;
const BODY_TYPE_MASK: u8 = 0b0011;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BodyType {
    Binary = 0,
    Utf8 = 1,
    Json = 2,
}

impl TryFrom<u8> for BodyType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BodyType::Binary),
            1 => Ok(BodyType::Utf8),
            2 => Ok(BodyType::Json),
            other => Err(PacketError::UnknownBodyType(other)),
        }
    }
}

/// Decoded packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub stream: bool,
    pub end_or_error: bool,
    pub body_type: BodyType,
    pub body_len: u32,
    pub request: i32,
}

impl Header {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut flags = self.body_type as u8;
        if self.stream {
            flags |= FLAG_STREAM;
        }
        if self.end_or_error {
            flags |= FLAG_END_OR_ERROR;
        }

        let mut out = [0u8; HEADER_LEN];
        out[0] = flags;
        out[1..5].copy_from_slice(&self.body_len.to_be_bytes());
        out[5..].copy_from_slice(&self.request.to_be_bytes());
        out
    }

    /// Parse a header; `None` for the goodbye header
    pub fn parse(bytes: &[u8; HEADER_LEN]) -> Result<Option<Self>, PacketError> {
        if *bytes == GOODBYE {
            return Ok(None);
        }

        let flags = bytes[0];
        let body_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let request = i32::from_be_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        if body_len > MAX_BODY_LEN {
            return Err(PacketError::BodyTooLarge(body_len));
        }

        Ok(Some(Self {
            stream: flags & FLAG_STREAM != 0,
            end_or_error: flags & FLAG_END_OR_ERROR != 0,
            body_type: BodyType::try_from(flags & BODY_TYPE_MASK)?,
            body_len,
            request,
        }))
    }
}

/// One packet: flags, request number and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub stream: bool,
    pub end_or_error: bool,
    pub body_type: BodyType,
    pub request: i32,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(request: i32, body_type: BodyType, body: Vec<u8>) -> Self {
        Self {
            stream: false,
            end_or_error: false,
            body_type,
            request,
            body,
        }
    }

    /// A JSON packet with `value` serialized compactly
    pub fn json<T: Serialize>(request: i32, value: &T) -> Result<Self, PacketError> {
        let body = serde_json::to_vec(value).map_err(|e| PacketError::InvalidBody(e.to_string()))?;
        Ok(Self::new(request, BodyType::Json, body))
    }

    pub fn text(request: i32, text: &str) -> Self {
        Self::new(request, BodyType::Utf8, text.as_bytes().to_vec())
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_end_or_error(mut self, end_or_error: bool) -> Self {
        self.end_or_error = end_or_error;
        self
    }

    /// Whether this answers a request we sent
    pub fn is_response(&self) -> bool {
        self.request < 0
    }

    pub fn header(&self) -> Result<Header, PacketError> {
        let body_len = u32::try_from(self.body.len())
            .ok()
            .filter(|len| *len <= MAX_BODY_LEN)
            .ok_or(PacketError::BodyTooLarge(u32::MAX))?;
        Ok(Header {
            stream: self.stream,
            end_or_error: self.end_or_error,
            body_type: self.body_type,
            body_len,
            request: self.request,
        })
    }

    /// Header followed by body
    pub fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.extend_from_slice(&self.header()?.to_bytes());
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    pub fn body_json(&self) -> Result<JsonValue, PacketError> {
        if self.body_type != BodyType::Json {
            return Err(PacketError::InvalidBody(format!(
                "expected a JSON body, got {:?}",
                self.body_type
            )));
        }
        serde_json::from_slice(&self.body).map_err(|e| PacketError::InvalidBody(e.to_string()))
    }

    pub fn body_str(&self) -> Result<&str, PacketError> {
        std::str::from_utf8(&self.body).map_err(|e| PacketError::InvalidBody(e.to_string()))
    }
}

fn truncated(e: BoxStreamError) -> PacketError {
    match e {
        BoxStreamError::Truncated => PacketError::Truncated,
        other => PacketError::BoxStream(other),
    }
}

/// Request number a response to `request` carries
///
/// Either sign of the number is accepted; zero and `i32::MIN` have no
/// counterpart and are rejected.
pub fn response_number(request: i32) -> Result<i32, PacketError> {
    match request.checked_abs() {
        Some(n) if n != 0 => Ok(-n),
        _ => Err(PacketError::InvalidRequest(request)),
    }
}

/// Receiving half of a packet stream
pub struct PacketReader<R> {
    reader: BoxStreamReader<R>,
    closed: bool,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(reader: BoxStreamReader<R>) -> Self {
        Self {
            reader,
            closed: false,
        }
    }

    /// Next packet, or `None` once the peer has ended the stream
    pub async fn recv(&mut self) -> Result<Option<Packet>, PacketError> {
        if self.closed {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_LEN];
        if !self
            .reader
            .try_read_exact(&mut header)
            .await
            .map_err(truncated)?
        {
            self.closed = true;
            return Ok(None);
        }
        let Some(header) = Header::parse(&header)? else {
            tracing::debug!("Packet stream received goodbye");
            self.closed = true;
            return Ok(None);
        };

        let mut body = vec![0u8; header.body_len as usize];
        self.reader.read_exact(&mut body).await.map_err(truncated)?;

        Ok(Some(Packet {
            stream: header.stream,
            end_or_error: header.end_or_error,
            body_type: header.body_type,
            request: header.request,
            body,
        }))
    }
}

/// Sending half of a packet stream
pub struct PacketWriter<W> {
    writer: BoxStreamWriter<W>,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(writer: BoxStreamWriter<W>) -> Self {
        Self { writer }
    }

    /// Write a packet as-is
    pub async fn send(&mut self, packet: &Packet) -> Result<(), PacketError> {
        let bytes = packet.to_bytes()?;
        tracing::debug!(
            "Packet send [{}] {:?} {} bytes",
            packet.request,
            packet.body_type,
            packet.body.len()
        );
        self.writer.send(&bytes).await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }

    /// Send the packet-stream goodbye, then close the box stream
    pub async fn close(&mut self) -> Result<(), PacketError> {
        if !self.writer.is_closed() {
            self.writer.send(&GOODBYE).await?;
            self.writer.close().await?;
        }
        Ok(())
    }
}

/// Packets over a box stream
pub struct PacketStream<S> {
    reader: PacketReader<ReadHalf<S>>,
    writer: PacketWriter<WriteHalf<S>>,
    peer: FeedId,
    next_request: i32,
}

impl<S: AsyncRead + AsyncWrite> PacketStream<S> {
    pub fn new(stream: BoxStream<S>) -> Self {
        let peer = *stream.peer();
        let (reader, writer) = stream.split();
        Self {
            reader: PacketReader::new(reader),
            writer: PacketWriter::new(writer),
            peer,
            next_request: 1,
        }
    }

    pub fn peer(&self) -> &FeedId {
        &self.peer
    }

    pub async fn send(&mut self, packet: &Packet) -> Result<(), PacketError> {
        self.writer.send(packet).await
    }

    /// Send a new request, returning the request number it was given
    pub async fn send_request(
        &mut self,
        body_type: BodyType,
        body: Vec<u8>,
        stream: bool,
    ) -> Result<i32, PacketError> {
        let request = self.next_request;
        let packet = Packet::new(request, body_type, body).with_stream(stream);
        self.send(&packet).await?;
        self.next_request = self.next_request.checked_add(1).unwrap_or(1);
        Ok(request)
    }

    /// Answer request `request`; `end` marks the last packet of the answer
    pub async fn respond(
        &mut self,
        request: i32,
        body_type: BodyType,
        body: Vec<u8>,
        stream: bool,
        end: bool,
    ) -> Result<(), PacketError> {
        let packet = Packet::new(response_number(request)?, body_type, body)
            .with_stream(stream)
            .with_end_or_error(end);
        self.send(&packet).await
    }

    pub async fn recv(&mut self) -> Result<Option<Packet>, PacketError> {
        self.reader.recv().await
    }

    pub async fn close(&mut self) -> Result<(), PacketError> {
        self.writer.close().await
    }

    /// Separate halves for driving each direction from its own task
    pub fn split(self) -> (PacketReader<ReadHalf<S>>, PacketWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_layout() {
        let header = Header {
            stream: true,
            end_or_error: false,
            body_type: BodyType::Json,
            body_len: 0x0102,
            request: -3,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes[0], 0b1010);
        assert_eq!(&bytes[1..5], &[0, 0, 1, 2]);
        assert_eq!(&bytes[5..], &(-3i32).to_be_bytes());
        assert_eq!(Header::parse(&bytes).unwrap(), Some(header));
    }

    #[test]
    fn test_header_flags() {
        let header = Header::parse(&[0b0101, 0, 0, 0, 4, 0, 0, 0, 1]).unwrap().unwrap();
        assert!(!header.stream);
        assert!(header.end_or_error);
        assert_eq!(header.body_type, BodyType::Utf8);
        assert_eq!(header.body_len, 4);
        assert_eq!(header.request, 1);
    }

    #[test]
    fn test_goodbye_header() {
        assert_eq!(Header::parse(&[0u8; HEADER_LEN]).unwrap(), None);
    }

    #[test]
    fn test_unknown_body_type() {
        assert!(matches!(
            Header::parse(&[0b0011, 0, 0, 0, 0, 0, 0, 0, 1]),
            Err(PacketError::UnknownBodyType(3))
        ));
    }

    #[test]
    fn test_oversized_body_rejected() {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0] = BodyType::Binary as u8;
        bytes[1..5].copy_from_slice(&(MAX_BODY_LEN + 1).to_be_bytes());
        bytes[8] = 1;
        assert!(matches!(
            Header::parse(&bytes),
            Err(PacketError::BodyTooLarge(_))
        ));
    }

    #[test]
    fn test_json_packet() {
        let packet = Packet::json(1, &json!({"name": ["whoami"], "args": []})).unwrap();
        assert_eq!(packet.body_type, BodyType::Json);
        assert_eq!(packet.body_json().unwrap()["name"][0], "whoami");
        assert!(!packet.is_response());

        let text = Packet::text(-1, "hi");
        assert!(text.is_response());
        assert_eq!(text.body_str().unwrap(), "hi");
        assert!(text.body_json().is_err());
    }

    #[test]
    fn test_response_number() {
        assert_eq!(response_number(5).unwrap(), -5);
        assert_eq!(response_number(-5).unwrap(), -5);
        assert_eq!(response_number(i32::MAX).unwrap(), -i32::MAX);
        assert!(matches!(
            response_number(i32::MIN),
            Err(PacketError::InvalidRequest(i32::MIN))
        ));
        assert!(matches!(
            response_number(0),
            Err(PacketError::InvalidRequest(0))
        ));
    }

    #[test]
    fn test_packet_to_bytes() {
        let packet = Packet::text(7, "abc").with_end_or_error(true);
        let bytes = packet.to_bytes().unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 3);
        assert_eq!(bytes[0], 0b0101);
        assert_eq!(&bytes[HEADER_LEN..], b"abc");
    }
}
