//! Frame encryption and decryption, independent of any I/O
//!
//! Each frame is a 34-byte boxed header followed by the boxed body:
//!
//! ```text
//! header = secretbox(len:u16be ‖ body_tag[16], nonce n)    34 bytes
//! body   = secretbox_detached(payload, nonce n+1)          len bytes
//! ```
//!
//! The nonce advances by two per frame. The goodbye frame is a boxed header
//! of 18 zero bytes.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::BoxStreamError;
use crate::handshake::KeyNonce;

/// Largest payload carried by a single frame
pub const MAX_FRAME_BODY: usize = 4096;
/// Size of an encrypted header on the wire
pub const HEADER_LEN: usize = TAG_LEN + HEADER_PLAIN_LEN;

const HEADER_PLAIN_LEN: usize = 2 + TAG_LEN;
const GOODBYE: [u8; HEADER_PLAIN_LEN] = [0u8; HEADER_PLAIN_LEN];

/// Big-endian increment across the whole nonce
fn increment(nonce: &mut [u8; NONCE_LEN]) {
    for byte in nonce.iter_mut().rev() {
        let (next, overflow) = byte.overflowing_add(1);
        *byte = next;
        if !overflow {
            break;
        }
    }
}

/// Encrypts outgoing frames
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct BoxEncoder {
    key: [u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
    #[zeroize(skip)]
    closed: bool,
}

impl BoxEncoder {
    pub fn new(params: &KeyNonce) -> Self {
        Self {
            key: params.key,
            nonce: params.nonce,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Encrypt one frame of at most [`MAX_FRAME_BODY`] bytes onto `out`
    pub fn encode_frame(&mut self, payload: &[u8], out: &mut Vec<u8>) -> Result<(), BoxStreamError> {
        if self.closed {
            return Err(BoxStreamError::Closed);
        }
        if payload.len() > MAX_FRAME_BODY {
            return Err(BoxStreamError::FrameTooLarge(payload.len()));
        }

        let header_nonce = self.nonce;
        increment(&mut self.nonce);
        let body_nonce = self.nonce;
        increment(&mut self.nonce);

        let mut body = payload.to_vec();
        let body_tag = crypto::seal_detached(&self.key, &body_nonce, &mut body);

        let mut header = [0u8; HEADER_PLAIN_LEN];
        header[..2].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        header[2..].copy_from_slice(&body_tag);

        out.extend_from_slice(&crypto::seal(&self.key, &header_nonce, &header));
        out.extend_from_slice(&body);
        Ok(())
    }

    /// Encrypt `data`, split into as many frames as needed
    ///
    /// Empty input still produces one zero-length frame, which the peer
    /// receives as an empty message (not as end of stream).
    pub fn encode(&mut self, data: &[u8]) -> Result<Vec<u8>, BoxStreamError> {
        let frames = data.len().div_ceil(MAX_FRAME_BODY).max(1);
        let mut out = Vec::with_capacity(data.len() + frames * HEADER_LEN);
        if data.is_empty() {
            self.encode_frame(data, &mut out)?;
        }
        for chunk in data.chunks(MAX_FRAME_BODY) {
            self.encode_frame(chunk, &mut out)?;
        }
        Ok(out)
    }

    /// The terminal frame; nothing may be encoded after it
    pub fn goodbye(&mut self) -> Result<Vec<u8>, BoxStreamError> {
        if self.closed {
            return Err(BoxStreamError::Closed);
        }
        let frame = crypto::seal(&self.key, &self.nonce, &GOODBYE);
        increment(&mut self.nonce);
        self.closed = true;
        Ok(frame)
    }
}

/// A decoded unit of the incoming stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame(Vec<u8>),
    Goodbye,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    Header,
    Body { len: usize, tag: [u8; TAG_LEN] },
    Closed,
    Failed,
}

/// Decrypts incoming frames
///
/// Feed it exactly [`bytes_needed`](Self::bytes_needed) bytes at a time. Any
/// authentication failure is final: the decoder refuses all further input.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct BoxDecoder {
    key: [u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
    #[zeroize(skip)]
    state: DecoderState,
}

impl BoxDecoder {
    pub fn new(params: &KeyNonce) -> Self {
        Self {
            key: params.key,
            nonce: params.nonce,
            state: DecoderState::Header,
        }
    }

    /// Bytes required by the next [`advance`](Self::advance), 0 once finished
    pub fn bytes_needed(&self) -> usize {
        match self.state {
            DecoderState::Header => HEADER_LEN,
            DecoderState::Body { len, .. } => len,
            DecoderState::Closed | DecoderState::Failed => 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state == DecoderState::Closed
    }

    pub fn is_failed(&self) -> bool {
        self.state == DecoderState::Failed
    }

    pub fn advance(&mut self, incoming: &[u8]) -> Result<Option<Decoded>, BoxStreamError> {
        let result = match self.state {
            DecoderState::Header => self.read_header(incoming),
            DecoderState::Body { len, tag } => self.read_body(incoming, len, &tag),
            DecoderState::Closed => Err(BoxStreamError::Closed),
            DecoderState::Failed => Err(BoxStreamError::Integrity),
        };
        if let Err(BoxStreamError::Integrity | BoxStreamError::FrameTooLarge(_)) = &result {
            self.state = DecoderState::Failed;
        }
        result
    }

    fn check_len(incoming: &[u8], expected: usize) -> Result<(), BoxStreamError> {
        if incoming.len() != expected {
            return Err(BoxStreamError::InvalidLength {
                expected,
                found: incoming.len(),
            });
        }
        Ok(())
    }

    fn read_header(&mut self, incoming: &[u8]) -> Result<Option<Decoded>, BoxStreamError> {
        Self::check_len(incoming, HEADER_LEN)?;
        let header =
            crypto::open(&self.key, &self.nonce, incoming).ok_or(BoxStreamError::Integrity)?;
        increment(&mut self.nonce);

        if header == GOODBYE {
            tracing::debug!("Box stream received goodbye");
            self.state = DecoderState::Closed;
            return Ok(Some(Decoded::Goodbye));
        }

        let len = u16::from_be_bytes([header[0], header[1]]) as usize;
        if len > MAX_FRAME_BODY {
            return Err(BoxStreamError::FrameTooLarge(len));
        }
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&header[2..]);

        if len == 0 {
            return self.read_body(&[], 0, &tag);
        }
        self.state = DecoderState::Body { len, tag };
        Ok(None)
    }

    fn read_body(
        &mut self,
        incoming: &[u8],
        len: usize,
        tag: &[u8; TAG_LEN],
    ) -> Result<Option<Decoded>, BoxStreamError> {
        Self::check_len(incoming, len)?;
        let mut body = incoming.to_vec();
        if !crypto::open_detached(&self.key, &self.nonce, &mut body, tag) {
            return Err(BoxStreamError::Integrity);
        }
        increment(&mut self.nonce);
        self.state = DecoderState::Header;
        Ok(Some(Decoded::Frame(body)))
    }
}
