use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use super::codec::{BoxDecoder, BoxEncoder, Decoded};
use crate::error::BoxStreamError;
use crate::handshake::{HandshakeOutcome, KeyNonce};
use crate::identity::FeedId;

/// Sending half of a box stream
pub struct BoxStreamWriter<W> {
    inner: W,
    encoder: BoxEncoder,
}

impl<W: AsyncWrite + Unpin> BoxStreamWriter<W> {
    pub fn new(inner: W, params: &KeyNonce) -> Self {
        Self {
            inner,
            encoder: BoxEncoder::new(params),
        }
    }

    /// Encrypt and write `data`, splitting it into frames as needed
    pub async fn send(&mut self, data: &[u8]) -> Result<(), BoxStreamError> {
        let wire = self.encoder.encode(data)?;
        self.inner.write_all(&wire).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Send the goodbye frame and shut down the write side
    ///
    /// Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), BoxStreamError> {
        if self.encoder.is_closed() {
            return Ok(());
        }
        let goodbye = self.encoder.goodbye()?;
        self.inner.write_all(&goodbye).await?;
        self.inner.flush().await?;
        self.inner.shutdown().await?;
        tracing::debug!("Box stream closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.encoder.is_closed()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Receiving half of a box stream
pub struct BoxStreamReader<R> {
    inner: R,
    decoder: BoxDecoder,
    /// Decrypted bytes not yet handed out by `read_exact`
    pending: Vec<u8>,
}

impl<R: AsyncRead + Unpin> BoxStreamReader<R> {
    pub fn new(inner: R, params: &KeyNonce) -> Self {
        Self {
            inner,
            decoder: BoxDecoder::new(params),
            pending: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.decoder.is_closed()
    }

    /// Next decrypted frame, or `None` once the peer has said goodbye
    ///
    /// Bytes left over from a partial [`read_exact`](Self::read_exact) are
    /// returned first. An abrupt end of the underlying channel is an I/O
    /// error, not a goodbye.
    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>, BoxStreamError> {
        if !self.pending.is_empty() {
            return Ok(Some(std::mem::take(&mut self.pending)));
        }
        self.next_frame().await
    }

    async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, BoxStreamError> {
        loop {
            if self.decoder.is_closed() {
                return Ok(None);
            }
            if self.decoder.is_failed() {
                return Err(BoxStreamError::Integrity);
            }

            let mut incoming = vec![0u8; self.decoder.bytes_needed()];
            self.inner.read_exact(&mut incoming).await?;
            match self.decoder.advance(&incoming) {
                Ok(Some(Decoded::Frame(payload))) => return Ok(Some(payload)),
                Ok(Some(Decoded::Goodbye)) => return Ok(None),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Box stream rejected frame: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Fill `buf` completely, reading across frame boundaries
    ///
    /// Returns `Ok(false)` if the stream ended cleanly before any byte was
    /// read, and [`BoxStreamError::Truncated`] if it ended part way through.
    pub async fn try_read_exact(&mut self, buf: &mut [u8]) -> Result<bool, BoxStreamError> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.pending.is_empty() {
                match self.next_frame().await? {
                    Some(frame) => self.pending = frame,
                    None if filled == 0 => return Ok(false),
                    None => return Err(BoxStreamError::Truncated),
                }
            }
            let n = self.pending.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            filled += n;
        }
        Ok(true)
    }

    /// Fill `buf` completely; ending early is [`BoxStreamError::Truncated`]
    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), BoxStreamError> {
        if buf.is_empty() || self.try_read_exact(buf).await? {
            Ok(())
        } else {
            Err(BoxStreamError::Truncated)
        }
    }

    /// Everything up to the peer's goodbye
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, BoxStreamError> {
        let mut out = std::mem::take(&mut self.pending);
        while let Some(frame) = self.next_frame().await? {
            out.extend_from_slice(&frame);
        }
        Ok(out)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// An authenticated, encrypted duplex channel
///
/// The two directions use independent keys and nonces, so after
/// [`split`](Self::split) they can be driven from separate tasks.
pub struct BoxStream<S> {
    reader: BoxStreamReader<ReadHalf<S>>,
    writer: BoxStreamWriter<WriteHalf<S>>,
    peer: FeedId,
}

impl<S: AsyncRead + AsyncWrite> BoxStream<S> {
    /// Wrap `stream` with the keys from a completed handshake
    pub fn new(stream: S, outcome: HandshakeOutcome) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self {
            reader: BoxStreamReader::new(read, &outcome.params.receive),
            writer: BoxStreamWriter::new(write, &outcome.params.send),
            peer: outcome.peer,
        }
    }

    /// Authenticated long-term key of the other side
    pub fn peer(&self) -> &FeedId {
        &self.peer
    }

    pub async fn send(&mut self, data: &[u8]) -> Result<(), BoxStreamError> {
        self.writer.send(data).await
    }

    pub async fn receive(&mut self) -> Result<Option<Vec<u8>>, BoxStreamError> {
        self.reader.receive().await
    }

    pub async fn close(&mut self) -> Result<(), BoxStreamError> {
        self.writer.close().await
    }

    pub fn reader(&mut self) -> &mut BoxStreamReader<ReadHalf<S>> {
        &mut self.reader
    }

    pub fn writer(&mut self) -> &mut BoxStreamWriter<WriteHalf<S>> {
        &mut self.writer
    }

    pub fn split(self) -> (BoxStreamReader<ReadHalf<S>>, BoxStreamWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}
