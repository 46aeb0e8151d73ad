//! Async drivers for [`Handshake`] over byte streams

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::{Handshake, HandshakeOutcome, NetworkKey};
use crate::address::MultiserverAddress;
use crate::box_stream::BoxStream;
use crate::error::{HandshakeError, Result};
use crate::identity::{FeedId, Identity};

async fn drive<S>(stream: &mut S, mut handshake: Handshake) -> std::result::Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while !handshake.is_done() {
        let mut incoming = vec![0u8; handshake.bytes_needed()];
        if !incoming.is_empty() {
            stream.read_exact(&mut incoming).await?;
        }
        if let Some(outgoing) = handshake.advance(&incoming)? {
            stream.write_all(&outgoing).await?;
            stream.flush().await?;
        }
    }
    handshake.finish()
}

/// Run the client side of the handshake, expecting to reach `server`
pub async fn client<S>(
    stream: &mut S,
    network: NetworkKey,
    identity: &Identity,
    server: FeedId,
) -> std::result::Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    drive(stream, Handshake::client(network, identity, server)?).await
}

/// Run the server side of the handshake, accepting any client on `network`
pub async fn server<S>(
    stream: &mut S,
    network: NetworkKey,
    identity: &Identity,
) -> std::result::Result<HandshakeOutcome, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    drive(stream, Handshake::server(network, identity)?).await
}

/// Dial a peer over TCP and open an authenticated box stream to it
pub async fn connect(
    address: &MultiserverAddress,
    network: NetworkKey,
    identity: &Identity,
) -> Result<BoxStream<TcpStream>> {
    tracing::debug!("Connecting to {}", address);
    let mut stream = TcpStream::connect(address.socket_addr()).await?;
    let outcome = client(&mut stream, network, identity, address.key).await?;
    Ok(BoxStream::new(stream, outcome))
}

/// Accept one TCP connection and run the server handshake on it
pub async fn accept(
    listener: &TcpListener,
    network: NetworkKey,
    identity: &Identity,
) -> Result<BoxStream<TcpStream>> {
    let (mut stream, remote) = listener.accept().await?;
    tracing::debug!("Accepted connection from {}", remote);
    let outcome = server(&mut stream, network, identity).await?;
    Ok(BoxStream::new(stream, outcome))
}
