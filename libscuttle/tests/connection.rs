//! End-to-end tests for handshake, box stream and packet stream
//!
//! Both peers run in the same process, connected by an in-memory duplex pipe
//! or a loopback TCP socket.

use anyhow::Result;
use libscuttle::box_stream::{BoxStreamReader, BoxStreamWriter};
use libscuttle::error::{BoxStreamError, ErrorKind, HandshakeError, ScuttleError};
use libscuttle::handshake::{self, HandshakeOutcome};
use libscuttle::{BodyType, BoxStream, Identity, MultiserverAddress, NetworkKey, PacketStream};
use serde_json::json;
use tokio::io::DuplexStream;

type Side = std::result::Result<(HandshakeOutcome, DuplexStream), HandshakeError>;

struct Pair {
    alice: Identity,
    bob: Identity,
    client: Side,
    server: Side,
}

/// Run both handshakes concurrently; a side that fails drops its end of the pipe
async fn handshake_pair(client_network: NetworkKey, server_network: NetworkKey) -> Pair {
    let alice = Identity::generate();
    let bob = Identity::generate();
    let (mut client_io, mut server_io) = tokio::io::duplex(4096);

    let (client, server) = {
        let (alice, bob) = (&alice, &bob);
        tokio::join!(
            async move {
                let outcome =
                    handshake::client(&mut client_io, client_network, alice, *bob.id()).await?;
                Ok((outcome, client_io))
            },
            async move {
                let outcome = handshake::server(&mut server_io, server_network, bob).await?;
                Ok((outcome, server_io))
            },
        )
    };

    Pair {
        alice,
        bob,
        client,
        server,
    }
}

#[tokio::test]
async fn test_handshake_over_duplex() -> Result<()> {
    let pair = handshake_pair(NetworkKey::MAIN, NetworkKey::MAIN).await;
    let (client, _) = pair.client?;
    let (server, _) = pair.server?;

    assert_eq!(client.peer, *pair.bob.id());
    assert_eq!(server.peer, *pair.alice.id());
    assert_eq!(client.params.send, server.params.receive);
    assert_eq!(client.params.receive, server.params.send);
    Ok(())
}

#[tokio::test]
async fn test_handshake_network_mismatch() {
    let pair = handshake_pair(NetworkKey::MAIN, NetworkKey::from_bytes([1u8; 32])).await;

    assert!(matches!(pair.server, Err(HandshakeError::UnknownNetwork)));
    // The server hangs up, so the client sees the channel close
    assert!(matches!(pair.client, Err(HandshakeError::Io(_))));
}

#[tokio::test]
async fn test_box_stream_roundtrip_over_handshake() -> Result<()> {
    let pair = handshake_pair(NetworkKey::MAIN, NetworkKey::MAIN).await;
    let (client, client_io) = pair.client?;
    let (server, server_io) = pair.server?;
    let mut alice = BoxStream::new(client_io, client);
    let mut bob = BoxStream::new(server_io, server);

    alice.send(b"").await?;
    assert_eq!(bob.receive().await?, Some(Vec::new()));

    let big: Vec<u8> = (0..20_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let sender = tokio::spawn(async move {
        alice.send(&big).await?;
        alice.close().await?;
        Ok::<_, BoxStreamError>(big)
    });

    let received = bob.reader().read_to_end().await?;
    let sent = sender.await??;
    assert_eq!(received, sent);
    Ok(())
}

#[tokio::test]
async fn test_tampered_frame_is_integrity_error() -> Result<()> {
    let pair = handshake_pair(NetworkKey::MAIN, NetworkKey::MAIN).await;
    let (client, _) = pair.client?;
    let (server, _) = pair.server?;

    let mut writer = BoxStreamWriter::new(Vec::new(), &client.params.send);
    writer.send(b"transfer 10 coins").await?;
    let mut wire = writer.into_inner();

    // Flip one bit of the body
    let last = wire.len() - 1;
    wire[last] ^= 0x01;

    let mut reader = BoxStreamReader::new(wire.as_slice(), &server.params.receive);
    let err = reader.receive().await.unwrap_err();
    assert!(matches!(err, BoxStreamError::Integrity));
    assert_eq!(ScuttleError::from(err).kind(), ErrorKind::Crypto);

    // The stream does not resynchronize
    assert!(matches!(
        reader.receive().await,
        Err(BoxStreamError::Integrity)
    ));
    Ok(())
}

#[tokio::test]
async fn test_packet_stream_request_response() -> Result<()> {
    let pair = handshake_pair(NetworkKey::MAIN, NetworkKey::MAIN).await;
    let (client, client_io) = pair.client?;
    let (server, server_io) = pair.server?;
    let mut alice = PacketStream::new(BoxStream::new(client_io, client));
    let mut bob = PacketStream::new(BoxStream::new(server_io, server));

    let body = serde_json::to_vec(&json!({"name": ["whoami"], "args": [], "type": "async"}))?;
    let request = alice.send_request(BodyType::Json, body, false).await?;
    assert_eq!(request, 1);

    let incoming = bob.recv().await?.expect("request packet");
    assert_eq!(incoming.request, 1);
    assert!(!incoming.is_response());
    assert_eq!(incoming.body_json()?["name"][0], "whoami");

    let answer = serde_json::to_vec(&json!({"id": alice.peer().to_string()}))?;
    bob.respond(incoming.request, BodyType::Json, answer, false, true)
        .await?;

    let response = alice.recv().await?.expect("response packet");
    assert_eq!(response.request, -1);
    assert!(response.is_response());
    assert!(response.end_or_error);

    assert_eq!(alice.send_request(BodyType::Utf8, b"x".to_vec(), true).await?, 2);
    let second = bob.recv().await?.expect("second request");
    assert!(second.stream);
    assert_eq!(second.body_str()?, "x");

    alice.close().await?;
    assert!(bob.recv().await?.is_none());
    assert!(bob.recv().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_packet_larger_than_a_frame() -> Result<()> {
    let pair = handshake_pair(NetworkKey::MAIN, NetworkKey::MAIN).await;
    let (client, client_io) = pair.client?;
    let (server, server_io) = pair.server?;
    let mut alice = PacketStream::new(BoxStream::new(client_io, client));
    let mut bob = PacketStream::new(BoxStream::new(server_io, server));

    let body = vec![0x5a; 10_000];
    let expected = body.clone();
    let sender = tokio::spawn(async move {
        alice.send_request(BodyType::Binary, body, false).await?;
        alice.close().await?;
        Ok::<_, libscuttle::error::PacketError>(())
    });

    let packet = bob.recv().await?.expect("binary packet");
    assert_eq!(packet.body, expected);
    assert!(bob.recv().await?.is_none());
    sender.await??;
    Ok(())
}

#[tokio::test]
async fn test_connect_and_accept_over_tcp() -> Result<()> {
    let alice = Identity::generate();
    let bob = Identity::generate();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    let address = MultiserverAddress::new("127.0.0.1", port, *bob.id());

    let server = tokio::spawn(async move {
        let mut stream = handshake::accept(&listener, NetworkKey::MAIN, &bob).await?;
        let greeting = stream.receive().await?;
        stream.send(b"welcome").await?;
        stream.close().await?;
        Ok::<_, ScuttleError>((greeting, *stream.peer()))
    });

    let mut stream = handshake::connect(&address, NetworkKey::MAIN, &alice).await?;
    assert_eq!(stream.peer(), &address.key);
    stream.send(b"hello").await?;
    assert_eq!(stream.receive().await?, Some(b"welcome".to_vec()));
    assert_eq!(stream.receive().await?, None);

    let (greeting, seen) = server.await??;
    assert_eq!(greeting, Some(b"hello".to_vec()));
    assert_eq!(seen, *alice.id());
    Ok(())
}

#[tokio::test]
async fn test_connect_to_wrong_key_fails() -> Result<()> {
    let alice = Identity::generate();
    let bob = Identity::generate();
    let impostor = Identity::generate();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    // Alice expects Bob, but the impostor is listening
    let address = MultiserverAddress::new("127.0.0.1", port, *bob.id());

    let server = tokio::spawn(async move {
        handshake::accept(&listener, NetworkKey::MAIN, &impostor)
            .await
            .map(|_| ())
    });

    let result = handshake::connect(&address, NetworkKey::MAIN, &alice).await;
    assert!(result.is_err());

    let server_result = server.await?;
    assert!(matches!(
        server_result,
        Err(ScuttleError::Handshake(HandshakeError::AuthenticationFailed))
    ));
    Ok(())
}
