//! libscuttle - Secure Scuttlebutt client core
//!
//! This library provides the pieces a Scuttlebutt peer needs to take part in
//! the network: Ed25519 identities, append-only hash-chained feeds with their
//! canonical message encoding, the Secret Handshake, and the box stream,
//! packet stream and MuxRPC layers that run over an authenticated connection.
//!
//! ```no_run
//! use libscuttle::{handshake, Config, MultiserverAddress, PacketStream};
//!
//! # async fn run() -> libscuttle::Result<()> {
//! let config = Config::load()?;
//! let identity = config.load_identity()?;
//! let address: MultiserverAddress = "net:hermies.club:8008~shs:TO9r9Q3Mn0M5MVTSwKIpZq4BiT4tz+ihHz4IOf7h/hM=".parse()?;
//!
//! let stream = handshake::connect(&address, config.network_key()?, &identity).await?;
//! let mut packets = PacketStream::new(stream);
//! while let Some(packet) = packets.recv().await? {
//!     println!("{:?}", packet);
//! }
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod box_stream;
pub mod config;
mod crypto;
pub mod error;
pub mod feed;
pub mod handshake;
pub mod identity;
pub mod logging;
pub mod muxrpc;
pub mod packet;

// Re-export commonly used types
pub use address::MultiserverAddress;
pub use box_stream::{BoxStream, BoxStreamReader, BoxStreamWriter};
pub use config::Config;
pub use error::{ErrorKind, Result, ScuttleError};
pub use feed::{verify_chain, Feed, FeedLog, FeedStore, MemoryFeedStore, Message, MessageKey};
pub use handshake::{Handshake, HandshakeOutcome, NetworkKey};
pub use identity::{FeedId, Identity, Signature};
pub use muxrpc::{MuxRpc, Responder, RpcConnection, RpcHandler, RpcRequest, RpcType};
pub use packet::{BodyType, Packet, PacketReader, PacketStream, PacketWriter};
