use rand::rngs::OsRng;
use x25519_dalek::{PublicKey as CurvePublicKey, SharedSecret, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{
    BoxStreamParams, HandshakeOutcome, HandshakeState, KeyNonce, NetworkKey, Role,
    CLIENT_AUTH_LEN, HELLO_LEN, SERVER_ACCEPT_LEN,
};
use crate::crypto::{self, NONCE_LEN};
use crate::error::HandshakeError;
use crate::identity::{FeedId, Identity, Signature, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};

const ZERO_NONCE: [u8; NONCE_LEN] = [0u8; NONCE_LEN];

/// DH results accumulated as the handshake progresses
#[derive(Default, Zeroize, ZeroizeOnDrop)]
struct Secrets {
    /// ephemeral x ephemeral
    ab: [u8; 32],
    /// client ephemeral x server long-term
    a_big_b: [u8; 32],
    /// client long-term x server ephemeral
    big_a_b: [u8; 32],
    /// sha256(ab)
    ab_hash: [u8; 32],
}

/// Secret Handshake state machine
///
/// Feed it each peer message with [`advance`](Self::advance); whatever it
/// returns must be written to the peer before the next call.
/// [`bytes_needed`](Self::bytes_needed) reports the size of the next peer
/// message. Any error moves the handshake to [`HandshakeState::Failed`] and
/// wipes all derived key material.
pub struct Handshake {
    role: Role,
    state: HandshakeState,
    network: NetworkKey,
    identity: Identity,
    longterm_curve: Option<StaticSecret>,
    ephemeral: Option<StaticSecret>,
    ephemeral_public: CurvePublicKey,
    peer: Option<FeedId>,
    peer_ephemeral: Option<CurvePublicKey>,
    secrets: Secrets,
    client_signature: Option<[u8; SIGNATURE_SIZE]>,
    outcome: Option<HandshakeOutcome>,
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("identity", self.identity.id())
            .field("peer", &self.peer)
            .finish()
    }
}

fn contributory(shared: SharedSecret) -> Result<[u8; 32], HandshakeError> {
    if shared.was_contributory() {
        Ok(shared.to_bytes())
    } else {
        Err(HandshakeError::AuthenticationFailed)
    }
}

fn peer_curve_key(peer: &FeedId) -> Result<CurvePublicKey, HandshakeError> {
    crypto::ed25519_public_to_curve25519(peer.as_bytes())
        .ok_or(HandshakeError::AuthenticationFailed)
}

fn expect_len(incoming: &[u8], expected: usize) -> Result<(), HandshakeError> {
    if incoming.len() != expected {
        return Err(HandshakeError::InvalidLength {
            expected,
            found: incoming.len(),
        });
    }
    Ok(())
}

impl Handshake {
    /// Start a handshake as the client, dialing `server`
    pub fn client(
        network: NetworkKey,
        identity: &Identity,
        server: FeedId,
    ) -> Result<Self, HandshakeError> {
        Self::new(Role::Client, network, identity, Some(server))
    }

    /// Start a handshake as the server
    pub fn server(network: NetworkKey, identity: &Identity) -> Result<Self, HandshakeError> {
        Self::new(Role::Server, network, identity, None)
    }

    fn new(
        role: Role,
        network: NetworkKey,
        identity: &Identity,
        peer: Option<FeedId>,
    ) -> Result<Self, HandshakeError> {
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        Self::with_ephemeral(role, network, identity, peer, ephemeral)
    }

    /// Like [`new`](Self::new) with a caller-chosen ephemeral key
    pub(crate) fn with_ephemeral(
        role: Role,
        network: NetworkKey,
        identity: &Identity,
        peer: Option<FeedId>,
        ephemeral: StaticSecret,
    ) -> Result<Self, HandshakeError> {
        let longterm_curve = identity.curve25519_secret()?;
        let ephemeral_public = CurvePublicKey::from(&ephemeral);

        Ok(Self {
            role,
            state: HandshakeState::Start,
            network,
            identity: identity.clone(),
            longterm_curve: Some(longterm_curve),
            ephemeral: Some(ephemeral),
            ephemeral_public,
            peer,
            peer_ephemeral: None,
            secrets: Secrets::default(),
            client_signature: None,
            outcome: None,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, HandshakeState::Accepted | HandshakeState::Failed)
    }

    /// Size of the next message expected from the peer
    ///
    /// Zero means the next [`advance`](Self::advance) takes no input (the
    /// client's opening move) or that the handshake is finished.
    pub fn bytes_needed(&self) -> usize {
        match (self.role, self.state) {
            (Role::Client, HandshakeState::SentHello) => HELLO_LEN,
            (Role::Client, HandshakeState::SentAuth) => SERVER_ACCEPT_LEN,
            (Role::Server, HandshakeState::Start) => HELLO_LEN,
            (Role::Server, HandshakeState::SentHello) => CLIENT_AUTH_LEN,
            _ => 0,
        }
    }

    /// Consume one peer message and produce our reply, if any
    pub fn advance(&mut self, incoming: &[u8]) -> Result<Option<Vec<u8>>, HandshakeError> {
        let result = match (self.role, self.state) {
            (Role::Client, HandshakeState::Start) => self.client_hello(incoming).map(Some),
            (Role::Client, HandshakeState::SentHello) => self.client_auth(incoming).map(Some),
            (Role::Client, HandshakeState::SentAuth) => self.client_verify_accept(incoming),
            (Role::Server, HandshakeState::Start) => self.server_hello(incoming).map(Some),
            (Role::Server, HandshakeState::SentHello) => self.server_accept(incoming).map(Some),
            (_, state) => Err(HandshakeError::InvalidState(state)),
        };

        if let Err(e) = &result {
            tracing::warn!("Handshake ({:?}) failed in state {:?}: {}", self.role, self.state, e);
            self.fail();
        }
        result
    }

    /// Take the session keys of an accepted handshake
    pub fn finish(mut self) -> Result<HandshakeOutcome, HandshakeError> {
        match self.outcome.take() {
            Some(outcome) if self.state == HandshakeState::Accepted => Ok(outcome),
            _ => Err(HandshakeError::InvalidState(self.state)),
        }
    }

    fn fail(&mut self) {
        self.state = HandshakeState::Failed;
        self.secrets.zeroize();
        self.ephemeral = None;
        self.longterm_curve = None;
        self.client_signature = None;
        self.outcome = None;
    }

    fn transition(&mut self, next: HandshakeState) {
        tracing::debug!("Handshake ({:?}): {:?} -> {:?}", self.role, self.state, next);
        self.state = next;
    }

    fn hello(&self) -> Vec<u8> {
        let public = self.ephemeral_public.as_bytes();
        let mut hello = Vec::with_capacity(HELLO_LEN);
        hello.extend_from_slice(&crypto::auth(self.network.as_bytes(), public));
        hello.extend_from_slice(public);
        hello
    }

    fn read_hello(&mut self, incoming: &[u8]) -> Result<CurvePublicKey, HandshakeError> {
        expect_len(incoming, HELLO_LEN)?;
        let (tag, key) = incoming.split_at(32);
        if !crypto::auth_verify(self.network.as_bytes(), key, tag) {
            return Err(HandshakeError::UnknownNetwork);
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(key);
        let peer_ephemeral = CurvePublicKey::from(bytes);
        self.peer_ephemeral = Some(peer_ephemeral);
        Ok(peer_ephemeral)
    }

    fn ephemeral(&self) -> Result<&StaticSecret, HandshakeError> {
        self.ephemeral
            .as_ref()
            .ok_or(HandshakeError::InvalidState(self.state))
    }

    fn longterm_curve(&self) -> Result<&StaticSecret, HandshakeError> {
        self.longterm_curve
            .as_ref()
            .ok_or(HandshakeError::InvalidState(self.state))
    }

    fn peer(&self) -> Result<FeedId, HandshakeError> {
        self.peer.ok_or(HandshakeError::InvalidState(self.state))
    }

    fn peer_ephemeral(&self) -> Result<&CurvePublicKey, HandshakeError> {
        self.peer_ephemeral
            .as_ref()
            .ok_or(HandshakeError::InvalidState(self.state))
    }

    /// `sha256(N ‖ ab ‖ aB)`
    fn auth_box_key(&self) -> [u8; 32] {
        crypto::sha256(&[
            self.network.as_bytes(),
            &self.secrets.ab,
            &self.secrets.a_big_b,
        ])
    }

    /// `sha256(N ‖ ab ‖ aB ‖ Ab)`
    fn accept_box_key(&self) -> [u8; 32] {
        crypto::sha256(&[
            self.network.as_bytes(),
            &self.secrets.ab,
            &self.secrets.a_big_b,
            &self.secrets.big_a_b,
        ])
    }

    /// What the client signs: `N ‖ B ‖ sha256(ab)`
    fn client_signed_payload(&self, server: &FeedId) -> Vec<u8> {
        [
            self.network.as_bytes().as_slice(),
            server.as_bytes(),
            &self.secrets.ab_hash,
        ]
        .concat()
    }

    /// What the server signs: `N ‖ sig_A ‖ A ‖ sha256(ab)`
    fn server_signed_payload(&self, client_signature: &[u8], client: &FeedId) -> Vec<u8> {
        [
            self.network.as_bytes().as_slice(),
            client_signature,
            client.as_bytes(),
            &self.secrets.ab_hash,
        ]
        .concat()
    }

    fn client_hello(&mut self, incoming: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        expect_len(incoming, 0)?;
        let hello = self.hello();
        self.transition(HandshakeState::SentHello);
        Ok(hello)
    }

    fn client_auth(&mut self, incoming: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let server_ephemeral = self.read_hello(incoming)?;
        self.transition(HandshakeState::ReceivedHello);

        let server = self.peer()?;
        let server_curve = peer_curve_key(&server)?;
        let ab = contributory(self.ephemeral()?.diffie_hellman(&server_ephemeral))?;
        let a_big_b = contributory(self.ephemeral()?.diffie_hellman(&server_curve))?;
        self.secrets.ab = ab;
        self.secrets.a_big_b = a_big_b;
        self.secrets.ab_hash = crypto::sha256(&[&ab]);

        let signature = self.identity.sign(&self.client_signed_payload(&server))?;
        let mut plaintext = [0u8; SIGNATURE_SIZE + PUBLIC_KEY_SIZE];
        plaintext[..SIGNATURE_SIZE].copy_from_slice(signature.as_bytes());
        plaintext[SIGNATURE_SIZE..].copy_from_slice(self.identity.id().as_bytes());

        let boxed = crypto::seal(&self.auth_box_key(), &ZERO_NONCE, &plaintext);
        plaintext.zeroize();
        self.client_signature = Some(*signature.as_bytes());

        // Ab needs our long-term secret and the server's ephemeral, both known now
        self.secrets.big_a_b =
            contributory(self.longterm_curve()?.diffie_hellman(&server_ephemeral))?;

        self.transition(HandshakeState::SentAuth);
        Ok(boxed)
    }

    fn client_verify_accept(&mut self, incoming: &[u8]) -> Result<Option<Vec<u8>>, HandshakeError> {
        expect_len(incoming, SERVER_ACCEPT_LEN)?;
        let plaintext = crypto::open(&self.accept_box_key(), &ZERO_NONCE, incoming)
            .ok_or(HandshakeError::AuthenticationFailed)?;
        let signature: [u8; SIGNATURE_SIZE] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| HandshakeError::AuthenticationFailed)?;

        let server = self.peer()?;
        let client_signature = self
            .client_signature
            .ok_or(HandshakeError::InvalidState(self.state))?;
        let signed = self.server_signed_payload(&client_signature, self.identity.id());
        if !Identity::verify(&signed, &Signature::from_bytes(signature), &server) {
            return Err(HandshakeError::AuthenticationFailed);
        }

        self.accept(server)?;
        Ok(None)
    }

    fn server_hello(&mut self, incoming: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        let client_ephemeral = self.read_hello(incoming)?;
        self.transition(HandshakeState::ReceivedHello);

        let ab = contributory(self.ephemeral()?.diffie_hellman(&client_ephemeral))?;
        let a_big_b = contributory(self.longterm_curve()?.diffie_hellman(&client_ephemeral))?;
        self.secrets.ab = ab;
        self.secrets.a_big_b = a_big_b;
        self.secrets.ab_hash = crypto::sha256(&[&ab]);

        let hello = self.hello();
        self.transition(HandshakeState::SentHello);
        Ok(hello)
    }

    fn server_accept(&mut self, incoming: &[u8]) -> Result<Vec<u8>, HandshakeError> {
        expect_len(incoming, CLIENT_AUTH_LEN)?;
        let mut plaintext = crypto::open(&self.auth_box_key(), &ZERO_NONCE, incoming)
            .ok_or(HandshakeError::AuthenticationFailed)?;
        if plaintext.len() != SIGNATURE_SIZE + PUBLIC_KEY_SIZE {
            return Err(HandshakeError::AuthenticationFailed);
        }

        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&plaintext[..SIGNATURE_SIZE]);
        let mut client_key = [0u8; PUBLIC_KEY_SIZE];
        client_key.copy_from_slice(&plaintext[SIGNATURE_SIZE..]);
        plaintext.zeroize();
        let client = FeedId::from_bytes(client_key);

        let signed = self.client_signed_payload(self.identity.id());
        if !Identity::verify(&signed, &Signature::from_bytes(signature), &client) {
            return Err(HandshakeError::AuthenticationFailed);
        }
        self.transition(HandshakeState::ReceivedAuth);

        let client_curve = peer_curve_key(&client)?;
        self.secrets.big_a_b = contributory(self.ephemeral()?.diffie_hellman(&client_curve))?;

        let accept_signature = self
            .identity
            .sign(&self.server_signed_payload(&signature, &client))?;
        let boxed = crypto::seal(
            &self.accept_box_key(),
            &ZERO_NONCE,
            accept_signature.as_bytes(),
        );

        self.accept(client)?;
        Ok(boxed)
    }

    /// Derive both directions' keys and wipe the intermediate secrets
    fn accept(&mut self, peer: FeedId) -> Result<(), HandshakeError> {
        let mut shared = crypto::sha256(&[&crypto::sha256(&[&self.accept_box_key()])]);
        let own_ephemeral = self.ephemeral_public.to_bytes();
        let peer_ephemeral = self.peer_ephemeral()?.to_bytes();

        let send = KeyNonce {
            key: crypto::sha256(&[&shared, peer.as_bytes()]),
            nonce: starting_nonce(&self.network, &peer_ephemeral),
        };
        let receive = KeyNonce {
            key: crypto::sha256(&[&shared, self.identity.id().as_bytes()]),
            nonce: starting_nonce(&self.network, &own_ephemeral),
        };
        shared.zeroize();

        self.peer = Some(peer);
        self.outcome = Some(HandshakeOutcome {
            peer,
            params: BoxStreamParams { send, receive },
        });
        self.secrets.zeroize();
        self.ephemeral = None;
        self.longterm_curve = None;
        self.client_signature = None;

        self.transition(HandshakeState::Accepted);
        tracing::info!("Handshake ({:?}) accepted peer {}", self.role, peer);
        Ok(())
    }
}

/// First 24 bytes of `auth(N, ephemeral)`, which is also that side's hello tag
fn starting_nonce(network: &NetworkKey, ephemeral: &[u8; 32]) -> [u8; NONCE_LEN] {
    let tag = crypto::auth(network.as_bytes(), ephemeral);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&tag[..NONCE_LEN]);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CryptoError;

    fn run(client: &mut Handshake, server: &mut Handshake) {
        let hello = client.advance(&[]).unwrap().unwrap();
        assert_eq!(hello.len(), HELLO_LEN);
        let hello = server.advance(&hello).unwrap().unwrap();
        assert_eq!(hello.len(), HELLO_LEN);
        let auth = client.advance(&hello).unwrap().unwrap();
        assert_eq!(auth.len(), CLIENT_AUTH_LEN);
        let accept = server.advance(&auth).unwrap().unwrap();
        assert_eq!(accept.len(), SERVER_ACCEPT_LEN);
        assert!(client.advance(&accept).unwrap().is_none());
    }

    #[test]
    fn test_honest_parties_agree_on_keys() {
        let alice = Identity::generate();
        let bob = Identity::generate();

        let mut client = Handshake::client(NetworkKey::MAIN, &alice, *bob.id()).unwrap();
        let mut server = Handshake::server(NetworkKey::MAIN, &bob).unwrap();
        run(&mut client, &mut server);

        assert_eq!(client.state(), HandshakeState::Accepted);
        assert_eq!(server.state(), HandshakeState::Accepted);

        let client = client.finish().unwrap();
        let server = server.finish().unwrap();
        assert_eq!(client.peer, *bob.id());
        assert_eq!(server.peer, *alice.id());
        assert_eq!(client.params.send, server.params.receive);
        assert_eq!(client.params.receive, server.params.send);
        assert_ne!(client.params.send.key, client.params.receive.key);
        assert_ne!(client.params.send.nonce, client.params.receive.nonce);
    }

    fn unhex(hex: &str) -> Vec<u8> {
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_known_vector_with_fixed_keys() {
        let alice = Identity::from_seed([1u8; 32]);
        let bob = Identity::from_seed([2u8; 32]);
        let mut client = Handshake::with_ephemeral(
            Role::Client,
            NetworkKey::MAIN,
            &alice,
            Some(*bob.id()),
            StaticSecret::from([3u8; 32]),
        )
        .unwrap();
        let mut server = Handshake::with_ephemeral(
            Role::Server,
            NetworkKey::MAIN,
            &bob,
            None,
            StaticSecret::from([4u8; 32]),
        )
        .unwrap();

        let client_hello = client.advance(&[]).unwrap().unwrap();
        assert_eq!(
            client_hello,
            unhex(
                "883239f8c7165cb7db838910d06ef49c6b2ae05dd68d1aaed80e3c283af06829\
                 5dfedd3b6bd47f6fa28ee15d969d5bb0ea53774d488bdaf9df1c6e0124b3ef22"
            )
        );
        let server_hello = server.advance(&client_hello).unwrap().unwrap();
        assert_eq!(
            server_hello,
            unhex(
                "4375f9c1d57129521f356625731cdf2cbb191349133e88188f62966ee39542d0\
                 ac01b2209e86354fb853237b5de0f4fab13c7fcbf433a61c019369617fecf10b"
            )
        );
        let auth = client.advance(&server_hello).unwrap().unwrap();
        assert_eq!(
            auth,
            unhex(
                "61cbde099f19c20241aa0bf870362c4aee4a2cfc0b8023efa1f8b60b41999254\
                 a4d02eb960aac24ae2b8ccbcb00ccb6bf3e626c8c8314d2be34a0506a0a327c5\
                 d7abd29ca79024a5bef92d99a5707d4f50b8c0fab34417b6bece706cdd5347ba\
                 f9a1876fdee8b014df4b8d088b755540"
            )
        );
        let accept = server.advance(&auth).unwrap().unwrap();
        assert_eq!(
            accept,
            unhex(
                "d608859b4555cef1b3272ddea67ac7add33e3c74f56e6bc98b353198809e5caa\
                 60daa905ea838854cfec7caee24baf7a244d41693e9273efa06b250a7b509d28\
                 62fa28554c18d9d64633f9a8d8bf3ee5"
            )
        );
        assert!(client.advance(&accept).unwrap().is_none());

        let client = client.finish().unwrap();
        let server = server.finish().unwrap();
        assert_eq!(
            client.params.send.key.to_vec(),
            unhex("3209b0004d3aad7189ccd3443ac5ebf1be744e33cca39802fb587927b1af2ec8")
        );
        assert_eq!(
            client.params.send.nonce.to_vec(),
            unhex("4375f9c1d57129521f356625731cdf2cbb191349133e8818")
        );
        assert_eq!(
            client.params.receive.key.to_vec(),
            unhex("a378be604aff6ed14b74d1c832b7103debb1e11276f6cf2c6b113091f42e568e")
        );
        assert_eq!(
            client.params.receive.nonce.to_vec(),
            unhex("883239f8c7165cb7db838910d06ef49c6b2ae05dd68d1aae")
        );
        assert_eq!(server.params.send, client.params.receive);
        assert_eq!(server.params.receive, client.params.send);
    }

    #[test]
    fn test_bytes_needed_follows_protocol() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let mut client = Handshake::client(NetworkKey::MAIN, &alice, *bob.id()).unwrap();
        let mut server = Handshake::server(NetworkKey::MAIN, &bob).unwrap();

        assert_eq!(client.bytes_needed(), 0);
        assert_eq!(server.bytes_needed(), HELLO_LEN);

        let hello = client.advance(&[]).unwrap().unwrap();
        assert_eq!(client.state(), HandshakeState::SentHello);
        assert_eq!(client.bytes_needed(), HELLO_LEN);

        let hello = server.advance(&hello).unwrap().unwrap();
        assert_eq!(server.state(), HandshakeState::SentHello);
        assert_eq!(server.bytes_needed(), CLIENT_AUTH_LEN);

        client.advance(&hello).unwrap();
        assert_eq!(client.state(), HandshakeState::SentAuth);
        assert_eq!(client.bytes_needed(), SERVER_ACCEPT_LEN);
    }

    #[test]
    fn test_wrong_network_fails_at_hello() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let other = NetworkKey::from_bytes([7u8; 32]);

        let mut client = Handshake::client(NetworkKey::MAIN, &alice, *bob.id()).unwrap();
        let mut server = Handshake::server(other, &bob).unwrap();

        let hello = client.advance(&[]).unwrap().unwrap();
        let result = server.advance(&hello);
        assert!(matches!(result, Err(HandshakeError::UnknownNetwork)));
        assert_eq!(server.state(), HandshakeState::Failed);
        assert!(server.finish().is_err());
    }

    #[test]
    fn test_client_rejects_server_hello_from_other_network() {
        let alice = Identity::generate();
        let bob = Identity::generate();

        let mut client = Handshake::client(NetworkKey::MAIN, &alice, *bob.id()).unwrap();
        let mut server = Handshake::server(NetworkKey::from_bytes([7u8; 32]), &bob).unwrap();
        client.advance(&[]).unwrap();

        // Server hello computed under a different key, delivered directly
        let bogus = server.hello();
        assert!(matches!(
            client.advance(&bogus),
            Err(HandshakeError::UnknownNetwork)
        ));
    }

    #[test]
    fn test_client_dialing_wrong_server_key_fails() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let mallory = Identity::generate();

        // Alice thinks she's talking to Mallory, but Bob answers
        let mut client = Handshake::client(NetworkKey::MAIN, &alice, *mallory.id()).unwrap();
        let mut server = Handshake::server(NetworkKey::MAIN, &bob).unwrap();

        let hello = client.advance(&[]).unwrap().unwrap();
        let hello = server.advance(&hello).unwrap().unwrap();
        let auth = client.advance(&hello).unwrap().unwrap();
        assert!(matches!(
            server.advance(&auth),
            Err(HandshakeError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_tampered_auth_fails() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let mut client = Handshake::client(NetworkKey::MAIN, &alice, *bob.id()).unwrap();
        let mut server = Handshake::server(NetworkKey::MAIN, &bob).unwrap();

        let hello = client.advance(&[]).unwrap().unwrap();
        let hello = server.advance(&hello).unwrap().unwrap();
        let mut auth = client.advance(&hello).unwrap().unwrap();
        auth[40] ^= 0x01;
        assert!(matches!(
            server.advance(&auth),
            Err(HandshakeError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_tampered_accept_fails() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let mut client = Handshake::client(NetworkKey::MAIN, &alice, *bob.id()).unwrap();
        let mut server = Handshake::server(NetworkKey::MAIN, &bob).unwrap();

        let hello = client.advance(&[]).unwrap().unwrap();
        let hello = server.advance(&hello).unwrap().unwrap();
        let auth = client.advance(&hello).unwrap().unwrap();
        let mut accept = server.advance(&auth).unwrap().unwrap();
        accept[0] ^= 0x80;
        assert!(matches!(
            client.advance(&accept),
            Err(HandshakeError::AuthenticationFailed)
        ));
        assert_eq!(client.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_wrong_length_message() {
        let bob = Identity::generate();
        let mut server = Handshake::server(NetworkKey::MAIN, &bob).unwrap();
        assert!(matches!(
            server.advance(&[0u8; 10]),
            Err(HandshakeError::InvalidLength {
                expected: HELLO_LEN,
                found: 10
            })
        ));
    }

    #[test]
    fn test_cannot_advance_after_failure_or_acceptance() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let mut client = Handshake::client(NetworkKey::MAIN, &alice, *bob.id()).unwrap();
        let mut server = Handshake::server(NetworkKey::MAIN, &bob).unwrap();
        run(&mut client, &mut server);

        assert!(matches!(
            client.advance(&[]),
            Err(HandshakeError::InvalidState(HandshakeState::Accepted))
        ));
        // A rejected call still ends the handshake
        assert_eq!(client.state(), HandshakeState::Failed);
    }

    #[test]
    fn test_finish_before_accepted() {
        let bob = Identity::generate();
        let server = Handshake::server(NetworkKey::MAIN, &bob).unwrap();
        assert!(matches!(
            server.finish(),
            Err(HandshakeError::InvalidState(HandshakeState::Start))
        ));
    }

    #[test]
    fn test_verify_only_identity_cannot_handshake() {
        let bob = Identity::generate();
        let public = Identity::from_public(*bob.id());
        assert!(matches!(
            Handshake::server(NetworkKey::MAIN, &public),
            Err(HandshakeError::Identity(CryptoError::MissingPrivateKey))
        ));
    }

    #[test]
    fn test_low_order_ephemeral_rejected() {
        let bob = Identity::generate();
        let mut server = Handshake::server(NetworkKey::MAIN, &bob).unwrap();

        // The identity point yields an all-zero shared secret
        let zero = [0u8; 32];
        let mut hello = crypto::auth(NetworkKey::MAIN.as_bytes(), &zero).to_vec();
        hello.extend_from_slice(&zero);
        assert!(matches!(
            server.advance(&hello),
            Err(HandshakeError::AuthenticationFailed)
        ));
    }
}
