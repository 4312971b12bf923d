use ethereum_types::{H256, H512};
use ethlink_rlp::{decode::RLPDecode, structs::Capability};
use k256::{
    ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey},
    PublicKey, SecretKey,
};
use rand::thread_rng;
use sha3::{Digest, Keccak256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::eth::status::ETH_VERSION;
use super::handshake::{decode_ack_message, decode_auth_message, encode_ack_message, encode_auth_message};
use super::message::Message;
use super::p2p_messages::hello_from_public_key;
use super::utils::{ecdh_xchng, id2pubkey, pubkey2id};
use super::{error::RLPxError, frame};

/// The only capability this node negotiates onto an RLPx session. Peers advertising a
/// different `eth` version in HELLO simply don't get it selected.
const SUPPORTED_CAPABILITY: (&str, u8) = ("eth", ETH_VERSION as u8);

const MAX_HANDSHAKE_MSG_SIZE: usize = 8 * 1024;

pub(crate) type Aes256Ctr64BE = ctr::Ctr64BE<aes::Aes256>;

/// A single RLPx peer connection, carried through the handshake state machine and into
/// the framed, multiplexed `Established` state.
pub struct RLPxConnection<S> {
    signer: SigningKey,
    state: RLPxConnectionState,
    stream: S,
    pub capabilities: Vec<Capability>,
    listen_port: u16,
}

impl<S: AsyncWrite + AsyncRead + Unpin> RLPxConnection<S> {
    fn new(signer: SigningKey, stream: S, state: RLPxConnectionState, listen_port: u16) -> Self {
        Self {
            signer,
            state,
            stream,
            capabilities: vec![],
            listen_port,
        }
    }

    /// Builds the listening side of a connection: the remote dials us.
    pub fn receiver(signer: SigningKey, stream: S, listen_port: u16) -> Self {
        let mut rng = thread_rng();
        Self::new(
            signer,
            stream,
            RLPxConnectionState::Receiver(Receiver::new(
                H256::random_using(&mut rng),
                SecretKey::random(&mut rng),
            )),
            listen_port,
        )
    }

    /// Builds the dialing side of a connection, given the auth message we are about to send.
    pub fn initiator(
        signer: SigningKey,
        remote_node_id: H512,
        stream: S,
        listen_port: u16,
    ) -> Self {
        let mut rng = thread_rng();
        let state = RLPxConnectionState::Initiator(Initiator::new(
            H256::random_using(&mut rng),
            SecretKey::random(&mut rng),
            remote_node_id,
        ));
        Self::new(signer, stream, state, listen_port)
    }

    pub async fn handshake(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::Initiator(_) => {
                self.send_auth().await?;
                self.receive_ack().await?;
            }
            RLPxConnectionState::Receiver(_) => {
                self.receive_auth().await?;
                self.send_ack().await?;
            }
            _ => return Err(RLPxError::InvalidState),
        };
        debug!("rlpx handshake complete");
        self.exchange_hello_messages().await
    }

    async fn exchange_hello_messages(&mut self) -> Result<(), RLPxError> {
        let public_key = PublicKey::from(self.signer.verifying_key());
        let hello_msg = Message::Hello(hello_from_public_key(
            vec![Capability {
                protocol: SUPPORTED_CAPABILITY.0.to_string(),
                version: SUPPORTED_CAPABILITY.1 as u32,
            }],
            &public_key,
            self.listen_port,
        ));
        self.send(hello_msg).await?;

        match self.receive().await? {
            Message::Hello(hello) => {
                self.capabilities = hello.capabilities;
                if self
                    .capabilities
                    .iter()
                    .any(|cap| cap.protocol == SUPPORTED_CAPABILITY.0 && cap.version as u8 == SUPPORTED_CAPABILITY.1)
                {
                    Ok(())
                } else {
                    Err(RLPxError::Handshake("no matching capabilities".into()))
                }
            }
            other => Err(RLPxError::UnexpectedMessage(other)),
        }
    }

    pub fn remote_node_id(&self) -> Result<H512, RLPxError> {
        match &self.state {
            RLPxConnectionState::Established(state) => Ok(state.remote_node_id),
            _ => Err(RLPxError::InvalidState),
        }
    }

    async fn send_auth(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::Initiator(initiator_state) => {
                let secret_key: SecretKey = self.signer.clone().into();
                let peer_pk = id2pubkey(initiator_state.remote_node_id)
                    .ok_or(RLPxError::InvalidPeerId)?;
                let previous_state = initiator_state.clone();

                let msg = encode_auth_message(
                    &secret_key,
                    previous_state.nonce,
                    &peer_pk,
                    &previous_state.ephemeral_key,
                )?;
                self.send_handshake_msg(&msg).await?;

                self.state =
                    RLPxConnectionState::InitiatedAuth(InitiatedAuth::new(previous_state, msg));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState),
        }
    }

    async fn send_ack(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::ReceivedAuth(received_auth_state) => {
                let peer_pk = id2pubkey(received_auth_state.remote_node_id)
                    .ok_or(RLPxError::InvalidPeerId)?;
                let previous_state = received_auth_state.clone();

                let msg = encode_ack_message(
                    &previous_state.local_ephemeral_key,
                    previous_state.local_nonce,
                    &peer_pk,
                )?;
                self.send_handshake_msg(&msg).await?;

                self.state = RLPxConnectionState::Established(Box::new(Established::for_receiver(
                    previous_state,
                    msg,
                )));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState),
        }
    }

    async fn receive_auth(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::Receiver(receiver_state) => {
                let secret_key: SecretKey = self.signer.clone().into();
                let previous_state = receiver_state.clone();
                let msg_bytes = self.receive_handshake_msg().await?;
                let size_data = msg_bytes.get(..2).ok_or(RLPxError::Handshake("short auth message".into()))?;
                let msg = msg_bytes.get(2..).ok_or(RLPxError::Handshake("short auth message".into()))?;
                let (auth, remote_ephemeral_key) = decode_auth_message(&secret_key, msg, size_data)?;

                self.state = RLPxConnectionState::ReceivedAuth(ReceivedAuth::new(
                    previous_state,
                    auth.node_id,
                    msg_bytes.clone(),
                    auth.nonce,
                    remote_ephemeral_key,
                ));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState),
        }
    }

    async fn receive_ack(&mut self) -> Result<(), RLPxError> {
        match &self.state {
            RLPxConnectionState::InitiatedAuth(initiated_auth_state) => {
                let secret_key: SecretKey = self.signer.clone().into();
                let previous_state = initiated_auth_state.clone();
                let msg_bytes = self.receive_handshake_msg().await?;
                let size_data = msg_bytes.get(..2).ok_or(RLPxError::Handshake("short ack message".into()))?;
                let msg = msg_bytes.get(2..).ok_or(RLPxError::Handshake("short ack message".into()))?;
                let ack = decode_ack_message(&secret_key, msg, size_data)?;
                let remote_ephemeral_key = ack
                    .get_ephemeral_pubkey()
                    .ok_or(RLPxError::Handshake("missing remote ephemeral key".into()))?;

                self.state = RLPxConnectionState::Established(Box::new(Established::for_initiator(
                    previous_state,
                    msg_bytes.clone(),
                    ack.nonce,
                    remote_ephemeral_key,
                )));
                Ok(())
            }
            _ => Err(RLPxError::InvalidState),
        }
    }

    async fn send_handshake_msg(&mut self, msg: &[u8]) -> Result<(), RLPxError> {
        self.stream.write_all(msg).await?;
        Ok(())
    }

    async fn receive_handshake_msg(&mut self) -> Result<Vec<u8>, RLPxError> {
        let mut size_buf = [0u8; 2];
        self.stream.read_exact(&mut size_buf).await?;
        let msg_size = u16::from_be_bytes(size_buf) as usize;
        if msg_size > MAX_HANDSHAKE_MSG_SIZE {
            return Err(RLPxError::Handshake("handshake message too large".into()));
        }

        let mut buf = vec![0u8; msg_size];
        self.stream.read_exact(&mut buf).await?;

        let mut full = Vec::with_capacity(msg_size + 2);
        full.extend_from_slice(&size_buf);
        full.extend_from_slice(&buf);
        Ok(full)
    }

    pub async fn send(&mut self, message: Message) -> Result<(), RLPxError> {
        match &mut self.state {
            RLPxConnectionState::Established(state) => {
                let mut frame_buffer = vec![];
                message.encode(&mut frame_buffer)?;
                frame::write(frame_buffer, state, &mut self.stream).await
            }
            _ => Err(RLPxError::InvalidState),
        }
    }

    pub async fn receive(&mut self) -> Result<Message, RLPxError> {
        match &mut self.state {
            RLPxConnectionState::Established(state) => {
                let frame_data = frame::read(state, &mut self.stream).await?;
                let (msg_id, msg_data): (u8, &[u8]) = RLPDecode::decode_unfinished(&frame_data)?;
                Ok(Message::decode(msg_id, msg_data)?)
            }
            _ => Err(RLPxError::InvalidState),
        }
    }
}

/// Recovers the dialing peer's id from the first 65 bytes of an incoming auth message,
/// needed to build the listening side's [`RLPxConnection`] before the state machine has a
/// node id of its own.
pub fn recover_initiator_node_id(msg: &[u8]) -> Result<H512, RLPxError> {
    let payload = msg.get(65..).ok_or(RLPxError::Handshake("short auth message".into()))?;
    let digest = Keccak256::digest(payload);
    let signature_bytes = msg.get(..64).ok_or(RLPxError::Handshake("short auth message".into()))?;
    let signature = Signature::from_slice(signature_bytes)?;
    let rid = RecoveryId::from_byte(*msg.get(64).ok_or(RLPxError::Handshake("short auth message".into()))?)
        .ok_or(RLPxError::Handshake("invalid recovery id".into()))?;
    let peer_pk = VerifyingKey::recover_from_prehash(&digest, &signature, rid)?;
    Ok(pubkey2id(&peer_pk.into()))
}

enum RLPxConnectionState {
    Initiator(Initiator),
    Receiver(Receiver),
    ReceivedAuth(ReceivedAuth),
    InitiatedAuth(InitiatedAuth),
    Established(Box<Established>),
}

#[derive(Clone)]
struct Receiver {
    nonce: H256,
    ephemeral_key: SecretKey,
}

impl Receiver {
    fn new(nonce: H256, ephemeral_key: SecretKey) -> Self {
        Self {
            nonce,
            ephemeral_key,
        }
    }
}

#[derive(Clone)]
struct Initiator {
    nonce: H256,
    ephemeral_key: SecretKey,
    remote_node_id: H512,
}

impl Initiator {
    fn new(nonce: H256, ephemeral_key: SecretKey, remote_node_id: H512) -> Self {
        Self {
            nonce,
            ephemeral_key,
            remote_node_id,
        }
    }
}

#[derive(Clone)]
struct ReceivedAuth {
    local_nonce: H256,
    local_ephemeral_key: SecretKey,
    remote_node_id: H512,
    remote_nonce: H256,
    remote_ephemeral_key: PublicKey,
    remote_init_message: Vec<u8>,
}

impl ReceivedAuth {
    fn new(
        previous_state: Receiver,
        remote_node_id: H512,
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        Self {
            local_nonce: previous_state.nonce,
            local_ephemeral_key: previous_state.ephemeral_key,
            remote_node_id,
            remote_nonce,
            remote_ephemeral_key,
            remote_init_message,
        }
    }
}

#[derive(Clone)]
struct InitiatedAuth {
    remote_node_id: H512,
    local_nonce: H256,
    local_ephemeral_key: SecretKey,
    local_init_message: Vec<u8>,
}

impl InitiatedAuth {
    fn new(previous_state: Initiator, local_init_message: Vec<u8>) -> Self {
        Self {
            remote_node_id: previous_state.remote_node_id,
            local_nonce: previous_state.nonce,
            local_ephemeral_key: previous_state.ephemeral_key,
            local_init_message,
        }
    }
}

/// The post-handshake session: derived AES/MAC secrets plus the running ingress/egress
/// MAC hash state that `rlpx::frame` advances on every frame.
pub struct Established {
    pub remote_node_id: H512,
    pub(crate) mac_key: H256,
    pub ingress_mac: Keccak256,
    pub egress_mac: Keccak256,
    pub ingress_aes: Aes256Ctr64BE,
    pub egress_aes: Aes256Ctr64BE,
}

impl Established {
    fn for_receiver(previous_state: ReceivedAuth, init_message: Vec<u8>) -> Self {
        let hashed_nonces = Keccak256::digest(
            [previous_state.local_nonce.0, previous_state.remote_nonce.0].concat(),
        )
        .into();

        Self::new(
            previous_state.remote_node_id,
            init_message,
            previous_state.local_nonce,
            previous_state.local_ephemeral_key,
            hashed_nonces,
            previous_state.remote_init_message,
            previous_state.remote_nonce,
            previous_state.remote_ephemeral_key,
        )
    }

    fn for_initiator(
        previous_state: InitiatedAuth,
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        let hashed_nonces =
            Keccak256::digest([remote_nonce.0, previous_state.local_nonce.0].concat()).into();

        Self::new(
            previous_state.remote_node_id,
            previous_state.local_init_message,
            previous_state.local_nonce,
            previous_state.local_ephemeral_key,
            hashed_nonces,
            remote_init_message,
            remote_nonce,
            remote_ephemeral_key,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        remote_node_id: H512,
        local_init_message: Vec<u8>,
        local_nonce: H256,
        local_ephemeral_key: SecretKey,
        hashed_nonces: [u8; 32],
        remote_init_message: Vec<u8>,
        remote_nonce: H256,
        remote_ephemeral_key: PublicKey,
    ) -> Self {
        use aes::cipher::KeyIvInit;

        let ephemeral_key_secret = ecdh_xchng(&local_ephemeral_key, &remote_ephemeral_key);

        // shared-secret = keccak256(ephemeral-key || keccak256(nonce || initiator-nonce))
        let shared_secret = Keccak256::digest([ephemeral_key_secret, hashed_nonces].concat()).into();
        // aes-secret = keccak256(ephemeral-key || shared-secret)
        let aes_key = H256(Keccak256::digest([ephemeral_key_secret, shared_secret].concat()).into());
        // mac-secret = keccak256(ephemeral-key || aes-secret)
        let mac_key = H256(Keccak256::digest([ephemeral_key_secret, aes_key.0].concat()).into());

        let egress_mac = Keccak256::default()
            .chain_update(mac_key ^ remote_nonce)
            .chain_update(&local_init_message);
        let ingress_mac = Keccak256::default()
            .chain_update(mac_key ^ local_nonce)
            .chain_update(&remote_init_message);

        let ingress_aes = <Aes256Ctr64BE as KeyIvInit>::new(&aes_key.0.into(), &[0; 16].into());
        let egress_aes = ingress_aes.clone();
        Self {
            remote_node_id,
            mac_key,
            ingress_mac,
            egress_mac,
            ingress_aes,
            egress_aes,
        }
    }
}
