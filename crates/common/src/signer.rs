use std::{fs, path::Path};

use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use thiserror::Error;

use crate::node::NodeId;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("could not read node key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("node key file is corrupt (expected 32 raw bytes)")]
    BadKeyLength,
    #[error("node key file contains an invalid secp256k1 scalar")]
    InvalidKey,
}

/// Owns the node's secp256k1 identity key for the process lifetime. The [`NodeId`] derived
/// from it is immutable once constructed.
#[derive(Clone)]
pub struct Signer {
    key: SigningKey,
    node_id: NodeId,
}

impl Signer {
    pub fn new(key: SigningKey) -> Self {
        let node_id = node_id_from_signing_key(&key);
        Self { key, node_id }
    }

    pub fn random() -> Self {
        Self::new(SigningKey::random(&mut rand::thread_rng()))
    }

    /// Loads the 32 raw private-key bytes from `<datadir>/<chain>/config/client_key`,
    /// generating and persisting a new key on first run.
    pub fn load_or_create(client_key_path: &Path) -> Result<Self, SignerError> {
        if let Some(parent) = client_key_path.parent() {
            fs::create_dir_all(parent)?;
        }
        match fs::read(client_key_path) {
            Ok(bytes) => {
                let key = SigningKey::from_slice(&bytes).map_err(|_| SignerError::InvalidKey)?;
                Ok(Self::new(key))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let signer = Self::random();
                fs::write(client_key_path, signer.key.to_bytes())?;
                Ok(signer)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.key
    }

    pub fn secret_key(&self) -> SecretKey {
        self.key.clone().into()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(self.key.verifying_key())
    }
}

pub fn node_id_from_signing_key(signer: &SigningKey) -> NodeId {
    node_id_from_verifying_key(signer.verifying_key())
}

pub fn node_id_from_verifying_key(verifying_key: &k256::ecdsa::VerifyingKey) -> NodeId {
    let public_key = PublicKey::from(verifying_key);
    let encoded = public_key.to_encoded_point(false);
    NodeId::from_slice(&encoded.as_bytes()[1..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_create_persists_and_reloads_the_same_identity() {
        let dir = std::env::temp_dir().join(format!("ethlink-signer-test-{}", std::process::id()));
        let key_path = dir.join("client_key");
        let _ = std::fs::remove_file(&key_path);

        let first = Signer::load_or_create(&key_path).unwrap();
        let second = Signer::load_or_create(&key_path).unwrap();
        assert_eq!(first.node_id(), second.node_id());

        std::fs::remove_file(&key_path).unwrap();
    }
}
