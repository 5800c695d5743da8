//! Hashing, Ed25519 keys and address derivation.

use crate::constants::{ADDRESS_SIZE, HASH_SIZE};
use crate::error::ChainError;
use crate::Hash;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

pub const NULL_HASH: Hash = [0u8; HASH_SIZE];

pub fn sha256(bytes: &[u8]) -> Hash {
    Sha256::digest(bytes).into()
}

/// Hash of `left || right`, the merkle fold.
pub fn concat_hashes(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

pub fn hash_to_hex(hash: &Hash) -> String {
    hex::encode_upper(hash)
}

pub fn hash_from_hex(s: &str) -> Result<Hash, ChainError> {
    decode_fixed::<HASH_SIZE>(s, "hash")
}

/// Serde adapter writing a [`Hash`] as uppercase hex.
pub mod hex_hash {
    use super::{hash_from_hex, hash_to_hex};
    use crate::Hash;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hash_to_hex(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        let s = String::deserialize(deserializer)?;
        hash_from_hex(&s).map_err(serde::de::Error::custom)
    }
}

pub(crate) fn decode_fixed<const N: usize>(s: &str, what: &str) -> Result<[u8; N], ChainError> {
    let bytes =
        hex::decode(s).map_err(|e| ChainError::Encoding(format!("invalid {what} hex: {e}")))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        ChainError::Encoding(format!("{what} must be {N} bytes, got {}", b.len()))
    })
}

/// Ledger account identifier: SHA-256 of the Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub const NULL: Address = Address([0u8; ADDRESS_SIZE]);

    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Address(sha256(key.as_bytes()))
    }

    pub fn from_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_fixed::<ADDRESS_SIZE>(s, "address").map(Address)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

pub fn public_key_to_hex(key: &VerifyingKey) -> String {
    hex::encode_upper(key.as_bytes())
}

pub fn public_key_from_hex(s: &str) -> Result<VerifyingKey, ChainError> {
    let bytes = decode_fixed::<32>(s, "public key")?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| ChainError::Encoding(format!("invalid public key: {e}")))
}

pub fn signature_to_hex(sig: &Signature) -> String {
    hex::encode_upper(sig.to_bytes())
}

pub fn signature_from_hex(s: &str) -> Result<Signature, ChainError> {
    let bytes = decode_fixed::<64>(s, "signature")?;
    Ok(Signature::from_bytes(&bytes))
}

pub fn sign_hash(hash: &Hash, key: &SigningKey) -> Signature {
    key.sign(hash)
}

pub fn verify_hash(hash: &Hash, signature: &Signature, key: &VerifyingKey) -> bool {
    key.verify(hash, signature).is_ok()
}

/// A caller-supplied Ed25519 keypair.
#[derive(Clone)]
pub struct KeyPair {
    pub signing: SigningKey,
    pub verifying: VerifyingKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_signing_key(signing: SigningKey) -> Self {
        let verifying = signing.verifying_key();
        KeyPair { signing, verifying }
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, ChainError> {
        let secret: [u8; 32] = bytes.try_into().map_err(|_| {
            ChainError::Encoding(format!("secret key must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&secret)))
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.verifying)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
