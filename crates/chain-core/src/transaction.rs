//! Signed transfer instructions and the per-block reward transaction.

use crate::crypto::{
    hash_from_hex, hash_to_hex, public_key_from_hex, public_key_to_hex, sha256, sign_hash,
    signature_from_hex, signature_to_hex, verify_hash, Address, KeyPair,
};
use crate::error::{ChainError, Result};
use crate::Hash;
use ed25519_dalek::{Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

/// Who authorizes a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxKind {
    /// A transfer from the account owning `signing_key`. `signature` stays
    /// empty until the transaction is signed.
    Transfer {
        signing_key: VerifyingKey,
        signature: Option<Signature>,
    },
    /// The block producer's reward. Carries no key and no signature.
    Reward,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TransactionWire", into = "TransactionWire")]
pub struct Transaction {
    to: Address,
    amount: u64,
    fee: u64,
    timestamp: u64,
    kind: TxKind,
}

impl Transaction {
    /// An unsigned transfer; call [`Transaction::sign`] before submitting it.
    pub fn transfer(
        to: Address,
        amount: u64,
        fee: u64,
        timestamp: u64,
        signing_key: VerifyingKey,
    ) -> Self {
        Transaction {
            to,
            amount,
            fee,
            timestamp,
            kind: TxKind::Transfer {
                signing_key,
                signature: None,
            },
        }
    }

    /// Builds and signs a transfer from `keys`.
    pub fn signed(to: Address, amount: u64, fee: u64, timestamp: u64, keys: &KeyPair) -> Self {
        Self::transfer(to, amount, fee, timestamp, keys.verifying).sign(&keys.signing)
    }

    pub fn reward(to: Address, amount: u64, timestamp: u64) -> Self {
        Transaction {
            to,
            amount,
            fee: 0,
            timestamp,
            kind: TxKind::Reward,
        }
    }

    /// Signs the content hash, replacing any previous signature. Reward
    /// transactions are returned unchanged.
    pub fn sign(mut self, key: &SigningKey) -> Self {
        let content = self.content_hash();
        if let TxKind::Transfer { signature, .. } = &mut self.kind {
            *signature = Some(sign_hash(&content, key));
        }
        self
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn kind(&self) -> &TxKind {
        &self.kind
    }

    pub fn is_reward(&self) -> bool {
        matches!(self.kind, TxKind::Reward)
    }

    pub fn signing_key(&self) -> Option<&VerifyingKey> {
        match &self.kind {
            TxKind::Transfer { signing_key, .. } => Some(signing_key),
            TxKind::Reward => None,
        }
    }

    /// The debited account, derived from the signing key.
    pub fn sender(&self) -> Option<Address> {
        self.signing_key().map(Address::from_public_key)
    }

    pub fn signature(&self) -> Result<&Signature> {
        match &self.kind {
            TxKind::Transfer {
                signature: Some(sig),
                ..
            } => Ok(sig),
            _ => Err(ChainError::UnsignedTransaction),
        }
    }

    /// `amount + fee`, or `None` on overflow.
    pub fn total_debit(&self) -> Option<u64> {
        self.amount.checked_add(self.fee)
    }

    /// Hash of the signable payload: recipient, sender (transfers only), then
    /// fee, amount and timestamp as 8-byte big-endian integers.
    pub fn content_hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(32 + 32 + 8 * 3);
        buf.extend_from_slice(self.to.as_bytes());
        if let Some(sender) = self.sender() {
            buf.extend_from_slice(sender.as_bytes());
        }
        buf.extend_from_slice(&self.fee.to_be_bytes());
        buf.extend_from_slice(&self.amount.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        sha256(&buf)
    }

    /// Identity used for merkle commitment and indexing.
    pub fn identity_hash(&self) -> Result<Hash> {
        let content = self.content_hash();
        match &self.kind {
            TxKind::Reward => Ok(content),
            TxKind::Transfer {
                signature: Some(sig),
                ..
            } => {
                let mut buf = Vec::with_capacity(32 + 64);
                buf.extend_from_slice(&content);
                buf.extend_from_slice(&sig.to_bytes());
                Ok(sha256(&buf))
            }
            TxKind::Transfer {
                signature: None, ..
            } => Err(ChainError::UnsignedTransaction),
        }
    }

    pub fn verify_signature(&self) -> bool {
        match &self.kind {
            TxKind::Reward => true,
            TxKind::Transfer {
                signing_key,
                signature: Some(sig),
            } => verify_hash(&self.content_hash(), sig, signing_key),
            TxKind::Transfer {
                signature: None, ..
            } => false,
        }
    }
}

/// JSON layout exchanged with wallets and peers.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionWire {
    to: Address,
    amount: u64,
    timestamp: String,
    fee: u64,
    txid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signing_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
}

impl From<Transaction> for TransactionWire {
    fn from(tx: Transaction) -> Self {
        let txid = hash_to_hex(&tx.content_hash());
        let (signing_key, signature) = match &tx.kind {
            TxKind::Transfer {
                signing_key,
                signature,
            } => (
                Some(public_key_to_hex(signing_key)),
                signature.as_ref().map(signature_to_hex),
            ),
            TxKind::Reward => (None, None),
        };
        TransactionWire {
            to: tx.to,
            amount: tx.amount,
            timestamp: tx.timestamp.to_string(),
            fee: tx.fee,
            txid,
            signing_key,
            signature,
        }
    }
}

impl TryFrom<TransactionWire> for Transaction {
    type Error = ChainError;

    fn try_from(wire: TransactionWire) -> Result<Self> {
        let timestamp = wire
            .timestamp
            .parse::<u64>()
            .map_err(|e| {
                ChainError::Encoding(format!("invalid timestamp {:?}: {e}", wire.timestamp))
            })?;
        let kind = match (wire.signing_key, wire.signature) {
            (Some(key), Some(sig)) => TxKind::Transfer {
                signing_key: public_key_from_hex(&key)?,
                signature: Some(signature_from_hex(&sig)?),
            },
            (Some(_), None) => return Err(ChainError::UnsignedTransaction),
            (None, Some(_)) => {
                return Err(ChainError::Encoding("signature without signing key".into()))
            }
            (None, None) => TxKind::Reward,
        };
        let tx = Transaction {
            to: wire.to,
            amount: wire.amount,
            fee: wire.fee,
            timestamp,
            kind,
        };
        if hash_from_hex(&wire.txid)? != tx.content_hash() {
            return Err(ChainError::Encoding(format!(
                "txid {} does not match transaction content",
                wire.txid
            )));
        }
        Ok(tx)
    }
}
