//! The ledger message model.
//!
//! A [`Message`] references 1–8 parent messages, optionally carries a payload
//! (a signed transaction or an indexation record) and a proof-of-work nonce.
//! Its identifier is the Blake2b-256 hash of its canonical bytes; the bytes
//! hashed by proof-of-work are the canonical bytes without the nonce.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::TypesError;
use crate::ids::{MessageId, OutputId, TransactionId};
use crate::keys::{PublicKey, Signature};

type Blake2b256 = Blake2b<U32>;

/// Allowed number of parents.
pub const PARENTS_MIN: usize = 1;
pub const PARENTS_MAX: usize = 8;
/// Maximum inputs or outputs in one transaction essence.
pub const IO_COUNT_MAX: usize = 127;
/// Allowed indexation index length in bytes.
pub const INDEX_LEN_MIN: usize = 1;
pub const INDEX_LEN_MAX: usize = 64;
/// Maximum canonical message size in bytes.
pub const MESSAGE_LEN_MAX: usize = 32_768;

fn blake2b_256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b256::new();
    hasher.update(data);
    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

/// Canonical bytes of a message part.
///
/// bincode only fails on sequences of unknown length, on custom `Serialize`
/// impls that return an error, or on a size limit. The message types are
/// derived or hex-byte fields serialised into an unbounded `Vec`, so none of
/// these can occur and the encoding is total.
fn canonical<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("message types have a total bincode encoding")
}

/// Reference to an unspent output consumed by a transaction.
pub type UtxoInput = OutputId;

/// A signature-locked output: `amount` becomes spendable by `address`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Output {
    pub address: Address,
    pub amount: u64,
}

impl Output {
    pub fn new(address: Address, amount: u64) -> Result<Self, TypesError> {
        if amount == 0 {
            return Err(TypesError::ZeroAmount);
        }
        Ok(Self { address, amount })
    }
}

/// Arbitrary data stored under a lookup key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexationPayload {
    index: Vec<u8>,
    data: Vec<u8>,
}

impl IndexationPayload {
    pub fn new(index: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> Result<Self, TypesError> {
        let index = index.into();
        if !(INDEX_LEN_MIN..=INDEX_LEN_MAX).contains(&index.len()) {
            return Err(TypesError::InvalidIndexLength(index.len()));
        }
        Ok(Self {
            index,
            data: data.into(),
        })
    }

    pub fn index(&self) -> &[u8] {
        &self.index
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// The signed part of a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEssence {
    pub inputs: Vec<UtxoInput>,
    pub outputs: Vec<Output>,
    pub payload: Option<IndexationPayload>,
}

impl TransactionEssence {
    /// Hash signed by every input's key.
    pub fn hash(&self) -> [u8; 32] {
        blake2b_256(&canonical(self))
    }

    pub fn validate(&self) -> Result<(), TypesError> {
        if self.inputs.is_empty() || self.inputs.len() > IO_COUNT_MAX {
            return Err(TypesError::InvalidCount {
                kind: "input",
                count: self.inputs.len(),
            });
        }
        if self.outputs.is_empty() || self.outputs.len() > IO_COUNT_MAX {
            return Err(TypesError::InvalidCount {
                kind: "output",
                count: self.outputs.len(),
            });
        }
        if self.outputs.iter().any(|o| o.amount == 0) {
            return Err(TypesError::ZeroAmount);
        }
        Ok(())
    }

    pub fn output_total(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
    }
}

/// Proof that the sender controls an input's address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockBlock {
    /// Ed25519 signature over the essence hash.
    Signature {
        public_key: PublicKey,
        signature: Signature,
    },
    /// Reuse of the signature unlock at this position.
    Reference(u16),
}

/// A signed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub essence: TransactionEssence,
    pub unlock_blocks: Vec<UnlockBlock>,
}

impl TransactionPayload {
    pub fn id(&self) -> TransactionId {
        TransactionId::new(blake2b_256(&canonical(self)))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Transaction(Box<TransactionPayload>),
    Indexation(Box<IndexationPayload>),
}

/// An immutable, content-addressed ledger message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub network_id: u64,
    pub parents: Vec<MessageId>,
    pub payload: Option<Payload>,
    pub nonce: u64,
}

impl Message {
    /// Sort and deduplicate parents, then check the count.
    pub fn normalize_parents(mut parents: Vec<MessageId>) -> Result<Vec<MessageId>, TypesError> {
        parents.sort();
        parents.dedup();
        if !(PARENTS_MIN..=PARENTS_MAX).contains(&parents.len()) {
            return Err(TypesError::InvalidParentCount(parents.len()));
        }
        Ok(parents)
    }

    /// Full canonical encoding including the nonce.
    pub fn to_bytes(&self) -> Vec<u8> {
        canonical(self)
    }

    /// The bytes proof-of-work is computed over: everything except the nonce.
    pub fn pow_bytes(&self) -> Vec<u8> {
        canonical(&(self.network_id, &self.parents, &self.payload))
    }

    pub fn id(&self) -> MessageId {
        MessageId::new(blake2b_256(&self.to_bytes()))
    }

    /// Structural checks a node would apply before accepting the message.
    pub fn validate(&self) -> Result<(), TypesError> {
        if !(PARENTS_MIN..=PARENTS_MAX).contains(&self.parents.len()) {
            return Err(TypesError::InvalidParentCount(self.parents.len()));
        }
        if self.parents.windows(2).any(|w| w[0] >= w[1]) {
            return Err(TypesError::ParentsNotSortedUnique);
        }
        if let Some(Payload::Transaction(tx)) = &self.payload {
            tx.essence.validate()?;
        }
        let len = self.to_bytes().len();
        if len > MESSAGE_LEN_MAX {
            return Err(TypesError::MessageTooLarge(len));
        }
        Ok(())
    }

    pub fn transaction(&self) -> Option<&TransactionPayload> {
        match &self.payload {
            Some(Payload::Transaction(tx)) => Some(tx),
            _ => None,
        }
    }

    pub fn indexation(&self) -> Option<&IndexationPayload> {
        match &self.payload {
            Some(Payload::Indexation(ix)) => Some(ix),
            Some(Payload::Transaction(tx)) => tx.essence.payload.as_ref(),
            None => None,
        }
    }
}

/// Derive the numeric network id from a network name.
pub fn network_id(name: &str) -> u64 {
    let hash = blake2b_256(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(b: u8) -> MessageId {
        MessageId::new([b; 32])
    }

    fn indexation_message() -> Message {
        Message {
            network_id: network_id("devnet"),
            parents: vec![parent(1), parent(2)],
            payload: Some(Payload::Indexation(Box::new(
                IndexationPayload::new(b"tag".to_vec(), b"hello".to_vec()).unwrap(),
            ))),
            nonce: 0,
        }
    }

    #[test]
    fn id_depends_on_nonce_but_pow_bytes_do_not() {
        let mut msg = indexation_message();
        let id0 = msg.id();
        let pow0 = msg.pow_bytes();
        msg.nonce = 42;
        assert_ne!(msg.id(), id0);
        assert_eq!(msg.pow_bytes(), pow0);
    }

    #[test]
    fn every_payload_shape_has_canonical_bytes() {
        let essence = TransactionEssence {
            inputs: (0..IO_COUNT_MAX as u16)
                .map(|i| OutputId::new(TransactionId::new([7; 32]), i))
                .collect(),
            outputs: vec![Output::new(Address::new([8; 32]), 1).unwrap()],
            payload: Some(IndexationPayload::new(vec![1u8; INDEX_LEN_MAX], vec![0u8; 512]).unwrap()),
        };
        let transaction = TransactionPayload {
            essence,
            unlock_blocks: vec![
                UnlockBlock::Signature {
                    public_key: PublicKey([9; 32]),
                    signature: Signature([10; 64]),
                },
                UnlockBlock::Reference(0),
            ],
        };
        let shapes = [
            None,
            indexation_message().payload,
            Some(Payload::Transaction(Box::new(transaction))),
        ];
        for payload in shapes {
            let msg = Message {
                payload,
                ..indexation_message()
            };
            let bytes = msg.to_bytes();
            assert_eq!(bytes.len() as u64, bincode::serialized_size(&msg).unwrap());
            assert!(msg.pow_bytes().len() < bytes.len());
        }
    }

    #[test]
    fn id_is_deterministic() {
        assert_eq!(indexation_message().id(), indexation_message().id());
    }

    #[test]
    fn normalize_parents_sorts_and_dedups() {
        let parents = Message::normalize_parents(vec![parent(3), parent(1), parent(3)]).unwrap();
        assert_eq!(parents, vec![parent(1), parent(3)]);
        assert_eq!(
            Message::normalize_parents(vec![]),
            Err(TypesError::InvalidParentCount(0))
        );
        let nine: Vec<_> = (0..9).map(parent).collect();
        assert_eq!(
            Message::normalize_parents(nine),
            Err(TypesError::InvalidParentCount(9))
        );
    }

    #[test]
    fn validate_rejects_unsorted_parents() {
        let mut msg = indexation_message();
        msg.parents = vec![parent(2), parent(1)];
        assert_eq!(msg.validate(), Err(TypesError::ParentsNotSortedUnique));
    }

    #[test]
    fn indexation_index_bounds() {
        assert_eq!(
            IndexationPayload::new(Vec::new(), b"x".to_vec()),
            Err(TypesError::InvalidIndexLength(0))
        );
        assert!(IndexationPayload::new(vec![0u8; 64], Vec::new()).is_ok());
        assert!(IndexationPayload::new(vec![0u8; 65], Vec::new()).is_err());
    }

    #[test]
    fn zero_amount_output_rejected() {
        assert_eq!(
            Output::new(Address::new([0; 32]), 0),
            Err(TypesError::ZeroAmount)
        );
    }

    #[test]
    fn output_total_detects_overflow() {
        let address = Address::new([9; 32]);
        let essence = TransactionEssence {
            inputs: vec![],
            outputs: vec![
                Output::new(address, u64::MAX).unwrap(),
                Output::new(address, 1).unwrap(),
            ],
            payload: None,
        };
        assert_eq!(essence.output_total(), None);
    }

    #[test]
    fn network_id_differs_per_name() {
        assert_ne!(network_id("devnet"), network_id("mainnet"));
        assert_eq!(network_id("devnet"), network_id("devnet"));
    }
}
