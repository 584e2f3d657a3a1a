//! Fundamental types for the quorum ledger client.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! message and output identifiers, addresses, keys, seeds, and the message model
//! (transaction and indexation payloads) together with its canonical byte encoding.

pub mod address;
pub mod error;
mod hex;
pub mod ids;
pub mod keys;
pub mod message;

pub use address::Address;
pub use error::TypesError;
pub use ids::{MessageId, OutputId, TransactionId};
pub use keys::{KeyPair, PrivateKey, PublicKey, Seed, Signature};
pub use message::{
    IndexationPayload, Message, Output, Payload, TransactionEssence, TransactionPayload,
    UnlockBlock, UtxoInput,
};

/// Encode bytes as lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}
