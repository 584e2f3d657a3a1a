//! Step-by-step construction of an outgoing message.
//!
//! ```text
//! Empty -> InputsSelected -> OutputsAttached -> PayloadAssembled -> NonceComputed -> Submitted
//! ```
//!
//! Each step checks the state it starts from and fails with
//! [`ClientError::InvalidState`] otherwise. The builder does no I/O; the
//! network part of the tail (parent check, proof-of-work, broadcast) is driven
//! by the client, which feeds the results back through
//! [`MessageBuilder::set_nonce`] and [`MessageBuilder::mark_submitted`].

use std::collections::{HashMap, HashSet};

use quorum_crypto::{derive, sign_essence};
use quorum_types::message::IO_COUNT_MAX;
use quorum_types::{
    Address, IndexationPayload, Message, MessageId, Output, OutputId, Payload, Seed,
    TransactionEssence, TransactionPayload, UnlockBlock,
};

use crate::error::ClientError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuilderState {
    Empty,
    InputsSelected,
    OutputsAttached,
    PayloadAssembled,
    NonceComputed,
    Submitted,
}

impl BuilderState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "Empty",
            Self::InputsSelected => "InputsSelected",
            Self::OutputsAttached => "OutputsAttached",
            Self::PayloadAssembled => "PayloadAssembled",
            Self::NonceComputed => "NonceComputed",
            Self::Submitted => "Submitted",
        }
    }
}

/// An unspent output picked as an input, with the coordinates of the key
/// that unlocks it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSigningData {
    pub output_id: OutputId,
    pub output: Output,
    pub account_index: u32,
    pub address_index: u32,
    pub internal: bool,
}

pub struct MessageBuilder {
    state: BuilderState,
    network_id: u64,
    inputs: Vec<InputSigningData>,
    outputs: Vec<Output>,
    indexation: Option<IndexationPayload>,
    message: Option<Message>,
    message_id: Option<MessageId>,
}

fn checked_sum(amounts: impl IntoIterator<Item = u64>) -> Result<u64, ClientError> {
    amounts
        .into_iter()
        .try_fold(0u64, |acc, amount| acc.checked_add(amount))
        .ok_or(ClientError::Overflow)
}

impl MessageBuilder {
    pub fn new(network_id: u64) -> Self {
        Self {
            state: BuilderState::Empty,
            network_id,
            inputs: Vec::new(),
            outputs: Vec::new(),
            indexation: None,
            message: None,
            message_id: None,
        }
    }

    /// Start from an already assembled payload (or none at all), as reattach
    /// and promote do. The builder begins in `PayloadAssembled`.
    pub fn from_payload(
        network_id: u64,
        parents: Vec<MessageId>,
        payload: Option<Payload>,
    ) -> Result<Self, ClientError> {
        let message = Message {
            network_id,
            parents: Message::normalize_parents(parents)?,
            payload,
            nonce: 0,
        };
        message.validate()?;
        let mut builder = Self::new(network_id);
        builder.message = Some(message);
        builder.state = BuilderState::PayloadAssembled;
        Ok(builder)
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    fn expect_state(&self, expected: BuilderState) -> Result<(), ClientError> {
        if self.state != expected {
            return Err(ClientError::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            });
        }
        Ok(())
    }

    /// `Empty -> InputsSelected`. An empty selection is allowed for messages
    /// that only carry an indexation payload.
    pub fn select_inputs(&mut self, inputs: Vec<InputSigningData>) -> Result<(), ClientError> {
        self.expect_state(BuilderState::Empty)?;
        if inputs.len() > IO_COUNT_MAX {
            return Err(ClientError::InvalidMessage(format!(
                "{} inputs exceed the limit of {IO_COUNT_MAX}",
                inputs.len()
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = inputs.iter().find(|i| !seen.insert(i.output_id)) {
            return Err(ClientError::InvalidMessage(format!(
                "input {} selected twice",
                dup.output_id
            )));
        }
        self.inputs = inputs;
        self.state = BuilderState::InputsSelected;
        Ok(())
    }

    /// `InputsSelected -> OutputsAttached`. Fails when the outputs need more
    /// than the inputs hold; any surplus goes back to the first input's
    /// address as a remainder output.
    pub fn attach_outputs(
        &mut self,
        mut outputs: Vec<Output>,
        indexation: Option<IndexationPayload>,
    ) -> Result<(), ClientError> {
        self.expect_state(BuilderState::InputsSelected)?;
        let available = checked_sum(self.inputs.iter().map(|i| i.output.amount))?;
        let required = checked_sum(outputs.iter().map(|o| o.amount))?;
        if required > available {
            return Err(ClientError::UnderfundedTransaction {
                required,
                available,
            });
        }
        if available > required {
            if let Some(first) = self.inputs.first() {
                outputs.push(Output::new(first.output.address, available - required)?);
            }
        }
        if outputs.len() > IO_COUNT_MAX {
            return Err(ClientError::InvalidMessage(format!(
                "{} outputs exceed the limit of {IO_COUNT_MAX}",
                outputs.len()
            )));
        }
        self.outputs = outputs;
        self.indexation = indexation;
        self.state = BuilderState::OutputsAttached;
        Ok(())
    }

    /// `OutputsAttached -> PayloadAssembled`. Signs every input with the key
    /// derived from `seed`; the seed is only borrowed for this call.
    pub fn assemble(
        &mut self,
        seed: Option<&Seed>,
        parents: Vec<MessageId>,
    ) -> Result<&Message, ClientError> {
        self.expect_state(BuilderState::OutputsAttached)?;
        let payload = if self.outputs.is_empty() {
            match self.indexation.take() {
                Some(index) => Payload::Indexation(Box::new(index)),
                None => {
                    return Err(ClientError::InvalidMessage(
                        "a message needs an output or an indexation payload".into(),
                    ))
                }
            }
        } else {
            let essence = TransactionEssence {
                inputs: self.inputs.iter().map(|i| i.output_id).collect(),
                outputs: self.outputs.clone(),
                payload: self.indexation.take(),
            };
            essence.validate()?;
            let seed = seed.ok_or_else(|| {
                ClientError::InvalidMessage("signing inputs needs a seed".into())
            })?;
            let unlock_blocks = self.sign(seed, &essence.hash())?;
            Payload::Transaction(Box::new(TransactionPayload {
                essence,
                unlock_blocks,
            }))
        };

        let message = Message {
            network_id: self.network_id,
            parents: Message::normalize_parents(parents)?,
            payload: Some(payload),
            nonce: 0,
        };
        message.validate()?;
        self.state = BuilderState::PayloadAssembled;
        Ok(self.message.insert(message))
    }

    /// One signature per distinct address, references for the rest.
    fn sign(&self, seed: &Seed, essence_hash: &[u8; 32]) -> Result<Vec<UnlockBlock>, ClientError> {
        let mut signed_at: HashMap<Address, u16> = HashMap::new();
        let mut blocks = Vec::with_capacity(self.inputs.len());
        for (position, input) in self.inputs.iter().enumerate() {
            if let Some(&first) = signed_at.get(&input.output.address) {
                blocks.push(UnlockBlock::Reference(first));
                continue;
            }
            let derived = derive(
                seed,
                input.account_index,
                input.address_index,
                input.internal,
            )?;
            if derived.address != input.output.address {
                return Err(ClientError::InvalidMessage(format!(
                    "input {} is not controlled by the seed at index {}",
                    input.output_id, input.address_index
                )));
            }
            blocks.push(UnlockBlock::Signature {
                public_key: derived.keypair.public,
                signature: sign_essence(essence_hash, &derived.keypair.private),
            });
            // Position fits: input count is capped at IO_COUNT_MAX.
            signed_at.insert(input.output.address, position as u16);
        }
        Ok(blocks)
    }

    pub fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    pub fn parents(&self) -> &[MessageId] {
        self.message.as_ref().map_or(&[], |m| m.parents.as_slice())
    }

    /// Bytes the nonce must be found for.
    pub fn pow_bytes(&self) -> Result<Vec<u8>, ClientError> {
        self.expect_state(BuilderState::PayloadAssembled)?;
        self.message
            .as_ref()
            .map(Message::pow_bytes)
            .ok_or(ClientError::InvalidState {
                expected: BuilderState::PayloadAssembled.as_str(),
                actual: BuilderState::Empty.as_str(),
            })
    }

    /// `PayloadAssembled -> NonceComputed`.
    pub fn set_nonce(&mut self, nonce: u64) -> Result<&Message, ClientError> {
        self.expect_state(BuilderState::PayloadAssembled)?;
        let message = self.message.as_mut().ok_or(ClientError::InvalidState {
            expected: BuilderState::PayloadAssembled.as_str(),
            actual: BuilderState::Empty.as_str(),
        })?;
        message.nonce = nonce;
        self.state = BuilderState::NonceComputed;
        Ok(message)
    }

    /// `NonceComputed -> Submitted`.
    pub fn mark_submitted(&mut self, id: MessageId) -> Result<(), ClientError> {
        self.expect_state(BuilderState::NonceComputed)?;
        self.message_id = Some(id);
        self.state = BuilderState::Submitted;
        Ok(())
    }

    /// Identifier of the submitted message.
    pub fn message_id(&self) -> Option<MessageId> {
        self.message_id
    }

    /// Consume the builder, returning the finished message.
    pub fn into_message(self) -> Option<Message> {
        self.message
    }
}
