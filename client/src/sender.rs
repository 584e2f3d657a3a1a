//! High-level value and data transfers.

use std::ops::Range;

use tracing::info;

use quorum_crypto::decode_address;
use quorum_types::message::{IO_COUNT_MAX, PARENTS_MAX, PARENTS_MIN};
use quorum_types::{Address, IndexationPayload, Message, MessageId, Output, OutputId, Seed};

use crate::addresses::{used_in_range, AddressFinder};
use crate::balance::{collect_unspent, fetch_output, unspent_outputs};
use crate::client::Client;
use crate::error::ClientError;
use crate::message::{InputSigningData, MessageBuilder};

/// Builds and submits one message. Created by [`Client::send`].
pub struct MessageSender<'a> {
    client: &'a Client,
    seed: Option<&'a Seed>,
    account_index: u32,
    initial_address_index: u32,
    inputs: Vec<OutputId>,
    input_range: Option<Range<u32>>,
    outputs: Vec<Output>,
    index: Option<Vec<u8>>,
    data: Vec<u8>,
    parents: Option<Vec<MessageId>>,
}

impl<'a> MessageSender<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self {
            client,
            seed: None,
            account_index: 0,
            initial_address_index: 0,
            inputs: Vec::new(),
            input_range: None,
            outputs: Vec::new(),
            index: None,
            data: Vec::new(),
            parents: None,
        }
    }

    /// Seed whose keys unlock the inputs. Only borrowed until `finish`.
    pub fn with_seed(mut self, seed: &'a Seed) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_account_index(mut self, account_index: u32) -> Self {
        self.account_index = account_index;
        self
    }

    /// First address index searched for inputs.
    pub fn with_initial_address_index(mut self, index: u32) -> Self {
        self.initial_address_index = index;
        self
    }

    /// Spend this output instead of selecting inputs automatically.
    pub fn with_input(mut self, output_id: OutputId) -> Self {
        self.inputs.push(output_id);
        self
    }

    /// Only take inputs from public addresses in this index range.
    pub fn with_input_range(mut self, range: Range<u32>) -> Self {
        self.input_range = Some(range);
        self
    }

    /// Pay `amount` to a `qrm_` encoded address.
    pub fn with_output(self, address: &str, amount: u64) -> Result<Self, ClientError> {
        let address = decode_address(address)
            .map_err(|e| ClientError::InvalidMessage(format!("{address}: {e}")))?;
        self.with_output_address(address, amount)
    }

    /// Pay `amount` to a hex encoded address.
    pub fn with_output_hex(self, address: &str, amount: u64) -> Result<Self, ClientError> {
        let address: Address = address.parse()?;
        self.with_output_address(address, amount)
    }

    pub fn with_output_address(mut self, address: Address, amount: u64) -> Result<Self, ClientError> {
        self.outputs.push(Output::new(address, amount)?);
        Ok(self)
    }

    pub fn with_indexation(mut self, index: impl Into<Vec<u8>>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Data stored under the indexation key.
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Use these parents instead of the node's tips.
    pub fn with_parents(mut self, parents: Vec<MessageId>) -> Result<Self, ClientError> {
        if !(PARENTS_MIN..=PARENTS_MAX).contains(&parents.len()) {
            return Err(ClientError::InvalidMessage(format!(
                "{} parents given, expected {PARENTS_MIN}..={PARENTS_MAX}",
                parents.len()
            )));
        }
        self.parents = Some(parents);
        Ok(self)
    }

    /// Select inputs, sign, do the proof-of-work and submit.
    pub async fn finish(mut self) -> Result<Message, ClientError> {
        let indexation = match self.index.take() {
            Some(index) => Some(IndexationPayload::new(index, std::mem::take(&mut self.data))?),
            None if !self.data.is_empty() => {
                return Err(ClientError::InvalidMessage("data needs an indexation key".into()))
            }
            None => None,
        };
        if self.outputs.is_empty() && indexation.is_none() {
            return Err(ClientError::InvalidMessage(
                "nothing to send: add an output or an indexation payload".into(),
            ));
        }
        let required = self
            .outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.amount))
            .ok_or(ClientError::Overflow)?;

        let inputs = if required == 0 && self.inputs.is_empty() {
            Vec::new()
        } else {
            let seed = self
                .seed
                .ok_or_else(|| ClientError::InvalidMessage("spending needs a seed".into()))?;
            if self.inputs.is_empty() {
                self.select_inputs(seed, required).await?
            } else {
                self.explicit_inputs(seed).await?
            }
        };

        let mut builder = MessageBuilder::new(self.client.config().network_id());
        builder.select_inputs(inputs)?;
        builder.attach_outputs(self.outputs, indexation)?;
        let parents = match self.parents {
            Some(parents) => parents,
            None => self.client.get_tips().await?,
        };
        builder.assemble(self.seed, parents)?;
        let message = self.client.submit(builder).await?;
        info!(message_id = %message.id(), required, "message sent");
        Ok(message)
    }

    /// Pick unspent outputs in address order until `required` is covered.
    async fn select_inputs(&self, seed: &Seed, required: u64) -> Result<Vec<InputSigningData>, ClientError> {
        let unspent = match &self.input_range {
            Some(range) => {
                let used = used_in_range(
                    self.client.resolver(),
                    seed,
                    self.account_index,
                    range.clone(),
                )
                .await?;
                unspent_outputs(self.client, self.account_index, used).await?
            }
            None => {
                collect_unspent(
                    self.client,
                    seed,
                    self.account_index,
                    self.initial_address_index,
                    self.client.config().gap_limit,
                )
                .await?
            }
        };

        let mut selected = Vec::new();
        let mut total = 0u64;
        for input in unspent.iter() {
            if total >= required {
                break;
            }
            total = total.checked_add(input.output.amount).ok_or(ClientError::Overflow)?;
            selected.push(input.clone());
        }
        if total < required {
            let available = unspent
                .iter()
                .try_fold(0u64, |acc, i| acc.checked_add(i.output.amount))
                .ok_or(ClientError::Overflow)?;
            return Err(ClientError::UnderfundedTransaction {
                required,
                available,
            });
        }
        if selected.len() > IO_COUNT_MAX {
            return Err(ClientError::InvalidMessage(format!(
                "{} inputs needed, more than {IO_COUNT_MAX} fit in one message",
                selected.len()
            )));
        }
        Ok(selected)
    }

    /// Resolve the given inputs and find the key of each among the seed's
    /// addresses.
    async fn explicit_inputs(&self, seed: &Seed) -> Result<Vec<InputSigningData>, ClientError> {
        let range = self.input_range.clone().unwrap_or_else(|| {
            let start = self.initial_address_index;
            start..start.saturating_add(self.client.config().gap_limit)
        });
        let candidates = AddressFinder::new(seed)
            .with_account_index(self.account_index)
            .with_range(range)
            .get_all()?;

        let mut inputs = Vec::with_capacity(self.inputs.len());
        for &output_id in &self.inputs {
            let response = fetch_output(self.client, output_id).await?;
            if response.is_spent {
                return Err(ClientError::InputSpent(output_id));
            }
            let owner = candidates
                .iter()
                .find(|c| c.address == response.output.address)
                .ok_or_else(|| {
                    ClientError::InvalidMessage(format!(
                        "input {output_id} is not held by an address of this seed"
                    ))
                })?;
            inputs.push(InputSigningData {
                output_id,
                output: response.output,
                account_index: self.account_index,
                address_index: owner.index,
                internal: owner.internal,
            });
        }
        Ok(inputs)
    }
}
