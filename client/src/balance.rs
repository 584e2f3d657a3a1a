//! Balance of a seed, summed from quorum-verified unspent outputs.

use futures_util::future::join_all;
use tracing::debug;

use quorum_api::{Api, OutputResponse};
use quorum_types::{OutputId, Seed};

use crate::addresses::{scan_used_addresses, UsedAddress};
use crate::client::Client;
use crate::error::ClientError;
use crate::message::InputSigningData;

pub(crate) async fn fetch_output(client: &Client, output_id: OutputId) -> Result<OutputResponse, ClientError> {
    let result = client
        .resolver()
        .resolve_optional(Api::GetOutput, |node| async move {
            node.get_output(&output_id).await
        })
        .await?;
    result.value.ok_or(ClientError::InputNotFound(output_id))
}

/// Unspent outputs held by `used`, in address order. Every output is fetched
/// through the quorum; one failure fails all, and so does an output whose
/// agreed address is not the one that listed it.
pub(crate) async fn unspent_outputs(
    client: &Client,
    account_index: u32,
    used: Vec<UsedAddress>,
) -> Result<Vec<InputSigningData>, ClientError> {
    let mut unspent = Vec::new();
    for UsedAddress {
        address,
        index,
        output_ids,
    } in used
    {
        let outputs = join_all(output_ids.iter().map(|&id| fetch_output(client, id))).await;
        for response in outputs {
            let response = response?;
            if response.output.address != address {
                return Err(ClientError::OutputAddressMismatch {
                    output_id: response.output_id,
                    expected: address,
                    actual: response.output.address,
                });
            }
            if response.is_spent {
                continue;
            }
            unspent.push(InputSigningData {
                output_id: response.output_id,
                output: response.output,
                account_index,
                address_index: index,
                internal: false,
            });
        }
    }
    Ok(unspent)
}

/// Unspent outputs of an account found by a gap-limit walk.
pub(crate) async fn collect_unspent(
    client: &Client,
    seed: &Seed,
    account_index: u32,
    initial_address_index: u32,
    gap_limit: u32,
) -> Result<Vec<InputSigningData>, ClientError> {
    let used = scan_used_addresses(
        client.resolver(),
        seed,
        account_index,
        initial_address_index,
        gap_limit,
    )
    .await?;
    unspent_outputs(client, account_index, used).await
}

/// Sums the unspent outputs of one account.
pub struct BalanceGetter<'a> {
    client: &'a Client,
    seed: &'a Seed,
    account_index: u32,
    initial_address_index: u32,
    gap_limit: u32,
}

impl<'a> BalanceGetter<'a> {
    pub fn new(client: &'a Client, seed: &'a Seed) -> Self {
        Self {
            client,
            seed,
            account_index: 0,
            initial_address_index: 0,
            gap_limit: client.config().gap_limit,
        }
    }

    pub fn with_account_index(mut self, account_index: u32) -> Self {
        self.account_index = account_index;
        self
    }

    pub fn with_initial_address_index(mut self, index: u32) -> Self {
        self.initial_address_index = index;
        self
    }

    pub fn with_gap_limit(mut self, gap_limit: u32) -> Self {
        self.gap_limit = gap_limit;
        self
    }

    pub async fn finish(self) -> Result<u64, ClientError> {
        let unspent = collect_unspent(
            self.client,
            self.seed,
            self.account_index,
            self.initial_address_index,
            self.gap_limit,
        )
        .await?;
        let total = unspent
            .iter()
            .try_fold(0u64, |acc, input| acc.checked_add(input.output.amount))
            .ok_or(ClientError::Overflow)?;
        debug!(account_index = self.account_index, outputs = unspent.len(), total, "balance computed");
        Ok(total)
    }
}
