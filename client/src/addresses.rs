//! Address discovery for a seed.
//!
//! [`AddressFinder`] derives address ranges offline. [`UnspentAddressGetter`]
//! walks the public chain against the network until `gap_limit` consecutive
//! addresses without any output history have been seen.

use std::ops::Range;

use futures_util::future::join_all;
use tracing::debug;

use quorum_api::{Api, ApiError};
use quorum_crypto::{derive, HARDENED_LIMIT};
use quorum_types::{Address, OutputId, Seed};

use crate::client::Client;
use crate::error::ClientError;
use crate::quorum::QuorumResolver;

/// A derived address. `used` is `None` when the network was not asked.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivedAddress {
    pub address: Address,
    pub index: u32,
    pub internal: bool,
    pub used: Option<bool>,
}

/// Offline derivation of a contiguous index range.
pub struct AddressFinder<'a> {
    seed: &'a Seed,
    account_index: u32,
    range: Range<u32>,
}

impl<'a> AddressFinder<'a> {
    pub fn new(seed: &'a Seed) -> Self {
        Self {
            seed,
            account_index: 0,
            range: 0..20,
        }
    }

    pub fn with_account_index(mut self, account_index: u32) -> Self {
        self.account_index = account_index;
        self
    }

    pub fn with_range(mut self, range: Range<u32>) -> Self {
        self.range = range;
        self
    }

    fn derive_chain(&self, internal: bool) -> Result<Vec<DerivedAddress>, ClientError> {
        self.range
            .clone()
            .map(|index| -> Result<DerivedAddress, ClientError> {
                let derived = derive(self.seed, self.account_index, index, internal)?;
                Ok(DerivedAddress {
                    address: derived.address,
                    index,
                    internal,
                    used: None,
                })
            })
            .collect()
    }

    /// Public addresses over the range.
    pub fn finish(&self) -> Result<Vec<DerivedAddress>, ClientError> {
        self.derive_chain(false)
    }

    /// Internal (change) addresses over the range.
    pub fn finish_internal(&self) -> Result<Vec<DerivedAddress>, ClientError> {
        self.derive_chain(true)
    }

    /// Public and internal addresses, interleaved per index.
    pub fn get_all(&self) -> Result<Vec<DerivedAddress>, ClientError> {
        let public = self.derive_chain(false)?;
        let internal = self.derive_chain(true)?;
        Ok(public
            .into_iter()
            .zip(internal)
            .flat_map(|(p, i)| [p, i])
            .collect())
    }
}

/// An address found to have output history, with every output it ever held.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsedAddress {
    pub address: Address,
    pub index: u32,
    pub output_ids: Vec<OutputId>,
}

/// Every output id the network has recorded for `address`, spent or not.
/// Sorted so that nodes listing the same set in another order still agree.
async fn output_history(
    resolver: &QuorumResolver,
    address: Address,
) -> Result<Vec<OutputId>, ClientError> {
    let result = resolver
        .resolve_optional(Api::GetAddressOutputs, |node| async move {
            let mut ids = node.get_address_output_ids(&address, true).await?;
            ids.sort_unstable();
            Ok::<_, ApiError>(ids)
        })
        .await?;
    Ok(result.value.unwrap_or_default())
}

/// Walk the public chain from `start` and return the addresses with history,
/// in index order. Each batch covers exactly the indices left before the gap
/// limit would end the walk, so no address past `last used + gap_limit` is
/// ever queried. Any failed lookup fails the whole walk.
pub(crate) async fn scan_used_addresses(
    resolver: &QuorumResolver,
    seed: &Seed,
    account_index: u32,
    start: u32,
    gap_limit: u32,
) -> Result<Vec<UsedAddress>, ClientError> {
    let gap_limit = gap_limit.max(1);
    let mut used = Vec::new();
    let mut next = start;
    let mut empty_run = 0u32;

    loop {
        let frontier = next
            .saturating_add(gap_limit - empty_run)
            .min(HARDENED_LIMIT);
        if next >= frontier {
            return Ok(used);
        }
        let batch = (next..frontier)
            .map(|index| -> Result<(u32, Address), ClientError> {
                Ok((index, derive(seed, account_index, index, false)?.address))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let histories =
            join_all(batch.iter().map(|&(_, address)| output_history(resolver, address))).await;

        for ((index, address), history) in batch.into_iter().zip(histories) {
            let output_ids = history?;
            if output_ids.is_empty() {
                empty_run += 1;
                if empty_run >= gap_limit {
                    debug!(account_index, last_queried = index, used = used.len(), "address scan done");
                    return Ok(used);
                }
            } else {
                empty_run = 0;
                used.push(UsedAddress {
                    address,
                    index,
                    output_ids,
                });
            }
        }
        next = frontier;
    }
}

/// Addresses with history among the public addresses in `range`, all
/// queried at once.
pub(crate) async fn used_in_range(
    resolver: &QuorumResolver,
    seed: &Seed,
    account_index: u32,
    range: Range<u32>,
) -> Result<Vec<UsedAddress>, ClientError> {
    let addresses = range
        .map(|index| -> Result<(u32, Address), ClientError> {
            Ok((index, derive(seed, account_index, index, false)?.address))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let histories =
        join_all(addresses.iter().map(|&(_, address)| output_history(resolver, address))).await;
    let mut used = Vec::new();
    for ((index, address), history) in addresses.into_iter().zip(histories) {
        let output_ids = history?;
        if !output_ids.is_empty() {
            used.push(UsedAddress {
                address,
                index,
                output_ids,
            });
        }
    }
    Ok(used)
}

/// Finds the most recent address of an account that has output history.
pub struct UnspentAddressGetter<'a> {
    client: &'a Client,
    seed: &'a Seed,
    account_index: u32,
    initial_address_index: u32,
    gap_limit: u32,
}

impl<'a> UnspentAddressGetter<'a> {
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

    /// The last address with history and its index, or the initial address
    /// when none has any.
    pub async fn get(self) -> Result<(Address, u32), ClientError> {
        let used = scan_used_addresses(
            self.client.resolver(),
            self.seed,
            self.account_index,
            self.initial_address_index,
            self.gap_limit,
        )
        .await?;
        match used.last() {
            Some(last) => Ok((last.address, last.index)),
            None => {
                let derived = derive(
                    self.seed,
                    self.account_index,
                    self.initial_address_index,
                    false,
                )?;
                Ok((derived.address, self.initial_address_index))
            }
        }
    }
}
