//! An in-memory ledger shared by null nodes.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use quorum_api::{LedgerInclusionState, MessageMetadata, MilestoneResponse, OutputResponse};
use quorum_types::{Address, Message, MessageId, Output, OutputId, TransactionId};

#[derive(Default)]
struct Flags {
    should_promote: Option<bool>,
    should_reattach: Option<bool>,
    referenced_by: Option<u32>,
    inclusion: Option<LedgerInclusionState>,
}

struct LedgerState {
    genesis: MessageId,
    messages: HashMap<MessageId, Message>,
    flags: HashMap<MessageId, Flags>,
    outputs: BTreeMap<OutputId, OutputResponse>,
    milestones: BTreeMap<u32, MilestoneResponse>,
    tips: Vec<MessageId>,
    funded: u64,
}

/// Ledger state seen by every honest [`NullNode`](crate::NullNode) built on it.
///
/// Cloning shares the state.
#[derive(Clone)]
pub struct NullLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl NullLedger {
    /// A ledger holding only a genesis message, which is also the only tip.
    pub fn new() -> Self {
        let genesis = Message {
            network_id: 0,
            parents: vec![MessageId::ZERO],
            payload: None,
            nonce: 0,
        };
        let genesis_id = genesis.id();
        let mut messages = HashMap::new();
        messages.insert(genesis_id, genesis);
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                genesis: genesis_id,
                messages,
                flags: HashMap::new(),
                outputs: BTreeMap::new(),
                milestones: BTreeMap::new(),
                tips: vec![genesis_id],
                funded: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn genesis(&self) -> MessageId {
        self.state().genesis
    }

    /// Create an unspent output of `amount` for `address` out of thin air.
    pub fn fund(&self, address: Address, amount: u64) -> OutputId {
        let mut state = self.state();
        state.funded += 1;
        let mut tx = [0xF0; 32];
        tx[..8].copy_from_slice(&state.funded.to_le_bytes());
        let output_id = OutputId::new(TransactionId::new(tx), 0);
        let message_id = state.genesis;
        state.outputs.insert(
            output_id,
            OutputResponse {
                output_id,
                message_id,
                output: Output { address, amount },
                is_spent: false,
            },
        );
        output_id
    }

    /// Mark an output spent without a transaction.
    pub fn spend(&self, output_id: &OutputId) {
        if let Some(output) = self.state().outputs.get_mut(output_id) {
            output.is_spent = true;
        }
    }

    /// Attach a message: spends its inputs, creates its outputs and makes it
    /// the only tip.
    pub fn attach(&self, message: Message) -> MessageId {
        let id = message.id();
        let mut state = self.state();
        if let Some(tx) = message.transaction() {
            let tx_id = tx.id();
            for input in &tx.essence.inputs {
                if let Some(output) = state.outputs.get_mut(input) {
                    output.is_spent = true;
                }
            }
            for (index, output) in tx.essence.outputs.iter().enumerate() {
                let output_id = OutputId::new(tx_id, index as u16);
                state.outputs.insert(
                    output_id,
                    OutputResponse {
                        output_id,
                        message_id: id,
                        output: output.clone(),
                        is_spent: false,
                    },
                );
            }
        }
        state.messages.insert(id, message);
        state.tips = vec![id];
        id
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.state().messages.contains_key(id)
    }

    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.state().messages.get(id).cloned()
    }

    pub fn message_count(&self) -> usize {
        self.state().messages.len()
    }

    pub fn tips(&self) -> Vec<MessageId> {
        self.state().tips.clone()
    }

    pub fn metadata(&self, id: &MessageId) -> Option<MessageMetadata> {
        let state = self.state();
        let message = state.messages.get(id)?;
        let flags = state.flags.get(id);
        Some(MessageMetadata {
            message_id: *id,
            parents: message.parents.clone(),
            is_solid: true,
            referenced_by_milestone_index: flags.and_then(|f| f.referenced_by),
            ledger_inclusion_state: flags.and_then(|f| f.inclusion),
            should_promote: flags.and_then(|f| f.should_promote),
            should_reattach: flags.and_then(|f| f.should_reattach),
        })
    }

    /// Set the promote/reattach hints nodes report for `id`.
    pub fn set_hints(&self, id: MessageId, should_promote: bool, should_reattach: bool) {
        let mut state = self.state();
        let flags = state.flags.entry(id).or_default();
        flags.should_promote = Some(should_promote);
        flags.should_reattach = Some(should_reattach);
    }

    /// Mark `id` as referenced by milestone `index` and included.
    pub fn confirm(&self, id: MessageId, index: u32) {
        let mut state = self.state();
        let flags = state.flags.entry(id).or_default();
        flags.referenced_by = Some(index);
        flags.inclusion = Some(LedgerInclusionState::Included);
        flags.should_promote = None;
        flags.should_reattach = None;
    }

    pub fn output(&self, id: &OutputId) -> Option<OutputResponse> {
        self.state().outputs.get(id).cloned()
    }

    /// Output ids locked to `address`, in id order.
    pub fn output_ids(&self, address: &Address, include_spent: bool) -> Vec<OutputId> {
        self.state()
            .outputs
            .values()
            .filter(|o| o.output.address == *address && (include_spent || !o.is_spent))
            .map(|o| o.output_id)
            .collect()
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.state()
            .outputs
            .values()
            .filter(|o| o.output.address == *address && !o.is_spent)
            .map(|o| o.output.amount)
            .sum()
    }

    pub fn indexed(&self, index: &[u8]) -> Vec<MessageId> {
        let mut ids: Vec<MessageId> = self
            .state()
            .messages
            .iter()
            .filter(|(_, m)| m.indexation().is_some_and(|ix| ix.index() == index))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    /// Issue milestone `index` pointing at the current first tip.
    pub fn add_milestone(&self, index: u32) -> MilestoneResponse {
        let mut state = self.state();
        let milestone = MilestoneResponse {
            index,
            message_id: state.tips.first().copied().unwrap_or(state.genesis),
            timestamp: u64::from(index) * 10,
        };
        state.milestones.insert(index, milestone.clone());
        milestone
    }

    pub fn milestone(&self, index: u32) -> Option<MilestoneResponse> {
        self.state().milestones.get(&index).cloned()
    }
}

impl Default for NullLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn funded_outputs_are_listed_and_summed() {
        let ledger = NullLedger::new();
        let address = Address::new([1; 32]);
        let a = ledger.fund(address, 10);
        let b = ledger.fund(address, 5);
        assert_ne!(a, b);
        assert_eq!(ledger.balance(&address), 15);

        ledger.spend(&a);
        assert_eq!(ledger.balance(&address), 5);
        assert_eq!(ledger.output_ids(&address, false), vec![b]);
        assert_eq!(ledger.output_ids(&address, true).len(), 2);
    }

    #[test]
    fn genesis_is_the_initial_tip() {
        let ledger = NullLedger::new();
        assert_eq!(ledger.tips(), vec![ledger.genesis()]);
        assert!(ledger.contains(&ledger.genesis()));
    }
}
