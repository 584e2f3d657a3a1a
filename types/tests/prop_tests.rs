use proptest::prelude::*;

use quorum_types::message::network_id;
use quorum_types::{
    Address, IndexationPayload, Message, MessageId, OutputId, Payload, TransactionId,
};

fn message_with(parents: Vec<[u8; 32]>, index: Vec<u8>, data: Vec<u8>, nonce: u64) -> Message {
    let parents = Message::normalize_parents(parents.into_iter().map(MessageId::new).collect())
        .expect("1..=8 parents");
    Message {
        network_id: network_id("devnet"),
        parents,
        payload: Some(Payload::Indexation(Box::new(
            IndexationPayload::new(index, data).expect("valid index"),
        ))),
        nonce,
    }
}

proptest! {
    /// OutputId text form parses back to the same id.
    #[test]
    fn output_id_text_roundtrip(tx in prop::array::uniform32(0u8..), index in any::<u16>()) {
        let id = OutputId::new(TransactionId::new(tx), index);
        let parsed: OutputId = id.to_string().parse().unwrap();
        prop_assert_eq!(parsed, id);
    }

    /// Canonical binary form survives bincode decoding unchanged.
    #[test]
    fn message_bincode_roundtrip(
        parents in prop::collection::vec(prop::array::uniform32(0u8..), 1..8),
        index in prop::collection::vec(any::<u8>(), 1..64),
        data in prop::collection::vec(any::<u8>(), 0..256),
        nonce in any::<u64>(),
    ) {
        let msg = message_with(parents, index, data, nonce);
        let decoded: Message = bincode::deserialize(&msg.to_bytes()).unwrap();
        prop_assert_eq!(decoded.id(), msg.id());
        prop_assert_eq!(decoded, msg);
    }

    /// The nonce never influences the proof-of-work bytes.
    #[test]
    fn pow_bytes_independent_of_nonce(
        parents in prop::collection::vec(prop::array::uniform32(0u8..), 1..8),
        a in any::<u64>(),
        b in any::<u64>(),
    ) {
        let m1 = message_with(parents.clone(), b"idx".to_vec(), vec![], a);
        let m2 = message_with(parents, b"idx".to_vec(), vec![], b);
        prop_assert_eq!(m1.pow_bytes(), m2.pow_bytes());
        prop_assert_eq!(m1.id() == m2.id(), a == b);
    }

    /// Normalized parents are strictly increasing, so validation accepts them.
    #[test]
    fn normalized_parents_validate(
        parents in prop::collection::vec(prop::array::uniform32(0u8..), 1..8),
    ) {
        let msg = message_with(parents, b"i".to_vec(), vec![], 0);
        prop_assert!(msg.validate().is_ok());
    }

    /// Address JSON form is hex and parses back.
    #[test]
    fn address_json_roundtrip(bytes in prop::array::uniform32(0u8..)) {
        let address = Address::new(bytes);
        let json = serde_json::to_string(&address).unwrap();
        let back: Address = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, address);
    }
}
