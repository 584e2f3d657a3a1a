//! Addresses and their checksummed text form.
//!
//! An address is `Blake2b-256(public_key)`. The text form is `qrm_` followed by
//! 52 base32 characters of address and 8 of checksum (the first 5 bytes of
//! `Blake2b-256(address)`), 64 characters in total. The alphabet
//! `13456789abcdefghijkmnopqrstuwxyz` leaves out look-alike characters.

use quorum_types::{Address, PublicKey};
use thiserror::Error;

use crate::hash::blake2b_256;

pub const PREFIX: &str = "qrm_";

const ALPHABET: &[u8; 32] = b"13456789abcdefghijkmnopqrstuwxyz";
const ADDRESS_CHARS: usize = 52;
const CHECKSUM_LEN: usize = 5;
const CHECKSUM_CHARS: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must start with {PREFIX}")]
    MissingPrefix,

    #[error("address body has {0} characters, expected {expected}", expected = ADDRESS_CHARS + CHECKSUM_CHARS)]
    Length(usize),

    #[error("{0:?} is not a base32 address character")]
    InvalidChar(char),

    #[error("address checksum mismatch")]
    Checksum,
}

fn checksum(address: &[u8; 32]) -> [u8; CHECKSUM_LEN] {
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&blake2b_256(address)[..CHECKSUM_LEN]);
    out
}

/// Big-endian 5-bit groups of `bytes`, the last one zero-padded on the right.
fn to_base32(bytes: &[u8], out: &mut String) {
    let bits = bytes.len() * 8;
    for start in (0..bits).step_by(5) {
        let value = (start..start + 5).fold(0usize, |acc, bit| {
            let set = bit < bits && bytes[bit / 8] & (0x80 >> (bit % 8)) != 0;
            (acc << 1) | usize::from(set)
        });
        out.push(char::from(ALPHABET[value]));
    }
}

/// Inverse of [`to_base32`]; trailing pad bits are ignored.
fn from_base32<const N: usize>(text: &str) -> Result<[u8; N], AddressError> {
    let mut out = [0u8; N];
    let mut bit = 0;
    for c in text.chars() {
        let value = ALPHABET
            .iter()
            .position(|&a| char::from(a) == c)
            .ok_or(AddressError::InvalidChar(c))?;
        for shift in (0..5).rev() {
            if bit < N * 8 && value & (1 << shift) != 0 {
                out[bit / 8] |= 0x80 >> (bit % 8);
            }
            bit += 1;
        }
    }
    Ok(out)
}

pub fn address_from_public_key(public_key: &PublicKey) -> Address {
    Address::new(blake2b_256(public_key.as_bytes()))
}

pub fn encode_address(address: &Address) -> String {
    let mut text = String::with_capacity(PREFIX.len() + ADDRESS_CHARS + CHECKSUM_CHARS);
    text.push_str(PREFIX);
    to_base32(address.as_bytes(), &mut text);
    to_base32(&checksum(address.as_bytes()), &mut text);
    text
}

pub fn decode_address(text: &str) -> Result<Address, AddressError> {
    let body = text.strip_prefix(PREFIX).ok_or(AddressError::MissingPrefix)?;
    let len = body.chars().count();
    if len != ADDRESS_CHARS + CHECKSUM_CHARS || !body.is_ascii() {
        return Err(AddressError::Length(len));
    }
    let (address_part, checksum_part) = body.split_at(ADDRESS_CHARS);
    let address: [u8; 32] = from_base32(address_part)?;
    if from_base32::<CHECKSUM_LEN>(checksum_part)? != checksum(&address) {
        return Err(AddressError::Checksum);
    }
    Ok(Address::new(address))
}

pub fn validate_address(text: &str) -> bool {
    decode_address(text).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::keypair_from_private;
    use quorum_types::PrivateKey;

    fn address(byte: u8) -> Address {
        address_from_public_key(&keypair_from_private(PrivateKey([byte; 32])).public)
    }

    #[test]
    fn encoded_form_has_prefix_and_fixed_length() {
        let text = encode_address(&address(1));
        assert!(text.starts_with(PREFIX));
        assert_eq!(text.len(), 64);
        assert_eq!(decode_address(&text), Ok(address(1)));
    }

    #[test]
    fn base32_matches_hand_computed_groups() {
        // 0xFF 0x00 -> 11111 11100 00000 0(0000)
        let mut out = String::new();
        to_base32(&[0xFF, 0x00], &mut out);
        assert_eq!(out, "zw11");
        assert_eq!(from_base32::<2>("zw11"), Ok([0xFF, 0x00]));
    }

    #[test]
    fn malformed_text_is_classified() {
        let good = encode_address(&address(3));
        assert_eq!(
            decode_address(&good.replacen(PREFIX, "xyz_", 1)),
            Err(AddressError::MissingPrefix)
        );
        assert_eq!(decode_address("qrm_tooshort"), Err(AddressError::Length(8)));
        let mut bad_char = good.clone();
        bad_char.replace_range(10..11, "0");
        assert_eq!(decode_address(&bad_char), Err(AddressError::InvalidChar('0')));
    }

    #[test]
    fn flipped_checksum_character_is_rejected() {
        let mut bad = encode_address(&address(4));
        let last = bad.pop().unwrap();
        bad.push(if last == '1' { '3' } else { '1' });
        assert_eq!(decode_address(&bad), Err(AddressError::Checksum));
    }
}
