// Copyright 2025 Cowboy AI, LLC.

//! Mutations of byte-array payloads.

use super::indexed::{Indexed, Mutation};
use super::TransformerKind;

fn next_byte(b: u8) -> u8 {
    match b {
        b'~' => b'!',
        _ => b.wrapping_add(1),
    }
}

/// Position `i` bumps the i-th byte by one, wrapping `~` to `!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextByte;

impl Mutation for NextByte {
    type Payload = Vec<u8>;
    type Output = Vec<u8>;
    const KIND: TransformerKind = TransformerKind::StringAsByteArr;

    fn count(&self, reference: &Vec<u8>) -> usize {
        reference.len()
    }

    fn mutate(&self, payload: &Vec<u8>, index: usize) -> Vec<u8> {
        let mut mutated = payload.clone();
        mutated[index] = next_byte(mutated[index]);
        mutated
    }

    fn unmutated(&self, payload: &Vec<u8>) -> Vec<u8> {
        payload.clone()
    }
}

/// Position `p` flips bit `p % 8` (most significant first) of byte `p / 8`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitFlip;

impl Mutation for BitFlip {
    type Payload = Vec<u8>;
    type Output = Vec<u8>;
    const KIND: TransformerKind = TransformerKind::BitInByteArr;

    fn count(&self, reference: &Vec<u8>) -> usize {
        reference.len() * 8
    }

    fn mutate(&self, payload: &Vec<u8>, index: usize) -> Vec<u8> {
        let mut mutated = payload.clone();
        mutated[index / 8] ^= 0x80 >> (index % 8);
        mutated
    }

    fn unmutated(&self, payload: &Vec<u8>) -> Vec<u8> {
        payload.clone()
    }
}

/// Negates the bytes of `"true"`/`"false"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegatedBooleanBytes;

impl NegatedBooleanBytes {
    fn parse(payload: &[u8]) -> Option<bool> {
        std::str::from_utf8(payload).ok()?.parse().ok()
    }
}

impl Mutation for NegatedBooleanBytes {
    type Payload = Vec<u8>;
    type Output = Vec<u8>;
    const KIND: TransformerKind = TransformerKind::BooleanAsByteArr;

    fn count(&self, reference: &Vec<u8>) -> usize {
        usize::from(Self::parse(reference).is_some())
    }

    fn mutate(&self, payload: &Vec<u8>, _index: usize) -> Vec<u8> {
        match Self::parse(payload) {
            Some(b) => (!b).to_string().into_bytes(),
            None => payload.clone(),
        }
    }

    fn unmutated(&self, payload: &Vec<u8>) -> Vec<u8> {
        payload.clone()
    }
}

/// Fixed byte strings, then `null`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteArrByzantineValues;

impl ByteArrByzantineValues {
    const VALUES: [Option<&'static str>; 6] = [
        Some(""),
        Some("ThisIsATestString"),
        Some("abcd"),
        Some("1234!!"),
        Some("-11"),
        None,
    ];
}

impl Mutation for ByteArrByzantineValues {
    type Payload = Vec<u8>;
    type Output = Option<Vec<u8>>;
    const KIND: TransformerKind = TransformerKind::ByteArrByzantine;

    fn count(&self, _reference: &Vec<u8>) -> usize {
        Self::VALUES.len()
    }

    fn mutate(&self, _payload: &Vec<u8>, index: usize) -> Option<Vec<u8>> {
        Self::VALUES[index].map(|s| s.as_bytes().to_vec())
    }

    fn unmutated(&self, payload: &Vec<u8>) -> Option<Vec<u8>> {
        Some(payload.clone())
    }
}

/// One mutation per byte.
pub type StringAsByteArrTransformer = Indexed<NextByte>;
/// One mutation per bit.
pub type BitInByteArrTransformer = Indexed<BitFlip>;
/// One mutation of `"true"`/`"false"` bytes.
pub type BooleanAsByteArrTransformer = Indexed<NegatedBooleanBytes>;
/// Six byzantine values for any byte array.
pub type ByteArrByzantineTransformer = Indexed<ByteArrByzantineValues>;
