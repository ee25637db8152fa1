// Copyright 2025 Cowboy AI, LLC.

//! Mutations of text payloads.

use super::indexed::{Indexed, Mutation};
use super::TransformerKind;

/// `(c + 1) % 127 + 33`, always in `'!'..='\u{9f}'`.
pub(crate) fn shifted_char(c: char) -> char {
    char::from_u32((c as u32 + 1) % 127 + 33).unwrap_or('!')
}

/// Position `i` replaces the i-th character with [`shifted_char`] of it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShiftedChar;

impl Mutation for ShiftedChar {
    type Payload = String;
    type Output = String;
    const KIND: TransformerKind = TransformerKind::String;

    fn count(&self, reference: &String) -> usize {
        reference.chars().count()
    }

    fn mutate(&self, payload: &String, index: usize) -> String {
        payload
            .chars()
            .enumerate()
            .map(|(i, c)| if i == index { shifted_char(c) } else { c })
            .collect()
    }

    fn unmutated(&self, payload: &String) -> String {
        payload.clone()
    }
}

/// Negates `"true"`/`"false"`; any other text has nothing to mutate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegatedBoolean;

impl Mutation for NegatedBoolean {
    type Payload = String;
    type Output = String;
    const KIND: TransformerKind = TransformerKind::BooleanAsString;

    fn count(&self, reference: &String) -> usize {
        usize::from(reference.parse::<bool>().is_ok())
    }

    fn mutate(&self, payload: &String, _index: usize) -> String {
        match payload.parse::<bool>() {
            Ok(b) => (!b).to_string(),
            Err(_) => payload.clone(),
        }
    }

    fn unmutated(&self, payload: &String) -> String {
        payload.clone()
    }
}

/// Negates a decimal integer; zero becomes one.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegatedInteger;

impl Mutation for NegatedInteger {
    type Payload = String;
    type Output = String;
    const KIND: TransformerKind = TransformerKind::IntegerAsString;

    fn count(&self, reference: &String) -> usize {
        usize::from(reference.trim().parse::<i64>().is_ok())
    }

    fn mutate(&self, payload: &String, _index: usize) -> String {
        match payload.trim().parse::<i64>() {
            Ok(0) => "1".to_string(),
            Ok(n) => n.checked_neg().unwrap_or(i64::MAX).to_string(),
            Err(_) => payload.clone(),
        }
    }

    fn unmutated(&self, payload: &String) -> String {
        payload.clone()
    }
}

/// `null`, then the empty string.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringByzantineValues;

impl StringByzantineValues {
    const VALUES: [Option<&'static str>; 2] = [None, Some("")];
}

impl Mutation for StringByzantineValues {
    type Payload = String;
    type Output = Option<String>;
    const KIND: TransformerKind = TransformerKind::StringByzantine;

    fn count(&self, _reference: &String) -> usize {
        Self::VALUES.len()
    }

    fn mutate(&self, _payload: &String, index: usize) -> Option<String> {
        Self::VALUES[index].map(str::to_string)
    }

    fn unmutated(&self, payload: &String) -> Option<String> {
        Some(payload.clone())
    }
}

/// One mutation per character.
pub type StringTransformer = Indexed<ShiftedChar>;
/// One mutation of `"true"`/`"false"`.
pub type BooleanAsStringTransformer = Indexed<NegatedBoolean>;
/// One mutation of a decimal integer.
pub type IntegerAsStringTransformer = Indexed<NegatedInteger>;
/// Two byzantine values for any string.
pub type StringByzantineTransformer = Indexed<StringByzantineValues>;
