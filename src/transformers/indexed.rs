// Copyright 2025 Cowboy AI, LLC.

use super::{Accumulator, Transformer, TransformerKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

/// A mutation space addressed by position: `count` mutations, the i-th
/// produced by `mutate(payload, i)`.
pub trait Mutation: Default + Debug + Clone {
    /// Payload type
    type Payload: Clone + Debug + Serialize + DeserializeOwned;
    /// Mutated value type
    type Output: Clone + Debug + Serialize;

    /// Wire name of the transformer walking this space.
    const KIND: TransformerKind;

    /// Number of distinct mutations of `reference`.
    fn count(&self, reference: &Self::Payload) -> usize;

    /// The mutation at `index`, with `index < count(payload)`.
    fn mutate(&self, payload: &Self::Payload, index: usize) -> Self::Output;

    /// The payload itself, for payloads with nothing to mutate.
    fn unmutated(&self, payload: &Self::Payload) -> Self::Output;
}

/// [`Transformer`] walking a [`Mutation`] space; the context is the position.
///
/// An empty space yields the unmutated payload once.
#[derive(Debug, Clone)]
pub struct Indexed<M: Mutation> {
    mutation: M,
    has_next: bool,
    result: Option<M::Output>,
    accumulator: Option<Accumulator<M::Payload, usize>>,
}

impl<M: Mutation> Default for Indexed<M> {
    fn default() -> Self {
        Self::new(M::default())
    }
}

impl<M: Mutation> Indexed<M> {
    /// Walk `mutation`.
    pub fn new(mutation: M) -> Self {
        Self {
            mutation,
            has_next: true,
            result: None,
            accumulator: None,
        }
    }

    /// Size of the mutation space for `reference`.
    pub fn mutation_count(&self, reference: &M::Payload) -> usize {
        self.mutation.count(reference)
    }
}

impl<M: Mutation> Transformer for Indexed<M> {
    type Payload = M::Payload;
    type Context = usize;
    type Output = M::Output;

    fn kind(&self) -> TransformerKind {
        M::KIND
    }

    fn initial_accumulator(&self, reference: &M::Payload) -> Accumulator<M::Payload, usize> {
        Accumulator::new(reference.clone(), 0)
    }

    fn transform(&mut self, payload: &M::Payload, accumulator: Accumulator<M::Payload, usize>) -> &mut Self {
        let count = self.mutation.count(payload);
        if count == 0 {
            self.result = Some(self.mutation.unmutated(payload));
            self.has_next = false;
        } else {
            let index = accumulator.context.min(count - 1);
            self.result = Some(self.mutation.mutate(payload, index));
            self.has_next = index + 1 < count;
        }
        self.accumulator = Some(accumulator);
        self
    }

    fn has_next(&self) -> bool {
        self.has_next
    }

    fn result(&self) -> &M::Output {
        match &self.result {
            Some(result) => result,
            None => panic!("result() called before transform()"),
        }
    }

    fn next_accumulator(&self) -> Accumulator<M::Payload, usize> {
        match &self.accumulator {
            Some(accumulator) => Accumulator::new(accumulator.reference_value.clone(), accumulator.context + 1),
            None => panic!("next_accumulator() called before transform()"),
        }
    }
}
