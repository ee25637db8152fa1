// Copyright 2025 Cowboy AI, LLC.

//! Lifecycle of one instrumented outbound call.
//!
//! ```text
//! Created -> Prepared -> BeforeInvoked -> CompletedOk
//!                                      -> CompletedException
//!                                      -> CompletedByzantine
//!                                      -> CompletedTransformed
//! ```
//!
//! Each completed phase is terminal: exactly one outcome is reported per
//! invocation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a client instrumentor is in its protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvocationPhase {
    /// Constructed, nothing computed yet
    Created,
    /// Clock ticked and execution index advanced
    Prepared,
    /// Decision source consulted
    BeforeInvoked,
    /// The real call returned
    CompletedOk,
    /// The call failed, really or by injection
    CompletedException,
    /// A literal replacement value was returned
    CompletedByzantine,
    /// A transformer mutation was returned
    CompletedTransformed,
}

impl InvocationPhase {
    /// Name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            InvocationPhase::Created => "Created",
            InvocationPhase::Prepared => "Prepared",
            InvocationPhase::BeforeInvoked => "BeforeInvoked",
            InvocationPhase::CompletedOk => "CompletedOk",
            InvocationPhase::CompletedException => "CompletedException",
            InvocationPhase::CompletedByzantine => "CompletedByzantine",
            InvocationPhase::CompletedTransformed => "CompletedTransformed",
        }
    }

    /// Whether the outcome has been reported.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InvocationPhase::CompletedOk
                | InvocationPhase::CompletedException
                | InvocationPhase::CompletedByzantine
                | InvocationPhase::CompletedTransformed
        )
    }

    /// Whether `target` may follow this phase.
    pub fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    /// Phases reachable in one step.
    pub fn valid_transitions(&self) -> Vec<Self> {
        match self {
            InvocationPhase::Created => vec![InvocationPhase::Prepared],
            InvocationPhase::Prepared => vec![InvocationPhase::BeforeInvoked],
            InvocationPhase::BeforeInvoked => vec![
                InvocationPhase::CompletedOk,
                InvocationPhase::CompletedException,
                InvocationPhase::CompletedByzantine,
                InvocationPhase::CompletedTransformed,
            ],
            _ => vec![],
        }
    }
}

impl fmt::Display for InvocationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_happy_path_is_valid() {
        let path = [
            InvocationPhase::Created,
            InvocationPhase::Prepared,
            InvocationPhase::BeforeInvoked,
            InvocationPhase::CompletedOk,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test_case(InvocationPhase::Created, InvocationPhase::BeforeInvoked ; "skip prepare")]
    #[test_case(InvocationPhase::Prepared, InvocationPhase::CompletedOk ; "skip before")]
    #[test_case(InvocationPhase::CompletedOk, InvocationPhase::CompletedException ; "second outcome")]
    #[test_case(InvocationPhase::BeforeInvoked, InvocationPhase::Prepared ; "backwards")]
    fn test_invalid_transitions(from: InvocationPhase, to: InvocationPhase) {
        assert!(!from.can_transition_to(&to));
    }

    #[test]
    fn test_terminal_phases_have_no_successors() {
        for phase in InvocationPhase::BeforeInvoked.valid_transitions() {
            assert!(phase.is_terminal());
            assert!(phase.valid_transitions().is_empty());
        }
        assert!(!InvocationPhase::Created.is_terminal());
    }
}
