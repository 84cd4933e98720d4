use crate::{combinators::Outcome, Failure, State};
use thiserror::Error;

/// Misuse of a deferred. These point at a bug in the calling program and are
/// returned straight to the offending call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("deferred is already {0}, it can only be settled once")]
    AlreadySettled(State),
    #[error("expected {expected} fan-in results, found {actual}")]
    Arity { expected: usize, actual: usize },
    #[error("fan-in slot {index} does not hold a value of the requested type")]
    SlotType { index: usize },
}

/// The failure a fan-in combinator settles with when one or more of its
/// inputs failed. It travels as a [`Failure`]; recover it with
/// `failure.downcast_ref::<AggregateError>()`.
#[derive(Debug, Clone, Error)]
pub enum AggregateError {
    /// `failures` are in the order the inputs failed.
    #[error("{} of {total} inputs to await_void failed: {}", .failures.len(), join(.failures))]
    Void { total: usize, failures: Vec<Failure> },
    /// One slot per input, by input index.
    #[error("error in an input to await_all, values: [{}]", describe(.slots))]
    All { slots: Vec<Outcome> },
}

impl AggregateError {
    /// Every failure payload carried, in the order stored.
    pub fn failures(&self) -> Vec<&Failure> {
        match self {
            AggregateError::Void { failures, .. } => failures.iter().collect(),
            AggregateError::All { slots } => slots.iter().filter_map(Outcome::failure).collect(),
        }
    }
}

fn join(failures: &[Failure]) -> String {
    failures
        .iter()
        .map(|failure| failure.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe(slots: &[Outcome]) -> String {
    slots
        .iter()
        .enumerate()
        .map(|(index, slot)| match slot {
            Outcome::Resolved(_) => format!("#{index} resolved"),
            Outcome::Failed(failure) => format!("#{index} failed: {failure}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
use super::*;
use crate::failure;
use std::sync::Arc;

#[test]
fn test_already_settled_message() {
    let err = Error::AlreadySettled(State::Resolved);
    assert_eq!(err.to_string(), "deferred is already resolved, it can only be settled once");
}

#[test]
fn test_aggregate_lists_every_failure() {
    let err = AggregateError::All {
        slots: vec![
            Outcome::Failed(failure(std::io::Error::other("boom"))),
            Outcome::Resolved(Arc::new("two")),
        ],
    };
    assert_eq!(err.to_string(), "error in an input to await_all, values: [#0 failed: boom, #1 resolved]");
    assert_eq!(err.failures().len(), 1);

    let err = AggregateError::Void {
        total: 3,
        failures: vec![failure(std::io::Error::other("a")), failure(std::io::Error::other("b"))],
    };
    assert_eq!(err.to_string(), "2 of 3 inputs to await_void failed: a; b");
}
}
